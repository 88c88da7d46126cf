use crate::model::chunk::Normal;
use crate::model::vector3::Vector3;
use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPoint = GeomWithData<[f64; 3], usize>;

const UP: Normal = [0.0, 0.0, 1.0];
const JACOBI_SWEEPS: usize = 32;

/// Unit normal per position from a plane fit over its `k` nearest
/// neighbours, the point itself included. Points with fewer than 3
/// neighbours get (0, 0, 1).
pub fn estimate_normals(positions: &[Vector3], k: usize) -> Vec<Normal> {
	if positions.len() < 3 || k < 3 {
		return vec![UP; positions.len()];
	}
	let tree = RTree::bulk_load(
		positions
			.iter()
			.enumerate()
			.map(|(i, p)| IndexedPoint::new(p.to_array(), i))
			.collect(),
	);
	let mut neighbours = Vec::with_capacity(k);
	positions
		.iter()
		.map(|p| {
			neighbours.clear();
			neighbours.extend(tree.nearest_neighbor_iter(&p.to_array()).take(k).map(|n| *n.geom()));
			fit_plane(&neighbours)
		})
		.collect()
}

fn fit_plane(points: &[[f64; 3]]) -> Normal {
	if points.len() < 3 {
		return UP;
	}
	let n = points.len() as f64;
	let mut mean = [0f64; 3];
	for p in points {
		for axis in 0..3 {
			mean[axis] += p[axis] / n;
		}
	}
	let mut covariance = [[0f64; 3]; 3];
	for p in points {
		let d = [p[0] - mean[0], p[1] - mean[1], p[2] - mean[2]];
		for row in 0..3 {
			for col in 0..3 {
				covariance[row][col] += d[row] * d[col];
			}
		}
	}

	let (values, vectors) = jacobi_eigen(covariance);
	let mut smallest = 0;
	for i in 1..3 {
		if values[i] < values[smallest] {
			smallest = i;
		}
	}
	let v = [vectors[0][smallest], vectors[1][smallest], vectors[2][smallest]];
	let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
	if !(length > 0.0) || !length.is_finite() {
		return UP;
	}
	[(v[0] / length) as f32, (v[1] / length) as f32, (v[2] / length) as f32]
}

/// Eigenvalues and eigenvectors (as columns) of a symmetric 3x3 matrix by
/// cyclic Jacobi rotations.
fn jacobi_eigen(mut a: [[f64; 3]; 3]) -> ([f64; 3], [[f64; 3]; 3]) {
	let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
	let scale = a[0][0].abs() + a[1][1].abs() + a[2][2].abs();
	for _ in 0..JACOBI_SWEEPS {
		let off = a[0][1].abs() + a[0][2].abs() + a[1][2].abs();
		if off <= f64::EPSILON * scale || off == 0.0 {
			break;
		}
		for (p, q) in [(0, 1), (0, 2), (1, 2)] {
			if a[p][q] == 0.0 {
				continue;
			}
			let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
			let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
			let c = 1.0 / (t * t + 1.0).sqrt();
			let s = t * c;
			for k in 0..3 {
				let (kp, kq) = (a[k][p], a[k][q]);
				a[k][p] = c * kp - s * kq;
				a[k][q] = s * kp + c * kq;
			}
			for k in 0..3 {
				let (pk, qk) = (a[p][k], a[q][k]);
				a[p][k] = c * pk - s * qk;
				a[q][k] = s * pk + c * qk;
			}
			for row in v.iter_mut() {
				let (rp, rq) = (row[p], row[q]);
				row[p] = c * rp - s * rq;
				row[q] = s * rp + c * rq;
			}
		}
	}
	([a[0][0], a[1][1], a[2][2]], v)
}

/// Flips `normal` into the half space z > 0. Normals in the z = 0 plane are
/// flipped towards y > 0, then x > 0.
pub fn orient(normal: &mut Normal) {
	let [x, y, z] = *normal;
	let flip = z < 0.0 || (z == 0.0 && (y < 0.0 || (y == 0.0 && x < 0.0)));
	if flip {
		*normal = [-x, -y, -z];
	}
}
