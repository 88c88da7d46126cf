use crate::error::ChunkError;
use crate::model::bounds::{find_bounds, Bounds};
use crate::model::vector3::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type Rgb8 = [u8; 3];
pub type Normal = [f32; 3];

/// Immutable batch of points. Every present attribute has one entry per
/// position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
	positions: Vec<Vector3>,
	colors: Option<Vec<Rgb8>>,
	normals: Option<Vec<Normal>>,
	intensities: Option<Vec<i32>>,
	bounds: Bounds,
}

fn check_len<T>(attribute: &'static str, values: &Option<Vec<T>>, expected: usize) -> Result<(), ChunkError> {
	match values {
		Some(values) if values.len() != expected => Err(ChunkError::LengthMismatch {
			attribute,
			expected,
			actual: values.len(),
		}),
		_ => Ok(()),
	}
}

fn pick<T: Clone>(values: &Option<Vec<T>>, indices: &[usize]) -> Option<Vec<T>> {
	values
		.as_ref()
		.map(|values| indices.iter().map(|&i| values[i].clone()).collect())
}

impl Chunk {
	pub fn new(
		positions: Vec<Vector3>,
		colors: Option<Vec<Rgb8>>,
		normals: Option<Vec<Normal>>,
		intensities: Option<Vec<i32>>,
		bounds: Option<Bounds>,
	) -> Result<Chunk, ChunkError> {
		let n = positions.len();
		check_len("colors", &colors, n)?;
		check_len("normals", &normals, n)?;
		check_len("intensities", &intensities, n)?;
		// a supplied box is widened to cover every position
		let computed = find_bounds(&positions);
		let bounds = bounds.map_or(computed, |given| given.union(&computed));
		Ok(Chunk {
			positions,
			colors,
			normals,
			intensities,
			bounds,
		})
	}

	pub fn from_positions(positions: Vec<Vector3>) -> Chunk {
		let bounds = find_bounds(&positions);
		Chunk {
			positions,
			colors: None,
			normals: None,
			intensities: None,
			bounds,
		}
	}

	pub(crate) fn from_parts(
		positions: Vec<Vector3>,
		colors: Option<Vec<Rgb8>>,
		normals: Option<Vec<Normal>>,
		intensities: Option<Vec<i32>>,
	) -> Chunk {
		debug_assert!(colors.as_ref().map_or(true, |c| c.len() == positions.len()));
		debug_assert!(normals.as_ref().map_or(true, |n| n.len() == positions.len()));
		debug_assert!(intensities.as_ref().map_or(true, |i| i.len() == positions.len()));
		let bounds = find_bounds(&positions);
		Chunk {
			positions,
			colors,
			normals,
			intensities,
			bounds,
		}
	}

	pub fn empty() -> Chunk {
		Chunk::from_positions(Vec::new())
	}

	pub fn len(&self) -> usize {
		self.positions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.positions.is_empty()
	}

	pub fn positions(&self) -> &[Vector3] {
		&self.positions
	}

	pub fn colors(&self) -> Option<&[Rgb8]> {
		self.colors.as_deref()
	}

	pub fn normals(&self) -> Option<&[Normal]> {
		self.normals.as_deref()
	}

	pub fn intensities(&self) -> Option<&[i32]> {
		self.intensities.as_deref()
	}

	pub fn bounds(&self) -> &Bounds {
		&self.bounds
	}

	pub fn with_normals(self, normals: Vec<Normal>) -> Result<Chunk, ChunkError> {
		let normals = Some(normals);
		check_len("normals", &normals, self.positions.len())?;
		Ok(Chunk { normals, ..self })
	}

	/// Points at `indices`, in that order. Indices must be in range.
	pub fn subset(&self, indices: &[usize]) -> Chunk {
		let positions: Vec<Vector3> = indices.iter().map(|&i| self.positions[i]).collect();
		let bounds = find_bounds(&positions);
		Chunk {
			positions,
			colors: pick(&self.colors, indices),
			normals: pick(&self.normals, indices),
			intensities: pick(&self.intensities, indices),
			bounds,
		}
	}

	/// Concatenates `chunks` in order. An attribute survives only if every
	/// non-empty input carries it.
	pub fn union(chunks: &[Chunk]) -> Chunk {
		let parts: Vec<&Chunk> = chunks.iter().filter(|c| !c.is_empty()).collect();
		if parts.is_empty() {
			return Chunk::empty();
		}
		if parts.len() == 1 {
			return parts[0].clone();
		}

		fn concat<T: Clone>(parts: &[&Chunk], get: impl Fn(&Chunk) -> Option<&[T]>) -> Option<Vec<T>> {
			let mut all = Vec::new();
			for part in parts {
				all.extend_from_slice(get(*part)?);
			}
			Some(all)
		}

		// parts without the attribute are filled with `fill`
		fn concat_padded<T: Clone>(parts: &[&Chunk], get: impl Fn(&Chunk) -> Option<&[T]>, fill: T) -> Option<Vec<T>> {
			if parts.iter().all(|part| get(*part).is_none()) {
				return None;
			}
			let mut all = Vec::new();
			for part in parts {
				match get(*part) {
					Some(values) => all.extend_from_slice(values),
					None => all.extend(std::iter::repeat(fill.clone()).take(part.len())),
				}
			}
			Some(all)
		}

		let mut positions = Vec::with_capacity(parts.iter().map(|c| c.len()).sum());
		let mut bounds = Bounds::empty();
		for part in &parts {
			positions.extend_from_slice(&part.positions);
			bounds = bounds.union(&part.bounds);
		}
		Chunk {
			positions,
			colors: concat_padded(&parts, |c| c.colors(), [0, 0, 0]),
			normals: concat(&parts, |c| c.normals()),
			intensities: concat_padded(&parts, |c| c.intensities(), 0),
			bounds,
		}
	}

	/// Keeps the first point and every later point at least `min_dist` away
	/// from the last kept point. Order-sensitive, single pass.
	pub fn filter_sequential_min_dist(self, min_dist: f64) -> Chunk {
		if min_dist <= 0.0 || self.positions.len() < 2 {
			return self;
		}
		let squared = min_dist * min_dist;
		let mut keep = Vec::with_capacity(self.positions.len());
		let mut last = self.positions[0];
		keep.push(0);
		for (i, p) in self.positions.iter().enumerate().skip(1) {
			if p.squared_distance(&last) >= squared {
				keep.push(i);
				last = *p;
			}
		}
		if keep.len() == self.positions.len() {
			return self;
		}
		self.subset(&keep)
	}

	/// Drops points whose exact position already occurred earlier.
	pub fn deduplicate_by_position(self) -> Chunk {
		let mut seen = HashSet::with_capacity(self.positions.len());
		let keep: Vec<usize> = (0..self.positions.len())
			.filter(|&i| seen.insert(self.positions[i].bits()))
			.collect();
		if keep.len() == self.positions.len() {
			return self;
		}
		self.subset(&keep)
	}

	pub fn map_positions(self, f: impl Fn(&Vector3) -> Vector3) -> Chunk {
		let positions: Vec<Vector3> = self.positions.iter().map(f).collect();
		let bounds = find_bounds(&positions);
		Chunk {
			positions,
			bounds,
			..self
		}
	}
}
