use crate::model::vector3::Vector3;
use ord_subset::OrdSubsetIterExt;
use serde::{Deserialize, Serialize};

/// Axis aligned box. An empty box has `min = +inf` and `max = -inf`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
	pub min: Vector3,
	pub max: Vector3,
}

impl Bounds {
	pub fn new(min: Vector3, max: Vector3) -> Bounds {
		Bounds { min, max }
	}

	pub fn empty() -> Bounds {
		Bounds {
			min: Vector3::infinity(),
			max: Vector3::infinity() * -1.0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
	}

	pub fn size(&self) -> Vector3 {
		self.max - self.min
	}

	pub fn center(&self) -> Vector3 {
		self.min + self.size() * 0.5
	}

	pub fn extend(&mut self, p: &Vector3) {
		self.min = self.min.min(p);
		self.max = self.max.max(p);
	}

	pub fn union(&self, other: &Bounds) -> Bounds {
		Bounds {
			min: self.min.min(&other.min),
			max: self.max.max(&other.max),
		}
	}

	pub fn contains(&self, p: &Vector3) -> bool {
		p.x >= self.min.x
			&& p.x <= self.max.x
			&& p.y >= self.min.y
			&& p.y <= self.max.y
			&& p.z >= self.min.z
			&& p.z <= self.max.z
	}

	pub fn contains_bounds(&self, other: &Bounds) -> bool {
		other.is_empty() || (self.contains(&other.min) && self.contains(&other.max))
	}
}

pub fn find_bounds(points: &[Vector3]) -> Bounds {
	if points.is_empty() {
		return Bounds::empty();
	}
	let xs = || points.iter().map(|p| p.x);
	let ys = || points.iter().map(|p| p.y);
	let zs = || points.iter().map(|p| p.z);

	match (
		xs().ord_subset_min(),
		ys().ord_subset_min(),
		zs().ord_subset_min(),
		xs().ord_subset_max(),
		ys().ord_subset_max(),
		zs().ord_subset_max(),
	) {
		(Some(lx), Some(ly), Some(lz), Some(ux), Some(uy), Some(uz)) => {
			Bounds::new(Vector3::new(lx, ly, lz), Vector3::new(ux, uy, uz))
		}
		// every coordinate on some axis was NaN
		_ => Bounds::empty(),
	}
}
