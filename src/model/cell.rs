use crate::model::bounds::Bounds;
use crate::model::vector3::Vector3;
use serde::{Deserialize, Serialize};

/// Cubic octree cell given by its center and edge length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
	pub center: Vector3,
	pub size: f64,
}

impl Cell {
	pub fn new(center: Vector3, size: f64) -> Cell {
		Cell { center, size }
	}

	/// Smallest cell enclosing `bounds`. Degenerate boxes get a unit cell.
	pub fn enclosing(bounds: &Bounds) -> Cell {
		if bounds.is_empty() {
			return Cell::new(Vector3::empty(), 1.0);
		}
		let size = bounds.size().max_component();
		let size = if size > 0.0 { size } else { 1.0 };
		Cell::new(bounds.center(), size)
	}

	pub fn min(&self) -> Vector3 {
		self.center + (-0.5 * self.size)
	}

	pub fn max(&self) -> Vector3 {
		self.center + (0.5 * self.size)
	}

	pub fn bounds(&self) -> Bounds {
		Bounds::new(self.min(), self.max())
	}

	pub fn contains(&self, p: &Vector3) -> bool {
		self.bounds().contains(p)
	}

	/// Octant of `p` relative to the split center. A coordinate equal to the
	/// center goes to the upper half, so identical coordinates always route
	/// identically. Bit 2 is x, bit 1 is y, bit 0 is z.
	pub fn octant(&self, p: &Vector3) -> usize {
		let high_x = p.x >= self.center.x;
		let high_y = p.y >= self.center.y;
		let high_z = p.z >= self.center.z;
		((high_x as usize) << 2) | ((high_y as usize) << 1) | (high_z as usize)
	}

	pub fn child(&self, index: usize) -> Cell {
		let quarter = self.size * 0.25;
		let offset = |bit: usize| if index & bit == 0 { -quarter } else { quarter };
		Cell::new(
			Vector3::new(
				self.center.x + offset(0b100),
				self.center.y + offset(0b010),
				self.center.z + offset(0b001),
			),
			self.size * 0.5,
		)
	}

	/// False once halving no longer moves the child centers in f64.
	pub fn is_splittable(&self) -> bool {
		let quarter = self.size * 0.25;
		quarter > 0.0
			&& self.center.x + quarter != self.center.x
			&& self.center.y + quarter != self.center.y
			&& self.center.z + quarter != self.center.z
	}

	/// Doubles this cell towards `p`. Returns the new cell and the octant the
	/// old cell occupies inside it.
	pub fn grow_towards(&self, p: &Vector3) -> (Cell, usize) {
		let min = self.min();
		let mut new_min = min;
		let mut index = 0;
		if p.x < min.x {
			new_min.x -= self.size;
			index |= 0b100;
		}
		if p.y < min.y {
			new_min.y -= self.size;
			index |= 0b010;
		}
		if p.z < min.z {
			new_min.z -= self.size;
			index |= 0b001;
		}
		(Cell::new(new_min + self.size, self.size * 2.0), index)
	}
}
