use serde::{Deserialize, Serialize};
use std::ops;

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
	pub x: f64,
	pub y: f64,
	pub z: f64,
}

impl Vector3 {
	pub fn new(x: f64, y: f64, z: f64) -> Vector3 {
		Vector3 { x, y, z }
	}

	pub fn infinity() -> Vector3 {
		Vector3 {
			x: f64::INFINITY,
			y: f64::INFINITY,
			z: f64::INFINITY,
		}
	}

	pub fn empty() -> Vector3 {
		Vector3 {
			x: 0.0,
			y: 0.0,
			z: 0.0,
		}
	}

	pub fn to_array(&self) -> [f64; 3] {
		[self.x, self.y, self.z]
	}

	pub fn dot(&self, other: &Vector3) -> f64 {
		self.x * other.x + self.y * other.y + self.z * other.z
	}

	pub fn squared_distance(&self, other: &Vector3) -> f64 {
		let d = *self - *other;
		d.dot(&d)
	}

	pub fn distance(&self, other: &Vector3) -> f64 {
		self.squared_distance(other).sqrt()
	}

	pub fn min(&self, other: &Vector3) -> Vector3 {
		Vector3 {
			x: self.x.min(other.x),
			y: self.y.min(other.y),
			z: self.z.min(other.z),
		}
	}

	pub fn max(&self, other: &Vector3) -> Vector3 {
		Vector3 {
			x: self.x.max(other.x),
			y: self.y.max(other.y),
			z: self.z.max(other.z),
		}
	}

	pub fn max_component(&self) -> f64 {
		self.x.max(self.y).max(self.z)
	}

	/// Bit pattern of the coordinates, used as an exact-equality hash key.
	/// `-0.0` and `0.0` map to the same pattern.
	pub fn bits(&self) -> [u64; 3] {
		[
			(self.x + 0.0).to_bits(),
			(self.y + 0.0).to_bits(),
			(self.z + 0.0).to_bits(),
		]
	}
}

impl ops::Mul<Vector3> for Vector3 {
	type Output = Vector3;

	fn mul(self, _rhs: Vector3) -> Vector3 {
		Vector3 {
			x: self.x * _rhs.x,
			y: self.y * _rhs.y,
			z: self.z * _rhs.z,
		}
	}
}

impl ops::Mul<f64> for Vector3 {
	type Output = Vector3;

	fn mul(self, scalar: f64) -> Vector3 {
		Vector3 {
			x: self.x * scalar,
			y: self.y * scalar,
			z: self.z * scalar,
		}
	}
}

impl ops::Sub<Vector3> for Vector3 {
	type Output = Vector3;

	fn sub(self, _rhs: Vector3) -> Vector3 {
		Vector3 {
			x: self.x - _rhs.x,
			y: self.y - _rhs.y,
			z: self.z - _rhs.z,
		}
	}
}

impl ops::Add<Vector3> for Vector3 {
	type Output = Vector3;

	fn add(self, _rhs: Vector3) -> Vector3 {
		Vector3 {
			x: self.x + _rhs.x,
			y: self.y + _rhs.y,
			z: self.z + _rhs.z,
		}
	}
}

impl ops::Add<f64> for Vector3 {
	type Output = Vector3;
	fn add(self, scalar: f64) -> Vector3 {
		Vector3 {
			x: self.x + scalar,
			y: self.y + scalar,
			z: self.z + scalar,
		}
	}
}
