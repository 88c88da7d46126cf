use crate::model::chunk::Chunk;

/// Thins the points of one leaf cell before it is written.
pub trait DensityNormalizer: Send + Sync {
	fn normalize(&self, points: Chunk) -> Chunk;
}

impl<N: DensityNormalizer + ?Sized> DensityNormalizer for &N {
	fn normalize(&self, points: Chunk) -> Chunk {
		(**self).normalize(points)
	}
}

/// Sequential minimum distance filter applied per cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinDistNormalizer {
	pub min_dist: f64,
}

impl DensityNormalizer for MinDistNormalizer {
	fn normalize(&self, points: Chunk) -> Chunk {
		points.filter_sequential_min_dist(self.min_dist)
	}
}
