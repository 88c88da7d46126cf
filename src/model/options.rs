use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportConfig {
	/// Point set id. A fresh one is generated when absent.
	pub key: Option<String>,
	/// Points per decoded chunk. `<= 0` reads everything as one chunk.
	pub chunk_size: i64,
	/// Worker threads for per-chunk transforms. `<= 0` uses all cores.
	pub parallelism: i32,
	/// Sequential min-distance filter. `<= 0` disables it.
	pub min_dist: f64,
	pub deduplicate: bool,
	pub max_points_per_cell: usize,
	pub lod_point_count: usize,
	pub build_lod: bool,
	/// Apply the density normalizer per leaf cell instead of per chunk.
	pub normalize_density_globally: bool,
	/// Resident points before leaf buffers spill to the store.
	pub max_resident_points: usize,
	pub verbose: bool,
	/// Decoded chunks buffered between producer and consumer.
	pub channel_capacity: usize,
}

impl Default for ImportConfig {
	fn default() -> ImportConfig {
		ImportConfig {
			key: None,
			chunk_size: 1_000_000,
			parallelism: 0,
			min_dist: 0.0,
			deduplicate: true,
			max_points_per_cell: 8192,
			lod_point_count: 8192,
			build_lod: true,
			normalize_density_globally: false,
			max_resident_points: 10_000_000,
			verbose: false,
			channel_capacity: 4,
		}
	}
}

impl ImportConfig {
	pub fn build_config(&self) -> BuildConfig {
		BuildConfig {
			max_points_per_cell: self.max_points_per_cell.max(1),
			lod_point_count: self.lod_point_count,
			build_lod: self.build_lod,
			max_resident_points: self.max_resident_points,
			min_dist_per_cell: if self.normalize_density_globally {
				self.min_dist
			} else {
				0.0
			},
		}
	}

	pub fn effective_chunk_size(&self) -> Option<usize> {
		if self.chunk_size <= 0 {
			None
		} else {
			Some(self.chunk_size as usize)
		}
	}

	pub fn effective_parallelism(&self) -> usize {
		if self.parallelism > 0 {
			self.parallelism as usize
		} else {
			std::thread::available_parallelism()
				.map(|n| n.get())
				.unwrap_or(1)
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
	pub max_points_per_cell: usize,
	pub lod_point_count: usize,
	pub build_lod: bool,
	pub max_resident_points: usize,
	/// Per-leaf density normalization distance. `<= 0` disables it.
	pub min_dist_per_cell: f64,
}

impl Default for BuildConfig {
	fn default() -> BuildConfig {
		ImportConfig::default().build_config()
	}
}
