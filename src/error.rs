//! Error types, one enum per component, composed with `#[from]`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkError {
	#[error("{attribute} has {actual} entries but there are {expected} positions")]
	LengthMismatch {
		attribute: &'static str,
		expected: usize,
		actual: usize,
	},
}

#[derive(Error, Debug)]
pub enum DecodeError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Invalid header: {0}")]
	InvalidHeader(String),

	#[error("Stream truncated at point {point_index} of {expected}")]
	Truncated { point_index: u64, expected: u64 },

	#[error("Unsupported: {0}")]
	Unsupported(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("No entry for key {0}")]
	NotFound(String),

	#[error("Operation cancelled")]
	Cancelled,

	#[error("Failed to serialize {key}: {msg}")]
	Serialize { key: String, msg: String },

	#[error("Failed to deserialize {key}: {msg}")]
	Deserialize { key: String, msg: String },

	#[error("Entry {0} holds a value of a different type")]
	TypeMismatch(String),

	#[error("Backend error: {0}")]
	Backend(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BuildError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Chunk(#[from] ChunkError),

	#[error("Point set metadata: {0}")]
	Metadata(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ImportError {
	#[error(transparent)]
	Decode(#[from] DecodeError),

	#[error(transparent)]
	Build(#[from] BuildError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Chunk(#[from] ChunkError),

	#[error("CSV error: {0}")]
	Csv(#[from] csv::Error),

	#[error("Worker pool: {0}")]
	Pool(#[from] rayon::ThreadPoolBuildError),
}

impl BuildError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, BuildError::Store(StoreError::Cancelled))
	}
}

impl ImportError {
	pub fn is_cancelled(&self) -> bool {
		match self {
			ImportError::Store(StoreError::Cancelled) => true,
			ImportError::Build(e) => e.is_cancelled(),
			_ => false,
		}
	}
}
