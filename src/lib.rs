pub mod csv_reader;
pub mod error;
pub mod import;
pub mod las;
pub mod model;
pub mod normals;
pub mod octree;
pub mod store;

pub use error::{BuildError, ChunkError, DecodeError, ImportError, StoreError};
pub use import::{import_chunk_stream, import_chunks, import_las, transform_chunk, ChunkTransforms};
pub use model::chunk::Chunk;
pub use model::options::{BuildConfig, ImportConfig};
pub use octree::{OctreeBuilder, PointSet};
pub use store::{Backend, Cancellation, MemoryBackend, Store};
