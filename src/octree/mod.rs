//! Persisted level of detail octree and its out-of-core builder.

pub mod builder;
pub mod compact;
pub mod density;
pub mod lod;
pub mod node;
pub mod point_set;

pub use builder::OctreeBuilder;
pub use compact::compact;
pub use density::{DensityNormalizer, MinDistNormalizer};
pub use node::{BufferKeys, NodeKind, PersistedNode};
pub use point_set::PointSet;
