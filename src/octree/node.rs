use crate::error::{BuildError, StoreError};
use crate::model::cell::Cell;
use crate::model::chunk::{Chunk, Normal, Rgb8};
use crate::model::vector3::Vector3;
use crate::store::{Backend, Cancellation, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
	/// Steady state: full resolution data on leaves only.
	Final,
	/// Internal nodes may still carry full resolution data that a compaction
	/// pass pushes down to the leaves.
	TemporaryImport,
}

/// Store keys of one set of parallel attribute buffers. `positions` is
/// `None` when the set holds no points.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferKeys {
	pub positions: Option<String>,
	pub colors: Option<String>,
	pub normals: Option<String>,
	pub intensities: Option<String>,
}

fn take<T: Clone>(value: Arc<T>) -> T {
	Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())
}

fn put_buffer<B: Backend, T: Serialize + Send + Sync + 'static>(
	store: &Store<B>,
	key: String,
	values: Vec<T>,
	written: &mut Vec<String>,
	cancel: &Cancellation,
) -> Result<String, StoreError> {
	store.put_value(&key, values, cancel)?;
	written.push(key.clone());
	Ok(key)
}

impl BufferKeys {
	/// Writes every attribute `chunk` carries under `{prefix}.{attribute}`.
	/// Keys are appended to `written` as soon as they are in the store.
	pub fn write<B: Backend>(
		store: &Store<B>,
		prefix: &str,
		chunk: &Chunk,
		written: &mut Vec<String>,
		cancel: &Cancellation,
	) -> Result<BufferKeys, StoreError> {
		if chunk.is_empty() {
			return Ok(BufferKeys::default());
		}
		let positions = put_buffer(store, format!("{}.positions", prefix), chunk.positions().to_vec(), written, cancel)?;
		let colors = chunk
			.colors()
			.map(|c| put_buffer(store, format!("{}.colors", prefix), c.to_vec(), written, cancel))
			.transpose()?;
		let normals = chunk
			.normals()
			.map(|n| put_buffer(store, format!("{}.normals", prefix), n.to_vec(), written, cancel))
			.transpose()?;
		let intensities = chunk
			.intensities()
			.map(|i| put_buffer(store, format!("{}.intensities", prefix), i.to_vec(), written, cancel))
			.transpose()?;
		Ok(BufferKeys {
			positions: Some(positions),
			colors,
			normals,
			intensities,
		})
	}

	/// Reassembles the buffers into a chunk, `None` when there are no points.
	pub fn read<B: Backend>(&self, store: &Store<B>, cancel: &Cancellation) -> Result<Option<Chunk>, BuildError> {
		let positions_key = match &self.positions {
			Some(key) => key,
			None => return Ok(None),
		};
		let positions: Vec<Vector3> = take(store.get_value(positions_key, cancel)?);
		let colors = match &self.colors {
			Some(key) => Some(take(store.get_value::<Vec<Rgb8>>(key, cancel)?)),
			None => None,
		};
		let normals = match &self.normals {
			Some(key) => Some(take(store.get_value::<Vec<Normal>>(key, cancel)?)),
			None => None,
		};
		let intensities = match &self.intensities {
			Some(key) => Some(take(store.get_value::<Vec<i32>>(key, cancel)?)),
			None => None,
		};
		Ok(Some(Chunk::new(positions, colors, normals, intensities, None)?))
	}

	pub fn positions<B: Backend>(
		&self,
		store: &Store<B>,
		cancel: &Cancellation,
	) -> Result<Option<Arc<Vec<Vector3>>>, StoreError> {
		match &self.positions {
			Some(key) => Ok(Some(store.get_value(key, cancel)?)),
			None => Ok(None),
		}
	}

	pub fn keys(&self) -> impl Iterator<Item = &String> {
		[&self.positions, &self.colors, &self.normals, &self.intensities]
			.into_iter()
			.flatten()
	}
}

/// Persisted octree node. Children are referenced by store key only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
	pub id: String,
	pub cell: Cell,
	/// Points stored in this node's full resolution buffers.
	pub point_count_cell: u64,
	/// Points in the whole subtree.
	pub point_count_tree: u64,
	pub points: BufferKeys,
	pub lod: BufferKeys,
	pub children: [Option<String>; 8],
	pub kind: NodeKind,
}

impl PersistedNode {
	pub fn load<B: Backend>(store: &Store<B>, key: &str, cancel: &Cancellation) -> Result<Arc<PersistedNode>, StoreError> {
		store.get_value(key, cancel)
	}

	pub fn save<B: Backend>(self, store: &Store<B>, cancel: &Cancellation) -> Result<Arc<PersistedNode>, StoreError> {
		let key = self.id.clone();
		store.put_value(&key, self, cancel)
	}

	pub fn is_leaf(&self) -> bool {
		self.children.iter().all(|c| c.is_none())
	}

	pub fn child_keys(&self) -> impl Iterator<Item = &String> {
		self.children.iter().flatten()
	}

	pub fn has_points(&self) -> bool {
		self.points.positions.is_some()
	}

	pub fn has_lod(&self) -> bool {
		self.lod.positions.is_some()
	}

	pub fn load_points<B: Backend>(&self, store: &Store<B>, cancel: &Cancellation) -> Result<Option<Chunk>, BuildError> {
		self.points.read(store, cancel)
	}

	pub fn load_lod<B: Backend>(&self, store: &Store<B>, cancel: &Cancellation) -> Result<Option<Chunk>, BuildError> {
		self.lod.read(store, cancel)
	}

	pub fn owned_keys(&self) -> Vec<String> {
		let mut keys = vec![self.id.clone()];
		keys.extend(self.points.keys().cloned());
		keys.extend(self.lod.keys().cloned());
		keys
	}
}
