use crate::error::{BuildError, StoreError};
use crate::model::bounds::Bounds;
use crate::octree::node::PersistedNode;
use crate::store::{Backend, Cancellation, Serializer, Store};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Handle to a persisted tree. Resolved against whatever store is passed
/// to its methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointSet {
	pub id: String,
	pub root_key: String,
	pub point_count: u64,
	/// Extent of the stored points, `None` for an empty set.
	pub bounds: Option<Bounds>,
}

impl PointSet {
	pub fn save<B: Backend>(&self, store: &Store<B>, cancel: &Cancellation) -> Result<(), StoreError> {
		let value = Arc::new(self.clone());
		let captured = value.clone();
		let serializer: Serializer = Arc::new(move || serde_json::to_vec_pretty(&*captured).map_err(|e| e.to_string()));
		store.put(&self.id, value, serializer, cancel)
	}

	pub fn load<B: Backend>(store: &Store<B>, id: &str, cancel: &Cancellation) -> Result<PointSet, BuildError> {
		if let Some(cached) = store.try_get_cached::<PointSet>(id, cancel) {
			return Ok((*cached).clone());
		}
		let bytes = store
			.get(id, cancel)?
			.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
		Ok(serde_json::from_slice(&bytes)?)
	}

	pub fn root<B: Backend>(&self, store: &Store<B>, cancel: &Cancellation) -> Result<Arc<PersistedNode>, StoreError> {
		PersistedNode::load(store, &self.root_key, cancel)
	}

	/// Every node of the tree, breadth first, each exactly once.
	pub fn nodes<B: Backend>(
		&self,
		store: &Store<B>,
		cancel: &Cancellation,
	) -> Result<Vec<Arc<PersistedNode>>, StoreError> {
		let mut nodes = Vec::new();
		let mut seen = HashSet::new();
		let mut queue = VecDeque::new();
		queue.push_back(self.root_key.clone());
		while let Some(key) = queue.pop_front() {
			if !seen.insert(key.clone()) {
				continue;
			}
			let node = PersistedNode::load(store, &key, cancel)?;
			queue.extend(node.child_keys().cloned());
			nodes.push(node);
		}
		Ok(nodes)
	}
}
