//! Normal estimation and the passes that write normals into a stored tree.

mod estimate;

pub use estimate::{estimate_normals, orient};

use crate::error::BuildError;
use crate::model::chunk::Normal;
use crate::model::vector3::Vector3;
use crate::octree::node::{BufferKeys, PersistedNode};
use crate::octree::point_set::PointSet;
use crate::store::{fresh_key, Backend, Cancellation, Store};
use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;

/// Sign convention applied after estimation. A plane fit only determines a
/// normal up to its sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
	/// Whatever sign the eigen solver produced.
	AsEstimated,
	/// Flip so that z >= 0, breaking ties on y then x.
	PositiveZ,
}

/// Computes one normal per position.
pub trait NormalEstimator: Send + Sync {
	fn estimate(&self, positions: &[Vector3]) -> Vec<Normal>;
}

impl<F> NormalEstimator for F
where
	F: Fn(&[Vector3]) -> Vec<Normal> + Send + Sync,
{
	fn estimate(&self, positions: &[Vector3]) -> Vec<Normal> {
		self(positions)
	}
}

/// Plane fit over the `k` nearest neighbours of every point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KNearestEstimator {
	pub k: usize,
	pub orientation: Orientation,
}

impl Default for KNearestEstimator {
	fn default() -> KNearestEstimator {
		KNearestEstimator {
			k: 16,
			orientation: Orientation::PositiveZ,
		}
	}
}

impl NormalEstimator for KNearestEstimator {
	fn estimate(&self, positions: &[Vector3]) -> Vec<Normal> {
		let mut normals = estimate_normals(positions, self.k);
		if self.orientation == Orientation::PositiveZ {
			normals.iter_mut().for_each(orient);
		}
		normals
	}
}

/// The same normal for every point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantEstimator(pub Normal);

impl NormalEstimator for ConstantEstimator {
	fn estimate(&self, positions: &[Vector3]) -> Vec<Normal> {
		vec![self.0; positions.len()]
	}
}

fn normals_for<B: Backend, E: NormalEstimator + ?Sized>(
	store: &Store<B>,
	buffers: &BufferKeys,
	key: String,
	estimator: &E,
	cancel: &Cancellation,
) -> Result<Option<String>, BuildError> {
	let positions = match buffers.positions(store, cancel)? {
		Some(positions) => positions,
		None => return Ok(None),
	};
	let normals = estimator.estimate(&positions);
	if normals.len() != positions.len() {
		return Err(crate::error::ChunkError::LengthMismatch {
			attribute: "normals",
			expected: positions.len(),
			actual: normals.len(),
		}
		.into());
	}
	store.put_value(&key, normals, cancel)?;
	Ok(Some(key))
}

/// Recomputes both normal buffers of one node and stores the updated record
/// under the same id.
fn rewrite_node<B: Backend, E: NormalEstimator + ?Sized>(
	store: &Store<B>,
	node: &PersistedNode,
	estimator: &E,
	cancel: &Cancellation,
) -> Result<(), BuildError> {
	let mut updated = node.clone();
	if let Some(key) = normals_for(store, &node.points, format!("{}.normals", node.id), estimator, cancel)? {
		updated.points.normals = Some(key);
	}
	if let Some(key) = normals_for(store, &node.lod, format!("{}.lod.normals", node.id), estimator, cancel)? {
		updated.lod.normals = Some(key);
	}
	if updated != *node {
		updated.save(store, cancel)?;
	}
	Ok(())
}

fn rewrite_tree<B: Backend, E: NormalEstimator + ?Sized>(
	store: &Store<B>,
	point_set: &PointSet,
	estimator: &E,
	cancel: &Cancellation,
) -> Result<usize, BuildError> {
	let nodes: Vec<Arc<PersistedNode>> = point_set.nodes(store, cancel)?;
	nodes
		.par_iter()
		.map(|node| rewrite_node(store, node, estimator, cancel))
		.collect::<Result<Vec<()>, BuildError>>()?;
	store.flush()?;
	debug!("rewrote normals of {} nodes", nodes.len());
	Ok(nodes.len())
}

/// Writes normals into a tree built without them. Node ids and every other
/// buffer stay as they are. Returns `Ok(None)` when cancelled, in which case
/// some nodes may already carry their new normals.
pub fn generate_normals<B: Backend, E: NormalEstimator + ?Sized>(
	store: &Store<B>,
	point_set: &PointSet,
	estimator: &E,
	cancel: &Cancellation,
) -> Result<Option<PointSet>, BuildError> {
	match rewrite_tree(store, point_set, estimator, cancel) {
		Ok(count) => {
			info!("generated normals for {} nodes of {}", count, point_set.id);
			Ok(Some(point_set.clone()))
		}
		Err(e) if e.is_cancelled() => Ok(None),
		Err(e) => Err(e),
	}
}

/// Recomputes the normals of every node exactly once and records the result
/// as a new point set over the same nodes.
pub fn regenerate_normals<B: Backend, E: NormalEstimator + ?Sized>(
	store: &Store<B>,
	point_set: &PointSet,
	estimator: &E,
	cancel: &Cancellation,
) -> Result<Option<PointSet>, BuildError> {
	let count = match rewrite_tree(store, point_set, estimator, cancel) {
		Ok(count) => count,
		Err(e) if e.is_cancelled() => return Ok(None),
		Err(e) => return Err(e),
	};
	let regenerated = PointSet {
		id: fresh_key(),
		..point_set.clone()
	};
	regenerated.save(store, cancel)?;
	store.flush()?;
	info!(
		"regenerated normals for {} nodes of {} as {}",
		count, point_set.id, regenerated.id
	);
	Ok(Some(regenerated))
}
