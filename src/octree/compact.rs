use crate::error::BuildError;
use crate::model::options::BuildConfig;
use crate::octree::builder::OctreeBuilder;
use crate::octree::node::NodeKind;
use crate::octree::point_set::PointSet;
use crate::store::{Backend, Cancellation, Store};
use log::info;

/// Rebuilds a tree that still carries full resolution data above leaf
/// level into the steady state. The rebuilt tree replaces the old one under
/// the same point set id and the old nodes are removed. Returns `Ok(None)`
/// when cancelled, leaving the old tree in place.
pub fn compact<B: Backend>(
	store: &Store<B>,
	point_set: &PointSet,
	config: BuildConfig,
	cancel: &Cancellation,
) -> Result<Option<PointSet>, BuildError> {
	let nodes = match point_set.nodes(store, cancel) {
		Ok(nodes) => nodes,
		Err(e) if cancel.is_cancelled() => {
			info!("compaction of {} cancelled: {}", point_set.id, e);
			return Ok(None);
		}
		Err(e) => return Err(e.into()),
	};
	let root = point_set.root(store, cancel)?;

	let mut builder = OctreeBuilder::new(store, config, root.cell);
	for node in &nodes {
		let points = match node.load_points(store, cancel) {
			Ok(points) => points,
			Err(e) => {
				builder.abandon()?;
				return if e.is_cancelled() { Ok(None) } else { Err(e) };
			}
		};
		if let Some(points) = points {
			if let Err(e) = builder.ingest(points, cancel) {
				builder.abandon()?;
				return if e.is_cancelled() { Ok(None) } else { Err(e) };
			}
		}
	}

	let rebuilt = match builder.finalize(NodeKind::Final, Some(point_set.id.clone()), cancel)? {
		Some(rebuilt) => rebuilt,
		None => return Ok(None),
	};
	let cleanup = Cancellation::new();
	for node in &nodes {
		for key in node.owned_keys() {
			store.remove(&key, &cleanup)?;
		}
	}
	store.flush()?;
	info!("compacted {} nodes of point set {}", nodes.len(), rebuilt.id);
	Ok(Some(rebuilt))
}
