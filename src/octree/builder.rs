//! Out-of-core octree construction.
//!
//! Points are routed into an in-memory skeleton of cells. Only leaf buffers
//! hold points, and once more than `max_resident_points` are resident every
//! leaf buffer is spilled to the store. A leaf that overflows after it has
//! spilled splits its resident points among new children and keeps the
//! spilled parts as pending data: full resolution points sitting above leaf
//! level until `finalize` either pushes them down or persists them as is.

use crate::error::BuildError;
use crate::model::bounds::Bounds;
use crate::model::cell::Cell;
use crate::model::chunk::Chunk;
use crate::model::options::BuildConfig;
use crate::model::vector3::Vector3;
use crate::octree::density::{DensityNormalizer, MinDistNormalizer};
use crate::octree::lod;
use crate::octree::node::{BufferKeys, NodeKind, PersistedNode};
use crate::octree::point_set::PointSet;
use crate::store::{fresh_key, Backend, Cancellation, Store};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Spill {
	key: String,
	count: usize,
}

struct BuildNode {
	cell: Cell,
	/// `None` for a leaf.
	children: Option<[Option<usize>; 8]>,
	parts: Vec<Chunk>,
	resident: usize,
	/// A leaf's own spilled points, or an internal node's pending points.
	spilled: Vec<Spill>,
	oversized: bool,
}

impl BuildNode {
	fn leaf(cell: Cell) -> BuildNode {
		BuildNode {
			cell,
			children: None,
			parts: Vec::new(),
			resident: 0,
			spilled: Vec::new(),
			oversized: false,
		}
	}

	fn is_leaf(&self) -> bool {
		self.children.is_none()
	}

	fn spilled_count(&self) -> usize {
		self.spilled.iter().map(|s| s.count).sum()
	}

	fn resident_bounds(&self) -> Bounds {
		self.parts.iter().fold(Bounds::empty(), |b, p| b.union(p.bounds()))
	}
}

/// A persisted subtree as seen by its parent.
struct Written {
	id: String,
	count: u64,
	bounds: Bounds,
	lod: Option<Chunk>,
}

fn take_chunk(chunk: Arc<Chunk>) -> Chunk {
	Arc::try_unwrap(chunk).unwrap_or_else(|shared| (*shared).clone())
}

fn is_finite(p: &Vector3) -> bool {
	p.x.is_finite() && p.y.is_finite() && p.z.is_finite()
}

pub struct OctreeBuilder<'a, B: Backend> {
	store: &'a Store<B>,
	config: BuildConfig,
	normalizer: Option<Box<dyn DensityNormalizer + 'a>>,
	nodes: Vec<BuildNode>,
	root: usize,
	resident: usize,
	ingested: u64,
	/// Every spill key written so far, removed once the build ends.
	spills: Vec<String>,
}

impl<'a, B: Backend> OctreeBuilder<'a, B> {
	pub fn new(store: &'a Store<B>, config: BuildConfig, root: Cell) -> OctreeBuilder<'a, B> {
		let normalizer: Option<Box<dyn DensityNormalizer + 'a>> = if config.min_dist_per_cell > 0.0 {
			Some(Box::new(MinDistNormalizer {
				min_dist: config.min_dist_per_cell,
			}))
		} else {
			None
		};
		OctreeBuilder {
			store,
			config,
			normalizer,
			nodes: vec![BuildNode::leaf(root)],
			root: 0,
			resident: 0,
			ingested: 0,
			spills: Vec::new(),
		}
	}

	pub fn with_normalizer(mut self, normalizer: Box<dyn DensityNormalizer + 'a>) -> OctreeBuilder<'a, B> {
		self.normalizer = Some(normalizer);
		self
	}

	pub fn root_cell(&self) -> Cell {
		self.nodes[self.root].cell
	}

	pub fn point_count(&self) -> u64 {
		self.ingested
	}

	pub fn resident_points(&self) -> usize {
		self.resident
	}

	pub fn ingest(&mut self, chunk: Chunk, cancel: &Cancellation) -> Result<(), BuildError> {
		cancel.check()?;
		if chunk.is_empty() {
			return Ok(());
		}
		self.grow_to_fit(chunk.bounds());
		let root = self.root;
		self.route(root, &chunk);
		self.ingested += chunk.len() as u64;
		self.spill_if_needed(cancel)
	}

	fn grow_to_fit(&mut self, bounds: &Bounds) {
		for target in [bounds.min, bounds.max] {
			if !is_finite(&target) {
				continue;
			}
			while !self.nodes[self.root].cell.contains(&target) {
				let old = self.root;
				let (cell, octant) = self.nodes[old].cell.grow_towards(&target);
				let node = &self.nodes[old];
				if node.is_leaf() && node.resident == 0 && node.spilled.is_empty() {
					self.nodes[old].cell = cell;
					continue;
				}
				let mut children = [None; 8];
				children[octant] = Some(old);
				let mut parent = BuildNode::leaf(cell);
				parent.children = Some(children);
				self.nodes.push(parent);
				self.root = self.nodes.len() - 1;
				debug!("root grown to size {} around {:?}", cell.size, cell.center);
			}
		}
	}

	/// Leaf below `start` whose cell receives `p`, creating missing children
	/// on the way down.
	fn descend(&mut self, start: usize, p: &Vector3) -> usize {
		let mut idx = start;
		loop {
			let cell = self.nodes[idx].cell;
			let octant = cell.octant(p);
			let child = match &self.nodes[idx].children {
				None => return idx,
				Some(children) => children[octant],
			};
			idx = match child {
				Some(child) => child,
				None => {
					self.nodes.push(BuildNode::leaf(cell.child(octant)));
					let child = self.nodes.len() - 1;
					if let Some(children) = self.nodes[idx].children.as_mut() {
						children[octant] = Some(child);
					}
					child
				}
			};
		}
	}

	fn route(&mut self, start: usize, chunk: &Chunk) {
		let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
		for (i, p) in chunk.positions().iter().enumerate() {
			let leaf = self.descend(start, p);
			groups.entry(leaf).or_default().push(i);
		}
		for (leaf, indices) in groups {
			let part = if indices.len() == chunk.len() {
				chunk.clone()
			} else {
				chunk.subset(&indices)
			};
			let node = &mut self.nodes[leaf];
			node.resident += part.len();
			node.parts.push(part);
			self.resident += indices.len();
			self.split_if_needed(leaf);
		}
	}

	fn split_if_needed(&mut self, idx: usize) {
		let node = &self.nodes[idx];
		if node.resident + node.spilled_count() <= self.config.max_points_per_cell {
			return;
		}
		let bounds = node.resident_bounds();
		let identical = node.spilled.is_empty() && bounds.min == bounds.max;
		if identical || !node.cell.is_splittable() {
			if !node.oversized {
				warn!(
					"cell of size {} at {:?} cannot be split further, keeping {} points",
					node.cell.size,
					node.cell.center,
					node.resident + node.spilled_count()
				);
				self.nodes[idx].oversized = true;
			}
			return;
		}

		let node = &mut self.nodes[idx];
		let cell = node.cell;
		let points = Chunk::union(&std::mem::take(&mut node.parts));
		node.resident = 0;
		node.oversized = false;
		node.children = Some([None; 8]);
		if !node.spilled.is_empty() {
			debug!("{} spilled points stay pending above the new children", node.spilled_count());
		}

		let mut groups: [Vec<usize>; 8] = Default::default();
		for (i, p) in points.positions().iter().enumerate() {
			groups[cell.octant(p)].push(i);
		}
		for (octant, indices) in groups.iter().enumerate() {
			if indices.is_empty() {
				continue;
			}
			let mut child = BuildNode::leaf(cell.child(octant));
			child.resident = indices.len();
			child.parts.push(points.subset(indices));
			self.nodes.push(child);
			let child = self.nodes.len() - 1;
			if let Some(children) = self.nodes[idx].children.as_mut() {
				children[octant] = Some(child);
			}
			self.split_if_needed(child);
		}
	}

	fn spill_if_needed(&mut self, cancel: &Cancellation) -> Result<(), BuildError> {
		if self.resident <= self.config.max_resident_points {
			return Ok(());
		}
		let mut spilled = 0;
		for idx in 0..self.nodes.len() {
			if self.nodes[idx].resident == 0 {
				continue;
			}
			let points = Chunk::union(&std::mem::take(&mut self.nodes[idx].parts));
			let count = points.len();
			let key = format!("spill.{}", fresh_key());
			self.store.put_value(&key, points, cancel)?;
			self.store.release(&key, cancel)?;
			self.spills.push(key.clone());

			let node = &mut self.nodes[idx];
			node.resident = 0;
			node.spilled.push(Spill { key, count });
			self.resident -= count;
			spilled += count;
		}
		debug!("spilled {} points, {} remain resident", spilled, self.resident);
		Ok(())
	}

	fn load_spills(&mut self, idx: usize, cancel: &Cancellation) -> Result<Vec<Chunk>, BuildError> {
		let spilled = std::mem::take(&mut self.nodes[idx].spilled);
		let mut chunks = Vec::with_capacity(spilled.len());
		for spill in spilled {
			let chunk = self.store.get_value::<Chunk>(&spill.key, cancel)?;
			self.store.release(&spill.key, cancel)?;
			chunks.push(take_chunk(chunk));
		}
		Ok(chunks)
	}

	/// Moves pending points of internal nodes down into their subtrees.
	fn push_down_pending(&mut self, cancel: &Cancellation) -> Result<(), BuildError> {
		let mut stack = vec![self.root];
		while let Some(idx) = stack.pop() {
			cancel.check()?;
			if self.nodes[idx].is_leaf() {
				continue;
			}
			for chunk in self.load_spills(idx, cancel)? {
				self.route(idx, &chunk);
				self.spill_if_needed(cancel)?;
			}
			if let Some(children) = self.nodes[idx].children {
				stack.extend(children.iter().flatten());
			}
		}
		Ok(())
	}

	fn write_lod(
		&self,
		id: &str,
		candidates: &[Chunk],
		written: &mut Vec<String>,
		cancel: &Cancellation,
	) -> Result<(BufferKeys, Option<Chunk>), BuildError> {
		if !self.config.build_lod {
			return Ok((BufferKeys::default(), None));
		}
		let lod = lod::sample(&Chunk::union(candidates), self.config.lod_point_count);
		let keys = BufferKeys::write(self.store, &format!("{}.lod", id), &lod, written, cancel)?;
		Ok((keys, Some(lod)))
	}

	fn subtree_count(&self, idx: usize) -> usize {
		let node = &self.nodes[idx];
		let own = node.resident + node.spilled_count();
		match &node.children {
			None => own,
			Some(children) => own + children.iter().flatten().map(|&c| self.subtree_count(c)).sum::<usize>(),
		}
	}

	fn write_subtree(
		&mut self,
		idx: usize,
		kind: NodeKind,
		written: &mut Vec<String>,
		cancel: &Cancellation,
	) -> Result<Written, BuildError> {
		cancel.check()?;
		let mut child_keys: [Option<String>; 8] = Default::default();
		let mut count = 0u64;
		let mut bounds = Bounds::empty();
		let mut lod_candidates = Vec::new();

		let children = self.nodes[idx].children;
		let points = match children {
			None => {
				let mut parts = self.load_spills(idx, cancel)?;
				parts.append(&mut std::mem::take(&mut self.nodes[idx].parts));
				let points = Chunk::union(&parts);
				match &self.normalizer {
					Some(normalizer) => normalizer.normalize(points),
					None => points,
				}
			}
			Some(children) => {
				for (octant, child) in children.iter().enumerate() {
					let child = match child {
						Some(child) if self.subtree_count(*child) > 0 => *child,
						_ => continue,
					};
					let subtree = self.write_subtree(child, kind, written, cancel)?;
					count += subtree.count;
					bounds = bounds.union(&subtree.bounds);
					lod_candidates.extend(subtree.lod);
					child_keys[octant] = Some(subtree.id);
				}
				// only left after a temporary import
				Chunk::union(&self.load_spills(idx, cancel)?)
			}
		};
		self.resident -= self.nodes[idx].resident;
		self.nodes[idx].resident = 0;

		count += points.len() as u64;
		bounds = bounds.union(points.bounds());

		let id = fresh_key();
		let point_keys = BufferKeys::write(self.store, &id, &points, written, cancel)?;
		lod_candidates.push(points.clone());
		let (lod_keys, lod) = self.write_lod(&id, &lod_candidates, written, cancel)?;
		let node = PersistedNode {
			id: id.clone(),
			cell: self.nodes[idx].cell,
			point_count_cell: points.len() as u64,
			point_count_tree: count,
			points: point_keys,
			lod: lod_keys,
			children: child_keys,
			kind,
		};
		node.save(self.store, cancel)?;
		written.push(id.clone());
		Ok(Written { id, count, bounds, lod })
	}

	fn write_tree(
		&mut self,
		kind: NodeKind,
		id: Option<String>,
		written: &mut Vec<String>,
		cancel: &Cancellation,
	) -> Result<PointSet, BuildError> {
		if kind == NodeKind::Final {
			self.push_down_pending(cancel)?;
		}
		let root = self.root;
		let tree = self.write_subtree(root, kind, written, cancel)?;
		let point_set = PointSet {
			id: id.unwrap_or_else(fresh_key),
			root_key: tree.id,
			point_count: tree.count,
			bounds: if tree.count > 0 { Some(tree.bounds) } else { None },
		};
		point_set.save(self.store, cancel)?;
		Ok(point_set)
	}

	/// Persists the tree and returns its point set, or `Ok(None)` when
	/// cancelled. A cancelled finalize removes every key it wrote.
	pub fn finalize(
		mut self,
		kind: NodeKind,
		id: Option<String>,
		cancel: &Cancellation,
	) -> Result<Option<PointSet>, BuildError> {
		info!("finalizing {} points as {:?}", self.ingested, kind);
		let mut written = Vec::new();
		match self.write_tree(kind, id, &mut written, cancel) {
			Ok(point_set) => {
				self.discard_spills()?;
				self.store.flush()?;
				info!(
					"wrote {} keys for point set {} ({} points)",
					written.len(),
					point_set.id,
					point_set.point_count
				);
				Ok(Some(point_set))
			}
			Err(e) => {
				let cleanup = Cancellation::new();
				for key in &written {
					self.store.remove(key, &cleanup)?;
				}
				self.discard_spills()?;
				if e.is_cancelled() {
					info!("finalize cancelled, removed {} written keys", written.len());
					Ok(None)
				} else {
					Err(e)
				}
			}
		}
	}

	pub fn abandon(mut self) -> Result<(), BuildError> {
		debug!("abandoning build of {} points", self.ingested);
		self.discard_spills()
	}

	fn discard_spills(&mut self) -> Result<(), BuildError> {
		let cleanup = Cancellation::new();
		for key in self.spills.drain(..) {
			self.store.remove(&key, &cleanup)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::error::BuildError;
	use crate::model::bounds::Bounds;
	use crate::model::cell::Cell;
	use crate::model::chunk::Chunk;
	use crate::model::options::BuildConfig;
	use crate::model::vector3::Vector3;
	use crate::octree::builder::OctreeBuilder;
	use crate::octree::node::{NodeKind, PersistedNode};
	use crate::octree::point_set::PointSet;
	use crate::store::{Cancellation, MemoryBackend, Store};
	use rand::prelude::*;
	use std::sync::Arc;

	fn random_chunk(count: usize, seed: u64) -> Chunk {
		let mut rng = StdRng::seed_from_u64(seed);
		let positions = (0..count)
			.map(|_| {
				Vector3::new(
					rng.gen_range(0.0..100.0),
					rng.gen_range(0.0..100.0),
					rng.gen_range(0.0..100.0),
				)
			})
			.collect();
		Chunk::from_positions(positions)
	}

	fn config(max_points_per_cell: usize, max_resident_points: usize) -> BuildConfig {
		BuildConfig {
			max_points_per_cell,
			lod_point_count: 256,
			build_lod: true,
			max_resident_points,
			min_dist_per_cell: 0.0,
		}
	}

	fn unit_root() -> Cell {
		Cell::enclosing(&Bounds::new(Vector3::empty(), Vector3::new(100.0, 100.0, 100.0)))
	}

	fn sorted_bits(positions: &[Vector3]) -> Vec<[u64; 3]> {
		let mut bits: Vec<[u64; 3]> = positions.iter().map(|p| p.bits()).collect();
		bits.sort();
		bits
	}

	fn all_points(store: &Store<MemoryBackend>, nodes: &[Arc<PersistedNode>]) -> Result<Vec<Vector3>, BuildError> {
		let cancel = Cancellation::new();
		let mut points = Vec::new();
		for node in nodes {
			if let Some(chunk) = node.load_points(store, &cancel)? {
				points.extend_from_slice(chunk.positions());
			}
		}
		Ok(points)
	}

	fn check_final_invariants(
		store: &Store<MemoryBackend>,
		point_set: &PointSet,
		max_points_per_cell: usize,
	) -> Result<Vec<Arc<PersistedNode>>, BuildError> {
		let cancel = Cancellation::new();
		let nodes = point_set.nodes(store, &cancel)?;
		let mut leaf_total = 0;
		for node in &nodes {
			assert_eq!(node.kind, NodeKind::Final);
			if node.is_leaf() {
				assert!(node.point_count_cell as usize <= max_points_per_cell);
				leaf_total += node.point_count_cell;
				if let Some(points) = node.load_points(store, &cancel)? {
					let bounds = node.cell.bounds();
					assert!(points.positions().iter().all(|p| bounds.contains(p)));
				}
			} else {
				assert_eq!(node.point_count_cell, 0);
				assert!(!node.has_points());
				let children: u64 = node
					.child_keys()
					.map(|k| PersistedNode::load(store, k, &cancel).map(|c| c.point_count_tree))
					.sum::<Result<u64, _>>()?;
				assert_eq!(children, node.point_count_tree);
			}
		}
		assert_eq!(leaf_total, point_set.point_count);
		Ok(nodes)
	}

	#[test]
	fn test_leaf_counts_sum_to_total() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(1000, usize::MAX), unit_root());
		for seed in 0..4 {
			builder.ingest(random_chunk(5000, seed), &cancel)?;
		}
		let point_set = builder.finalize(NodeKind::Final, Some("set".to_string()), &cancel)?.unwrap();
		assert_eq!(point_set.point_count, 20_000);
		let nodes = check_final_invariants(&store, &point_set, 1000)?;
		assert!(nodes.len() > 8);
		assert_eq!(all_points(&store, &nodes)?.len(), 20_000);
		Ok(())
	}

	#[test]
	fn test_splits_past_threshold() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(4, usize::MAX), Cell::new(Vector3::empty(), 2.0));
		let small = Chunk::from_positions(vec![
			Vector3::new(-0.5, -0.5, -0.5),
			Vector3::new(0.5, 0.5, 0.5),
			Vector3::new(0.5, -0.5, 0.5),
			Vector3::new(-0.5, 0.5, -0.5),
		]);
		builder.ingest(small, &cancel)?;
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		assert!(set.root(&store, &cancel)?.is_leaf());

		let mut builder = OctreeBuilder::new(&store, config(4, usize::MAX), Cell::new(Vector3::empty(), 2.0));
		let five = Chunk::from_positions(vec![
			Vector3::new(-0.5, -0.5, -0.5),
			Vector3::new(0.5, 0.5, 0.5),
			Vector3::new(0.5, -0.5, 0.5),
			Vector3::new(-0.5, 0.5, -0.5),
			Vector3::new(0.5, 0.5, -0.5),
		]);
		builder.ingest(five, &cancel)?;
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		let root = set.root(&store, &cancel)?;
		assert!(!root.is_leaf());
		assert_eq!(root.child_keys().count(), 5);
		assert_eq!(root.point_count_tree, 5);
		// LOD of the root summarizes all five
		assert_eq!(root.load_lod(&store, &cancel)?.unwrap().len(), 5);
		check_final_invariants(&store, &set, 4)?;
		Ok(())
	}

	#[test]
	fn test_lod_is_bounded_and_drawn_from_the_subtree() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(500, usize::MAX), unit_root());
		let chunk = random_chunk(6000, 11);
		builder.ingest(chunk.clone(), &cancel)?;
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();

		let root = set.root(&store, &cancel)?;
		let lod = root.load_lod(&store, &cancel)?.unwrap();
		assert_eq!(lod.len(), 256);
		let all = sorted_bits(chunk.positions());
		assert!(lod.positions().iter().all(|p| all.binary_search(&p.bits()).is_ok()));
		Ok(())
	}

	#[test]
	fn test_no_lod_when_disabled() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut build = config(100, usize::MAX);
		build.build_lod = false;
		let mut builder = OctreeBuilder::new(&store, build, unit_root());
		builder.ingest(random_chunk(1000, 3), &cancel)?;
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		for node in set.nodes(&store, &cancel)? {
			assert!(!node.has_lod());
		}
		Ok(())
	}

	#[test]
	fn test_root_grows_towards_outside_points() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(10, usize::MAX), Cell::new(Vector3::new(0.5, 0.5, 0.5), 1.0));
		builder.ingest(random_chunk(50, 1).map_positions(|p| *p * 0.01), &cancel)?;
		builder.ingest(
			Chunk::from_positions(vec![Vector3::new(10.0, -5.0, 3.0), Vector3::new(-2.0, 0.0, 0.0)]),
			&cancel,
		)?;
		let root = builder.root_cell();
		assert!(root.contains(&Vector3::new(10.0, -5.0, 3.0)));
		assert!(root.contains(&Vector3::new(-2.0, 0.0, 0.0)));
		assert!(root.contains(&Vector3::new(0.5, 0.5, 0.5)));

		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		assert_eq!(set.point_count, 52);
		check_final_invariants(&store, &set, 10)?;
		Ok(())
	}

	#[test]
	fn test_supplied_box_cannot_hide_outside_points() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(10, usize::MAX), Cell::new(Vector3::new(0.5, 0.5, 0.5), 1.0));
		let unit = Bounds::new(Vector3::empty(), Vector3::new(1.0, 1.0, 1.0));
		let chunk = Chunk::new(
			vec![Vector3::new(0.25, 0.25, 0.25), Vector3::new(50.0, 50.0, 50.0)],
			None,
			None,
			None,
			Some(unit),
		)?;
		builder.ingest(chunk, &cancel)?;
		assert!(builder.root_cell().contains(&Vector3::new(50.0, 50.0, 50.0)));
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		for node in check_final_invariants(&store, &set, 10)? {
			if let Some(points) = node.load_points(&store, &cancel)? {
				let bounds = node.cell.bounds();
				assert!(points.positions().iter().all(|p| bounds.contains(p)));
			}
		}
		Ok(())
	}

	#[test]
	fn test_identical_points_stay_in_one_oversized_leaf() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(10, usize::MAX), unit_root());
		builder.ingest(Chunk::from_positions(vec![Vector3::new(1.0, 2.0, 3.0); 50]), &cancel)?;
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		let root = set.root(&store, &cancel)?;
		assert!(root.is_leaf());
		assert_eq!(root.point_count_cell, 50);
		Ok(())
	}

	#[test]
	fn test_spilled_build_matches_in_memory_build() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let chunks: Vec<Chunk> = (0..20).map(|seed| random_chunk(250, seed)).collect();

		let mut builder = OctreeBuilder::new(&store, config(1000, 500), unit_root());
		for chunk in &chunks {
			builder.ingest(chunk.clone(), &cancel)?;
			assert!(builder.resident_points() <= 500);
		}
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		let nodes = check_final_invariants(&store, &set, 1000)?;

		let input: Vec<Vector3> = chunks.iter().flat_map(|c| c.positions().to_vec()).collect();
		assert_eq!(sorted_bits(&all_points(&store, &nodes)?), sorted_bits(&input));
		// spill buffers are gone
		store.flush()?;
		assert!(store.backend().keys().iter().all(|k| !k.starts_with("spill.")));
		Ok(())
	}

	#[test]
	fn test_temporary_import_keeps_pending_points_until_compaction() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let chunks: Vec<Chunk> = (0..20).map(|seed| random_chunk(250, 100 + seed)).collect();

		let mut builder = OctreeBuilder::new(&store, config(1000, 500), unit_root());
		for chunk in &chunks {
			builder.ingest(chunk.clone(), &cancel)?;
		}
		let set = builder.finalize(NodeKind::TemporaryImport, None, &cancel)?.unwrap();
		assert_eq!(set.point_count, 5000);

		let nodes = set.nodes(&store, &cancel)?;
		assert!(nodes.iter().all(|n| n.kind == NodeKind::TemporaryImport));
		let root = set.root(&store, &cancel)?;
		assert!(!root.is_leaf());
		assert_eq!(root.point_count_cell, 750);
		assert!(root.has_points());
		let input: Vec<Vector3> = chunks.iter().flat_map(|c| c.positions().to_vec()).collect();
		assert_eq!(sorted_bits(&all_points(&store, &nodes)?), sorted_bits(&input));

		let compacted = crate::octree::compact(&store, &set, config(1000, usize::MAX), &cancel)?.unwrap();
		assert_eq!(compacted.id, set.id);
		assert_eq!(compacted.point_count, 5000);
		let compacted_nodes = check_final_invariants(&store, &compacted, 1000)?;
		assert_eq!(sorted_bits(&all_points(&store, &compacted_nodes)?), sorted_bits(&input));

		// the old nodes are gone
		store.flush()?;
		for node in nodes {
			assert!(store.backend().read_raw(&node.id).is_none());
		}
		Ok(())
	}

	#[test]
	fn test_cancelled_finalize_leaves_nothing_behind() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(100, 400), unit_root());
		for seed in 0..5 {
			builder.ingest(random_chunk(200, seed), &cancel)?;
		}
		cancel.cancel();
		assert!(builder.finalize(NodeKind::Final, None, &cancel)?.is_none());
		store.flush()?;
		assert!(store.backend().is_empty());
		Ok(())
	}

	#[test]
	fn test_cancelled_ingest() {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut builder = OctreeBuilder::new(&store, config(100, usize::MAX), unit_root());
		cancel.cancel();
		let result = builder.ingest(random_chunk(10, 1), &cancel);
		assert!(matches!(result, Err(e) if e.is_cancelled()));
		assert_eq!(builder.point_count(), 0);
	}

	#[test]
	fn test_density_normalized_per_leaf() -> Result<(), BuildError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let mut build = config(1000, usize::MAX);
		build.min_dist_per_cell = 0.5;
		let mut builder = OctreeBuilder::new(&store, build, Cell::new(Vector3::new(12.5, 0.0, 0.0), 32.0));
		let positions = (0..100).map(|i| Vector3::new(i as f64 * 0.25, 0.0, 0.0)).collect();
		builder.ingest(Chunk::from_positions(positions), &cancel)?;
		let set = builder.finalize(NodeKind::Final, None, &cancel)?.unwrap();
		assert_eq!(set.point_count, 50);
		Ok(())
	}
}
