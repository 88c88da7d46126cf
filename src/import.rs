//! Import pipeline: decode on a producer thread, transform chunks in
//! parallel, ingest them in input order, finalize the tree.

use crate::error::{ImportError, StoreError};
use crate::las::LasReader;
use crate::model::bounds::Bounds;
use crate::model::cell::Cell;
use crate::model::chunk::Chunk;
use crate::model::options::ImportConfig;
use crate::model::vector3::Vector3;
use crate::normals::NormalEstimator;
use crate::octree::{DensityNormalizer, NodeKind, OctreeBuilder, PointSet};
use crate::store::{Backend, Cancellation, Store};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, info};
use rayon::prelude::*;
use std::io::Read;
use std::thread;

/// Per-chunk strategies, passed with each import rather than configured
/// globally.
#[derive(Clone, Copy, Default)]
pub struct ChunkTransforms<'a> {
	pub map_position: Option<&'a (dyn Fn(&Vector3) -> Vector3 + Send + Sync)>,
	pub normals: Option<&'a dyn NormalEstimator>,
	/// Replaces the min distance filter, per chunk or, with
	/// `normalize_density_globally`, per leaf.
	pub density: Option<&'a dyn DensityNormalizer>,
}

/// Min distance filter, deduplication, position map, normal estimation, in
/// that order.
pub fn transform_chunk(chunk: Chunk, config: &ImportConfig, transforms: &ChunkTransforms) -> Result<Chunk, ImportError> {
	let mut chunk = chunk;
	if !config.normalize_density_globally {
		if let Some(density) = transforms.density {
			chunk = density.normalize(chunk);
		} else if config.min_dist > 0.0 {
			chunk = chunk.filter_sequential_min_dist(config.min_dist);
		}
	}
	if config.deduplicate {
		chunk = chunk.deduplicate_by_position();
	}
	if let Some(map) = transforms.map_position {
		chunk = chunk.map_positions(map);
	}
	if let Some(estimator) = transforms.normals {
		let normals = estimator.estimate(chunk.positions());
		chunk = chunk.with_normals(normals)?;
	}
	Ok(chunk)
}

/// Imports an uncompressed LAS stream. The header extent seeds the root
/// cell.
pub fn import_las<B: Backend, R: Read + Send>(
	store: &Store<B>,
	reader: R,
	config: &ImportConfig,
	transforms: &ChunkTransforms,
	cancel: &Cancellation,
) -> Result<Option<PointSet>, ImportError> {
	let reader = LasReader::new(reader)?
		.with_chunk_size(config.effective_chunk_size())
		.verbose(config.verbose);
	let bounds = reader.header().bounds;
	info!(
		"importing {} points of LAS {}.{} format {}",
		reader.header().point_count(),
		reader.header().version_major,
		reader.header().version_minor,
		reader.header().point_format
	);
	import_chunk_stream(store, bounds, reader.chunks(), config, transforms, cancel)
}

/// Imports chunks already in memory. Their combined extent seeds the root
/// cell.
pub fn import_chunks<B: Backend>(
	store: &Store<B>,
	chunks: Vec<Chunk>,
	config: &ImportConfig,
	transforms: &ChunkTransforms,
	cancel: &Cancellation,
) -> Result<Option<PointSet>, ImportError> {
	let bounds = chunks.iter().fold(Bounds::empty(), |b, c| b.union(c.bounds()));
	import_chunk_stream(
		store,
		bounds,
		chunks.into_iter().map(Ok::<Chunk, ImportError>),
		config,
		transforms,
		cancel,
	)
}

/// Runs the pipeline over any chunk source. `root_bounds` only seeds the
/// root cell; points outside it grow the tree.
pub fn import_chunk_stream<B, I, E>(
	store: &Store<B>,
	root_bounds: Bounds,
	chunks: I,
	config: &ImportConfig,
	transforms: &ChunkTransforms,
	cancel: &Cancellation,
) -> Result<Option<PointSet>, ImportError>
where
	B: Backend,
	I: IntoIterator<Item = Result<Chunk, E>>,
	I::IntoIter: Send,
	E: Into<ImportError> + Send,
{
	let parallelism = config.effective_parallelism();
	let pool = rayon::ThreadPoolBuilder::new().num_threads(parallelism).build()?;
	let mut builder = OctreeBuilder::new(store, config.build_config(), Cell::enclosing(&root_bounds));
	if let (true, Some(density)) = (config.normalize_density_globally, transforms.density) {
		builder = builder.with_normalizer(Box::new(density));
	}
	let (sender, receiver) = crossbeam_channel::bounded::<Result<Chunk, ImportError>>(config.channel_capacity.max(1));

	let consumed = thread::scope(|scope| {
		let producer_cancel = cancel.clone();
		let chunks = chunks.into_iter();
		scope.spawn(move || {
			for item in chunks {
				if producer_cancel.is_cancelled() {
					break;
				}
				let failed = item.is_err();
				// the consumer hung up
				if sender.send(item.map_err(Into::into)).is_err() || failed {
					break;
				}
			}
		});
		consume(receiver, &mut builder, &pool, parallelism, config, transforms, cancel)
	});

	match consumed {
		Ok(()) if !cancel.is_cancelled() => {}
		Ok(()) => {
			builder.abandon()?;
			info!("import cancelled");
			return Ok(None);
		}
		Err(e) => {
			builder.abandon()?;
			if e.is_cancelled() {
				info!("import cancelled");
				return Ok(None);
			}
			return Err(e);
		}
	}
	Ok(builder.finalize(NodeKind::Final, config.key.clone(), cancel)?)
}

fn consume<B: Backend>(
	receiver: Receiver<Result<Chunk, ImportError>>,
	builder: &mut OctreeBuilder<B>,
	pool: &rayon::ThreadPool,
	parallelism: usize,
	config: &ImportConfig,
	transforms: &ChunkTransforms,
	cancel: &Cancellation,
) -> Result<(), ImportError> {
	let mut batch = Vec::with_capacity(parallelism);
	let mut chunk_index = 0usize;
	loop {
		match receiver.recv() {
			Ok(item) => batch.push(item?),
			Err(_) => return Ok(()),
		}
		while batch.len() < parallelism {
			match receiver.try_recv() {
				Ok(item) => batch.push(item?),
				Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
			}
		}
		if cancel.is_cancelled() {
			return Err(StoreError::Cancelled.into());
		}

		let inputs = std::mem::take(&mut batch);
		let transformed = pool.install(|| {
			inputs
				.into_par_iter()
				.map(|chunk| transform_chunk(chunk, config, transforms))
				.collect::<Result<Vec<Chunk>, ImportError>>()
		})?;
		for chunk in transformed {
			debug!("ingesting chunk {} ({} points)", chunk_index, chunk.len());
			builder.ingest(chunk, cancel)?;
			chunk_index += 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::error::{DecodeError, ImportError};
	use crate::import::{import_chunk_stream, import_chunks, import_las, transform_chunk, ChunkTransforms};
	use crate::las::fixture::{random_points, FixtureFile};
	use crate::model::bounds::Bounds;
	use crate::model::chunk::Chunk;
	use crate::model::options::ImportConfig;
	use crate::model::vector3::Vector3;
	use crate::normals::{ConstantEstimator, NormalEstimator};
	use crate::octree::{DensityNormalizer, PointSet};
	use crate::store::{Cancellation, MemoryBackend, Store};
	use std::io::Cursor;

	fn init() {
		let _ = env_logger::builder().is_test(true).try_init();
	}

	fn square() -> Chunk {
		Chunk::from_positions(vec![
			Vector3::new(0.0, 0.0, 0.0),
			Vector3::new(1.0, 0.0, 0.0),
			Vector3::new(1.0, 1.0, 0.0),
			Vector3::new(0.0, 1.0, 0.0),
		])
	}

	fn point_total(store: &Store<MemoryBackend>, set: &PointSet) -> Result<usize, ImportError> {
		let cancel = Cancellation::new();
		let mut total = 0;
		for node in set.nodes(store, &cancel)? {
			if let Some(points) = node.load_points(store, &cancel)? {
				total += points.len();
			}
		}
		Ok(total)
	}

	#[test]
	fn test_square_with_lod_and_constant_normals() -> Result<(), ImportError> {
		init();
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let up = ConstantEstimator([0.0, 0.0, 1.0]);
		let transforms = ChunkTransforms {
			normals: Some(&up),
			..ChunkTransforms::default()
		};
		let set = import_chunks(&store, vec![square()], &ImportConfig::default(), &transforms, &cancel)?.unwrap();
		assert_eq!(set.point_count, 4);

		let root = set.root(&store, &cancel)?;
		let points = root.load_points(&store, &cancel)?.unwrap();
		assert_eq!(points.normals().unwrap(), &[[0.0, 0.0, 1.0]; 4]);
		let lod = root.load_lod(&store, &cancel)?.unwrap();
		assert_eq!(lod.normals().unwrap(), &[[0.0, 0.0, 1.0]; 4]);
		Ok(())
	}

	#[test]
	fn test_square_without_lod() -> Result<(), ImportError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let up = ConstantEstimator([0.0, 0.0, 1.0]);
		let transforms = ChunkTransforms {
			normals: Some(&up),
			..ChunkTransforms::default()
		};
		let config = ImportConfig {
			build_lod: false,
			..ImportConfig::default()
		};
		let set = import_chunks(&store, vec![square()], &config, &transforms, &cancel)?.unwrap();
		let root = set.root(&store, &cancel)?;
		assert!(root.points.normals.is_some());
		assert!(root.lod.normals.is_none());
		assert!(root.load_lod(&store, &cancel)?.is_none());
		Ok(())
	}

	#[test]
	fn test_import_las_keeps_every_point() -> Result<(), ImportError> {
		init();
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let bytes = FixtureFile::new(3, 2, random_points(3000, 9)).to_bytes();
		let config = ImportConfig {
			key: Some("survey".to_string()),
			chunk_size: 250,
			parallelism: 3,
			deduplicate: false,
			max_points_per_cell: 400,
			lod_point_count: 100,
			verbose: true,
			..ImportConfig::default()
		};
		let set = import_las(&store, Cursor::new(bytes), &config, &ChunkTransforms::default(), &cancel)?.unwrap();
		assert_eq!(set.id, "survey");
		assert_eq!(set.point_count, 3000);
		assert_eq!(point_total(&store, &set)?, 3000);
		assert_eq!(PointSet::load(&store, "survey", &cancel)?, set);

		let root = set.root(&store, &cancel)?;
		assert!(!root.is_leaf());
		let lod = root.load_lod(&store, &cancel)?.unwrap();
		assert_eq!(lod.len(), 100);
		assert!(lod.colors().is_some());
		assert!(lod.intensities().is_some());
		Ok(())
	}

	#[test]
	fn test_chunk_transforms_in_order() -> Result<(), ImportError> {
		let chunk = Chunk::from_positions(vec![
			Vector3::new(0.0, 0.0, 0.0),
			Vector3::new(0.1, 0.0, 0.0),
			Vector3::new(2.0, 0.0, 0.0),
			Vector3::new(2.0, 0.0, 0.0),
			Vector3::new(0.0, 0.0, 0.0),
		]);
		let shift = |p: &Vector3| *p + 10.0;
		let transforms = ChunkTransforms {
			map_position: Some(&shift),
			..ChunkTransforms::default()
		};
		let config = ImportConfig {
			min_dist: 0.5,
			..ImportConfig::default()
		};
		let out = transform_chunk(chunk, &config, &transforms)?;
		let xs: Vec<f64> = out.positions().iter().map(|p| p.x).collect();
		// (0.1) is too close, the repeated 2.0 too, the late (0,0,0) is a duplicate
		assert_eq!(xs, vec![10.0, 12.0]);
		assert_eq!(out.bounds().min, Vector3::new(10.0, 10.0, 10.0));
		Ok(())
	}

	struct EveryOther;

	impl DensityNormalizer for EveryOther {
		fn normalize(&self, points: Chunk) -> Chunk {
			let keep: Vec<usize> = (0..points.len()).step_by(2).collect();
			points.subset(&keep)
		}
	}

	fn line(from: usize, to: usize) -> Chunk {
		Chunk::from_positions((from..to).map(|i| Vector3::new(i as f64, 0.0, 0.0)).collect())
	}

	#[test]
	fn test_density_strategy_per_chunk_or_per_leaf() -> Result<(), ImportError> {
		init();
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let transforms = ChunkTransforms {
			density: Some(&EveryOther),
			..ChunkTransforms::default()
		};

		let per_chunk = import_chunks(&store, vec![line(0, 5), line(5, 10)], &ImportConfig::default(), &transforms, &cancel)?.unwrap();
		assert_eq!(per_chunk.point_count, 6);

		let global = ImportConfig {
			normalize_density_globally: true,
			..ImportConfig::default()
		};
		let per_leaf = import_chunks(&store, vec![line(0, 5), line(5, 10)], &global, &transforms, &cancel)?.unwrap();
		assert_eq!(per_leaf.point_count, 5);
		let points = per_leaf.root(&store, &cancel)?.load_points(&store, &cancel)?.unwrap();
		let xs: Vec<f64> = points.positions().iter().map(|p| p.x).collect();
		assert_eq!(xs, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
		Ok(())
	}

	#[test]
	fn test_bad_estimator_is_an_error() {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let broken = |_: &[Vector3]| vec![[0.0f32, 0.0, 1.0]];
		let transforms = ChunkTransforms {
			normals: Some(&broken as &dyn NormalEstimator),
			..ChunkTransforms::default()
		};
		let result = import_chunks(&store, vec![square()], &ImportConfig::default(), &transforms, &cancel);
		assert!(matches!(result, Err(ImportError::Chunk(_))));
	}

	#[test]
	fn test_decode_errors_abort_the_import() {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let bytes = FixtureFile::new(1, 2, random_points(100, 4)).to_bytes();
		let cut = bytes[..bytes.len() - 5].to_vec();
		let config = ImportConfig {
			chunk_size: 30,
			..ImportConfig::default()
		};
		let result = import_las(&store, Cursor::new(cut), &config, &ChunkTransforms::default(), &cancel);
		assert!(matches!(result, Err(ImportError::Decode(DecodeError::Truncated { .. }))));
		store.flush().unwrap();
		assert!(store.backend().is_empty());
	}

	#[test]
	fn test_cancelled_import_returns_none() -> Result<(), ImportError> {
		let cancel = Cancellation::new();
		cancel.cancel();
		let store = Store::new(MemoryBackend::new());
		let chunks = (0..10).map(|i| {
			Ok::<Chunk, ImportError>(Chunk::from_positions(vec![Vector3::new(i as f64, 0.0, 0.0)]))
		});
		let bounds = Bounds::new(Vector3::empty(), Vector3::new(10.0, 1.0, 1.0));
		let result = import_chunk_stream(&store, bounds, chunks, &ImportConfig::default(), &ChunkTransforms::default(), &cancel)?;
		assert!(result.is_none());
		store.flush()?;
		assert!(store.backend().is_empty());
		Ok(())
	}

	#[test]
	fn test_cancel_from_an_estimator_mid_import() -> Result<(), ImportError> {
		let cancel = Cancellation::new();
		let store = Store::new(MemoryBackend::new());
		let trigger = cancel.clone();
		let cancelling = move |positions: &[Vector3]| {
			trigger.cancel();
			vec![[0.0f32, 0.0, 1.0]; positions.len()]
		};
		let transforms = ChunkTransforms {
			normals: Some(&cancelling),
			..ChunkTransforms::default()
		};
		let chunks: Vec<Chunk> = (0..8).map(|_| square()).collect();
		let config = ImportConfig {
			parallelism: 1,
			..ImportConfig::default()
		};
		assert!(import_chunks(&store, chunks, &config, &transforms, &cancel)?.is_none());
		store.flush()?;
		assert!(store.backend().is_empty());
		Ok(())
	}
}
