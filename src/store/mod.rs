//! Key/value persistence with a write-back object cache.
//!
//! Values handed to [`Store::put`] stay in the cache as live objects. Their
//! serializer only runs when the entry is flushed, evicted, or read back as
//! bytes, so hot nodes never round-trip through bytes during an import.
//!
//! The entry map lock is only held to find or insert an entry. Each entry
//! has its own mutex, so writers to one key are serialized while unrelated
//! keys never wait on each other.

mod cancel;
mod memory;

pub use cancel::Cancellation;
pub use memory::MemoryBackend;

use crate::error::StoreError;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

/// Durable byte storage behind a [`Store`].
pub trait Backend: Send + Sync {
	fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
	fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
	fn delete(&self, key: &str) -> io::Result<()>;
	fn sync(&self) -> io::Result<()> {
		Ok(())
	}
}

pub type Serializer = Arc<dyn Fn() -> Result<Vec<u8>, String> + Send + Sync>;
type Object = Arc<dyn Any + Send + Sync>;

struct Slot {
	value: Object,
	pending: Option<Serializer>,
	detached: bool,
}

type Entry = Arc<Mutex<Slot>>;

pub const DEFAULT_CACHE_CAPACITY: usize = 65_536;

pub struct Store<B: Backend> {
	backend: B,
	entries: RwLock<HashMap<String, Entry>>,
	/// Insertion order for eviction. Entries whose slot is gone are stale.
	order: Mutex<VecDeque<(String, Weak<Mutex<Slot>>)>>,
	capacity: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	// a panicked writer leaves plain data behind, keep going with it
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn fresh_key() -> String {
	format!("{:032x}", rand::random::<u128>())
}

impl<B: Backend> Store<B> {
	pub fn new(backend: B) -> Store<B> {
		Store::with_capacity(backend, DEFAULT_CACHE_CAPACITY)
	}

	pub fn with_capacity(backend: B, capacity: usize) -> Store<B> {
		Store {
			backend,
			entries: RwLock::new(HashMap::new()),
			order: Mutex::new(VecDeque::new()),
			capacity: capacity.max(1),
		}
	}

	pub fn backend(&self) -> &B {
		&self.backend
	}

	pub fn cached_len(&self) -> usize {
		self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
	}

	fn entry(&self, key: &str) -> Option<Entry> {
		self.entries
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.get(key)
			.cloned()
	}

	/// Associates `key` with `value`. The serializer runs later, on flush,
	/// eviction, or a byte-level [`Store::get`].
	pub fn put<T: Any + Send + Sync>(
		&self,
		key: &str,
		value: Arc<T>,
		serializer: Serializer,
		cancel: &Cancellation,
	) -> Result<(), StoreError> {
		cancel.check()?;
		let value: Object = value;
		loop {
			let (entry, inserted) = {
				let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
				match entries.get(key) {
					Some(entry) => (entry.clone(), false),
					None => {
						let entry = Arc::new(Mutex::new(Slot {
							value: value.clone(),
							pending: Some(serializer.clone()),
							detached: false,
						}));
						entries.insert(key.to_string(), entry.clone());
						(entry, true)
					}
				}
			};
			if inserted {
				self.track(key, &entry);
				return self.evict_if_needed();
			}
			let mut slot = lock(&entry);
			if slot.detached {
				// evicted or removed while we waited, retry against the map
				continue;
			}
			slot.value = value.clone();
			slot.pending = Some(serializer.clone());
			return Ok(());
		}
	}

	pub fn put_value<T: Serialize + Send + Sync + 'static>(
		&self,
		key: &str,
		value: T,
		cancel: &Cancellation,
	) -> Result<Arc<T>, StoreError> {
		let value = Arc::new(value);
		let captured = value.clone();
		let serializer: Serializer =
			Arc::new(move || bincode::serialize(&*captured).map_err(|e| e.to_string()));
		self.put(key, value.clone(), serializer, cancel)?;
		Ok(value)
	}

	/// Raw bytes for `key`, `Ok(None)` when the key does not exist.
	pub fn get(&self, key: &str, cancel: &Cancellation) -> Result<Option<Vec<u8>>, StoreError> {
		cancel.check()?;
		if let Some(entry) = self.entry(key) {
			let slot = lock(&entry);
			if let (false, Some(serializer)) = (slot.detached, &slot.pending) {
				return serializer()
					.map(Some)
					.map_err(|msg| StoreError::Serialize { key: key.to_string(), msg });
			}
		}
		Ok(self.backend.read(key)?)
	}

	/// Cache-only lookup. Never touches the backend or decodes bytes.
	pub fn try_get_cached<T: Any + Send + Sync>(&self, key: &str, cancel: &Cancellation) -> Option<Arc<T>> {
		if cancel.is_cancelled() {
			return None;
		}
		let entry = self.entry(key)?;
		let slot = lock(&entry);
		if slot.detached {
			return None;
		}
		slot.value.clone().downcast::<T>().ok()
	}

	/// Cached object for `key`, decoding and caching the stored bytes on a
	/// miss.
	pub fn get_value<T: DeserializeOwned + Send + Sync + 'static>(
		&self,
		key: &str,
		cancel: &Cancellation,
	) -> Result<Arc<T>, StoreError> {
		cancel.check()?;
		if let Some(entry) = self.entry(key) {
			let slot = lock(&entry);
			if !slot.detached {
				return slot
					.value
					.clone()
					.downcast::<T>()
					.map_err(|_| StoreError::TypeMismatch(key.to_string()));
			}
		}
		let bytes = self
			.backend
			.read(key)?
			.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
		let value: Arc<T> = Arc::new(bincode::deserialize(&bytes).map_err(|e| StoreError::Deserialize {
			key: key.to_string(),
			msg: e.to_string(),
		})?);

		let inserted = {
			let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
			if entries.contains_key(key) {
				None
			} else {
				let object: Object = value.clone();
				let entry = Arc::new(Mutex::new(Slot {
					value: object,
					pending: None,
					detached: false,
				}));
				entries.insert(key.to_string(), entry.clone());
				Some(entry)
			}
		};
		if let Some(entry) = inserted {
			self.track(key, &entry);
			self.evict_if_needed()?;
		}
		Ok(value)
	}

	pub fn remove(&self, key: &str, cancel: &Cancellation) -> Result<(), StoreError> {
		cancel.check()?;
		let removed = self
			.entries
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.remove(key);
		if let Some(entry) = removed {
			let mut slot = lock(&entry);
			slot.detached = true;
			slot.pending = None;
		}
		self.backend.delete(key)?;
		Ok(())
	}

	pub fn flush(&self) -> Result<(), StoreError> {
		let snapshot: Vec<(String, Entry)> = self
			.entries
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.iter()
			.map(|(k, e)| (k.clone(), e.clone()))
			.collect();
		let mut written = 0;
		for (key, entry) in snapshot {
			let mut slot = lock(&entry);
			if slot.detached {
				continue;
			}
			if let Some(serializer) = slot.pending.clone() {
				self.write_through(&key, &serializer)?;
				slot.pending = None;
				written += 1;
			}
		}
		self.backend.sync()?;
		debug!("flushed {} pending entries", written);
		Ok(())
	}

	fn write_through(&self, key: &str, serializer: &Serializer) -> Result<(), StoreError> {
		let bytes = serializer().map_err(|msg| StoreError::Serialize {
			key: key.to_string(),
			msg,
		})?;
		self.backend.write(key, &bytes)?;
		Ok(())
	}

	fn track(&self, key: &str, entry: &Entry) {
		let live = self.cached_len();
		let mut order = lock(&self.order);
		order.push_back((key.to_string(), Arc::downgrade(entry)));
		if order.len() > 2 * live + 16 {
			order.retain(|(_, slot)| slot.strong_count() > 0);
		}
	}

	fn evict_if_needed(&self) -> Result<(), StoreError> {
		while self.cached_len() > self.capacity {
			let (key, slot) = match lock(&self.order).pop_front() {
				Some(oldest) => oldest,
				None => return Ok(()),
			};
			if let Some(entry) = slot.upgrade() {
				self.write_back_entry(&key, entry)?;
			}
		}
		Ok(())
	}

	/// Drops the cached object for `key`, writing it to the backend first if
	/// it is still pending. Later reads decode the stored bytes.
	pub fn release(&self, key: &str, cancel: &Cancellation) -> Result<(), StoreError> {
		cancel.check()?;
		self.write_back(key)
	}

	fn write_back(&self, key: &str) -> Result<(), StoreError> {
		match self.entry(key) {
			Some(entry) => self.write_back_entry(key, entry),
			None => Ok(()),
		}
	}

	/// The entry leaves the map only after its bytes reached the backend, so
	/// a reader either finds the entry or finds the bytes.
	fn write_back_entry(&self, key: &str, entry: Entry) -> Result<(), StoreError> {
		let mut slot = lock(&entry);
		if slot.detached {
			return Ok(());
		}
		if let Some(serializer) = slot.pending.clone() {
			self.write_through(key, &serializer)?;
			slot.pending = None;
		}
		slot.detached = true;
		let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
		if entries.get(key).map_or(false, |current| Arc::ptr_eq(current, &entry)) {
			entries.remove(key);
		}
		Ok(())
	}
}
