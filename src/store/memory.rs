use crate::store::Backend;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

/// Process-local backend. Clones share the same map, so a second `Store`
/// over a clone sees everything the first one flushed.
#[derive(Clone, Default)]
pub struct MemoryBackend {
	blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
	pub fn new() -> MemoryBackend {
		MemoryBackend::default()
	}

	pub fn len(&self) -> usize {
		self.blobs.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self
			.blobs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.keys()
			.cloned()
			.collect();
		keys.sort();
		keys
	}

	pub fn read_raw(&self, key: &str) -> Option<Vec<u8>> {
		self.blobs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.get(key)
			.cloned()
	}
}

impl Backend for MemoryBackend {
	fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
		Ok(self.read_raw(key))
	}

	fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
		self.blobs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.insert(key.to_string(), bytes.to_vec());
		Ok(())
	}

	fn delete(&self, key: &str) -> io::Result<()> {
		self.blobs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.remove(key);
		Ok(())
	}
}
