use crate::error::StoreError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and the work it
/// started. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
	pub fn new() -> Cancellation {
		Cancellation::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}

	pub fn check(&self) -> Result<(), StoreError> {
		if self.is_cancelled() {
			Err(StoreError::Cancelled)
		} else {
			Ok(())
		}
	}
}
