//! Thread-safe in-memory [`SessionStore`] for single-process deployments and tests.

// self
use crate::{
	_prelude::*,
	cache::{SessionStore, StoreFuture},
};

type BlobMap = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// Process-local session storage. Entries live as long as the store handle.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore(BlobMap);
impl MemorySessionStore {
	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl SessionStore for MemorySessionStore {
	fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(key).cloned()) })
	}

	fn write<'a>(&'a self, key: &'a str, blob: Vec<u8>) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(key.to_owned(), blob);

			Ok(())
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().remove(key);

			Ok(())
		})
	}
}
