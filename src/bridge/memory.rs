//! In-process [`RedirectStorage`] for tests and server-side redirects.

// self
use crate::{
	_prelude::*,
	bridge::{RedirectStorage, StorageFuture},
};

type EntryMap = Arc<RwLock<HashMap<String, String>>>;

/// Storage backend that keeps entries in memory; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage(EntryMap);
impl MemoryStorage {
	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns true when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl RedirectStorage for MemoryStorage {
	fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.0.read().get(key).cloned()) })
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().insert(key.to_owned(), value);

			Ok(())
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().remove(key);

			Ok(())
		})
	}
}
