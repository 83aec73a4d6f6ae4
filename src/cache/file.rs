//! File-backed [`SessionStore`] that survives process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	cache::{CacheError, SessionStore, StoreFuture},
};

/// Persists session blobs to a JSON snapshot after each mutation.
///
/// Blobs are base64-encoded inside the snapshot; the snapshot is replaced atomically via a
/// temporary file and rename.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
	path: PathBuf,
	inner: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}
impl FileSessionStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist_locked(&self, contents: &BTreeMap<String, Vec<u8>>) -> Result<(), CacheError> {
		ensure_parent_exists(&self.path)?;

		let snapshot: BTreeMap<&str, String> =
			contents.iter().map(|(key, blob)| (key.as_str(), STANDARD.encode(blob))).collect();
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| CacheError::Serialization {
				message: format!("Failed to serialize session snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| CacheError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| CacheError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| CacheError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| CacheError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl SessionStore for FileSessionStore {
	fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn write<'a>(&'a self, key: &'a str, blob: Vec<u8>) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let mut next = guard.clone();

			next.insert(key.to_owned(), blob);
			self.persist_locked(&next)?;
			*guard = next;

			Ok(())
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			if guard.contains_key(key) {
				let mut next = guard.clone();

				next.remove(key);
				self.persist_locked(&next)?;
				*guard = next;
			}

			Ok(())
		})
	}
}

fn load_snapshot(path: &Path) -> Result<BTreeMap<String, Vec<u8>>, CacheError> {
	if !path.exists() {
		return Ok(BTreeMap::new());
	}

	let bytes = fs::read(path).map_err(|e| CacheError::Backend {
		message: format!("Failed to read {}: {e}", path.display()),
	})?;

	if bytes.is_empty() {
		return Ok(BTreeMap::new());
	}

	let encoded: BTreeMap<String, String> =
		serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})?;

	encoded
		.into_iter()
		.map(|(key, value)| {
			STANDARD.decode(value.as_bytes()).map(|blob| (key, blob)).map_err(|e| {
				CacheError::Serialization {
					message: format!("Failed to decode entry in {}: {e}", path.display()),
				}
			})
		})
		.collect()
}

fn ensure_parent_exists(path: &Path) -> Result<(), CacheError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| CacheError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::{
		auth::{ScopeSet, TokenSet, UserIdentity},
		cache::TokenCache,
	};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"oauth2_batch_broker_session_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn token_cache_survives_reopen() {
		let path = temp_path();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let user = UserIdentity::new("u1").expect("User fixture should be valid.");
		let set = TokenSet::builder(ScopeSet::new(["Mail.Read"]).expect("Scope should be valid."))
			.access_token("tok1")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token set fixture should build.");

		{
			let store = FileSessionStore::open(&path).expect("Failed to open session snapshot.");
			let cache = TokenCache::new(Arc::new(store), "client-file");

			rt.block_on(cache.save(&user, &set)).expect("Failed to save token set to file store.");
		}

		let reopened = FileSessionStore::open(&path).expect("Failed to reopen session snapshot.");
		let cache = TokenCache::new(Arc::new(reopened), "client-file");
		let loaded = rt.block_on(cache.load(&user)).expect("File store lost entry after reopen.");

		assert_eq!(loaded.access_token.expose(), "tok1");

		rt.block_on(cache.clear(&user)).expect("Failed to clear entry from file store.");

		let reopened = FileSessionStore::open(&path).expect("Failed to reopen after clear.");

		let blob = rt
			.block_on(reopened.read("client-file:u1:token_cache"))
			.expect("Reading the reopened store should succeed.");

		assert!(blob.is_none());

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary session snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn failed_persist_leaves_the_store_unchanged() {
		let path = temp_path();
		let blocker = path.with_extension("tmp");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let store = FileSessionStore::open(&path).expect("Failed to open session snapshot.");

		rt.block_on(store.write("kept", b"v1".to_vec())).expect("Initial write should persist.");
		// A directory where the temporary snapshot goes makes every persist fail.
		fs::create_dir(&blocker).expect("Failed to create the blocking directory.");

		let err = rt
			.block_on(store.write("lost", b"v2".to_vec()))
			.expect_err("Write must fail when the snapshot cannot be written.");

		assert!(matches!(err, CacheError::Backend { .. }));
		assert_eq!(rt.block_on(store.read("lost")).expect("Read should succeed."), None);

		rt.block_on(store.remove("kept")).expect_err("Remove must fail while persisting fails.");

		assert_eq!(
			rt.block_on(store.read("kept")).expect("Read should succeed."),
			Some(b"v1".to_vec())
		);

		fs::remove_dir(&blocker).expect("Failed to remove the blocking directory.");
		rt.block_on(store.write("lost", b"v2".to_vec())).expect("Write should persist again.");

		let reopened = FileSessionStore::open(&path).expect("Failed to reopen session snapshot.");

		assert_eq!(
			rt.block_on(reopened.read("lost")).expect("Read should succeed."),
			Some(b"v2".to_vec())
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary session snapshot {}: {e}", path.display())
		});
	}
}
