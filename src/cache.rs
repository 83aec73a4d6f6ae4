//! Per-user token cache layered over session-scoped key-value storage.
//!
//! [`TokenCache`] serializes one [`TokenSet`] per user per client registration into a
//! [`SessionStore`]. Reads treat every storage or decoding failure as a cache miss (the caller
//! falls back to interactive sign-in) and writes for one user are serialized so an older token
//! set can never replace a newer one.

pub mod file;
pub mod memory;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

// std
use std::hash::Hash;
// self
use crate::{
	_prelude::*,
	auth::{TokenSet, UserIdentity},
	obs,
};

/// Boxed future returned by [`SessionStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + 'a + Send>>;

/// Session-scoped key-value storage that backs the token cache.
///
/// Values are opaque byte blobs; [`TokenCache`] owns the encoding.
pub trait SessionStore
where
	Self: Send + Sync,
{
	/// Reads the blob stored under `key`, if present.
	fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

	/// Stores `blob` under `key`, replacing any previous value.
	fn write<'a>(&'a self, key: &'a str, blob: Vec<u8>) -> StoreFuture<'a, ()>;

	/// Removes the value stored under `key`. Removing a missing key succeeds.
	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`SessionStore`] implementations and cache encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CacheError {
	/// Cache entry could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Storage key unique to a user and a client application registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
	/// Client identifier of the application registration.
	pub client_id: String,
	/// User owning the cached tokens.
	pub user: UserIdentity,
}
impl CacheKey {
	/// Builds the key for `user` under `client_id`.
	pub fn new(client_id: impl Into<String>, user: UserIdentity) -> Self {
		Self { client_id: client_id.into(), user }
	}

	/// Flat storage key handed to the [`SessionStore`].
	pub fn storage_key(&self) -> String {
		format!("{}:{}:token_cache", self.client_id, self.user)
	}
}

/// Outcome of [`TokenCache::save`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
	/// The token set was written.
	Stored,
	/// A token set issued later is already cached; the write was skipped.
	KeptNewer,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
	client_id: String,
	user: UserIdentity,
	token_set: TokenSet,
}

/// Per-user token cache for one client application registration.
#[derive(Clone)]
pub struct TokenCache {
	store: Arc<dyn SessionStore>,
	client_id: String,
	write_guards: Arc<KeyedGuards<CacheKey>>,
}
impl TokenCache {
	/// Creates a cache scoped to `client_id` on top of `store`.
	pub fn new(store: Arc<dyn SessionStore>, client_id: impl Into<String>) -> Self {
		Self { store, client_id: client_id.into(), write_guards: Default::default() }
	}

	/// Client identifier all keys of this cache are scoped to.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Returns the key used for `user`.
	pub fn key(&self, user: &UserIdentity) -> CacheKey {
		CacheKey::new(self.client_id.clone(), user.clone())
	}

	/// Returns the cached token set, or `None` when absent, unreadable, or owned by another
	/// user/client.
	pub async fn load(&self, user: &UserIdentity) -> Option<TokenSet> {
		let key = self.key(user);

		match self.try_load(&key).await {
			Ok(found) => found,
			Err(err) => {
				obs::cache_fallback("load", &key, &err);

				None
			},
		}
	}

	/// Like [`load`](Self::load) but surfaces storage and decoding failures.
	pub async fn try_load(&self, key: &CacheKey) -> Result<Option<TokenSet>, CacheError> {
		let Some(blob) = self.store.read(&key.storage_key()).await? else {
			return Ok(None);
		};
		let entry: CacheEntry = serde_json::from_slice(&blob)
			.map_err(|e| CacheError::Serialization { message: e.to_string() })?;

		if entry.client_id != key.client_id || entry.user != key.user {
			return Err(CacheError::Serialization {
				message: format!("entry stored under {} belongs to another owner", key.storage_key()),
			});
		}

		Ok(Some(entry.token_set))
	}

	/// Persists `token_set` for `user`.
	///
	/// Writes for the same user are serialized; a set whose `issued_at` is earlier than the one
	/// already cached is discarded so a slow concurrent redemption cannot roll the cache back.
	pub async fn save(
		&self,
		user: &UserIdentity,
		token_set: &TokenSet,
	) -> Result<SaveOutcome, CacheError> {
		let key = self.key(user);

		self.write_guards.run(&key, self.save_locked(&key, token_set)).await
	}

	/// Removes the cached entry for `user` (sign-out or session end).
	pub async fn clear(&self, user: &UserIdentity) -> Result<(), CacheError> {
		let key = self.key(user);
		let storage_key = key.storage_key();

		self.write_guards.run(&key, self.store.remove(&storage_key)).await
	}

	async fn save_locked(
		&self,
		key: &CacheKey,
		token_set: &TokenSet,
	) -> Result<SaveOutcome, CacheError> {
		let newer_cached = matches!(
			self.try_load(key).await,
			Ok(Some(current)) if current.issued_at > token_set.issued_at
		);

		if newer_cached {
			return Ok(SaveOutcome::KeptNewer);
		}

		let entry = CacheEntry {
			client_id: key.client_id.clone(),
			user: key.user.clone(),
			token_set: token_set.clone(),
		};
		let blob = serde_json::to_vec(&entry)
			.map_err(|e| CacheError::Serialization { message: e.to_string() })?;

		self.store.write(&key.storage_key(), blob).await?;

		Ok(SaveOutcome::Stored)
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache").field("client_id", &self.client_id).finish()
	}
}

/// Per-key async mutexes; a key's entry is dropped once nobody holds or awaits it.
pub(crate) struct KeyedGuards<K>(Mutex<HashMap<K, Arc<AsyncMutex<()>>>>);
impl<K> KeyedGuards<K>
where
	K: Clone + Eq + Hash,
{
	/// Runs `fut` while holding the mutex for `key`.
	pub(crate) async fn run<F>(&self, key: &K, fut: F) -> F::Output
	where
		F: Future,
	{
		let guard = self
			.0
			.lock()
			.entry(key.clone())
			.or_insert_with(|| Arc::new(AsyncMutex::new(())))
			.clone();
		let output = {
			let _held = guard.lock().await;

			fut.await
		};
		let mut guards = self.0.lock();

		// Only the map and this caller reference the mutex, so no one is queued behind it.
		if Arc::strong_count(&guard) == 2 {
			guards.remove(key);
		}

		output
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.0.lock().len()
	}
}
impl<K> Default for KeyedGuards<K> {
	fn default() -> Self {
		Self(Mutex::new(HashMap::new()))
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::auth::ScopeSet;

	fn user(value: &str) -> UserIdentity {
		UserIdentity::new(value).expect("User fixture should be valid.")
	}

	fn token_set(access: &str, issued_at: OffsetDateTime) -> TokenSet {
		TokenSet::builder(ScopeSet::new(["Mail.Read"]).expect("Scope fixture should be valid."))
			.access_token(access)
			.refresh_token(format!("{access}-refresh"))
			.issued_at(issued_at)
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token set fixture should build.")
	}

	fn cache(client_id: &str) -> (TokenCache, Arc<MemorySessionStore>) {
		let store = Arc::new(MemorySessionStore::default());

		(TokenCache::new(store.clone(), client_id), store)
	}

	#[tokio::test]
	async fn save_then_load_round_trips() {
		let (cache, _) = cache("client-a");
		let u1 = user("u1");
		let set = token_set("tok1", macros::datetime!(2025-11-10 12:00 UTC));

		assert_eq!(
			cache.save(&u1, &set).await.expect("Saving into memory store should succeed."),
			SaveOutcome::Stored
		);
		assert_eq!(cache.load(&u1).await, Some(set));
		assert_eq!(cache.load(&user("u2")).await, None);
	}

	#[tokio::test]
	async fn corrupt_entries_read_as_misses() {
		let (cache, store) = cache("client-a");
		let u1 = user("u1");

		store
			.write(&cache.key(&u1).storage_key(), b"{not json".to_vec())
			.await
			.expect("Raw write should succeed.");

		assert_eq!(cache.load(&u1).await, None);

		let err = cache
			.try_load(&cache.key(&u1))
			.await
			.expect_err("Corrupt blob must fail to decode.");

		assert!(matches!(err, CacheError::Serialization { .. }));
	}

	#[tokio::test]
	async fn entries_are_isolated_per_client_registration() {
		let store = Arc::new(MemorySessionStore::default());
		let app_a = TokenCache::new(store.clone(), "client-a");
		let app_b = TokenCache::new(store.clone(), "client-b");
		let u1 = user("u1");

		app_a
			.save(&u1, &token_set("tok-a", macros::datetime!(2025-11-10 12:00 UTC)))
			.await
			.expect("Saving for client A should succeed.");

		assert!(app_a.load(&u1).await.is_some());
		assert_eq!(app_b.load(&u1).await, None);
	}

	#[tokio::test]
	async fn foreign_owner_entries_are_rejected() {
		let (cache, store) = cache("client-a");
		let u1 = user("u1");
		let u2 = user("u2");

		cache
			.save(&u2, &token_set("tok-u2", macros::datetime!(2025-11-10 12:00 UTC)))
			.await
			.expect("Saving for u2 should succeed.");

		let blob = store
			.read(&cache.key(&u2).storage_key())
			.await
			.expect("Raw read should succeed.")
			.expect("Blob for u2 should exist.");

		store.write(&cache.key(&u1).storage_key(), blob).await.expect("Raw write should succeed.");

		assert_eq!(cache.load(&u1).await, None);
	}

	#[tokio::test]
	async fn older_sets_never_replace_newer_ones() {
		let (cache, _) = cache("client-a");
		let u1 = user("u1");
		let newer = token_set("tok-new", macros::datetime!(2025-11-10 12:05 UTC));
		let older = token_set("tok-old", macros::datetime!(2025-11-10 12:00 UTC));

		cache.save(&u1, &newer).await.expect("Saving the newer set should succeed.");

		assert_eq!(
			cache.save(&u1, &older).await.expect("Saving the older set should not fail."),
			SaveOutcome::KeptNewer
		);
		assert_eq!(
			cache.load(&u1).await.map(|set| set.access_token.expose().to_owned()),
			Some("tok-new".into())
		);

		let replay = token_set("tok-new-2", newer.issued_at);

		assert_eq!(
			cache.save(&u1, &replay).await.expect("Equal issue times should overwrite."),
			SaveOutcome::Stored
		);
	}

	#[tokio::test]
	async fn clear_removes_the_entry() {
		let (cache, _) = cache("client-a");
		let u1 = user("u1");

		cache
			.save(&u1, &token_set("tok1", macros::datetime!(2025-11-10 12:00 UTC)))
			.await
			.expect("Saving should succeed.");
		cache.clear(&u1).await.expect("Clearing should succeed.");
		cache.clear(&u1).await.expect("Clearing twice should succeed.");

		assert_eq!(cache.load(&u1).await, None);
		assert_eq!(cache.write_guards.len(), 0);
	}

	#[tokio::test]
	async fn keyed_guards_serialize_and_release_their_entries() {
		let guards = KeyedGuards::<&str>::default();
		let order = Mutex::new(Vec::new());
		let step = |label: &'static str| {
			let order = &order;

			async move {
				order.lock().push(format!("{label}:start"));
				tokio::task::yield_now().await;
				order.lock().push(format!("{label}:end"));
			}
		};

		tokio::join!(guards.run(&"u1", step("a")), guards.run(&"u1", step("b")));

		assert_eq!(*order.lock(), ["a:start", "a:end", "b:start", "b:end"]);
		assert_eq!(guards.len(), 0);
	}

	#[test]
	fn cache_error_converts_into_broker_error_with_source() {
		let cache_error = CacheError::Backend { message: "session store unreachable".into() };
		let broker_error: Error = cache_error.clone().into();

		assert!(matches!(broker_error, Error::Cache(_)));
		assert!(broker_error.to_string().contains("session store unreachable"));

		let source = StdError::source(&broker_error)
			.expect("Broker error should expose the original cache error as its source.");

		assert_eq!(source.to_string(), cache_error.to_string());
	}
}
