//! Best-effort cache writes shared by the flow implementations.

// self
use crate::{
	auth::{TokenSet, UserIdentity},
	flows::Broker,
	obs,
};

/// Persists `token_set`; storage failures are logged and never reach the caller.
pub(crate) async fn store_best_effort(broker: &Broker, user: &UserIdentity, token_set: &TokenSet) {
	if let Err(err) = broker.cache.save(user, token_set).await {
		obs::cache_fallback("save", &broker.cache.key(user), &err);
	}
}

/// Drops the cached entry; storage failures are logged and never reach the caller.
pub(crate) async fn clear_best_effort(broker: &Broker, user: &UserIdentity) {
	if let Err(err) = broker.cache.clear(user).await {
		obs::cache_fallback("clear", &broker.cache.key(user), &err);
	}
}
