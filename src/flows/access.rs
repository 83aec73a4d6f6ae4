//! Cached token reuse with lazy refresh, batch execution, and sign-out.
//!
//! [`Broker::access_token`] hands out the cached access token while it is outside the refresh
//! window. Inside the window (or once expired) the refresh token is redeemed under the user's
//! singleflight guard, so concurrent callers trigger a single `grant_type=refresh_token` call.
//! A rejected refresh token clears the cache entry and reports that sign-in is required.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, UserIdentity},
	batch::{BatchEnvelope, BatchResult},
	endpoint::RefreshExchange,
	flows::{Broker, common},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl Broker {
	/// Returns a usable access token for `user`, refreshing it first when it is about to expire.
	pub async fn access_token(&self, user: &UserIdentity) -> Result<TokenSecret> {
		self.flow_guards.run(user, self.access_token_locked(user)).await
	}

	/// Sends `envelope` to the `$batch` endpoint with `user`'s access token.
	///
	/// Sub-request failures are part of the returned [`BatchResult`]; only outer failures
	/// (transport, timeout, non-2xx batch status, malformed body) are errors. Nothing is retried.
	pub async fn execute_batch(
		&self,
		user: &UserIdentity,
		envelope: &BatchEnvelope,
	) -> Result<BatchResult> {
		let access_token = self.access_token(user).await?;

		Ok(self.executor.execute(envelope, access_token.expose()).await?)
	}

	/// Clears `user`'s cached tokens and returns the provider logout URL, if it has one.
	///
	/// The logout URL carries `post_logout_redirect_uri` set to the registered redirect URI.
	pub async fn sign_out(&self, user: &UserIdentity) -> Option<Url> {
		self.flow_guards.run(user, common::clear_best_effort(self, user)).await;

		let mut logout = self.descriptor.endpoints.end_session.clone()?;

		logout
			.query_pairs_mut()
			.append_pair("post_logout_redirect_uri", self.redirect_uri.as_str());

		Some(logout)
	}

	async fn access_token_locked(&self, user: &UserIdentity) -> Result<TokenSecret> {
		let Some(current) = self.cache.load(user).await else {
			return Err(Error::ReauthorizationRequired { user: user.clone() });
		};

		if !current.needs_refresh(OffsetDateTime::now_utc(), self.refresh_window) {
			return Ok(current.access_token);
		}

		let Some(refresh_token) = current.refresh_token.clone() else {
			return Err(Error::ReauthorizationRequired { user: user.clone() });
		};

		self.refresh_locked(user, refresh_token, &current.granted_scopes).await
	}

	async fn refresh_locked(
		&self,
		user: &UserIdentity,
		refresh_token: TokenSecret,
		scope: &ScopeSet,
	) -> Result<TokenSecret> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "access_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let exchange = RefreshExchange { refresh_token: refresh_token.expose(), scope };

				match self.token_endpoint.refresh_token(exchange).await {
					Ok(mut fresh) => {
						// Providers that do not rotate refresh tokens keep the old one valid.
						if fresh.refresh_token.is_none() {
							fresh.refresh_token = Some(refresh_token.clone());
						}

						common::store_best_effort(self, user, &fresh).await;

						Ok(fresh.access_token)
					},
					Err(err) if err.requires_reauthorization() => {
						common::clear_best_effort(self, user).await;

						Err(Error::ReauthorizationRequired { user: user.clone() })
					},
					Err(err) => Err(Error::from(err)),
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}
