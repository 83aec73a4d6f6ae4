//! Authorization code redemption into the per-user token cache.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSet, UserIdentity},
	endpoint::CodeExchange,
	error::RedemptionError,
	flows::{Broker, common},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl Broker {
	/// Redeems `code` for `scopes` on behalf of `user` and caches the resulting token set.
	///
	/// On success the cache for `user` is written exactly once before the set is returned. On
	/// failure nothing is written and the provider's diagnostic is returned unchanged, so a
	/// consumed or expired code leaves a previously cached set untouched. Cache write failures
	/// are logged and do not fail the redemption.
	pub async fn redeem(
		&self,
		code: &str,
		scopes: &ScopeSet,
		user: &UserIdentity,
	) -> Result<TokenSet, RedemptionError> {
		let exchange =
			CodeExchange { code, scope: scopes, redirect_uri: &self.redirect_uri, pkce_verifier: None };

		self.redeem_exchange(user, exchange).await
	}

	pub(crate) async fn redeem_exchange(
		&self,
		user: &UserIdentity,
		exchange: CodeExchange<'_>,
	) -> Result<TokenSet, RedemptionError> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		let span = FlowSpan::new(KIND, "redeem");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(self.flow_guards.run(user, async move {
				let token_set = self.token_endpoint.exchange_code(exchange).await?;

				common::store_best_effort(self, user, &token_set).await;

				Ok(token_set)
			}))
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}
