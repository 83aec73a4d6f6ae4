//! Cached token set, lifecycle helpers, and its builder.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, token::secret::TokenSecret},
};

/// Current lifecycle status for a token set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Token is currently valid.
	Active,
	/// Token reached its expiry instant and must not be sent.
	Expired,
}

/// Errors produced by [`TokenSetBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenSetBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Tokens issued to one user by one client registration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
	/// Bearer token for API calls.
	pub access_token: TokenSecret,
	/// Refresh token, if the provider issued one (requires `offline_access` on most providers).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// OpenID Connect ID token, if returned.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<TokenSecret>,
	/// Instant the token endpoint answered.
	pub issued_at: OffsetDateTime,
	/// `issued_at` plus the provider-reported lifetime.
	pub expires_at: OffsetDateTime,
	/// Scopes the provider granted.
	pub granted_scopes: ScopeSet,
}
impl TokenSet {
	/// Returns a builder for the provided granted scopes.
	pub fn builder(granted_scopes: ScopeSet) -> TokenSetBuilder {
		TokenSetBuilder::new(granted_scopes)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> TokenStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the set has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Expired)
	}

	/// Returns `true` if the set is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		matches!(self.status(), TokenStatus::Expired)
	}

	/// Returns `true` when the access token must not be reused at `now`: it is expired, or it
	/// expires within `window`.
	pub fn needs_refresh(&self, now: OffsetDateTime, window: Duration) -> bool {
		if self.is_expired_at(now) {
			return true;
		}

		self.expires_at - now <= window
	}

	/// Time left before expiry, clamped at zero.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		let remaining = self.expires_at - now;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("granted_scopes", &self.granted_scopes)
			.finish()
	}
}

/// Builder for [`TokenSet`].
#[derive(Clone, Debug)]
pub struct TokenSetBuilder {
	granted_scopes: ScopeSet,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	id_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenSetBuilder {
	fn new(granted_scopes: ScopeSet) -> Self {
		Self {
			granted_scopes,
			access_token: None,
			refresh_token: None,
			id_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the ID token value.
	pub fn id_token(mut self, token: impl Into<String>) -> Self {
		self.id_token = Some(TokenSecret::new(token));

		self
	}

	/// Consumes the builder and produces a [`TokenSet`].
	pub fn build(self) -> Result<TokenSet, TokenSetBuilderError> {
		let access_token = self.access_token.ok_or(TokenSetBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenSetBuilderError::MissingExpiry),
		};

		Ok(TokenSet {
			access_token,
			refresh_token: self.refresh_token,
			id_token: self.id_token,
			issued_at,
			expires_at,
			granted_scopes: self.granted_scopes,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn mail_read() -> ScopeSet {
		ScopeSet::new(["Mail.Read"]).expect("Scope fixture should be valid for token set tests.")
	}

	#[test]
	fn status_transitions_follow_the_clock() {
		let set = TokenSet::builder(mail_read())
			.access_token("tok1")
			.refresh_token("refresh1")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Token set builder should succeed for status transitions.");

		assert_eq!(set.status_at(macros::datetime!(2024-12-31 23:59 UTC)), TokenStatus::Pending);
		assert_eq!(set.status_at(macros::datetime!(2025-01-01 00:30 UTC)), TokenStatus::Active);
		assert_eq!(set.status_at(macros::datetime!(2025-01-01 01:00 UTC)), TokenStatus::Expired);
	}

	#[test]
	fn builder_derives_expiry_from_lifetime() {
		let set = TokenSet::builder(mail_read())
			.access_token("tok1")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::seconds(3600))
			.build()
			.expect("Token set builder should support relative expiry.");

		assert_eq!(set.expires_at, macros::datetime!(2025-01-01 01:00 UTC));
		assert_eq!(
			TokenSet::builder(mail_read()).expires_in(Duration::minutes(1)).build(),
			Err(TokenSetBuilderError::MissingAccessToken)
		);
		assert_eq!(
			TokenSet::builder(mail_read()).access_token("tok1").build(),
			Err(TokenSetBuilderError::MissingExpiry)
		);
	}

	#[test]
	fn refresh_window_counts_as_unusable() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let set = TokenSet::builder(mail_read())
			.access_token("tok1")
			.issued_at(issued)
			.expires_in(Duration::minutes(10))
			.build()
			.expect("Token set builder should succeed.");

		assert!(!set.needs_refresh(issued + Duration::minutes(5), Duration::minutes(1)));
		assert!(set.needs_refresh(issued + Duration::minutes(9), Duration::minutes(1)));
		assert!(set.needs_refresh(issued + Duration::minutes(11), Duration::ZERO));
		assert_eq!(set.remaining_at(issued + Duration::minutes(11)), Duration::ZERO);
	}

	#[test]
	fn debug_output_redacts_every_secret() {
		let set = TokenSet::builder(mail_read())
			.access_token("tok1")
			.refresh_token("refresh1")
			.id_token("id1")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token set builder should succeed.");
		let rendered = format!("{set:?}");

		assert!(!rendered.contains("tok1"));
		assert!(!rendered.contains("refresh1"));
		assert!(!rendered.contains("id1"));
	}
}
