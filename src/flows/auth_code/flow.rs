//! Sign-in state machine driven by the authorization redirect.
//!
//! ```text
//! AwaitingRedirect --redirect with code--> CodeReceived --redeem ok--> TokenRedeemed
//!        |                                      |
//!        +--provider error / failure-----> Failed <--redeem error------+
//! ```
//!
//! A failed flow yields exactly one [`ErrorRedirect`]; the host marks the failure handled by
//! taking it and must not run its default error handling afterwards.

// crates.io
use url::form_urlencoded::{self, Parse};
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenSet, UserIdentity},
	endpoint::CodeExchange,
	flows::{AuthorizationSession, Broker, ErrorRedirect},
};

const MISSING_CODE: &str = "Authorization response did not include a code.";

/// Parameters delivered to the redirect URI.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResponse {
	/// Authorization code, on success.
	pub code: Option<TokenSecret>,
	/// Echoed `state` value.
	pub state: Option<String>,
	/// OAuth error code, on failure.
	pub error: Option<String>,
	/// Human-readable provider diagnostic accompanying `error`.
	pub error_description: Option<String>,
}
impl AuthorizationResponse {
	/// Parses a redirect query string or `form_post` body (`application/x-www-form-urlencoded`).
	pub fn from_query(query: &str) -> Self {
		Self::from_pairs(form_urlencoded::parse(query.trim_start_matches('?').as_bytes()))
	}

	/// Parses the query of the URL the user agent was redirected to.
	pub fn from_redirect_url(url: &Url) -> Self {
		Self::from_pairs(url.query_pairs())
	}

	fn from_pairs(pairs: Parse<'_>) -> Self {
		let mut response = Self::default();

		for (key, value) in pairs {
			let value = value.into_owned();

			match key.as_ref() {
				"code" => response.code = Some(TokenSecret::new(value)),
				"state" => response.state = Some(value),
				"error" => response.error = Some(value),
				"error_description" => response.error_description = Some(value),
				_ => {},
			}
		}

		response
	}
}
impl Debug for AuthorizationResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationResponse")
			.field("code", &self.code)
			.field("state", &self.state)
			.field("error", &self.error)
			.field("error_description", &self.error_description)
			.finish()
	}
}

/// Failure recorded by a flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowFailure {
	/// Diagnostic text, as reported by the provider or the broker.
	pub message: String,
	handled: bool,
}
impl FlowFailure {
	fn new(message: impl Into<String>) -> Self {
		Self { message: message.into(), handled: false }
	}

	/// Returns `true` once the error redirect has been taken.
	pub fn is_handled(&self) -> bool {
		self.handled
	}
}

/// States of an [`AuthenticationFlow`].
#[derive(Clone, Debug)]
pub enum FlowState {
	/// Waiting for the provider to redirect back.
	AwaitingRedirect,
	/// A code arrived and awaits redemption.
	CodeReceived {
		/// Signed-in user the code belongs to.
		user: UserIdentity,
		/// Authorization code.
		code: TokenSecret,
	},
	/// Tokens were redeemed and cached.
	TokenRedeemed {
		/// Signed-in user.
		user: UserIdentity,
		/// Redeemed token set.
		token_set: TokenSet,
	},
	/// The sign-in failed.
	Failed(FlowFailure),
}
impl FlowState {
	/// Stable label used in transition errors.
	pub fn label(&self) -> &'static str {
		match self {
			Self::AwaitingRedirect => "awaiting redirect",
			Self::CodeReceived { .. } => "code received",
			Self::TokenRedeemed { .. } => "token redeemed",
			Self::Failed(_) => "failed",
		}
	}

	/// Returns `true` for states no event can leave.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::TokenRedeemed { .. } | Self::Failed(_))
	}
}

/// One sign-in attempt, from authorize redirect to cached tokens or an error redirect.
#[derive(Debug)]
pub struct AuthenticationFlow {
	session: AuthorizationSession,
	error_path: String,
	state: FlowState,
}
impl AuthenticationFlow {
	/// Wraps `session`; failures redirect to `error_path`.
	pub fn new(session: AuthorizationSession, error_path: impl Into<String>) -> Self {
		Self { session, error_path: error_path.into(), state: FlowState::AwaitingRedirect }
	}

	/// Session whose authorize URL starts the sign-in.
	pub fn session(&self) -> &AuthorizationSession {
		&self.session
	}

	/// Authorize URL the user agent should be sent to.
	pub fn authorize_url(&self) -> &Url {
		&self.session.authorize_url
	}

	/// Current state.
	pub fn state(&self) -> &FlowState {
		&self.state
	}

	/// Handles the provider redirect for `user`.
	///
	/// A provider error, a `state` mismatch, or a missing code moves the flow to
	/// [`FlowState::Failed`]; otherwise the code is held for [`redeem`](Self::redeem).
	pub fn receive(
		&mut self,
		response: AuthorizationResponse,
		user: UserIdentity,
	) -> Result<&FlowState> {
		self.expect_awaiting("redirect")?;

		self.state = match response {
			AuthorizationResponse { error: Some(error), error_description, .. } =>
				FlowState::Failed(FlowFailure::new(error_description.unwrap_or(error))),
			AuthorizationResponse { state, code, .. } => {
				let returned = state.unwrap_or_default();

				match (self.session.validate_state(&returned), code) {
					(Err(err), _) => FlowState::Failed(FlowFailure::new(err.to_string())),
					(Ok(()), None) => FlowState::Failed(FlowFailure::new(MISSING_CODE)),
					(Ok(()), Some(code)) => FlowState::CodeReceived { user, code },
				}
			},
		};

		Ok(&self.state)
	}

	/// Records a failure reported by the hosting middleware before any code arrived.
	pub fn fail(&mut self, message: impl Into<String>) -> Result<&FlowState> {
		self.expect_awaiting("failure")?;

		self.state = FlowState::Failed(FlowFailure::new(message));

		Ok(&self.state)
	}

	/// Redeems the received code through `broker` and caches the tokens.
	///
	/// On failure the flow moves to [`FlowState::Failed`] carrying the provider's diagnostic
	/// and the redemption error is returned.
	pub async fn redeem(&mut self, broker: &Broker) -> Result<&FlowState> {
		let (user, code) = match std::mem::replace(&mut self.state, FlowState::AwaitingRedirect) {
			FlowState::CodeReceived { user, code } => (user, code),
			other => {
				let state = other.label();

				self.state = other;

				return Err(Error::InvalidTransition { state, event: "redeem" });
			},
		};
		let exchange = CodeExchange {
			code: code.expose(),
			scope: &self.session.redeem_scope,
			redirect_uri: &self.session.redirect_uri,
			pkce_verifier: Some(self.session.pkce_verifier()),
		};

		match broker.redeem_exchange(&user, exchange).await {
			Ok(token_set) => {
				self.state = FlowState::TokenRedeemed { user, token_set };

				Ok(&self.state)
			},
			Err(err) => {
				self.state = FlowState::Failed(FlowFailure::new(err.to_string()));

				Err(err.into())
			},
		}
	}

	/// Takes the error redirect of a failed flow. Returns `None` when the flow has not failed
	/// or the redirect was already taken.
	pub fn take_error_redirect(&mut self) -> Option<ErrorRedirect> {
		match &mut self.state {
			FlowState::Failed(failure) if !failure.handled => {
				failure.handled = true;

				Some(ErrorRedirect::new(&self.error_path, &failure.message))
			},
			_ => None,
		}
	}

	/// User and token set of a completed sign-in.
	pub fn into_token_set(self) -> Option<(UserIdentity, TokenSet)> {
		match self.state {
			FlowState::TokenRedeemed { user, token_set } => Some((user, token_set)),
			_ => None,
		}
	}

	fn expect_awaiting(&self, event: &'static str) -> Result<()> {
		match self.state {
			FlowState::AwaitingRedirect => Ok(()),
			_ => Err(Error::InvalidTransition { state: self.state.label(), event }),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::{ProviderId, ScopeSet},
		provider::ProviderDescriptor,
	};

	fn flow() -> AuthenticationFlow {
		let descriptor = ProviderDescriptor::builder(
			ProviderId::new("aad").expect("Provider fixture should be valid."),
		)
		.authorization_endpoint(
			Url::parse("https://login.example.com/authorize").expect("URL fixture should parse."),
		)
		.token_endpoint(
			Url::parse("https://login.example.com/token").expect("URL fixture should parse."),
		)
		.build()
		.expect("Descriptor fixture should build.");
		let scope = ScopeSet::new(["Mail.Read"]).expect("Scope fixture should be valid.");
		let session = AuthorizationSession::new(
			&descriptor,
			"client-a",
			scope.clone(),
			scope,
			Url::parse("https://localhost:44300/").expect("Redirect fixture should parse."),
		);

		AuthenticationFlow::new(session, "/Error")
	}

	fn user() -> UserIdentity {
		UserIdentity::new("u1").expect("User fixture should be valid.")
	}

	#[test]
	fn redirect_with_code_and_state_is_accepted() {
		let mut flow = flow();
		let query = format!("?code=abc123&state={}&session_state=x", flow.session().state);
		let state = flow
			.receive(AuthorizationResponse::from_query(&query), user())
			.expect("Awaiting flow should accept the redirect.");

		assert!(matches!(state, FlowState::CodeReceived { code, .. } if code.expose() == "abc123"));
		assert!(flow.take_error_redirect().is_none());
	}

	#[test]
	fn provider_errors_redirect_once() {
		let mut flow = flow();
		let url = Url::parse(
			"https://localhost:44300/?error=access_denied&error_description=AADSTS65004%3A+User+declined+to+consent.",
		)
		.expect("Redirect URL should parse.");

		flow.receive(AuthorizationResponse::from_redirect_url(&url), user())
			.expect("Awaiting flow should accept the redirect.");

		let redirect = flow.take_error_redirect().expect("Failed flow should redirect.");

		assert_eq!(redirect.message, "AADSTS65004: User declined to consent.");
		assert_eq!(redirect.location, "/Error?message=AADSTS65004%3A+User+declined+to+consent.");
		assert!(flow.take_error_redirect().is_none(), "Failure must be handled once.");
		assert!(matches!(flow.state(), FlowState::Failed(failure) if failure.is_handled()));
	}

	#[test]
	fn state_mismatch_and_missing_code_fail() {
		let mut mismatched = flow();

		mismatched
			.receive(AuthorizationResponse::from_query("code=abc123&state=forged"), user())
			.expect("Awaiting flow should accept the redirect.");

		assert_eq!(
			mismatched.take_error_redirect().map(|redirect| redirect.message),
			Some("Authorization state mismatch.".into())
		);

		let mut codeless = flow();
		let query = format!("state={}", codeless.session().state);

		codeless
			.receive(AuthorizationResponse::from_query(&query), user())
			.expect("Awaiting flow should accept the redirect.");

		assert_eq!(
			codeless.take_error_redirect().map(|redirect| redirect.message),
			Some(MISSING_CODE.into())
		);
	}

	#[test]
	fn events_outside_their_state_are_rejected() {
		let mut flow = flow();

		flow.fail("Correlation failed.").expect("Awaiting flow should accept a failure.");

		let err = flow
			.receive(AuthorizationResponse::from_query("code=abc123"), user())
			.expect_err("Failed flow must reject redirects.");

		assert!(matches!(err, Error::InvalidTransition { state: "failed", event: "redirect" }));
		assert!(flow.state().is_terminal());
		assert!(flow.into_token_set().is_none());
	}

	#[test]
	fn debug_output_hides_the_code() {
		let response = AuthorizationResponse::from_query("code=abc123&state=s");

		assert!(!format!("{response:?}").contains("abc123"));
	}
}
