//! Authorization sessions: `state` and PKCE generation plus the authorize URL.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	error::RedemptionError,
	flows::{AuthenticationFlow, Broker},
	provider::ProviderDescriptor,
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods surfaced via [`AuthorizationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Sign-in handshake metadata: what to send the user agent to and what must come back.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Scopes requested at sign-in.
	pub sign_in_scope: ScopeSet,
	/// Scopes requested when the returned code is redeemed.
	pub redeem_scope: ScopeSet,
	/// Opaque state value that must round-trip via the redirect.
	pub state: String,
	/// Redirect URI supplied when constructing the authorize URL.
	pub redirect_uri: Url,
	/// Authorize URL the user agent should be sent to.
	pub authorize_url: Url,
	pkce: PkcePair,
}
impl AuthorizationSession {
	/// Builds a session with a fresh `state` and PKCE pair.
	pub fn new(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		sign_in_scope: ScopeSet,
		redeem_scope: ScopeSet,
		redirect_uri: Url,
	) -> Self {
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let authorize_url =
			build_authorize_url(descriptor, client_id, &redirect_uri, &sign_in_scope, &state, &pkce);

		Self { sign_in_scope, redeem_scope, state, redirect_uri, authorize_url, pkce }
	}

	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE challenge method (currently always `S256`).
	pub fn code_challenge_method(&self) -> PkceCodeChallengeMethod {
		self.pkce.method
	}

	/// Validates the returned `state` parameter after the authorization redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<(), RedemptionError> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(RedemptionError::InvalidGrant { message: "Authorization state mismatch.".into() })
		}
	}

	pub(crate) fn pkce_verifier(&self) -> &str {
		&self.pkce.verifier
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("sign_in_scope", &self.sign_in_scope)
			.field("redeem_scope", &self.redeem_scope)
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("authorize_url", &self.authorize_url.as_str())
			.field("code_challenge", &self.pkce.challenge)
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

impl Broker {
	/// Starts sign-in with the configured sign-in and redemption scopes.
	pub fn start_authorization(&self) -> AuthenticationFlow {
		self.start_authorization_with(self.sign_in_scopes.clone(), self.redeem_scopes.clone())
	}

	/// Starts sign-in with explicit scopes.
	pub fn start_authorization_with(
		&self,
		sign_in_scope: ScopeSet,
		redeem_scope: ScopeSet,
	) -> AuthenticationFlow {
		let session = AuthorizationSession::new(
			&self.descriptor,
			&self.client_id,
			sign_in_scope,
			redeem_scope,
			self.redirect_uri.clone(),
		);

		AuthenticationFlow::new(session, self.error_path.clone())
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

fn build_authorize_url(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	redirect_uri: &Url,
	scope: &ScopeSet,
	state: &str,
	pkce: &PkcePair,
) -> Url {
	let mut url = descriptor.endpoints.authorization.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", client_id);
	pairs.append_pair("redirect_uri", redirect_uri.as_str());

	if let Some(scope_value) = descriptor.quirks.format_scope(scope) {
		pairs.append_pair("scope", &scope_value);
	}

	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", &pkce.challenge);
	pairs.append_pair("code_challenge_method", pkce.method.as_str());

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
