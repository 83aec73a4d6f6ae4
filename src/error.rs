//! Broker-level error types shared across flows, the token cache, and the batch layer.

// self
use crate::{_prelude::*, auth::UserIdentity, provider::GrantType};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Authorization code or refresh token redemption failed.
	#[error(transparent)]
	Redemption(#[from] RedemptionError),
	/// Token cache failure. Flows log and swallow these; only direct cache callers see them.
	#[error("{0}")]
	Cache(
		#[from]
		#[source]
		crate::cache::CacheError,
	),
	/// Batch envelope could not be constructed.
	#[error(transparent)]
	BatchBuild(#[from] crate::batch::BatchBuildError),
	/// Outer batch request failed.
	#[error(transparent)]
	Execution(#[from] crate::batch::ExecutionError),

	/// No usable token is cached and none could be refreshed.
	#[error("No usable token is cached for {user}; interactive sign-in is required.")]
	ReauthorizationRequired {
		/// User whose cache entry is missing or unusable.
		user: UserIdentity,
	},
	/// Authentication flow received an event that is invalid for its current state.
	#[error("Authentication flow cannot handle `{event}` while {state}.")]
	InvalidTransition {
		/// Label of the state the flow was in.
		state: &'static str,
		/// Label of the rejected event.
		event: &'static str,
	},
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Required setting is absent.
	#[error("Required setting `{name}` is missing.")]
	MissingSetting {
		/// Setting name (environment variable or field).
		name: &'static str,
	},
	/// Setting is present but unusable.
	#[error("Setting `{name}` is invalid: {reason}.")]
	InvalidSetting {
		/// Setting name (environment variable or field).
		name: &'static str,
		/// Human-readable reason.
		reason: String,
	},
	/// Scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// OpenID discovery document could not be fetched or parsed.
	#[error("OpenID discovery failed: {message}.")]
	Discovery {
		/// Human-readable failure summary.
		message: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Token endpoint failures surfaced by authorization-code redemption and refresh.
///
/// Provider-originated variants display the provider's diagnostic text verbatim so the
/// authentication flow can forward it without re-wording.
#[derive(Debug, ThisError)]
pub enum RedemptionError {
	/// Provider rejected the grant (consumed/expired code, bad refresh token, denied consent).
	#[error("{message}")]
	InvalidGrant {
		/// Provider-supplied diagnostic.
		message: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("{message}")]
	InvalidClient {
		/// Provider-supplied diagnostic.
		message: String,
	},
	/// Requested scopes exceed what the provider will grant.
	#[error("{message}")]
	InsufficientScope {
		/// Provider- or broker-supplied diagnostic.
		message: String,
	},
	/// Temporary upstream failure; callers may retry with backoff.
	#[error("{message}")]
	Provider {
		/// Provider- or broker-supplied diagnostic.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with JSON that does not match the token contract.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token response parsed but violates the token contract.
	#[error(transparent)]
	Contract(#[from] TokenContractError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Local configuration prevented the request from being sent.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// The token endpoint client does not implement the grant.
	#[error("The {grant} grant is not supported by this token endpoint client.")]
	Unsupported {
		/// Grant that was requested.
		grant: GrantType,
	},
}
impl RedemptionError {
	/// Returns `true` when the failure means the user must sign in again.
	pub fn requires_reauthorization(&self) -> bool {
		matches!(self, Self::InvalidGrant { .. })
	}
}

/// Shape violations detected in an otherwise successful token response.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenContractError {
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Provider granted fewer scopes than requested.
	#[error("Token endpoint did not grant the requested scopes: {missing}.")]
	ScopesNotGranted {
		/// Space-delimited list of scopes that were requested but not granted.
		missing: String,
	},
	/// Returned scope list could not be normalized.
	#[error("Token endpoint returned an invalid scope list.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Endpoint label (`token endpoint`, `batch endpoint`).
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a token endpoint network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { target: "the token endpoint", source: Box::new(src) }
	}

	/// Wraps a batch endpoint network error.
	pub fn batch_network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { target: "the batch endpoint", source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
