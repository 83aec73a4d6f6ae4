//! High-level flows powered by the broker facade.

pub mod auth_code;

mod access;
mod common;
mod redeem;

pub use auth_code::*;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, UserIdentity},
	batch::BatchExecutor,
	cache::{KeyedGuards, SessionStore, TokenCache},
	config::BrokerConfig,
	endpoint::{ReqwestTokenEndpoint, ReqwestTransportErrorMapper, TokenEndpointClient},
	error::ConfigError,
	http::ReqwestHttpClient,
	provider::{self, DefaultProviderStrategy, ProviderDescriptor},
};

/// Coordinates sign-in, code redemption, token reuse, and batch execution for one client
/// registration against one provider.
///
/// The broker owns the token endpoint client, the per-user [`TokenCache`], and the
/// [`BatchExecutor`], so callers only deal with users, codes, and envelopes. All operations for
/// one user are serialized through a singleflight guard; different users proceed concurrently.
#[derive(Clone)]
pub struct Broker {
	/// Provider descriptor that defines the authorization, token, and end-session endpoints.
	pub descriptor: ProviderDescriptor,
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Redirect URI registered for the client.
	pub redirect_uri: Url,
	/// Scopes requested when sign-in starts.
	pub sign_in_scopes: ScopeSet,
	/// Scopes requested when the authorization code is redeemed.
	pub redeem_scopes: ScopeSet,
	/// Local path of the error view.
	pub error_path: String,
	/// Access tokens expiring within this window are refreshed before use.
	pub refresh_window: Duration,
	token_endpoint: Arc<dyn TokenEndpointClient>,
	cache: TokenCache,
	executor: BatchExecutor,
	flow_guards: Arc<KeyedGuards<UserIdentity>>,
}
impl Broker {
	/// Creates a broker with a reqwest transport configured from `config`.
	pub fn new(
		config: &BrokerConfig,
		descriptor: ProviderDescriptor,
		store: Arc<dyn SessionStore>,
	) -> Result<Self, ConfigError> {
		let http_client = ReqwestHttpClient::with_timeout(config.http_timeout())?;

		Self::with_http_client(config, descriptor, store, http_client)
	}

	/// Creates a broker that reuses the caller-provided reqwest client.
	pub fn with_http_client(
		config: &BrokerConfig,
		descriptor: ProviderDescriptor,
		store: Arc<dyn SessionStore>,
		http_client: ReqwestHttpClient,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let token_endpoint = ReqwestTokenEndpoint::from_descriptor(
			&descriptor,
			&config.client_id,
			Some(config.client_secret.expose()),
			Arc::new(DefaultProviderStrategy),
			http_client.clone(),
			ReqwestTransportErrorMapper,
		)?;
		let executor = BatchExecutor::new(http_client, &config.batch_base_url)?;

		Ok(Self {
			descriptor,
			client_id: config.client_id.clone(),
			redirect_uri: config.redirect_uri.clone(),
			sign_in_scopes: config.scopes.clone(),
			redeem_scopes: config.redeem_scopes.clone(),
			error_path: config.error_path.clone(),
			refresh_window: config.refresh_window(),
			token_endpoint: Arc::new(token_endpoint),
			cache: TokenCache::new(store, config.client_id.clone()),
			executor,
			flow_guards: Default::default(),
		})
	}

	/// Resolves the provider through OpenID discovery on the configured authority, then
	/// builds the broker.
	pub async fn discover(config: &BrokerConfig, store: Arc<dyn SessionStore>) -> Result<Self> {
		let http_client = ReqwestHttpClient::with_timeout(config.http_timeout())?;

		Self::discover_with_http_client(config, store, http_client).await
	}

	/// Same as [`Broker::discover`], but fetches the metadata and later talks to the token and
	/// batch endpoints through the caller-provided reqwest client.
	pub async fn discover_with_http_client(
		config: &BrokerConfig,
		store: Arc<dyn SessionStore>,
		http_client: ReqwestHttpClient,
	) -> Result<Self> {
		config.validate()?;

		let authority = config.authority()?;
		let provider_id = crate::auth::ProviderId::new(authority.host_str().unwrap_or("authority"))
			.map_err(ConfigError::from)?;
		let descriptor = provider::discover(&http_client, provider_id, &authority).await?;

		Ok(Self::with_http_client(config, descriptor, store, http_client)?)
	}

	/// Replaces the token endpoint client, e.g. with a custom transport or a test double.
	pub fn with_token_endpoint(mut self, token_endpoint: Arc<dyn TokenEndpointClient>) -> Self {
		self.token_endpoint = token_endpoint;

		self
	}

	/// Replaces the batch executor.
	pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
		self.executor = executor;

		self
	}

	/// Token cache used by this broker.
	pub fn cache(&self) -> &TokenCache {
		&self.cache
	}

	/// Batch executor used by this broker.
	pub fn executor(&self) -> &BatchExecutor {
		&self.executor
	}
}
impl Debug for Broker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("descriptor", &self.descriptor)
			.field("client_id", &self.client_id)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("sign_in_scopes", &self.sign_in_scopes)
			.field("redeem_scopes", &self.redeem_scopes)
			.field("error_path", &self.error_path)
			.field("refresh_window", &self.refresh_window)
			.field("batch_endpoint", &self.executor.endpoint().as_str())
			.finish()
	}
}
