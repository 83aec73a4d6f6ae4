//! Token endpoint client used for authorization code redemption and refresh.
//!
//! [`TokenEndpointClient`] is the narrow seam flows depend on. The shipped implementation,
//! [`OAuth2TokenEndpoint`], drives the `oauth2` crate over any [`TokenHttpClient`] and converts
//! responses into [`TokenSet`] values, enforcing the token contract (positive `expires_in`,
//! granted scopes covering the requested ones).

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, EndpointNotSet,
	EndpointSet, ExtraTokenFields, HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken,
	RequestTokenError, StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRequestTokenError, BasicRevocationErrorResponse,
		BasicTokenIntrospectionResponse, BasicTokenType,
	},
};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, TokenSet},
	error::{ConfigError, RedemptionError, TokenContractError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderErrorContext, ProviderErrorKind,
		ProviderQuirks, ProviderStrategy,
	},
};

/// Boxed future returned by [`TokenEndpointClient`] operations.
pub type EndpointFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, RedemptionError>> + 'a + Send>>;

/// [`OAuth2TokenEndpoint`] specialized for the crate's reqwest transport.
pub type ReqwestTokenEndpoint = OAuth2TokenEndpoint<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Token response carrying the OpenID Connect `id_token` next to the standard fields.
pub type IdTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type UnconfiguredClient = Client<
	BasicErrorResponse,
	IdTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
>;
type ConfiguredClient = Client<
	BasicErrorResponse,
	IdTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

// Parameters the strategy hook must not override.
const RESERVED_PARAMS: [&str; 8] = [
	"client_id",
	"client_secret",
	"code",
	"code_verifier",
	"grant_type",
	"redirect_uri",
	"refresh_token",
	"scope",
];

/// Exchanges grants at a provider's token endpoint.
pub trait TokenEndpointClient
where
	Self: Send + Sync,
{
	/// Redeems an authorization code (`grant_type=authorization_code`).
	fn exchange_code<'a>(&'a self, request: CodeExchange<'a>) -> EndpointFuture<'a, TokenSet>;

	/// Redeems a refresh token (`grant_type=refresh_token`).
	///
	/// The returned set carries a refresh token only when the provider rotated it. Clients that
	/// cannot refresh keep the default, which reports the grant as unsupported.
	fn refresh_token<'a>(&'a self, request: RefreshExchange<'a>) -> EndpointFuture<'a, TokenSet> {
		let _ = request;

		Box::pin(async { Err(RedemptionError::Unsupported { grant: GrantType::RefreshToken }) })
	}
}

/// Parameters for an authorization code redemption.
#[derive(Clone, Copy)]
pub struct CodeExchange<'a> {
	/// Authorization code received on the redirect.
	pub code: &'a str,
	/// Scopes requested for the resulting access token.
	pub scope: &'a ScopeSet,
	/// Redirect URI registered for the client; must match the one used to start sign-in.
	pub redirect_uri: &'a Url,
	/// PKCE verifier, when the sign-in started with a challenge.
	pub pkce_verifier: Option<&'a str>,
}
impl Debug for CodeExchange<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CodeExchange")
			.field("code", &"<redacted>")
			.field("scope", self.scope)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("pkce_verifier_set", &self.pkce_verifier.is_some())
			.finish()
	}
}

/// Parameters for a refresh token redemption.
#[derive(Clone, Copy)]
pub struct RefreshExchange<'a> {
	/// Refresh token from the cached set.
	pub refresh_token: &'a str,
	/// Scopes to request; usually the scopes of the cached set.
	pub scope: &'a ScopeSet,
}
impl Debug for RefreshExchange<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshExchange")
			.field("refresh_token", &"<redacted>")
			.field("scope", self.scope)
			.finish()
	}
}

/// Extra token response fields read by the broker.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenFields {
	/// OpenID Connect ID token, when `openid` was requested.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
}
impl ExtraTokenFields for IdTokenFields {}
impl Debug for IdTokenFields {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdTokenFields")
			.field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Maps HTTP transport failures into [`RedemptionError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a redemption error.
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> RedemptionError;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> RedemptionError {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(strategy, grant, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_unknown_transport_error(meta),
		}
	}
}

/// `oauth2`-backed [`TokenEndpointClient`] for confidential and public clients.
pub struct OAuth2TokenEndpoint<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredClient,
	quirks: ProviderQuirks,
	strategy: Arc<dyn ProviderStrategy>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> OAuth2TokenEndpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a client for `descriptor`'s token endpoint.
	///
	/// The client secret is ignored when the descriptor prefers PKCE-only public clients.
	pub fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		strategy: Arc<dyn ProviderStrategy>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self, ConfigError> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let secret =
			if matches!(descriptor.preferred_client_auth_method, ClientAuthMethod::NoneWithPkce) {
				None
			} else {
				client_secret.map(|value| ClientSecret::new(value.to_owned()))
			};
		let mut oauth_client = UnconfiguredClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url);

		if let Some(secret) = secret {
			oauth_client = oauth_client.set_client_secret(secret);
		}
		if matches!(descriptor.preferred_client_auth_method, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Ok(Self {
			oauth_client,
			quirks: descriptor.quirks,
			strategy,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
		})
	}

	fn extra_params(&self, grant: GrantType) -> BTreeMap<String, String> {
		let mut form = BTreeMap::new();

		self.strategy.augment_token_request(grant, &mut form);
		form.retain(|key, _| !RESERVED_PARAMS.contains(&key.as_str()));

		form
	}
}
impl<C, M> TokenEndpointClient for OAuth2TokenEndpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_code<'a>(&'a self, request: CodeExchange<'a>) -> EndpointFuture<'a, TokenSet> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let grant = GrantType::AuthorizationCode;
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(request.redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
			let mut exchange = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(request.code.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url));

			if let Some(verifier) = request.pkce_verifier {
				exchange = exchange.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_owned()));
			}
			if let Some(scope) = self.quirks.format_scope(request.scope) {
				exchange = exchange.add_extra_param("scope", scope);
			}
			for (key, value) in self.extra_params(grant) {
				exchange = exchange.add_extra_param(key, value);
			}

			let response = exchange.request_async(&instrumented).await.map_err(|err| {
				map_request_error(
					self.strategy.as_ref(),
					grant,
					meta.take(),
					err,
					self.error_mapper.as_ref(),
				)
			})?;

			map_token_response(request.scope, &response, OffsetDateTime::now_utc())
		})
	}

	fn refresh_token<'a>(&'a self, request: RefreshExchange<'a>) -> EndpointFuture<'a, TokenSet> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let grant = GrantType::RefreshToken;
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(request.refresh_token.to_owned());
			let mut exchange = self.oauth_client.exchange_refresh_token(&refresh_secret);

			if let Some(scope) = self.quirks.format_scope(request.scope) {
				exchange = exchange.add_extra_param("scope", scope);
			}
			for (key, value) in self.extra_params(grant) {
				exchange = exchange.add_extra_param(key, value);
			}

			let response = exchange.request_async(&instrumented).await.map_err(|err| {
				map_request_error(
					self.strategy.as_ref(),
					grant,
					meta.take(),
					err,
					self.error_mapper.as_ref(),
				)
			})?;

			// A refresh may narrow the grant; only an omitted `scope` inherits the request.
			let mut set =
				map_token_response(&ScopeSet::default(), &response, OffsetDateTime::now_utc())?;

			if response.scopes().is_none() {
				set.granted_scopes = request.scope.clone();
			}

			Ok(set)
		})
	}
}
impl<C, M> Debug for OAuth2TokenEndpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2TokenEndpoint")
			.field("client_id", &self.oauth_client.client_id().as_str())
			.field("quirks", &self.quirks)
			.finish()
	}
}

/// Converts a successful token response into a [`TokenSet`] issued at `issued_at`.
///
/// When the provider lists scopes they become the granted set and must cover `requested`;
/// when it omits them the requested scopes are assumed granted.
pub fn map_token_response(
	requested: &ScopeSet,
	response: &IdTokenResponse,
	issued_at: OffsetDateTime,
) -> Result<TokenSet, RedemptionError> {
	let expires_in = response.expires_in().ok_or(TokenContractError::MissingExpiresIn)?.as_secs();
	let expires_in =
		i64::try_from(expires_in).map_err(|_| TokenContractError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(TokenContractError::NonPositiveExpiresIn.into());
	}

	let granted = match response.scopes() {
		Some(scopes) => {
			let returned = ScopeSet::new(scopes.iter().map(|scope| scope.as_str()))
				.map_err(TokenContractError::from)?;

			if !returned.is_superset_of(requested) {
				return Err(TokenContractError::ScopesNotGranted {
					missing: returned.missing_from(requested).join(" "),
				}
				.into());
			}

			returned
		},
		None => requested.clone(),
	};

	Ok(TokenSet {
		access_token: TokenSecret::new(response.access_token().secret().as_str()),
		refresh_token: response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().as_str())),
		id_token: response.extra_fields().id_token.as_deref().map(TokenSecret::new),
		issued_at,
		expires_at: issued_at
			.checked_add(Duration::seconds(expires_in))
			.ok_or(TokenContractError::ExpiresInOutOfRange)?,
		granted_scopes: granted,
	})
}

fn map_request_error<E, M>(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> RedemptionError
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, grant, response, meta_ref),
		RequestTokenError::Request(error) =>
			mapper.map_transport_error(strategy, grant, meta_ref, error),
		RequestTokenError::Parse(error, _body) =>
			RedemptionError::ResponseParse { source: error, status: meta_status(meta_ref) },
		RequestTokenError::Other(message) => RedemptionError::Provider {
			message: format!("Token endpoint returned an unexpected response: {message}."),
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		},
	}
}

fn map_server_response_error(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> RedemptionError {
	let code = response.error().as_ref().to_owned();
	let mut ctx = ProviderErrorContext::new(grant).with_oauth_error(code.clone());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	// The provider's own wording is kept verbatim for the error view.
	let message = response.error_description().cloned().unwrap_or(code);

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => RedemptionError::InvalidGrant { message },
		ProviderErrorKind::InvalidClient => RedemptionError::InvalidClient { message },
		ProviderErrorKind::InsufficientScope => RedemptionError::InsufficientScope { message },
		ProviderErrorKind::Transient => RedemptionError::Provider {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		},
	}
}

fn map_reqwest_error(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> RedemptionError {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return RedemptionError::Provider {
			message: "Request timed out while calling the token endpoint.".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		};
	}

	let ctx = ProviderErrorContext::network_failure(grant);

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::Transient => TransportError::from(err).into(),
		_ => RedemptionError::Provider {
			message: format!("Network error occurred while calling the token endpoint: {err}."),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		},
	}
}

fn map_generic_transport_error(
	meta: Option<&ResponseMetadata>,
	message: impl Display,
) -> RedemptionError {
	RedemptionError::Provider {
		message: format!("HTTP client error occurred while calling the token endpoint: {message}."),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
}

fn map_unknown_transport_error(meta: Option<&ResponseMetadata>) -> RedemptionError {
	RedemptionError::Provider {
		message: "HTTP client error occurred while calling the token endpoint.".into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
