#![allow(dead_code)]

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
// self
use oauth2_batch_broker::{
	auth::{ProviderId, ScopeSet, TokenSecret, TokenSet, UserIdentity},
	cache::MemorySessionStore,
	config::BrokerConfig,
	flows::Broker,
	http::ReqwestHttpClient,
	provider::{ClientAuthMethod, ProviderDescriptor},
	reqwest,
	url::Url,
};

pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const CLIENT_SECRET: &str = "client-secret";
pub const REDIRECT_URI: &str = "https://localhost:44300/";

pub fn config(server: &MockServer) -> BrokerConfig {
	let aad_instance = server.url("/{0}{1}");
	let batch_base_url = server.url("/v1.0/");

	BrokerConfig::from_lookup(move |name| match name {
		"IDA_CLIENT_ID" => Some(CLIENT_ID.into()),
		"IDA_CLIENT_SECRET" => Some(CLIENT_SECRET.into()),
		"IDA_REDIRECT_URI" => Some(REDIRECT_URI.into()),
		"IDA_AAD_INSTANCE" => Some(aad_instance.clone()),
		"BATCH_BASE_URL" => Some(batch_base_url.clone()),
		"HTTP_TIMEOUT_SECS" => Some("5".into()),
		_ => None,
	})
	.expect("Test configuration should load.")
}

pub fn descriptor(server: &MockServer) -> ProviderDescriptor {
	let provider_id = ProviderId::new("mock-aad").expect("Provider identifier should be valid.");

	ProviderDescriptor::builder(provider_id)
		.authorization_endpoint(
			Url::parse(&server.url("/common/oauth2/v2.0/authorize"))
				.expect("Mock authorize endpoint should parse."),
		)
		.token_endpoint(
			Url::parse(&server.url("/token")).expect("Mock token endpoint should parse."),
		)
		.end_session_endpoint(
			Url::parse(&server.url("/common/oauth2/v2.0/logout"))
				.expect("Mock logout endpoint should parse."),
		)
		.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
		.build()
		.expect("Mock descriptor should build.")
}

/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
/// `httpmock`, giving up on any request after `timeout`.
pub fn test_http_client_with_timeout(timeout: StdDuration) -> ReqwestHttpClient {
	let client = reqwest::Client::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.redirect(reqwest::redirect::Policy::none())
		.timeout(timeout)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.");

	ReqwestHttpClient::with_client(client)
}

pub fn test_http_client() -> ReqwestHttpClient {
	test_http_client_with_timeout(StdDuration::from_secs(5))
}

/// Broker wired to `server` for token and batch calls, over an in-memory session store.
pub fn broker(server: &MockServer) -> (Broker, Arc<MemorySessionStore>) {
	broker_with_client(server, test_http_client())
}

pub fn broker_with_client(
	server: &MockServer,
	http_client: ReqwestHttpClient,
) -> (Broker, Arc<MemorySessionStore>) {
	let store = Arc::new(MemorySessionStore::default());
	let broker =
		Broker::with_http_client(&config(server), descriptor(server), store.clone(), http_client)
			.expect("Test broker should build.");

	(broker, store)
}

pub fn user(id: &str) -> UserIdentity {
	UserIdentity::new(id).expect("User identity fixture should be valid.")
}

pub fn scopes(raw: &str) -> ScopeSet {
	raw.parse().expect("Scope fixture should be valid.")
}

/// Seeds `user`'s cache entry with a set that expires `expires_in` from now.
pub async fn seed(
	broker: &Broker,
	user: &UserIdentity,
	access_token: &str,
	refresh_token: Option<&str>,
	expires_in: Duration,
) -> TokenSet {
	let issued_at = OffsetDateTime::now_utc() - Duration::minutes(5);
	let token_set = TokenSet {
		access_token: TokenSecret::new(access_token),
		refresh_token: refresh_token.map(TokenSecret::new),
		id_token: None,
		issued_at,
		expires_at: OffsetDateTime::now_utc() + expires_in,
		granted_scopes: scopes("Mail.Read"),
	};

	broker.cache().save(user, &token_set).await.expect("Seeding the cache should succeed.");

	token_set
}

pub fn token_body(access_token: &str, refresh_token: Option<&str>, scope: &str) -> String {
	let mut body = serde_json::json!({
		"access_token": access_token,
		"token_type": "Bearer",
		"expires_in": 3600,
		"scope": scope,
	});

	if let Some(refresh_token) = refresh_token {
		body["refresh_token"] = refresh_token.into();
	}

	body.to_string()
}
