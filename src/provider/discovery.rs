//! OpenID Connect discovery for provider descriptors.
//!
//! Only endpoint URLs are read from the discovery document. Issuer and signing keys are
//! deliberately ignored because token signatures are never validated locally.

// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	error::ConfigError,
	http::ReqwestHttpClient,
	provider::{ClientAuthMethod, ProviderDescriptor},
};

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
	authorization_endpoint: Url,
	token_endpoint: Url,
	#[serde(default)]
	end_session_endpoint: Option<Url>,
	#[serde(default)]
	token_endpoint_auth_methods_supported: Vec<String>,
}

/// Returns the discovery document location for `authority`.
///
/// The authority is treated as a directory, so `https://login.microsoftonline.com/common/v2.0`
/// resolves to `https://login.microsoftonline.com/common/v2.0/.well-known/openid-configuration`.
pub fn discovery_url(authority: &Url) -> Result<Url, ConfigError> {
	let mut base = authority.clone();

	if !base.path().ends_with('/') {
		let path = format!("{}/", base.path());

		base.set_path(&path);
	}

	base.join(WELL_KNOWN_PATH).map_err(|source| ConfigError::InvalidDescriptor { source })
}

/// Fetches `authority`'s OpenID configuration and builds a validated [`ProviderDescriptor`].
///
/// `client_secret_post` is preferred when the provider advertises it without
/// `client_secret_basic`; otherwise HTTP Basic is used.
pub async fn discover(
	http_client: &ReqwestHttpClient,
	id: ProviderId,
	authority: &Url,
) -> Result<ProviderDescriptor, ConfigError> {
	let location = discovery_url(authority)?;
	let response = http_client.get(location.clone()).send().await.map_err(|e| {
		ConfigError::Discovery { message: format!("request to {location} failed: {e}") }
	})?;
	let status = response.status();
	let body = response.text().await.map_err(|e| ConfigError::Discovery {
		message: format!("reading the response from {location} failed: {e}"),
	})?;

	if !status.is_success() {
		return Err(ConfigError::Discovery {
			message: format!("{location} answered with HTTP {}", status.as_u16()),
		});
	}

	let mut deserializer = serde_json::Deserializer::from_str(&body);
	let document: DiscoveryDocument = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|e| ConfigError::Discovery {
			message: format!("document at {location} is invalid at `{}`: {}", e.path(), e.inner()),
		})?;
	let auth_method = preferred_auth_method(&document.token_endpoint_auth_methods_supported);
	let mut builder = ProviderDescriptor::builder(id)
		.authorization_endpoint(document.authorization_endpoint)
		.token_endpoint(document.token_endpoint)
		.preferred_client_auth_method(auth_method);

	if let Some(end_session) = document.end_session_endpoint {
		builder = builder.end_session_endpoint(end_session);
	}

	Ok(builder.build()?)
}

fn preferred_auth_method(supported: &[String]) -> ClientAuthMethod {
	let has = |name: &str| supported.iter().any(|method| method == name);

	if has("client_secret_post") && !has("client_secret_basic") {
		ClientAuthMethod::ClientSecretPost
	} else {
		ClientAuthMethod::ClientSecretBasic
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn discovery_url_keeps_the_authority_path() {
		let authority = Url::parse("https://login.microsoftonline.com/common/v2.0")
			.expect("Authority fixture should parse.");

		assert_eq!(
			discovery_url(&authority).expect("Discovery URL should resolve.").as_str(),
			"https://login.microsoftonline.com/common/v2.0/.well-known/openid-configuration"
		);

		let trailing = Url::parse("https://login.example.com/tenant/")
			.expect("Authority fixture should parse.");

		assert_eq!(
			discovery_url(&trailing).expect("Discovery URL should resolve.").as_str(),
			"https://login.example.com/tenant/.well-known/openid-configuration"
		);
	}

	#[test]
	fn basic_auth_is_the_default_method() {
		assert_eq!(preferred_auth_method(&[]), ClientAuthMethod::ClientSecretBasic);
		assert_eq!(
			preferred_auth_method(&["client_secret_post".into(), "client_secret_basic".into()]),
			ClientAuthMethod::ClientSecretBasic
		);
		assert_eq!(
			preferred_auth_method(&["client_secret_post".into()]),
			ClientAuthMethod::ClientSecretPost
		);
	}
}
