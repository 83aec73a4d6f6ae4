//! Broker configuration loaded once at startup.
//!
//! [`BrokerConfig`] deserializes from any serde source and can be read from the process
//! environment with [`BrokerConfig::from_env`]. Every loader finishes with
//! [`BrokerConfig::validate`], so a constructed value is always usable.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	error::ConfigError,
	flows::validate_error_path,
	provider::descriptor::builder::is_secure_or_loopback,
};

/// Authority template used when none is configured; `{0}` is the tenant, `{1}` the version path.
pub const DEFAULT_AUTHORITY_TEMPLATE: &str = "https://login.microsoftonline.com/{0}{1}";
/// Tenant substituted into the authority template by default (multi-tenant sign-in).
pub const DEFAULT_TENANT: &str = "common";
/// Version path substituted for `{1}` in the authority template.
pub const AUTHORITY_VERSION_PATH: &str = "/v2.0";
/// Scopes requested at sign-in by default.
pub const DEFAULT_SIGN_IN_SCOPES: &str =
	"openid email profile offline_access Mail.Read Sites.Read.All";
/// Scopes requested when redeeming the authorization code by default.
pub const DEFAULT_REDEEM_SCOPES: &str = "Mail.Read";
/// Base URL the `$batch` segment is appended to by default.
pub const DEFAULT_BATCH_BASE_URL: &str = "https://graph.microsoft.com/v1.0/";
/// Timeout applied to token, discovery, and batch calls by default.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Access tokens expiring within this many seconds are refreshed before use.
pub const DEFAULT_REFRESH_WINDOW_SECS: u64 = 60;
/// Local path of the error view.
pub const DEFAULT_ERROR_PATH: &str = "/Error";

/// Immutable broker settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
	/// Application (client) id of the registration.
	pub client_id: String,
	/// Client secret of the registration.
	pub client_secret: TokenSecret,
	/// Authority template with `{0}` (tenant) and `{1}` (version path) placeholders.
	#[serde(default = "default_authority_template")]
	pub aad_instance: String,
	/// Tenant substituted into the authority template.
	#[serde(default = "default_tenant")]
	pub tenant: String,
	/// Redirect URI registered for the application.
	pub redirect_uri: Url,
	/// Scopes requested at sign-in.
	#[serde(default = "default_sign_in_scopes")]
	pub scopes: ScopeSet,
	/// Scopes requested when redeeming the authorization code.
	#[serde(default = "default_redeem_scopes")]
	pub redeem_scopes: ScopeSet,
	/// Base URL of the API exposing `$batch`.
	#[serde(default = "default_batch_base_url")]
	pub batch_base_url: Url,
	/// Timeout for outbound HTTP calls, in seconds.
	#[serde(default = "default_http_timeout_secs")]
	pub http_timeout_secs: u64,
	/// Preemptive refresh window, in seconds.
	#[serde(default = "default_refresh_window_secs")]
	pub refresh_window_secs: u64,
	/// Local path of the error view that receives `?message=`.
	#[serde(default = "default_error_path")]
	pub error_path: String,
}
impl BrokerConfig {
	/// Reads the configuration from `IDA_*` and related environment variables.
	///
	/// Required: `IDA_CLIENT_ID`, `IDA_CLIENT_SECRET`, `IDA_REDIRECT_URI`. Optional:
	/// `IDA_AAD_INSTANCE`, `IDA_TENANT`, `IDA_SCOPES`, `IDA_REDEEM_SCOPES`, `IDA_ERROR_PATH`,
	/// `BATCH_BASE_URL`, `HTTP_TIMEOUT_SECS`, `REFRESH_WINDOW_SECS`.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads the configuration through `lookup`, which maps variable names to values.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&'static str) -> Option<String>,
	{
		let get = |name: &'static str| lookup(name).filter(|value| !value.trim().is_empty());
		let required = |name: &'static str| get(name).ok_or(ConfigError::MissingSetting { name });
		let config = Self {
			client_id: required("IDA_CLIENT_ID")?,
			client_secret: TokenSecret::new(required("IDA_CLIENT_SECRET")?),
			aad_instance: get("IDA_AAD_INSTANCE").unwrap_or_else(default_authority_template),
			tenant: get("IDA_TENANT").unwrap_or_else(default_tenant),
			redirect_uri: parse_url("IDA_REDIRECT_URI", &required("IDA_REDIRECT_URI")?)?,
			scopes: match get("IDA_SCOPES") {
				Some(raw) => parse_scopes("IDA_SCOPES", &raw)?,
				None => default_sign_in_scopes(),
			},
			redeem_scopes: match get("IDA_REDEEM_SCOPES") {
				Some(raw) => parse_scopes("IDA_REDEEM_SCOPES", &raw)?,
				None => default_redeem_scopes(),
			},
			batch_base_url: match get("BATCH_BASE_URL") {
				Some(raw) => parse_url("BATCH_BASE_URL", &raw)?,
				None => default_batch_base_url(),
			},
			http_timeout_secs: match get("HTTP_TIMEOUT_SECS") {
				Some(raw) => parse_secs("HTTP_TIMEOUT_SECS", &raw)?,
				None => DEFAULT_HTTP_TIMEOUT_SECS,
			},
			refresh_window_secs: match get("REFRESH_WINDOW_SECS") {
				Some(raw) => parse_secs("REFRESH_WINDOW_SECS", &raw)?,
				None => DEFAULT_REFRESH_WINDOW_SECS,
			},
			error_path: get("IDA_ERROR_PATH").unwrap_or_else(default_error_path),
		};

		config.validate()?;

		Ok(config)
	}

	/// Resolves the authority by substituting the tenant and version path into the template.
	pub fn authority(&self) -> Result<Url, ConfigError> {
		let raw = self.aad_instance.replace("{0}", &self.tenant).replace("{1}", AUTHORITY_VERSION_PATH);

		parse_url("aad_instance", &raw)
	}

	/// Timeout for outbound HTTP calls.
	pub fn http_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.http_timeout_secs)
	}

	/// Preemptive refresh window.
	pub fn refresh_window(&self) -> Duration {
		Duration::seconds(i64::try_from(self.refresh_window_secs).unwrap_or(i64::MAX))
	}

	/// Checks cross-field invariants.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingSetting { name: "client_id" });
		}
		if self.client_secret.expose().is_empty() {
			return Err(ConfigError::MissingSetting { name: "client_secret" });
		}
		if self.tenant.trim().is_empty() || self.tenant.contains('/') {
			return Err(ConfigError::InvalidSetting {
				name: "tenant",
				reason: "tenant must be a single non-empty path segment".into(),
			});
		}
		if !is_secure_or_loopback(&self.authority()?) {
			return Err(ConfigError::InvalidSetting {
				name: "aad_instance",
				reason: "authority must use HTTPS".into(),
			});
		}
		if !is_secure_or_loopback(&self.redirect_uri) {
			return Err(ConfigError::InvalidSetting {
				name: "redirect_uri",
				reason: "redirect URI must use HTTPS unless it targets a loopback host".into(),
			});
		}
		if !is_secure_or_loopback(&self.batch_base_url) {
			return Err(ConfigError::InvalidSetting {
				name: "batch_base_url",
				reason: "batch base URL must use HTTPS".into(),
			});
		}
		if self.redeem_scopes.is_empty() {
			return Err(ConfigError::InvalidSetting {
				name: "redeem_scopes",
				reason: "at least one scope is required".into(),
			});
		}
		if self.http_timeout_secs == 0 {
			return Err(ConfigError::InvalidSetting {
				name: "http_timeout_secs",
				reason: "timeout must be positive".into(),
			});
		}

		validate_error_path(&self.error_path)
	}
}
impl Debug for BrokerConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.field("aad_instance", &self.aad_instance)
			.field("tenant", &self.tenant)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("scopes", &self.scopes)
			.field("redeem_scopes", &self.redeem_scopes)
			.field("batch_base_url", &self.batch_base_url.as_str())
			.field("http_timeout_secs", &self.http_timeout_secs)
			.field("refresh_window_secs", &self.refresh_window_secs)
			.field("error_path", &self.error_path)
			.finish()
	}
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|e| ConfigError::InvalidSetting { name, reason: e.to_string() })
}

fn parse_scopes(name: &'static str, raw: &str) -> Result<ScopeSet, ConfigError> {
	ScopeSet::from_str(raw).map_err(|e| ConfigError::InvalidSetting { name, reason: e.to_string() })
}

fn parse_secs(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
	raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidSetting {
		name,
		reason: e.to_string(),
	})
}

fn default_authority_template() -> String {
	DEFAULT_AUTHORITY_TEMPLATE.into()
}

fn default_tenant() -> String {
	DEFAULT_TENANT.into()
}

fn default_sign_in_scopes() -> ScopeSet {
	ScopeSet::from_str(DEFAULT_SIGN_IN_SCOPES).unwrap_or_default()
}

fn default_redeem_scopes() -> ScopeSet {
	ScopeSet::from_str(DEFAULT_REDEEM_SCOPES).unwrap_or_default()
}

fn default_batch_base_url() -> Url {
	Url::parse(DEFAULT_BATCH_BASE_URL).unwrap_or_else(|_| unreachable!("Default batch URL is valid."))
}

fn default_http_timeout_secs() -> u64 {
	DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_refresh_window_secs() -> u64 {
	DEFAULT_REFRESH_WINDOW_SECS
}

fn default_error_path() -> String {
	DEFAULT_ERROR_PATH.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
		let map: HashMap<&'static str, String> =
			pairs.iter().map(|(key, value)| (*key, (*value).to_owned())).collect();

		move |name| map.get(name).cloned()
	}

	fn minimal() -> Vec<(&'static str, &'static str)> {
		vec![
			("IDA_CLIENT_ID", "11111111-2222-3333-4444-555555555555"),
			("IDA_CLIENT_SECRET", "s3cr3t"),
			("IDA_REDIRECT_URI", "https://localhost:44300/"),
		]
	}

	#[test]
	fn defaults_fill_optional_settings() {
		let config =
			BrokerConfig::from_lookup(lookup(&minimal())).expect("Minimal settings should load.");

		assert_eq!(
			config.authority().expect("Default authority should resolve.").as_str(),
			"https://login.microsoftonline.com/common/v2.0"
		);
		assert!(config.scopes.contains("offline_access"));
		assert_eq!(config.redeem_scopes.normalized(), "Mail.Read");
		assert_eq!(config.batch_base_url.as_str(), DEFAULT_BATCH_BASE_URL);
		assert_eq!(config.http_timeout(), std::time::Duration::from_secs(30));
		assert_eq!(config.refresh_window(), Duration::seconds(60));
		assert_eq!(config.error_path, "/Error");
	}

	#[test]
	fn missing_and_invalid_settings_are_named() {
		let err = BrokerConfig::from_lookup(lookup(&[("IDA_CLIENT_ID", "app")]))
			.expect_err("Secret is required.");

		assert!(matches!(err, ConfigError::MissingSetting { name: "IDA_CLIENT_SECRET" }));

		let mut pairs = minimal();

		pairs.push(("HTTP_TIMEOUT_SECS", "soon"));

		let err = BrokerConfig::from_lookup(lookup(&pairs)).expect_err("Timeout must be numeric.");

		assert!(matches!(err, ConfigError::InvalidSetting { name: "HTTP_TIMEOUT_SECS", .. }));

		let mut pairs = minimal();

		pairs.push(("IDA_ERROR_PATH", "//evil.example.com/"));

		let err =
			BrokerConfig::from_lookup(lookup(&pairs)).expect_err("Protocol-relative paths fail.");

		assert!(matches!(err, ConfigError::InvalidSetting { name: "error_path", .. }));
	}

	#[test]
	fn tenant_and_template_are_substituted() {
		let mut pairs = minimal();

		pairs.push(("IDA_AAD_INSTANCE", "https://login.example.com/{0}{1}"));
		pairs.push(("IDA_TENANT", "contoso.onmicrosoft.com"));

		let config = BrokerConfig::from_lookup(lookup(&pairs)).expect("Custom authority loads.");

		assert_eq!(
			config.authority().expect("Authority should resolve.").as_str(),
			"https://login.example.com/contoso.onmicrosoft.com/v2.0"
		);
	}

	#[test]
	fn json_configuration_uses_the_same_defaults() {
		let config: BrokerConfig = serde_json::from_value(serde_json::json!({
			"client_id": "app",
			"client_secret": "s3cr3t",
			"redirect_uri": "https://localhost:44300/",
			"redeem_scopes": ["Mail.Read", "Calendars.Read"]
		}))
		.expect("JSON configuration should deserialize.");

		config.validate().expect("JSON configuration should validate.");

		assert_eq!(config.redeem_scopes.len(), 2);
		assert!(!format!("{config:?}").contains("s3cr3t"));
	}
}
