//! Sends a [`BatchEnvelope`] as one `POST {base}/$batch` call and parses the reply.

// crates.io
use reqwest::header::{ACCEPT, CONTENT_TYPE};
// self
use crate::{
	_prelude::*,
	batch::{BatchEnvelope, BatchResult, SubResponse},
	error::{ConfigError, TransportError},
	http::ReqwestHttpClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::descriptor::builder::is_secure_or_loopback,
};

const BATCH_SEGMENT: &str = "$batch";

/// Outer batch call failures. Sub-request failures are reported as [`SubResponse`] data instead.
#[derive(Debug, ThisError)]
pub enum ExecutionError {
	/// The batch endpoint answered with a non-2xx status.
	#[error("Batch endpoint answered with HTTP {status}.")]
	Status {
		/// Outer HTTP status.
		status: u16,
		/// Raw response body for diagnostics.
		body: String,
	},
	/// The response body does not match the batch response format.
	#[error("Batch response is malformed at `{path}`.", path = .source.path())]
	MalformedResponse {
		/// Parse failure with the JSON path where it occurred.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// Raw response body for diagnostics.
		body: String,
	},
	/// The envelope could not be serialized.
	#[error("Batch envelope could not be encoded.")]
	Encode(#[source] serde_json::Error),
	/// The call exceeded the configured timeout.
	#[error("Batch request timed out.")]
	Timeout,
	/// Network failure before a status was received.
	#[error(transparent)]
	Transport(#[from] TransportError),
}

#[derive(Deserialize)]
struct BatchResponseBody {
	responses: Vec<SubResponse>,
}

/// Executes batch envelopes against one `$batch` endpoint.
#[derive(Clone, Debug)]
pub struct BatchExecutor {
	http_client: ReqwestHttpClient,
	endpoint: Url,
	timeout: Option<std::time::Duration>,
}
impl BatchExecutor {
	/// Creates an executor posting to `{base_url}/$batch`.
	///
	/// `base_url` must use HTTPS unless it targets a loopback host.
	pub fn new(http_client: ReqwestHttpClient, base_url: &Url) -> Result<Self, ConfigError> {
		Ok(Self { http_client, endpoint: batch_endpoint(base_url)?, timeout: None })
	}

	/// Applies a per-call timeout on top of the client's own.
	pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// The resolved `$batch` URL.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// Sends `envelope` with `access_token` as bearer and correlates the sub-responses.
	///
	/// No retries are attempted; any outer failure discards the whole response.
	pub async fn execute(
		&self,
		envelope: &BatchEnvelope,
		access_token: &str,
	) -> Result<BatchResult, ExecutionError> {
		const KIND: FlowKind = FlowKind::Batch;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.send(envelope, access_token)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn send(
		&self,
		envelope: &BatchEnvelope,
		access_token: &str,
	) -> Result<BatchResult, ExecutionError> {
		let payload = serde_json::to_vec(envelope).map_err(ExecutionError::Encode)?;
		let mut request = self
			.http_client
			.post(self.endpoint.clone())
			.bearer_auth(access_token)
			.header(CONTENT_TYPE, "application/json")
			.header(ACCEPT, "application/json")
			.body(payload);

		if let Some(timeout) = self.timeout {
			request = request.timeout(timeout);
		}

		let response = request.send().await.map_err(map_send_error)?;
		let status = response.status();
		let body = response.text().await.map_err(map_send_error)?;

		if !status.is_success() {
			return Err(ExecutionError::Status { status: status.as_u16(), body });
		}

		let parsed = parse_body(&body)
			.map_err(|source| ExecutionError::MalformedResponse { source, body: body.clone() })?;

		Ok(BatchResult::correlate(envelope, parsed.responses))
	}
}

/// Resolves `{base_url}/$batch`, treating the base as a directory.
pub fn batch_endpoint(base_url: &Url) -> Result<Url, ConfigError> {
	if !is_secure_or_loopback(base_url) {
		return Err(ConfigError::InvalidSetting {
			name: "batch_base_url",
			reason: format!("{base_url} must use HTTPS"),
		});
	}

	let mut base = base_url.clone();

	if !base.path().ends_with('/') {
		let path = format!("{}/", base.path());

		base.set_path(&path);
	}

	base.join(BATCH_SEGMENT).map_err(|source| ConfigError::InvalidDescriptor { source })
}

fn parse_body(
	body: &str,
) -> Result<BatchResponseBody, serde_path_to_error::Error<serde_json::Error>> {
	let mut deserializer = serde_json::Deserializer::from_str(body);

	serde_path_to_error::deserialize(&mut deserializer)
}

fn map_send_error(err: ReqwestError) -> ExecutionError {
	if err.is_timeout() {
		ExecutionError::Timeout
	} else {
		TransportError::batch_network(err).into()
	}
}
