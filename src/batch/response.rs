//! Sub-response model and id correlation.

// std
use std::collections::HashSet;
// self
use crate::{_prelude::*, batch::BatchEnvelope, http};

/// Result of one sub-request, as reported inside the batch response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubResponse {
	/// Id of the sub-request this answers.
	pub id: String,
	/// HTTP status of the sub-request.
	pub status: u16,
	/// Sub-response headers.
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	/// Sub-response body; `null` when absent.
	#[serde(default)]
	pub body: serde_json::Value,
}
impl SubResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Looks up a header, ignoring ASCII case.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Throttling hint from the `Retry-After` header, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		self.header("Retry-After").and_then(http::parse_retry_after_value)
	}
}

/// Sub-responses indexed by request id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchResult {
	responses: BTreeMap<String, SubResponse>,
	missing: Vec<String>,
	unexpected: Vec<SubResponse>,
}
impl BatchResult {
	/// Matches `responses` (in any order) against the ids of `envelope`.
	///
	/// Responses for ids that were never requested, and repeated responses for one id, are
	/// kept aside as unexpected instead of being merged. Requested ids without a response are
	/// listed as missing, in submission order.
	pub fn correlate(envelope: &BatchEnvelope, responses: Vec<SubResponse>) -> Self {
		let requested: HashSet<&str> = envelope.ids().collect();
		let mut matched: BTreeMap<String, SubResponse> = BTreeMap::new();
		let mut unexpected = Vec::new();

		for response in responses {
			if !requested.contains(response.id.as_str()) || matched.contains_key(&response.id) {
				unexpected.push(response);

				continue;
			}

			matched.insert(response.id.clone(), response);
		}

		let missing = envelope
			.ids()
			.filter(|id| !matched.contains_key(*id))
			.map(ToOwned::to_owned)
			.collect();

		Self { responses: matched, missing, unexpected }
	}

	/// Response for `id`, if one arrived.
	pub fn get(&self, id: &str) -> Option<&SubResponse> {
		self.responses.get(id)
	}

	/// All matched responses keyed by id.
	pub fn responses(&self) -> &BTreeMap<String, SubResponse> {
		&self.responses
	}

	/// Status per matched id.
	pub fn statuses(&self) -> BTreeMap<&str, u16> {
		self.responses.iter().map(|(id, response)| (id.as_str(), response.status)).collect()
	}

	/// Requested ids that received no response.
	pub fn missing(&self) -> &[String] {
		&self.missing
	}

	/// Responses whose id was not requested or was answered twice.
	pub fn unexpected(&self) -> &[SubResponse] {
		&self.unexpected
	}

	/// Matched responses with a non-2xx status.
	pub fn failures(&self) -> impl Iterator<Item = &SubResponse> {
		self.responses.values().filter(|response| !response.is_success())
	}

	/// Returns `true` when every requested id has a response.
	pub fn is_complete(&self) -> bool {
		self.missing.is_empty()
	}

	/// Consumes the result, returning the matched responses.
	pub fn into_responses(self) -> BTreeMap<String, SubResponse> {
		self.responses
	}
}
