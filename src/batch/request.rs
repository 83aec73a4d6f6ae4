//! Sub-request model and the validating envelope builder.

// std
use std::collections::HashSet;
// self
use crate::_prelude::*;

/// Default upper bound on sub-requests per batch (the limit Microsoft Graph enforces).
pub const DEFAULT_MAX_REQUESTS: usize = 20;

/// Errors raised while building a [`BatchEnvelope`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum BatchBuildError {
	/// No sub-requests were supplied.
	#[error("Batch must contain at least one request.")]
	Empty,
	/// The batch exceeds the configured size limit.
	#[error("Batch holds {count} requests but at most {max} are allowed.")]
	TooManyRequests {
		/// Number of supplied sub-requests.
		count: usize,
		/// Configured limit.
		max: usize,
	},
	/// A sub-request has an empty id.
	#[error("Request ids cannot be empty.")]
	EmptyId,
	/// Two sub-requests share an id.
	#[error("Request id `{id}` is used more than once.")]
	DuplicateId {
		/// Repeated id.
		id: String,
	},
	/// A sub-request URL is absolute; batch URLs are relative to the batch endpoint's base.
	#[error("Request `{id}` must use a relative URL, got `{url}`.")]
	AbsoluteUrl {
		/// Offending request id.
		id: String,
		/// Offending URL.
		url: String,
	},
	/// A sub-request depends on itself.
	#[error("Request `{id}` depends on itself.")]
	SelfDependency {
		/// Offending request id.
		id: String,
	},
	/// A dependency names an id that is not part of the batch.
	#[error("Request `{id}` depends on unknown request `{dependency}`.")]
	UnknownDependency {
		/// Request declaring the dependency.
		id: String,
		/// Missing dependency id.
		dependency: String,
	},
	/// Dependencies form a cycle.
	#[error("Requests form a dependency cycle: {}.", .ids.join(" -> "))]
	Cycle {
		/// Ids along the cycle, starting and ending with the same id.
		ids: Vec<String>,
	},
}

/// HTTP method of a sub-request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl HttpMethod {
	/// Returns the wire representation.
	pub fn as_str(self) -> &'static str {
		match self {
			HttpMethod::Get => "GET",
			HttpMethod::Post => "POST",
			HttpMethod::Put => "PUT",
			HttpMethod::Patch => "PATCH",
			HttpMethod::Delete => "DELETE",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One logical HTTP call inside a batch.
///
/// Serialized as `{"id", "method", "url", "dependsOn"?, "headers"?, "body"?}`; `dependsOn`,
/// `headers`, and `body` are omitted when empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubRequest {
	/// Caller-chosen id, unique within the batch.
	pub id: String,
	/// HTTP method.
	pub method: HttpMethod,
	/// URL relative to the batch endpoint's base (for example `/me/messages?$top=1`).
	pub url: String,
	/// Ids that must complete before this request runs.
	#[serde(rename = "dependsOn", default, skip_serializing_if = "Vec::is_empty")]
	pub depends_on: Vec<String>,
	/// Per-request headers.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub headers: BTreeMap<String, String>,
	/// JSON body for `POST`/`PUT`/`PATCH`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<serde_json::Value>,
}
impl SubRequest {
	/// Creates a sub-request without dependencies, headers, or body.
	pub fn new(id: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			method,
			url: url.into(),
			depends_on: Vec::new(),
			headers: BTreeMap::new(),
			body: None,
		}
	}

	/// Shorthand for a `GET` sub-request.
	pub fn get(id: impl Into<String>, url: impl Into<String>) -> Self {
		Self::new(id, HttpMethod::Get, url)
	}

	/// Adds a dependency on another request id.
	pub fn depends_on(mut self, id: impl Into<String>) -> Self {
		self.depends_on.push(id.into());

		self
	}

	/// Adds a header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Sets a JSON body and the matching `Content-Type` header.
	pub fn json_body(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self.header("Content-Type", "application/json")
	}
}

/// Validated, ordered set of sub-requests ready to send.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchEnvelope {
	requests: Vec<SubRequest>,
}
impl BatchEnvelope {
	/// Validates `requests` with the default size limit.
	pub fn build<I>(requests: I) -> Result<Self, BatchBuildError>
	where
		I: IntoIterator<Item = SubRequest>,
	{
		BatchRequestBuilder::new().requests(requests).build()
	}

	/// Sub-requests in submission order.
	pub fn requests(&self) -> &[SubRequest] {
		&self.requests
	}

	/// Request ids in submission order.
	pub fn ids(&self) -> impl Iterator<Item = &str> {
		self.requests.iter().map(|request| request.id.as_str())
	}

	/// Number of sub-requests.
	pub fn len(&self) -> usize {
		self.requests.len()
	}

	/// Always `false` for a built envelope; provided for API symmetry.
	pub fn is_empty(&self) -> bool {
		self.requests.is_empty()
	}
}

/// Builder that validates ids, URLs, and the dependency graph of a batch.
#[derive(Clone, Debug)]
pub struct BatchRequestBuilder {
	requests: Vec<SubRequest>,
	max_requests: usize,
}
impl BatchRequestBuilder {
	/// Creates an empty builder with [`DEFAULT_MAX_REQUESTS`].
	pub fn new() -> Self {
		Self { requests: Vec::new(), max_requests: DEFAULT_MAX_REQUESTS }
	}

	/// Overrides the size limit.
	pub fn max_requests(mut self, max: usize) -> Self {
		self.max_requests = max;

		self
	}

	/// Appends one sub-request.
	pub fn request(mut self, request: SubRequest) -> Self {
		self.requests.push(request);

		self
	}

	/// Appends several sub-requests.
	pub fn requests<I>(mut self, requests: I) -> Self
	where
		I: IntoIterator<Item = SubRequest>,
	{
		self.requests.extend(requests);

		self
	}

	/// Validates the collected sub-requests and produces the envelope.
	///
	/// Dependencies may point forward; the provider decides execution order.
	pub fn build(self) -> Result<BatchEnvelope, BatchBuildError> {
		if self.requests.is_empty() {
			return Err(BatchBuildError::Empty);
		}
		if self.requests.len() > self.max_requests {
			return Err(BatchBuildError::TooManyRequests {
				count: self.requests.len(),
				max: self.max_requests,
			});
		}

		let mut ids = HashSet::with_capacity(self.requests.len());

		for request in &self.requests {
			if request.id.is_empty() {
				return Err(BatchBuildError::EmptyId);
			}
			if Url::parse(&request.url).is_ok() {
				return Err(BatchBuildError::AbsoluteUrl {
					id: request.id.clone(),
					url: request.url.clone(),
				});
			}
			if !ids.insert(request.id.as_str()) {
				return Err(BatchBuildError::DuplicateId { id: request.id.clone() });
			}
		}
		for request in &self.requests {
			for dependency in &request.depends_on {
				if *dependency == request.id {
					return Err(BatchBuildError::SelfDependency { id: request.id.clone() });
				}
				if !ids.contains(dependency.as_str()) {
					return Err(BatchBuildError::UnknownDependency {
						id: request.id.clone(),
						dependency: dependency.clone(),
					});
				}
			}
		}

		if let Some(ids) = find_cycle(&self.requests) {
			return Err(BatchBuildError::Cycle { ids });
		}

		Ok(BatchEnvelope { requests: self.requests })
	}
}
impl Default for BatchRequestBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
	InProgress,
	Done,
}

fn find_cycle(requests: &[SubRequest]) -> Option<Vec<String>> {
	let graph: HashMap<&str, &[String]> = requests
		.iter()
		.map(|request| (request.id.as_str(), request.depends_on.as_slice()))
		.collect();
	let mut visits = HashMap::with_capacity(requests.len());
	let mut path = Vec::new();

	requests.iter().find_map(|request| visit(&request.id, &graph, &mut visits, &mut path))
}

fn visit<'a>(
	id: &'a str,
	graph: &HashMap<&'a str, &'a [String]>,
	visits: &mut HashMap<&'a str, Visit>,
	path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
	match visits.get(id) {
		Some(Visit::Done) => return None,
		Some(Visit::InProgress) => {
			let start = path.iter().position(|step| *step == id).unwrap_or_default();
			let mut cycle: Vec<String> =
				path[start..].iter().map(|step| (*step).to_owned()).collect();

			cycle.push(id.to_owned());

			return Some(cycle);
		},
		None => {},
	}

	visits.insert(id, Visit::InProgress);
	path.push(id);

	for dependency in graph.get(id).copied().unwrap_or_default() {
		if let Some(cycle) = visit(dependency, graph, visits, path) {
			return Some(cycle);
		}
	}

	path.pop();
	visits.insert(id, Visit::Done);

	None
}
