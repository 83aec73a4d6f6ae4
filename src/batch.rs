//! Dependency-ordered batch requests against `$batch` endpoints.
//!
//! [`BatchRequestBuilder`] validates a set of [`SubRequest`] values into a [`BatchEnvelope`],
//! [`BatchExecutor`] sends it as a single `POST {base}/$batch` call, and [`BatchResult`]
//! correlates the multiplexed [`SubResponse`] values back to request ids. Sub-request failures
//! are data (non-2xx [`SubResponse`] statuses); only the outer call can fail with an
//! [`ExecutionError`].

pub mod executor;
pub mod request;
pub mod response;

pub use executor::*;
pub use request::*;
pub use response::*;
