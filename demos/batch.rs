//! Builds the messages, events, and contacts demo batch and prints the `$batch` payload.
//!
//! With `GRAPH_ACCESS_TOKEN` set, the batch is also sent to `BATCH_BASE_URL` (Microsoft Graph
//! v1.0 by default) and the per-request statuses are printed.

// std
use std::env;
// crates.io
use color_eyre::Result;
use url::Url;
// self
use oauth2_batch_broker::{
	batch::{BatchExecutor, BatchRequestBuilder, SubRequest},
	config::DEFAULT_BATCH_BASE_URL,
	http::ReqwestHttpClient,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let envelope = BatchRequestBuilder::new()
		.request(SubRequest::get("1", "/me/messages?$top=1"))
		.request(SubRequest::get("2", "/me/calendar/events?$top=1").depends_on("1"))
		.request(SubRequest::get("3", "me/contacts?$top=1").depends_on("2"))
		.build()?;

	println!("{}", serde_json::to_string_pretty(&envelope)?);

	let Ok(access_token) = env::var("GRAPH_ACCESS_TOKEN") else {
		println!("Set GRAPH_ACCESS_TOKEN to send the batch.");

		return Ok(());
	};
	let base_url = env::var("BATCH_BASE_URL").unwrap_or_else(|_| DEFAULT_BATCH_BASE_URL.into());
	let executor = BatchExecutor::new(
		ReqwestHttpClient::with_timeout(std::time::Duration::from_secs(30))?,
		&Url::parse(&base_url)?,
	)?;
	let result = executor.execute(&envelope, &access_token).await?;

	for (id, response) in result.responses() {
		println!("Request {id}: HTTP {}.", response.status);
	}
	for id in result.missing() {
		println!("Request {id}: no response.");
	}

	Ok(())
}
