mod common;

// crates.io
use httpmock::prelude::*;
use time::Duration;
// self
use common::*;
use oauth2_batch_broker::error::{Error, RedemptionError};

#[tokio::test]
async fn fresh_tokens_are_reused_without_calling_the_provider() {
	let server = MockServer::start_async().await;
	let (broker, _store) = broker(&server);
	let user = user("u1");

	seed(&broker, &user, "tok1", Some("refresh1"), Duration::hours(1)).await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(500);
		})
		.await;
	let token = broker.access_token(&user).await.expect("Cached token should be reused.");

	assert_eq!(token.expose(), "tok1");

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn expiring_tokens_refresh_once_and_keep_the_refresh_token() {
	let server = MockServer::start_async().await;
	let (broker, _store) = broker(&server);
	let user = user("u1");

	seed(&broker, &user, "tok-old", Some("refresh1"), Duration::seconds(30)).await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(token_body("tok-new", None, "Mail.Read"));
		})
		.await;
	let (first, second) = tokio::join!(broker.access_token(&user), broker.access_token(&user));

	assert_eq!(first.expect("First caller should get a token.").expose(), "tok-new");
	assert_eq!(second.expect("Second caller should get a token.").expose(), "tok-new");

	mock.assert_calls_async(1).await;

	let cached = broker.cache().load(&user).await.expect("Refreshed set should be cached.");

	assert_eq!(cached.access_token.expose(), "tok-new");
	assert_eq!(cached.refresh_token.as_ref().map(|token| token.expose()), Some("refresh1"));
}

#[tokio::test]
async fn rejected_refresh_token_requires_sign_in() {
	let server = MockServer::start_async().await;
	let (broker, store) = broker(&server);
	let user = user("u1");

	seed(&broker, &user, "tok-old", Some("refresh-revoked"), Duration::seconds(-10)).await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400).header("content-type", "application/json").body(
				"{\"error\":\"invalid_grant\",\"error_description\":\"AADSTS700082: The refresh token has expired due to inactivity.\"}",
			);
		})
		.await;
	let err = broker.access_token(&user).await.expect_err("Revoked refresh token must fail.");

	mock.assert_async().await;

	assert!(matches!(err, Error::ReauthorizationRequired { .. }));
	assert!(store.is_empty());
}

#[tokio::test]
async fn transient_refresh_failures_keep_the_entry() {
	let server = MockServer::start_async().await;
	let (broker, store) = broker(&server);
	let user = user("u1");

	seed(&broker, &user, "tok-old", Some("refresh1"), Duration::seconds(10)).await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(503)
				.header("content-type", "application/json")
				.body("{\"error\":\"temporarily_unavailable\"}");
		})
		.await;
	let err = broker.access_token(&user).await.expect_err("Outage must fail the refresh.");

	mock.assert_async().await;

	assert!(matches!(err, Error::Redemption(RedemptionError::Provider { .. })));
	assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn missing_entries_and_refresh_tokens_require_sign_in() {
	let server = MockServer::start_async().await;
	let (broker, _store) = broker(&server);
	let unknown = user("nobody");
	let err = broker.access_token(&unknown).await.expect_err("Unknown user has no tokens.");

	assert!(matches!(err, Error::ReauthorizationRequired { ref user } if *user == unknown));

	let user = user("u1");

	seed(&broker, &user, "tok-old", None, Duration::seconds(-10)).await;

	let err = broker.access_token(&user).await.expect_err("Expired set without refresh fails.");

	assert!(matches!(err, Error::ReauthorizationRequired { .. }));
}

#[tokio::test]
async fn sign_out_clears_the_cache_and_builds_the_logout_url() {
	let server = MockServer::start_async().await;
	let (broker, store) = broker(&server);
	let user = user("u1");

	seed(&broker, &user, "tok1", Some("refresh1"), Duration::hours(1)).await;

	let logout = broker.sign_out(&user).await.expect("Descriptor has an end-session endpoint.");

	assert!(store.is_empty());
	assert_eq!(logout.path(), "/common/oauth2/v2.0/logout");
	assert_eq!(
		logout
			.query_pairs()
			.find(|(key, _)| key == "post_logout_redirect_uri")
			.map(|(_, value)| value.into_owned()),
		Some(REDIRECT_URI.to_owned())
	);
}
