//! Interactive sign-in against Azure AD (or any OpenID provider) using `IDA_*` settings.
//!
//! The demo discovers the provider from the configured authority, prints the authorize URL,
//! waits for the full redirect URL to be pasted on stdin, redeems the code into a file-backed
//! token cache, and finally sends the demo `$batch` request with the cached token.

// std
use std::{
	io::{self, Write},
	sync::Arc,
};
// crates.io
use color_eyre::Result;
use url::Url;
// self
use oauth2_batch_broker::{
	auth::UserIdentity,
	batch::{BatchEnvelope, SubRequest},
	cache::FileSessionStore,
	config::BrokerConfig,
	flows::{AuthorizationResponse, Broker, FlowState},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let config = BrokerConfig::from_env()?;
	let store = Arc::new(FileSessionStore::open("token_cache.json")?);
	let broker = Broker::discover(&config, store).await?;
	let mut flow = broker.start_authorization();

	println!("Open this URL in a browser and sign in:\n{}", flow.authorize_url());

	let redirected = Url::parse(&prompt("Paste the full URL you were redirected to")?)?;
	let user = UserIdentity::new(prompt("Enter the signed-in user's object id")?)?;

	flow.receive(AuthorizationResponse::from_redirect_url(&redirected), user.clone())?;

	if matches!(flow.state(), FlowState::CodeReceived { .. }) {
		match flow.redeem(&broker).await {
			Ok(_) => println!("Signed in; tokens cached for {user}."),
			Err(e) => eprintln!("Redemption failed: {e}"),
		}
	}
	if let Some(redirect) = flow.take_error_redirect() {
		eprintln!("Sign-in failed; the web app would redirect to {}.", redirect.location);

		return Ok(());
	}

	let envelope = BatchEnvelope::build([
		SubRequest::get("1", "/me/messages?$top=1"),
		SubRequest::get("2", "/me/calendar/events?$top=1").depends_on("1"),
		SubRequest::get("3", "me/contacts?$top=1").depends_on("2"),
	])?;
	let result = broker.execute_batch(&user, &envelope).await?;

	for (id, status) in result.statuses() {
		println!("Request {id}: HTTP {status}.");
	}

	Ok(())
}

fn prompt(label: &str) -> Result<String> {
	print!("{label}: ");
	io::stdout().flush()?;

	let mut buf = String::new();

	io::stdin().read_line(&mut buf)?;

	Ok(buf.trim().to_owned())
}
