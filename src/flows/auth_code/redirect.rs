//! Error-view redirects for failed sign-ins.
//!
//! Provider diagnostics reach the error view as `{error_path}?message=...`. The message is
//! sanitized (control characters dropped, whitespace collapsed, length capped) and
//! form-encoded; [`escape_html`] is provided for views that render it.

// crates.io
use url::form_urlencoded;
// self
use crate::{_prelude::*, error::ConfigError};

/// Longest message, in characters, forwarded to the error view.
pub const MAX_MESSAGE_CHARS: usize = 512;

/// Redirect the host should issue after a failed sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRedirect {
	/// Local `Location` value: the error path plus the encoded `message` query parameter.
	pub location: String,
	/// Sanitized message carried by the redirect.
	pub message: String,
}
impl ErrorRedirect {
	/// Builds the redirect for `raw_message`. `error_path` must be a valid local path.
	pub fn new(error_path: &str, raw_message: &str) -> Self {
		let message = sanitize_message(raw_message);
		let encoded: String = form_urlencoded::byte_serialize(message.as_bytes()).collect();

		Self { location: format!("{error_path}?message={encoded}"), message }
	}
}

/// Checks that `path` is a local absolute path, never a protocol-relative or absolute URL.
pub fn validate_error_path(path: &str) -> Result<(), ConfigError> {
	let reason = if !path.starts_with('/') {
		"must start with '/'"
	} else if path.starts_with("//") || path.contains('\\') {
		"must not leave the application origin"
	} else if path.contains(['?', '#']) {
		"must not carry a query or fragment"
	} else if path.chars().any(char::is_control) {
		"must not contain control characters"
	} else {
		return Ok(());
	};

	Err(ConfigError::InvalidSetting { name: "error_path", reason: reason.into() })
}

/// Drops control characters, collapses whitespace runs, trims, and caps the length.
pub fn sanitize_message(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len().min(MAX_MESSAGE_CHARS));
	let mut pending_space = false;
	let mut count = 0;

	for ch in raw.chars() {
		if ch.is_whitespace() {
			pending_space = !out.is_empty();

			continue;
		}
		if ch.is_control() {
			continue;
		}
		if pending_space {
			if count + 1 >= MAX_MESSAGE_CHARS {
				break;
			}

			out.push(' ');
			count += 1;
			pending_space = false;
		}
		if count >= MAX_MESSAGE_CHARS {
			break;
		}

		out.push(ch);
		count += 1;
	}

	out
}

/// Escapes text for inclusion in HTML element content or quoted attributes.
pub fn escape_html(text: &str) -> String {
	let mut out = String::with_capacity(text.len());

	for ch in text.chars() {
		match ch {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#x27;"),
			_ => out.push(ch),
		}
	}

	out
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn redirect_encodes_the_provider_message() {
		let redirect = ErrorRedirect::new(
			"/Error",
			"AADSTS54005: OAuth2 Authorization code was already redeemed.",
		);

		assert_eq!(
			redirect.location,
			"/Error?message=AADSTS54005%3A+OAuth2+Authorization+code+was+already+redeemed."
		);

		let injected = ErrorRedirect::new("/Error", "bad&next=https://evil.example.com/#x");

		assert_eq!(
			injected.location,
			"/Error?message=bad%26next%3Dhttps%3A%2F%2Fevil.example.com%2F%23x"
		);
	}

	#[test]
	fn messages_are_sanitized_and_capped() {
		assert_eq!(sanitize_message("  line one\r\n\tline\u{0}two  "), "line one linetwo");

		let long = "x".repeat(MAX_MESSAGE_CHARS * 2);

		assert_eq!(sanitize_message(&long).chars().count(), MAX_MESSAGE_CHARS);

		let spaced = "ab ".repeat(MAX_MESSAGE_CHARS);

		assert!(sanitize_message(&spaced).chars().count() <= MAX_MESSAGE_CHARS);
		assert!(!sanitize_message(&spaced).ends_with(' '));
	}

	#[test]
	fn error_paths_stay_local() {
		assert!(validate_error_path("/Error").is_ok());
		assert!(validate_error_path("/Home/Error").is_ok());

		for bad in ["Error", "//evil.example.com", "/\\evil", "/Error?x=1", "https://evil/"] {
			assert!(validate_error_path(bad).is_err(), "{bad} must be rejected.");
		}
	}

	#[test]
	fn html_escaping_covers_markup_and_quotes() {
		assert_eq!(
			escape_html(r#"<script>alert("x" & 'y')</script>"#),
			"&lt;script&gt;alert(&quot;x&quot; &amp; &#x27;y&#x27;)&lt;/script&gt;"
		);
	}
}
