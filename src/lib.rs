//! Authorization-code redemption into a per-user token cache, plus dependency-ordered batch
//! requests against `$batch` endpoints.
//!
//! The [`flows::Broker`] facade ties the pieces together: [`flows::AuthenticationFlow`] drives the
//! redirect-based sign-in, [`flows::Broker::redeem`] exchanges the authorization code and persists
//! the [`auth::TokenSet`] in a [`cache::TokenCache`], and [`flows::Broker::execute_batch`] sends a
//! [`batch::BatchEnvelope`] through the [`batch::BatchExecutor`] with the cached bearer token.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod batch;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flows;
pub mod http;
pub mod obs;
pub mod provider;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
