//! Redirect-based sign-in: authorization sessions, the authentication flow state machine, and
//! error-view redirects.

pub mod flow;
pub mod redirect;
pub mod session;

pub use flow::*;
pub use redirect::*;
pub use session::*;
