//! Token secrets and the cached token set issued by the provider.

pub mod secret;
pub mod set;
