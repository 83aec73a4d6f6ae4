//! Provider-facing descriptors (data), strategies (behavior), and OpenID discovery.
//!
//! `descriptor` exposes validated endpoint metadata ([`ProviderDescriptor`]) together with the
//! client authentication preference and scope delimiter. `strategy` defines
//! [`ProviderStrategy`], the hook the token endpoint client uses to classify provider errors.
//! `discovery` builds a descriptor from an authority's `/.well-known/openid-configuration`.

pub mod descriptor;
pub mod discovery;
pub mod strategy;

pub use descriptor::*;
pub use discovery::discover;
pub use strategy::*;
