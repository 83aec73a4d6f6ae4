// self
use crate::{_prelude::*, auth::ScopeSet};

/// Provider-specific quirks that influence how requests are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Character used to join scopes when constructing `scope` parameters.
	pub scope_delimiter: char,
}
impl ProviderQuirks {
	/// Joins `scope` with the configured delimiter, or `None` for an empty set.
	pub fn format_scope(&self, scope: &ScopeSet) -> Option<String> {
		if scope.is_empty() {
			return None;
		}
		if self.scope_delimiter == ' ' {
			return Some(scope.normalized());
		}

		let mut buf = String::new();

		for (idx, value) in scope.iter().enumerate() {
			if idx > 0 {
				buf.push(self.scope_delimiter);
			}

			buf.push_str(value);
		}

		Some(buf)
	}
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self { scope_delimiter: ' ' }
	}
}
