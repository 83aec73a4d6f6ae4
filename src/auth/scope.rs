//! Scope modeling helpers used for redemption requests and granted-scope checks.

// std
use std::collections::BTreeSet;
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Normalized set of OAuth scopes.
///
/// Scopes are deduplicated and sorted, so two sets requested in a different order compare
/// equal and serialize identically inside cached token sets.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		normalize(scopes).map(Self)
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the normalized set contains the provided scope.
	///
	/// Comparison is ASCII case-insensitive; providers echo scopes back in their own casing
	/// (`mail.read` vs `Mail.Read`).
	pub fn contains(&self, scope: &str) -> bool {
		self.0.iter().any(|candidate| candidate.eq_ignore_ascii_case(scope))
	}

	/// Returns true if every scope in `other` is also present in `self`.
	pub fn is_superset_of(&self, other: &ScopeSet) -> bool {
		other.iter().all(|scope| self.contains(scope))
	}

	/// Scopes from `requested` that are absent from `self`.
	pub fn missing_from(&self, requested: &ScopeSet) -> Vec<String> {
		requested.iter().filter(|scope| !self.contains(scope)).map(ToOwned::to_owned).collect()
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Returns the normalized string representation (space-delimited).
	pub fn normalized(&self) -> String {
		self.0.join(" ")
	}

	/// Returns the underlying slice of scope strings.
	pub fn as_slice(&self) -> &[String] {
		&self.0
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<ScopeSet> for Vec<String> {
	fn from(value: ScopeSet) -> Self {
		value.0.to_vec()
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}

fn normalize<I, S>(scopes: I) -> Result<Arc<[String]>, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for scope in scopes {
		let owned: String = scope.into();

		if owned.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if owned.chars().any(char::is_whitespace) {
			return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_normalize_order_and_duplicates() {
		let lhs = ScopeSet::new(["Mail.Read", "openid", "Mail.Read"])
			.expect("Left-hand scope set should be valid.");
		let rhs =
			ScopeSet::new(["openid", "Mail.Read"]).expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.normalized(), "Mail.Read openid");
	}

	#[test]
	fn scopes_reject_whitespace_and_empty_entries() {
		let err = ScopeSet::new([" profile "]).expect_err("Padded scopes must be rejected.");

		assert!(matches!(err, ScopeValidationError::ContainsWhitespace { .. }));
		assert!(ScopeSet::new([""]).is_err());
		assert!(ScopeSet::from_str("").is_ok(), "Empty string represents an empty scope set.");
		assert!(ScopeSet::from_str("   ").is_err(), "Whitespace-only input must be rejected.");
	}

	#[test]
	fn superset_checks_ignore_provider_casing() {
		let granted = ScopeSet::from_str("mail.read openid profile User.Read")
			.expect("Granted scope string should parse.");
		let requested = ScopeSet::from_str("Mail.Read").expect("Requested scope should parse.");
		let broader =
			ScopeSet::from_str("Mail.Read Sites.Read.All").expect("Broader scope should parse.");

		assert!(granted.is_superset_of(&requested));
		assert!(!granted.is_superset_of(&broader));
		assert_eq!(granted.missing_from(&broader), vec!["Sites.Read.All".to_string()]);
	}

	#[test]
	fn serde_uses_plain_string_lists() {
		let scopes = ScopeSet::from_str("openid Mail.Read").expect("Scope string should parse.");
		let json = serde_json::to_string(&scopes).expect("Scope set should serialize.");

		assert_eq!(json, "[\"Mail.Read\",\"openid\"]");
		assert!(serde_json::from_str::<ScopeSet>("[\"bad scope\"]").is_err());
	}
}
