use serde::Deserialize;
use serde::Serialize;

use crate::PrexError;
use crate::PrexResult;

/// Default cap on recursive identifier substitution, both for textual
/// replacement in output lines and for define references inside expressions.
pub const DEFAULT_SUBSTITUTION_DEPTH: usize = 32;

/// Behavioural options for a preprocessor instance.
///
/// Options are fixed at construction. The delimiter is the single character
/// that introduces a directive (`#` by default); implicit substitution
/// controls whether bare words in output text are replaced with their
/// defined values (explicit `$(NAME)` forms are always replaced).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PrexOptions {
	/// The directive prefix character.
	pub delimiter: char,
	/// Whether bare identifiers in output text are substituted.
	pub implicit_substitution: bool,
	/// Maximum recursion depth for substitution and define resolution.
	pub max_substitution_depth: usize,
}

impl Default for PrexOptions {
	fn default() -> Self {
		Self {
			delimiter: '#',
			implicit_substitution: true,
			max_substitution_depth: DEFAULT_SUBSTITUTION_DEPTH,
		}
	}
}

impl PrexOptions {
	/// Check that the options are usable.
	pub fn validate(&self) -> PrexResult<()> {
		if self.delimiter.is_whitespace() {
			return Err(PrexError::InvalidDelimiter(self.delimiter));
		}
		Ok(())
	}
}
