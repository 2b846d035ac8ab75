use thiserror::Error;

/// A request field was missing, ill-typed, or out of range.
///
/// Produced synchronously while parsing options, before any dial happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("{field} is required")]
	Missing { field: &'static str },

	#[error("{field} is invalid: {reason}")]
	Invalid { field: &'static str, reason: String },

	#[error("malformed options: {0}")]
	Malformed(String),
}

impl ConfigError {
	pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
		Self::Invalid {
			field,
			reason: reason.into(),
		}
	}

	/// Name of the offending field, when the error concerns a single one.
	pub fn field(&self) -> Option<&'static str> {
		match self {
			Self::Missing { field } | Self::Invalid { field, .. } => Some(*field),
			Self::Malformed(_) => None,
		}
	}
}

impl From<serde_json::Error> for ConfigError {
	fn from(err: serde_json::Error) -> Self {
		Self::Malformed(err.to_string())
	}
}
