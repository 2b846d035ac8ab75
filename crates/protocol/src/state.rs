use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the network engine, relayed verbatim to the caller.
///
/// Transitions are driven by the engine alone:
/// `NoState -> Starting -> {NeedsLogin, NeedsMachineAuth, Running} -> Stopped`,
/// with `InUseOtherUser` as a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendState {
	NoState,
	InUseOtherUser,
	NeedsLogin,
	NeedsMachineAuth,
	Stopped,
	Starting,
	Running,
}

impl BackendState {
	pub const ALL: [BackendState; 7] = [
		Self::NoState,
		Self::InUseOtherUser,
		Self::NeedsLogin,
		Self::NeedsMachineAuth,
		Self::Stopped,
		Self::Starting,
		Self::Running,
	];

	/// Name delivered to `notifyState`.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::NoState => "NoState",
			Self::InUseOtherUser => "InUseOtherUser",
			Self::NeedsLogin => "NeedsLogin",
			Self::NeedsMachineAuth => "NeedsMachineAuth",
			Self::Stopped => "Stopped",
			Self::Starting => "Starting",
			Self::Running => "Running",
		}
	}

	/// Maps the engine's numeric state code, `None` for codes this build does not know.
	pub fn from_code(code: i32) -> Option<Self> {
		usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
	}

	pub fn code(self) -> i32 {
		self as i32
	}
}

impl fmt::Display for BackendState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
