use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::options::seconds;

pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows and columns of a pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalGeometry {
	pub rows: u32,
	pub cols: u32,
}

impl TerminalGeometry {
	pub fn new(rows: u32, cols: u32) -> Self {
		Self { rows, cols }
	}
}

/// Data part of a remote shell's terminal configuration.
///
/// The callback part (`writeFn`, `setReadFn`, ...) is supplied separately as a
/// trait object since it cannot travel through serde.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TerminalOptions {
	pub rows: u32,
	pub cols: u32,
	#[serde(default)]
	pub timeout_seconds: Option<f64>,
}

impl TerminalOptions {
	pub fn new(rows: u32, cols: u32) -> Self {
		Self {
			rows,
			cols,
			timeout_seconds: None,
		}
	}

	pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
		let options: Self = serde_json::from_value(value)?;
		options.validate()?;
		Ok(options)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if let Some(secs) = self.timeout_seconds {
			seconds("timeoutSeconds", secs)?;
		}
		Ok(())
	}

	pub fn geometry(&self) -> TerminalGeometry {
		TerminalGeometry::new(self.rows, self.cols)
	}

	/// Connect and handshake bound; the default when unset or unusable.
	pub fn timeout(&self) -> Duration {
		self.timeout_seconds
			.and_then(|secs| seconds("timeoutSeconds", secs).ok())
			.unwrap_or(DEFAULT_SHELL_TIMEOUT)
	}
}

/// Step of a remote shell session a failure is attributed to.
///
/// Rendered as the prefix of lines written to `writeErrorFn`, e.g.
/// `Dial Error: connection refused\r\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellStage {
	Dial,
	Connection,
	Session,
	Stdin,
	PseudoTerminal,
	Shell,
	Wait,
	WriteInput,
	WindowChange,
}

impl ShellStage {
	pub fn label(self) -> &'static str {
		match self {
			Self::Dial => "Dial",
			Self::Connection => "SSH Connection",
			Self::Session => "SSH Session",
			Self::Stdin => "SSH Stdin",
			Self::PseudoTerminal => "Pseudo Terminal",
			Self::Shell => "Shell",
			Self::Wait => "Wait",
			Self::WriteInput => "Write Input",
			Self::WindowChange => "Window Change",
		}
	}

	/// Formats a terminal error line for this stage.
	pub fn report(self, reason: impl fmt::Display) -> String {
		format!("{} Error: {}\r\n", self.label(), reason)
	}
}

impl fmt::Display for ShellStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}
