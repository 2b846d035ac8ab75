use std::error::Error as StdError;

use thiserror::Error;
use tsbridge::ConfigError;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Bridge(#[from] tsbridge::Error),

	#[error("remote shell ended with an error")]
	ShellFailed,

	#[error("engine did not reach Running within {secs}s (last state: {last})")]
	NotRunning { secs: f64, last: String },

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Process exit status: 2 for bad input, 1 for everything else.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::Config(_) => 2,
			CliError::Bridge(err) if err.is_config() => 2,
			_ => 1,
		}
	}

	/// The error followed by each of its causes.
	pub fn chain(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
		std::iter::successors(Some(self as &(dyn StdError + 'static)), |err| (*err).source())
	}
}
