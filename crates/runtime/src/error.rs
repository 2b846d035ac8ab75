//! Error types shared by every bridge operation.

use std::time::Duration;

use thiserror::Error;
use tsbridge_protocol::{ConfigError, ShellStage};

use crate::engine::EngineError;
use crate::sink::HandlerFault;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Malformed or missing request field, detected before any work starts.
	Configuration,
	/// Dial timed out, was refused, or the peer is unreachable.
	Connect,
	/// Handshake or request failure inside an established transport.
	Protocol,
	/// Read or write failure after establishment.
	Io,
	/// A host callback panicked.
	HandlerFault,
	/// The network engine refused or could not run the operation.
	Engine,
	/// The bridge itself lost track of an operation.
	Internal,
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("Invalid configuration: {0}")]
	Config(#[from] ConfigError),

	#[error("Dial {addr} timed out after {timeout:?}")]
	ConnectTimeout { addr: String, timeout: Duration },

	#[error("Dial {addr} failed: {source}")]
	ConnectFailed {
		addr: String,
		#[source]
		source: EngineError,
	},

	/// Shell setup failed at a labeled stage.
	#[error("{stage} Error: {message}")]
	Protocol { stage: ShellStage, message: String },

	#[error("HTTP error: {0}")]
	Http(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Session closed")]
	SessionClosed,

	/// A stream write was issued while another was still in flight.
	#[error("Write already in progress on this session")]
	WriteInProgress,

	#[error("Timeout: {0}")]
	Timeout(String),

	#[error(transparent)]
	HandlerFault(#[from] HandlerFault),

	#[error("Network engine failed to start: {0}")]
	EngineStart(#[source] EngineError),

	#[error("Network engine is unavailable")]
	EngineUnavailable,

	#[error("Engine error: {0}")]
	Engine(#[from] EngineError),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// The background task was dropped before producing a result.
	#[error("Operation aborted before completion")]
	TaskAborted,
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Config(_) => ErrorKind::Configuration,
			Error::ConnectTimeout { .. } | Error::ConnectFailed { .. } => ErrorKind::Connect,
			Error::Protocol { .. } | Error::Http(_) => ErrorKind::Protocol,
			Error::Io(_) | Error::SessionClosed | Error::WriteInProgress | Error::Timeout(_) => ErrorKind::Io,
			Error::HandlerFault(_) => ErrorKind::HandlerFault,
			Error::EngineStart(_) | Error::EngineUnavailable | Error::Engine(_) => ErrorKind::Engine,
			Error::Json(_) | Error::TaskAborted => ErrorKind::Internal,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::ConnectTimeout { .. } | Error::Timeout(_))
	}

	/// Returns true if the request was rejected before any work started.
	pub fn is_config(&self) -> bool {
		matches!(self, Error::Config(_))
	}

	/// Stage label if this is a shell protocol error.
	pub fn stage(&self) -> Option<ShellStage> {
		match self {
			Error::Protocol { stage, .. } => Some(*stage),
			_ => None,
		}
	}

	pub fn protocol(stage: ShellStage, message: impl Into<String>) -> Self {
		Error::Protocol {
			stage,
			message: message.into(),
		}
	}
}
