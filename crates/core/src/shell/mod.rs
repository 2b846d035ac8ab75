//! Interactive remote shell sessions.
//!
//! A session walks `Created -> Dialing -> Authenticating -> SessionOpen ->
//! PtyRequested -> ShellRunning` and ends in `Closed` or `Failed`. Everything
//! after creation happens on one background task; the host only sees
//! [`TerminalCallbacks`] and the synchronous [`ShellSession`] handle.
//!
//! The SSH protocol itself sits behind [`ShellConnector`], [`ShellClient`] and
//! [`ShellChannel`] so sessions can be driven without a real server.

mod runner;
mod ssh;
mod term;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tsbridge_protocol::{TerminalGeometry, TerminalOptions};
use tsbridge_runtime::{Connection, Error, Result};

pub(crate) use self::runner::{ShellTask, spawn_unavailable};
pub use self::ssh::RusshConnector;
use crate::registry::SessionId;

/// Host-side terminal hooks.
///
/// `write`, `write_error` and `set_read` are required; the progress hooks
/// default to doing nothing.
pub trait TerminalCallbacks: Send + Sync {
	/// Shell output, already translated to `\r\n` line endings.
	fn write(&self, data: &str);

	/// A `"<Stage> Error: <reason>\r\n"` line.
	fn write_error(&self, message: &str);

	/// Receives the handle keystrokes should be sent through.
	fn set_read(&self, input: ShellInput);

	fn on_connection_progress(&self, _message: &str) {}

	fn on_connected(&self) {}

	/// Fires exactly once per session, on every exit path.
	fn on_done(&self) {}
}

/// Terminal options plus the hooks they drive.
#[derive(Clone)]
pub struct TerminalConfig {
	pub options: TerminalOptions,
	pub callbacks: Arc<dyn TerminalCallbacks>,
}

impl TerminalConfig {
	pub fn new(options: TerminalOptions, callbacks: Arc<dyn TerminalCallbacks>) -> Self {
		Self { options, callbacks }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellState {
	Created,
	Dialing,
	Authenticating,
	SessionOpen,
	PtyRequested,
	ShellRunning,
	Closed,
	Failed,
}

impl ShellState {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Closed | Self::Failed)
	}

	/// Whether the pseudo-terminal request has already gone out.
	fn has_pty(self) -> bool {
		matches!(self, Self::PtyRequested | Self::ShellRunning)
	}

	fn has_session(self) -> bool {
		matches!(self, Self::SessionOpen | Self::PtyRequested | Self::ShellRunning)
	}
}

pub(crate) enum Command {
	Input(Vec<u8>),
	Resize(TerminalGeometry),
	Close,
}

/// State shared between the handle and the session task.
pub(crate) struct Shared {
	pub(crate) state: ShellState,
	/// Resize requested before the pty exists, applied once with the pty request.
	pub(crate) pending_geometry: Option<TerminalGeometry>,
	/// Close requested after the session opened; checked at each handshake step.
	pub(crate) close_requested: bool,
}

/// Sends keystrokes to a running shell.
#[derive(Clone)]
pub struct ShellInput {
	tx: mpsc::UnboundedSender<Command>,
}

impl ShellInput {
	/// Queues `data` for the remote shell's stdin. Returns false once the session is gone.
	pub fn send(&self, data: &str) -> bool {
		self.send_bytes(data.as_bytes().to_vec())
	}

	pub fn send_bytes(&self, data: Vec<u8>) -> bool {
		self.tx.send(Command::Input(data)).is_ok()
	}
}

impl fmt::Debug for ShellInput {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShellInput").field("closed", &self.tx.is_closed()).finish()
	}
}

/// Handle returned synchronously by `ssh`.
pub struct ShellSession {
	id: SessionId,
	shared: Arc<Mutex<Shared>>,
	tx: mpsc::UnboundedSender<Command>,
	cancel: CancellationToken,
}

impl ShellSession {
	pub(crate) fn new(id: SessionId, shared: Arc<Mutex<Shared>>, tx: mpsc::UnboundedSender<Command>, cancel: CancellationToken) -> Self {
		Self { id, shared, tx, cancel }
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	pub fn state(&self) -> ShellState {
		self.shared.lock().state
	}

	/// Resizes the terminal.
	///
	/// Before the pty is requested the geometry is remembered and replaces the
	/// one given at creation. Fails once the session has ended.
	pub fn resize(&self, rows: u32, cols: u32) -> Result<()> {
		let geometry = TerminalGeometry::new(rows, cols);
		let mut shared = self.shared.lock();
		if shared.state.is_terminal() {
			return Err(Error::SessionClosed);
		}
		if shared.state.has_pty() {
			return self.tx.send(Command::Resize(geometry)).map_err(|_| Error::SessionClosed);
		}
		shared.pending_geometry = Some(geometry);
		Ok(())
	}

	/// Closes the shell.
	///
	/// A no-op before the SSH session is open and after it has ended.
	pub fn close(&self) -> Result<()> {
		{
			let mut shared = self.shared.lock();
			if !shared.state.has_session() {
				return Ok(());
			}
			shared.close_requested = true;
		}
		// The task may finish between the check and the send; that is a close too.
		let _ = self.tx.send(Command::Close);
		Ok(())
	}

	/// Tears the session down at any state, including mid-handshake.
	pub fn abort(&self) {
		self.cancel.cancel();
	}
}

impl fmt::Debug for ShellSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShellSession").field("id", &self.id).field("state", &self.state()).finish()
	}
}

#[derive(Debug, Error)]
pub enum ShellError {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Ssh(String),

	#[error("server rejected {0}")]
	Rejected(&'static str),

	#[error("channel closed")]
	ChannelClosed,
}

/// Called when the transport is up, before authentication.
pub type Milestone = Arc<dyn Fn() + Send + Sync>;

/// Output and lifecycle events from a shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
	Stdout(Vec<u8>),
	Stderr(Vec<u8>),
	ExitStatus(u32),
	Eof,
}

/// Performs the SSH handshake over a dialed connection.
#[async_trait]
pub trait ShellConnector: Send + Sync {
	/// Handshakes and authenticates as `username`; `established` fires once the
	/// server's host key has been received.
	async fn connect(
		&self,
		conn: Connection,
		host: &str,
		username: &str,
		established: Milestone,
	) -> std::result::Result<Box<dyn ShellClient>, ShellError>;
}

#[async_trait]
pub trait ShellClient: Send {
	async fn open_session(&mut self) -> std::result::Result<Box<dyn ShellChannel>, ShellError>;

	async fn disconnect(&mut self);
}

#[async_trait]
pub trait ShellChannel: Send {
	async fn request_pty(&mut self, term: &str, geometry: TerminalGeometry) -> std::result::Result<(), ShellError>;

	async fn request_shell(&mut self) -> std::result::Result<(), ShellError>;

	async fn send_input(&mut self, data: &[u8]) -> std::result::Result<(), ShellError>;

	async fn window_change(&mut self, geometry: TerminalGeometry) -> std::result::Result<(), ShellError>;

	/// Next event, `None` once the channel is closed.
	async fn next_event(&mut self) -> Option<ShellEvent>;

	async fn close(&mut self) -> std::result::Result<(), ShellError>;
}
