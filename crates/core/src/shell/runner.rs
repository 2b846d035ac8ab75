use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tsbridge_protocol::{ShellStage, TerminalOptions, join_host_port};
use tsbridge_runtime::{Error, Network, NetworkEngine, guarded};

use super::term::{DoneGuard, Terminal};
use super::{
	Command, Milestone, ShellChannel, ShellClient, ShellConnector, ShellEvent, ShellInput, ShellSession, ShellState, Shared, TerminalCallbacks,
	TerminalConfig,
};
use crate::registry::{SessionId, SessionKind, SessionRegistry};

const SSH_PORT: u16 = 22;
const TERM: &str = "xterm";
/// Stand-in deadline when the timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Failure of a session step, reported to the host as `"<stage> Error: <reason>"`.
struct Failure {
	stage: ShellStage,
	reason: String,
}

impl Failure {
	fn new(stage: ShellStage, reason: impl fmt::Display) -> Self {
		Self {
			stage,
			reason: reason.to_string(),
		}
	}
}

pub(crate) struct ShellTask {
	pub(crate) engine: Arc<dyn NetworkEngine>,
	pub(crate) connector: Arc<dyn ShellConnector>,
	pub(crate) registry: Arc<SessionRegistry>,
}

impl ShellTask {
	/// Registers a session and starts its task; returns without waiting on the network.
	pub(crate) fn spawn(self, host: &str, username: &str, config: TerminalConfig, handle: &Handle) -> ShellSession {
		let addr = join_host_port(host, SSH_PORT);
		let cancel = CancellationToken::new();
		let id = self.registry.register(SessionKind::Shell, &addr, cancel.clone());
		let shared = Arc::new(Mutex::new(Shared {
			state: ShellState::Created,
			pending_geometry: None,
			close_requested: false,
		}));
		let (tx, rx) = mpsc::unbounded_channel();

		let runner = Runner {
			id,
			host: host.to_string(),
			addr,
			username: username.to_string(),
			options: config.options,
			term: Terminal::new(id, Arc::clone(&config.callbacks)),
			callbacks: config.callbacks,
			engine: self.engine,
			connector: self.connector,
			shared: Arc::clone(&shared),
			input: ShellInput { tx: tx.clone() },
			rx,
		};
		handle.spawn(runner.run(self.registry, cancel.clone()));

		ShellSession::new(id, shared, tx, cancel)
	}
}

/// Session for a bridge whose engine never started: reports and finishes at once.
pub(crate) fn spawn_unavailable(config: TerminalConfig, handle: &Handle) -> ShellSession {
	let shared = Arc::new(Mutex::new(Shared {
		state: ShellState::Failed,
		pending_geometry: None,
		close_requested: false,
	}));
	let (tx, _) = mpsc::unbounded_channel();
	let callbacks = config.callbacks;
	handle.spawn(async move {
		let _done = DoneGuard::new(0, Arc::clone(&callbacks));
		Terminal::new(0, callbacks).report(ShellStage::Dial, Error::EngineUnavailable);
	});
	ShellSession::new(0, shared, tx, CancellationToken::new())
}

struct Runner {
	id: SessionId,
	host: String,
	addr: String,
	username: String,
	options: TerminalOptions,
	term: Terminal,
	callbacks: Arc<dyn TerminalCallbacks>,
	engine: Arc<dyn NetworkEngine>,
	connector: Arc<dyn ShellConnector>,
	shared: Arc<Mutex<Shared>>,
	input: ShellInput,
	rx: mpsc::UnboundedReceiver<Command>,
}

impl Runner {
	async fn run(mut self, registry: Arc<SessionRegistry>, cancel: CancellationToken) {
		let _done = DoneGuard::new(self.id, Arc::clone(&self.callbacks));

		let result = tokio::select! {
			_ = cancel.cancelled() => {
				debug!(target = "tsbridge", session = self.id, "shell session aborted");
				Ok(())
			}
			res = self.drive() => res,
		};

		let end = match result {
			Ok(()) => ShellState::Closed,
			Err(failure) => {
				warn!(target = "tsbridge", session = self.id, stage = %failure.stage, reason = %failure.reason, "shell session failed");
				self.term.report(failure.stage, &failure.reason);
				ShellState::Failed
			}
		};
		self.set_state(end);
		registry.remove(self.id);
		info!(target = "tsbridge", session = self.id, addr = %self.addr, state = ?end, "shell session ended");
	}

	fn set_state(&self, state: ShellState) {
		self.shared.lock().state = state;
		debug!(target = "tsbridge", session = self.id, ?state, "shell state");
	}

	async fn drive(&mut self) -> Result<(), Failure> {
		let timeout = self.options.timeout();
		let now = Instant::now();
		let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);

		self.set_state(ShellState::Dialing);
		self.term.progress(&format!("Connecting to {}…", first_label(&self.host)));
		let conn = match timeout_at(deadline, self.engine.dial(Network::Tcp, &self.addr, timeout)).await {
			Ok(Ok(conn)) => conn,
			Ok(Err(err)) => return Err(Failure::new(ShellStage::Dial, err)),
			Err(_) => return Err(Failure::new(ShellStage::Dial, format!("dial {} timed out after {:?}", self.addr, timeout))),
		};

		self.set_state(ShellState::Authenticating);
		self.term.progress("Starting SSH client…");
		let established = self.established_hook();
		let mut client = match timeout_at(deadline, self.connector.connect(conn, &self.host, &self.username, established)).await {
			Ok(Ok(client)) => client,
			Ok(Err(err)) => return Err(Failure::new(ShellStage::Connection, err)),
			Err(_) => return Err(Failure::new(ShellStage::Connection, "handshake timed out")),
		};

		let result = self.run_session(client.as_mut()).await;
		client.disconnect().await;
		result
	}

	async fn run_session(&mut self, client: &mut dyn ShellClient) -> Result<(), Failure> {
		let mut channel = client.open_session().await.map_err(|e| Failure::new(ShellStage::Session, e))?;
		self.set_state(ShellState::SessionOpen);

		if let Err(fault) = self.term.set_read(self.input.clone()) {
			let _ = channel.close().await;
			return Err(Failure::new(ShellStage::Stdin, fault));
		}

		let geometry = {
			let mut shared = self.shared.lock();
			if shared.close_requested {
				None
			} else {
				shared.state = ShellState::PtyRequested;
				Some(shared.pending_geometry.take().unwrap_or_else(|| self.options.geometry()))
			}
		};
		let Some(geometry) = geometry else {
			return self.close_early(channel.as_mut()).await;
		};
		debug!(target = "tsbridge", session = self.id, rows = geometry.rows, cols = geometry.cols, "requesting pty");
		channel
			.request_pty(TERM, geometry)
			.await
			.map_err(|e| Failure::new(ShellStage::PseudoTerminal, e))?;
		if self.shared.lock().close_requested {
			return self.close_early(channel.as_mut()).await;
		}
		channel.request_shell().await.map_err(|e| Failure::new(ShellStage::Shell, e))?;

		let closing = {
			let mut shared = self.shared.lock();
			if !shared.close_requested {
				shared.state = ShellState::ShellRunning;
			}
			shared.close_requested
		};
		if closing {
			return self.close_early(channel.as_mut()).await;
		}
		debug!(target = "tsbridge", session = self.id, state = ?ShellState::ShellRunning, "shell state");
		self.term.connected();
		info!(target = "tsbridge", session = self.id, addr = %self.addr, "shell running");

		self.wait(channel.as_mut()).await
	}

	/// Host closed the session before the shell was running; `on_connected` never fires.
	async fn close_early(&mut self, channel: &mut dyn ShellChannel) -> Result<(), Failure> {
		debug!(target = "tsbridge", session = self.id, "closed before shell start");
		if let Err(err) = channel.close().await {
			debug!(target = "tsbridge", session = self.id, error = %err, "channel close failed");
		}
		Ok(())
	}

	/// Pumps host commands and shell output until the shell ends or the host closes it.
	async fn wait(&mut self, channel: &mut dyn ShellChannel) -> Result<(), Failure> {
		let mut exit_status = None;
		loop {
			tokio::select! {
				cmd = self.rx.recv() => match cmd {
					Some(Command::Input(data)) => {
						if let Err(err) = channel.send_input(&data).await {
							self.term.report(ShellStage::WriteInput, err);
						}
					}
					Some(Command::Resize(geometry)) => {
						if let Err(err) = channel.window_change(geometry).await {
							self.term.report(ShellStage::WindowChange, err);
						}
					}
					Some(Command::Close) | None => {
						if let Err(err) = channel.close().await {
							debug!(target = "tsbridge", session = self.id, error = %err, "channel close failed");
						}
						return Ok(());
					}
				},
				event = channel.next_event() => match event {
					Some(ShellEvent::Stdout(data)) => self.term.stdout(&data),
					Some(ShellEvent::Stderr(data)) => self.term.stderr(&data),
					Some(ShellEvent::ExitStatus(code)) => exit_status = Some(code),
					Some(ShellEvent::Eof) => {}
					None => break,
				},
			}
		}

		match exit_status {
			Some(0) => Ok(()),
			Some(code) => Err(Failure::new(ShellStage::Wait, format!("Process exited with status {code}"))),
			None => Err(Failure::new(
				ShellStage::Wait,
				"remote command exited without exit status or exit signal",
			)),
		}
	}

	fn established_hook(&self) -> Milestone {
		let callbacks = Arc::clone(&self.callbacks);
		let id = self.id;
		Arc::new(move || {
			if let Err(fault) = guarded("onConnectionProgress", || callbacks.on_connection_progress("SSH connection established…")) {
				warn!(target = "tsbridge", session = id, error = %fault, "progress callback panicked");
			}
		})
	}
}

fn first_label(host: &str) -> &str {
	host.split('.').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn progress_uses_first_dns_label() {
		assert_eq!(first_label("db.corp.ts.net"), "db");
		assert_eq!(first_label("db"), "db");
		assert_eq!(first_label("100.64.0.2"), "100");
	}
}
