mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::MemoryEngine;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tsbridge::shell::{Milestone, ShellChannel, ShellClient, ShellError, ShellEvent};
use tsbridge::{
	Bridge, BridgeConfig, NetworkEngine, ShellConnector, ShellInput, ShellSession, ShellState, TerminalCallbacks, TerminalConfig, TerminalGeometry,
	TerminalOptions,
};
use tsbridge_runtime::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
	Write(String),
	Error(String),
	Progress(String),
	Connected,
	Done,
}

/// Terminal hooks recording every call in order.
struct Screen {
	tx: mpsc::UnboundedSender<Seen>,
	input: Mutex<Option<ShellInput>>,
}

impl Screen {
	fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Seen>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Arc::new(Self { tx, input: Mutex::new(None) }), rx)
	}

	fn input(&self) -> ShellInput {
		self.input.lock().clone().expect("set_read was never called")
	}
}

impl TerminalCallbacks for Screen {
	fn write(&self, data: &str) {
		let _ = self.tx.send(Seen::Write(data.to_string()));
	}

	fn write_error(&self, message: &str) {
		let _ = self.tx.send(Seen::Error(message.to_string()));
	}

	fn set_read(&self, input: ShellInput) {
		*self.input.lock() = Some(input);
	}

	fn on_connection_progress(&self, message: &str) {
		let _ = self.tx.send(Seen::Progress(message.to_string()));
	}

	fn on_connected(&self) {
		let _ = self.tx.send(Seen::Connected);
	}

	fn on_done(&self) {
		let _ = self.tx.send(Seen::Done);
	}
}

/// What the fake server saw.
#[derive(Default)]
struct ServerLog {
	users: Vec<String>,
	ptys: Vec<(String, TerminalGeometry)>,
	shells: usize,
	input: Vec<u8>,
	resizes: Vec<TerminalGeometry>,
	closed: bool,
}

/// Scripted SSH server reached through the memory engine.
struct FakeSsh {
	log: Arc<Mutex<ServerLog>>,
	events: Mutex<Option<mpsc::UnboundedReceiver<ShellEvent>>>,
	gate: Arc<Semaphore>,
	pty_gate: Arc<Semaphore>,
	reject_auth: bool,
	fail_input: bool,
	fail_resize: bool,
}

impl FakeSsh {
	fn new() -> (Arc<Self>, mpsc::UnboundedSender<ShellEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let ssh = Self {
			log: Arc::default(),
			events: Mutex::new(Some(rx)),
			gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
			pty_gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
			reject_auth: false,
			fail_input: false,
			fail_resize: false,
		};
		(Arc::new(ssh), tx)
	}

	/// Holds the handshake until [`open`](Self::open) is called.
	fn gated(mut self: Arc<Self>) -> Arc<Self> {
		Arc::get_mut(&mut self).expect("fake shared too early").gate = Arc::new(Semaphore::new(0));
		self
	}

	fn open(&self) {
		self.gate.add_permits(1);
	}

	/// Holds the pty request until [`grant_pty`](Self::grant_pty) is called.
	fn pty_gated(mut self: Arc<Self>) -> Arc<Self> {
		Arc::get_mut(&mut self).expect("fake shared too early").pty_gate = Arc::new(Semaphore::new(0));
		self
	}

	fn grant_pty(&self) {
		self.pty_gate.add_permits(1);
	}

	fn log(&self) -> parking_lot::MutexGuard<'_, ServerLog> {
		self.log.lock()
	}
}

#[async_trait]
impl ShellConnector for FakeSsh {
	async fn connect(
		&self,
		_conn: Connection,
		_host: &str,
		username: &str,
		established: Milestone,
	) -> Result<Box<dyn ShellClient>, ShellError> {
		established();
		let permit = self.gate.acquire().await.map_err(|_| ShellError::ChannelClosed)?;
		permit.forget();
		if self.reject_auth {
			return Err(ShellError::Rejected("authentication"));
		}
		self.log.lock().users.push(username.to_string());
		let events = self.events.lock().take().ok_or(ShellError::ChannelClosed)?;
		Ok(Box::new(FakeClient {
			log: Arc::clone(&self.log),
			events: Some(events),
			pty_gate: Arc::clone(&self.pty_gate),
			fail_input: self.fail_input,
			fail_resize: self.fail_resize,
		}))
	}
}

struct FakeClient {
	log: Arc<Mutex<ServerLog>>,
	events: Option<mpsc::UnboundedReceiver<ShellEvent>>,
	pty_gate: Arc<Semaphore>,
	fail_input: bool,
	fail_resize: bool,
}

#[async_trait]
impl ShellClient for FakeClient {
	async fn open_session(&mut self) -> Result<Box<dyn ShellChannel>, ShellError> {
		let events = self.events.take().ok_or(ShellError::Rejected("second session"))?;
		Ok(Box::new(FakeChannel {
			log: Arc::clone(&self.log),
			events,
			pty_gate: Arc::clone(&self.pty_gate),
			fail_input: self.fail_input,
			fail_resize: self.fail_resize,
		}))
	}

	async fn disconnect(&mut self) {}
}

struct FakeChannel {
	log: Arc<Mutex<ServerLog>>,
	events: mpsc::UnboundedReceiver<ShellEvent>,
	pty_gate: Arc<Semaphore>,
	fail_input: bool,
	fail_resize: bool,
}

#[async_trait]
impl ShellChannel for FakeChannel {
	async fn request_pty(&mut self, term: &str, geometry: TerminalGeometry) -> Result<(), ShellError> {
		let permit = self.pty_gate.acquire().await.map_err(|_| ShellError::ChannelClosed)?;
		permit.forget();
		self.log.lock().ptys.push((term.to_string(), geometry));
		Ok(())
	}

	async fn request_shell(&mut self) -> Result<(), ShellError> {
		self.log.lock().shells += 1;
		Ok(())
	}

	async fn send_input(&mut self, data: &[u8]) -> Result<(), ShellError> {
		if self.fail_input {
			return Err(ShellError::ChannelClosed);
		}
		self.log.lock().input.extend_from_slice(data);
		Ok(())
	}

	async fn window_change(&mut self, geometry: TerminalGeometry) -> Result<(), ShellError> {
		if self.fail_resize {
			return Err(ShellError::ChannelClosed);
		}
		self.log.lock().resizes.push(geometry);
		Ok(())
	}

	async fn next_event(&mut self) -> Option<ShellEvent> {
		self.events.recv().await
	}

	async fn close(&mut self) -> Result<(), ShellError> {
		self.log.lock().closed = true;
		self.events.close();
		Ok(())
	}
}

fn bridge(engine: &Arc<MemoryEngine>, ssh: &Arc<FakeSsh>) -> Bridge {
	Bridge::new(
		Arc::clone(engine) as Arc<dyn NetworkEngine>,
		BridgeConfig::default(),
		Handle::current(),
	)
	.with_shell_connector(Arc::clone(ssh) as Arc<dyn ShellConnector>)
}

fn terminal(screen: &Arc<Screen>) -> TerminalConfig {
	TerminalConfig::new(TerminalOptions::new(24, 80), Arc::clone(screen) as Arc<dyn TerminalCallbacks>)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
	tokio::time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("terminal went quiet")
		.expect("screen dropped")
}

/// Reads until `want` shows up, returning everything seen before it.
async fn until(rx: &mut mpsc::UnboundedReceiver<Seen>, want: Seen) -> Vec<Seen> {
	let mut before = Vec::new();
	loop {
		let seen = next(rx).await;
		if seen == want {
			return before;
		}
		before.push(seen);
	}
}

async fn settle(session: &ShellSession) {
	tokio::time::timeout(Duration::from_secs(2), async {
		while !session.state().is_terminal() {
			tokio::task::yield_now().await;
		}
	})
	.await
	.expect("session never ended");
}

#[tokio::test]
async fn progress_messages_follow_the_handshake() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web.corp.ts.net:22");
	let (ssh, _events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();

	let _session = bridge(&engine, &ssh).ssh("web.corp.ts.net", "alice", terminal(&screen));

	let before = until(&mut seen, Seen::Connected).await;
	assert_eq!(
		before,
		vec![
			Seen::Progress("Connecting to web…".into()),
			Seen::Progress("Starting SSH client…".into()),
			Seen::Progress("SSH connection established…".into()),
		]
	);
	assert_eq!(ssh.log().users, vec!["alice".to_string()]);
	assert_eq!(ssh.log().ptys, vec![("xterm".to_string(), TerminalGeometry::new(24, 80))]);
	assert_eq!(ssh.log().shells, 1);
}

#[tokio::test]
async fn resize_before_ready_sets_the_pty_geometry() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let ssh = ssh.gated();
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	session.resize(50, 132).unwrap();
	ssh.open();

	until(&mut seen, Seen::Connected).await;
	assert_eq!(ssh.log().ptys, vec![("xterm".to_string(), TerminalGeometry::new(50, 132))]);
	assert!(ssh.log().resizes.is_empty());

	session.resize(60, 200).unwrap();
	tokio::time::timeout(Duration::from_secs(2), async {
		while ssh.log().resizes.is_empty() {
			tokio::task::yield_now().await;
		}
	})
	.await
	.expect("window change never sent");
	assert_eq!(ssh.log().resizes, vec![TerminalGeometry::new(60, 200)]);
}

#[tokio::test]
async fn output_is_written_with_crlf_line_endings() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;

	events.send(ShellEvent::Stdout(b"total 0\nfile\r\n".to_vec())).unwrap();
	// "é" split across two reads.
	events.send(ShellEvent::Stdout(vec![b'c', b'a', b'f', 0xc3])).unwrap();
	events.send(ShellEvent::Stdout(vec![0xa9, b'\n'])).unwrap();
	events.send(ShellEvent::Stderr(b"warn\n".to_vec())).unwrap();
	events.send(ShellEvent::ExitStatus(0)).unwrap();
	drop(events);

	let written = until(&mut seen, Seen::Done).await;
	let text: String = written
		.iter()
		.map(|s| match s {
			Seen::Write(text) => text.as_str(),
			other => panic!("unexpected {other:?}"),
		})
		.collect();
	assert_eq!(text, "total 0\r\nfile\r\ncafé\r\nwarn\r\n");

	settle(&session).await;
	assert_eq!(session.state(), ShellState::Closed);
}

#[tokio::test]
async fn nonzero_exit_is_a_wait_error() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;

	events.send(ShellEvent::ExitStatus(3)).unwrap();
	drop(events);

	let before = until(&mut seen, Seen::Done).await;
	assert_eq!(before, vec![Seen::Error("Wait Error: Process exited with status 3\r\n".into())]);
	settle(&session).await;
	assert_eq!(session.state(), ShellState::Failed);
	assert!(seen.try_recv().is_err(), "onDone fired more than once");
}

#[tokio::test]
async fn missing_exit_status_is_a_wait_error() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();

	let _session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;
	drop(events);

	let before = until(&mut seen, Seen::Done).await;
	assert_eq!(before.len(), 1);
	assert!(matches!(&before[0], Seen::Error(line) if line.starts_with("Wait Error: ")));
}

#[tokio::test]
async fn dial_failure_reports_and_finishes_once() {
	let engine = MemoryEngine::new();
	let (ssh, _events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();
	let bridge = bridge(&engine, &ssh);

	let session = bridge.ssh("nowhere", "alice", terminal(&screen));

	let before = until(&mut seen, Seen::Done).await;
	assert_eq!(before[0], Seen::Progress("Connecting to nowhere…".into()));
	assert!(matches!(before.last(), Some(Seen::Error(line)) if line.starts_with("Dial Error: ") && line.ends_with("\r\n")));
	settle(&session).await;
	assert_eq!(session.state(), ShellState::Failed);
	assert!(seen.try_recv().is_err());
	assert_eq!(bridge.live_sessions(), 0);
}

#[tokio::test]
async fn auth_failure_reports_a_connection_error() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let mut ssh = ssh;
	Arc::get_mut(&mut ssh).unwrap().reject_auth = true;
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "mallory", terminal(&screen));

	let before = until(&mut seen, Seen::Done).await;
	assert_eq!(
		before.last(),
		Some(&Seen::Error("SSH Connection Error: server rejected authentication\r\n".into()))
	);
	assert!(!before.contains(&Seen::Connected));
	settle(&session).await;
	assert!(seen.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stalled_handshake_times_out() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let ssh = ssh.gated();
	let (screen, mut seen) = Screen::new();

	let options = TerminalOptions {
		timeout_seconds: Some(1.5),
		..TerminalOptions::new(24, 80)
	};
	let _session = bridge(&engine, &ssh).ssh("web", "alice", TerminalConfig::new(options, screen.clone()));

	let before = until(&mut seen, Seen::Done).await;
	assert_eq!(
		before.last(),
		Some(&Seen::Error("SSH Connection Error: handshake timed out\r\n".into()))
	);
}

#[tokio::test]
async fn huge_timeout_does_not_overflow_the_deadline() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();

	let options = TerminalOptions {
		timeout_seconds: Some(1e19),
		..TerminalOptions::new(24, 80)
	};
	options.validate().unwrap();
	let session = bridge(&engine, &ssh).ssh("web", "alice", TerminalConfig::new(options, screen.clone()));

	until(&mut seen, Seen::Connected).await;
	assert_eq!(session.state(), ShellState::ShellRunning);
	session.abort();
	until(&mut seen, Seen::Done).await;
}

#[tokio::test]
async fn input_reaches_the_shell() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();

	let _session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;

	let input = screen.input();
	assert!(input.send("ls -la\r"));
	assert!(input.send_bytes(vec![0x03]));

	tokio::time::timeout(Duration::from_secs(2), async {
		while ssh.log().input.len() < 8 {
			tokio::task::yield_now().await;
		}
	})
	.await
	.expect("input never arrived");
	assert_eq!(ssh.log().input, b"ls -la\r\x03");
}

#[tokio::test]
async fn failed_input_is_reported_and_the_session_continues() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, events) = FakeSsh::new();
	let mut ssh = ssh;
	Arc::get_mut(&mut ssh).unwrap().fail_input = true;
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;

	screen.input().send("x");
	assert_eq!(next(&mut seen).await, Seen::Error("Write Input Error: channel closed\r\n".into()));
	assert_eq!(session.state(), ShellState::ShellRunning);

	events.send(ShellEvent::Stdout(b"still here\n".to_vec())).unwrap();
	assert_eq!(next(&mut seen).await, Seen::Write("still here\r\n".into()));
}

#[tokio::test]
async fn failed_resize_is_reported_and_the_session_continues() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, events) = FakeSsh::new();
	let mut ssh = ssh;
	Arc::get_mut(&mut ssh).unwrap().fail_resize = true;
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;

	session.resize(40, 100).unwrap();
	assert_eq!(next(&mut seen).await, Seen::Error("Window Change Error: channel closed\r\n".into()));
	assert_eq!(session.state(), ShellState::ShellRunning);
	assert!(ssh.log().resizes.is_empty());

	events.send(ShellEvent::Stdout(b"ok\n".to_vec())).unwrap();
	assert_eq!(next(&mut seen).await, Seen::Write("ok\r\n".into()));
}

#[tokio::test]
async fn close_ends_the_session_cleanly() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();
	let bridge = bridge(&engine, &ssh);

	let session = bridge.ssh("web", "alice", terminal(&screen));
	until(&mut seen, Seen::Connected).await;

	session.close().unwrap();
	let before = until(&mut seen, Seen::Done).await;
	assert!(before.is_empty(), "unexpected output {before:?}");
	settle(&session).await;
	assert_eq!(session.state(), ShellState::Closed);
	assert!(ssh.log().closed);
	assert_eq!(bridge.live_sessions(), 0);

	assert!(session.resize(10, 10).is_err());
	session.close().unwrap();
}

#[tokio::test]
async fn close_before_the_session_opens_is_a_no_op() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let ssh = ssh.gated();
	let (screen, mut seen) = Screen::new();

	let session = bridge(&engine, &ssh).ssh("web", "alice", terminal(&screen));
	session.close().unwrap();
	ssh.open();

	until(&mut seen, Seen::Connected).await;
	assert_eq!(session.state(), ShellState::ShellRunning);
	session.abort();
	until(&mut seen, Seen::Done).await;
}

#[tokio::test]
async fn close_during_pty_request_never_starts_the_shell() {
	let engine = MemoryEngine::new();
	let _server = engine.listen("web:22");
	let (ssh, _events) = FakeSsh::new();
	let ssh = ssh.pty_gated();
	let (screen, mut seen) = Screen::new();
	let bridge = bridge(&engine, &ssh);

	let session = bridge.ssh("web", "alice", terminal(&screen));
	tokio::time::timeout(Duration::from_secs(2), async {
		while session.state() != ShellState::PtyRequested {
			tokio::task::yield_now().await;
		}
	})
	.await
	.expect("pty never requested");

	session.close().unwrap();
	ssh.grant_pty();

	let before = until(&mut seen, Seen::Done).await;
	assert!(!before.contains(&Seen::Connected), "connected after close: {before:?}");
	assert!(!before.iter().any(|s| matches!(s, Seen::Error(_))), "unexpected error: {before:?}");
	settle(&session).await;
	assert_eq!(session.state(), ShellState::Closed);
	assert_eq!(ssh.log().shells, 0);
	assert!(ssh.log().closed);
	assert_eq!(bridge.live_sessions(), 0);
}

#[tokio::test]
async fn halted_bridge_fails_shells_immediately() {
	let engine = MemoryEngine::new();
	engine.fail_start("no state directory");
	let (ssh, _events) = FakeSsh::new();
	let (screen, mut seen) = Screen::new();
	let bridge = bridge(&engine, &ssh);

	struct Quiet;
	impl tsbridge::NotifyCallbacks for Quiet {
		fn notify_state(&self, _state: &str) {}
		fn notify_net_map(&self, _net_map_json: &str) {}
		fn notify_browse_to_url(&self, _url: &str) {}
		fn notify_panic_recover(&self, _message: &str) {}
	}
	assert!(bridge.run(Arc::new(Quiet)).await.is_err());

	let session = bridge.ssh("web", "alice", terminal(&screen));
	let before = until(&mut seen, Seen::Done).await;
	assert_eq!(before, vec![Seen::Error("Dial Error: Network engine is unavailable\r\n".into())]);
	assert_eq!(session.state(), ShellState::Failed);
	assert_eq!(engine.dial_count(), 0);
}
