//! In-memory network engine for driving the bridge in tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tsbridge_runtime::{
	Connection, DnsAnswer, EngineError, EngineResult, EngineState, LocalApi, Network, NetworkEngine, Notify, NotifyCallback, StartOptions,
	StateStore,
};

pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Key and value the engine persists on every start.
pub const MACHINE_KEY: &str = "_machinekey";
pub const MACHINE_KEY_VALUE: &[u8] = b"privkey:0102";

/// Engine whose network is a set of in-process listeners.
#[derive(Default)]
pub struct MemoryEngine {
	listeners: Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>,
	blackholes: Mutex<HashSet<String>>,
	dials: AtomicUsize,
	callback: Mutex<Option<NotifyCallback>>,
	state: Mutex<Option<EngineState>>,
	started: Mutex<Option<StartOptions>>,
	start_error: Mutex<Option<String>>,
	logins: AtomicUsize,
	logouts: AtomicUsize,
	local_api_calls: AtomicUsize,
	dns: Arc<StaticDns>,
	state_store: Mutex<Option<Arc<dyn StateStore>>>,
}

impl MemoryEngine {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Accepts connections dialed to `addr`.
	pub fn listen(&self, addr: &str) -> mpsc::UnboundedReceiver<DuplexStream> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.listeners.lock().insert(addr.to_string(), tx);
		rx
	}

	/// Dials to `addr` never complete.
	pub fn blackhole(&self, addr: &str) {
		self.blackholes.lock().insert(addr.to_string());
	}

	pub fn fail_start(&self, message: &str) {
		*self.start_error.lock() = Some(message.to_string());
	}

	pub fn dial_count(&self) -> usize {
		self.dials.load(Ordering::SeqCst)
	}

	pub fn started_with(&self) -> Option<StartOptions> {
		self.started.lock().clone()
	}

	pub fn logins(&self) -> usize {
		self.logins.load(Ordering::SeqCst)
	}

	pub fn logouts(&self) -> usize {
		self.logouts.load(Ordering::SeqCst)
	}

	pub fn local_api_calls(&self) -> usize {
		self.local_api_calls.load(Ordering::SeqCst)
	}

	pub fn state_store(&self) -> Option<Arc<dyn StateStore>> {
		self.state_store.lock().clone()
	}

	pub fn dns(&self) -> &StaticDns {
		&self.dns
	}

	pub fn emit(&self, notify: Notify) {
		if let Some(callback) = self.callback.lock().as_ref() {
			callback(notify);
		}
	}
}

#[async_trait]
impl NetworkEngine for MemoryEngine {
	async fn dial(&self, _network: Network, address: &str, _timeout: Duration) -> EngineResult<Connection> {
		self.dials.fetch_add(1, Ordering::SeqCst);
		if self.blackholes.lock().contains(address) {
			std::future::pending::<()>().await;
		}
		let listener = self.listeners.lock().get(address).cloned();
		let Some(listener) = listener else {
			return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into());
		};
		let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
		listener
			.send(remote)
			.map_err(|_| EngineError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "listener gone")))?;
		Ok(Connection::new(local, address))
	}

	async fn start(&self, options: StartOptions) -> EngineResult<()> {
		*self.started.lock() = Some(options);
		if let Some(message) = self.start_error.lock().clone() {
			return Err(EngineError::Backend(message));
		}
		let store = self.state_store().ok_or(EngineError::Unsupported("start without a state store"))?;
		store
			.write_state(MACHINE_KEY, MACHINE_KEY_VALUE)
			.map_err(|err| EngineError::Backend(err.to_string()))?;
		*self.state.lock() = Some(EngineState::STARTING);
		self.emit(Notify::state(EngineState::STARTING));
		*self.state.lock() = Some(EngineState::RUNNING);
		self.emit(Notify::state(EngineState::RUNNING));
		Ok(())
	}

	fn set_notify_callback(&self, callback: NotifyCallback) {
		*self.callback.lock() = Some(callback);
	}

	fn set_state_store(&self, store: Arc<dyn StateStore>) {
		*self.state_store.lock() = Some(store);
	}

	async fn login_interactive(&self) -> EngineResult<()> {
		self.logins.fetch_add(1, Ordering::SeqCst);
		self.emit(Notify::browse_to("https://login.example/a/xyz"));
		Ok(())
	}

	async fn logout(&self) -> EngineResult<()> {
		self.logouts.fetch_add(1, Ordering::SeqCst);
		*self.state.lock() = Some(EngineState::NEEDS_LOGIN);
		self.emit(Notify::state(EngineState::NEEDS_LOGIN));
		Ok(())
	}

	fn state(&self) -> EngineState {
		self.state.lock().unwrap_or(EngineState::NO_STATE)
	}

	fn local_api(&self) -> EngineResult<Arc<dyn LocalApi>> {
		self.local_api_calls.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::clone(&self.dns) as Arc<dyn LocalApi>)
	}
}

/// Local control client answering every query with the same message.
#[derive(Default)]
pub struct StaticDns {
	hang: std::sync::atomic::AtomicBool,
	queries: Mutex<Vec<(String, String)>>,
}

impl StaticDns {
	pub const ANSWER: &'static [u8] = &[0x12, 0x34, 0x81, 0x80];
	pub const RESOLVER: &'static str = "100.100.100.100:53";

	pub fn hang(&self) {
		self.hang.store(true, Ordering::SeqCst);
	}

	pub fn queries(&self) -> Vec<(String, String)> {
		self.queries.lock().clone()
	}
}

#[async_trait]
impl LocalApi for StaticDns {
	async fn query_dns(&self, name: &str, query_type: &str) -> EngineResult<DnsAnswer> {
		self.queries.lock().push((name.to_string(), query_type.to_string()));
		if self.hang.load(Ordering::SeqCst) {
			std::future::pending::<()>().await;
		}
		Ok(DnsAnswer {
			message: Self::ANSWER.to_vec(),
			resolvers: vec![Self::RESOLVER.to_string()],
		})
	}
}

/// Read sink forwarding every chunk to a channel.
pub fn channel_sink() -> (Arc<dyn tsbridge::ReadSink>, mpsc::UnboundedReceiver<Vec<u8>>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let sink: Arc<dyn tsbridge::ReadSink> = Arc::new(move |bytes: &[u8]| {
		let _ = tx.send(bytes.to_vec());
	});
	(sink, rx)
}

/// Collects chunks from `rx` until `len` bytes have arrived.
pub async fn collect(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>, len: usize) -> Vec<u8> {
	let mut all = Vec::with_capacity(len);
	while all.len() < len {
		let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
			.await
			.expect("timed out waiting for reads")
			.expect("read sink dropped");
		all.extend(chunk);
	}
	all
}
