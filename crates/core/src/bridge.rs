use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tsbridge_protocol::{BridgeConfig, FetchOptions, ResolveResult, TcpOptions};
use tsbridge_runtime::{
	EngineState, Error, HostStateStore, LogPolicyConfig, MemoryStateStore, NetworkEngine, NetworkNotifier, NotifyCallbacks, Pending, StartOptions,
	StateStorage, StateStore, log_policy_config,
};

use crate::registry::SessionRegistry;
use crate::shell::{RusshConnector, ShellConnector, ShellSession, ShellTask, TerminalConfig, spawn_unavailable};
use crate::stream::{self, ReadSink, StreamSession};
use crate::tunnel::{self, FetchResponse, LocalApiSlot, TlsSlot};

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Capability object handed to the host.
///
/// Every operation returns without blocking. Cloning is cheap and clones
/// share the same engine, sessions and notifier.
#[derive(Clone)]
pub struct Bridge {
	inner: Arc<Inner>,
}

struct Inner {
	engine: Arc<dyn NetworkEngine>,
	config: BridgeConfig,
	hostname: String,
	handle: Handle,
	registry: Arc<SessionRegistry>,
	shell_connector: Arc<dyn ShellConnector>,
	state_store: Arc<dyn StateStore>,
	log_policy: Mutex<Option<LogPolicyConfig>>,
	notifier: Mutex<Option<NetworkNotifier>>,
	local_api: LocalApiSlot,
	tls: Arc<TlsSlot>,
	/// Set when the engine failed to start; nothing can work after that.
	halted: AtomicBool,
}

impl Bridge {
	pub fn new(engine: Arc<dyn NetworkEngine>, config: BridgeConfig, handle: Handle) -> Self {
		let hostname = config.hostname_or_generated();
		Self {
			inner: Arc::new(Inner {
				engine,
				config,
				hostname,
				handle,
				registry: Arc::new(SessionRegistry::new()),
				shell_connector: Arc::new(RusshConnector::default()),
				state_store: Arc::new(MemoryStateStore::default()),
				log_policy: Mutex::new(None),
				notifier: Mutex::new(None),
				local_api: LocalApiSlot::default(),
				tls: Arc::new(TlsSlot::default()),
				halted: AtomicBool::new(false),
			}),
		}
	}

	/// Replaces the SSH implementation used by [`ssh`](Self::ssh).
	///
	/// Must be called before the bridge is cloned.
	pub fn with_shell_connector(mut self, connector: Arc<dyn ShellConnector>) -> Self {
		match Arc::get_mut(&mut self.inner) {
			Some(inner) => inner.shell_connector = connector,
			None => warn!(target = "tsbridge", "bridge already shared, keeping existing shell connector"),
		}
		self
	}

	/// Persists engine state through host storage instead of memory.
	///
	/// Values are hex-encoded; an empty string reads as absent. Must be called
	/// before the bridge is cloned.
	pub fn with_state_storage(self, storage: Arc<dyn StateStorage>) -> Self {
		self.with_state_store(Arc::new(HostStateStore::new(storage)))
	}

	/// Replaces the store the engine persists its state in.
	///
	/// Must be called before the bridge is cloned.
	pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
		match Arc::get_mut(&mut self.inner) {
			Some(inner) => inner.state_store = store,
			None => warn!(target = "tsbridge", "bridge already shared, keeping existing state store"),
		}
		self
	}

	/// Log policy loaded or created by [`run`](Self::run).
	pub fn log_policy(&self) -> Option<LogPolicyConfig> {
		self.inner.log_policy.lock().clone()
	}

	/// Node name announced to the control plane.
	pub fn hostname(&self) -> &str {
		&self.inner.hostname
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.inner.config
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.inner.registry
	}

	fn is_halted(&self) -> bool {
		self.inner.halted.load(Ordering::Acquire)
	}

	/// Installs `callbacks` as the notification sinks and starts the engine.
	///
	/// Resolves once the engine has accepted its start preferences. A start
	/// failure is fatal: every later operation rejects with
	/// [`Error::EngineUnavailable`].
	pub fn run(&self, callbacks: Arc<dyn NotifyCallbacks>) -> Pending<()> {
		let notifier = NetworkNotifier::spawn(&self.inner.handle, callbacks);
		self.inner.engine.set_notify_callback(notifier.engine_callback());
		if let Some(previous) = self.inner.notifier.lock().replace(notifier) {
			previous.stop();
		}

		self.inner.engine.set_state_store(Arc::clone(&self.inner.state_store));
		let policy = log_policy_config(self.inner.state_store.as_ref());
		*self.inner.log_policy.lock() = Some(policy);

		let options = StartOptions::from_config(&self.inner.config, self.inner.hostname.clone());
		info!(
			target = "tsbridge",
			hostname = %options.hostname,
			control_url = %options.control_url,
			tags = ?options.advertise_tags,
			route_all = options.route_all,
			"starting network engine"
		);

		let inner = Arc::clone(&self.inner);
		Pending::spawn(&self.inner.handle, async move {
			match inner.engine.start(options).await {
				Ok(()) => {
					inner.halted.store(false, Ordering::Release);
					Ok(())
				}
				Err(err) => {
					error!(target = "tsbridge", error = %err, "network engine failed to start");
					inner.halted.store(true, Ordering::Release);
					Err(Error::EngineStart(err))
				}
			}
		})
	}

	/// Starts interactive login; progress arrives as a browse-to-URL notification.
	pub fn login(&self) {
		if self.is_halted() {
			warn!(target = "tsbridge", "login ignored, network engine unavailable");
			return;
		}
		let engine = Arc::clone(&self.inner.engine);
		self.inner.handle.spawn(async move {
			if let Err(err) = engine.login_interactive().await {
				warn!(target = "tsbridge", error = %err, "interactive login failed");
			}
		});
	}

	pub fn logout(&self) {
		if self.inner.engine.state() == EngineState::NO_STATE {
			warn!(target = "tsbridge", "backend not running");
		}
		let engine = Arc::clone(&self.inner.engine);
		self.inner.handle.spawn(async move {
			match tokio::time::timeout(LOGOUT_TIMEOUT, engine.logout()).await {
				Ok(Ok(())) => info!(target = "tsbridge", "logged out"),
				Ok(Err(err)) => warn!(target = "tsbridge", error = %err, "logout failed"),
				Err(_) => warn!(target = "tsbridge", timeout = ?LOGOUT_TIMEOUT, "logout timed out"),
			}
		});
	}

	/// Opens a raw byte-stream session; `sink` receives every chunk read.
	pub fn tcp(&self, options: TcpOptions, sink: Arc<dyn ReadSink>) -> Pending<StreamSession> {
		if let Err(err) = options.validate() {
			return Pending::rejected(err);
		}
		if self.is_halted() {
			return Pending::rejected(Error::EngineUnavailable);
		}
		let inner = &self.inner;
		Pending::spawn(
			&inner.handle,
			stream::connect(
				Arc::clone(&inner.engine),
				Arc::clone(&inner.registry),
				options,
				sink,
				inner.handle.clone(),
			),
		)
	}

	/// Starts a remote shell to `host:22`; progress and errors go through the terminal hooks.
	pub fn ssh(&self, host: &str, username: &str, terminal: TerminalConfig) -> ShellSession {
		if self.is_halted() {
			return spawn_unavailable(terminal, &self.inner.handle);
		}
		let task = ShellTask {
			engine: Arc::clone(&self.inner.engine),
			connector: Arc::clone(&self.inner.shell_connector),
			registry: Arc::clone(&self.inner.registry),
		};
		task.spawn(host, username, terminal, &self.inner.handle)
	}

	/// Performs one HTTP exchange over the tunnel.
	pub fn fetch(&self, options: FetchOptions) -> Pending<FetchResponse> {
		let prepared = match tunnel::prepare(&options) {
			Ok(prepared) => prepared,
			Err(err) => return Pending::rejected(err),
		};
		if self.is_halted() {
			return Pending::rejected(Error::EngineUnavailable);
		}
		let inner = &self.inner;
		Pending::spawn(
			&inner.handle,
			tunnel::fetch(Arc::clone(&inner.engine), Arc::clone(&inner.tls), prepared, inner.handle.clone()),
		)
	}

	/// Looks up the `A` records of `hostname` through the engine's resolver.
	pub fn resolve(&self, hostname: &str) -> Pending<ResolveResult> {
		if let Err(err) = tunnel::validate_hostname(hostname) {
			return Pending::rejected(err);
		}
		if self.is_halted() {
			return Pending::rejected(Error::EngineUnavailable);
		}
		let api = match self.inner.local_api.get(self.inner.engine.as_ref()) {
			Ok(api) => api,
			Err(err) => return Pending::rejected(err),
		};
		Pending::spawn(&self.inner.handle, tunnel::resolve(api, hostname.to_string()))
	}

	pub fn live_sessions(&self) -> usize {
		self.inner.registry.len()
	}

	/// Closes every live session and stops notification delivery.
	pub fn shutdown(&self) {
		let closed = self.inner.registry.close_all();
		self.inner.local_api.release();
		if let Some(notifier) = self.inner.notifier.lock().take() {
			notifier.stop();
		}
		info!(target = "tsbridge", sessions = closed, "bridge shut down");
	}
}
