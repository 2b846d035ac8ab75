//! A [`NetworkEngine`] that dials with the host's own sockets.
//!
//! There is no virtual interface and no control plane: `start` reports
//! `Starting` then `Running` with a single-node network map, and names are
//! resolved by querying a plain DNS server over UDP. The only state kept is
//! the self node's id.

mod dns;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tsbridge_protocol::MachineStatus;
use tsbridge_runtime::{
	Connection, EngineError, EngineNode, EngineResult, EngineState, Hostinfo, LocalApi, NetMap, Network, NetworkEngine, Notify,
	NotifyCallback, StartOptions, StateStore,
};

pub use self::dns::{UdpResolver, first_nameserver, parse_a_records, system_resolver};

/// Key the self node's id is persisted under.
pub const NODE_ID_KEY: &str = "_direct-node-id";

pub struct DirectEngine {
	resolver: String,
	state: Mutex<EngineState>,
	callback: Mutex<Option<NotifyCallback>>,
	started: Mutex<Option<StartOptions>>,
	store: Mutex<Option<Arc<dyn StateStore>>>,
}

impl DirectEngine {
	/// `resolver` is the DNS server used by `local_api`, as `ip` or `ip:port`.
	pub fn new(resolver: impl Into<String>) -> Self {
		Self {
			resolver: resolver.into(),
			state: Mutex::new(EngineState::NO_STATE),
			callback: Mutex::new(None),
			started: Mutex::new(None),
			store: Mutex::new(None),
		}
	}

	/// Stored node id, or a new one saved for next time.
	fn node_id(&self) -> i64 {
		let Some(store) = self.store.lock().clone() else {
			return fresh_node_id();
		};
		match store.read_state(NODE_ID_KEY) {
			Ok(bytes) => match std::str::from_utf8(&bytes).ok().and_then(|s| s.parse().ok()) {
				Some(id) => return id,
				None => warn!(target = "tsbridge_cli", "stored node id is unreadable, replacing it"),
			},
			Err(err) if err.is_not_found() => {}
			Err(err) => warn!(target = "tsbridge_cli", error = %err, "could not read node id"),
		}
		let id = fresh_node_id();
		if let Err(err) = store.write_state(NODE_ID_KEY, id.to_string().as_bytes()) {
			warn!(target = "tsbridge_cli", error = %err, "could not save node id");
		}
		id
	}

	fn transition(&self, state: EngineState) {
		*self.state.lock() = state;
		self.emit(Notify::state(state));
	}

	fn emit(&self, notify: Notify) {
		if let Some(callback) = self.callback.lock().as_ref() {
			callback(notify);
		}
	}

	fn local_net_map(id: i64, options: &StartOptions) -> NetMap {
		NetMap {
			self_node: EngineNode {
				id,
				name: options.hostname.clone(),
				hostinfo: Hostinfo {
					hostname: options.hostname.clone(),
					os: std::env::consts::OS.to_string(),
					ipn_version: env!("CARGO_PKG_VERSION").to_string(),
					..Hostinfo::default()
				},
				tags: options.advertise_tags.clone(),
				..EngineNode::default()
			},
			machine_status: MachineStatus::MachineAuthorized,
			..NetMap::default()
		}
	}
}

#[async_trait]
impl NetworkEngine for DirectEngine {
	async fn dial(&self, network: Network, address: &str, timeout: Duration) -> EngineResult<Connection> {
		if network != Network::Tcp {
			return Err(EngineError::Unsupported("udp dial"));
		}
		let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
			Ok(stream) => stream?,
			Err(_) => {
				return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, format!("dial {address} timed out")).into());
			}
		};
		stream.set_nodelay(true)?;
		let peer = stream.peer_addr()?.to_string();
		debug!(target = "tsbridge_cli", %address, %peer, "dialed");
		Ok(Connection::new(stream, peer))
	}

	async fn start(&self, options: StartOptions) -> EngineResult<()> {
		info!(
			target = "tsbridge_cli",
			hostname = %options.hostname,
			control_url = %options.control_url,
			"direct engine has no control plane, using host sockets"
		);
		self.transition(EngineState::STARTING);
		let net_map = Self::local_net_map(self.node_id(), &options);
		*self.started.lock() = Some(options);
		self.transition(EngineState::RUNNING);
		self.emit(Notify::net_map(net_map));
		Ok(())
	}

	fn set_notify_callback(&self, callback: NotifyCallback) {
		*self.callback.lock() = Some(callback);
	}

	fn set_state_store(&self, store: Arc<dyn StateStore>) {
		*self.store.lock() = Some(store);
	}

	async fn login_interactive(&self) -> EngineResult<()> {
		Err(EngineError::Unsupported("interactive login"))
	}

	async fn logout(&self) -> EngineResult<()> {
		self.started.lock().take();
		self.transition(EngineState::NEEDS_LOGIN);
		Ok(())
	}

	fn state(&self) -> EngineState {
		*self.state.lock()
	}

	fn local_api(&self) -> EngineResult<Arc<dyn LocalApi>> {
		Ok(Arc::new(UdpResolver::new(&self.resolver)?))
	}
}

fn fresh_node_id() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis() as i64)
		.unwrap_or(1)
}
