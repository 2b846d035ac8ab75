//! Interface to the network engine.
//!
//! The engine owns the virtual network interface, talks to the control plane,
//! and emits [`Notify`] events. The bridge only consumes it through
//! [`NetworkEngine`]: it dials, starts, and observes, but never mutates
//! engine-global configuration on behalf of a single session.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tsbridge_protocol::{BackendState, BridgeConfig, MachineStatus, UserProfile};

use crate::state::StateStore;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Backend(String),

	#[error("not supported by this engine: {0}")]
	Unsupported(&'static str),
}

/// Byte stream handed out by [`NetworkEngine::dial`].
pub trait EngineStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> EngineStream for T {}

/// A dialed connection, exclusively owned by the session that requested it.
pub struct Connection {
	stream: Box<dyn EngineStream>,
	remote_addr: String,
}

impl Connection {
	pub fn new(stream: impl EngineStream + 'static, remote_addr: impl Into<String>) -> Self {
		Self {
			stream: Box::new(stream),
			remote_addr: remote_addr.into(),
		}
	}

	pub fn remote_addr(&self) -> &str {
		&self.remote_addr
	}

	pub fn into_parts(self) -> (Box<dyn EngineStream>, String) {
		(self.stream, self.remote_addr)
	}
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection").field("remote_addr", &self.remote_addr).finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
	Tcp,
	Udp,
}

impl Network {
	pub fn as_str(self) -> &'static str {
		match self {
			Network::Tcp => "tcp",
			Network::Udp => "udp",
		}
	}
}

/// Preferences the engine is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
	pub control_url: String,
	pub route_all: bool,
	pub hostname: String,
	pub advertise_tags: Vec<String>,
	pub want_running: bool,
	pub corp_dns: bool,
	pub auth_key: Option<String>,
}

impl StartOptions {
	pub fn from_config(config: &BridgeConfig, hostname: String) -> Self {
		Self {
			control_url: config.control_url.clone(),
			route_all: config.route_all,
			hostname,
			advertise_tags: config.advertise_tags.clone(),
			want_running: true,
			corp_dns: true,
			auth_key: config.auth_key.clone().filter(|k| !k.is_empty()),
		}
	}
}

/// Raw engine state code.
///
/// Engines may grow states the bridge does not know about; mapping onto
/// [`BackendState`] is therefore fallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineState(pub i32);

impl EngineState {
	pub const NO_STATE: Self = Self(0);
	pub const NEEDS_LOGIN: Self = Self(2);
	pub const STOPPED: Self = Self(4);
	pub const STARTING: Self = Self(5);
	pub const RUNNING: Self = Self(6);

	pub fn backend(self) -> Option<BackendState> {
		BackendState::from_code(self.0)
	}
}

impl From<BackendState> for EngineState {
	fn from(state: BackendState) -> Self {
		Self(state.code())
	}
}

/// Host details a node reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hostinfo {
	pub hostname: String,
	pub os: String,
	pub os_version: String,
	pub ipn_version: String,
	pub routable_ips: Vec<String>,
	pub tailscale_ssh_enabled: bool,
}

/// A node as the engine sees it, self or peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineNode {
	pub id: i64,
	pub name: String,
	/// Addresses in prefix form, e.g. `100.64.0.1/32`.
	pub addresses: Vec<String>,
	pub machine_key: String,
	pub node_key: String,
	pub created: Option<DateTime<Utc>>,
	pub last_seen: Option<DateTime<Utc>>,
	pub hostinfo: Hostinfo,
	pub user: i64,
	pub tags: Vec<String>,
	pub online: Option<bool>,
	pub expired: bool,
	pub key_signature: Vec<u8>,
	pub cap_map: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Full topology update from the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetMap {
	pub self_node: EngineNode,
	pub machine_status: MachineStatus,
	pub peers: Vec<EngineNode>,
	pub user_profiles: BTreeMap<i64, UserProfile>,
	pub tka_enabled: bool,
	pub magic_dns_suffix: String,
}

/// One engine notification. Any combination of fields may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notify {
	pub state: Option<EngineState>,
	pub net_map: Option<NetMap>,
	pub browse_to_url: Option<String>,
}

impl Notify {
	pub fn state(state: impl Into<EngineState>) -> Self {
		Self {
			state: Some(state.into()),
			..Self::default()
		}
	}

	pub fn net_map(net_map: NetMap) -> Self {
		Self {
			net_map: Some(net_map),
			..Self::default()
		}
	}

	pub fn browse_to(url: impl Into<String>) -> Self {
		Self {
			browse_to_url: Some(url.into()),
			..Self::default()
		}
	}
}

/// The engine's single notification callback.
pub type NotifyCallback = Box<dyn Fn(Notify) + Send + Sync>;

/// Answer to a local control DNS query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
	pub message: Vec<u8>,
	pub resolvers: Vec<String>,
}

/// Local control interface of the engine.
#[async_trait]
pub trait LocalApi: Send + Sync {
	async fn query_dns(&self, name: &str, query_type: &str) -> EngineResult<DnsAnswer>;
}

#[async_trait]
pub trait NetworkEngine: Send + Sync + 'static {
	/// Opens a connection through the virtual interface, bounded by `timeout`.
	async fn dial(&self, network: Network, address: &str, timeout: Duration) -> EngineResult<Connection>;

	async fn start(&self, options: StartOptions) -> EngineResult<()>;

	/// Installs the notification callback, replacing any previous one.
	fn set_notify_callback(&self, callback: NotifyCallback);

	/// Store the engine persists its state in; installed before [`start`](Self::start).
	fn set_state_store(&self, store: Arc<dyn StateStore>);

	async fn login_interactive(&self) -> EngineResult<()>;

	async fn logout(&self) -> EngineResult<()>;

	fn state(&self) -> EngineState;

	/// Client for the engine's local control interface.
	fn local_api(&self) -> EngineResult<Arc<dyn LocalApi>>;
}
