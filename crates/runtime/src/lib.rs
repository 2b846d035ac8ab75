//! Runtime plumbing for the tsbridge session bridge.
//!
//! This crate holds the pieces every session manager shares:
//!
//! - [`NetworkEngine`] - The seam to the component owning the virtual network
//! - [`Pending`] - Handle for a background operation, settled exactly once
//! - [`CallbackSink`] and [`guarded`] - Supervised invocation of host callbacks
//! - [`NetworkNotifier`] - Ordered relay of engine notifications to the host
//! - [`StateStore`] - Where the engine persists its state, optionally through the host
//! - [`Error`] - The error taxonomy shared by all operations

pub mod engine;
pub mod error;
pub mod notifier;
pub mod pending;
pub mod sink;
pub mod state;

pub use engine::{
	Connection, DnsAnswer, EngineError, EngineNode, EngineResult, EngineState, EngineStream, Hostinfo, LocalApi, NetMap, Network,
	NetworkEngine, Notify, NotifyCallback, StartOptions,
};
pub use error::{Error, ErrorKind, Result};
pub use notifier::{NetworkNotifier, NotifierEvent, NotifyCallbacks, snapshot_from_net_map};
pub use pending::Pending;
pub use sink::{CallbackSink, HandlerFault, guarded};
pub use state::{
	HostStateStore, LOG_POLICY_KEY, LogPolicyConfig, MemoryStateStore, StateError, StateStorage, StateStore, log_policy_config,
};
