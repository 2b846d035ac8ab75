//! Caller-facing types for the tsbridge session bridge.
//!
//! Everything a host exchanges with the bridge lives here: the backend
//! lifecycle names delivered to `notifyState`, the JSON network snapshot
//! delivered to `notifyNetMap`, and the validated option structs each request
//! is parsed into before any background work starts.
//!
//! # Main Types
//!
//! - [`BackendState`] - Engine lifecycle as seen by the caller
//! - [`NetworkSnapshot`] - Immutable self/peers/users view
//! - [`TcpOptions`], [`TerminalOptions`], [`FetchOptions`] - Request options
//! - [`BridgeConfig`] - Engine start configuration
//! - [`ShellStage`] - Labels used in shell error reports

pub mod config;
pub mod error;
pub mod hostname;
pub mod options;
pub mod resolve;
pub mod snapshot;
pub mod state;
pub mod terminal;

pub use config::{BridgeConfig, DEFAULT_CONTROL_URL, split_tags};
pub use error::ConfigError;
pub use options::{DEFAULT_BUFFER_SIZE, DEFAULT_CONNECT_TIMEOUT, FetchOptions, TcpOptions, join_host_port, seconds};
pub use resolve::ResolveResult;
pub use snapshot::{MachineStatus, NetworkSnapshot, NodeInfo, PeerNode, SelfNode, UserProfile};
pub use state::BackendState;
pub use terminal::{DEFAULT_SHELL_TIMEOUT, ShellStage, TerminalGeometry, TerminalOptions};
