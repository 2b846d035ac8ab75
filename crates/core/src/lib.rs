//! Session bridge over a virtual network engine.
//!
//! A [`Bridge`] lets a host that has no socket access of its own drive network
//! operations through a [`NetworkEngine`]: raw byte streams, interactive
//! remote shells, tunneled HTTP requests and name resolution. Requests return
//! immediately; work runs on background tasks and results come back through a
//! [`Pending`] handle or the callbacks supplied with the request.
//!
//! # Example
//!
//! ```ignore
//! let bridge = Bridge::new(engine, BridgeConfig::default(), Handle::current());
//! bridge.run(Arc::new(MyCallbacks)).await?;
//!
//! let session = bridge.tcp(TcpOptions::new("db", 5432), Arc::new(|bytes: &[u8]| {
//!     println!("{} bytes", bytes.len());
//! })).await?;
//! session.write(b"ping").await?;
//! session.close().await?;
//! ```

mod bridge;
pub mod registry;
pub mod shell;
pub mod stream;
pub mod tunnel;

pub use bridge::Bridge;
pub use registry::{SessionId, SessionKind, SessionRegistry};
pub use shell::{RusshConnector, ShellConnector, ShellInput, ShellSession, ShellState, TerminalCallbacks, TerminalConfig};
pub use stream::{ReadSink, StreamSession};
pub use tsbridge_protocol::{
	BackendState, BridgeConfig, ConfigError, FetchOptions, NetworkSnapshot, ResolveResult, ShellStage, TcpOptions, TerminalGeometry,
	TerminalOptions,
};
pub use tsbridge_runtime::{
	Error, ErrorKind, LogPolicyConfig, NetworkEngine, NotifyCallbacks, Pending, Result, StateError, StateStorage, StateStore,
};
pub use tunnel::FetchResponse;
