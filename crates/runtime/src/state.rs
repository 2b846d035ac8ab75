//! Engine state persistence.
//!
//! The engine reads and writes opaque byte blobs by key through a
//! [`StateStore`]. A host that wants state to survive restarts supplies a
//! [`StateStorage`], a string key/value store; [`HostStateStore`] adapts it by
//! hex-encoding values. Without one, state lives in a [`MemoryStateStore`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sink::{HandlerFault, guarded};

/// Key the log policy is persisted under.
pub const LOG_POLICY_KEY: &str = "log-policy";

#[derive(Debug, Error)]
pub enum StateError {
	#[error("state {0:?} does not exist")]
	NotFound(String),

	#[error("state {key:?} is not hex encoded: {source}")]
	Decode {
		key: String,
		#[source]
		source: hex::FromHexError,
	},

	#[error(transparent)]
	Host(#[from] HandlerFault),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl StateError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, StateError::NotFound(_))
	}
}

/// Host key/value storage holding strings. An empty string reads as absent.
pub trait StateStorage: Send + Sync {
	fn get_state(&self, key: &str) -> String;

	fn set_state(&self, key: &str, value: &str);
}

/// Byte store the engine persists its state in.
pub trait StateStore: Send + Sync {
	/// Fails with [`StateError::NotFound`] when nothing was stored under `key`.
	fn read_state(&self, key: &str) -> Result<Vec<u8>, StateError>;

	fn write_state(&self, key: &str, value: &[u8]) -> Result<(), StateError>;
}

/// [`StateStore`] over host [`StateStorage`], values hex-encoded.
pub struct HostStateStore {
	storage: Arc<dyn StateStorage>,
}

impl HostStateStore {
	pub fn new(storage: Arc<dyn StateStorage>) -> Self {
		Self { storage }
	}
}

impl StateStore for HostStateStore {
	fn read_state(&self, key: &str) -> Result<Vec<u8>, StateError> {
		let encoded = guarded("getState", || self.storage.get_state(key))?;
		if encoded.is_empty() {
			return Err(StateError::NotFound(key.to_string()));
		}
		hex::decode(&encoded).map_err(|source| StateError::Decode {
			key: key.to_string(),
			source,
		})
	}

	fn write_state(&self, key: &str, value: &[u8]) -> Result<(), StateError> {
		let encoded = hex::encode(value);
		guarded("setState", || self.storage.set_state(key, &encoded))?;
		Ok(())
	}
}

#[derive(Default)]
pub struct MemoryStateStore {
	entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl StateStore for MemoryStateStore {
	fn read_state(&self, key: &str) -> Result<Vec<u8>, StateError> {
		self.entries
			.lock()
			.get(key)
			.cloned()
			.ok_or_else(|| StateError::NotFound(key.to_string()))
	}

	fn write_state(&self, key: &str, value: &[u8]) -> Result<(), StateError> {
		self.entries.lock().insert(key.to_string(), value.to_vec());
		Ok(())
	}
}

/// Identity under which this node's logs would be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPolicyConfig {
	#[serde(rename = "Collection")]
	pub collection: String,
	#[serde(rename = "PrivateID")]
	pub private_id: String,
}

impl LogPolicyConfig {
	/// Fresh config with a random 32-byte private id.
	pub fn new(collection: impl Into<String>) -> Self {
		let mut id = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut id);
		Self {
			collection: collection.into(),
			private_id: hex::encode(id),
		}
	}

	fn from_bytes(bytes: &[u8]) -> Option<Self> {
		let config: Self = serde_json::from_slice(bytes).ok()?;
		let id_ok = config.private_id.len() == 64 && hex::decode(&config.private_id).is_ok();
		id_ok.then_some(config)
	}
}

/// Loads the persisted log policy, creating and saving a new one when it is
/// missing or unreadable. Storage failures are logged, never returned.
pub fn log_policy_config(store: &dyn StateStore) -> LogPolicyConfig {
	match store.read_state(LOG_POLICY_KEY) {
		Ok(bytes) => match LogPolicyConfig::from_bytes(&bytes) {
			Some(config) => {
				debug!(target = "tsbridge", "reusing stored log policy");
				return config;
			}
			None => warn!(target = "tsbridge", "could not parse stored log policy"),
		},
		Err(err) if err.is_not_found() => {}
		Err(err) => warn!(target = "tsbridge", error = %err, "could not read log policy"),
	}

	let config = LogPolicyConfig::new("");
	match serde_json::to_vec(&config) {
		Ok(bytes) => {
			if let Err(err) = store.write_state(LOG_POLICY_KEY, &bytes) {
				warn!(target = "tsbridge", error = %err, "could not save log policy");
			}
		}
		Err(err) => warn!(target = "tsbridge", error = %err, "could not encode log policy"),
	}
	config
}
