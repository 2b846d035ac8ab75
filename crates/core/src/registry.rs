//! Live session bookkeeping.
//!
//! Sessions never share state with each other; the registry only holds each
//! live session's cancellation token so the bridge can tear everything down at
//! shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
	Stream,
	Shell,
}

struct Entry {
	kind: SessionKind,
	remote_addr: String,
	cancel: CancellationToken,
}

#[derive(Default)]
pub struct SessionRegistry {
	next_id: AtomicU64,
	live: DashMap<SessionId, Entry>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, kind: SessionKind, remote_addr: &str, cancel: CancellationToken) -> SessionId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
		self.live.insert(
			id,
			Entry {
				kind,
				remote_addr: remote_addr.to_string(),
				cancel,
			},
		);
		debug!(target = "tsbridge", session = id, ?kind, addr = remote_addr, "session registered");
		id
	}

	pub fn remove(&self, id: SessionId) {
		if self.live.remove(&id).is_some() {
			debug!(target = "tsbridge", session = id, "session released");
		}
	}

	pub fn len(&self) -> usize {
		self.live.len()
	}

	pub fn is_empty(&self) -> bool {
		self.live.is_empty()
	}

	pub fn count(&self, kind: SessionKind) -> usize {
		self.live.iter().filter(|e| e.kind == kind).count()
	}

	pub fn remote_addr(&self, id: SessionId) -> Option<String> {
		self.live.get(&id).map(|e| e.remote_addr.clone())
	}

	/// Cancels every live session and returns how many there were.
	pub fn close_all(&self) -> usize {
		let ids: Vec<SessionId> = self.live.iter().map(|e| *e.key()).collect();
		let mut closed = 0;
		for id in ids {
			if let Some((_, entry)) = self.live.remove(&id) {
				entry.cancel.cancel();
				closed += 1;
			}
		}
		closed
	}
}
