use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tsbridge_protocol::{ConfigError, ResolveResult};
use tsbridge_runtime::{Error, LocalApi, NetworkEngine, Result};

pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// The engine's local control client, obtained once per bridge and released at shutdown.
#[derive(Default)]
pub(crate) struct LocalApiSlot {
	api: Mutex<Option<Arc<dyn LocalApi>>>,
}

impl LocalApiSlot {
	pub(crate) fn get(&self, engine: &dyn NetworkEngine) -> Result<Arc<dyn LocalApi>> {
		let mut slot = self.api.lock();
		if let Some(api) = slot.as_ref() {
			return Ok(Arc::clone(api));
		}
		let api = engine.local_api()?;
		debug!(target = "tsbridge", "local control client acquired");
		*slot = Some(Arc::clone(&api));
		Ok(api)
	}

	pub(crate) fn release(&self) {
		if self.api.lock().take().is_some() {
			debug!(target = "tsbridge", "local control client released");
		}
	}
}

pub(crate) fn validate(hostname: &str) -> std::result::Result<(), ConfigError> {
	if hostname.trim().is_empty() {
		return Err(ConfigError::Missing { field: "hostname" });
	}
	Ok(())
}

/// One `A` query, bounded by [`RESOLVE_TIMEOUT`].
pub(crate) async fn resolve(api: Arc<dyn LocalApi>, hostname: String) -> Result<ResolveResult> {
	match tokio::time::timeout(RESOLVE_TIMEOUT, api.query_dns(&hostname, "A")).await {
		Ok(Ok(answer)) => Ok(ResolveResult {
			result: answer.message,
			resolvers: answer.resolvers,
		}),
		Ok(Err(err)) => Err(err.into()),
		Err(_) => Err(Error::Timeout(format!("DNS query for {hostname} after {RESOLVE_TIMEOUT:?}"))),
	}
}
