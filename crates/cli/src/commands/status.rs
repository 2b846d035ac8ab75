use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tsbridge::{BackendState, Bridge, NotifyCallbacks};

use crate::error::{CliError, Result};

enum Note {
	State(String),
	NetMap(String),
}

struct Collect(mpsc::UnboundedSender<Note>);

impl NotifyCallbacks for Collect {
	fn notify_state(&self, state: &str) {
		let _ = self.0.send(Note::State(state.to_string()));
	}

	fn notify_net_map(&self, net_map_json: &str) {
		let _ = self.0.send(Note::NetMap(net_map_json.to_string()));
	}

	fn notify_browse_to_url(&self, url: &str) {
		eprintln!("To authenticate, visit:\n\n\t{url}\n");
	}

	fn notify_panic_recover(&self, message: &str) {
		tracing::warn!(target = "tsbridge_cli", message, "notification handler recovered");
	}
}

/// Starts the engine and prints `{hostname, state, netMap}` once it is running.
pub(super) async fn run(bridge: Bridge, args: crate::cli::StatusArgs) -> Result<()> {
	let wait = args.wait_duration()?;
	let (tx, mut rx) = mpsc::unbounded_channel();
	bridge.run(Arc::new(Collect(tx))).await?;

	let mut state = BackendState::NoState.as_str().to_string();
	let mut net_map: Option<serde_json::Value> = None;

	let collected = tokio::time::timeout(wait, async {
		while let Some(note) = rx.recv().await {
			match note {
				Note::State(s) => state = s,
				Note::NetMap(json) => net_map = Some(serde_json::from_str(&json)?),
			}
			if state == BackendState::Running.as_str() && net_map.is_some() {
				break;
			}
		}
		Ok::<_, CliError>(())
	})
	.await;
	bridge.shutdown();

	match collected {
		Ok(result) => result?,
		Err(_) if state == BackendState::Running.as_str() => {}
		Err(_) => return Err(CliError::NotRunning { secs: args.wait, last: state }),
	}

	let report = json!({
		"hostname": bridge.hostname(),
		"state": state,
		"netMap": net_map,
	});
	println!("{}", serde_json::to_string_pretty(&report)?);
	Ok(())
}
