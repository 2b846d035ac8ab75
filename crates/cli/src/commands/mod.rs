//! Subcommand implementations.
//!
//! Every command builds a [`Bridge`] over a [`DirectEngine`], starts it, runs
//! one operation, and shuts the bridge down again.

mod fetch;
mod resolve;
mod ssh;
mod status;
mod tcp;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tsbridge::{Bridge, BridgeConfig, NetworkEngine, NotifyCallbacks};

use crate::cli::{Cli, Commands};
use crate::config;
use crate::direct::{DirectEngine, system_resolver};
use crate::error::Result;
use crate::state::DirStateStore;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = config::load(cli.config.as_deref(), &cli.overrides)?;
	let setup = Setup {
		config,
		resolver: None,
		state_dir: cli.state_dir,
	};

	match cli.command {
		Commands::Status(args) => status::run(setup.bridge()?, args).await,
		Commands::Tcp(args) => with_bridge(setup, |bridge| tcp::run(bridge, args)).await,
		Commands::Fetch(args) => with_bridge(setup, |bridge| fetch::run(bridge, args)).await,
		Commands::Resolve(args) => {
			let setup = Setup {
				resolver: args.resolver.clone(),
				..setup
			};
			with_bridge(setup, |bridge| resolve::run(bridge, args)).await
		}
		Commands::Ssh(args) => with_bridge(setup, |bridge| ssh::run(bridge, args)).await,
	}
}

/// What a command's bridge is built from.
struct Setup {
	config: BridgeConfig,
	resolver: Option<String>,
	state_dir: Option<PathBuf>,
}

impl Setup {
	fn bridge(self) -> Result<Bridge> {
		let engine = DirectEngine::new(self.resolver.unwrap_or_else(system_resolver));
		let bridge = Bridge::new(Arc::new(engine) as Arc<dyn NetworkEngine>, self.config, Handle::current());
		match self.state_dir {
			Some(dir) => Ok(bridge.with_state_store(Arc::new(open_state(&dir)?))),
			None => Ok(bridge),
		}
	}
}

fn open_state(dir: &Path) -> Result<DirStateStore> {
	let store = DirStateStore::open(dir).with_context(|| format!("opening state directory {}", dir.display()))?;
	info!(target = "tsbridge_cli", dir = %store.root().display(), "persisting engine state");
	Ok(store)
}

/// Starts a bridge, hands it to `op`, and shuts it down whatever `op` returns.
async fn with_bridge<F, Fut>(setup: Setup, op: F) -> Result<()>
where
	F: FnOnce(Bridge) -> Fut,
	Fut: Future<Output = Result<()>>,
{
	let bridge = setup.bridge()?;
	bridge.run(Arc::new(LogNotifications)).await?;
	info!(target = "tsbridge_cli", hostname = bridge.hostname(), "bridge running");

	let result = op(bridge.clone()).await;
	bridge.shutdown();
	result
}

/// Notification sink that only logs.
struct LogNotifications;

impl NotifyCallbacks for LogNotifications {
	fn notify_state(&self, state: &str) {
		info!(target = "tsbridge_cli", state, "engine state");
	}

	fn notify_net_map(&self, net_map_json: &str) {
		info!(target = "tsbridge_cli", bytes = net_map_json.len(), "network map updated");
	}

	fn notify_browse_to_url(&self, url: &str) {
		eprintln!("To authenticate, visit:\n\n\t{url}\n");
	}

	fn notify_panic_recover(&self, message: &str) {
		warn!(target = "tsbridge_cli", message, "notification handler recovered");
	}
}
