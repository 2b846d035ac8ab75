//! Bridge configuration for the CLI: a JSON file merged with flags.
//!
//! The file holds a [`BridgeConfig`] in its camelCase form. Flags given on the
//! command line replace the file's values.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;
use tsbridge::BridgeConfig;
use tsbridge_protocol::split_tags;

use crate::cli::ConfigOverrides;
use crate::error::Result;

/// `<config dir>/tsbridge/config.json`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("tsbridge").join("config.json"))
}

/// Loads the config file and applies `overrides`.
///
/// An explicitly named file must exist; the default file is optional.
pub fn load(explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<BridgeConfig> {
	let mut config = match explicit {
		Some(path) => read(path)?,
		None => match default_config_path() {
			Some(path) if path.exists() => read(&path)?,
			_ => BridgeConfig::default(),
		},
	};
	apply_overrides(&mut config, overrides);
	Ok(config)
}

fn read(path: &Path) -> Result<BridgeConfig> {
	let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
	let config = BridgeConfig::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))?;
	debug!(target = "tsbridge_cli", path = %path.display(), "loaded config");
	Ok(config)
}

pub fn apply_overrides(config: &mut BridgeConfig, overrides: &ConfigOverrides) {
	if let Some(hostname) = &overrides.hostname {
		config.hostname = Some(hostname.clone());
	}
	if let Some(key) = &overrides.auth_key {
		config.auth_key = Some(key.clone());
	}
	if let Some(url) = &overrides.control_url {
		config.control_url = url.clone();
	}
	if let Some(tags) = &overrides.advertise_tags {
		config.advertise_tags = split_tags(tags);
	}
	if overrides.route_all {
		config.route_all = true;
	}
}
