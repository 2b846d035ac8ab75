use serde::{Deserialize, Deserializer, Serialize};

use crate::hostname::generate_hostname;

pub const DEFAULT_CONTROL_URL: &str = "https://controlplane.tailscale.com";

/// How the bridge starts its network engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BridgeConfig {
	#[serde(rename = "controlURL")]
	pub control_url: String,
	pub auth_key: Option<String>,
	/// Node name announced to the control plane, generated when absent.
	pub hostname: Option<String>,
	/// Tags to advertise; a `;`-separated string is accepted as well.
	#[serde(deserialize_with = "tags_from_list_or_string")]
	pub advertise_tags: Vec<String>,
	pub route_all: bool,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			control_url: DEFAULT_CONTROL_URL.to_string(),
			auth_key: None,
			hostname: None,
			advertise_tags: Vec::new(),
			route_all: false,
		}
	}
}

impl BridgeConfig {
	pub fn from_json(json: &str) -> Result<Self, crate::ConfigError> {
		Ok(serde_json::from_str(json)?)
	}

	/// Returns the configured hostname, or a freshly generated one.
	pub fn hostname_or_generated(&self) -> String {
		match self.hostname.as_deref().map(str::trim) {
			Some(h) if !h.is_empty() => h.to_string(),
			_ => generate_hostname(),
		}
	}
}

/// Splits a `;`-separated tag list, dropping empty entries.
pub fn split_tags(raw: &str) -> Vec<String> {
	raw.split(';')
		.map(str::trim)
		.filter(|t| !t.is_empty())
		.map(String::from)
		.collect()
}

fn tags_from_list_or_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Tags {
		Joined(String),
		List(Vec<String>),
	}

	Ok(match Tags::deserialize(deserializer)? {
		Tags::Joined(s) => split_tags(&s),
		Tags::List(list) => list,
	})
}
