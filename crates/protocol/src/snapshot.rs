//! Caller-facing network topology snapshot.
//!
//! A [`NetworkSnapshot`] is built fresh from every engine topology update and
//! serialized to JSON for `notifyNetMap`. It is never mutated after
//! construction, only replaced by the next one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time view of the tailnet as seen from this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
	/// MagicDNS suffix of the tailnet, e.g. `example.ts.net`.
	pub domain: String,
	#[serde(rename = "self")]
	pub self_node: SelfNode,
	/// Peers in the order the engine reported them.
	pub peers: Vec<PeerNode>,
	/// User directory keyed by user id.
	pub users: BTreeMap<i64, UserProfile>,
	/// Network lock is enabled and this node carries no key signature.
	pub locked_out: bool,
}

impl NetworkSnapshot {
	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	pub fn peer(&self, name: &str) -> Option<&PeerNode> {
		self.peers.iter().find(|p| p.node.name == name)
	}
}

/// Fields shared by the self node and every peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
	pub name: String,
	/// Bare IP addresses, prefix lengths stripped.
	pub addresses: Vec<String>,
	pub machine_key: String,
	pub node_key: String,
	pub created_at: String,
	pub ipn_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfNode {
	#[serde(flatten)]
	pub node: NodeInfo,
	pub machine_status: MachineStatus,
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerNode {
	#[serde(flatten)]
	pub node: NodeInfo,
	pub last_seen: String,
	pub os: String,
	pub os_version: String,
	pub user: String,
	pub tags: Vec<String>,
	pub routes: Vec<String>,
	pub online: bool,
	pub expired: bool,
	pub id: String,
	#[serde(rename = "tailscaleSSHEnabled")]
	pub tailscale_ssh_enabled: bool,
	pub cap_map: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Authorization status of this machine with the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatus {
	#[default]
	MachineUnknown,
	MachineUnauthorized,
	MachineAuthorized,
	MachineInvalid,
}

/// Directory entry for a tailnet user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
	#[serde(rename = "ID")]
	pub id: i64,
	#[serde(rename = "LoginName")]
	pub login_name: String,
	#[serde(rename = "DisplayName")]
	pub display_name: String,
	#[serde(rename = "ProfilePicURL", default, skip_serializing_if = "String::is_empty")]
	pub profile_pic_url: String,
}
