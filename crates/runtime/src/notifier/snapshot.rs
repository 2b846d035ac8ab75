use tsbridge_protocol::{NetworkSnapshot, NodeInfo, PeerNode, SelfNode};

use crate::engine::{EngineNode, NetMap};

/// Builds the caller-facing snapshot for one topology update.
pub fn snapshot_from_net_map(nm: &NetMap) -> NetworkSnapshot {
	let me = &nm.self_node;
	NetworkSnapshot {
		domain: nm.magic_dns_suffix.clone(),
		self_node: SelfNode {
			node: node_info(me, me.name.clone()),
			machine_status: nm.machine_status,
			tags: me.tags.clone(),
		},
		peers: nm.peers.iter().map(peer_node).collect(),
		users: nm.user_profiles.clone(),
		locked_out: nm.tka_enabled && me.key_signature.is_empty(),
	}
}

fn peer_node(p: &EngineNode) -> PeerNode {
	let name = if p.name.is_empty() {
		p.hostinfo.hostname.clone()
	} else {
		p.name.clone()
	};
	PeerNode {
		node: node_info(p, name),
		last_seen: p.last_seen.map(|t| t.to_rfc3339()).unwrap_or_default(),
		os: p.hostinfo.os.clone(),
		os_version: p.hostinfo.os_version.clone(),
		user: format!("userid:{:x}", p.user),
		tags: p.tags.clone(),
		routes: p.hostinfo.routable_ips.clone(),
		online: p.online.unwrap_or(false),
		expired: p.expired,
		id: p.id.to_string(),
		tailscale_ssh_enabled: p.hostinfo.tailscale_ssh_enabled,
		cap_map: p.cap_map.clone(),
	}
}

fn node_info(n: &EngineNode, name: String) -> NodeInfo {
	NodeInfo {
		name,
		addresses: n.addresses.iter().map(|a| strip_prefix_len(a).to_string()).collect(),
		machine_key: n.machine_key.clone(),
		node_key: n.node_key.clone(),
		created_at: n.created.map(|t| t.to_rfc3339()).unwrap_or_default(),
		ipn_version: n.hostinfo.ipn_version.clone(),
	}
}

fn strip_prefix_len(prefix: &str) -> &str {
	prefix.split_once('/').map_or(prefix, |(addr, _)| addr)
}
