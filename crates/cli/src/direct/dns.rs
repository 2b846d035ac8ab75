use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;
use tsbridge_runtime::{DnsAnswer, EngineError, EngineResult, LocalApi};

const DNS_PORT: u16 = 53;
const FALLBACK_RESOLVER: &str = "1.1.1.1:53";
const MAX_MESSAGE: usize = 4096;

/// Sends single-question queries to one DNS server over UDP.
pub struct UdpResolver {
	server: SocketAddr,
	next_id: AtomicU16,
}

impl UdpResolver {
	pub fn new(server: &str) -> EngineResult<Self> {
		let server = server
			.parse::<SocketAddr>()
			.or_else(|_| server.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, DNS_PORT)))
			.map_err(|_| EngineError::Backend(format!("invalid resolver address {server:?}")))?;
		Ok(Self {
			server,
			next_id: AtomicU16::new(std::process::id() as u16),
		})
	}
}

#[async_trait]
impl LocalApi for UdpResolver {
	async fn query_dns(&self, name: &str, query_type: &str) -> EngineResult<DnsAnswer> {
		let qtype = record_type(query_type)?;
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let query = encode_query(id, name, qtype)?;

		let bind: SocketAddr = if self.server.is_ipv4() {
			(Ipv4Addr::UNSPECIFIED, 0).into()
		} else {
			(std::net::Ipv6Addr::UNSPECIFIED, 0).into()
		};
		let socket = UdpSocket::bind(bind).await?;
		socket.connect(self.server).await?;
		socket.send(&query).await?;

		let mut buf = vec![0u8; MAX_MESSAGE];
		loop {
			let n = socket.recv(&mut buf).await?;
			if n >= 2 && buf[..2] == id.to_be_bytes() {
				buf.truncate(n);
				break;
			}
			debug!(target = "tsbridge_cli", len = n, "ignoring DNS reply with foreign id");
		}

		Ok(DnsAnswer {
			message: buf,
			resolvers: vec![self.server.to_string()],
		})
	}
}

fn record_type(name: &str) -> EngineResult<u16> {
	match name.to_ascii_uppercase().as_str() {
		"A" => Ok(1),
		"AAAA" => Ok(28),
		"TXT" => Ok(16),
		_ => Err(EngineError::Unsupported("query type")),
	}
}

/// Builds a recursion-desired query with one question in class IN.
fn encode_query(id: u16, name: &str, qtype: u16) -> EngineResult<Vec<u8>> {
	let name = name.trim_end_matches('.');
	if name.is_empty() || name.len() > 253 {
		return Err(EngineError::Backend(format!("invalid DNS name {name:?}")));
	}

	let mut msg = Vec::with_capacity(18 + name.len());
	msg.extend_from_slice(&id.to_be_bytes());
	msg.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
	for label in name.split('.') {
		if label.is_empty() || label.len() > 63 {
			return Err(EngineError::Backend(format!("invalid DNS label {label:?} in {name:?}")));
		}
		msg.push(label.len() as u8);
		msg.extend_from_slice(label.as_bytes());
	}
	msg.push(0);
	msg.extend_from_slice(&qtype.to_be_bytes());
	msg.extend_from_slice(&1u16.to_be_bytes());
	Ok(msg)
}

/// IPv4 addresses in the answer section, `None` if the message is truncated or malformed.
pub fn parse_a_records(msg: &[u8]) -> Option<Vec<Ipv4Addr>> {
	let questions = read_u16(msg, 4)?;
	let answers = read_u16(msg, 6)?;
	let mut pos = 12;

	for _ in 0..questions {
		pos = skip_name(msg, pos)? + 4;
	}

	let mut addrs = Vec::new();
	for _ in 0..answers {
		pos = skip_name(msg, pos)?;
		let rtype = read_u16(msg, pos)?;
		let rdlen = read_u16(msg, pos + 8)? as usize;
		pos += 10;
		let rdata = msg.get(pos..pos + rdlen)?;
		if rtype == 1 && rdlen == 4 {
			addrs.push(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
		}
		pos += rdlen;
	}
	Some(addrs)
}

fn read_u16(msg: &[u8], pos: usize) -> Option<u16> {
	let bytes = msg.get(pos..pos + 2)?;
	Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn skip_name(msg: &[u8], mut pos: usize) -> Option<usize> {
	loop {
		let len = *msg.get(pos)? as usize;
		if len & 0xC0 == 0xC0 {
			return Some(pos + 2);
		}
		if len == 0 {
			return Some(pos + 1);
		}
		pos += 1 + len;
	}
}

/// First `nameserver` entry of a resolv.conf.
pub fn first_nameserver(resolv_conf: &str) -> Option<SocketAddr> {
	resolv_conf
		.lines()
		.map(str::trim)
		.filter_map(|line| line.strip_prefix("nameserver"))
		.filter_map(|rest| rest.split_whitespace().next())
		.find_map(|addr| addr.split('%').next()?.parse::<IpAddr>().ok())
		.map(|ip| SocketAddr::new(ip, DNS_PORT))
}

/// The host's configured nameserver, or a public one when none can be read.
pub fn system_resolver() -> String {
	std::fs::read_to_string("/etc/resolv.conf")
		.ok()
		.and_then(|conf| first_nameserver(&conf))
		.map(|addr| addr.to_string())
		.unwrap_or_else(|| FALLBACK_RESOLVER.to_string())
}
