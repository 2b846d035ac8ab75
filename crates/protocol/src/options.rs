//! Validated request options.
//!
//! Hosts hand the bridge loosely-typed objects; each is parsed exactly once
//! into one of these structs at the boundary. Unknown or ill-typed fields are
//! rejected here so that operations never see a half-valid request.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Options for a raw byte-stream session.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpOptions {
	pub hostname: String,
	pub port: u16,
	pub write_buffer_size: usize,
	pub read_buffer_size: usize,
	pub connect_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTcpOptions {
	hostname: Option<Value>,
	port: Option<Value>,
	write_buffer_size_in_bytes: Option<u64>,
	read_buffer_size_in_bytes: Option<u64>,
	connect_timeout: Option<f64>,
}

impl TcpOptions {
	pub fn new(hostname: impl Into<String>, port: u16) -> Self {
		Self {
			hostname: hostname.into(),
			port,
			write_buffer_size: DEFAULT_BUFFER_SIZE,
			read_buffer_size: DEFAULT_BUFFER_SIZE,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
		}
	}

	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
		self.read_buffer_size = read;
		self.write_buffer_size = write;
		self
	}

	/// Parses the dynamic `tcp({ ... })` form.
	///
	/// `readCallback` is not part of this object; the sink is passed alongside.
	pub fn from_value(value: Value) -> Result<Self, ConfigError> {
		let raw: RawTcpOptions = serde_json::from_value(value)?;

		let hostname = match raw.hostname {
			Some(Value::String(s)) => s,
			Some(_) => return Err(ConfigError::invalid("hostname", "must be a string")),
			None => return Err(ConfigError::Missing { field: "hostname" }),
		};
		let port = match raw.port {
			Some(v) => parse_port(&v)?,
			None => return Err(ConfigError::Missing { field: "port" }),
		};

		let mut opts = Self::new(hostname, port);
		if let Some(n) = raw.write_buffer_size_in_bytes {
			opts.write_buffer_size = usize::try_from(n).map_err(|_| ConfigError::invalid("writeBufferSizeInBytes", "too large"))?;
		}
		if let Some(n) = raw.read_buffer_size_in_bytes {
			opts.read_buffer_size = usize::try_from(n).map_err(|_| ConfigError::invalid("readBufferSizeInBytes", "too large"))?;
		}
		if let Some(secs) = raw.connect_timeout {
			opts.connect_timeout = seconds("connectTimeout", secs)?;
		}

		opts.validate()?;
		Ok(opts)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.hostname.trim().is_empty() {
			return Err(ConfigError::Missing { field: "hostname" });
		}
		if self.port == 0 {
			return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
		}
		if self.read_buffer_size == 0 {
			return Err(ConfigError::invalid("readBufferSizeInBytes", "must be positive"));
		}
		if self.write_buffer_size == 0 {
			return Err(ConfigError::invalid("writeBufferSizeInBytes", "must be positive"));
		}
		if self.connect_timeout.is_zero() {
			return Err(ConfigError::invalid("connectTimeout", "must be positive"));
		}
		Ok(())
	}

	/// `host:port`, with IPv6 literals bracketed.
	pub fn address(&self) -> String {
		join_host_port(&self.hostname, self.port)
	}
}

fn parse_port(value: &Value) -> Result<u16, ConfigError> {
	let n = value
		.as_u64()
		.or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
		.ok_or_else(|| ConfigError::invalid("port", "must be a number"))?;
	match u16::try_from(n) {
		Ok(port) if port != 0 => Ok(port),
		_ => Err(ConfigError::invalid("port", format!("{n} is out of range"))),
	}
}

/// Converts a caller-supplied number of seconds into a timeout.
///
/// Rejects zero, negative, non-finite, and values too large for [`Duration`].
pub fn seconds(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
	if !(secs.is_finite() && secs > 0.0) {
		return Err(ConfigError::invalid(field, "must be a positive number of seconds"));
	}
	Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::invalid(field, format!("{secs} seconds is out of range")))
}

/// Joins a host and port the way dial addresses are written.
pub fn join_host_port(host: &str, port: u16) -> String {
	if host.contains(':') && !host.starts_with('[') {
		format!("[{host}]:{port}")
	} else {
		format!("{host}:{port}")
	}
}

/// Options for a one-shot tunneled HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FetchOptions {
	pub url: String,
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub headers: BTreeMap<String, Vec<String>>,
	#[serde(default)]
	pub body: Option<String>,
}

impl FetchOptions {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			..Self::default()
		}
	}

	pub fn method(mut self, method: impl Into<String>) -> Self {
		self.method = Some(method.into());
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.entry(name.into()).or_default().push(value.into());
		self
	}

	pub fn body(mut self, body: impl Into<String>) -> Self {
		self.body = Some(body.into());
		self
	}

	pub fn from_value(value: Value) -> Result<Self, ConfigError> {
		let opts: Self = serde_json::from_value(value)?;
		opts.parsed_url()?;
		Ok(opts)
	}

	/// Method to send, `GET` when none was given.
	pub fn method_or_default(&self) -> &str {
		match self.method.as_deref() {
			Some(m) if !m.is_empty() => m,
			_ => "GET",
		}
	}

	/// Parses the request URL; only `http` and `https` can be tunneled.
	pub fn parsed_url(&self) -> Result<Url, ConfigError> {
		if self.url.is_empty() {
			return Err(ConfigError::Missing { field: "url" });
		}
		let url = Url::parse(&self.url).map_err(|e| ConfigError::invalid("url", e.to_string()))?;
		match url.scheme() {
			"http" | "https" => {}
			other => return Err(ConfigError::invalid("url", format!("unsupported scheme {other:?}"))),
		}
		if url.host_str().is_none_or(str::is_empty) {
			return Err(ConfigError::invalid("url", "missing host"));
		}
		Ok(url)
	}
}
