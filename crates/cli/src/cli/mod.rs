
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tsbridge::ConfigError;

/// Root CLI for the tsbridge development host.
#[derive(Parser, Debug)]
#[command(name = "tsbridge")]
#[command(about = "Drive tsbridge sessions from the command line")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace); TSBRIDGE_LOG overrides
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Bridge config file (JSON); defaults to the user config directory
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Directory engine state is kept in; state is not persisted when unset
	#[arg(long, global = true, value_name = "DIR", env = "TSBRIDGE_STATE_DIR")]
	pub state_dir: Option<PathBuf>,

	#[command(flatten)]
	pub overrides: ConfigOverrides,

	#[command(subcommand)]
	pub command: Commands,
}

/// Flags that take precedence over the config file.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
	/// Node name announced to the control plane
	#[arg(long, global = true, value_name = "NAME")]
	pub hostname: Option<String>,

	/// Pre-authorized key used instead of interactive login
	#[arg(long, global = true, value_name = "KEY", env = "TSBRIDGE_AUTH_KEY", hide_env_values = true)]
	pub auth_key: Option<String>,

	/// Coordination server URL
	#[arg(long, global = true, value_name = "URL")]
	pub control_url: Option<String>,

	/// Tags to advertise, separated by `;`
	#[arg(long, global = true, value_name = "TAGS")]
	pub advertise_tags: Option<String>,

	/// Route all traffic through an exit node
	#[arg(long, global = true)]
	pub route_all: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start the engine and print its state and network snapshot.
	Status(StatusArgs),
	/// Relay stdin/stdout over a raw byte-stream session.
	Tcp(TcpArgs),
	/// Perform one HTTP request over the tunnel.
	Fetch(FetchArgs),
	/// Look up the A records of a name.
	Resolve(ResolveArgs),
	/// Open an interactive remote shell on port 22.
	Ssh(SshArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
	/// Seconds to wait for the engine to report `Running`
	#[arg(long, value_name = "SECS", default_value_t = 5.0)]
	pub wait: f64,
}

#[derive(Args, Debug, Clone)]
pub struct TcpArgs {
	#[arg(value_name = "HOST")]
	pub host: String,

	#[arg(value_name = "PORT")]
	pub port: u16,

	/// Dial timeout in seconds
	#[arg(long, value_name = "SECS")]
	pub timeout: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
	#[arg(value_name = "URL")]
	pub url: String,

	/// Request method
	#[arg(short = 'X', long, value_name = "METHOD")]
	pub method: Option<String>,

	/// Request header as `Name: value`; repeatable
	#[arg(short = 'H', long = "header", value_name = "HEADER")]
	pub headers: Vec<String>,

	/// Request body
	#[arg(short, long, value_name = "BODY")]
	pub data: Option<String>,

	/// Print the status line and response headers before the body
	#[arg(short, long)]
	pub include: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
	#[arg(value_name = "NAME")]
	pub name: String,

	/// DNS server to query; defaults to the first system nameserver
	#[arg(long, value_name = "ADDR")]
	pub resolver: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SshArgs {
	/// Target as `user@host`; the user defaults to `$USER`
	#[arg(value_name = "TARGET")]
	pub target: String,

	#[arg(long, default_value_t = 24)]
	pub rows: u32,

	#[arg(long, default_value_t = 80)]
	pub cols: u32,

	/// Connect and handshake timeout in seconds
	#[arg(long, value_name = "SECS")]
	pub timeout: Option<f64>,
}

impl StatusArgs {
	pub fn wait_duration(&self) -> Result<Duration, ConfigError> {
		tsbridge_protocol::seconds("wait", self.wait)
	}
}

impl TcpArgs {
	/// Dial timeout, or `None` to keep the default.
	pub fn connect_timeout(&self) -> Result<Option<Duration>, ConfigError> {
		self.timeout.map(|secs| tsbridge_protocol::seconds("timeout", secs)).transpose()
	}
}

impl SshArgs {
	/// Splits `user@host`, falling back to `default_user` when no user is given.
	pub fn user_and_host<'a>(&'a self, default_user: &'a str) -> (&'a str, &'a str) {
		match self.target.rsplit_once('@') {
			Some((user, host)) if !user.is_empty() => (user, host),
			Some((_, host)) => (default_user, host),
			None => (default_user, self.target.as_str()),
		}
	}
}
