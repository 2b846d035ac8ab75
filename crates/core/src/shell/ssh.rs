//! [`ShellConnector`] backed by russh.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tracing::debug;
use tsbridge_protocol::TerminalGeometry;
use tsbridge_runtime::Connection;

use super::{Milestone, ShellChannel, ShellClient, ShellConnector, ShellError, ShellEvent};

impl From<russh::Error> for ShellError {
	fn from(err: russh::Error) -> Self {
		ShellError::Ssh(err.to_string())
	}
}

/// Host keys are not checked: the engine has already authenticated the peer.
/// The key callback only marks the "connection established" milestone.
struct EngineTrustHandler {
	established: Milestone,
}

#[async_trait]
impl client::Handler for EngineTrustHandler {
	type Error = russh::Error;

	async fn check_server_key(&mut self, _server_public_key: &russh_keys::key::PublicKey) -> Result<bool, Self::Error> {
		(self.established)();
		Ok(true)
	}
}

pub struct RusshConnector {
	config: Arc<client::Config>,
}

impl Default for RusshConnector {
	fn default() -> Self {
		Self {
			config: Arc::new(client::Config {
				inactivity_timeout: None,
				..Default::default()
			}),
		}
	}
}

impl RusshConnector {
	pub fn new(config: client::Config) -> Self {
		Self { config: Arc::new(config) }
	}
}

#[async_trait]
impl ShellConnector for RusshConnector {
	async fn connect(&self, conn: Connection, host: &str, username: &str, established: Milestone) -> Result<Box<dyn ShellClient>, ShellError> {
		let (stream, _) = conn.into_parts();
		let mut handle = client::connect_stream(Arc::clone(&self.config), stream, EngineTrustHandler { established }).await?;

		if !handle.authenticate_none(username).await? {
			return Err(ShellError::Rejected("none authentication"));
		}
		debug!(target = "tsbridge", host, username, "ssh authenticated");
		Ok(Box::new(RusshClient { handle }))
	}
}

struct RusshClient {
	handle: Handle<EngineTrustHandler>,
}

#[async_trait]
impl ShellClient for RusshClient {
	async fn open_session(&mut self) -> Result<Box<dyn ShellChannel>, ShellError> {
		let channel = self.handle.channel_open_session().await?;
		Ok(Box::new(RusshChannel {
			channel,
			inbox: Inbox::default(),
		}))
	}

	async fn disconnect(&mut self) {
		if let Err(err) = self.handle.disconnect(Disconnect::ByApplication, "", "en").await {
			debug!(target = "tsbridge", error = %err, "ssh disconnect failed");
		}
	}
}

/// Where channel messages are read from.
#[async_trait]
trait MessageSource: Send {
	async fn recv(&mut self) -> Option<ChannelMsg>;
}

#[async_trait]
impl MessageSource for Channel<Msg> {
	async fn recv(&mut self) -> Option<ChannelMsg> {
		self.wait().await
	}
}

/// Splits a channel's messages into request replies and shell events.
#[derive(Default)]
struct Inbox {
	/// Events that arrived while waiting for a request reply.
	backlog: VecDeque<ShellEvent>,
}

impl Inbox {
	async fn reply<S: MessageSource + ?Sized>(&mut self, source: &mut S, request: &'static str) -> Result<(), ShellError> {
		loop {
			match source.recv().await {
				Some(ChannelMsg::Success) => return Ok(()),
				Some(ChannelMsg::Failure) => return Err(ShellError::Rejected(request)),
				Some(ChannelMsg::Close) | None => return Err(ShellError::ChannelClosed),
				Some(msg) => {
					if let Some(event) = event_from(msg) {
						self.backlog.push_back(event);
					}
				}
			}
		}
	}

	async fn next_event<S: MessageSource + ?Sized>(&mut self, source: &mut S) -> Option<ShellEvent> {
		if let Some(event) = self.backlog.pop_front() {
			return Some(event);
		}
		loop {
			match source.recv().await {
				Some(ChannelMsg::Close) | None => return None,
				Some(msg) => {
					if let Some(event) = event_from(msg) {
						return Some(event);
					}
				}
			}
		}
	}
}

fn event_from(msg: ChannelMsg) -> Option<ShellEvent> {
	match msg {
		ChannelMsg::Data { data } => Some(ShellEvent::Stdout(data.to_vec())),
		ChannelMsg::ExtendedData { data, ext: 1 } => Some(ShellEvent::Stderr(data.to_vec())),
		ChannelMsg::ExitStatus { exit_status } => Some(ShellEvent::ExitStatus(exit_status)),
		ChannelMsg::Eof => Some(ShellEvent::Eof),
		_ => None,
	}
}

struct RusshChannel {
	channel: Channel<Msg>,
	inbox: Inbox,
}

#[async_trait]
impl ShellChannel for RusshChannel {
	async fn request_pty(&mut self, term: &str, geometry: TerminalGeometry) -> Result<(), ShellError> {
		self.channel.request_pty(true, term, geometry.cols, geometry.rows, 0, 0, &[]).await?;
		self.inbox.reply(&mut self.channel, "pty request").await
	}

	async fn request_shell(&mut self) -> Result<(), ShellError> {
		self.channel.request_shell(true).await?;
		self.inbox.reply(&mut self.channel, "shell request").await
	}

	async fn send_input(&mut self, data: &[u8]) -> Result<(), ShellError> {
		self.channel.data(data).await?;
		Ok(())
	}

	async fn window_change(&mut self, geometry: TerminalGeometry) -> Result<(), ShellError> {
		self.channel.window_change(geometry.cols, geometry.rows, 0, 0).await?;
		Ok(())
	}

	async fn next_event(&mut self) -> Option<ShellEvent> {
		self.inbox.next_event(&mut self.channel).await
	}

	async fn close(&mut self) -> Result<(), ShellError> {
		self.channel.close().await?;
		Ok(())
	}
}
