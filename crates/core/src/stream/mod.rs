//! Raw byte-stream sessions.
//!
//! Each session owns its dialed connection outright. One read loop per
//! session hands every chunk to the host's [`ReadSink`] in arrival order;
//! writes go through a buffer that grows to the largest payload seen and is
//! never shrunk. [`StreamSession::close`] is the only way to cancel the loop.


use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tsbridge_protocol::TcpOptions;
use tsbridge_runtime::{EngineStream, Error, Network, NetworkEngine, Pending, Result, guarded};

use crate::registry::{SessionId, SessionKind, SessionRegistry};

/// Host receiver for bytes read from a stream session.
///
/// `bytes` is a view into the session's read buffer and is only valid for
/// the duration of the call.
pub trait ReadSink: Send + Sync {
	fn on_read(&self, bytes: &[u8]);
}

impl<F> ReadSink for F
where
	F: Fn(&[u8]) + Send + Sync,
{
	fn on_read(&self, bytes: &[u8]) {
		self(bytes)
	}
}

type Stream = Box<dyn EngineStream>;

struct StreamWriter {
	/// `None` once the session has been shut down.
	half: Option<WriteHalf<Stream>>,
	buf: Vec<u8>,
}

struct StreamInner {
	id: SessionId,
	remote_addr: String,
	peer_addr: String,
	writer: Arc<Mutex<StreamWriter>>,
	cancel: CancellationToken,
}

/// Handle to a live byte-stream session.
#[derive(Clone)]
pub struct StreamSession {
	inner: Arc<StreamInner>,
	handle: Handle,
}

impl std::fmt::Debug for StreamSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamSession")
			.field("id", &self.inner.id)
			.field("remote_addr", &self.inner.remote_addr)
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Dials `options` through `engine` and starts the session's read loop.
///
/// Options must already be validated.
pub(crate) async fn connect(
	engine: Arc<dyn NetworkEngine>,
	registry: Arc<SessionRegistry>,
	options: TcpOptions,
	sink: Arc<dyn ReadSink>,
	handle: Handle,
) -> Result<StreamSession> {
	let addr = options.address();
	let timeout = options.connect_timeout;
	debug!(target = "tsbridge", %addr, ?timeout, "dialing stream session");

	let conn = match tokio::time::timeout(timeout, engine.dial(Network::Tcp, &addr, timeout)).await {
		Ok(Ok(conn)) => conn,
		Ok(Err(source)) => return Err(Error::ConnectFailed { addr, source }),
		Err(_) => return Err(Error::ConnectTimeout { addr, timeout }),
	};

	let (stream, peer_addr) = conn.into_parts();
	let (reader, writer) = tokio::io::split(stream);
	let cancel = CancellationToken::new();
	let id = registry.register(SessionKind::Stream, &addr, cancel.clone());

	let writer = Arc::new(Mutex::new(StreamWriter {
		half: Some(writer),
		buf: Vec::with_capacity(options.write_buffer_size),
	}));

	handle.spawn(read_loop(
		ReadLoop {
			id,
			reader,
			buf: vec![0; options.read_buffer_size],
			sink,
			cancel: cancel.clone(),
			writer: Arc::clone(&writer),
		},
		registry,
	));

	debug!(target = "tsbridge", session = id, %addr, %peer_addr, "stream session established");
	Ok(StreamSession {
		inner: Arc::new(StreamInner {
			id,
			remote_addr: addr,
			peer_addr,
			writer,
			cancel,
		}),
		handle,
	})
}

impl StreamSession {
	pub fn id(&self) -> SessionId {
		self.inner.id
	}

	/// The dialed `host:port`.
	pub fn remote_addr(&self) -> &str {
		&self.inner.remote_addr
	}

	/// Peer address as reported by the engine's connection.
	pub fn peer_addr(&self) -> &str {
		&self.inner.peer_addr
	}

	pub fn is_closed(&self) -> bool {
		self.inner.cancel.is_cancelled()
	}

	/// Completes once the session has been closed from either end.
	pub async fn closed(&self) {
		self.inner.cancel.cancelled().await
	}

	/// Writes all of `bytes` and resolves with the count written.
	///
	/// The payload is copied before this returns. A write issued while a
	/// previous one is still in flight is rejected with
	/// [`Error::WriteInProgress`].
	pub fn write(&self, bytes: &[u8]) -> Pending<usize> {
		if self.is_closed() {
			return Pending::rejected(Error::SessionClosed);
		}
		let Ok(mut writer) = Arc::clone(&self.inner.writer).try_lock_owned() else {
			return Pending::rejected(Error::WriteInProgress);
		};

		let len = bytes.len();
		if writer.buf.len() < len {
			writer.buf.resize(len, 0);
		}
		writer.buf[..len].copy_from_slice(bytes);

		let cancel = self.inner.cancel.clone();
		let id = self.inner.id;
		Pending::spawn(&self.handle, async move {
			let StreamWriter { half, buf } = &mut *writer;
			let Some(half) = half.as_mut() else {
				return Err(Error::SessionClosed);
			};
			let result = tokio::select! {
				_ = cancel.cancelled() => return Err(Error::SessionClosed),
				res = async {
					half.write_all(&buf[..len]).await?;
					half.flush().await
				} => res,
			};
			match result {
				Ok(()) => Ok(len),
				Err(err) => {
					warn!(target = "tsbridge", session = id, error = %err, "stream write failed, closing session");
					cancel.cancel();
					Err(err.into())
				}
			}
		})
	}

	/// Closes the session. Safe to call any number of times.
	pub fn close(&self) -> Pending<()> {
		self.inner.cancel.cancel();
		let writer = Arc::clone(&self.inner.writer);
		let id = self.inner.id;
		Pending::spawn(&self.handle, async move {
			shutdown_writer(id, &writer).await;
			Ok(())
		})
	}
}

struct ReadLoop<R> {
	id: SessionId,
	reader: R,
	buf: Vec<u8>,
	sink: Arc<dyn ReadSink>,
	cancel: CancellationToken,
	writer: Arc<Mutex<StreamWriter>>,
}

async fn read_loop<R>(mut l: ReadLoop<R>, registry: Arc<SessionRegistry>)
where
	R: AsyncRead + Unpin,
{
	loop {
		let n = tokio::select! {
			biased;
			_ = l.cancel.cancelled() => break,
			res = l.reader.read(&mut l.buf) => match res {
				Ok(0) => {
					debug!(target = "tsbridge", session = l.id, "stream closed by peer");
					break;
				}
				Ok(n) => n,
				Err(err) => {
					warn!(target = "tsbridge", session = l.id, error = %err, "stream read failed");
					break;
				}
			},
		};

		let sink = &l.sink;
		let chunk = &l.buf[..n];
		if let Err(fault) = guarded("readCallback", || sink.on_read(chunk)) {
			warn!(target = "tsbridge", session = l.id, error = %fault, "read callback panicked");
		}
	}

	l.cancel.cancel();
	shutdown_writer(l.id, &l.writer).await;
	registry.remove(l.id);
}

async fn shutdown_writer(id: SessionId, writer: &Mutex<StreamWriter>) {
	let half = writer.lock().await.half.take();
	if let Some(mut half) = half {
		if let Err(err) = half.shutdown().await {
			debug!(target = "tsbridge", session = id, error = %err, "stream shutdown failed");
		}
	}
}
