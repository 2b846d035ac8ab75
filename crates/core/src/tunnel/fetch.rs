//! HTTP/1.1 over a tunneled connection.
//!
//! The request travels over a connection from [`NetworkEngine::dial`] and
//! nothing else; `https` URLs get TLS on top of that same connection.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, HeaderName, HeaderValue};
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::debug;
use tsbridge_protocol::{ConfigError, FetchOptions, join_host_port};
use tsbridge_runtime::{Error, Network, NetworkEngine, Pending, Result};
use url::{Position, Url};

pub const FETCH_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS client configuration, built on first `https` request.
#[derive(Default)]
pub(crate) struct TlsSlot {
	config: OnceLock<Arc<rustls::ClientConfig>>,
}

impl TlsSlot {
	fn get(&self) -> Result<Arc<rustls::ClientConfig>> {
		if let Some(config) = self.config.get() {
			return Ok(Arc::clone(config));
		}
		let roots = rustls::RootCertStore {
			roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
		};
		let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
			.with_safe_default_protocol_versions()
			.map_err(|e| Error::Http(format!("TLS setup failed: {e}")))?
			.with_root_certificates(roots)
			.with_no_client_auth();
		config.alpn_protocols = vec![b"http/1.1".to_vec()];
		Ok(Arc::clone(self.config.get_or_init(|| Arc::new(config))))
	}
}

pub(crate) struct Prepared {
	url: Url,
	request: Request<Full<Bytes>>,
}

/// Validates options and builds the request without touching the network.
pub(crate) fn prepare(options: &FetchOptions) -> std::result::Result<Prepared, ConfigError> {
	let url = options.parsed_url()?;
	let method =
		Method::from_bytes(options.method_or_default().as_bytes()).map_err(|e| ConfigError::invalid("method", e.to_string()))?;

	let host = url.host_str().unwrap_or_default();
	let host_header = match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_string(),
	};

	let mut request = Request::builder()
		.method(method)
		.uri(&url[Position::BeforePath..Position::AfterQuery])
		.body(Full::new(Bytes::from(options.body.clone().unwrap_or_default())))
		.map_err(|e| ConfigError::invalid("url", e.to_string()))?;

	let headers = request.headers_mut();
	headers.insert(
		HOST,
		HeaderValue::from_str(&host_header).map_err(|e| ConfigError::invalid("url", e.to_string()))?,
	);
	for (name, values) in &options.headers {
		let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::invalid("headers", format!("{name}: {e}")))?;
		for value in values {
			let value = HeaderValue::from_str(value).map_err(|e| ConfigError::invalid("headers", format!("{name}: {e}")))?;
			headers.append(name.clone(), value);
		}
	}

	Ok(Prepared { url, request })
}

pub(crate) async fn fetch(engine: Arc<dyn NetworkEngine>, tls: Arc<TlsSlot>, prepared: Prepared, handle: Handle) -> Result<FetchResponse> {
	let Prepared { url, request } = prepared;
	let host = url.host_str().unwrap_or_default().to_string();
	let port = url.port_or_known_default().unwrap_or(80);
	let addr = join_host_port(&host, port);

	debug!(target = "tsbridge", method = %request.method(), %url, %addr, "tunneled fetch");
	let conn = match tokio::time::timeout(FETCH_DIAL_TIMEOUT, engine.dial(Network::Tcp, &addr, FETCH_DIAL_TIMEOUT)).await {
		Ok(Ok(conn)) => conn,
		Ok(Err(source)) => return Err(Error::ConnectFailed { addr, source }),
		Err(_) => {
			return Err(Error::ConnectTimeout {
				addr,
				timeout: FETCH_DIAL_TIMEOUT,
			});
		}
	};
	let (stream, _) = conn.into_parts();

	let response = if url.scheme() == "https" {
		let server_name = ServerName::try_from(host.trim_start_matches('[').trim_end_matches(']').to_string())
			.map_err(|e| Error::Http(format!("invalid TLS server name {host}: {e}")))?;
		let tls_stream = TlsConnector::from(tls.get()?).connect(server_name, stream).await?;
		send(tls_stream, request, &handle).await?
	} else {
		send(stream, request, &handle).await?
	};

	Ok(FetchResponse::new(response, handle))
}

async fn send<S>(io: S, request: Request<Full<Bytes>>, handle: &Handle) -> Result<Response<Incoming>>
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
		.await
		.map_err(|e| Error::Http(e.to_string()))?;
	handle.spawn(async move {
		if let Err(err) = conn.await {
			debug!(target = "tsbridge", error = %err, "tunneled http connection ended");
		}
	});
	sender.send_request(request).await.map_err(|e| Error::Http(e.to_string()))
}

enum Body {
	Unread(Incoming),
	Read(Bytes),
	Failed(String),
}

/// Response to a tunneled request. The body is read on first use and cached.
#[derive(Clone)]
pub struct FetchResponse {
	status: u16,
	status_text: String,
	headers: BTreeMap<String, Vec<String>>,
	body: Arc<Mutex<Body>>,
	handle: Handle,
}

impl FetchResponse {
	fn new(response: Response<Incoming>, handle: Handle) -> Self {
		let status = response.status();
		let status_text = match status.canonical_reason() {
			Some(reason) => format!("{} {}", status.as_u16(), reason),
			None => status.as_u16().to_string(),
		};
		let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for (name, value) in response.headers() {
			headers
				.entry(name.as_str().to_string())
				.or_default()
				.push(String::from_utf8_lossy(value.as_bytes()).into_owned());
		}
		Self {
			status: status.as_u16(),
			status_text,
			headers,
			body: Arc::new(Mutex::new(Body::Unread(response.into_body()))),
			handle,
		}
	}

	pub fn status(&self) -> u16 {
		self.status
	}

	/// Status line text, e.g. `"200 OK"`.
	pub fn status_text(&self) -> &str {
		&self.status_text
	}

	pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
		&self.headers
	}

	pub fn ok(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Buffers the full body on first call; later calls return the cached copy.
	pub fn bytes(&self) -> Pending<Bytes> {
		let body = Arc::clone(&self.body);
		Pending::spawn(&self.handle, async move { read_body(&body).await })
	}

	pub fn text(&self) -> Pending<String> {
		let body = Arc::clone(&self.body);
		Pending::spawn(&self.handle, async move {
			let bytes = read_body(&body).await?;
			Ok(String::from_utf8_lossy(&bytes).into_owned())
		})
	}
}

impl std::fmt::Debug for FetchResponse {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FetchResponse")
			.field("status", &self.status)
			.field("status_text", &self.status_text)
			.finish_non_exhaustive()
	}
}

async fn read_body(body: &Mutex<Body>) -> Result<Bytes> {
	let mut body = body.lock().await;
	let current = std::mem::replace(&mut *body, Body::Failed("body read interrupted".into()));
	let (next, result) = match current {
		Body::Unread(incoming) => match incoming.collect().await {
			Ok(collected) => {
				let bytes = collected.to_bytes();
				(Body::Read(bytes.clone()), Ok(bytes))
			}
			Err(err) => (Body::Failed(err.to_string()), Err(Error::Http(err.to_string()))),
		},
		Body::Read(bytes) => (Body::Read(bytes.clone()), Ok(bytes)),
		Body::Failed(msg) => (Body::Failed(msg.clone()), Err(Error::Http(msg))),
	};
	*body = next;
	result
}
