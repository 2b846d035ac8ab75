mod common;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{MemoryEngine, StaticDns};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::io::DuplexStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tsbridge::{Bridge, BridgeConfig, ErrorKind, FetchOptions, NetworkEngine};

fn bridge(engine: &Arc<MemoryEngine>) -> Bridge {
	Bridge::new(
		Arc::clone(engine) as Arc<dyn NetworkEngine>,
		BridgeConfig::default(),
		Handle::current(),
	)
}

/// Serves every connection from `listener` with a handler that echoes the request.
fn serve(mut listener: mpsc::UnboundedReceiver<DuplexStream>) {
	tokio::spawn(async move {
		while let Some(conn) = listener.recv().await {
			tokio::spawn(async move {
				let _ = http1::Builder::new().serve_connection(TokioIo::new(conn), service_fn(echo)).await;
			});
		}
	});
}

async fn echo(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
	let (parts, body) = request.into_parts();
	let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
	if parts.uri.path() == "/missing" {
		let mut response = Response::new(Full::new(Bytes::from_static(b"no such thing")));
		*response.status_mut() = StatusCode::NOT_FOUND;
		return Ok(response);
	}

	let headers: serde_json::Map<String, serde_json::Value> = parts
		.headers
		.iter()
		.map(|(k, v)| (k.as_str().to_string(), json!(v.to_str().unwrap_or_default())))
		.collect();
	let echoed = json!({
		"method": parts.method.as_str(),
		"target": parts.uri.to_string(),
		"headers": headers,
		"body": String::from_utf8_lossy(&body),
	});
	let response = Response::builder()
		.header("content-type", "application/json")
		.header("x-served-by", "echo")
		.body(Full::new(Bytes::from(echoed.to_string())))
		.unwrap();
	Ok(response)
}

#[tokio::test]
async fn get_is_the_default_method() {
	let engine = MemoryEngine::new();
	serve(engine.listen("api.corp.ts.net:80"));

	let response = bridge(&engine)
		.fetch(FetchOptions::new("http://api.corp.ts.net/v1/items?limit=2"))
		.await
		.unwrap();
	assert_eq!(response.status(), 200);
	assert_eq!(response.status_text(), "200 OK");
	assert!(response.ok());
	assert_eq!(response.headers()["x-served-by"], vec!["echo".to_string()]);

	let echoed: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
	assert_eq!(echoed["method"], "GET");
	assert_eq!(echoed["target"], "/v1/items?limit=2");
	assert_eq!(echoed["headers"]["host"], "api.corp.ts.net");
}

#[tokio::test]
async fn method_headers_and_body_are_sent() {
	let engine = MemoryEngine::new();
	serve(engine.listen("api:8080"));

	let options = FetchOptions::new("http://api:8080/submit")
		.method("POST")
		.header("Content-Type", "application/json")
		.header("X-Trace", "abc")
		.body(r#"{"n":1}"#);
	let response = bridge(&engine).fetch(options).await.unwrap();

	let echoed: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
	assert_eq!(echoed["method"], "POST");
	assert_eq!(echoed["headers"]["host"], "api:8080");
	assert_eq!(echoed["headers"]["x-trace"], "abc");
	assert_eq!(echoed["body"], r#"{"n":1}"#);
}

#[tokio::test]
async fn error_statuses_are_reported_not_masked() {
	let engine = MemoryEngine::new();
	serve(engine.listen("api:80"));

	let response = bridge(&engine).fetch(FetchOptions::new("http://api/missing")).await.unwrap();
	assert_eq!(response.status(), 404);
	assert_eq!(response.status_text(), "404 Not Found");
	assert!(!response.ok());
}

#[tokio::test]
async fn body_can_be_read_more_than_once() {
	let engine = MemoryEngine::new();
	serve(engine.listen("api:80"));

	let response = bridge(&engine).fetch(FetchOptions::new("http://api/missing")).await.unwrap();
	assert_eq!(response.text().await.unwrap(), "no such thing");
	assert_eq!(response.text().await.unwrap(), "no such thing");
	assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"no such thing"));
}

#[tokio::test]
async fn bad_urls_reject_without_dialing() {
	let engine = MemoryEngine::new();
	let bridge = bridge(&engine);

	for url in ["", "not a url", "ftp://files/x", "http://"] {
		let err = bridge.fetch(FetchOptions::new(url)).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Configuration, "{url}: {err}");
	}
	let err = bridge
		.fetch(FetchOptions::new("http://api/").method("NOT A METHOD"))
		.await
		.unwrap_err();
	assert!(err.is_config());
	assert_eq!(engine.dial_count(), 0);
}

#[tokio::test]
async fn unreachable_hosts_are_connect_errors() {
	let engine = MemoryEngine::new();
	let err = bridge(&engine).fetch(FetchOptions::new("http://offline/")).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Connect);
}

#[tokio::test]
async fn resolve_returns_the_wire_answer_and_resolvers() {
	let engine = MemoryEngine::new();
	let bridge = bridge(&engine);

	let result = bridge.resolve("db.corp.ts.net").await.unwrap();
	assert_eq!(result.result, StaticDns::ANSWER);
	assert_eq!(result.resolvers, vec![StaticDns::RESOLVER.to_string()]);
	assert_eq!(engine.dns().queries(), vec![("db.corp.ts.net".to_string(), "A".to_string())]);

	bridge.resolve("web").await.unwrap();
	assert_eq!(engine.local_api_calls(), 1);

	let value = serde_json::to_value(&result).unwrap();
	assert_eq!(value["result"], "EjSBgA==");
}

#[tokio::test]
async fn resolve_rejects_empty_names() {
	let engine = MemoryEngine::new();
	let err = bridge(&engine).resolve("  ").await.unwrap_err();
	assert!(err.is_config());
	assert_eq!(engine.local_api_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn resolve_gives_up_after_its_timeout() {
	let engine = MemoryEngine::new();
	engine.dns().hang();

	let started = tokio::time::Instant::now();
	let err = bridge(&engine).resolve("slow").await.unwrap_err();
	assert!(err.is_timeout(), "{err}");
	assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test]
async fn shutdown_releases_the_local_client() {
	let engine = MemoryEngine::new();
	let bridge = bridge(&engine);

	bridge.resolve("a").await.unwrap();
	bridge.shutdown();
	bridge.resolve("b").await.unwrap();
	assert_eq!(engine.local_api_calls(), 2);
}
