//! Subscriber ingress over HTTP
//!
//! Routes:
//! - `GET /{app}/{name}.flv` — HTTP-FLV: a streamed FLV file, one flush per
//!   tag so client disconnects surface promptly.
//! - `GET /ws/{app}/{name}` — WebSocket-FLV: header+PreviousTagSize0 as the
//!   first binary frame, then exactly one FLV tag per frame.
//! - `GET /api/streams`, `GET /api/server` — JSON inspection surface.
//! - `GET /healthz` — liveness, served from its own port.
//!
//! Malformed paths get 400, absent or publisherless streams 404, non-GET
//! methods 405.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Serialize;

use crate::bus::{Registry, Stream, StreamKey};
use crate::egress::{FlvEgress, SubscriberGuard};

/// Shared state for the media router.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }
}

/// Router for the media port: HTTP-FLV, WebSocket-FLV, and the API.
pub fn media_router(state: AppState) -> Router {
    Router::new()
        .route("/api/streams", get(api_streams))
        .route("/api/server", get(api_server))
        .route("/ws/*path", get(ws_flv))
        .fallback(http_flv)
        .with_state(state)
}

/// Router for the dedicated health port.
pub fn health_router() -> Router {
    Router::new().route("/healthz", get(|| async { "ok" }))
}

/// Resolve `(app, name)` to a stream that currently has a publisher.
fn lookup(registry: &Registry, app: &str, name: &str) -> Result<Arc<Stream>, StatusCode> {
    let key = StreamKey::new(app, name);
    let stream = registry.get(&key).ok_or(StatusCode::NOT_FOUND)?;
    if !stream.has_publisher() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(stream)
}

/// HTTP-FLV endpoint, `GET /{app}/{name}.flv`.
///
/// Registered as the fallback so stream names may contain slashes; method
/// and path shape are checked here.
async fn http_flv(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = uri.path().trim_start_matches('/');
    let Some(stream_path) = path.strip_suffix(".flv") else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some((app, name)) = stream_path.split_once('/') else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if app.is_empty() || name.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let stream = match lookup(&state.registry, app, name) {
        Ok(stream) => stream,
        Err(status) => return status.into_response(),
    };

    tracing::info!(app, name, "HTTP-FLV subscriber attached");
    let (guard, mut egress) = SubscriberGuard::attach(stream, Arc::clone(&state.registry));

    // The generator owns the subscriber; dropping the response body detaches
    // it from the stream.
    let body = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Bytes, io::Error>(FlvEgress::prologue());
        loop {
            yield Ok(egress.next_tag().await);
        }
    };

    (
        [
            (header::CONTENT_TYPE, "video/x-flv"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// WebSocket-FLV endpoint, `GET /ws/{app}/{name}`.
async fn ws_flv(
    State(state): State<AppState>,
    Path(path): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some((app, name)) = path.split_once('/') else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if app.is_empty() || name.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let stream = match lookup(&state.registry, app, name) {
        Ok(stream) => stream,
        Err(status) => return status.into_response(),
    };

    tracing::info!(app, name, "WebSocket-FLV subscriber attached");
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| serve_ws(socket, stream, registry))
}

async fn serve_ws(mut socket: WebSocket, stream: Arc<Stream>, registry: Arc<Registry>) {
    let (_guard, mut egress) = SubscriberGuard::attach(stream, registry);

    if socket
        .send(Message::Binary(FlvEgress::prologue().to_vec()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            tag = egress.next_tag() => {
                if socket.send(Message::Binary(tag.to_vec())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct StreamInfo {
    app: String,
    name: String,
    has_publisher: bool,
    subscriber_count: usize,
}

#[derive(Debug, Serialize)]
struct StreamsResponse {
    streams: Vec<StreamInfo>,
}

/// `GET /api/streams`: active streams with publisher/subscriber info.
async fn api_streams(State(state): State<AppState>) -> Json<StreamsResponse> {
    let mut streams = Vec::new();
    for key in state.registry.list() {
        if let Some(stream) = state.registry.get(&key) {
            streams.push(StreamInfo {
                app: key.app,
                name: key.name,
                has_publisher: stream.has_publisher(),
                subscriber_count: stream.subscriber_count(),
            });
        }
    }
    Json(StreamsResponse { streams })
}

#[derive(Debug, Serialize)]
struct ServerResponse {
    version: &'static str,
    uptime_secs: u64,
    enabled_services: Vec<&'static str>,
}

/// `GET /api/server`: version and uptime.
async fn api_server(State(state): State<AppState>) -> Json<ServerResponse> {
    Json(ServerResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        enabled_services: vec!["rtmp_ingest", "http_flv", "ws_flv"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Arc::new(Registry::new()))
    }

    async fn send(router: Router, req: Request<Body>) -> (StatusCode, Bytes) {
        let response = router.oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_missing_stream_is_404() {
        let router = media_router(test_state());
        let req = Request::builder()
            .uri("/live/absent.flv")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(router, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_publisherless_stream_is_404() {
        let state = test_state();
        state.registry.get_or_create(StreamKey::new("live", "idle"));
        let router = media_router(state);

        let req = Request::builder()
            .uri("/live/idle.flv")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(router, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_path_is_400() {
        for uri in ["/noext", "/justname.flv", "/live/.flv", "//name.flv"] {
            let router = media_router(test_state());
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, _) = send(router, req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "uri {}", uri);
        }
    }

    #[tokio::test]
    async fn test_non_get_is_405() {
        let router = media_router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/live/cam.flv")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(router, req).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_api_streams_lists_active() {
        let state = test_state();
        let (stream, _) = state.registry.get_or_create(StreamKey::new("live", "cam1"));
        stream.attach_publisher(1);
        let router = media_router(state);

        let req = Request::builder()
            .uri("/api/streams")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router, req).await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let streams = parsed["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0]["app"], "live");
        assert_eq!(streams[0]["name"], "cam1");
        assert_eq!(streams[0]["has_publisher"], true);
        assert_eq!(streams[0]["subscriber_count"], 0);
    }

    #[tokio::test]
    async fn test_api_server_reports_version() {
        let router = media_router(test_state());
        let req = Request::builder()
            .uri("/api/server")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router, req).await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(health_router(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok");
    }
}
