//! Backend round-trips through `open()`, with an in-process HTTP key/value
//! server standing in for the remote store.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use substreams_sink_core::config::{BasicAuth, CursorBackend, CursorLocation};
use substreams_sink_core::cursor::CursorToken;
use substreams_sink_core::error::CursorError;
use substreams_sink_cursor::{open, CursorWriter, RetryPolicy};

#[derive(Clone, Default)]
struct KvState {
    value: Arc<Mutex<Option<String>>>,
    /// Expected `Authorization` header; `None` = open server.
    auth: Option<&'static str>,
    /// Serve the raw value instead of a KV listing.
    raw: bool,
}

impl KvState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        match self.auth {
            None => true,
            Some(expected) => headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == expected),
        }
    }
}

async fn get_key(State(state): State<KvState>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let value = state.value.lock().unwrap().clone();
    match value {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(v) if state.raw => v.into_response(),
        Some(v) => Json(serde_json::json!([{ "Key": "sink/cursor", "Value": v }])).into_response(),
    }
}

async fn put_key(State(state): State<KvState>, headers: HeaderMap, body: String) -> StatusCode {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    *state.value.lock().unwrap() = Some(body);
    StatusCode::OK
}

async fn serve(state: KvState) -> String {
    let app = Router::new()
        .route("/v1/kv/sink/cursor", get(get_key).put(put_key))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/kv/sink/cursor")
}

#[tokio::test]
async fn http_missing_key_reads_as_empty() {
    let url = serve(KvState::default()).await;
    let store = open(&CursorLocation::new(url, None).unwrap()).unwrap();
    assert!(store.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn http_roundtrip_through_kv_listing() {
    let state = KvState::default();
    let url = serve(state.clone()).await;
    let location = CursorLocation::new(url, None).unwrap();
    assert_eq!(location.backend, CursorBackend::Http);
    let store = open(&location).unwrap();

    store.write(&CursorToken::from("c1:abc")).await.unwrap();
    assert_eq!(state.value.lock().unwrap().as_deref(), Some("c1:abc"));
    assert_eq!(store.read().await.unwrap().as_str(), "c1:abc");
}

#[tokio::test]
async fn http_raw_body_is_the_token() {
    let state = KvState {
        raw: true,
        ..Default::default()
    };
    *state.value.lock().unwrap() = Some("tok-2".into());
    let url = serve(state).await;
    let store = open(&CursorLocation::new(url, None).unwrap()).unwrap();
    assert_eq!(store.read().await.unwrap().as_str(), "tok-2");
}

#[tokio::test]
async fn http_basic_auth_from_url_userinfo() {
    let state = KvState {
        auth: Some("Basic YWxpY2U6c2VjcmV0"),
        ..Default::default()
    };
    let url = serve(state.clone()).await;
    let with_userinfo = url.replacen("http://", "http://alice:secret@", 1);
    let location = CursorLocation::new(with_userinfo, None).unwrap();
    assert!(!location.location.contains("alice"));

    let store = open(&location).unwrap();
    store.write(&CursorToken::from("authed")).await.unwrap();
    assert_eq!(store.read().await.unwrap().as_str(), "authed");
}

#[tokio::test]
async fn http_explicit_basic_auth() {
    let state = KvState {
        auth: Some("Basic c2luazpodW50ZXIy"),
        ..Default::default()
    };
    let url = serve(state).await;
    let auth = BasicAuth::parse("sink:hunter2").unwrap();
    let store = open(&CursorLocation::new(url, Some(auth)).unwrap()).unwrap();
    store.write(&CursorToken::from("t")).await.unwrap();
    assert_eq!(store.read().await.unwrap().as_str(), "t");
}

#[tokio::test]
async fn http_rejected_write_is_an_error() {
    let state = KvState {
        auth: Some("Basic c2luazpodW50ZXIy"),
        ..Default::default()
    };
    let url = serve(state).await;
    let store = open(&CursorLocation::new(url, None).unwrap()).unwrap();

    let err = store.write(&CursorToken::from("t")).await.unwrap_err();
    assert!(matches!(err, CursorError::Status { status: 401, .. }));
    // Unauthorized GET is "no checkpoint", not an error.
    assert!(store.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn file_roundtrip_through_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cursor.lock");
    let location = CursorLocation::new(path.display().to_string(), None).unwrap();
    assert_eq!(location.backend, CursorBackend::File);

    let store = open(&location).unwrap();
    assert!(store.read().await.unwrap().is_empty());
    store.write(&CursorToken::from("X")).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "X");
}

#[tokio::test]
async fn writer_leaves_newest_cursor_in_http_store() {
    let state = KvState::default();
    let url = serve(state.clone()).await;
    let store = open(&CursorLocation::new(url, None).unwrap()).unwrap();

    let writer = CursorWriter::spawn(store, RetryPolicy::default());
    for i in 0..20 {
        writer.submit(CursorToken::new(format!("c{i}")));
    }
    let stats = writer.flush().await;

    assert_eq!(stats.persisted + stats.coalesced, 20);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.last_persisted.unwrap().as_str(), "c19");
    assert_eq!(state.value.lock().unwrap().as_deref(), Some("c19"));
}
