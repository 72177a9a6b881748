//! HTTP key/value cursor backend backed by `reqwest`.
//!
//! - `GET <url>` returns either a KV listing `[{"Value": "<token>"}]` or the
//!   raw token as text. Any non-success status means "no checkpoint".
//! - `PUT <url>` stores the raw token bytes.
//!
//! Basic-Auth credentials, when configured, are attached to both verbs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use substreams_sink_core::checkpoint::CursorStore;
use substreams_sink_core::config::{BasicAuth, CursorLocation};
use substreams_sink_core::cursor::CursorToken;
use substreams_sink_core::error::CursorError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of a key/value listing (Consul-style).
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Extract a cursor from a GET body.
///
/// Structured KV listing first, raw text second. Never fails: empty or
/// unusable bodies are "no checkpoint". A raw-text body is returned
/// verbatim, like the file backend does.
pub fn parse_cursor_body(body: &str) -> CursorToken {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return CursorToken::empty();
    }
    match serde_json::from_str::<Vec<KvEntry>>(trimmed) {
        Ok(entries) => entries
            .into_iter()
            .next()
            .and_then(|entry| entry.value)
            .map(CursorToken::from)
            .unwrap_or_default(),
        Err(_) => CursorToken::from(body),
    }
}

/// Cursor stored behind an HTTP URL.
pub struct HttpCursorStore {
    url: String,
    auth: Option<BasicAuth>,
    http: reqwest::Client,
}

impl HttpCursorStore {
    pub fn new(location: &CursorLocation) -> Result<Self, CursorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("substreams-sink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CursorError::Http {
                location: location.location.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            url: location.location.clone(),
            auth: location.auth.clone(),
            http,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.username, auth.password.as_ref()),
            None => request,
        }
    }

    fn http_error(&self, e: reqwest::Error) -> CursorError {
        CursorError::Http {
            location: self.url.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl CursorStore for HttpCursorStore {
    async fn read(&self) -> Result<CursorToken, CursorError> {
        let resp = self
            .authorize(self.http.get(&self.url))
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        if !resp.status().is_success() {
            tracing::debug!(status = resp.status().as_u16(), url = %self.url, "no cursor stored");
            return Ok(CursorToken::empty());
        }

        let body = resp.text().await.map_err(|e| self.http_error(e))?;
        Ok(parse_cursor_body(&body))
    }

    async fn write(&self, token: &CursorToken) -> Result<(), CursorError> {
        let resp = self
            .authorize(self.http.put(&self.url))
            .body(token.as_str().to_owned())
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        if !resp.status().is_success() {
            return Err(CursorError::Status {
                location: self.url.clone(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    fn location(&self) -> &str {
        &self.url
    }
}
