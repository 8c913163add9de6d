//! Shared request plumbing: one `reqwest::Client` per client instance,
//! bearer auth, and translation of every failure into [`DskError`].

use std::time::Duration;

use dsk_schemas::{DskError, DskResult};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Engine session: pooled connections plus the bearer token sent with every
/// request. Clones share the pool; dropping the last clone releases it.
#[derive(Clone)]
pub struct EngineHttp {
    http: reqwest::Client,
    token: Option<String>,
}

impl std::fmt::Debug for EngineHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHttp")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl EngineHttp {
    pub fn new(token: Option<String>, timeout: Duration) -> DskResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DskError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Same pool, different credentials.
    pub fn with_token(&self, token: Option<String>) -> Self {
        Self {
            http: self.http.clone(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let rb = self
            .http
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    /// Send `body` (if any) and decode a JSON answer.
    pub async fn json<B, T>(&self, method: Method, url: &str, body: Option<&B>) -> DskResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut rb = self.request(method, url);
        if let Some(b) = body {
            rb = rb.json(b);
        }
        let resp = check(send(rb).await?).await?;
        decode(resp).await
    }

    /// Send and discard the answer body.
    pub async fn empty<B>(&self, method: Method, url: &str, body: Option<&B>) -> DskResult<()>
    where
        B: Serialize + ?Sized,
    {
        let mut rb = self.request(method, url);
        if let Some(b) = body {
            rb = rb.json(b);
        }
        check(send(rb).await?).await.map(|_| ())
    }
}

pub(crate) async fn send(rb: RequestBuilder) -> DskResult<Response> {
    rb.send().await.map_err(transport)
}

/// Non-success answers become taxonomy errors carrying the engine's message.
pub(crate) async fn check(resp: Response) -> DskResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DskError::from_status(status.as_u16(), &body))
}

pub(crate) async fn decode<T: DeserializeOwned>(resp: Response) -> DskResult<T> {
    let bytes = resp.bytes().await.map_err(transport)?;
    // Some procedures answer with an empty body; read that as JSON null.
    let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };
    serde_json::from_slice(raw)
        .map_err(|e| DskError::Transport(format!("response decode failed: {e}")))
}

pub(crate) fn transport(e: reqwest::Error) -> DskError {
    if e.is_timeout() {
        DskError::Transport(format!("timeout: {e}"))
    } else {
        DskError::Transport(e.to_string())
    }
}
