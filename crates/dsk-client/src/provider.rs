use dsk_schemas::DskResult;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::entity::{services_url, ClientOptions, EntityClient};
use crate::http::EngineHttp;

/// Client for one provider `(prefix, version)`: provider-level procedures
/// plus a factory for per-kind [`EntityClient`]s sharing one HTTP session.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: EngineHttp,
    services_url: String,
    batch_size: usize,
}

impl ProviderClient {
    pub fn new(
        engine_url: &str,
        prefix: &str,
        version: &str,
        token: Option<String>,
    ) -> DskResult<Self> {
        Self::with_options(engine_url, prefix, version, token, ClientOptions::default())
    }

    pub fn with_options(
        engine_url: &str,
        prefix: &str,
        version: &str,
        token: Option<String>,
        opts: ClientOptions,
    ) -> DskResult<Self> {
        Ok(Self {
            http: EngineHttp::new(token, opts.timeout)?,
            services_url: services_url(engine_url, prefix, version),
            batch_size: opts.batch_size,
        })
    }

    /// Build on an existing session.
    pub fn from_session(
        http: EngineHttp,
        engine_url: &str,
        prefix: &str,
        version: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            http,
            services_url: services_url(engine_url, prefix, version),
            batch_size,
        }
    }

    pub fn services_url(&self) -> &str {
        &self.services_url
    }

    pub fn kind(&self, kind: &str) -> EntityClient {
        EntityClient::from_parts(
            self.http.clone(),
            format!("{}/{}", self.services_url, kind),
            kind,
            self.batch_size,
        )
    }

    pub async fn invoke_procedure(&self, name: &str, input: Value) -> DskResult<Value> {
        let url = format!("{}/procedure/{}", self.services_url, name);
        debug!(procedure = name, "provider/invoke");
        self.http
            .json(Method::POST, &url, Some(&json!({ "input": input })))
            .await
    }
}
