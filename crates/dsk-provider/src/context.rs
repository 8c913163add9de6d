//! Request-scoped context handed to every handler.

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use dsk_client::{ClientOptions, EngineHttp, EntityClient, Method, ProviderClient};
use dsk_schemas::{Action, DskError, DskResult, Entity, EntityReference, Status};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::security::SecurityApi;

/// Provider-wide connection data, fixed at registration.
#[derive(Debug)]
pub(crate) struct ProviderShared {
    pub(crate) engine_url: String,
    pub(crate) prefix: String,
    pub(crate) version: String,
    /// Session carrying the provider's s2s key.
    pub(crate) session: EngineHttp,
    pub(crate) client_opts: ClientOptions,
}

impl ProviderShared {
    pub(crate) fn services_url(&self) -> String {
        format!("{}/services/{}/{}", self.engine_url, self.prefix, self.version)
    }

    pub(crate) fn provider_url(&self) -> String {
        format!("{}/provider/{}/{}", self.engine_url, self.prefix, self.version)
    }
}

/// What a handler can reach while serving one engine callback.
///
/// Cheap to clone; the provider-wide part is behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ProceduralCtx {
    shared: Arc<ProviderShared>,
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct PermissionAnswer {
    #[serde(default)]
    success: Option<String>,
}

impl ProceduralCtx {
    pub(crate) fn new(shared: Arc<ProviderShared>, headers: HeaderMap) -> Self {
        Self { shared, headers }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    pub fn version(&self) -> &str {
        &self.shared.version
    }

    /// Token from `Authorization: Bearer <token>` on the inbound call.
    ///
    /// The scheme name is matched case-sensitively and the token must be
    /// one non-empty word; anything else is `Unauthorized`.
    pub fn invoking_token(&self) -> DskResult<String> {
        let raw = self
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| DskError::Unauthorized("no authorization header".into()))?;
        let raw = raw
            .to_str()
            .map_err(|_| DskError::Unauthorized("authorization header is not ascii".into()))?;
        match raw.split_once(' ') {
            Some(("Bearer", token))
                if !token.is_empty() && !token.chars().any(char::is_whitespace) =>
            {
                Ok(token.to_string())
            }
            _ => Err(DskError::Unauthorized(
                "authorization header must be 'Bearer <token>'".into(),
            )),
        }
    }

    /// Client acting with the invoking user's credentials.
    pub fn entity_client_for_user(&self, kind: &str) -> DskResult<EntityClient> {
        let token = self.invoking_token()?;
        Ok(self.provider_client(Some(token)).kind(kind))
    }

    /// Client acting with the provider's own s2s key.
    pub fn entity_client(&self, kind: &str) -> EntityClient {
        ProviderClient::from_session(
            self.shared.session.clone(),
            &self.shared.engine_url,
            &self.shared.prefix,
            &self.shared.version,
            self.shared.client_opts.batch_size,
        )
        .kind(kind)
    }

    fn provider_client(&self, token: Option<String>) -> ProviderClient {
        ProviderClient::from_session(
            self.shared.session.with_token(token),
            &self.shared.engine_url,
            &self.shared.prefix,
            &self.shared.version,
            self.shared.client_opts.batch_size,
        )
    }

    /// Ask the engine whether the invoking user may perform every
    /// `(action, entity)` pair. Fails closed: a missing token, a transport
    /// error or any answer other than `{"success": "Ok"}` is `false`.
    pub async fn check_permission(&self, checks: &[(Action, EntityReference)]) -> bool {
        let token = match self.invoking_token() {
            Ok(t) => t,
            Err(_) => return false,
        };
        let body: Vec<Value> = checks
            .iter()
            .map(|(action, entity)| json!([action, entity]))
            .collect();
        let url = format!("{}/check_permission", self.shared.services_url());
        let answer: DskResult<PermissionAnswer> = self
            .shared
            .session
            .with_token(Some(token))
            .json(Method::POST, &url, Some(&body))
            .await;
        match answer {
            Ok(a) => a.success.as_deref() == Some("Ok"),
            Err(e) => {
                warn!(error = %e, "check_permission failed closed");
                false
            }
        }
    }

    /// Record the converged status of `entity` through the engine's status
    /// side channel. Uses the provider key.
    pub async fn update_status(&self, entity: &EntityReference, status: &Status) -> DskResult<()> {
        let url = format!("{}/update_status", self.shared.provider_url());
        let body = json!({ "entity_ref": entity, "status": status });
        debug!(kind = %entity.kind, uuid = %entity.uuid, "update_status");
        self.shared
            .session
            .empty(Method::PATCH, &url, Some(&body))
            .await
            .map_err(|e| e.with_context("update_status"))
    }

    /// Engine URL of an entity.
    pub fn url_for(&self, entity: &Entity) -> String {
        format!(
            "{}/{}/{}",
            self.shared.services_url(),
            entity.metadata.kind,
            entity.metadata.uuid
        )
    }

    pub fn provider_security_api(&self) -> SecurityApi {
        SecurityApi::new(&self.shared.services_url(), self.shared.session.clone())
    }

    /// Security calls made with someone else's key.
    pub fn user_security_api(&self, key: &str) -> SecurityApi {
        SecurityApi::new(
            &self.shared.services_url(),
            self.shared.session.with_token(Some(key.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn ctx_with(auth: Option<&str>) -> ProceduralCtx {
        let shared = Arc::new(ProviderShared {
            engine_url: "http://engine".into(),
            prefix: "store".into(),
            version: "0.1".into(),
            session: EngineHttp::new(Some("provider-key".into()), Duration::from_secs(1)).unwrap(),
            client_opts: ClientOptions::default(),
        });
        let mut headers = HeaderMap::new();
        if let Some(a) = auth {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(a).unwrap());
        }
        ProceduralCtx::new(shared, headers)
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(ctx_with(Some("Bearer abc")).invoking_token().unwrap(), "abc");
    }

    #[test]
    fn malformed_authorization_is_unauthorized() {
        for bad in [
            None,
            Some("bearer abc"),
            Some("Bearer "),
            Some("Basic abc"),
            Some("abc"),
            Some("Bearer a b"),
            Some("Bearer  abc"),
            Some("Bearer abc\t"),
        ] {
            let err = ctx_with(bad).invoking_token().unwrap_err();
            assert!(matches!(err, DskError::Unauthorized(_)), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn urls_follow_provider_layout() {
        let ctx = ctx_with(None);
        let e = EntityReference::new(uuid::Uuid::nil(), "bucket");
        assert_eq!(
            ctx.entity_client("bucket").base_url(),
            "http://engine/services/store/0.1/bucket"
        );
        assert_eq!(ctx.shared.provider_url(), "http://engine/provider/store/0.1");
        let entity = Entity {
            metadata: dsk_schemas::Metadata::new(e.uuid, e.kind.clone()),
            spec: Value::Null,
            status: Value::Null,
        };
        assert_eq!(
            ctx.url_for(&entity),
            format!("http://engine/services/store/0.1/bucket/{}", uuid::Uuid::nil())
        );
    }

    #[test]
    fn user_client_requires_token() {
        assert!(ctx_with(None).entity_client_for_user("bucket").is_err());
        assert!(ctx_with(Some("Bearer u1")).entity_client_for_user("bucket").is_ok());
    }
}
