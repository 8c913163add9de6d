use dsk_client::{EngineHttp, Method};
use dsk_schemas::{DskResult, S2sKey, UserInfo};
use serde_json::{json, Value};

/// Engine security endpoints under `{services}/auth` and `{services}/s2skey`,
/// called with whichever key the session carries.
#[derive(Debug, Clone)]
pub struct SecurityApi {
    services_url: String,
    session: EngineHttp,
}

impl SecurityApi {
    pub(crate) fn new(services_url: &str, session: EngineHttp) -> Self {
        Self {
            services_url: services_url.to_string(),
            session,
        }
    }

    pub async fn user_info(&self) -> DskResult<UserInfo> {
        let url = format!("{}/auth/user_info", self.services_url);
        self.session
            .json::<(), _>(Method::GET, &url, None)
            .await
            .map_err(|e| e.with_context("Cannot get user info"))
    }

    pub async fn list_keys(&self) -> DskResult<Vec<S2sKey>> {
        let url = format!("{}/s2skey", self.services_url);
        self.session
            .json::<(), _>(Method::GET, &url, None)
            .await
            .map_err(|e| e.with_context("Cannot list s2s keys"))
    }

    pub async fn create_key(&self, new_key: &S2sKey) -> DskResult<S2sKey> {
        let url = format!("{}/s2skey", self.services_url);
        self.session
            .json(Method::POST, &url, Some(new_key))
            .await
            .map_err(|e| e.with_context("Cannot create s2s key"))
    }

    pub async fn deactivate_key(&self, key: &str) -> DskResult<Value> {
        let url = format!("{}/s2skey", self.services_url);
        self.session
            .json(Method::POST, &url, Some(&json!({ "key": key, "active": false })))
            .await
            .map_err(|e| e.with_context("Cannot deactivate s2s key"))
    }
}
