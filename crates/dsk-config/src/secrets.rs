//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (`/secrets/s2s_key_env`). Callers
//! resolve once at startup and pass [`ResolvedSecrets`] into constructors.
//! `Debug` redacts values; error messages name the variable, never the value.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::settings::DEFAULT_S2S_KEY_ENV;

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Name of the variable the key was read from.
    pub s2s_key_env: String,
    /// Provider's service-to-service key. `None` when the variable is unset
    /// or blank.
    pub s2s_key: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("s2s_key_env", &self.s2s_key_env)
            .field("s2s_key", &self.s2s_key.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedSecrets {
    /// The key, or an error naming the variable that should hold it.
    pub fn require_s2s_key(&self) -> Result<&str> {
        match self.s2s_key.as_deref() {
            Some(k) => Ok(k),
            None => bail!(
                "SECRET_MISSING: env var {} is not set (provider s2s key)",
                self.s2s_key_env
            ),
        }
    }
}

/// Resolve secrets named by `config_json`.
///
/// An absent key is not an error here; binaries that must authenticate call
/// [`ResolvedSecrets::require_s2s_key`].
pub fn resolve_secrets(config_json: &Value) -> Result<ResolvedSecrets> {
    let var = match config_json.pointer("/secrets/s2s_key_env") {
        None | Some(Value::Null) => DEFAULT_S2S_KEY_ENV.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => bail!("CONFIG_INVALID: /secrets/s2s_key_env must be an env var name"),
    };
    let s2s_key = resolve_env(&var);
    Ok(ResolvedSecrets {
        s2s_key_env: var,
        s2s_key,
    })
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn debug_never_prints_key() {
        let s = ResolvedSecrets {
            s2s_key_env: "MY_KEY".into(),
            s2s_key: Some("topsecretvalue".into()),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("topsecretvalue"));
        assert!(dbg.contains("MY_KEY"));
    }

    #[test]
    fn missing_key_error_names_variable() {
        let s = resolve_secrets(&json!({"secrets": {"s2s_key_env": "DSK_TEST_UNSET_VAR_91"}}))
            .unwrap();
        let err = s.require_s2s_key().unwrap_err().to_string();
        assert!(err.contains("DSK_TEST_UNSET_VAR_91"));
    }

    #[test]
    fn non_string_env_name_rejected() {
        assert!(resolve_secrets(&json!({"secrets": {"s2s_key_env": 5}})).is_err());
    }
}
