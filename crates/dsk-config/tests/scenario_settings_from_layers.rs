//! Layered YAML -> ProviderSettings.
//!
//! GREEN when:
//! - literal keys in YAML are refused with CONFIG_SECRET_DETECTED and the
//!   value never appears in the error;
//! - env var NAMES load and flow into settings;
//! - overlays override individual settings without clobbering siblings.

use std::time::Duration;

use dsk_config::{load_layered_yaml_from_strings, resolve_secrets, ProviderSettings};

const BASE: &str = r#"
engine:
  url: "http://engine:3000/"
provider:
  prefix: "bucket_provider"
  version: "0.1.0"
watcher:
  poll_interval_ms: 250
  max_retries: 4
secrets:
  s2s_key_env: "BUCKET_PROVIDER_S2S_KEY"
"#;

const DEV_OVERLAY: &str = r#"
provider:
  version: "0.2.0"
client:
  batch_size: 50
"#;

const WITH_LITERAL_KEY: &str = r#"
engine:
  url: "http://engine:3000"
auth:
  header: "Bearer abcdefghijklmnop"
"#;

#[test]
fn literal_bearer_token_is_refused() {
    let err = load_layered_yaml_from_strings(&[WITH_LITERAL_KEY])
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_SECRET_DETECTED"), "got: {err}");
    assert!(err.contains("/auth/header"));
    assert!(!err.contains("abcdefghijklmnop"), "secret value leaked: {err}");
}

#[test]
fn overlay_flows_into_settings() {
    let cfg = load_layered_yaml_from_strings(&[BASE, DEV_OVERLAY]).unwrap();
    let s = ProviderSettings::from_config_json(&cfg.config_json).unwrap();

    assert_eq!(s.engine_url, "http://engine:3000");
    assert_eq!(s.prefix.as_deref(), Some("bucket_provider"));
    assert_eq!(s.version.as_deref(), Some("0.2.0"));
    assert_eq!(s.batch_size, 50);
    assert_eq!(s.watcher_poll_interval, Duration::from_millis(250));
    assert_eq!(s.watcher_max_retries, 4);
    assert_eq!(s.s2s_key_env, "BUCKET_PROVIDER_S2S_KEY");
}

#[test]
fn secrets_resolve_by_name() {
    let cfg = load_layered_yaml_from_strings(&[BASE]).unwrap();
    let secrets = resolve_secrets(&cfg.config_json).unwrap();
    assert_eq!(secrets.s2s_key_env, "BUCKET_PROVIDER_S2S_KEY");
}
