use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Page size used by filter iteration when the caller does not choose one.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Env var holding the provider's service-to-service key, unless the config
/// names a different one under `/secrets/s2s_key_env`.
pub const DEFAULT_S2S_KEY_ENV: &str = "DSK_S2S_KEY";

/// Effective settings for one provider process.
///
/// Built once at startup from the loaded config JSON (or the environment)
/// and passed by value into constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    /// Engine base URL, no trailing slash.
    pub engine_url: String,
    pub prefix: Option<String>,
    pub version: Option<String>,
    pub allow_extra_props: bool,
    /// Host the engine uses to reach our callbacks.
    pub public_host: String,
    pub public_port: u16,
    /// Local bind address; defaults to `0.0.0.0:{public_port}`.
    pub bind_addr: Option<String>,
    pub watcher_poll_interval: Duration,
    pub watcher_max_retries: u32,
    pub batch_size: usize,
    pub request_timeout: Duration,
    /// NAME of the env var that carries the s2s key. Never the value.
    pub s2s_key_env: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            engine_url: "http://127.0.0.1:3000".to_string(),
            prefix: None,
            version: None,
            allow_extra_props: false,
            public_host: "127.0.0.1".to_string(),
            public_port: 9000,
            bind_addr: None,
            watcher_poll_interval: Duration::from_millis(5_000),
            watcher_max_retries: 10,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: Duration::from_millis(5_000),
            s2s_key_env: DEFAULT_S2S_KEY_ENV.to_string(),
        }
    }
}

impl ProviderSettings {
    /// Read settings from a merged config document.
    ///
    /// `/engine/url` is required; every other key falls back to its default.
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();

        let Some(engine_url) = read_str(cfg, "/engine/url") else {
            bail!("CONFIG_MISSING: /engine/url is required");
        };

        Ok(Self {
            engine_url: engine_url.trim_end_matches('/').to_string(),
            prefix: read_str(cfg, "/provider/prefix"),
            version: read_str(cfg, "/provider/version"),
            allow_extra_props: read_bool(cfg, "/provider/allow_extra_props")?
                .unwrap_or(d.allow_extra_props),
            public_host: read_str(cfg, "/server/public_host").unwrap_or(d.public_host),
            public_port: match read_u64(cfg, "/server/public_port")? {
                Some(p) => u16::try_from(p)
                    .with_context(|| format!("CONFIG_INVALID: /server/public_port={p}"))?,
                None => d.public_port,
            },
            bind_addr: read_str(cfg, "/server/bind_addr"),
            watcher_poll_interval: read_u64(cfg, "/watcher/poll_interval_ms")?
                .map(Duration::from_millis)
                .unwrap_or(d.watcher_poll_interval),
            watcher_max_retries: match read_u64(cfg, "/watcher/max_retries")? {
                Some(n) => u32::try_from(n)
                    .with_context(|| format!("CONFIG_INVALID: /watcher/max_retries={n}"))?,
                None => d.watcher_max_retries,
            },
            batch_size: match read_u64(cfg, "/client/batch_size")? {
                Some(0) => bail!("CONFIG_INVALID: /client/batch_size must be > 0"),
                Some(n) => n as usize,
                None => d.batch_size,
            },
            request_timeout: read_u64(cfg, "/client/timeout_ms")?
                .map(Duration::from_millis)
                .unwrap_or(d.request_timeout),
            s2s_key_env: read_str(cfg, "/secrets/s2s_key_env").unwrap_or(d.s2s_key_env),
        })
    }

    /// Settings for binaries that run without a YAML file.
    ///
    /// Reads `DSK_ENGINE_URL`, `DSK_PREFIX`, `DSK_VERSION`,
    /// `DSK_PUBLIC_HOST`, `DSK_PUBLIC_PORT`.
    pub fn from_env() -> Result<Self> {
        let mut s = Self::default();
        if let Some(url) = env_nonempty("DSK_ENGINE_URL") {
            s.engine_url = url.trim_end_matches('/').to_string();
        }
        s.prefix = env_nonempty("DSK_PREFIX");
        s.version = env_nonempty("DSK_VERSION");
        if let Some(h) = env_nonempty("DSK_PUBLIC_HOST") {
            s.public_host = h;
        }
        if let Some(p) = env_nonempty("DSK_PUBLIC_PORT") {
            s.public_port = p
                .parse()
                .with_context(|| format!("CONFIG_INVALID: DSK_PUBLIC_PORT={p}"))?;
        }
        Ok(s)
    }

    /// Base URL under which the engine reaches this provider's callbacks.
    pub fn public_base_url(&self) -> String {
        format!("http://{}:{}", self.public_host, self.public_port)
    }

    pub fn effective_bind_addr(&self) -> String {
        self.bind_addr
            .clone()
            .unwrap_or_else(|| format!("0.0.0.0:{}", self.public_port))
    }
}

fn read_str(cfg: &Value, pointer: &str) -> Option<String> {
    let s = cfg.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn read_bool(cfg: &Value, pointer: &str) -> Result<Option<bool>> {
    match cfg.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => bail!("CONFIG_INVALID: {pointer} must be a bool, got {other}"),
    }
}

fn read_u64(cfg: &Value, pointer: &str) -> Result<Option<u64>> {
    match cfg.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(Some(n)),
            None => bail!("CONFIG_INVALID: {pointer} must be a non-negative integer, got {v}"),
        },
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}
