//! Intent Watcher Client.
//!
//! Polls `{engine}/services/intent_watcher/{uuid}` until the watcher shows
//! the desired status, the retry budget runs out, or the caller cancels.

use std::time::Duration;

use dsk_schemas::{DskResult, IntentWatcher, IntentfulStatus};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entity::ClientOptions;
use crate::http::EngineHttp;

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 10,
        }
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watcher showed exactly the desired status.
    Reached(IntentfulStatus),
    /// The watcher settled in a different terminal status
    /// (`OutdatedDiff`, `Failed`, ...).
    Terminal(IntentfulStatus),
    /// Budget spent while the watcher was still moving, or unreachable.
    /// Convergence is unconfirmed, not failed.
    Exhausted {
        last_observed: Option<IntentfulStatus>,
    },
    Cancelled,
}

impl WaitOutcome {
    pub fn is_reached(&self) -> bool {
        matches!(self, WaitOutcome::Reached(_))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WatcherList {
    Wrapped { results: Vec<IntentWatcher> },
    Bare(Vec<IntentWatcher>),
}

#[derive(Debug, Clone)]
pub struct IntentWatcherClient {
    http: EngineHttp,
    base_url: String,
    policy: WaitPolicy,
}

impl IntentWatcherClient {
    pub fn new(engine_url: &str, token: Option<String>) -> DskResult<Self> {
        Self::with_policy(engine_url, token, WaitPolicy::default())
    }

    pub fn with_policy(
        engine_url: &str,
        token: Option<String>,
        policy: WaitPolicy,
    ) -> DskResult<Self> {
        Self::with_options(engine_url, token, policy, ClientOptions::default())
    }

    /// `opts.timeout` bounds each poll request; the batch size is unused.
    pub fn with_options(
        engine_url: &str,
        token: Option<String>,
        policy: WaitPolicy,
        opts: ClientOptions,
    ) -> DskResult<Self> {
        Ok(Self {
            http: EngineHttp::new(token, opts.timeout)?,
            base_url: format!(
                "{}/services/intent_watcher",
                engine_url.trim_end_matches('/')
            ),
            policy,
        })
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub async fn get(&self, watcher: Uuid) -> DskResult<IntentWatcher> {
        let url = format!("{}/{}", self.base_url, watcher);
        self.http.json::<(), _>(Method::GET, &url, None).await
    }

    pub async fn filter(&self, predicate: &Value) -> DskResult<Vec<IntentWatcher>> {
        let url = format!("{}/filter", self.base_url);
        let list: WatcherList = self.http.json(Method::POST, &url, Some(predicate)).await?;
        Ok(match list {
            WatcherList::Wrapped { results } => results,
            WatcherList::Bare(v) => v,
        })
    }

    pub async fn list(&self) -> DskResult<Vec<IntentWatcher>> {
        self.filter(&json!({})).await
    }

    /// `true` only when the watcher shows `desired` within `max_retries`
    /// polls at this client's interval. Exhaustion and transport failures
    /// both read as `false`, meaning "unconfirmed".
    pub async fn wait_for_watcher_status(
        &self,
        watcher: Uuid,
        desired: IntentfulStatus,
        max_retries: u32,
    ) -> bool {
        let policy = WaitPolicy {
            max_retries,
            ..self.policy
        };
        self.wait_for_status_with(watcher, desired, policy, CancellationToken::new())
            .await
            .is_reached()
    }

    /// Poll with an explicit policy and cancellation.
    ///
    /// A terminal status other than `desired` ends the wait early as
    /// [`WaitOutcome::Terminal`]. A failed poll counts as an attempt that
    /// observed nothing. There is no sleep after the last attempt.
    pub async fn wait_for_status_with(
        &self,
        watcher: Uuid,
        desired: IntentfulStatus,
        policy: WaitPolicy,
        cancel: CancellationToken,
    ) -> WaitOutcome {
        let mut last_observed = None;

        for attempt in 1..=policy.max_retries {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                r = self.get(watcher) => r,
            };

            match polled {
                Ok(w) => {
                    debug!(watcher = %watcher, attempt, status = w.status.as_str(), "watcher/poll");
                    last_observed = Some(w.status);
                    if w.status == desired {
                        info!(watcher = %watcher, attempt, status = w.status.as_str(), "watcher/reached");
                        return WaitOutcome::Reached(w.status);
                    }
                    if w.status.is_terminal() {
                        info!(watcher = %watcher, attempt, status = w.status.as_str(), "watcher/terminal");
                        return WaitOutcome::Terminal(w.status);
                    }
                }
                Err(e) => {
                    warn!(watcher = %watcher, attempt, error = %e, "watcher/poll failed");
                }
            }

            if attempt < policy.max_retries {
                tokio::select! {
                    _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
        }

        WaitOutcome::Exhausted { last_observed }
    }
}
