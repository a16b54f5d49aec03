use std::sync::Mutex;
use std::time::Duration;

use bloc_config::NotifyConfig;
use bloc_core::{RiskAssessment, truncate_chars};
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const LISTED_WARNINGS: usize = 5;
const WARNING_MESSAGE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskNotification {
    pub session_id: String,
    pub repo_path: String,
    pub blocked: bool,
    pub assessment: RiskAssessment,
}

/// Posts risk alerts to a chat webhook in the background. Sends never
/// block the caller and failures are only logged.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
    dashboard_url: String,
    runtime: Handle,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Notifier {
    /// `None` when the configured environment variable holds no URL.
    pub fn from_config(config: &NotifyConfig, runtime: Handle) -> Option<Self> {
        let webhook_url = std::env::var(&config.webhook_url_env)
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())?;
        Self::new(webhook_url, config.dashboard_url.clone(), runtime)
    }

    pub fn new(webhook_url: String, dashboard_url: String, runtime: Handle) -> Option<Self> {
        let client = match reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build webhook client; notifications disabled");
                return None;
            }
        };
        Some(Self {
            client,
            webhook_url,
            dashboard_url,
            runtime,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn notify_risk(&self, notification: RiskNotification) {
        let client = self.client.clone();
        let url = self.webhook_url.clone();
        let payload = webhook_payload(&notification, &self.dashboard_url);
        let session_id = notification.session_id;

        let task = self.runtime.spawn(async move {
            let response = client.post(&url).json(&payload).send().await;
            match response.and_then(|response| response.error_for_status()) {
                Ok(_) => tracing::info!(session_id = %session_id, "risk notification sent"),
                Err(err) => {
                    tracing::warn!(session_id = %session_id, error = %err, "risk notification failed")
                }
            }
        });
        match self.pending.lock() {
            Ok(mut pending) => pending.push(task),
            Err(_) => tracing::debug!("notification tracker poisoned; task left detached"),
        }
    }

    /// Gives in-flight notifications up to `timeout` to finish. Anything
    /// still running afterwards is abandoned.
    pub fn drain(&self, timeout: Duration) {
        let tasks = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        if tasks.is_empty() {
            return;
        }
        let outcome = self.runtime.block_on(async {
            tokio::time::timeout(timeout, async {
                for task in tasks {
                    let _ = task.await;
                }
            })
            .await
        });
        if outcome.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "gave up waiting for notifications");
        }
    }
}

pub fn webhook_payload(notification: &RiskNotification, dashboard_url: &str) -> Value {
    let assessment = &notification.assessment;
    let mut lines = vec![
        format!(
            "**BehaviorLock risk alert{}**",
            if notification.blocked { ": migration blocked" } else { "" }
        ),
        format!("**Repo:** `{}`", notification.repo_path),
        format!("**Session:** `{}`", notification.session_id),
        format!(
            "**Risk score:** {:.2} ({})",
            assessment.risk_score,
            assessment.risk_level.as_str()
        ),
        format!(
            "**Known drifts:** {} | **Past runs:** {}",
            assessment.known_drift_count, assessment.past_run_count
        ),
    ];
    if !assessment.warnings.is_empty() {
        lines.push(format!("**Warnings ({}):**", assessment.warnings.len()));
        for warning in assessment.warnings.iter().take(LISTED_WARNINGS) {
            lines.push(format!(
                "- [{}] {}: {}",
                warning.severity.as_str(),
                warning.function,
                truncate_chars(&warning.message, WARNING_MESSAGE_CHARS)
            ));
        }
    }
    lines.push(format!(
        "{}/runs/{}",
        dashboard_url.trim_end_matches('/'),
        notification.session_id
    ));

    json!({ "content": lines.join("\n") })
}
