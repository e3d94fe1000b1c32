//! Outbound side effects (alerts, emails, notifications) and their gate.
//!
//! Every externally visible action goes through [`Dispatcher::dispatch`],
//! which checks, in order:
//! 1. the global simulation switch: when on, the action is logged and
//!    reported as not sent, and no sender is contacted;
//! 2. the agent's capability flag for the action: when off, the action is
//!    logged as blocked by configuration and reported as not sent.
//!
//! Only when both allow it is the [`Notifier`] called. Delivery failures are
//! converted into a not-sent result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ConfigStore;
use crate::error::ExternalServiceError;
use crate::logging::AgentLogger;

/// Kind of outbound action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffectKind {
    Alert,
    Email,
    Notification,
}

impl SideEffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Email => "email",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for SideEffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attempted outbound action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub kind: SideEffectKind,
    pub destination: String,
    pub subject: String,
    pub body: String,
}

impl Outbound {
    pub fn alert(
        destination: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(SideEffectKind::Alert, destination, subject, body)
    }

    pub fn email(
        destination: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(SideEffectKind::Email, destination, subject, body)
    }

    pub fn notification(
        destination: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(SideEffectKind::Notification, destination, subject, body)
    }

    fn new(
        kind: SideEffectKind,
        destination: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            destination: destination.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Outcome of an attempted outbound action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SendResult {
    pub fn sent() -> Self {
        Self {
            sent: true,
            reason: None,
        }
    }

    pub fn not_sent(reason: impl Into<String>) -> Self {
        Self {
            sent: false,
            reason: Some(reason.into()),
        }
    }
}

/// External sender for outbound actions.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, outbound: &Outbound) -> Result<(), ExternalServiceError>;
}

/// Used when no delivery channel is configured; every send fails.
pub struct UnconfiguredNotifier;

#[async_trait]
impl Notifier for UnconfiguredNotifier {
    async fn send(&self, outbound: &Outbound) -> Result<(), ExternalServiceError> {
        Err(ExternalServiceError::new(
            outbound.kind.as_str(),
            "no delivery channel configured",
        ))
    }
}

/// Posts each outbound action as JSON to a webhook (relay to mail/paging).
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, ExternalServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ExternalServiceError::new("webhook", e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, outbound: &Outbound) -> Result<(), ExternalServiceError> {
        let resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&json!({
                "kind": outbound.kind,
                "to": outbound.destination,
                "subject": outbound.subject,
                "body": outbound.body,
            }))
            .send()
            .await
            .map_err(|e| ExternalServiceError::new("webhook", e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ExternalServiceError::new(
                "webhook",
                format!("{} - {}", status, text),
            ));
        }
        Ok(())
    }
}

/// Applies the simulation and capability gates before any send.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(config: Arc<ConfigStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { config, notifier }
    }

    /// Attempt `outbound` on behalf of the agent `log` is tagged with,
    /// permitted by the capability `capability`.
    pub async fn dispatch(
        &self,
        log: &AgentLogger,
        capability: &str,
        outbound: &Outbound,
    ) -> SendResult {
        let agent = log.tag();

        if self.config.is_simulation_mode() {
            log.info_with(
                format!(
                    "[simulation] would send {} to {}: {}",
                    outbound.kind, outbound.destination, outbound.subject
                ),
                json!({ "kind": outbound.kind, "to": outbound.destination, "body": outbound.body }),
            );
            return SendResult::not_sent("simulation mode");
        }

        if !self.config.capability_flag(agent, capability) {
            log.warn(format!(
                "{} to {} blocked by configuration ({} is off)",
                outbound.kind, outbound.destination, capability
            ));
            return SendResult::not_sent(format!("capability {} disabled", capability));
        }

        match self.notifier.send(outbound).await {
            Ok(()) => {
                log.success(format!(
                    "Sent {} to {}: {}",
                    outbound.kind, outbound.destination, outbound.subject
                ));
                SendResult::sent()
            }
            Err(e) => {
                log.error(format!(
                    "Failed to send {} to {}: {}",
                    outbound.kind, outbound.destination, e
                ));
                SendResult::not_sent(e.to_string())
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// Notifier doubles used by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every delivered action; can be switched to fail.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Outbound>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Outbound> {
            self.sent.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, outbound: &Outbound) -> Result<(), ExternalServiceError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ExternalServiceError::new("recording", "delivery refused"));
            }
            self.sent.lock().unwrap().push(outbound.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::logging::Logger;

    const AGENTS: &[&str] = &["outreach"];

    fn dispatcher(vars: &[(&str, &str)]) -> (Dispatcher, Arc<RecordingNotifier>) {
        let config = Arc::new(ConfigStore::from_vars(vars.iter().copied(), AGENTS));
        let notifier = Arc::new(RecordingNotifier::new());
        (Dispatcher::new(config, notifier.clone()), notifier)
    }

    fn email() -> Outbound {
        Outbound::email("patient@example.org", "Recall", "Time for your check-up")
    }

    #[tokio::test]
    async fn test_simulation_dominates_every_flag_combination() {
        let log = Logger::default().for_agent("outreach");
        for can_send in ["true", "false"] {
            for other in ["true", "false"] {
                let (d, notifier) = dispatcher(&[
                    ("SIMULATION_MODE", "true"),
                    ("AGENT_OUTREACH_CAN_SEND", can_send),
                    ("AGENT_OUTREACH_CAN_ALERT", other),
                ]);
                let result = d.dispatch(&log, "can_send", &email()).await;
                assert_eq!(result, SendResult::not_sent("simulation mode"));
                assert_eq!(notifier.count(), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_capability_gates_independently() {
        let log = Logger::default().for_agent("outreach");

        let (d, notifier) = dispatcher(&[
            ("SIMULATION_MODE", "false"),
            ("AGENT_OUTREACH_CAN_SEND", "false"),
            ("AGENT_OUTREACH_CAN_ALERT", "true"),
        ]);
        let result = d.dispatch(&log, "can_send", &email()).await;
        assert!(!result.sent);
        assert_eq!(result.reason.as_deref(), Some("capability can_send disabled"));
        assert_eq!(notifier.count(), 0);

        let (d, notifier) = dispatcher(&[
            ("SIMULATION_MODE", "false"),
            ("AGENT_OUTREACH_CAN_SEND", "true"),
            ("AGENT_OUTREACH_CAN_ALERT", "false"),
        ]);
        let result = d.dispatch(&log, "can_send", &email()).await;
        assert!(result.sent);
        assert_eq!(notifier.sent(), vec![email()]);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_sent() {
        let log = Logger::default().for_agent("outreach");
        let (d, notifier) = dispatcher(&[
            ("SIMULATION_MODE", "false"),
            ("AGENT_OUTREACH_CAN_SEND", "true"),
        ]);
        notifier.set_failing(true);

        let result = d.dispatch(&log, "can_send", &email()).await;
        assert!(!result.sent);
        assert!(result.reason.unwrap().contains("delivery refused"));
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_never_sends() {
        let config = Arc::new(ConfigStore::from_vars(
            [("SIMULATION_MODE", "off"), ("AGENT_OUTREACH_CAN_SEND", "on")],
            AGENTS,
        ));
        let d = Dispatcher::new(config, Arc::new(UnconfiguredNotifier));
        let log = Logger::default().for_agent("outreach");
        assert!(!d.dispatch(&log, "can_send", &email()).await.sent);
    }
}
