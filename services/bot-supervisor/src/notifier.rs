//! Outbound alerting: a `report` capability with independent variants

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::BotError;
use crate::profit::PerformanceReport;
use crate::types::TradeResult;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    System,
    Trade,
    Performance,
    BotError,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub bot_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn system(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::System,
            severity: AlertSeverity::Info,
            title: title.into(),
            message: message.into(),
            bot_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn trade(bot_id: Uuid, trade: &TradeResult) -> Self {
        Self {
            kind: AlertKind::Trade,
            severity: AlertSeverity::Info,
            title: format!("Significant Trade [{}]", bot_id),
            message: format!(
                "{}: P&L {}, balance {}",
                trade.pair, trade.profit_loss, trade.balance
            ),
            bot_id: Some(bot_id),
            timestamp: Utc::now(),
        }
    }

    pub fn performance(bot_id: Uuid, report: &PerformanceReport) -> Self {
        Self {
            kind: AlertKind::Performance,
            severity: AlertSeverity::Warning,
            title: format!("Performance Alert [{}]", bot_id),
            message: format!(
                "Hourly gain {} vs target {}, deficit {}",
                report.current_hourly_gain, report.hourly_target, report.deficit
            ),
            bot_id: Some(bot_id),
            timestamp: Utc::now(),
        }
    }

    pub fn bot_error(bot_id: Uuid, err: &BotError) -> Self {
        let severity = if err.is_critical() {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        Self {
            kind: AlertKind::BotError,
            severity,
            title: format!("Bot Error [{}]", bot_id),
            message: err.to_string(),
            bot_id: Some(bot_id),
            timestamp: Utc::now(),
        }
    }
}

/// Anything that can deliver an alert. Delivery failures stay inside the notifier.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn report(&self, alert: &Alert);
}

/// Writes alerts to the tracing log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn report(&self, alert: &Alert) {
        let bot_id = alert
            .bot_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());

        match alert.severity {
            AlertSeverity::Info => {
                info!(kind = ?alert.kind, bot_id = %bot_id, title = %alert.title, message = %alert.message, "ALERT");
            }
            AlertSeverity::Warning => {
                warn!(kind = ?alert.kind, bot_id = %bot_id, title = %alert.title, message = %alert.message, "ALERT");
            }
            AlertSeverity::Critical => {
                error!(kind = ?alert.kind, bot_id = %bot_id, title = %alert.title, message = %alert.message, "ALERT");
            }
        }
    }
}

/// POSTs alerts as JSON to a webhook
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "title": alert.title,
            "message": alert.message,
            "severity": alert.severity.as_str(),
            "bot_id": alert.bot_id,
            "timestamp": alert.timestamp.to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow::anyhow!("Webhook failed: {}", status));
        }

        debug!("Webhook alert sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn report(&self, alert: &Alert) {
        if let Err(e) = self.send(alert).await {
            error!("Failed to send webhook alert: {}", e);
        }
    }
}

/// Reports to each notifier in order
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn report(&self, alert: &Alert) {
        for notifier in &self.notifiers {
            notifier.report(alert).await;
        }
    }
}
