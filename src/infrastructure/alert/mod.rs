//! Alert dispatch for the monitoring service.

use crate::domain::alert::Alert;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Transport for operator notifications.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Sink that writes alerts to the log. Default when Telegram is not
/// configured.
pub struct TracingSink;

#[async_trait]
impl AlertSink for TracingSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        info!(
            "[ALERT {}] {} {}",
            alert.alert_type, alert.symbol, alert.message
        );
        Ok(())
    }
}

/// Telegram bot sink.
pub struct TelegramSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format!(
            "[{}] {} — {}",
            alert.alert_type.to_string().to_uppercase(),
            alert.symbol,
            alert.message
        );
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .context("Telegram request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Telegram responded with {}", response.status());
        }
        Ok(())
    }
}

/// Fans alerts out to every configured sink and keeps a bounded history.
/// Alerts are deduplicated by id so redelivered order events do not page
/// the operator twice.
pub struct AlertManager {
    sinks: Vec<Arc<dyn AlertSink>>,
    history: Mutex<VecDeque<Alert>>,
    seen: Mutex<HashSet<String>>,
    max_history: usize,
}

impl AlertManager {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self {
            sinks,
            history: Mutex::new(VecDeque::new()),
            seen: Mutex::new(HashSet::new()),
            max_history: 100,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Returns true when at least one sink accepted the alert. A repeated
    /// alert id is treated as already delivered.
    pub async fn send_alert(&self, alert: Alert) -> bool {
        {
            let mut seen = self.seen.lock().await;
            if !seen.insert(alert.id.clone()) {
                warn!("Duplicate alert suppressed: {}", alert.id);
                return true;
            }
        }

        {
            let mut history = self.history.lock().await;
            history.push_back(alert.clone());
            while history.len() > self.max_history {
                if let Some(evicted) = history.pop_front() {
                    self.seen.lock().await.remove(&evicted.id);
                }
            }
        }

        if self.sinks.is_empty() {
            warn!("No alert sinks configured");
            return false;
        }

        let mut delivered = false;
        for sink in &self.sinks {
            match sink.send(&alert).await {
                Ok(()) => delivered = true,
                Err(e) => error!("Alert sink failed: {:#}", e),
            }
        }

        if !delivered {
            error!("Failed to send alert through any sink: {}", alert.message);
        }
        delivered
    }

    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock().await;
        history.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertType;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: &Alert) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type: AlertType::OrderPlaced,
            symbol: "BTC-USD".to_string(),
            message: format!("Order {} received", id),
            timestamp: Utc::now(),
            details: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_alert_reaches_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = AlertManager::new(vec![Arc::new(CountingSink {
            count: Arc::clone(&count),
        })]);

        assert!(manager.send_alert(alert("a-1")).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.recent_alerts(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_suppressed() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = AlertManager::new(vec![Arc::new(CountingSink {
            count: Arc::clone(&count),
        })]);

        manager.send_alert(alert("a-1")).await;
        manager.send_alert(alert("a-1")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.recent_alerts(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let manager = AlertManager::new(vec![]).with_max_history(3);
        for i in 0..5 {
            manager.send_alert(alert(&format!("a-{}", i))).await;
        }
        let recent = manager.recent_alerts(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, "a-4");
    }
}
