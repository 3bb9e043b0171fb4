use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Failures kept for operator inspection.
const RECENT_FAILURES_CAP: usize = 100;

/// Upper bound on one delivery attempt.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// External notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, recipient: &str) -> Result<(), String>;
}

/// Writes notifications to the log. Default channel when nothing else is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str, recipient: &str) -> Result<(), String> {
        info!(recipient, "notify: {message}");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyFailure {
    pub recipient: String,
    pub message: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget dispatcher.
///
/// Each delivery runs in its own task. Failures go over a channel to a sink
/// task that logs and counts them and keeps the latest few; they never reach
/// the code that called `dispatch`.
pub struct NotifyHub {
    notifier: Arc<dyn Notifier>,
    failures_tx: mpsc::UnboundedSender<NotifyFailure>,
    recent: Arc<Mutex<VecDeque<NotifyFailure>>>,
}

impl NotifyHub {
    /// Must be called inside a tokio runtime; spawns the failure sink.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let recent = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_FAILURES_CAP)));
        tokio::spawn(failure_sink(failures_rx, recent.clone()));
        Self {
            notifier,
            failures_tx,
            recent,
        }
    }

    /// Queue a delivery and return immediately.
    pub fn dispatch(&self, message: String, recipient: String) {
        let notifier = self.notifier.clone();
        let failures_tx = self.failures_tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(DELIVERY_TIMEOUT, notifier.notify(&message, &recipient)).await;
            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(_) => format!("delivery timed out after {}s", DELIVERY_TIMEOUT.as_secs()),
            };
            let _ = failures_tx.send(NotifyFailure {
                recipient,
                message,
                error,
                at: Utc::now(),
            });
        });
    }

    /// Most recent delivery failures, oldest first.
    pub fn recent_failures(&self) -> Vec<NotifyFailure> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

async fn failure_sink(mut rx: mpsc::UnboundedReceiver<NotifyFailure>, recent: Arc<Mutex<VecDeque<NotifyFailure>>>) {
    while let Some(failure) = rx.recv().await {
        warn!(recipient = %failure.recipient, error = %failure.error, "notification failed");
        metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL).increment(1);
        let mut recent = recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_FAILURES_CAP {
            recent.pop_front();
        }
        recent.push_back(failure);
    }
}

/// Test channel that records deliveries and can be told to fail or stall.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: std::sync::atomic::AtomicBool,
    pub stall: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str, recipient: &str) -> Result<(), String> {
        use std::sync::atomic::Ordering;
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err("channel unavailable".into());
        }
        self.sent.lock().unwrap().push((message.to_string(), recipient.to_string()));
        Ok(())
    }
}
