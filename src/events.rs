//! Outbound alert and metric fan-out.
//!
//! Orchestrators never call the notification or metrics adapters directly.
//! They push messages onto an unbounded channel and a single dispatcher task
//! delivers them in order. Adapter failures are logged and dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapters::{Alert, Metric, MetricsAdapter, NotificationAdapter};

/// Message handled by the dispatcher
#[derive(Debug)]
pub enum OutboundMessage {
    Alert(Alert),
    Metric(Metric),
    /// Acknowledged once every earlier message has been delivered
    Flush(oneshot::Sender<()>),
}

/// Cloneable producer side of the outbound channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl EventSender {
    pub fn alert(&self, alert: Alert) {
        self.send(OutboundMessage::Alert(alert));
    }

    pub fn metric(&self, metric: Metric) {
        self.send(OutboundMessage::Metric(metric));
    }

    /// Wait until every message sent before this call has been delivered
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(OutboundMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.tx.send(message) {
            debug!(dropped = ?e.0, "Dispatcher stopped, dropping outbound message");
        }
    }
}

/// Consumer side; owns the adapters
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    notifier: Arc<dyn NotificationAdapter>,
    metrics: Arc<dyn MetricsAdapter>,
}

/// Create a connected sender/dispatcher pair
pub fn channel(
    notifier: Arc<dyn NotificationAdapter>,
    metrics: Arc<dyn MetricsAdapter>,
) -> (EventSender, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender { tx },
        Dispatcher {
            rx,
            notifier,
            metrics,
        },
    )
}

impl Dispatcher {
    /// Run on the current runtime until every sender is dropped
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                OutboundMessage::Alert(alert) => {
                    let alert_type = alert.alert_type;
                    if let Err(e) = self.notifier.send_alert(alert).await {
                        warn!(alert_type = ?alert_type, error = %format!("{:#}", e), "Failed to deliver alert");
                    }
                }
                OutboundMessage::Metric(metric) => {
                    let name = metric.name.clone();
                    if let Err(e) = self.metrics.record_metric(metric).await {
                        warn!(metric = %name, error = %format!("{:#}", e), "Failed to record metric");
                    }
                }
                OutboundMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Outbound dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AlertSeverity, AlertType};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        alerts: Mutex<Vec<Alert>>,
        metrics: Mutex<Vec<Metric>>,
    }

    #[async_trait]
    impl NotificationAdapter for Recorder {
        async fn send_alert(&self, alert: Alert) -> anyhow::Result<()> {
            if alert.title == "explode" {
                anyhow::bail!("smtp unavailable");
            }
            self.alerts.lock().push(alert);
            Ok(())
        }
    }

    #[async_trait]
    impl MetricsAdapter for Recorder {
        async fn record_metric(&self, metric: Metric) -> anyhow::Result<()> {
            self.metrics.lock().push(metric);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flush_waits_for_delivery_in_order() {
        let recorder = Arc::new(Recorder::default());
        let (sender, dispatcher) = channel(recorder.clone(), recorder.clone());
        dispatcher.spawn();

        sender.alert(Alert::new(AlertType::BackupCompleted, AlertSeverity::Info, "first", ""));
        sender.metric(Metric::new("backup.size_bytes", 42.0));
        sender.alert(Alert::new(AlertType::BackupFailed, AlertSeverity::Error, "second", ""));
        sender.flush().await;

        let titles: Vec<String> = recorder.alerts.lock().iter().map(|a| a.title.clone()).collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert_eq!(recorder.metrics.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_adapter_failure_does_not_stop_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let (sender, dispatcher) = channel(recorder.clone(), recorder.clone());
        dispatcher.spawn();

        sender.alert(Alert::new(AlertType::BackupFailed, AlertSeverity::Error, "explode", ""));
        sender.alert(Alert::new(AlertType::BackupFailed, AlertSeverity::Error, "after", ""));
        sender.flush().await;

        assert_eq!(recorder.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_dispatcher_returns() {
        let recorder = Arc::new(Recorder::default());
        let (sender, dispatcher) = channel(recorder.clone(), recorder);
        drop(dispatcher);
        sender.alert(Alert::new(AlertType::BackupFailed, AlertSeverity::Error, "lost", ""));
        sender.flush().await;
    }
}
