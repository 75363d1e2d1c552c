use crate::models::SchedulerKind;
use std::time::Duration;
use tokio::sync::mpsc;

/// Callbacks the core makes into the display layer
///
/// Called from scheduler tasks on arbitrary worker threads. Implementations
/// that drive a single-threaded surface must hand the call off (see
/// [`ChannelListener`]) instead of touching the surface directly.
pub trait MarketListener: Send + Sync {
    /// Market data changed; re-render current values
    fn display_changed(&self);

    /// Human-readable status line for one scheduler
    fn status(&self, kind: SchedulerKind, text: &str);

    /// Begin the post-trade countdown on the trading control
    fn start_cooldown(&self, duration: Duration);
}

/// Notification marshalled to the owning thread
#[derive(Debug, Clone, PartialEq)]
pub enum MarketNotification {
    DisplayChanged,
    Status { kind: SchedulerKind, text: String },
    CooldownStarted(Duration),
}

/// Forwards notifications over a channel to whichever task owns the display
#[derive(Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<MarketNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MarketNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: MarketNotification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification channel closed, dropping update");
        }
    }
}

impl MarketListener for ChannelListener {
    fn display_changed(&self) {
        self.send(MarketNotification::DisplayChanged);
    }

    fn status(&self, kind: SchedulerKind, text: &str) {
        self.send(MarketNotification::Status {
            kind,
            text: text.to_string(),
        });
    }

    fn start_cooldown(&self, duration: Duration) {
        self.send(MarketNotification::CooldownStarted(duration));
    }
}

/// Headless listener that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl MarketListener for LoggingListener {
    fn display_changed(&self) {
        tracing::trace!("Display changed");
    }

    fn status(&self, kind: SchedulerKind, text: &str) {
        tracing::info!(scheduler = %kind, "{}", text);
    }

    fn start_cooldown(&self, duration: Duration) {
        tracing::info!("Trading cooldown started ({}s)", duration.as_secs());
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_listener_marshals_in_order() {
        let (listener, mut rx) = ChannelListener::new();

        let worker = {
            let listener = listener.clone();
            tokio::spawn(async move {
                listener.status(SchedulerKind::Price, "RUNNING (every 2s)");
                listener.display_changed();
                listener.start_cooldown(Duration::from_secs(20));
            })
        };
        worker.await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(MarketNotification::Status {
                kind: SchedulerKind::Price,
                text: "RUNNING (every 2s)".to_string(),
            })
        );
        assert_eq!(rx.recv().await, Some(MarketNotification::DisplayChanged));
        assert_eq!(
            rx.recv().await,
            Some(MarketNotification::CooldownStarted(Duration::from_secs(20)))
        );
    }

    #[test]
    fn test_logging_listener_is_usable_as_port() {
        let listener: std::sync::Arc<dyn MarketListener> = std::sync::Arc::new(LoggingListener);

        listener.status(SchedulerKind::Events, "All events completed");
        listener.display_changed();
        listener.start_cooldown(Duration::from_secs(20));
    }

    #[test]
    fn test_channel_listener_survives_closed_receiver() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);

        // Must not panic
        listener.display_changed();
    }
}
