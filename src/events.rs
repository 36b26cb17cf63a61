use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Notification pushed to every attached observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log { message: String, timestamp: String },
    Status { status: String },
}

/// Fire-and-forget observability sink.
///
/// Events with no subscriber attached are dropped; log lines still reach
/// `tracing`.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        let _ = self.tx.send(Event::Log {
            message,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        });
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::debug!("status: {status}");
        let _ = self.tx.send(Event::Status { status });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
