//! A `tracing_subscriber::Layer` that captures log records emitted anywhere
//! in `brypt-core` and forwards them over a `broadcast::Sender<LogRecord>`,
//! without `brypt-core` ever depending on a particular sink: the host (or
//! `brypt-ffi::register_logger`) subscribes to the channel and forwards
//! entries however it likes.

use tokio::sync::broadcast;
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Capacity of the log broadcast channel (buffered records per subscriber).
pub const LOG_CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Creates a paired `(layer, receiver)`. Install `layer` in a
/// `tracing_subscriber::Registry`; subscribe to `receiver` (or call
/// `LogCaptureLayer::subscribe`) to receive buffered records.
pub fn build_log_channel() -> (LogCaptureLayer, broadcast::Receiver<LogRecord>) {
    let (tx, rx) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    (LogCaptureLayer { tx }, rx)
}

/// A tracing layer that converts each log `Event` into a `LogRecord` and
/// sends it over a broadcast channel.
///
/// Dropped receivers (lagged subscribers) are silently ignored — the
/// runtime never blocks on the channel.
pub struct LogCaptureLayer {
    tx: broadcast::Sender<LogRecord>,
}

impl LogCaptureLayer {
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }

    /// The underlying sender, for a caller that needs to keep subscribing
    /// after the layer itself has been moved into a global subscriber.
    pub fn sender(&self) -> broadcast::Sender<LogRecord> {
        self.tx.clone()
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);

        let record = LogRecord {
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.0,
        };
        let _ = self.tx.send(record);
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        } else if !self.0.is_empty() {
            self.0.push_str(&format!(", {}={:?}", field.name(), value));
        } else {
            self.0 = format!("{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        } else if !self.0.is_empty() {
            self.0.push_str(&format!(", {}={}", field.name(), value));
        } else {
            self.0 = format!("{}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn forwards_event_message_to_channel() {
        let (layer, mut rx) = build_log_channel();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello brypt");
        });
        let record = rx.try_recv().expect("a record should have been queued");
        assert_eq!(record.level, "INFO");
        assert!(record.message.contains("hello brypt"));
    }
}
