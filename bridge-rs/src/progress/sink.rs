//! Progress sinks
//!
//! The executor only knows about [`ProgressSink`]; the HTTP layer binds it
//! to an SSE body through [`ChannelSink`], the CLI to a callback.

use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::events::ProgressEvent;

/// Receives progress events in emission order
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events into an unbounded channel
#[derive(Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// A sink and the receiving end of its channel
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    /// The receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver means the client disconnected; the run goes on
        if self.sender.send(event).is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}

/// Keeps every event, for inspection in tests
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Writes events to the tracing log
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Started { entity, total, already_migrated } => {
                info!("Migrating {} {} ({} already migrated)", total, entity, already_migrated)
            }
            ProgressEvent::Progress { completed, total, current } => debug!(
                "Progress {}/{}{}",
                completed,
                total,
                current.as_deref().map(|c| format!(" - {}", c)).unwrap_or_default()
            ),
            ProgressEvent::Complete { stats, .. } => info!(
                "Run complete: {} successful, {} skipped, {} failed",
                stats.successful, stats.skipped, stats.failed
            ),
            ProgressEvent::Error { message } => warn!("Run failed: {}", message),
        }
    }
}

/// Calls a closure for every event
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

/// Forwards to two sinks
pub struct Tee<'a>(pub &'a dyn ProgressSink, pub &'a dyn ProgressSink);

impl ProgressSink for Tee<'_> {
    fn emit(&self, event: ProgressEvent) {
        self.0.emit(event.clone());
        self.1.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(ProgressEvent::Progress {
            completed: 1,
            total: 2,
            current: None,
        });
        sink.emit(ProgressEvent::error("stop"));
        drop(sink);

        assert!(matches!(rx.recv().await, Some(ProgressEvent::Progress { completed: 1, .. })));
        assert!(matches!(rx.recv().await, Some(ProgressEvent::Error { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        sink.emit(ProgressEvent::error("nobody listening"));
    }

    #[test]
    fn test_tee_forwards_to_both() {
        let a = RecordingSink::new();
        let b = RecordingSink::new();
        Tee(&a, &b).emit(ProgressEvent::error("x"));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }
}
