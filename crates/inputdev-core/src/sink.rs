// Inputdev Event Sink
// Contract for handing decoded events to the host application

use std::sync::mpsc;

use crate::event::AppEvent;

/// Delivery failures; the event is dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("event receiver disconnected")]
    Disconnected,

    #[error("event queue rejected event: {0}")]
    Rejected(String),
}

/// Receives application events from the dispatch thread.
///
/// Called without any controller lock held, so implementations may call
/// back into the controller through a [`crate::ControllerHandle`].
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: AppEvent) -> Result<(), SinkError>;
}

impl EventSink for mpsc::Sender<AppEvent> {
    fn deliver(&self, event: AppEvent) -> Result<(), SinkError> {
        self.send(event).map_err(|_| SinkError::Disconnected)
    }
}

impl EventSink for mpsc::SyncSender<AppEvent> {
    fn deliver(&self, event: AppEvent) -> Result<(), SinkError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::TrySendError::Full(ev) => SinkError::Rejected(format!("queue full, dropped {}", ev)),
            mpsc::TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}

/// Sink that only logs events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: AppEvent) -> Result<(), SinkError> {
        log::info!("event: {}", event);
        Ok(())
    }
}
