//! Lifecycle notifications for the UI layer

use crate::geometry::PreviewGeometry;
use crate::types::{CameraIdentity, Size};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::Mutex;

/// What happened to the preview pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEventKind {
    DeviceOpened { camera_id: CameraIdentity },
    PreviewStarted { preview_size: Size },
    PreviewStopped,
    SessionClosed,
    DeviceClosed { camera_id: CameraIdentity },
    /// The hardware took the device away (disconnect or fatal error)
    DeviceLost {
        camera_id: CameraIdentity,
        reason: String,
    },
    GeometryChanged(PreviewGeometry),
    Disposed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewEvent {
    pub kind: PreviewEventKind,
    pub timestamp: DateTime<Utc>,
}

impl PreviewEvent {
    pub fn new(kind: PreviewEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Events kept for a caller that is not polling; older ones are dropped
pub const EVENT_CAPACITY: usize = 256;

/// Bounded event queue; emitting never blocks and works from any thread.
/// When the caller falls behind, the oldest events are discarded.
pub struct EventChannel {
    sender: broadcast::Sender<PreviewEvent>,
    receiver: Mutex<broadcast::Receiver<PreviewEvent>>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// A sender for callers that outlive a borrow of the channel
    pub fn sender(&self) -> EventSender {
        EventSender(self.sender.clone())
    }

    pub fn emit(&self, kind: PreviewEventKind) {
        self.sender().emit(kind);
    }

    /// Next queued event, without waiting
    pub async fn poll(&self) -> Option<PreviewEvent> {
        let mut rx = self.receiver.lock().await;
        loop {
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    log::warn!("Dropped {} unread preview event(s)", missed);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event
    pub async fn wait(&self) -> Option<PreviewEvent> {
        let mut rx = self.receiver.lock().await;
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Dropped {} unread preview event(s)", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Clone)]
pub struct EventSender(broadcast::Sender<PreviewEvent>);

impl EventSender {
    pub fn emit(&self, kind: PreviewEventKind) {
        log::debug!("Preview event: {:?}", kind);
        // Fails only once the channel itself is gone
        let _ = self.0.send(PreviewEvent::new(kind));
    }
}
