//! Camera device and capture session lifecycle
//!
//! - [`device`]: exclusive device acquisition behind a timed lock
//! - [`capture`]: capture session configure / repeat / teardown
//! - [`controller`]: the caller-facing [`PreviewController`]
//! - [`events`]: lifecycle notifications

pub mod capture;
pub mod controller;
pub mod device;
pub mod events;

pub use capture::{SessionInfo, SessionManager, SessionState};
pub use controller::{preview_request, PreviewController, EXECUTOR_NAME};
pub use device::{
    DeviceAcquisition, DeviceGuard, DeviceHandle, DeviceRelease, DeviceReleaseHook, DeviceState,
};
pub use events::{EventChannel, EventSender, PreviewEvent, PreviewEventKind, EVENT_CAPACITY};
