//! Abstract camera hardware capability
//!
//! The preview controller never talks to a vendor SDK directly. A backend
//! implements these traits and reports every asynchronous outcome through the
//! callback objects it is handed. Callbacks may arrive on any thread; the
//! session layer funnels them onto its background executor.
//!
//! SDK-specific error and lens-facing codes are translated into the closed
//! [`HardwareError`] and [`LensFacing`](crate::types::LensFacing) types here,
//! at the edge, and never re-interpreted deeper in the crate.

use crate::types::{CameraCharacteristics, CameraIdentity, CaptureRequest, Size, Surface};
use std::sync::Arc;
use thiserror::Error;

/// Error codes a camera backend may report, synchronously or via `on_error`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("camera is already in use")]
    CameraInUse,
    #[error("too many cameras are open")]
    MaxCamerasInUse,
    #[error("camera disabled by policy")]
    Disabled,
    #[error("fatal camera device error")]
    Device,
    #[error("fatal camera service error")]
    Service,
    #[error("{0}")]
    Other(String),
}

pub type HardwareResult<T = ()> = Result<T, HardwareError>;

/// Entry point of a camera backend
pub trait CameraHardware: Send + Sync {
    fn enumerate_identities(&self) -> HardwareResult<Vec<CameraIdentity>>;

    fn characteristics(&self, identity: &CameraIdentity) -> HardwareResult<CameraCharacteristics>;

    /// Begin opening a device. `Ok` means the request was accepted; exactly
    /// one terminal outcome is then delivered through `callbacks`.
    fn open(
        &self,
        identity: &CameraIdentity,
        callbacks: Arc<dyn DeviceStateCallback>,
    ) -> HardwareResult;
}

/// A live hardware device
pub trait CameraDevice: Send + Sync {
    fn identity(&self) -> &CameraIdentity;

    /// Begin configuring a session. `Ok` means the request was accepted; the
    /// outcome arrives through `callbacks`.
    fn create_capture_session(
        &self,
        surfaces: &[Surface],
        callbacks: Arc<dyn SessionStateCallback>,
    ) -> HardwareResult;

    fn close(&self);
}

/// A configured capture pipeline
pub trait CaptureSession: Send + Sync {
    fn set_repeating_request(&self, request: &CaptureRequest) -> HardwareResult;

    fn stop_repeating(&self) -> HardwareResult;

    fn abort_captures(&self) -> HardwareResult;

    fn close(&self);
}

pub trait DeviceStateCallback: Send + Sync {
    fn on_opened(&self, device: Arc<dyn CameraDevice>);

    fn on_disconnected(&self, device: Arc<dyn CameraDevice>);

    fn on_error(&self, device: Arc<dyn CameraDevice>, error: HardwareError);

    fn on_closed(&self, device: Arc<dyn CameraDevice>);
}

pub trait SessionStateCallback: Send + Sync {
    fn on_configured(&self, session: Arc<dyn CaptureSession>);

    fn on_configure_failed(&self);
}

/// Supplies drawing surfaces from the UI layer
pub trait SurfaceProvider: Send + Sync {
    /// Produce a render target whose buffers are sized `buffer_size`.
    fn acquire_surface(&self, buffer_size: Size) -> Option<Surface>;
}
