//! CrabPreview: camera device and capture-session lifecycle management
//!
//! This crate owns the exclusive hardware camera for an application, bridges
//! a callback-driven camera backend into sequential async code, negotiates a
//! preview resolution and computes the transform that shows the sensor image
//! upright for any display rotation and lens facing.
//!
//! # Features
//! - Permission gating with a single in-flight prompt
//! - Single background worker serializing all hardware interaction
//! - Timed, cancellable device open and session configure
//! - Strict teardown order (session before device) by construction
//! - Pure size negotiation and orientation math
//!
//! # Usage
//! ```rust,ignore
//! use crabpreview::{CrabPreviewConfig, PreviewController};
//!
//! let controller = PreviewController::new(hardware, permissions, CrabPreviewConfig::load_or_default())?;
//! controller.attach(surface_provider);
//! controller.on_surface_created(1080, 1920).await?;
//! controller.retrieve_device(false).await?;
//! // ...
//! controller.dispose().await?;
//! ```
pub mod completion;
pub mod config;
pub mod errors;
pub mod executor;
pub mod geometry;
pub mod permissions;
pub mod platform;
pub mod session;
pub mod types;

// Testing utilities - mock hardware for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CrabPreviewConfig;
pub use errors::{CameraError, Operation};
pub use geometry::{PreviewGeometry, ViewTransform};
pub use permissions::{PermissionGate, PermissionProvider, PermissionStatus};
pub use platform::{CameraHardware, HardwareError, SurfaceProvider};
pub use session::{PreviewController, PreviewEvent, PreviewEventKind};
pub use types::{
    AeMode, AfMode, CameraCharacteristics, CameraIdentity, CaptureRequest, DisplayRotation,
    LensFacing, Size, Surface, SurfaceId,
};

/// Initialize logging for the camera system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabpreview=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabpreview");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}
