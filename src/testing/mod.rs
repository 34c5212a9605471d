//! Testing utilities for CrabPreview
//!
//! In-memory stand-ins for the camera backend, the permission prompt and
//! the UI surface provider, so the whole lifecycle can be exercised offline
//! without camera hardware.

pub mod mock_hardware;
pub mod mock_permissions;
pub mod surfaces;

pub use mock_hardware::{ConfigureBehavior, HardwareCall, MockHardware, OpenBehavior};
pub use mock_permissions::{MockPermissions, PermissionAnswer};
pub use surfaces::StaticSurfaceProvider;

use std::time::Duration;

/// Poll `condition` until it holds or `timeout` elapses. Returns the final
/// value of the condition.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return condition();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
