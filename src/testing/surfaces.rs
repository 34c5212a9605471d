use crate::platform::SurfaceProvider;
use crate::types::{Size, Surface, SurfaceId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Surface provider handing out numbered surfaces of the requested size
pub struct StaticSurfaceProvider {
    next_id: AtomicU64,
    available: AtomicBool,
    acquired: Mutex<Vec<Surface>>,
}

impl Default for StaticSurfaceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticSurfaceProvider {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// While unavailable, `acquire_surface` returns `None`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> Vec<Surface> {
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SurfaceProvider for StaticSurfaceProvider {
    fn acquire_surface(&self, buffer_size: Size) -> Option<Surface> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        let surface = Surface {
            id: SurfaceId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            size: buffer_size,
        };
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(surface);
        Some(surface)
    }
}
