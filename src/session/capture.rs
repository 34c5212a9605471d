//! Capture session lifecycle on top of an open device
//!
//! At most one session exists and it always belongs to the device generation
//! that created it. Teardown runs `stop_repeating -> abort_captures -> close`
//! on the background worker, and the device release hook performs the same
//! teardown before the owning device is closed.

use super::device::{DeviceHandle, DeviceRelease, DeviceReleaseHook};
use crate::completion::{Completion, WaitError};
use crate::errors::{CameraError, Operation};
use crate::executor::BackgroundExecutor;
use crate::platform::{CaptureSession, SessionStateCallback};
use crate::types::{CameraIdentity, CaptureRequest, Surface};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Configuring,
    Configured,
    Repeating,
    /// Configured, with the repeating request stopped
    Stopped,
}

/// Snapshot of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub camera_id: CameraIdentity,
    pub device_generation: u64,
    pub surfaces: Vec<Surface>,
}

struct ActiveSession {
    session: Arc<dyn CaptureSession>,
    info: SessionInfo,
    repeating: Option<CaptureRequest>,
    last_request: Option<CaptureRequest>,
}

impl ActiveSession {
    fn state(&self) -> SessionState {
        match (&self.repeating, &self.last_request) {
            (Some(_), _) => SessionState::Repeating,
            (None, Some(_)) => SessionState::Stopped,
            (None, None) => SessionState::Configured,
        }
    }

    fn teardown(self) {
        log::debug!(
            "Tearing down capture session for camera {}",
            self.info.camera_id
        );
        if self.repeating.is_some() {
            if let Err(e) = self.session.stop_repeating() {
                log::warn!("stop_repeating failed during teardown: {}", e);
            }
        }
        if let Err(e) = self.session.abort_captures() {
            log::warn!("abort_captures failed during teardown: {}", e);
        }
        self.session.close();
    }
}

#[derive(Default)]
struct Slot {
    configuring: bool,
    active: Option<ActiveSession>,
}

enum ConfigureOutcome {
    Configured(Arc<dyn CaptureSession>),
    Failed,
}

/// A configured session nobody has claimed yet. Whoever takes it out closes
/// it if it is not going to be used, so it is closed exactly once.
type Delivered = Arc<Mutex<Option<Arc<dyn CaptureSession>>>>;

struct ConfigureCallbacks {
    completion: Arc<Completion<ConfigureOutcome>>,
    executor: BackgroundExecutor,
    delivered: Delivered,
}

impl SessionStateCallback for ConfigureCallbacks {
    fn on_configured(&self, session: Arc<dyn CaptureSession>) {
        let completion = self.completion.clone();
        let delivered = self.delivered.clone();
        self.executor.dispatch(move || {
            *lock(&delivered) = Some(session.clone());
            if !completion.resolve(ConfigureOutcome::Configured(session)) {
                if let Some(late) = lock(&delivered).take() {
                    log::debug!("Capture session configured after its wait ended; closing it");
                    late.close();
                }
            }
        });
    }

    fn on_configure_failed(&self) {
        let completion = self.completion.clone();
        self.executor.dispatch(move || {
            completion.resolve(ConfigureOutcome::Failed);
        });
    }
}

/// Rolls back a configure whose caller stopped waiting: the wait is
/// cancelled and a session that already configured is closed.
struct ConfigureAttempt<'a> {
    owner: &'a SessionManager,
    completion: Arc<Completion<ConfigureOutcome>>,
    delivered: Delivered,
    armed: bool,
}

impl ConfigureAttempt<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConfigureAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!("Session configure abandoned by its caller; rolling back");
        self.completion.cancel();
        self.owner.finish_configuring();
        if let Some(session) = lock(&self.delivered).take() {
            self.owner.executor.dispatch(move || session.close());
        }
    }
}

/// Owns the capture session of one controller
pub struct SessionManager {
    executor: BackgroundExecutor,
    slot: Arc<Mutex<Slot>>,
    pending: Mutex<Option<Arc<Completion<ConfigureOutcome>>>>,
    cancel_epoch: AtomicU64,
    configure_timeout: Duration,
}

impl SessionManager {
    pub fn new(executor: BackgroundExecutor, configure_timeout: Duration) -> Self {
        Self {
            executor,
            slot: Arc::new(Mutex::new(Slot::default())),
            pending: Mutex::new(None),
            cancel_epoch: AtomicU64::new(0),
            configure_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        let slot = lock(&self.slot);
        match &slot.active {
            Some(active) => active.state(),
            None if slot.configuring => SessionState::Configuring,
            None => SessionState::Closed,
        }
    }

    pub fn has_session(&self) -> bool {
        lock(&self.slot).active.is_some()
    }

    pub fn current(&self) -> Option<SessionInfo> {
        lock(&self.slot).active.as_ref().map(|a| a.info.clone())
    }

    /// The repeating request currently installed, if any
    pub fn current_request(&self) -> Option<CaptureRequest> {
        lock(&self.slot)
            .active
            .as_ref()
            .and_then(|a| a.repeating.clone())
    }

    /// Create a session on `device` targeting `surfaces`, replacing any
    /// existing one.
    pub async fn configure(
        &self,
        device: &DeviceHandle,
        surfaces: Vec<Surface>,
    ) -> Result<SessionInfo, CameraError> {
        self.configure_since(self.cancel_mark(), device, surfaces).await
    }

    /// Current cancellation mark; a [`cancel_pending`](Self::cancel_pending)
    /// issued after it aborts configures started with it.
    pub(crate) fn cancel_mark(&self) -> u64 {
        self.cancel_epoch.load(Ordering::SeqCst)
    }

    pub(crate) async fn configure_since(
        &self,
        epoch: u64,
        device: &DeviceHandle,
        surfaces: Vec<Surface>,
    ) -> Result<SessionInfo, CameraError> {
        if !device.is_open() {
            return Err(CameraError::invalid_state(format!(
                "camera {} is not open",
                device.identity()
            )));
        }
        if surfaces.is_empty() {
            return Err(CameraError::SurfaceUnavailable);
        }

        self.close().await?;

        let completion = Arc::new(Completion::new());
        *lock(&self.pending) = Some(completion.clone());
        if self.cancel_epoch.load(Ordering::SeqCst) != epoch {
            completion.cancel();
        }
        lock(&self.slot).configuring = true;

        let delivered: Delivered = Arc::new(Mutex::new(None));
        let mut attempt = ConfigureAttempt {
            owner: self,
            completion: completion.clone(),
            delivered: delivered.clone(),
            armed: true,
        };
        let callbacks = Arc::new(ConfigureCallbacks {
            completion: completion.clone(),
            executor: self.executor.clone(),
            delivered: delivered.clone(),
        });
        log::info!(
            "Configuring capture session on camera {} with {} surface(s)",
            device.identity(),
            surfaces.len()
        );

        let target = device.clone();
        let requested = surfaces.clone();
        let submitted = self
            .executor
            .run(move || {
                if !target.is_open() {
                    return Err(CameraError::Disconnected(target.identity().id.clone()));
                }
                target
                    .device()
                    .create_capture_session(&requested, callbacks)
                    .map_err(|e| CameraError::ConfigureFailed(e.to_string()))
            })
            .await
            .and_then(|accepted| accepted);

        if let Err(e) = submitted {
            attempt.disarm();
            self.finish_configuring();
            log::error!("Capture session request rejected: {}", e);
            return Err(e);
        }
        let outcome = completion.wait(self.configure_timeout).await;
        attempt.disarm();
        self.finish_configuring();

        let session = match outcome {
            Ok(ConfigureOutcome::Configured(session)) => {
                // Claimed by this call from here on
                lock(&delivered).take();
                session
            }
            Ok(ConfigureOutcome::Failed) => {
                log::error!(
                    "Capture session configuration failed on camera {}",
                    device.identity()
                );
                return Err(CameraError::ConfigureFailed(format!(
                    "camera {} rejected the session",
                    device.identity()
                )));
            }
            Err(WaitError::TimedOut) => {
                log::error!(
                    "No session configure callback within {:?}",
                    self.configure_timeout
                );
                return Err(CameraError::CallbackTimeout {
                    operation: Operation::Configure,
                    timeout: self.configure_timeout,
                });
            }
            Err(_) => return Err(CameraError::Cancelled(Operation::Configure)),
        };

        let info = SessionInfo {
            camera_id: device.identity().clone(),
            device_generation: device.generation(),
            surfaces,
        };

        // Store on the worker so it orders against device-loss teardown.
        let slot = self.slot.clone();
        let owner = device.clone();
        let stored_info = info.clone();
        let stored = self
            .executor
            .run(move || {
                if !owner.is_open() {
                    session.close();
                    return false;
                }
                lock(&slot).active = Some(ActiveSession {
                    session,
                    info: stored_info,
                    repeating: None,
                    last_request: None,
                });
                true
            })
            .await?;

        if !stored {
            log::warn!("Camera {} went away while its session configured", device.identity());
            return Err(CameraError::Disconnected(device.identity().id.clone()));
        }
        log::info!("Capture session configured on camera {}", device.identity());
        Ok(info)
    }

    /// Install `request` as the repeating preview request, stopping any
    /// previous one first.
    pub async fn start_repeating(&self, request: CaptureRequest) -> Result<(), CameraError> {
        let slot = self.slot.clone();
        self.executor
            .run(move || {
                let mut slot = lock(&slot);
                let active = slot
                    .active
                    .as_mut()
                    .ok_or_else(|| CameraError::invalid_state("no capture session"))?;
                if active.repeating.take().is_some() {
                    active
                        .session
                        .stop_repeating()
                        .map_err(|e| CameraError::hardware("stopping repeating request", e))?;
                }
                active
                    .session
                    .set_repeating_request(&request)
                    .map_err(|e| CameraError::hardware("starting repeating request", e))?;
                log::debug!("Repeating request installed: {:?}", request);
                active.repeating = Some(request.clone());
                active.last_request = Some(request);
                Ok(())
            })
            .await?
    }

    /// Stop the repeating request, keeping the session configured.
    pub async fn stop(&self) -> Result<(), CameraError> {
        let slot = self.slot.clone();
        self.executor
            .run(move || {
                let mut slot = lock(&slot);
                let Some(active) = slot.active.as_mut() else {
                    return Ok(());
                };
                if active.repeating.take().is_some() {
                    active
                        .session
                        .stop_repeating()
                        .map_err(|e| CameraError::hardware("stopping repeating request", e))?;
                    log::debug!("Repeating request stopped");
                }
                Ok(())
            })
            .await?
    }

    /// Reinstall the last repeating request after [`stop`](Self::stop).
    pub async fn restart(&self) -> Result<(), CameraError> {
        let last = lock(&self.slot)
            .active
            .as_ref()
            .and_then(|a| a.last_request.clone());
        match last {
            Some(request) => self.start_repeating(request).await,
            None => Err(CameraError::invalid_state("no repeating request to restart")),
        }
    }

    /// Tear down the session. No-op without one.
    pub async fn close(&self) -> Result<(), CameraError> {
        let slot = self.slot.clone();
        let closed = self
            .executor
            .run(move || take_and_teardown(&slot, |_| true))
            .await;
        if let Err(CameraError::ExecutorStopped) = closed {
            take_and_teardown(&self.slot, |_| true);
        }
        Ok(())
    }

    /// Resolve an in-flight configure as cancelled.
    pub fn cancel_pending(&self) -> bool {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        let pending = lock(&self.pending).take();
        pending.is_some_and(|completion| completion.cancel())
    }

    /// Hook for [`DeviceAcquisition`](super::DeviceAcquisition) that tears
    /// down the session belonging to the device being released.
    pub fn release_hook(&self) -> DeviceReleaseHook {
        let slot = self.slot.clone();
        Arc::new(move |device: &DeviceHandle, reason: &DeviceRelease| {
            let generation = device.generation();
            if take_and_teardown(&slot, |info| info.device_generation == generation) {
                log::debug!(
                    "Session released ahead of camera {} ({})",
                    device.identity(),
                    reason
                );
            }
        })
    }

    fn finish_configuring(&self) {
        lock(&self.pending).take();
        lock(&self.slot).configuring = false;
    }
}

fn take_and_teardown(slot: &Mutex<Slot>, matches: impl Fn(&SessionInfo) -> bool) -> bool {
    let active = {
        let mut slot = lock(slot);
        match &slot.active {
            Some(active) if matches(&active.info) => slot.active.take(),
            _ => None,
        }
    };
    match active {
        Some(active) => {
            active.teardown();
            true
        }
        None => false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
