//! Device acquisition: `Idle -> Opening -> Open -> Closing -> Idle`
//!
//! Every transition happens while holding the acquisition lock, which is
//! taken with a bounded wait. Hardware open/close calls run on the
//! background executor and the asynchronous open callback is bridged into
//! the awaiting task through a [`Completion`].

use crate::completion::{Completion, WaitError};
use crate::errors::{CameraError, Operation};
use crate::executor::BackgroundExecutor;
use crate::platform::{CameraDevice, CameraHardware, DeviceStateCallback, HardwareError};
use crate::types::CameraIdentity;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Opening,
    Open,
    Closing,
}

/// Why a device handle is being released
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRelease {
    /// Explicit close requested by the owner
    Closed,
    /// Hardware reported the device gone after it opened
    Disconnected,
    /// Hardware reported a fatal error after it opened
    Error(HardwareError),
}

impl fmt::Display for DeviceRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRelease::Closed => write!(f, "closed"),
            DeviceRelease::Disconnected => write!(f, "disconnected"),
            DeviceRelease::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Runs on the background worker immediately before a device is closed,
/// so dependents (the capture session) can be released first.
pub type DeviceReleaseHook = Arc<dyn Fn(&DeviceHandle, &DeviceRelease) + Send + Sync>;

struct HandleInner {
    device: Arc<dyn CameraDevice>,
    identity: CameraIdentity,
    generation: u64,
    closed: AtomicBool,
}

/// Shared reference to the one open device
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<HandleInner>,
}

impl DeviceHandle {
    fn new(device: Arc<dyn CameraDevice>, generation: u64) -> Self {
        let identity = device.identity().clone();
        Self {
            inner: Arc::new(HandleInner {
                device,
                identity,
                generation,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn identity(&self) -> &CameraIdentity {
        &self.inner.identity
    }

    /// Distinguishes successive opens of the same camera
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn device(&self) -> &Arc<dyn CameraDevice> {
        &self.inner.device
    }

    /// Close the hardware device once; later calls are no-ops.
    pub(crate) fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::debug!(
            "Closing camera {} (generation {})",
            self.inner.identity,
            self.inner.generation
        );
        self.inner.device.close();
        true
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("identity", &self.inner.identity)
            .field("generation", &self.inner.generation)
            .field("open", &self.is_open())
            .finish()
    }
}

enum OpenOutcome {
    Opened(DeviceHandle),
    Disconnected,
    Failed(HardwareError),
    ClosedBeforeOpen,
}

/// Hardware-facing callbacks for one open attempt
struct OpenCallbacks {
    completion: Arc<Completion<OpenOutcome>>,
    executor: BackgroundExecutor,
    opened: Arc<Mutex<Option<DeviceHandle>>>,
    generation: u64,
    release_hook: Option<DeviceReleaseHook>,
}

impl OpenCallbacks {
    fn lost(&self, device: Arc<dyn CameraDevice>, reason: DeviceRelease) {
        let completion = self.completion.clone();
        let opened = self.opened.clone();
        let generation = self.generation;
        let hook = self.release_hook.clone();

        self.executor.dispatch(move || {
            let current = lock(&opened).clone();
            match current {
                Some(handle) => {
                    if !handle.is_open() {
                        return;
                    }
                    log::warn!("Camera {} lost: {}", handle.identity(), reason);
                    if let Some(hook) = &hook {
                        hook(&handle, &reason);
                    }
                    handle.close();
                }
                None => {
                    if completion.is_settled() {
                        log::debug!(
                            "Ignoring {} for camera {} after its open wait ended",
                            reason,
                            device.identity()
                        );
                        return;
                    }
                    // Release the partial device before the error surfaces.
                    DeviceHandle::new(device, generation).close();
                    let outcome = match reason {
                        DeviceRelease::Error(e) => OpenOutcome::Failed(e),
                        _ => OpenOutcome::Disconnected,
                    };
                    completion.resolve(outcome);
                }
            }
        });
    }
}

impl DeviceStateCallback for OpenCallbacks {
    fn on_opened(&self, device: Arc<dyn CameraDevice>) {
        let completion = self.completion.clone();
        let opened = self.opened.clone();
        let generation = self.generation;

        self.executor.dispatch(move || {
            let handle = DeviceHandle::new(device, generation);
            if completion.is_settled() {
                log::debug!(
                    "Camera {} opened after its wait ended; closing it",
                    handle.identity()
                );
                handle.close();
                return;
            }
            *lock(&opened) = Some(handle.clone());
            if !completion.resolve(OpenOutcome::Opened(handle.clone())) {
                lock(&opened).take();
                handle.close();
            }
        });
    }

    fn on_disconnected(&self, device: Arc<dyn CameraDevice>) {
        self.lost(device, DeviceRelease::Disconnected);
    }

    fn on_error(&self, device: Arc<dyn CameraDevice>, error: HardwareError) {
        self.lost(device, DeviceRelease::Error(error));
    }

    fn on_closed(&self, device: Arc<dyn CameraDevice>) {
        let completion = self.completion.clone();
        self.executor.dispatch(move || {
            if completion.resolve(OpenOutcome::ClosedBeforeOpen) {
                log::warn!("Camera {} closed before it opened", device.identity());
            } else {
                log::debug!("Camera {} closed", device.identity());
            }
        });
    }
}

struct Slot {
    state: DeviceState,
    handle: Option<DeviceHandle>,
}

/// Rolls back an open whose caller stopped waiting (its future was dropped):
/// the wait is cancelled so a late `on_opened` closes the device, and a
/// device that already opened is closed here.
struct OpenAttempt<'a> {
    owner: &'a DeviceAcquisition,
    completion: Arc<Completion<OpenOutcome>>,
    opened: Arc<Mutex<Option<DeviceHandle>>>,
    armed: bool,
}

impl OpenAttempt<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!("Camera open abandoned by its caller; rolling back");
        self.completion.cancel();
        lock(&self.owner.pending).take();
        {
            let mut slot = lock(&self.owner.slot);
            if slot.state == DeviceState::Opening {
                slot.state = DeviceState::Idle;
            }
        }
        if let Some(handle) = lock(&self.opened).take() {
            self.owner.executor.dispatch(move || {
                handle.close();
            });
        }
    }
}

/// Owns the exclusive hardware device for one controller
pub struct DeviceAcquisition {
    hardware: Arc<dyn CameraHardware>,
    executor: BackgroundExecutor,
    lock: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
    pending: Mutex<Option<Arc<Completion<OpenOutcome>>>>,
    cancel_epoch: AtomicU64,
    generation: AtomicU64,
    release_hook: Option<DeviceReleaseHook>,
    lock_timeout: Duration,
    open_timeout: Duration,
}

/// Proof of holding the acquisition lock
pub struct DeviceGuard<'a> {
    owner: &'a DeviceAcquisition,
    // Cancellations after this mark abort opens made through the guard
    epoch: u64,
    _lock: tokio::sync::MutexGuard<'a, ()>,
}

impl DeviceAcquisition {
    pub fn new(
        hardware: Arc<dyn CameraHardware>,
        executor: BackgroundExecutor,
        lock_timeout: Duration,
        open_timeout: Duration,
    ) -> Self {
        Self {
            hardware,
            executor,
            lock: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                state: DeviceState::Idle,
                handle: None,
            }),
            pending: Mutex::new(None),
            cancel_epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            release_hook: None,
            lock_timeout,
            open_timeout,
        }
    }

    pub fn with_release_hook(mut self, hook: DeviceReleaseHook) -> Self {
        self.release_hook = Some(hook);
        self
    }

    /// Current state; a handle the hardware already lost reads as `Idle`.
    pub fn state(&self) -> DeviceState {
        let slot = lock(&self.slot);
        match &slot.handle {
            Some(handle) if !handle.is_open() => DeviceState::Idle,
            _ => slot.state,
        }
    }

    /// The open device, if any
    pub fn current(&self) -> Option<DeviceHandle> {
        lock(&self.slot).handle.clone().filter(DeviceHandle::is_open)
    }

    /// Take the acquisition lock, failing with `LockTimeout` after the bound.
    pub async fn lock(&self) -> Result<DeviceGuard<'_>, CameraError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.lock.lock())
            .await
            .map_err(|_| {
                log::error!(
                    "Camera lock not acquired within {:?}",
                    self.lock_timeout
                );
                CameraError::LockTimeout(self.lock_timeout)
            })?;

        {
            let mut slot = lock(&self.slot);
            if slot.handle.as_ref().is_some_and(|h| !h.is_open()) {
                log::debug!("Clearing camera handle released by the hardware");
                slot.handle = None;
                slot.state = DeviceState::Idle;
            }
        }

        Ok(DeviceGuard {
            owner: self,
            epoch: self.cancel_epoch.load(Ordering::SeqCst),
            _lock: guard,
        })
    }

    pub async fn open(&self, identity: &CameraIdentity) -> Result<DeviceHandle, CameraError> {
        self.lock().await?.open(identity).await
    }

    pub async fn close(&self) -> Result<(), CameraError> {
        self.lock().await?.close().await
    }

    /// Resolve an in-flight open as cancelled, including one that has not
    /// registered its wait yet.
    pub fn cancel_pending(&self) -> bool {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        let pending = lock(&self.pending).take();
        pending.is_some_and(|completion| completion.cancel())
    }

    /// Release the device without the lock, for drop paths that cannot await.
    pub(crate) fn release_now(&self) {
        let handle = {
            let mut slot = lock(&self.slot);
            slot.state = DeviceState::Idle;
            slot.handle.take()
        };
        if let Some(handle) = handle.filter(DeviceHandle::is_open) {
            let hook = self.release_hook.clone();
            self.executor.dispatch(move || release(&handle, hook.as_ref()));
        }
    }

    fn set_state(&self, state: DeviceState) {
        lock(&self.slot).state = state;
    }
}

impl DeviceGuard<'_> {
    pub fn state(&self) -> DeviceState {
        self.owner.state()
    }

    pub fn current(&self) -> Option<DeviceHandle> {
        self.owner.current()
    }

    /// Open `identity`, closing any device already open first.
    pub async fn open(&self, identity: &CameraIdentity) -> Result<DeviceHandle, CameraError> {
        let owner = self.owner;

        if let Some(existing) = self.current() {
            log::info!(
                "Closing camera {} before opening {}",
                existing.identity(),
                identity
            );
            self.close().await?;
        }

        owner.set_state(DeviceState::Opening);
        let generation = owner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let completion = Arc::new(Completion::new());
        *lock(&owner.pending) = Some(completion.clone());
        if owner.cancel_epoch.load(Ordering::SeqCst) != self.epoch {
            completion.cancel();
        }

        let opened = Arc::new(Mutex::new(None));
        let mut attempt = OpenAttempt {
            owner,
            completion: completion.clone(),
            opened: opened.clone(),
            armed: true,
        };
        let callbacks = Arc::new(OpenCallbacks {
            completion: completion.clone(),
            executor: owner.executor.clone(),
            opened,
            generation,
            release_hook: owner.release_hook.clone(),
        });

        log::info!("Opening camera {}", identity);
        let hardware = owner.hardware.clone();
        let id = identity.clone();
        let submitted = owner
            .executor
            .run(move || hardware.open(&id, callbacks))
            .await
            .and_then(|accepted| {
                accepted.map_err(|source| CameraError::OpenFailed {
                    camera_id: identity.id.clone(),
                    source,
                })
            });

        if let Err(e) = submitted {
            attempt.disarm();
            lock(&owner.pending).take();
            owner.set_state(DeviceState::Idle);
            log::error!("Camera {} open rejected: {}", identity, e);
            return Err(e);
        }

        let outcome = completion.wait(owner.open_timeout).await;
        attempt.disarm();
        lock(&owner.pending).take();

        let result = match outcome {
            Ok(OpenOutcome::Opened(handle)) => {
                let mut slot = lock(&owner.slot);
                slot.handle = Some(handle.clone());
                slot.state = DeviceState::Open;
                log::info!("Camera {} opened", identity);
                return Ok(handle);
            }
            Ok(OpenOutcome::Disconnected) => CameraError::Disconnected(identity.id.clone()),
            Ok(OpenOutcome::Failed(source)) => CameraError::OpenFailed {
                camera_id: identity.id.clone(),
                source,
            },
            Ok(OpenOutcome::ClosedBeforeOpen) => CameraError::OpenFailed {
                camera_id: identity.id.clone(),
                source: HardwareError::Other("device closed before opening".to_string()),
            },
            Err(WaitError::TimedOut) => CameraError::CallbackTimeout {
                operation: Operation::Open,
                timeout: owner.open_timeout,
            },
            Err(_) => CameraError::Cancelled(Operation::Open),
        };

        owner.set_state(DeviceState::Idle);
        log::error!("Failed to open camera {}: {}", identity, result);
        Err(result)
    }

    /// Close the open device. Closing an idle acquisition does nothing.
    pub async fn close(&self) -> Result<(), CameraError> {
        let owner = self.owner;
        let handle = lock(&owner.slot).handle.clone();
        let Some(handle) = handle else {
            owner.set_state(DeviceState::Idle);
            return Ok(());
        };

        owner.set_state(DeviceState::Closing);
        let hook = owner.release_hook.clone();
        let target = handle.clone();
        let closed = owner
            .executor
            .run(move || release(&target, hook.as_ref()))
            .await;
        if let Err(CameraError::ExecutorStopped) = closed {
            release(&handle, owner.release_hook.as_ref());
        }

        let mut slot = lock(&owner.slot);
        slot.handle = None;
        slot.state = DeviceState::Idle;
        log::info!("Camera {} released", handle.identity());
        Ok(())
    }
}

fn release(handle: &DeviceHandle, hook: Option<&DeviceReleaseHook>) {
    if !handle.is_open() {
        return;
    }
    if let Some(hook) = hook {
        hook(handle, &DeviceRelease::Closed);
    }
    handle.close();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
