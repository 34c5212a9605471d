//! Scriptable in-memory camera backend
//!
//! Records every hardware call in order and flags protocol violations
//! (configure before open, device closed under a live session, repeating
//! request replaced without a stop, session closed out of order). Callbacks
//! are delivered from freshly spawned threads, like a real camera service.

use crate::platform::{
    CameraDevice, CameraHardware, CaptureSession, DeviceStateCallback, HardwareError,
    HardwareResult, SessionStateCallback,
};
use crate::types::{
    CameraCharacteristics, CameraIdentity, CaptureRequest, LensFacing, Size, Surface, SurfaceId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

/// How the backend answers the next `open`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    /// `on_disconnected` instead of `on_opened`
    Disconnect,
    /// `on_error` instead of `on_opened`
    Fail(HardwareError),
    /// Synchronous rejection; no callback
    Reject(HardwareError),
    /// Keep the callback until [`MockHardware::release_held_open`]
    Hold,
}

/// How the backend answers the next `create_capture_session`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureBehavior {
    Succeed,
    Fail,
    Reject(HardwareError),
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCall {
    EnumerateIdentities,
    Characteristics(CameraIdentity),
    Open(CameraIdentity),
    CreateCaptureSession {
        camera_id: CameraIdentity,
        surfaces: Vec<SurfaceId>,
    },
    SetRepeatingRequest(CaptureRequest),
    StopRepeating,
    AbortCaptures,
    CloseSession,
    CloseDevice(CameraIdentity),
}

struct Shared {
    cameras: Vec<(CameraIdentity, CameraCharacteristics)>,
    calls: Mutex<Vec<HardwareCall>>,
    violations: Mutex<Vec<String>>,
    open_behavior: Mutex<OpenBehavior>,
    configure_behavior: Mutex<ConfigureBehavior>,
    enumerate_error: Mutex<Option<HardwareError>>,
    held_opens: Mutex<Vec<(Arc<MockDevice>, Arc<dyn DeviceStateCallback>)>>,
    held_configures: Mutex<Vec<(Arc<MockSession>, Arc<dyn SessionStateCallback>)>>,
    devices: Mutex<Vec<(Arc<MockDevice>, Arc<dyn DeviceStateCallback>)>>,
}

impl Shared {
    fn record(&self, call: HardwareCall) {
        lock(&self.calls).push(call);
    }

    fn violation(&self, message: String) {
        log::error!("Hardware protocol violation: {}", message);
        lock(&self.violations).push(message);
    }
}

/// In-memory [`CameraHardware`]
#[derive(Clone)]
pub struct MockHardware {
    shared: Arc<Shared>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    /// Camera "0": back, sensor at 90, 16:9 sizes up to 4K, flash.
    /// Camera "1": front, sensor at 270, up to 1080p, no flash.
    pub fn new() -> Self {
        Self::with_cameras(vec![
            (
                CameraIdentity::new("0"),
                CameraCharacteristics {
                    output_sizes: vec![
                        Size::new(3840, 2160),
                        Size::new(1920, 1080),
                        Size::new(1280, 720),
                        Size::new(640, 480),
                    ],
                    sensor_orientation: 90,
                    lens_facing: LensFacing::Back,
                    flash_available: true,
                },
            ),
            (
                CameraIdentity::new("1"),
                CameraCharacteristics {
                    output_sizes: vec![
                        Size::new(1920, 1080),
                        Size::new(1280, 720),
                        Size::new(640, 480),
                    ],
                    sensor_orientation: 270,
                    lens_facing: LensFacing::Front,
                    flash_available: false,
                },
            ),
        ])
    }

    pub fn with_cameras(cameras: Vec<(CameraIdentity, CameraCharacteristics)>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cameras,
                calls: Mutex::new(Vec::new()),
                violations: Mutex::new(Vec::new()),
                open_behavior: Mutex::new(OpenBehavior::Succeed),
                configure_behavior: Mutex::new(ConfigureBehavior::Succeed),
                enumerate_error: Mutex::new(None),
                held_opens: Mutex::new(Vec::new()),
                held_configures: Mutex::new(Vec::new()),
                devices: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *lock(&self.shared.open_behavior) = behavior;
    }

    pub fn set_configure_behavior(&self, behavior: ConfigureBehavior) {
        *lock(&self.shared.configure_behavior) = behavior;
    }

    pub fn set_enumerate_error(&self, error: Option<HardwareError>) {
        *lock(&self.shared.enumerate_error) = error;
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<HardwareCall> {
        lock(&self.shared.calls).clone()
    }

    pub fn call_count(&self, predicate: impl Fn(&HardwareCall) -> bool) -> usize {
        lock(&self.shared.calls).iter().filter(|c| predicate(c)).count()
    }

    pub fn violations(&self) -> Vec<String> {
        lock(&self.shared.violations).clone()
    }

    pub fn held_open_count(&self) -> usize {
        lock(&self.shared.held_opens).len()
    }

    pub fn held_configure_count(&self) -> usize {
        lock(&self.shared.held_configures).len()
    }

    /// Devices opened and not yet closed
    pub fn open_device_count(&self) -> usize {
        lock(&self.shared.devices)
            .iter()
            .filter(|(d, _)| !d.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Configured sessions not yet closed, across all devices
    pub fn open_session_count(&self) -> usize {
        lock(&self.shared.devices)
            .iter()
            .map(|(d, _)| d.live_sessions())
            .sum()
    }

    /// Deliver `on_opened` for the oldest held open. Returns once the
    /// callback has returned on its own thread.
    pub fn release_held_open(&self) -> bool {
        let held = {
            let mut held = lock(&self.shared.held_opens);
            (!held.is_empty()).then(|| held.remove(0))
        };
        let Some((device, callbacks)) = held else {
            return false;
        };
        device.opened.store(true, Ordering::SeqCst);
        lock(&self.shared.devices).push((device.clone(), callbacks.clone()));
        deliver(move || callbacks.on_opened(device));
        true
    }

    /// Deliver `on_configured` for the oldest held configure.
    pub fn release_held_configure(&self) -> bool {
        let held = {
            let mut held = lock(&self.shared.held_configures);
            (!held.is_empty()).then(|| held.remove(0))
        };
        let Some((session, callbacks)) = held else {
            return false;
        };
        session.attach();
        deliver(move || callbacks.on_configured(session));
        true
    }

    /// Report the open device `id` as disconnected.
    pub fn disconnect_device(&self, id: &str) -> bool {
        self.report_loss(id, None)
    }

    /// Report a fatal error on the open device `id`.
    pub fn fail_device(&self, id: &str, error: HardwareError) -> bool {
        self.report_loss(id, Some(error))
    }

    fn report_loss(&self, id: &str, error: Option<HardwareError>) -> bool {
        let target = lock(&self.shared.devices)
            .iter()
            .find(|(d, _)| d.identity.id == id && !d.closed.load(Ordering::SeqCst))
            .cloned();
        let Some((device, callbacks)) = target else {
            return false;
        };
        deliver(move || match error {
            Some(error) => callbacks.on_error(device, error),
            None => callbacks.on_disconnected(device),
        });
        true
    }

    fn find_camera(&self, identity: &CameraIdentity) -> Option<&CameraCharacteristics> {
        self.shared
            .cameras
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, c)| c)
    }
}

impl CameraHardware for MockHardware {
    fn enumerate_identities(&self) -> HardwareResult<Vec<CameraIdentity>> {
        self.shared.record(HardwareCall::EnumerateIdentities);
        if let Some(error) = lock(&self.shared.enumerate_error).clone() {
            return Err(error);
        }
        Ok(self.shared.cameras.iter().map(|(id, _)| id.clone()).collect())
    }

    fn characteristics(&self, identity: &CameraIdentity) -> HardwareResult<CameraCharacteristics> {
        self.shared
            .record(HardwareCall::Characteristics(identity.clone()));
        self.find_camera(identity)
            .cloned()
            .ok_or_else(|| HardwareError::Other(format!("unknown camera {}", identity)))
    }

    fn open(
        &self,
        identity: &CameraIdentity,
        callbacks: Arc<dyn DeviceStateCallback>,
    ) -> HardwareResult {
        self.shared.record(HardwareCall::Open(identity.clone()));
        if self.find_camera(identity).is_none() {
            return Err(HardwareError::Other(format!("unknown camera {}", identity)));
        }

        let device = Arc::new(MockDevice {
            identity: identity.clone(),
            shared: self.shared.clone(),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        });

        let behavior = lock(&self.shared.open_behavior).clone();
        match behavior {
            OpenBehavior::Succeed => {
                device.opened.store(true, Ordering::SeqCst);
                lock(&self.shared.devices).push((device.clone(), callbacks.clone()));
                spawn(move || callbacks.on_opened(device));
            }
            OpenBehavior::Disconnect => spawn(move || callbacks.on_disconnected(device)),
            OpenBehavior::Fail(error) => spawn(move || callbacks.on_error(device, error)),
            OpenBehavior::Reject(error) => return Err(error),
            OpenBehavior::Hold => lock(&self.shared.held_opens).push((device, callbacks)),
        }
        Ok(())
    }
}

struct MockDevice {
    identity: CameraIdentity,
    shared: Arc<Shared>,
    opened: AtomicBool,
    closed: AtomicBool,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockDevice {
    fn live_sessions(&self) -> usize {
        lock(&self.sessions)
            .iter()
            .filter(|s| s.is_live())
            .count()
    }
}

impl CameraDevice for MockDevice {
    fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    fn create_capture_session(
        &self,
        surfaces: &[Surface],
        callbacks: Arc<dyn SessionStateCallback>,
    ) -> HardwareResult {
        self.shared.record(HardwareCall::CreateCaptureSession {
            camera_id: self.identity.clone(),
            surfaces: surfaces.iter().map(|s| s.id).collect(),
        });
        if !self.opened.load(Ordering::SeqCst) {
            self.shared
                .violation(format!("session configured before camera {} opened", self.identity));
        }
        if self.closed.load(Ordering::SeqCst) {
            self.shared
                .violation(format!("session configured on closed camera {}", self.identity));
        }
        if self.live_sessions() > 0 {
            self.shared
                .violation(format!("second session created on camera {}", self.identity));
        }

        let session = Arc::new(MockSession {
            camera_id: self.identity.clone(),
            shared: self.shared.clone(),
            delivered: AtomicBool::new(false),
            repeating: AtomicBool::new(false),
            ever_repeated: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let behavior = lock(&self.shared.configure_behavior).clone();
        match behavior {
            ConfigureBehavior::Succeed => {
                lock(&self.sessions).push(session.clone());
                session.attach();
                spawn(move || callbacks.on_configured(session));
            }
            ConfigureBehavior::Fail => spawn(move || callbacks.on_configure_failed()),
            ConfigureBehavior::Reject(error) => return Err(error),
            ConfigureBehavior::Hold => {
                lock(&self.sessions).push(session.clone());
                lock(&self.shared.held_configures).push((session, callbacks));
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.shared
            .record(HardwareCall::CloseDevice(self.identity.clone()));
        if self.closed.swap(true, Ordering::SeqCst) {
            self.shared
                .violation(format!("camera {} closed twice", self.identity));
            return;
        }
        if self.live_sessions() > 0 {
            self.shared
                .violation(format!("camera {} closed while its session is open", self.identity));
        }
    }
}

struct MockSession {
    camera_id: CameraIdentity,
    shared: Arc<Shared>,
    delivered: AtomicBool,
    repeating: AtomicBool,
    ever_repeated: AtomicBool,
    aborted: AtomicBool,
    closed: AtomicBool,
}

impl MockSession {
    fn attach(&self) {
        self.delivered.store(true, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.delivered.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self, operation: &str) {
        if self.closed.load(Ordering::SeqCst) {
            self.shared.violation(format!(
                "{} on closed session of camera {}",
                operation, self.camera_id
            ));
        }
    }
}

impl CaptureSession for MockSession {
    fn set_repeating_request(&self, request: &CaptureRequest) -> HardwareResult {
        self.shared
            .record(HardwareCall::SetRepeatingRequest(request.clone()));
        self.check_open("set_repeating_request");
        if self.repeating.swap(true, Ordering::SeqCst) {
            self.shared.violation(format!(
                "repeating request replaced without stop on camera {}",
                self.camera_id
            ));
        }
        self.ever_repeated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_repeating(&self) -> HardwareResult {
        self.shared.record(HardwareCall::StopRepeating);
        self.check_open("stop_repeating");
        self.repeating.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn abort_captures(&self) -> HardwareResult {
        self.shared.record(HardwareCall::AbortCaptures);
        self.check_open("abort_captures");
        self.aborted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.shared.record(HardwareCall::CloseSession);
        if self.closed.swap(true, Ordering::SeqCst) {
            self.shared
                .violation(format!("session of camera {} closed twice", self.camera_id));
            return;
        }
        if self.repeating.load(Ordering::SeqCst) {
            self.shared.violation(format!(
                "session of camera {} closed while repeating",
                self.camera_id
            ));
        }
        if self.ever_repeated.load(Ordering::SeqCst) && !self.aborted.load(Ordering::SeqCst) {
            self.shared.violation(format!(
                "session of camera {} closed without aborting captures",
                self.camera_id
            ));
        }
    }
}

fn spawn(callback: impl FnOnce() + Send + 'static) {
    thread::spawn(callback);
}

/// Fire a callback from another thread and wait for it to return.
fn deliver(callback: impl FnOnce() + Send + 'static) {
    if thread::spawn(callback).join().is_err() {
        log::error!("Mock hardware callback panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
