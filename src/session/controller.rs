//! Caller-facing preview lifecycle
//!
//! `PreviewController` ties the permission gate, device acquisition and
//! capture session together behind the API the UI layer drives: attach a
//! surface provider, report surface changes, acquire the camera, pause,
//! resume and dispose.

use super::capture::{SessionManager, SessionState};
use super::device::{DeviceAcquisition, DeviceHandle, DeviceRelease, DeviceReleaseHook, DeviceState};
use super::events::{EventChannel, EventSender, PreviewEvent, PreviewEventKind};
use crate::config::CrabPreviewConfig;
use crate::errors::{CameraError, Operation};
use crate::executor::BackgroundExecutor;
use crate::geometry::PreviewGeometry;
use crate::permissions::{PermissionGate, PermissionProvider, PermissionStatus};
use crate::platform::{CameraHardware, SurfaceProvider};
use crate::types::{
    AeMode, AfMode, CameraIdentity, CaptureRequest, DisplayRotation, LensFacing, SelectedCamera,
    Size, SurfaceId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread name of the background worker
pub const EXECUTOR_NAME: &str = "crabpreview-camera";

struct ViewState {
    provider: Option<Arc<dyn SurfaceProvider>>,
    view_size: Option<Size>,
    rotation: DisplayRotation,
    camera: Option<SelectedCamera>,
    geometry: Option<PreviewGeometry>,
    paused: bool,
    preferred_facing: LensFacing,
    af_mode: AfMode,
    ae_mode: AeMode,
}

pub struct PreviewController {
    config: CrabPreviewConfig,
    hardware: Arc<dyn CameraHardware>,
    permissions: PermissionGate,
    executor: BackgroundExecutor,
    device: DeviceAcquisition,
    session: SessionManager,
    view: Mutex<ViewState>,
    events: EventChannel,
    disposed: AtomicBool,
}

impl PreviewController {
    pub fn new(
        hardware: Arc<dyn CameraHardware>,
        permission_provider: Arc<dyn PermissionProvider>,
        config: CrabPreviewConfig,
    ) -> Result<Self, CameraError> {
        config.validate().map_err(CameraError::Config)?;

        let timeouts = &config.timeouts;
        let executor = BackgroundExecutor::new(EXECUTOR_NAME);
        let events = EventChannel::new();
        let session = SessionManager::new(executor.clone(), timeouts.configure_timeout());
        let device = DeviceAcquisition::new(
            hardware.clone(),
            executor.clone(),
            timeouts.lock_timeout(),
            timeouts.open_timeout(),
        )
        .with_release_hook(release_hook(session.release_hook(), events.sender()));
        let permissions = PermissionGate::new(permission_provider, timeouts.permission_timeout());

        let view = ViewState {
            provider: None,
            view_size: None,
            rotation: DisplayRotation::default(),
            camera: None,
            geometry: None,
            paused: false,
            preferred_facing: config.camera.preferred_facing,
            af_mode: config.preview.auto_focus,
            ae_mode: config.preview.auto_exposure,
        };

        log::debug!(
            "Created preview controller (facing={}, aspect={})",
            config.camera.preferred_facing,
            config.camera.fixed_aspect()
        );

        Ok(Self {
            config,
            hardware,
            permissions,
            executor,
            device,
            session,
            view: Mutex::new(view),
            events,
            disposed: AtomicBool::new(false),
        })
    }

    /// Register the provider that supplies render targets.
    pub fn attach(&self, provider: Arc<dyn SurfaceProvider>) {
        self.view().provider = Some(provider);
    }

    /// The drawing surface exists; start the preview if a camera is open.
    pub async fn on_surface_created(&self, width: u32, height: u32) -> Result<(), CameraError> {
        self.ensure_live()?;
        self.view().view_size = Some(Size::new(width, height));

        let guard = self.device.lock().await?;
        match guard.current() {
            Some(handle) => self.start_preview_if_ready(&handle).await,
            None => Ok(()),
        }
    }

    /// Record the new view size and recompute the display transform for
    /// the running preview.
    pub fn on_surface_size_changed(&self, width: u32, height: u32) -> Option<PreviewGeometry> {
        self.view().view_size = Some(Size::new(width, height));
        self.refresh_geometry()
    }

    /// The drawing surface is gone. The session is closed; the device stays
    /// open so a new surface can be wired up quickly.
    pub async fn on_surface_destroyed(&self) -> Result<(), CameraError> {
        {
            let mut view = self.view();
            view.view_size = None;
            view.geometry = None;
        }
        self.session.cancel_pending();
        let _guard = self.device.lock().await?;
        self.close_session().await
    }

    pub fn set_display_rotation(&self, rotation: DisplayRotation) -> Option<PreviewGeometry> {
        self.view().rotation = rotation;
        self.refresh_geometry()
    }

    /// Acquire the preferred camera and start the preview if a surface is
    /// available. An open device is reused unless `force` is set.
    pub async fn retrieve_device(&self, force: bool) -> Result<CameraIdentity, CameraError> {
        self.ensure_live()?;
        self.permissions.ensure_granted().await?;

        let guard = self.device.lock().await?;
        self.ensure_live()?;
        self.executor.start()?;

        if let Some(handle) = guard.current() {
            if !force {
                log::debug!("Reusing open camera {}", handle.identity());
                self.start_preview_if_ready(&handle).await?;
                return Ok(handle.identity().clone());
            }
            log::info!("Re-acquiring camera {}", handle.identity());
            self.close_session().await?;
            guard.close().await?;
            self.view().camera = None;
        }

        let camera = self.select_camera().await?;
        let handle = guard.open(&camera.identity).await?;
        let identity = handle.identity().clone();
        self.events.emit(PreviewEventKind::DeviceOpened {
            camera_id: identity.clone(),
        });
        self.view().camera = Some(camera);

        if self.is_disposed() {
            guard.close().await?;
            return Err(CameraError::Cancelled(Operation::Open));
        }

        self.start_preview_if_ready(&handle).await?;
        Ok(identity)
    }

    /// Stop the repeating request; the session stays configured.
    pub async fn pause(&self) -> Result<(), CameraError> {
        self.ensure_live()?;
        self.view().paused = true;
        let _guard = self.device.lock().await?;
        self.ensure_live()?;
        if self.session.state() == SessionState::Repeating {
            self.session.stop().await?;
            self.events.emit(PreviewEventKind::PreviewStopped);
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), CameraError> {
        self.ensure_live()?;
        self.view().paused = false;
        let _guard = self.device.lock().await?;
        self.ensure_live()?;
        match self.session.state() {
            SessionState::Stopped => {
                self.session.restart().await?;
                self.emit_preview_started();
            }
            SessionState::Configured => self.start_repeating().await?,
            SessionState::Repeating | SessionState::Configuring | SessionState::Closed => {}
        }
        Ok(())
    }

    /// Change autofocus/auto-exposure, replacing the running request.
    pub async fn set_preview_controls(
        &self,
        af_mode: AfMode,
        ae_mode: AeMode,
    ) -> Result<(), CameraError> {
        self.ensure_live()?;
        {
            let mut view = self.view();
            view.af_mode = af_mode;
            view.ae_mode = ae_mode;
        }
        let _guard = self.device.lock().await?;
        self.ensure_live()?;
        let paused = self.view().paused;
        if self.session.has_session() && !paused {
            self.start_repeating().await?;
        }
        Ok(())
    }

    /// Switch the preferred lens. An open camera facing the other way is
    /// replaced; the new identity is returned in that case.
    pub async fn set_lens_facing(
        &self,
        facing: LensFacing,
    ) -> Result<Option<CameraIdentity>, CameraError> {
        self.ensure_live()?;
        let needs_switch = {
            let mut view = self.view();
            view.preferred_facing = facing;
            view.camera
                .as_ref()
                .is_some_and(|c| c.characteristics.lens_facing != facing)
        };
        if needs_switch && self.device.current().is_some() {
            return self.retrieve_device(true).await.map(Some);
        }
        Ok(None)
    }

    /// Prompt for permission again after a denial.
    pub async fn request_permission_again(&self) -> Result<(), CameraError> {
        self.ensure_live()?;
        self.permissions.request_again().await
    }

    /// Release the session and the device, keeping the controller usable.
    pub async fn close_camera(&self) -> Result<(), CameraError> {
        self.cancel_pending();
        let guard = self.device.lock().await?;
        self.close_session().await?;
        guard.close().await?;
        let mut view = self.view();
        view.camera = None;
        view.geometry = None;
        Ok(())
    }

    /// Tear everything down and stop the background worker. Pending
    /// permission, open and configure waits resolve as cancelled.
    /// Idempotent.
    pub async fn dispose(&self) -> Result<(), CameraError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::info!("Disposing preview controller");
        self.cancel_pending();

        let result = match self.device.lock().await {
            Ok(guard) => {
                let closed = match self.close_session().await {
                    Ok(()) => guard.close().await,
                    Err(e) => Err(e),
                };
                self.executor.shutdown().await;
                closed
            }
            Err(e) => {
                log::error!("Disposing without the camera lock: {}", e);
                self.device.release_now();
                self.executor.shutdown().await;
                Err(e)
            }
        };

        {
            let mut view = self.view();
            view.provider = None;
            view.camera = None;
            view.geometry = None;
        }
        self.events.emit(PreviewEventKind::Disposed);
        result
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &CrabPreviewConfig {
        &self.config
    }

    pub fn geometry(&self) -> Option<PreviewGeometry> {
        self.view().geometry
    }

    pub fn display_rotation(&self) -> DisplayRotation {
        self.view().rotation
    }

    pub fn preferred_facing(&self) -> LensFacing {
        self.view().preferred_facing
    }

    pub fn selected_camera(&self) -> Option<SelectedCamera> {
        self.view().camera.clone()
    }

    pub fn device_state(&self) -> DeviceState {
        self.device.state()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn current_request(&self) -> Option<CaptureRequest> {
        self.session.current_request()
    }

    pub fn permission_status(&self) -> PermissionStatus {
        self.permissions.status()
    }

    /// Get next preview event (non-blocking)
    pub async fn poll_event(&self) -> Option<PreviewEvent> {
        self.events.poll().await
    }

    /// Wait for next preview event
    pub async fn wait_for_event(&self) -> Option<PreviewEvent> {
        self.events.wait().await
    }

    async fn select_camera(&self) -> Result<SelectedCamera, CameraError> {
        let facing = self.view().preferred_facing;
        let hardware = self.hardware.clone();
        let selected = self
            .executor
            .run(move || {
                let identities = hardware
                    .enumerate_identities()
                    .map_err(|e| CameraError::hardware("enumerating cameras", e))?;
                let count = identities.len();
                for identity in identities {
                    match hardware.characteristics(&identity) {
                        Ok(characteristics) if characteristics.lens_facing == facing => {
                            return Ok(SelectedCamera {
                                identity,
                                characteristics,
                            });
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Skipping camera {}: {}", identity, e),
                    }
                }
                Err(CameraError::NoDeviceFound(format!(
                    "no {} camera among {} device(s)",
                    facing, count
                )))
            })
            .await??;

        log::info!(
            "Selected {} camera {} (sensor at {} degrees)",
            facing,
            selected.identity,
            selected.characteristics.sensor_orientation
        );
        Ok(selected)
    }

    /// Configure a session and start the repeating request when both a
    /// surface and the device are available. Caller holds the device lock.
    async fn start_preview_if_ready(&self, handle: &DeviceHandle) -> Result<(), CameraError> {
        let mark = self.session.cancel_mark();
        if self.session.has_session() {
            return Ok(());
        }
        let (provider, view_size, rotation, camera) = {
            let view = self.view();
            (
                view.provider.clone(),
                view.view_size,
                view.rotation,
                view.camera.clone(),
            )
        };
        let (Some(provider), Some(view_size), Some(camera)) = (provider, view_size, camera) else {
            log::debug!("Preview deferred until a surface is available");
            return Ok(());
        };
        self.ensure_live()?;

        let geometry = PreviewGeometry::compute(
            &camera.characteristics,
            view_size,
            rotation,
            self.config.camera.fixed_aspect(),
        )
        .ok_or(CameraError::NoPreviewSize)?;
        let surface = provider
            .acquire_surface(geometry.preview_size)
            .ok_or(CameraError::SurfaceUnavailable)?;

        self.session
            .configure_since(mark, handle, vec![surface])
            .await?;
        if self.is_disposed() {
            self.close_session().await?;
            return Err(CameraError::Cancelled(Operation::Configure));
        }

        self.view().geometry = Some(geometry);
        self.events
            .emit(PreviewEventKind::GeometryChanged(geometry));

        if self.view().paused {
            log::debug!("Session configured while paused; preview not started");
            return Ok(());
        }
        self.start_repeating().await
    }

    /// (Re)build the preview request from the current controls and install it.
    async fn start_repeating(&self) -> Result<(), CameraError> {
        let targets: Vec<SurfaceId> = match self.session.current() {
            Some(info) => info.surfaces.iter().map(|s| s.id).collect(),
            None => return Err(CameraError::invalid_state("no capture session")),
        };
        let request = {
            let view = self.view();
            let flash = view
                .camera
                .as_ref()
                .is_some_and(|c| c.characteristics.flash_available);
            preview_request(targets, view.af_mode, view.ae_mode, flash)
        };
        self.session.start_repeating(request).await?;
        self.emit_preview_started();
        Ok(())
    }

    async fn close_session(&self) -> Result<(), CameraError> {
        if !self.session.has_session() {
            return Ok(());
        }
        self.session.close().await?;
        self.events.emit(PreviewEventKind::SessionClosed);
        Ok(())
    }

    fn refresh_geometry(&self) -> Option<PreviewGeometry> {
        let geometry = {
            let mut view = self.view();
            let (Some(camera), Some(view_size), Some(current)) =
                (&view.camera, view.view_size, view.geometry)
            else {
                return None;
            };
            let geometry = PreviewGeometry::for_preview(
                &camera.characteristics,
                view_size,
                view.rotation,
                current.preview_size,
            );
            if geometry == current {
                return Some(current);
            }
            view.geometry = Some(geometry);
            geometry
        };
        self.events
            .emit(PreviewEventKind::GeometryChanged(geometry));
        Some(geometry)
    }

    fn emit_preview_started(&self) {
        if let Some(geometry) = self.view().geometry {
            self.events.emit(PreviewEventKind::PreviewStarted {
                preview_size: geometry.preview_size,
            });
        }
    }

    fn cancel_pending(&self) {
        self.permissions.cancel_pending();
        self.device.cancel_pending();
        self.session.cancel_pending();
    }

    fn ensure_live(&self) -> Result<(), CameraError> {
        if self.is_disposed() {
            return Err(CameraError::Disposed);
        }
        Ok(())
    }

    fn view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PreviewController {
    fn drop(&mut self) {
        if self.is_disposed() {
            return;
        }
        log::warn!("Preview controller dropped without dispose; releasing camera");
        self.cancel_pending();
        self.device.release_now();
        self.executor.stop();
    }
}

/// Build the repeating preview request. Flash auto-exposure modes fall back
/// to plain auto-exposure on cameras without a flash unit.
pub fn preview_request(
    targets: Vec<SurfaceId>,
    af_mode: AfMode,
    ae_mode: AeMode,
    flash_available: bool,
) -> CaptureRequest {
    let ae_mode = match ae_mode {
        AeMode::OnAutoFlash | AeMode::OnAlwaysFlash if !flash_available => AeMode::On,
        mode => mode,
    };
    CaptureRequest::preview(targets)
        .with_af_mode(af_mode)
        .with_ae_mode(ae_mode)
}

fn release_hook(session_hook: DeviceReleaseHook, events: EventSender) -> DeviceReleaseHook {
    Arc::new(move |device: &DeviceHandle, reason: &DeviceRelease| {
        session_hook(device, reason);
        let camera_id = device.identity().clone();
        match reason {
            DeviceRelease::Closed => events.emit(PreviewEventKind::DeviceClosed { camera_id }),
            lost => events.emit(PreviewEventKind::DeviceLost {
                camera_id,
                reason: lost.to_string(),
            }),
        }
    })
}
