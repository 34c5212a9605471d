use crate::completion::{Completion, WaitError};
use crate::errors::{CameraError, Operation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Permission status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PermissionStatus {
    /// Permission granted
    Granted,
    /// Permission denied
    Denied,
    /// Permission not determined (user hasn't been asked yet)
    NotDetermined,
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::NotDetermined => write!(f, "not_determined"),
        }
    }
}

/// Platform permission capability
pub trait PermissionProvider: Send + Sync {
    fn check_status(&self) -> PermissionStatus;

    /// Show the prompt. The user's answer is delivered once through `responder`,
    /// from any thread.
    fn request(&self, responder: PermissionResponder);
}

/// One-shot channel back from the permission prompt
pub struct PermissionResponder {
    completion: Arc<Completion<bool>>,
}

impl PermissionResponder {
    pub fn respond(self, granted: bool) {
        if !self.completion.resolve(granted) {
            log::debug!("Discarding late permission response (granted={})", granted);
        }
    }
}

/// Caches the camera permission for the lifetime of one controller
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
    status: Mutex<PermissionStatus>,
    // Serializes prompts; queued callers reuse the outcome of the one in flight.
    request_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Arc<Completion<bool>>>>,
    // Finished prompts and the outcome of the latest one, shared with
    // callers that queued behind it
    prompts: AtomicU64,
    last_outcome: Mutex<Option<Result<(), CameraError>>>,
    cancel_epoch: AtomicU64,
    timeout: Duration,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn PermissionProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            status: Mutex::new(PermissionStatus::NotDetermined),
            request_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            prompts: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            cancel_epoch: AtomicU64::new(0),
            timeout,
        }
    }

    /// Cached status; `NotDetermined` until a check or prompt settles it
    pub fn status(&self) -> PermissionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Succeed if camera access is granted, prompting at most once.
    ///
    /// A cached denial is returned without prompting again; use
    /// [`request_again`](Self::request_again) for an explicit re-prompt.
    /// Callers that arrive while a prompt is in flight get that prompt's
    /// outcome, timeouts included.
    pub async fn ensure_granted(&self) -> Result<(), CameraError> {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let seen = self.prompts.load(Ordering::SeqCst);
        let _prompt = self.request_lock.lock().await;
        if let Some(settled) = self.settled() {
            return settled;
        }
        if self.prompts.load(Ordering::SeqCst) != seen {
            if let Some(shared) = self.last_outcome() {
                log::debug!("Reusing outcome of the permission prompt that was in flight");
                return shared;
            }
        }

        if self.provider.check_status() == PermissionStatus::Granted {
            log::debug!("Camera permission already granted by platform");
            self.set_status(PermissionStatus::Granted);
            return Ok(());
        }

        self.prompt(epoch).await
    }

    /// Prompt again after an earlier denial, in response to a fresh user action.
    pub async fn request_again(&self) -> Result<(), CameraError> {
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let _prompt = self.request_lock.lock().await;
        if self.status() == PermissionStatus::Granted {
            return Ok(());
        }
        self.prompt(epoch).await
    }

    /// Resolve an in-flight prompt as cancelled, including callers still
    /// queued behind it.
    pub fn cancel_pending(&self) -> bool {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        pending.is_some_and(|completion| completion.cancel())
    }

    fn settled(&self) -> Option<Result<(), CameraError>> {
        match self.status() {
            PermissionStatus::Granted => Some(Ok(())),
            PermissionStatus::Denied => Some(Err(CameraError::PermissionDenied)),
            PermissionStatus::NotDetermined => None,
        }
    }

    fn last_outcome(&self) -> Option<Result<(), CameraError>> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn prompt(&self, epoch: u64) -> Result<(), CameraError> {
        let outcome = self.prompt_once(epoch).await;
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
        self.prompts.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn prompt_once(&self, epoch: u64) -> Result<(), CameraError> {
        let completion = Arc::new(Completion::new());
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(completion.clone());
        if self.cancel_epoch.load(Ordering::SeqCst) != epoch {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            return Err(CameraError::Cancelled(Operation::Permission));
        }

        log::info!("Requesting camera permission");
        self.provider.request(PermissionResponder {
            completion: completion.clone(),
        });

        let outcome = completion.wait(self.timeout).await;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match outcome {
            Ok(true) => {
                log::info!("Camera permission granted");
                self.set_status(PermissionStatus::Granted);
                Ok(())
            }
            Ok(false) => {
                log::warn!("Camera permission denied");
                self.set_status(PermissionStatus::Denied);
                Err(CameraError::PermissionDenied)
            }
            Err(WaitError::TimedOut) => {
                log::error!("Permission request timed out");
                Err(CameraError::CallbackTimeout {
                    operation: Operation::Permission,
                    timeout: self.timeout,
                })
            }
            Err(_) => Err(CameraError::Cancelled(Operation::Permission)),
        }
    }

    fn set_status(&self, status: PermissionStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}
