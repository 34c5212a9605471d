use crate::permissions::{PermissionProvider, PermissionResponder, PermissionStatus};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// How the simulated user answers the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAnswer {
    Grant,
    Deny,
    /// Leave the prompt open until [`MockPermissions::answer_held`]
    Hold,
}

/// Scripted permission prompt that counts requests and detects overlap
pub struct MockPermissions {
    platform_status: Mutex<PermissionStatus>,
    answer: Mutex<PermissionAnswer>,
    requests: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    overlapped: AtomicBool,
    held: Mutex<Vec<PermissionResponder>>,
}

impl MockPermissions {
    pub fn new(answer: PermissionAnswer) -> Self {
        Self {
            platform_status: Mutex::new(PermissionStatus::NotDetermined),
            answer: Mutex::new(answer),
            requests: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            overlapped: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn granting() -> Self {
        Self::new(PermissionAnswer::Grant)
    }

    pub fn denying() -> Self {
        Self::new(PermissionAnswer::Deny)
    }

    /// Platform already reports access; no prompt is needed.
    pub fn already_granted() -> Self {
        let mock = Self::granting();
        mock.set_platform_status(PermissionStatus::Granted);
        mock
    }

    pub fn set_platform_status(&self, status: PermissionStatus) {
        *self
            .platform_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn set_answer(&self, answer: PermissionAnswer) {
        *self.answer.lock().unwrap_or_else(PoisonError::into_inner) = answer;
    }

    /// Number of prompts shown
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Whether a prompt was shown while another was still open
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Answer every held prompt.
    pub fn answer_held(&self, granted: bool) -> usize {
        let held: Vec<_> = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = held.len();
        for responder in held {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            responder.respond(granted);
        }
        count
    }
}

impl PermissionProvider for MockPermissions {
    fn check_status(&self) -> PermissionStatus {
        *self
            .platform_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, responder: PermissionResponder) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }

        let answer = *self.answer.lock().unwrap_or_else(PoisonError::into_inner);
        let granted = match answer {
            PermissionAnswer::Grant => true,
            PermissionAnswer::Deny => false,
            PermissionAnswer::Hold => {
                self.held
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(responder);
                return;
            }
        };
        let in_flight = self.in_flight.clone();
        thread::spawn(move || {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            responder.respond(granted);
        });
    }
}
