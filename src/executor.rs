//! Single dedicated worker that serializes all hardware interaction
//!
//! Hardware calls (open, configure, repeating requests, close) and the work
//! posted by hardware callbacks all run on one named thread, in FIFO order,
//! so they never overlap even though the backend reports from its own threads.

use crate::errors::CameraError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};

type Work = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Work),
    Drain(oneshot::Sender<()>),
}

struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    thread: JoinHandle<()>,
    thread_id: ThreadId,
}

struct Inner {
    name: String,
    worker: Mutex<Option<Worker>>,
}

/// Cloneable handle to the background worker
#[derive(Clone)]
pub struct BackgroundExecutor {
    inner: Arc<Inner>,
}

impl BackgroundExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the worker thread. No-op when already running.
    pub fn start(&self) -> Result<(), CameraError> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            return Ok(());
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || worker_loop(receiver))
            .map_err(|e| CameraError::invalid_state(format!("spawn failed: {e}")))?;

        log::debug!("Started camera executor '{}'", self.inner.name);
        *worker = Some(Worker {
            sender,
            thread_id: thread.thread().id(),
            thread,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker().is_some()
    }

    /// True when called from the worker thread itself
    pub fn is_worker_thread(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| w.thread_id == thread::current().id())
    }

    /// Queue work behind everything already posted.
    pub fn post<F>(&self, work: F) -> Result<(), CameraError>
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = self.lock_worker();
        let worker = worker.as_ref().ok_or(CameraError::ExecutorStopped)?;
        worker
            .sender
            .send(Job::Run(Box::new(work)))
            .map_err(|_| CameraError::ExecutorStopped)
    }

    /// Post if running, otherwise run on the calling thread.
    ///
    /// Used for hardware callbacks that may arrive after shutdown and still
    /// have to release whatever they carry.
    pub fn dispatch<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let rejected = {
            let worker = self.lock_worker();
            match worker.as_ref() {
                Some(worker) => match worker.sender.send(Job::Run(Box::new(work))) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(job)) => job,
                },
                None => Job::Run(Box::new(work)),
            }
        };
        if let Job::Run(work) = rejected {
            log::debug!("Camera executor not running, running callback inline");
            work();
        }
    }

    /// Run `work` on the worker and await its result.
    pub async fn run<F, R>(&self, work: F) -> Result<R, CameraError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(work());
        })?;
        rx.await.map_err(|_| CameraError::ExecutorStopped)
    }

    /// Drain pending work, then stop and join the worker. Blocks the caller.
    ///
    /// No-op when not running.
    pub fn stop(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };
        let Worker {
            sender,
            thread,
            thread_id,
        } = worker;
        // Closing the channel lets the loop finish everything already queued.
        drop(sender);
        if thread_id == thread::current().id() {
            log::warn!("Camera executor stopped from its own thread; not joining");
            return;
        }
        if thread.join().is_err() {
            log::error!("Camera executor '{}' panicked", self.inner.name);
        }
        log::debug!("Stopped camera executor '{}'", self.inner.name);
    }

    /// Async flavour of [`stop`](Self::stop) that waits for the drain
    /// without blocking the runtime.
    pub async fn shutdown(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };
        let Worker { sender, thread, .. } = worker;
        let (tx, rx) = oneshot::channel();
        let drained = sender.send(Job::Drain(tx)).is_ok();
        drop(sender);
        if drained {
            let _ = rx.await;
        }
        // The loop exits right after the drain marker since the channel is closed.
        let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        log::debug!("Shut down camera executor '{}'", self.inner.name);
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn worker_loop(mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.blocking_recv() {
        match job {
            Job::Run(work) => {
                if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                    log::error!("Camera executor job panicked; continuing");
                }
            }
            Job::Drain(done) => {
                let _ = done.send(());
            }
        }
    }
}
