//! UI-thread affinity.
//!
//! Surface-touching work (backend creation, surface geometry, surface
//! detach) must run on the host's UI thread. [`run_on_ui`] runs a job inline
//! when already there and otherwise hands it over and blocks until the
//! result comes back. Never call it from inside a job that is itself
//! waiting on the UI thread.

use std::thread::{self, JoinHandle, ThreadId};

use flume::{Receiver, Sender};

use crate::error::{Error, Result};

pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

pub trait UiDispatcher: Send + Sync {
    fn is_ui_thread(&self) -> bool;

    /// Queues `job` for the UI thread. Returns the job back if the UI thread
    /// is gone.
    fn dispatch(&self, job: UiJob) -> std::result::Result<(), UiJob>;
}

pub fn run_on_ui<T, F>(ui: &dyn UiDispatcher, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if ui.is_ui_thread() {
        return Ok(f());
    }

    let (reply_tx, reply_rx) = flume::bounded(1);
    ui.dispatch(Box::new(move || {
        let _ = reply_tx.send(f());
    }))
    .map_err(|_| Error::InitializationFailed("ui thread is no longer running".into()))?;

    reply_rx
        .recv()
        .map_err(|_| Error::InitializationFailed("ui job dropped before completing".into()))
}

/// Treats whichever thread calls in as the UI thread.
///
/// For hosts without thread affinity requirements (and headless use).
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentThread;

impl UiDispatcher for CurrentThread {
    fn is_ui_thread(&self) -> bool {
        true
    }

    fn dispatch(&self, job: UiJob) -> std::result::Result<(), UiJob> {
        job();
        Ok(())
    }
}

/// Channel-backed dispatcher bound to one thread.
#[derive(Clone)]
pub struct UiQueue {
    thread: ThreadId,
    jobs: Sender<UiJob>,
}

/// Receiving side of a [`UiQueue`]; lives on the UI thread.
pub struct UiPump {
    jobs: Receiver<UiJob>,
}

impl UiQueue {
    /// Binds the queue to the calling thread. The host drives the returned
    /// pump from its own event loop.
    pub fn bind_current() -> (UiQueue, UiPump) {
        let (jobs, rx) = flume::unbounded();
        let queue = UiQueue {
            thread: thread::current().id(),
            jobs,
        };
        (queue, UiPump { jobs: rx })
    }

    /// Starts a dedicated UI thread that runs jobs until every queue handle
    /// is dropped.
    pub fn spawn(name: &str) -> std::io::Result<(UiQueue, JoinHandle<()>)> {
        let (jobs, rx) = flume::unbounded::<UiJob>();
        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            UiPump { jobs: rx }.run();
        })?;
        let queue = UiQueue {
            thread: handle.thread().id(),
            jobs,
        };
        Ok((queue, handle))
    }
}

impl UiDispatcher for UiQueue {
    fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn dispatch(&self, job: UiJob) -> std::result::Result<(), UiJob> {
        self.jobs.send(job).map_err(|err| err.into_inner())
    }
}

impl UiPump {
    /// Runs queued jobs without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.jobs.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Runs jobs until every sender is gone.
    pub fn run(self) {
        while let Ok(job) = self.jobs.recv() {
            job();
        }
        log::debug!("ui pump stopped");
    }
}
