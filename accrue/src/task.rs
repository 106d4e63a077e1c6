//! Background periodic tasks.
//!
//! A [`PeriodicTask`] runs a closure on its own named thread at a fixed
//! period. The thread sleeps on a stop channel, so stopping the task wakes
//! it immediately instead of waiting out the period. Dropping the task stops
//! it and joins the thread.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{AccrueError, Result};

/// Current time in nanoseconds since the Unix epoch.
pub fn timestamp_ns() -> u64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_secs() * 1_000_000_000 + u64::from(dur.subsec_nanos())
}

/// A cancellable closure running every `period` on a dedicated thread.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawns the task. The first run happens one period after spawning.
    ///
    /// # Errors
    ///
    /// Returns [`AccrueError::Spawn`] if the thread cannot be created.
    pub fn spawn<F>(name: impl Into<String>, period: Duration, mut work: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => work(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|source| AccrueError::Spawn {
                task: name.clone(),
                source,
            })?;

        tracing::debug!(task = %name, ?period, "periodic task started");
        Ok(Self {
            name,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// The task (and thread) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the task and waits for the thread to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(task = %self.name, "periodic task panicked");
            } else {
                tracing::debug!(task = %self.name, "periodic task stopped");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
