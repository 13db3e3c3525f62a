//! Recurring scheduling handle
//!
//! A named thread that calls a closure at a fixed period until stopped. The
//! scheduler loop and the visual frame pump both run on one. Stopping wakes
//! the thread immediately instead of waiting out the current period.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Ticker {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a ticker calling `tick` every `period`.
    ///
    /// The first call happens immediately. Returns the spawn error if the OS
    /// refuses a new thread.
    pub fn spawn<F>(name: &str, period: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                tick();
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::debug!(ticker = name, period_ms = period.as_millis() as u64, "ticker started");

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the ticker and wait for the in-flight tick to finish.
    ///
    /// When called from the ticker's own thread (a tick stopping its own
    /// loop) the thread is detached instead of joined.
    pub fn stop(&mut self) {
        // Dropping the sender wakes recv_timeout with Disconnected
        self.stop_tx.take();

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!("[Ticker] {} thread panicked", self.name);
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
