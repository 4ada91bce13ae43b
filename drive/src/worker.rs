use drive_traits::MonitorError;
use log::{debug, error};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Commands sent to a worker thread.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Stop,
}

/// A background thread that runs `tick` immediately and then once per
/// period until stopped, or until `tick` returns `false`. The wait between
/// ticks is a channel receive with a timeout, so a stop request wakes the
/// thread at once.
pub(crate) struct Worker {
    name: String,
    command_tx: mpsc::Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, period: Duration, mut tick: F) -> Result<Self, MonitorError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("{} thread started", thread_name);
                loop {
                    if !tick() {
                        debug!("{} thread finished its work", thread_name);
                        break;
                    }
                    match command_rx.recv_timeout(period) {
                        Ok(WorkerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
                debug!("{} thread exiting", thread_name);
            })
            .map_err(|e| MonitorError::Other(format!("Failed to spawn {} thread: {}", name, e)))?;

        Ok(Worker { name: name.to_string(), command_tx, handle: Some(handle) })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the thread and waits for the current tick to finish. When called
    /// from the worker thread itself the thread exits after the current tick.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("{} thread panicked", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
