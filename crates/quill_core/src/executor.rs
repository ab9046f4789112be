//! Serialized task executor.
//!
//! A single-consumer FIFO queue: one worker thread runs every task in push
//! order, which makes it the serialization point for all datastore
//! mutations. The executor starts out **buffering** — tasks accumulate
//! without running until the datastore has loaded — and flips to **ready**
//! when the buffer is drained. Forced pushes bypass the buffer; the load
//! path uses them to run its own work ahead of queued user operations.

use crate::error::{DbError, DbResult};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

struct ExecState {
    ready: bool,
    buffer: Vec<Job>,
}

/// FIFO executor with a pre-ready buffer.
pub struct Executor {
    sender: Sender<Message>,
    state: Mutex<ExecState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Creates an executor in the buffering state and starts its worker.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Message>();
        let worker = std::thread::Builder::new()
            .name("quill-executor".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        // A panicking task must not take the worker down:
                        // the next queued task still runs.
                        Message::Run(job) => {
                            let _ = catch_unwind(AssertUnwindSafe(job));
                        }
                        Message::Shutdown => break,
                    }
                }
            })
            .expect("spawning the executor worker thread");

        Self {
            sender,
            state: Mutex::new(ExecState {
                ready: false,
                buffer: Vec::new(),
            }),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Whether the buffer has been released.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Enqueues a task.
    ///
    /// When ready (or `force`), the task goes straight onto the queue;
    /// otherwise it lands in the buffer and runs once `process_buffer` is
    /// called. The lock is held across the send so task order always
    /// equals push order.
    pub fn push<F>(&self, job: F, force: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        let mut state = self.state.lock();
        if state.ready || force {
            let _ = self.sender.send(Message::Run(job));
        } else {
            state.buffer.push(job);
        }
    }

    /// Flips to ready and drains the buffer onto the queue, in order.
    pub fn process_buffer(&self) {
        let mut state = self.state.lock();
        state.ready = true;
        for job in state.buffer.drain(..) {
            let _ = self.sender.send(Message::Run(job));
        }
    }

    /// Runs a closure on the worker and blocks until it completes,
    /// returning its result.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if the task died (panicked, or was discarded
    /// because the executor shut down) before reporting a result.
    pub fn submit<T, F>(&self, force: bool, f: F) -> DbResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.push(
            move || {
                let _ = tx.send(f());
            },
            force,
        );
        rx.recv().map_err(|_| DbError::TaskFailed)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            // The executor can be dropped from its own worker thread when
            // the last task holds the final reference to the datastore;
            // joining would deadlock there.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Executor")
            .field("ready", &state.ready)
            .field("buffered", &state.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn submit_returns_the_result() {
        let exec = Executor::new();
        exec.process_buffer();
        assert_eq!(exec.submit(false, || 21 * 2).unwrap(), 42);
    }

    #[test]
    fn tasks_run_in_push_order() {
        let exec = Executor::new();
        exec.process_buffer();

        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = Arc::clone(&log);
            exec.push(move || log.lock().push(i), false);
        }
        // A submitted task runs after everything pushed before it.
        exec.submit(false, || ()).unwrap();

        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn buffered_tasks_wait_for_process_buffer() {
        let exec = Executor::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            exec.push(move || log.lock().push(i), false);
        }

        // Forced tasks run ahead of the still-buffered ones.
        {
            let log = Arc::clone(&log);
            exec.submit(true, move || log.lock().push(99)).unwrap();
        }
        assert_eq!(*log.lock(), vec![99]);

        exec.process_buffer();
        exec.submit(false, || ()).unwrap();
        assert_eq!(*log.lock(), vec![99, 0, 1, 2]);
    }

    #[test]
    fn ready_flag_flips_once_buffer_drains() {
        let exec = Executor::new();
        assert!(!exec.is_ready());
        exec.process_buffer();
        assert!(exec.is_ready());
    }

    #[test]
    fn panicking_task_does_not_starve_the_queue() {
        let exec = Executor::new();
        exec.process_buffer();

        exec.push(|| panic!("boom"), false);
        assert_eq!(exec.submit(false, || 7).unwrap(), 7);
    }

    #[test]
    fn panicking_submit_reports_task_failed() {
        let exec = Executor::new();
        exec.process_buffer();

        let result: DbResult<()> = exec.submit(false, || panic!("boom"));
        assert!(matches!(result, Err(DbError::TaskFailed)));

        // And the executor is still usable.
        assert_eq!(exec.submit(false, || 1).unwrap(), 1);
    }
}
