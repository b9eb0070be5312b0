// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single-flight worker thread.
//
// Each scan job owns one worker.  Callers hand it a closure and block until
// the result comes back, so every device call of a job runs on the same
// thread, one at a time, no matter how many request threads ask.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dedicated thread executing submitted closures in order.
pub struct Worker {
    name: String,
    sender: Option<SyncSender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        // Depth one: a second caller queues behind the task in flight.
        let (sender, receiver) = mpsc::sync_channel::<Task>(1);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })?;
        debug!(worker = %name, "worker thread started");
        Ok(Self {
            name,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Run `f` on the worker thread and wait for its result.
    ///
    /// Must not be called from the worker thread itself.
    pub fn execute_synchronously<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or_else(|| self.gone())?;
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let task: Task = Box::new(move || {
            let _ = result_tx.send(f());
        });
        sender.send(task).map_err(|_| self.gone())?;
        result_rx.recv().map_err(|_| self.gone())
    }

    /// Queue `f` without waiting.  Returns false when the worker is busy
    /// with a full queue or gone.
    pub fn try_execute<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        match sender.try_send(Box::new(f)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                warn!(worker = %self.name, "worker thread has exited");
                false
            }
        }
    }

    fn gone(&self) -> ScanwerkError {
        ScanwerkError::Server(format!("worker thread {} is not running", self.name))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the channel ends the receive loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                warn!(worker = %self.name, "worker dropped on its own thread, detaching");
                return;
            }
            if handle.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn runs_closure_on_worker_thread() {
        let worker = Worker::spawn("test-worker").expect("spawn");
        let caller = thread::current().id();
        let ran_on = worker
            .execute_synchronously(|| thread::current().id())
            .expect("execute");
        assert_ne!(ran_on, caller);
        assert_eq!(worker.execute_synchronously(|| 6 * 7).expect("execute"), 42);
    }

    #[test]
    fn concurrent_callers_never_overlap() {
        let worker = Arc::new(Worker::spawn("serial").expect("spawn"));
        let active = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let (worker, active, overlaps, barrier) =
                    (worker.clone(), active.clone(), overlaps.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..5 {
                        let (active, overlaps) = (active.clone(), overlaps.clone());
                        worker
                            .execute_synchronously(move || {
                                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                                    overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                thread::sleep(Duration::from_millis(1));
                                active.fetch_sub(1, Ordering::SeqCst);
                            })
                            .expect("execute");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("join");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_joins_after_pending_work() {
        let counter = Arc::new(AtomicU32::new(0));
        {
            let worker = Worker::spawn("drop").expect("spawn");
            let c = counter.clone();
            assert!(worker.try_execute(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
