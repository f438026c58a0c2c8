//! Fixed-size worker pool for episode processing.
//!
//! `workers` named threads pull jobs from one unbounded crossbeam channel,
//! so at most `workers` jobs run at once while further submissions queue
//! without blocking the caller. A panicking job is logged and the worker
//! moves on to the next one.

use crate::error::{PipelineError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    name: String,
    size: usize,
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, workers: usize) -> Result<Self> {
        let name = name.into();
        let size = workers.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();

        let mut handles = Vec::with_capacity(size);
        for idx in 0..size {
            let rx: Receiver<Job> = rx.clone();
            let pool_name = name.clone();
            let handle = thread::Builder::new()
                .name(format!("classify-{name}-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("Job in worker pool '{}' panicked", pool_name);
                        }
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            name,
            size,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job; never blocks
    pub fn submit(&self, job: Job) -> Result<()> {
        let tx = lock(&self.tx);
        let Some(tx) = tx.as_ref() else {
            return Err(PipelineError::Shutdown(format!(
                "Worker pool '{}' is shut down",
                self.name
            )));
        };
        tx.send(job)
            .map_err(|e| PipelineError::Channel(format!("Worker pool '{}': {}", self.name, e)))
    }

    /// Jobs waiting for a free worker
    pub fn queued(&self) -> usize {
        lock(&self.tx).as_ref().map_or(0, |tx| tx.len())
    }

    /// Stop accepting jobs, let queued jobs finish, then join every worker
    pub fn shutdown(&self) {
        drop(lock(&self.tx).take());
        let handles = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for handle in handles {
            // the last owner may be dropped from inside one of our own jobs
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread of pool '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_concurrency_bounded_by_size() {
        let pool = WorkerPool::new("t", 2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(Box::new(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new("t", 1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let counter = Arc::clone(&done);
        pool.submit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new("t", 1).unwrap();
        pool.shutdown();
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(PipelineError::Shutdown(_))
        ));
        // second shutdown is a no-op
        pool.shutdown();
    }

    #[test]
    fn test_zero_workers_means_one() {
        let pool = WorkerPool::new("t", 0).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
