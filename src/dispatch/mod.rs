#![forbid(unsafe_code)]
//! Fixed pool of worker threads fed through a job FIFO.
//!
//! Each worker owns the state built for it at spawn time (one matcher slot
//! in practice) and keeps it for its whole life. Results come back through a
//! second FIFO in completion order. A handler that panics yields a
//! [`SifterError::WorkerPanic`] result and its worker keeps serving jobs.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::types::{Result, SifterError};

struct State<J, R> {
    jobs: VecDeque<J>,
    results: VecDeque<Result<R>>,
    in_flight: usize,
    shutdown: bool,
}

struct Shared<J, R> {
    state: Mutex<State<J, R>>,
    job_ready: Condvar,
    progress: Condvar,
}

/// Blocking producer/consumer pool.
pub struct WorkerPool<J, R> {
    shared: Arc<Shared<J, R>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static, R: Send + 'static> WorkerPool<J, R> {
    /// Spawns `workers` threads named `sifter-slot-{i}`; `make_worker(i)`
    /// builds the handler thread `i` runs every job through.
    pub fn spawn<F, W>(workers: usize, mut make_worker: F) -> Result<Self>
    where
        F: FnMut(usize) -> W,
        W: FnMut(J) -> R + Send + 'static,
    {
        if workers == 0 {
            return Err(SifterError::Invalid("worker pool needs at least one thread"));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                results: VecDeque::new(),
                in_flight: 0,
                shutdown: false,
            }),
            job_ready: Condvar::new(),
            progress: Condvar::new(),
        });
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(workers),
        };
        for slot in 0..workers {
            let handler = make_worker(slot);
            let shared = Arc::clone(&pool.shared);
            // On error the pool is dropped, which stops the threads already spawned.
            let handle = thread::Builder::new()
                .name(format!("sifter-slot-{slot}"))
                .spawn(move || worker_loop(slot, &shared, handler))?;
            pool.workers.push(handle);
        }
        debug!(workers, "dispatch.spawn");
        Ok(pool)
    }

    /// Queues a job.
    pub fn submit(&self, job: J) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(SifterError::Shutdown);
        }
        state.jobs.push_back(job);
        state.in_flight += 1;
        self.shared.job_ready.notify_one();
        Ok(())
    }

    /// Next finished result.
    ///
    /// Blocks while jobs are in flight; returns `None` once nothing is
    /// pending and every result has been taken. A job whose handler
    /// panicked comes back as [`SifterError::WorkerPanic`].
    pub fn poll_result(&self) -> Option<Result<R>> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = state.results.pop_front() {
                return Some(result);
            }
            if state.in_flight == 0 {
                return None;
            }
            self.shared.progress.wait(&mut state);
        }
    }

    /// Blocks until no job is in flight, leaving results queued.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.in_flight > 0 {
            self.shared.progress.wait(&mut state);
        }
    }

    /// Jobs submitted whose result has not been produced yet.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.job_ready.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<J, R>(slot: usize, shared: &Shared<J, R>, mut handler: impl FnMut(J) -> R) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                shared.job_ready.wait(&mut state);
            }
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(job))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            error!(slot, %message, "dispatch.worker panicked");
            SifterError::WorkerPanic { slot, message }
        });
        let mut state = shared.state.lock();
        state.results.push_back(result);
        state.in_flight -= 1;
        shared.progress.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
