// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Worker-thread scheduler. Every worker owns a FIFO ready queue; tasks released by a thread are
//! pushed onto that thread's queue and idle workers steal from their siblings. Idle workers also
//! drive transport progress, so no dedicated progress thread is needed.

pub mod task;
pub mod taskqueue;
pub mod worker;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        task::Task,
        taskqueue::TaskQueue,
        worker::worker_main,
    },
    PgasRuntime,
};
use ::std::{
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
    },
    thread::JoinHandle,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Wakeup channel for idle workers.
struct Notifier {
    guard: Mutex<()>,
    cv: Condvar,
}

/// The per-unit task scheduler.
pub struct Scheduler {
    /// One ready queue per worker thread. With no workers, queue zero serves inline execution.
    queues: Vec<Arc<TaskQueue>>,
    /// Wakeup channel for idle workers.
    notifier: Notifier,
    /// Set when the scheduler is shutting down.
    shutdown: AtomicBool,
    /// Handles of the running worker threads.
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Round-robin cursor for pushes from threads that are not workers.
    rr: AtomicUsize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Notifiers
impl Notifier {
    fn new() -> Self {
        Self {
            guard: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify_all(&self) {
        let _guard: MutexGuard<()> = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.cv.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) {
        let guard: MutexGuard<()> = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.cv.wait_timeout(guard, timeout);
    }
}

/// Associated Functions for Schedulers
impl Scheduler {
    /// Creates a scheduler with the given number of ready queues. At least one queue is always
    /// created so that a worker-less unit can execute tasks inline.
    pub fn new(num_queues: usize) -> Self {
        let num_queues: usize = num_queues.max(1);
        let mut queues: Vec<Arc<TaskQueue>> = Vec::with_capacity(num_queues);
        queues.resize_with(num_queues, || Arc::new(TaskQueue::new()));
        Self {
            queues,
            notifier: Notifier::new(),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            rr: AtomicUsize::new(0),
        }
    }

    /// Returns the number of ready queues.
    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    /// Returns the ready queue with the given index.
    pub fn queue(&self, index: usize) -> &Arc<TaskQueue> {
        &self.queues[index]
    }

    /// Returns the queue index of the calling thread: its own queue for a worker, round-robin
    /// otherwise.
    pub fn current_queue_index(&self) -> usize {
        match worker::current_worker() {
            Some(id) => id,
            None => self.rr.fetch_add(1, Ordering::Relaxed) % self.queues.len(),
        }
    }

    /// Pushes a ready task onto the calling thread's queue and wakes an idle worker.
    pub fn enqueue(&self, task: Arc<Task>) {
        self.queues[self.current_queue_index()].push(task);
        self.notify();
    }

    /// Steals a task from some other worker's queue.
    pub(crate) fn try_steal(&self, thief: usize) -> Option<Arc<Task>> {
        for (index, queue) in self.queues.iter().enumerate() {
            if index == thief {
                continue;
            }
            if let Some(task) = queue.steal() {
                trace!("try_steal(): worker {} stole task {:?} from worker {}", thief, task.id(), index);
                return Some(task);
            }
        }
        None
    }

    /// Wakes all idle workers.
    pub fn notify(&self) {
        self.notifier.notify_all();
    }

    /// Parks the calling worker until new work may be available.
    pub(crate) fn wait_for_work(&self, timeout: Duration) {
        self.notifier.wait_timeout(timeout);
    }

    /// Checks whether the scheduler is shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Spawns the worker threads.
    pub(crate) fn start(&self, runtime: &Arc<PgasRuntime>, num_workers: usize) -> Result<(), Fail> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for id in 0..num_workers {
            let runtime: Arc<PgasRuntime> = runtime.clone();
            let handle: JoinHandle<()> = ::std::thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker_main(runtime, id))
                .map_err(Fail::from)?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Requests shutdown and joins all worker threads.
    pub(crate) fn shutdown_and_join(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify();
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("shutdown_and_join(): worker thread panicked");
            }
        }
    }
}
