// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::task::Task,
    PgasRuntime,
};
use ::std::{
    cell::Cell,
    sync::Arc,
    time::Duration,
};

//======================================================================================================================
// Thread Local Storage
//======================================================================================================================

thread_local! {
    /// Identifier of the worker running on this thread, if any.
    static CURRENT_WORKER: Cell<Option<usize>> = Cell::new(None);
}

//======================================================================================================================
// Constants
//======================================================================================================================

/// How long an idle worker parks between progress polls.
const IDLE_WAIT: Duration = Duration::from_millis(1);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the identifier of the worker running on the calling thread.
pub(crate) fn current_worker() -> Option<usize> {
    CURRENT_WORKER.with(|worker| worker.get())
}

/// Main loop of a worker thread: pop from the own queue, steal when it is empty, and drive
/// transport progress while idle.
pub(crate) fn worker_main(runtime: Arc<PgasRuntime>, id: usize) {
    CURRENT_WORKER.with(|worker| worker.set(Some(id)));
    trace!("worker_main(): worker {} started", id);

    while !runtime.scheduler().is_shutdown() {
        let task: Option<Arc<Task>> = runtime
            .scheduler()
            .queue(id)
            .pop()
            .or_else(|| runtime.scheduler().try_steal(id));
        match task {
            Some(task) => {
                if let Err(e) = runtime.execute_task(id, task) {
                    error!("worker_main(): failed to run task: {:?}", e);
                }
            },
            None => {
                if let Err(e) = runtime.progress() {
                    warn!("worker_main(): progress failed: {:?}", e);
                }
                runtime.scheduler().wait_for_work(IDLE_WAIT);
            },
        }
    }

    trace!("worker_main(): worker {} stopped", id);
}
