// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::task::Task;
use ::std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A FIFO ready queue owned by one worker thread. Releases push to the releasing thread's queue;
/// idle workers steal from the opposite end of other workers' queues. Both ends are guarded by the
/// queue mutex, so theft is atomic with respect to the owner.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Arc<Task>>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Task Queues
impl TaskQueue {
    /// Creates an empty task queue.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Pushes a ready task to the back of the queue.
    pub fn push(&self, task: Arc<Task>) {
        self.lock().push_back(task);
    }

    /// Pops the task at the front of the queue.
    pub fn pop(&self) -> Option<Arc<Task>> {
        self.lock().pop_front()
    }

    /// Steals the task at the back of the queue.
    pub fn steal(&self) -> Option<Arc<Task>> {
        self.lock().pop_back()
    }

    /// Returns the number of queued tasks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Checks whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Task>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
