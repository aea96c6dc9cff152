// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    datadeps::entry::DepEntry,
    runtime::{
        fail::Fail,
        types::Phase,
    },
};
use ::std::{
    fmt,
    sync::{
        atomic::{
            AtomicI32,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct TaskId(pub u64);

/// Opaque handle naming a task on another unit. Handles are minted by the pending-reply registry
/// of the unit owning the task and travel back unchanged in release messages.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct RemoteTaskHandle(pub u64);

/// Execution state of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    Created,
    Ready,
    Running,
    Finished,
    Cancelled,
}

/// Reference to a task: either a task on this unit or an opaque handle to a task on another unit.
/// The two are disjoint and every holder knows which side it expects.
#[derive(Clone)]
pub enum TaskRef {
    Local(Arc<Task>),
    Remote(RemoteTaskHandle),
}

/// A task with data dependencies. The successor lists and the state are guarded by the per-task
/// mutex; the unresolved-dependency counter is atomic so release paths can observe it without
/// taking the mutex.
pub struct Task {
    /// Task identifier.
    id: TaskId,
    /// Phase the task was submitted in.
    phase: Phase,
    /// Number of dependencies that have not resolved yet.
    unresolved_deps: AtomicI32,
    /// Mutable task state, guarded by the per-task mutex.
    inner: Mutex<TaskInner>,
}

/// Mutable portion of a task.
pub struct TaskInner {
    /// Execution state.
    pub state: TaskState,
    /// Work to run. Taken exactly once, when the task starts executing.
    pub work: Option<Box<dyn FnOnce() + Send>>,
    /// Tasks on this unit that depend on this task.
    pub local_successors: Vec<Arc<Task>>,
    /// Dependency entries for tasks on other units that must be notified when this task finishes.
    pub remote_successors: Vec<Box<DepEntry>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Remote Task Handles
impl RemoteTaskHandle {
    /// Handle value carried by recycled dependency entries.
    pub const NULL: RemoteTaskHandle = RemoteTaskHandle(u64::MAX);
}

/// Associated Functions for Task References
impl TaskRef {
    /// Returns the local task behind this reference, if any.
    pub fn local(&self) -> Option<&Arc<Task>> {
        match self {
            TaskRef::Local(task) => Some(task),
            TaskRef::Remote(_) => None,
        }
    }

    /// Returns the remote handle behind this reference, if any.
    pub fn remote(&self) -> Option<RemoteTaskHandle> {
        match self {
            TaskRef::Local(_) => None,
            TaskRef::Remote(handle) => Some(*handle),
        }
    }
}

/// Associated Functions for Tasks
impl Task {
    /// Creates a new task in the [TaskState::Created] state.
    pub fn new(id: TaskId, phase: Phase, work: Box<dyn FnOnce() + Send>) -> Arc<Self> {
        Arc::new(Self {
            id,
            phase,
            unresolved_deps: AtomicI32::new(0),
            inner: Mutex::new(TaskInner {
                state: TaskState::Created,
                work: Some(work),
                local_successors: Vec::new(),
                remote_successors: Vec::new(),
            }),
        })
    }

    /// Returns the task identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the phase the task was submitted in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the current execution state.
    pub fn state(&self) -> TaskState {
        self.lock_inner().state
    }

    /// Returns the number of unresolved dependencies.
    pub fn unresolved(&self) -> i32 {
        self.unresolved_deps.load(Ordering::SeqCst)
    }

    /// Locks the mutable portion of the task.
    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, TaskInner> {
        // A task closure that panicked must not wedge the release protocol.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds one unresolved dependency and returns the new count.
    pub(crate) fn inc_unresolved(&self) -> i32 {
        self.unresolved_deps.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resolves one dependency and returns the new count.
    pub(crate) fn dec_unresolved(&self) -> i32 {
        let count: i32 = self.unresolved_deps.fetch_sub(1, Ordering::SeqCst) - 1;
        if count < 0 {
            error!("dec_unresolved(): task {:?} has negative number of dependencies: {}", self.id, count);
            debug_assert!(count >= 0);
        }
        count
    }

    /// Transitions the task from [TaskState::Created] to [TaskState::Ready]. Cancelled tasks stay
    /// cancelled; they are skipped when popped from a ready queue.
    pub(crate) fn make_ready(&self) {
        let mut inner: MutexGuard<TaskInner> = self.lock_inner();
        match inner.state {
            TaskState::Created => inner.state = TaskState::Ready,
            TaskState::Cancelled => (),
            state => {
                error!("make_ready(): task {:?} is in unexpected state {:?}", self.id, state);
                debug_assert!(false);
            },
        }
    }

    /// Starts executing the task: marks it [TaskState::Running] and takes its work. Returns [None]
    /// for a cancelled task, whose work is discarded while its release path still runs.
    pub(crate) fn begin_execution(&self) -> Option<Box<dyn FnOnce() + Send>> {
        let mut inner: MutexGuard<TaskInner> = self.lock_inner();
        match inner.state {
            TaskState::Cancelled => {
                inner.work = None;
                None
            },
            _ => {
                inner.state = TaskState::Running;
                inner.work.take()
            },
        }
    }

    /// Marks the task finished. After this point no successor may be attached anymore.
    pub(crate) fn finish(&self) {
        let mut inner: MutexGuard<TaskInner> = self.lock_inner();
        if inner.state != TaskState::Cancelled {
            inner.state = TaskState::Finished;
        }
    }

    /// Cancels the task before execution. Cancelling a running or finished task is not supported.
    pub fn cancel(&self) -> Result<(), Fail> {
        let mut inner: MutexGuard<TaskInner> = self.lock_inner();
        match inner.state {
            TaskState::Created | TaskState::Ready => {
                inner.state = TaskState::Cancelled;
                Ok(())
            },
            state => {
                let cause: String = format!("cannot cancel task in state {:?} (id={:?})", state, self.id);
                error!("cancel(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Detaches and returns the local successor list.
    pub(crate) fn take_local_successors(&self) -> Vec<Arc<Task>> {
        ::std::mem::take(&mut self.lock_inner().local_successors)
    }

    /// Detaches and returns the remote successor list.
    pub(crate) fn take_remote_successors(&self) -> Vec<Box<DepEntry>> {
        ::std::mem::take(&mut self.lock_inner().remote_successors)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl From<u64> for RemoteTaskHandle {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<RemoteTaskHandle> for u64 {
    fn from(value: RemoteTaskHandle) -> Self {
        value.0
    }
}

/// Debug Trait Implementation for Tasks
impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {{ id: {:?}, phase: {}, unresolved: {} }}",
            self.id,
            self.phase,
            self.unresolved()
        )
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
