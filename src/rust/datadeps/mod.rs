// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Management of task data dependencies using a hash map from global addresses to the tasks that
//! last touched them. The hash key is the absolute local address carried by the global address,
//! since that is what the rest of the task handling code works with.

pub mod entry;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    datadeps::entry::{
        DepEntry,
        DepPool,
    },
    runtime::{
        fail::Fail,
        memory::{
            GlobalAddress,
            SegmentTable,
        },
        scheduler::{
            task::{
                RemoteTaskHandle,
                Task,
                TaskRef,
                TaskState,
            },
            taskqueue::TaskQueue,
        },
        transport::{
            DepMessage,
            RemoteTransport,
        },
        types::{
            DepKind,
            Dependency,
            Phase,
            UnitId,
        },
    },
};
use ::slab::Slab;
use ::std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of slots in the dependency hash.
const DEPHASH_SIZE: usize = 1024;

//======================================================================================================================
// Structures
//======================================================================================================================

/// State of the dependency hash, guarded as a whole by the global dependency mutex. The hold time
/// of the mutex is bounded by a walk over a single slot chain.
struct DepHash {
    /// Hash slots. Each slot chains entries newest-first.
    slots: Vec<VecDeque<Box<DepEntry>>>,
    /// Free list of retired entries.
    pool: DepPool,
    /// Remote dependency requests that no local writer has matched yet.
    unhandled_remote: VecDeque<Box<DepEntry>>,
    /// Local tasks awaiting a release message from another unit, keyed by the handle that was
    /// sent out with the request.
    pending: Slab<Arc<Task>>,
    /// Set between `init` and `fini`.
    initialized: bool,
}

/// The dependency tracking service of one unit.
pub struct DataDeps {
    /// Identifier of this unit.
    my_unit: UnitId,
    /// Transport used to exchange dependency requests and releases.
    transport: Arc<dyn RemoteTransport>,
    /// The dependency hash, behind the global dependency mutex.
    hash: Mutex<DepHash>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Computes the hash slot of an absolute global address. The upper bits of the offset are used
/// since addresses are assumed to be 8-byte aligned; the offset is folded with the Marsaglia
/// shift triplet (7, 11, 17), which distributes uniformly for pointer-like keys.
fn hash_gaddr(gaddr: &GlobalAddress) -> usize {
    let offset: u64 = gaddr.offset >> 3;
    ((offset ^ (offset >> 7) ^ (offset >> 11) ^ (offset >> 17)) % (DEPHASH_SIZE as u64)) as usize
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for the Dependency Tracking Service
impl DataDeps {
    /// Creates the dependency tracking service for this unit.
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        let mut slots: Vec<VecDeque<Box<DepEntry>>> = Vec::with_capacity(DEPHASH_SIZE);
        slots.resize_with(DEPHASH_SIZE, VecDeque::new);
        Self {
            my_unit: transport.my_unit(),
            transport,
            hash: Mutex::new(DepHash {
                slots,
                pool: DepPool::new(),
                unhandled_remote: VecDeque::new(),
                pending: Slab::new(),
                initialized: false,
            }),
        }
    }

    /// Initializes the dependency tracking service. Re-initialization after [DataDeps::fini] is
    /// permitted.
    pub fn init(&self) -> Result<(), Fail> {
        self.lock().initialized = true;
        Ok(())
    }

    /// Retires every entry in every slot and zeroes the slot heads.
    pub fn reset(&self) -> Result<(), Fail> {
        let mut hash: MutexGuard<DepHash> = self.lock();
        for slot in 0..DEPHASH_SIZE {
            while let Some(entry) = hash.slots[slot].pop_front() {
                hash.pool.recycle(entry);
            }
        }
        Ok(())
    }

    /// Finalizes the dependency tracking service, draining the free list.
    pub fn fini(&self) -> Result<(), Fail> {
        self.reset()?;
        let mut hash: MutexGuard<DepHash> = self.lock();
        while let Some(entry) = hash.unhandled_remote.pop_front() {
            hash.pool.recycle(entry);
        }
        hash.pending.clear();
        hash.pool.drain();
        hash.initialized = false;
        Ok(())
    }

    /// Finds all tasks `task` depends on and adds `task` to the dependency hash. For each
    /// dependency, prior entries on the same address are considered up to and including the first
    /// write: later writes shadow earlier ones.
    pub fn handle_task(&self, task: &Arc<Task>, deps: &[Dependency], segments: &SegmentTable) -> Result<(), Fail> {
        debug!(
            "handle_task(): task {:?} has {} data dependencies in phase {}",
            task.id(),
            deps.len(),
            task.phase()
        );
        for declared in deps {
            if declared.kind == DepKind::Direct {
                let cause: String = format!("direct dependencies cannot be declared (task={:?})", task.id());
                error!("handle_task(): {}", cause);
                return Err(Fail::invalid_argument(&cause));
            }
            // Translate the offset to an absolute address.
            let gaddr: GlobalAddress = segments.resolve(declared.gaddr)?;
            let dep: Dependency = Dependency {
                kind: declared.kind,
                gaddr,
            };

            if gaddr.unit != self.my_unit {
                self.send_remote_datadep(task, &dep)?;
                continue;
            }

            let mut hash: MutexGuard<DepHash> = self.lock();
            if !hash.initialized {
                let cause: String = format!("dependency tracking is not initialized");
                error!("handle_task(): {}", cause);
                return Err(Fail::not_initialized(&cause));
            }

            let slot: usize = hash_gaddr(&gaddr);
            for elem in hash.slots[slot].iter() {
                let prior: &Arc<Task> = match elem.task.local() {
                    Some(prior) => prior,
                    None => continue,
                };
                debug_assert!(!Arc::ptr_eq(prior, task), "task already present in dependency hash");
                if elem.dep.gaddr != gaddr {
                    continue;
                }
                let mut inner = prior.lock_inner();
                if inner.state != TaskState::Finished
                    && (dep.kind.is_write() || (dep.kind == DepKind::In && elem.dep.kind.is_write()))
                {
                    // Writes wait for every prior access, reads only for prior writes.
                    let unresolved: i32 = task.inc_unresolved();
                    trace!(
                        "handle_task(): task {:?} is a local successor of task {:?} (num_deps={})",
                        task.id(),
                        prior.id(),
                        unresolved
                    );
                    inner.local_successors.push(task.clone());
                }
                drop(inner);
                if elem.dep.kind.is_write() {
                    // Accesses before the latest write are shadowed by it.
                    break;
                }
            }

            let entry: Box<DepEntry> =
                hash.pool
                    .allocate(TaskRef::Local(task.clone()), dep, self.my_unit, task.phase());
            hash.slots[slot].push_front(entry);

            // A previously unhandled remote read may be satisfied by this task.
            self.sweep_unhandled_remote(&mut hash, task, &dep)?;
        }
        Ok(())
    }

    /// Looks for the latest local write that satisfies the remote read `dep` of the task named by
    /// `remote_task` and records the requester as a remote successor. A request that no local
    /// writer matches is parked until one registers or the phase ends.
    pub fn handle_remote_task(
        &self,
        dep: &Dependency,
        phase: Phase,
        remote_task: RemoteTaskHandle,
        origin: UnitId,
    ) -> Result<(), Fail> {
        if dep.kind != DepKind::In {
            let cause: String = format!("remote dependencies must be reads (kind={:?}, origin={})", dep.kind, origin);
            error!("handle_remote_task(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }

        let mut hash: MutexGuard<DepHash> = self.lock();
        if !hash.initialized {
            let cause: String = format!("dependency tracking is not initialized");
            error!("handle_remote_task(): {}", cause);
            return Err(Fail::not_initialized(&cause));
        }

        let slot: usize = hash_gaddr(&dep.gaddr);
        let mut writer: Option<Arc<Task>> = None;
        for elem in hash.slots[slot].iter() {
            if elem.dep.gaddr == dep.gaddr && elem.dep.kind.is_write() {
                writer = elem.task.local().cloned();
                break;
            }
        }

        match writer {
            Some(task) => {
                let mut inner = task.lock_inner();
                if inner.state != TaskState::Finished {
                    debug!(
                        "handle_remote_task(): task {:?} satisfies remote dependency of origin {}",
                        task.id(),
                        origin
                    );
                    let entry: Box<DepEntry> =
                        hash.pool.allocate(TaskRef::Remote(remote_task), *dep, origin, phase);
                    inner.remote_successors.push(entry);
                } else {
                    // The writer already finished, so the reader may proceed immediately.
                    drop(inner);
                    drop(hash);
                    self.transport.send_release(origin, remote_task, dep)?;
                }
            },
            None => {
                info!(
                    "handle_remote_task(): no local task satisfies dependency {:?} of origin {}, parking it",
                    dep.gaddr, origin
                );
                let entry: Box<DepEntry> = hash.pool.allocate(TaskRef::Remote(remote_task), *dep, origin, phase);
                hash.unhandled_remote.push_front(entry);
            },
        }
        Ok(())
    }

    /// Records the direct happens-before edge between `local_task` and its remote successor.
    pub fn handle_remote_direct(
        &self,
        local_task: &Arc<Task>,
        remote_task: RemoteTaskHandle,
        origin: UnitId,
    ) -> Result<(), Fail> {
        debug!(
            "handle_remote_direct(): task {:?} gets remote successor on unit {}",
            local_task.id(),
            origin
        );
        let mut hash: MutexGuard<DepHash> = self.lock();
        let entry: Box<DepEntry> = hash
            .pool
            .allocate(TaskRef::Remote(remote_task), Dependency::direct(), origin, 0);
        local_task.lock_inner().remote_successors.push(entry);
        Ok(())
    }

    /// Handles an incoming release: resolves one outstanding remote dependency of the local task
    /// named by `handle` and pushes the task to `queue` once all its dependencies have resolved.
    pub fn handle_remote_release(&self, handle: RemoteTaskHandle, queue: &TaskQueue) -> Result<(), Fail> {
        let task: Arc<Task> = {
            let mut hash: MutexGuard<DepHash> = self.lock();
            let key: usize = u64::from(handle) as usize;
            match hash.pending.try_remove(key) {
                Some(task) => task,
                None => {
                    let cause: String = format!("no pending task for released handle {:?}", handle);
                    error!("handle_remote_release(): {}", cause);
                    return Err(Fail::invalid_argument(&cause));
                },
            }
        };
        let unresolved: i32 = task.dec_unresolved();
        debug!(
            "handle_remote_release(): task {:?} has {} dependencies left",
            task.id(),
            unresolved
        );
        if unresolved == 0 {
            task.make_ready();
            queue.push(task);
        }
        Ok(())
    }

    /// Looks up the local task behind a handle previously sent out with a request, without
    /// consuming the pending reply.
    pub fn lookup_pending(&self, handle: RemoteTaskHandle) -> Result<Arc<Task>, Fail> {
        let hash: MutexGuard<DepHash> = self.lock();
        let key: usize = u64::from(handle) as usize;
        match hash.pending.get(key) {
            Some(task) => Ok(task.clone()),
            None => {
                let cause: String = format!("no pending task for handle {:?}", handle);
                error!("lookup_pending(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Releases the remote and local dependencies of a finished (or cancelled) task. Ready
    /// successors are pushed onto the releasing thread's queue.
    pub fn release_local_task(&self, queue: &TaskQueue, task: &Arc<Task>) -> Result<(), Fail> {
        self.release_remote_dependencies(task);

        for successor in task.take_local_successors() {
            let unresolved: i32 = successor.dec_unresolved();
            debug!(
                "release_local_task(): task {:?} has {} dependencies left",
                successor.id(),
                unresolved
            );
            if unresolved == 0 {
                successor.make_ready();
                queue.push(successor);
            }
        }
        Ok(())
    }

    /// Releases every parked remote request unconditionally: no local writer appeared before the
    /// phase closed, so the remote readers may proceed.
    pub fn release_unhandled_remote(&self) -> Result<(), Fail> {
        let mut hash: MutexGuard<DepHash> = self.lock();
        while let Some(entry) = hash.unhandled_remote.pop_front() {
            debug!(
                "release_unhandled_remote(): releasing remote task of unit {} parked in phase {}",
                entry.origin, entry.phase
            );
            match entry.task.remote() {
                Some(remote) => {
                    if let Err(e) = self.transport.send_release(entry.origin, remote, &entry.dep) {
                        error!("release_unhandled_remote(): failed to send release: {:?}", e);
                    }
                },
                None => error!("release_unhandled_remote(): parked entry does not name a remote task"),
            }
            hash.pool.recycle(entry);
        }
        Ok(())
    }

    /// Dispatches one incoming transport message.
    pub fn dispatch(&self, message: DepMessage, queue: &TaskQueue) -> Result<(), Fail> {
        match message {
            DepMessage::DataDep {
                dep,
                phase,
                task,
                origin,
            } => self.handle_remote_task(&dep, phase, task, origin),
            DepMessage::DirectTaskDep { waiter, target, origin } => {
                let local: Arc<Task> = self.lookup_pending(target)?;
                self.handle_remote_direct(&local, waiter, origin)
            },
            DepMessage::Release { task, .. } => self.handle_remote_release(task, queue),
        }
    }

    /// Returns the number of live entries chained in the hash slots.
    pub fn live_entries(&self) -> usize {
        let hash: MutexGuard<DepHash> = self.lock();
        hash.slots.iter().map(|chain| chain.len()).sum()
    }

    /// Returns the number of parked remote requests.
    pub fn unhandled_len(&self) -> usize {
        self.lock().unhandled_remote.len()
    }

    /// Returns the number of retired entries on the free list.
    pub fn free_len(&self) -> usize {
        self.lock().pool.free_len()
    }

    /// Returns the number of outstanding remote replies.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, DepHash> {
        self.hash.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forwards a dependency on memory owned by another unit to that unit. The matching release
    /// resolves the dependency added here.
    fn send_remote_datadep(&self, task: &Arc<Task>, dep: &Dependency) -> Result<(), Fail> {
        let handle: RemoteTaskHandle = {
            let mut hash: MutexGuard<DepHash> = self.lock();
            if !hash.initialized {
                let cause: String = format!("dependency tracking is not initialized");
                error!("send_remote_datadep(): {}", cause);
                return Err(Fail::not_initialized(&cause));
            }
            RemoteTaskHandle::from(hash.pending.insert(task.clone()) as u64)
        };
        task.inc_unresolved();
        trace!(
            "send_remote_datadep(): task {:?} depends on {:?} owned by unit {}",
            task.id(),
            dep.gaddr,
            dep.gaddr.unit
        );
        if let Err(e) = self.transport.send_datadep(dep.gaddr.unit, dep, task.phase(), handle) {
            task.dec_unresolved();
            self.lock().pending.remove(u64::from(handle) as usize);
            return Err(e);
        }
        Ok(())
    }

    /// Walks the parked remote requests after a local write registered. Requests in the same
    /// phase are handed to the writer; requests from an earlier phase must finish before the
    /// writer runs, so a direct dependency is requested from their origin and the entry stays
    /// parked for a later writer.
    fn sweep_unhandled_remote(
        &self,
        hash: &mut DepHash,
        task: &Arc<Task>,
        dep: &Dependency,
    ) -> Result<(), Fail> {
        if !dep.kind.is_write() || hash.unhandled_remote.is_empty() {
            return Ok(());
        }
        let mut first_err: Option<Fail> = None;
        let mut remaining: VecDeque<Box<DepEntry>> = VecDeque::with_capacity(hash.unhandled_remote.len());
        while let Some(entry) = hash.unhandled_remote.pop_front() {
            if entry.dep.gaddr != dep.gaddr {
                remaining.push_back(entry);
                continue;
            }
            if entry.phase == task.phase() {
                trace!(
                    "sweep_unhandled_remote(): parked request of unit {} handled by task {:?}",
                    entry.origin,
                    task.id()
                );
                task.lock_inner().remote_successors.push(entry);
            } else if entry.phase < task.phase() {
                // The parked reader must run before this task overwrites its input.
                match entry.task.remote() {
                    Some(target) => {
                        let waiter: RemoteTaskHandle =
                            RemoteTaskHandle::from(hash.pending.insert(task.clone()) as u64);
                        task.inc_unresolved();
                        if let Err(e) = self.transport.send_direct_taskdep(entry.origin, waiter, target) {
                            error!("sweep_unhandled_remote(): failed to send direct dependency: {:?}", e);
                            task.dec_unresolved();
                            hash.pending.remove(u64::from(waiter) as usize);
                            if first_err.is_none() {
                                first_err = Some(e);
                            }
                        }
                    },
                    None => error!("sweep_unhandled_remote(): parked entry does not name a remote task"),
                }
                remaining.push_back(entry);
            } else {
                // The request belongs to a later phase than this task.
                remaining.push_back(entry);
            }
        }
        hash.unhandled_remote = remaining;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Releases the remote successors of `task`. Before each release, direct dependency requests
    /// are issued for local writes that must block until the remote reader has executed.
    fn release_remote_dependencies(&self, task: &Arc<Task>) {
        trace!("release_remote_dependencies(): releasing remote successors of task {:?}", task.id());
        for entry in task.take_remote_successors() {
            self.send_direct_dependencies(&entry);
            match entry.task.remote() {
                Some(remote) => {
                    if let Err(e) = self.transport.send_release(entry.origin, remote, &entry.dep) {
                        error!("release_remote_dependencies(): failed to send release: {:?}", e);
                    }
                },
                None => error!("release_remote_dependencies(): remote successor does not name a remote task"),
            }
            self.lock().pool.recycle(entry);
        }
    }

    /// Issues direct dependency requests for local writes on the address of `remotedep`: they
    /// cannot run before the remote reader has executed. The slot walk stops at the first entry
    /// with no pending dependencies, since that task is already (being) executed and so are all
    /// entries registered before it.
    fn send_direct_dependencies(&self, remotedep: &DepEntry) {
        if remotedep.dep.kind == DepKind::Direct {
            return;
        }
        let mut hash: MutexGuard<DepHash> = self.lock();
        let slot: usize = hash_gaddr(&remotedep.dep.gaddr);
        let mut waiters: Vec<Arc<Task>> = Vec::new();
        for elem in hash.slots[slot].iter() {
            let local: &Arc<Task> = match elem.task.local() {
                Some(local) => local,
                None => continue,
            };
            if local.unresolved() == 0 {
                trace!(
                    "send_direct_dependencies(): task {:?} has no pending dependencies, stopping",
                    local.id()
                );
                break;
            }
            if elem.dep.gaddr == remotedep.dep.gaddr && elem.dep.kind.is_write() {
                waiters.push(local.clone());
            }
        }
        let target: RemoteTaskHandle = match remotedep.task.remote() {
            Some(target) => target,
            None => {
                error!("send_direct_dependencies(): remote successor does not name a remote task");
                return;
            },
        };
        for waiter_task in waiters {
            let waiter: RemoteTaskHandle = RemoteTaskHandle::from(hash.pending.insert(waiter_task.clone()) as u64);
            match self.transport.send_direct_taskdep(remotedep.origin, waiter, target) {
                Ok(()) => {
                    let unresolved: i32 = waiter_task.inc_unresolved();
                    debug!(
                        "send_direct_dependencies(): task {:?} now has {} dependencies",
                        waiter_task.id(),
                        unresolved
                    );
                },
                Err(e) => {
                    error!("send_direct_dependencies(): failed to send direct dependency: {:?}", e);
                    hash.pending.remove(u64::from(waiter) as usize);
                },
            }
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
