// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod config;
pub mod fail;
pub mod limits;
pub mod logging;
pub mod memory;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use self::fail::Fail;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    datadeps::DataDeps,
    locality::{
        domain::Domain,
        hosts,
        hwinfo,
        unit::UnitLocality,
        Locality,
    },
    runtime::{
        config::Config,
        memory::SegmentTable,
        scheduler::{
            task::{
                Task,
                TaskId,
            },
            taskqueue::TaskQueue,
            Scheduler,
        },
        transport::{
            DepMessage,
            RemoteTransport,
            UnitInfo,
        },
        types::{
            Dependency,
            Phase,
            UnitId,
        },
    },
};
use ::std::sync::{
    atomic::{
        AtomicU64,
        AtomicUsize,
        Ordering,
    },
    Arc,
    RwLock,
    RwLockReadGuard,
    RwLockWriteGuard,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The per-unit runtime context: dependency tracking, locality information, the worker-thread
/// scheduler, and the segment table, over one transport endpoint. All public entry points hang
/// off this object.
pub struct PgasRuntime {
    /// Runtime configuration.
    config: Config,
    /// Transport endpoint of this unit.
    transport: Arc<dyn RemoteTransport>,
    /// Segment table of this unit.
    segments: RwLock<SegmentTable>,
    /// Dependency tracking service.
    datadeps: DataDeps,
    /// Locality information, present between locality_init and locality_finalize.
    locality: RwLock<Option<Arc<Locality>>>,
    /// Task scheduler.
    scheduler: Scheduler,
    /// Number of worker threads. Zero selects inline execution via [PgasRuntime::step].
    num_workers: usize,
    /// Current phase of this unit.
    phase: AtomicU64,
    /// Next task identifier.
    next_task_id: AtomicU64,
    /// Number of spawned tasks that have not completed their release yet.
    outstanding: AtomicUsize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for the Runtime
impl PgasRuntime {
    /// Brings up the runtime on this unit: initializes the transport and dependency tracking,
    /// runs locality discovery, and starts the worker threads.
    pub fn new(config: Config, transport: Arc<dyn RemoteTransport>) -> Result<Arc<Self>, Fail> {
        logging::initialize();
        transport.init()?;

        let num_workers: usize = match config.workers()? {
            Some(num_workers) => num_workers,
            None => hwinfo::probe().num_cores.max(1) as usize,
        };
        let datadeps: DataDeps = DataDeps::new(transport.clone());
        datadeps.init()?;

        let runtime: Arc<Self> = Arc::new(Self {
            config,
            transport,
            segments: RwLock::new(SegmentTable::new()),
            datadeps,
            locality: RwLock::new(None),
            scheduler: Scheduler::new(num_workers.max(1)),
            num_workers,
            phase: AtomicU64::new(0),
            next_task_id: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
        });
        runtime.locality_init()?;
        runtime.scheduler.start(&runtime, num_workers)?;
        debug!(
            "new(): unit {} of {} up with {} workers",
            runtime.my_unit(),
            runtime.num_units(),
            num_workers
        );
        Ok(runtime)
    }

    /// Returns the identifier of this unit.
    pub fn my_unit(&self) -> UnitId {
        self.transport.my_unit()
    }

    /// Returns the number of units in the team.
    pub fn num_units(&self) -> usize {
        self.transport.num_units()
    }

    /// Returns the current phase of this unit.
    pub fn current_phase(&self) -> Phase {
        self.phase.load(Ordering::SeqCst)
    }

    /// Returns the scheduler of this unit.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the dependency tracking service of this unit.
    pub fn datadeps(&self) -> &DataDeps {
        &self.datadeps
    }

    /// Registers a memory segment at the given absolute base offset.
    pub fn register_segment(&self, segment: u16, base: u64) -> Result<(), Fail> {
        self.write_segments().register(segment, base)
    }

    /// Removes a memory segment.
    pub fn unregister_segment(&self, segment: u16) -> Result<(), Fail> {
        self.write_segments().unregister(segment)
    }

    /// Creates a task with the given dependencies in the current phase. The task becomes ready as
    /// soon as all its dependencies have resolved, immediately so when it has none.
    pub fn spawn<F: FnOnce() + Send + 'static>(&self, deps: &[Dependency], work: F) -> Result<Arc<Task>, Fail> {
        let id: TaskId = TaskId::from(self.next_task_id.fetch_add(1, Ordering::SeqCst));
        let task: Arc<Task> = Task::new(id, self.current_phase(), Box::new(work));

        // One artificial dependency held for the duration of the registration, so a concurrent
        // release cannot make the task ready while its dependencies are still being declared.
        task.inc_unresolved();
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        let result: Result<(), Fail> = {
            let segments: RwLockReadGuard<SegmentTable> = self.read_segments();
            self.datadeps.handle_task(&task, deps, &segments)
        };
        if let Err(e) = result {
            error!("spawn(): failed to register task {:?}: {:?}", task.id(), e);
            let _ = task.cancel();
            if task.dec_unresolved() == 0 {
                task.make_ready();
                self.scheduler.enqueue(task);
            }
            return Err(e);
        }

        if task.dec_unresolved() == 0 {
            task.make_ready();
            self.scheduler.enqueue(task.clone());
        }
        Ok(task)
    }

    /// Cancels a task that has not started executing. Its release path still runs, so successors
    /// observe progress, but the task body is never invoked.
    pub fn cancel(&self, task: &Arc<Task>) -> Result<(), Fail> {
        task.cancel()
    }

    /// Polls the transport and dispatches incoming dependency and release messages.
    pub fn progress(&self) -> Result<(), Fail> {
        let messages: Vec<DepMessage> = self.transport.poll()?;
        if messages.is_empty() {
            return Ok(());
        }
        let queue: &Arc<TaskQueue> = self.scheduler.queue(self.scheduler.current_queue_index());
        let mut first_err: Option<Fail> = None;
        for message in messages {
            if let Err(e) = self.datadeps.dispatch(message, queue) {
                error!("progress(): failed to dispatch message: {:?}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        self.scheduler.notify();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Ends the given phase. This is a collective operation: every unit calls it once it has
    /// submitted all tasks of the phase. After the barrier, remote read requests that no local
    /// writer matched are released unconditionally, and the unit advances to the next phase.
    pub fn end_phase(&self, phase: Phase) -> Result<(), Fail> {
        let current: Phase = self.current_phase();
        if phase != current {
            let cause: String = format!("cannot end phase {} while in phase {}", phase, current);
            error!("end_phase(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }
        self.transport.barrier()?;
        self.progress()?;
        self.datadeps.release_unhandled_remote()?;
        self.phase.store(phase + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Releases all parked remote read requests without ending the phase.
    pub fn release_unhandled_remote(&self) -> Result<(), Fail> {
        self.datadeps.release_unhandled_remote()
    }

    /// Runs one ready task inline on the calling thread, after polling the transport. Returns
    /// whether a task ran. This drives a unit configured without worker threads.
    pub fn step(&self) -> Result<bool, Fail> {
        self.progress()?;
        for index in 0..self.scheduler.num_queues() {
            if let Some(task) = self.scheduler.queue(index).pop() {
                self.execute_task(index, task)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Blocks until every task spawned on this unit has finished and run its release. With no
    /// worker threads, tasks are executed inline while waiting.
    pub fn wait_quiescent(&self) -> Result<(), Fail> {
        loop {
            self.progress()?;
            if self.num_workers == 0 {
                while self.step()? {}
            }
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            if self.num_workers > 0 {
                ::std::thread::yield_now();
            }
        }
    }

    /// Builds the locality information of the team: probes the local hardware, exchanges the
    /// per-unit records, and constructs the locality tree. Idempotent; a second call rebuilds.
    pub fn locality_init(&self) -> Result<(), Fail> {
        let host: String = match self.config.hostname()? {
            Some(host) => host,
            None => hosts::local_hostname()?,
        };
        let local: UnitInfo = UnitInfo {
            host,
            hwinfo: hwinfo::probe(),
        };
        let infos: Vec<UnitInfo> = self.transport.exchange_unit_info(&local)?;
        if infos.len() != self.num_units() {
            let cause: String = format!(
                "unit info exchange covered {} of {} units",
                infos.len(),
                self.num_units()
            );
            error!("locality_init(): {}", cause);
            return Err(Fail::transport_failure(&cause));
        }
        let hostnames: Vec<String> = infos.iter().map(|info| info.host.clone()).collect();
        let probes: Vec<hwinfo::HwInfo> = infos.iter().map(|info| info.hwinfo).collect();
        let locality: Locality = Locality::build(self.my_unit(), &hostnames, &probes)?;
        *self.write_locality() = Some(Arc::new(locality));
        Ok(())
    }

    /// Tears down the locality information.
    pub fn locality_finalize(&self) -> Result<(), Fail> {
        *self.write_locality() = None;
        Ok(())
    }

    /// Returns the locality information of the team.
    pub fn locality(&self) -> Result<Arc<Locality>, Fail> {
        match self.read_locality().as_ref() {
            Some(locality) => Ok(locality.clone()),
            None => {
                let cause: String = format!("locality is not initialized");
                error!("locality(): {}", cause);
                Err(Fail::not_initialized(&cause))
            },
        }
    }

    /// Looks up a locality domain by its tag.
    pub fn domain(&self, tag: &str) -> Result<Arc<Domain>, Fail> {
        self.locality()?.domain(tag)
    }

    /// Returns the leaf assignment of a unit in the locality tree.
    pub fn unit_locality(&self, unit: UnitId) -> Result<UnitLocality, Fail> {
        Ok(self.locality()?.unit_locality(unit)?.clone())
    }

    /// Shuts the runtime down: stops the workers, finalizes dependency tracking, drops the
    /// locality information, and finalizes the transport.
    pub fn shutdown(&self) -> Result<(), Fail> {
        self.scheduler.shutdown_and_join();
        self.datadeps.fini()?;
        self.locality_finalize()?;
        self.transport.fini()?;
        Ok(())
    }

    /// Runs one task to completion on the calling thread and releases its successors onto the
    /// queue with the given index.
    pub(crate) fn execute_task(&self, queue_index: usize, task: Arc<Task>) -> Result<(), Fail> {
        if let Some(work) = task.begin_execution() {
            trace!("execute_task(): running task {:?}", task.id());
            work();
        } else {
            trace!("execute_task(): skipping cancelled task {:?}", task.id());
        }
        task.finish();

        let queue: &Arc<TaskQueue> = self.scheduler.queue(queue_index);
        let result: Result<(), Fail> = self.datadeps.release_local_task(queue, &task);
        if let Err(ref e) = result {
            error!("execute_task(): failed to release task {:?}: {:?}", task.id(), e);
        }
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.scheduler.notify();
        result
    }

    fn read_segments(&self) -> RwLockReadGuard<'_, SegmentTable> {
        self.segments.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_segments(&self) -> RwLockWriteGuard<'_, SegmentTable> {
        self.segments.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_locality(&self) -> RwLockReadGuard<'_, Option<Arc<Locality>>> {
        self.locality.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_locality(&self) -> RwLockWriteGuard<'_, Option<Arc<Locality>>> {
        self.locality.write().unwrap_or_else(|e| e.into_inner())
    }
}
