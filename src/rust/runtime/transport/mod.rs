// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    locality::hwinfo::HwInfo,
    runtime::{
        fail::Fail,
        scheduler::task::RemoteTaskHandle,
        types::{
            Dependency,
            Phase,
            UnitId,
        },
    },
};
use ::std::{
    collections::VecDeque,
    sync::{
        Mutex,
        MutexGuard,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Messages of the cross-unit dependency protocol. Delivery is best-effort-reliable and in order
/// per origin/destination pair.
#[derive(Clone, Debug)]
pub enum DepMessage {
    /// A task on `origin` declared a dependency on memory owned by the receiving unit.
    DataDep {
        dep: Dependency,
        phase: Phase,
        task: RemoteTaskHandle,
        origin: UnitId,
    },
    /// A task on `origin` (named by `waiter`) must not run before the receiver's task
    /// (named by `target`) has finished.
    DirectTaskDep {
        waiter: RemoteTaskHandle,
        target: RemoteTaskHandle,
        origin: UnitId,
    },
    /// A dependency of the receiver's task (named by `task`) has resolved on `origin`.
    Release {
        task: RemoteTaskHandle,
        dep: Dependency,
        origin: UnitId,
    },
}

/// Per-unit hardware and hostname record exchanged between all units during locality discovery.
#[derive(Clone, Debug)]
pub struct UnitInfo {
    /// Hostname reported by the unit.
    pub host: String,
    /// Hardware probe of the unit.
    pub hwinfo: HwInfo,
}

/// Loopback transport for a team of one unit. Messages to the local unit are queued in process
/// and drained by [RemoteTransport::poll]; collectives are trivial.
pub struct LoopbackTransport {
    inbox: Mutex<VecDeque<DepMessage>>,
}

//======================================================================================================================
// Trait Definitions
//======================================================================================================================

/// The lower-level one-sided communication layer consumed by the runtime. Implementations must
/// deliver messages reliably and in order per origin/destination pair.
pub trait RemoteTransport: Send + Sync {
    /// Initializes the transport.
    fn init(&self) -> Result<(), Fail>;

    /// Finalizes the transport.
    fn fini(&self) -> Result<(), Fail>;

    /// Returns the identifier of the calling unit.
    fn my_unit(&self) -> UnitId;

    /// Returns the number of units in the team.
    fn num_units(&self) -> usize;

    /// Sends a dependency request for memory owned by `dest`.
    fn send_datadep(&self, dest: UnitId, dep: &Dependency, phase: Phase, task: RemoteTaskHandle)
        -> Result<(), Fail>;

    /// Tells `dest` that the calling unit's task `waiter` must wait for `dest`'s task `target`.
    fn send_direct_taskdep(&self, dest: UnitId, waiter: RemoteTaskHandle, target: RemoteTaskHandle)
        -> Result<(), Fail>;

    /// Releases a dependency of `dest`'s task `task`.
    fn send_release(&self, dest: UnitId, task: RemoteTaskHandle, dep: &Dependency) -> Result<(), Fail>;

    /// Drains incoming messages.
    fn poll(&self) -> Result<Vec<DepMessage>, Fail>;

    /// Blocks until every unit in the team has entered the barrier.
    fn barrier(&self) -> Result<(), Fail>;

    /// Exchanges hostname and hardware information between all units. The result is indexed by
    /// unit identifier.
    fn exchange_unit_info(&self, local: &UnitInfo) -> Result<Vec<UnitInfo>, Fail>;
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Loopback Transports
impl LoopbackTransport {
    /// Creates a new loopback transport.
    pub fn new() -> Self {
        Self {
            inbox: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DepMessage>> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_dest(&self, dest: UnitId) -> Result<(), Fail> {
        if dest != self.my_unit() {
            let cause: String = format!("no such unit in a loopback team (dest={})", dest);
            error!("check_dest(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl RemoteTransport for LoopbackTransport {
    fn init(&self) -> Result<(), Fail> {
        Ok(())
    }

    fn fini(&self) -> Result<(), Fail> {
        self.lock().clear();
        Ok(())
    }

    fn my_unit(&self) -> UnitId {
        UnitId::from(0u32)
    }

    fn num_units(&self) -> usize {
        1
    }

    fn send_datadep(
        &self,
        dest: UnitId,
        dep: &Dependency,
        phase: Phase,
        task: RemoteTaskHandle,
    ) -> Result<(), Fail> {
        self.check_dest(dest)?;
        self.lock().push_back(DepMessage::DataDep {
            dep: *dep,
            phase,
            task,
            origin: self.my_unit(),
        });
        Ok(())
    }

    fn send_direct_taskdep(
        &self,
        dest: UnitId,
        waiter: RemoteTaskHandle,
        target: RemoteTaskHandle,
    ) -> Result<(), Fail> {
        self.check_dest(dest)?;
        self.lock().push_back(DepMessage::DirectTaskDep {
            waiter,
            target,
            origin: self.my_unit(),
        });
        Ok(())
    }

    fn send_release(&self, dest: UnitId, task: RemoteTaskHandle, dep: &Dependency) -> Result<(), Fail> {
        self.check_dest(dest)?;
        self.lock().push_back(DepMessage::Release {
            task,
            dep: *dep,
            origin: self.my_unit(),
        });
        Ok(())
    }

    fn poll(&self) -> Result<Vec<DepMessage>, Fail> {
        Ok(self.lock().drain(..).collect())
    }

    fn barrier(&self) -> Result<(), Fail> {
        Ok(())
    }

    fn exchange_unit_info(&self, local: &UnitInfo) -> Result<Vec<UnitInfo>, Fail> {
        Ok(vec![local.clone()])
    }
}
