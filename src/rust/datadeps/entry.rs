// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::task::{
        RemoteTaskHandle,
        TaskRef,
    },
    types::{
        Dependency,
        Phase,
        UnitId,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One node of the dependency hash: a single declared dependency of a task. Entries hang off the
/// hash slots (newest first), off the unhandled-remote list, or off a task's remote-successor
/// list, and return to the free list when retired.
pub struct DepEntry {
    /// Task that declared the dependency.
    pub task: TaskRef,
    /// The declared dependency.
    pub dep: Dependency,
    /// Unit the dependency request originated from.
    pub origin: UnitId,
    /// Phase the dependency was declared in.
    pub phase: Phase,
}

/// Free list of dependency entries. Entries are allocated and retired on hot paths, one per
/// declared dependency, so retired boxes are kept for reuse instead of going back to the
/// allocator. Guarded by the global dependency-hash mutex.
pub struct DepPool {
    free: Vec<Box<DepEntry>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Dependency Entry Pools
impl DepPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Allocates an entry, reusing a retired one if possible.
    pub fn allocate(&mut self, task: TaskRef, dep: Dependency, origin: UnitId, phase: Phase) -> Box<DepEntry> {
        match self.free.pop() {
            Some(mut entry) => {
                entry.task = task;
                entry.dep = dep;
                entry.origin = origin;
                entry.phase = phase;
                entry
            },
            None => Box::new(DepEntry {
                task,
                dep,
                origin,
                phase,
            }),
        }
    }

    /// Retires an entry onto the free list. The task reference is dropped here so that a parked
    /// entry does not keep its task alive.
    pub fn recycle(&mut self, mut entry: Box<DepEntry>) {
        entry.task = TaskRef::Remote(RemoteTaskHandle::NULL);
        entry.dep = Dependency::direct();
        entry.origin = UnitId::NULL;
        entry.phase = 0;
        self.free.push(entry);
    }

    /// Returns the number of retired entries available for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Releases all retired entries back to the allocator.
    pub fn drain(&mut self) {
        self.free.clear();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
