// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    types::UnitId,
};
use ::std::collections::HashMap;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A global address names a byte location in the partitioned global address space as a
/// `(unit, segment, offset)` triple. Equality is by triple; [SegmentTable::resolve] converts a
/// global address to its absolute form (segment zero, segment-relative offset folded into the
/// absolute offset) before it is used as a hash key.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct GlobalAddress {
    /// Unit owning the addressed memory.
    pub unit: UnitId,
    /// Memory segment within the owning unit.
    pub segment: u16,
    /// Byte offset within the segment.
    pub offset: u64,
}

/// Per-unit table mapping segment identifiers to the absolute base offset of the segment.
/// Segment zero is the identity segment covering untranslated absolute offsets.
pub struct SegmentTable {
    /// Base offset of each registered segment.
    bases: HashMap<u16, u64>,
}

//======================================================================================================================
// Constants
//======================================================================================================================

/// The identity segment.
pub const SEGMENT_ABSOLUTE: u16 = 0;

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Global Addresses
impl GlobalAddress {
    /// Null address, used for dependencies that carry no address (direct task dependencies).
    pub const NULL: GlobalAddress = GlobalAddress {
        unit: UnitId::NULL,
        segment: SEGMENT_ABSOLUTE,
        offset: 0,
    };

    /// Creates a new global address.
    pub fn new(unit: UnitId, segment: u16, offset: u64) -> Self {
        Self { unit, segment, offset }
    }

    /// Checks whether this global address is in absolute form.
    pub fn is_absolute(&self) -> bool {
        self.segment == SEGMENT_ABSOLUTE
    }
}

/// Associated Functions for Segment Tables
impl SegmentTable {
    /// Creates a segment table holding only the identity segment.
    pub fn new() -> Self {
        let mut bases: HashMap<u16, u64> = HashMap::new();
        bases.insert(SEGMENT_ABSOLUTE, 0);
        Self { bases }
    }

    /// Registers a segment at the given absolute base offset.
    pub fn register(&mut self, segment: u16, base: u64) -> Result<(), Fail> {
        if self.bases.contains_key(&segment) {
            let cause: String = format!("segment is already registered (segment={})", segment);
            error!("register(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }
        self.bases.insert(segment, base);
        Ok(())
    }

    /// Removes a segment. The identity segment cannot be removed.
    pub fn unregister(&mut self, segment: u16) -> Result<(), Fail> {
        if segment == SEGMENT_ABSOLUTE {
            let cause: String = format!("cannot unregister the identity segment");
            error!("unregister(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }
        match self.bases.remove(&segment) {
            Some(_) => Ok(()),
            None => {
                let cause: String = format!("segment is not registered (segment={})", segment);
                error!("unregister(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Resolves a global address to its absolute form.
    pub fn resolve(&self, gaddr: GlobalAddress) -> Result<GlobalAddress, Fail> {
        match self.bases.get(&gaddr.segment) {
            Some(base) => Ok(GlobalAddress {
                unit: gaddr.unit,
                segment: SEGMENT_ABSOLUTE,
                offset: base + gaddr.offset,
            }),
            None => {
                let cause: String = format!("segment is not registered (segment={})", gaddr.segment);
                error!("resolve(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
