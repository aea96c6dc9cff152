// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    locality::hwinfo::HwInfo,
    runtime::{
        limits::{
            DOMAIN_TAG_MAX_SIZE,
            HOST_NAME_MAX_SIZE,
        },
        types::UnitId,
    },
};
use ::arrayvec::ArrayString;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Locality of one unit: the CORE leaf it was assigned to in the locality tree.
#[derive(Debug, Clone)]
pub struct UnitLocality {
    /// The unit.
    pub unit: UnitId,
    /// Tag of the unit's CORE leaf.
    pub domain_tag: ArrayString<DOMAIN_TAG_MAX_SIZE>,
    /// Hostname of the module the unit runs on.
    pub host: ArrayString<HOST_NAME_MAX_SIZE>,
    /// Hardware properties of the unit's leaf.
    pub hwinfo: HwInfo,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Unit Localities
impl UnitLocality {
    /// Creates an unassigned record for the given unit.
    pub fn new(unit: UnitId) -> Self {
        Self {
            unit,
            domain_tag: ArrayString::new(),
            host: ArrayString::new(),
            hwinfo: HwInfo::unknown(),
        }
    }

    /// Checks whether the unit has been assigned to a leaf.
    pub fn is_assigned(&self) -> bool {
        !self.domain_tag.is_empty()
    }
}
