// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Locality discovery. From the gathered hostnames and hardware probes of all units, a
//! hierarchical topology (global, node, module, NUMA, core) is built and every unit is mapped to
//! a CORE leaf of the tree. The tree is read-only once built.

pub mod domain;
pub mod hosts;
pub mod hwinfo;
pub mod unit;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    locality::{
        domain::Domain,
        hosts::HostTopology,
        hwinfo::{
            DefaultThreadPolicy,
            HwInfo,
        },
        unit::UnitLocality,
    },
    runtime::{
        fail::Fail,
        types::UnitId,
    },
};
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// The locality information of one unit's view of the team.
pub struct Locality {
    /// Topology of hostnames over all units.
    topology: HostTopology,
    /// Root of the locality tree.
    root: Arc<Domain>,
    /// Leaf assignment of every unit, indexed by unit id.
    units: Vec<UnitLocality>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Localities
impl Locality {
    /// Builds the locality information from the gathered hostnames and hardware probes, both
    /// indexed by unit id.
    pub fn build(my_unit: UnitId, hostnames: &[String], hwinfo_by_unit: &[HwInfo]) -> Result<Self, Fail> {
        if hostnames.is_empty() || hostnames.len() != hwinfo_by_unit.len() {
            let cause: String = format!(
                "hostnames and hardware probes must cover the team (hosts={}, probes={})",
                hostnames.len(),
                hwinfo_by_unit.len()
            );
            error!("build(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }
        if usize::from(my_unit) >= hostnames.len() {
            let cause: String = format!("unit {} is not in the team", my_unit);
            error!("build(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }

        let mut finalized: Vec<HwInfo> = hwinfo_by_unit.to_vec();
        for probe in &mut finalized {
            hwinfo::finalize(probe, &DefaultThreadPolicy);
        }

        let topology: HostTopology = HostTopology::new(hostnames)?;
        let mut units: Vec<UnitLocality> = (0..hostnames.len()).map(|u| UnitLocality::new(UnitId::from(u))).collect();
        let root: Arc<Domain> = domain::build(
            &topology,
            &finalized,
            &hostnames[usize::from(my_unit)],
            finalized[usize::from(my_unit)],
            &mut units,
        )?;

        // Every unit must have landed in exactly one CORE leaf.
        for record in &units {
            if !record.is_assigned() {
                let cause: String = format!("unit {} was not assigned to a leaf", record.unit);
                error!("build(): {}", cause);
                return Err(Fail::invalid_argument(&cause));
            }
        }

        debug!(
            "build(): topology has {} nodes, {} modules, {} units",
            topology.num_nodes(),
            topology.num_modules(),
            units.len()
        );
        Ok(Self {
            topology,
            root,
            units,
        })
    }

    /// Looks up a domain by its tag.
    pub fn domain(&self, tag: &str) -> Result<Arc<Domain>, Fail> {
        self.root.find(tag)
    }

    /// Returns the root of the locality tree.
    pub fn root(&self) -> &Arc<Domain> {
        &self.root
    }

    /// Returns the leaf assignment of a unit.
    pub fn unit_locality(&self, unit: UnitId) -> Result<&UnitLocality, Fail> {
        match self.units.get(usize::from(unit)) {
            Some(record) => Ok(record),
            None => {
                let cause: String = format!("unit {} is not in the team", unit);
                error!("unit_locality(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Returns the host topology.
    pub fn topology(&self) -> &HostTopology {
        &self.topology
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
