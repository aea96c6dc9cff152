// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(clippy::all))]

//! A PGAS (Partitioned Global Address Space) task runtime core: a distributed task scheduler with
//! data-flow dependency tracking over globally-addressed memory, and a locality discovery engine
//! mapping every unit of the team into a hierarchical hardware topology.

#[macro_use]
extern crate log;

/// Dependency hash and task graph: tracks which task last touched which global address and
/// derives the partial order among tasks, across units.
pub mod datadeps;

/// Locality discovery: host topology, hardware probes, and the locality tree.
pub mod locality;

/// Ambient runtime: errors, logging, configuration, the PGAS memory model, the transport
/// abstraction, and the worker-thread scheduler.
pub mod runtime;

pub use crate::{
    datadeps::DataDeps,
    locality::{
        domain::{
            Domain,
            DomainScope,
        },
        hosts::HostTopology,
        hwinfo::HwInfo,
        unit::UnitLocality,
        Locality,
    },
    runtime::{
        config::Config,
        fail::Fail,
        memory::GlobalAddress,
        scheduler::task::{
            RemoteTaskHandle,
            Task,
            TaskId,
            TaskState,
        },
        transport::{
            DepMessage,
            LoopbackTransport,
            RemoteTransport,
            UnitInfo,
        },
        types::{
            DepKind,
            Dependency,
            Phase,
            UnitId,
        },
        PgasRuntime,
    },
};

/// Ensures that two expressions are equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure_eq failed: `{} == {}`\nleft: `{:?}`\nright: `{:?}`",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure_neq failed: `{} != {}`\nleft: `{:?}`\nright: `{:?}`",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}
