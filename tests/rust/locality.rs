// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    inline_config,
    probe_with_numa,
    Mesh,
};
use ::anyhow::Result;
use ::pgasrt::{
    Domain,
    DomainScope,
    PgasRuntime,
    UnitId,
};
use ::std::sync::Arc;

//======================================================================================================================
// Helper Functions
//======================================================================================================================

/// Brings up unit 0 of an eight-unit team spread over two hosts with two NUMA domains each;
/// unit `i` probes NUMA id `i % 2`.
fn eight_unit_team() -> Result<Arc<PgasRuntime>> {
    let hosts: Vec<String> = ["h1", "h1", "h1", "h1", "h2", "h2", "h2", "h2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let hwinfo = (0..8).map(|u| probe_with_numa((u % 2) as i32, 2)).collect();
    let mesh: Arc<Mesh> = Mesh::new(hosts, hwinfo);
    match PgasRuntime::new(inline_config(), mesh.endpoint(0)) {
        Ok(runtime) => Ok(runtime),
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    }
}

/// Checks that a tag is the root tag or a dotted integer path.
fn well_formed_tag(tag: &str) -> bool {
    if tag == "." {
        return true;
    }
    tag.starts_with('.') && tag[1..].split('.').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Collects the unit lists of all CORE leaves in pre-order.
fn leaf_units(domain: &Arc<Domain>, out: &mut Vec<UnitId>) {
    if domain.scope() == DomainScope::Core {
        out.extend(domain.unit_ids().iter().copied());
    }
    for child in domain.children() {
        leaf_units(child, out);
    }
}

//======================================================================================================================
// System Tests
//======================================================================================================================

/// Two nodes, one module each, two NUMA domains per module, two CORE leaves per NUMA domain.
#[test]
fn test_tree_shape() -> Result<()> {
    let runtime: Arc<PgasRuntime> = eight_unit_team()?;
    let root = runtime.domain(".")?;

    pgasrt::ensure_eq!(root.scope(), DomainScope::Global);
    pgasrt::ensure_eq!(root.children().len(), 2);
    pgasrt::ensure_eq!(runtime.locality()?.topology().num_nodes(), 2);

    for node in root.children() {
        pgasrt::ensure_eq!(node.scope(), DomainScope::Node);
        pgasrt::ensure_eq!(node.children().len(), 1);
        let module = &node.children()[0];
        pgasrt::ensure_eq!(module.scope(), DomainScope::Module);
        pgasrt::ensure_eq!(module.children().len(), 2);
        for numa in module.children() {
            pgasrt::ensure_eq!(numa.scope(), DomainScope::Numa);
            pgasrt::ensure_eq!(numa.num_units(), 2);
            pgasrt::ensure_eq!(numa.children().len(), 2);
        }
    }
    runtime.shutdown().ok();
    Ok(())
}

/// Every domain is found again under its own tag, and all tags are well formed.
#[test]
fn test_tags_round_trip() -> Result<()> {
    let runtime: Arc<PgasRuntime> = eight_unit_team()?;
    let mut stack: Vec<Arc<Domain>> = vec![runtime.domain(".")?];
    while let Some(domain) = stack.pop() {
        pgasrt::ensure_eq!(well_formed_tag(domain.tag()), true);
        let found = runtime.domain(domain.tag())?;
        pgasrt::ensure_eq!(Arc::ptr_eq(&found, &domain), true);
        stack.extend(domain.children().iter().cloned());
    }
    runtime.shutdown().ok();
    Ok(())
}

/// The pre-order concatenation of all CORE leaves equals the root's unit list, so every unit
/// appears in exactly one leaf.
#[test]
fn test_leaves_partition_the_team() -> Result<()> {
    let runtime: Arc<PgasRuntime> = eight_unit_team()?;
    let root = runtime.domain(".")?;

    let mut units: Vec<UnitId> = Vec::new();
    leaf_units(&root, &mut units);

    let mut sorted: Vec<UnitId> = units.clone();
    sorted.sort_unstable();
    sorted.dedup();
    pgasrt::ensure_eq!(units.len(), root.num_units());
    pgasrt::ensure_eq!(sorted.len(), root.num_units());
    runtime.shutdown().ok();
    Ok(())
}

/// Unit 5 probes NUMA id 1 on the second node and is the first unit of its NUMA group.
#[test]
fn test_unit_five_leaf() -> Result<()> {
    let runtime: Arc<PgasRuntime> = eight_unit_team()?;
    let record = runtime.unit_locality(UnitId::from(5u32))?;
    pgasrt::ensure_eq!(record.domain_tag.as_str(), ".1.0.1.0");
    pgasrt::ensure_eq!(record.host.as_str(), "h2");

    let leaf = runtime.domain(record.domain_tag.as_str())?;
    pgasrt::ensure_eq!(leaf.scope(), DomainScope::Core);
    pgasrt::ensure_eq!(leaf.unit_ids(), &[UnitId::from(5u32)]);
    pgasrt::ensure_eq!(leaf.hwinfo().num_cores, 1);
    pgasrt::ensure_eq!(leaf.hwinfo().num_numa, 1);

    // The parent chain walks back to the root.
    let numa = match leaf.parent() {
        Some(parent) => parent,
        None => anyhow::bail!("leaf has no parent"),
    };
    pgasrt::ensure_eq!(numa.scope(), DomainScope::Numa);
    pgasrt::ensure_eq!(numa.tag(), ".1.0.1");
    runtime.shutdown().ok();
    Ok(())
}

/// Lookup errors: out-of-range child indices and malformed tags are invalid.
#[test]
fn test_invalid_lookups() -> Result<()> {
    let runtime: Arc<PgasRuntime> = eight_unit_team()?;
    pgasrt::ensure_eq!(runtime.domain(".2").is_err(), true);
    pgasrt::ensure_eq!(runtime.domain(".0.0.5").is_err(), true);
    pgasrt::ensure_eq!(runtime.domain("").is_err(), true);
    pgasrt::ensure_eq!(runtime.domain("0").is_err(), true);
    pgasrt::ensure_eq!(runtime.domain(".a").is_err(), true);
    runtime.shutdown().ok();
    Ok(())
}

/// Locality can be torn down and rebuilt.
#[test]
fn test_finalize_and_reinit() -> Result<()> {
    let runtime: Arc<PgasRuntime> = eight_unit_team()?;
    runtime.locality_finalize()?;
    pgasrt::ensure_eq!(runtime.domain(".").is_err(), true);

    runtime.locality_init()?;
    pgasrt::ensure_eq!(runtime.domain(".")?.num_units(), 8);
    runtime.shutdown().ok();
    Ok(())
}
