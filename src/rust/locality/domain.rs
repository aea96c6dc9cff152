// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    locality::{
        hosts::HostTopology,
        hwinfo::HwInfo,
        unit::UnitLocality,
    },
    runtime::{
        fail::Fail,
        limits::{
            DOMAIN_TAG_MAX_SIZE,
            HOST_NAME_MAX_SIZE,
        },
        types::UnitId,
    },
};
use ::arrayvec::ArrayString;
use ::std::{
    fmt::Write,
    sync::{
        Arc,
        OnceLock,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scope of a locality domain, ordered from the widest to the narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DomainScope {
    Global,
    Node,
    Module,
    Numa,
    Core,
}

/// One node of the locality tree. Children are owned by their parent; the parent link is a weak
/// back-pointer for lookups only. Domains are immutable once the tree is built.
pub struct Domain {
    /// Dotted path from the root. The root carries `"."`, child `i` appends `".i"`.
    tag: ArrayString<DOMAIN_TAG_MAX_SIZE>,
    /// Scope of the domain.
    scope: DomainScope,
    /// Distance from the root.
    level: i32,
    /// Position among the siblings.
    relative_index: i32,
    /// Index of the node this domain belongs to, `-1` above node scope.
    node_id: i32,
    /// Hostname of the module the domain belongs to.
    host: ArrayString<HOST_NAME_MAX_SIZE>,
    /// Hardware properties, copied from the parent and refined per level.
    hwinfo: HwInfo,
    /// Units contained in this subtree.
    unit_ids: Vec<UnitId>,
    /// The containing domain.
    parent: Weak<Domain>,
    /// Owned child domains, populated exactly once during the build.
    children: OnceLock<Vec<Arc<Domain>>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Domain Scopes
impl DomainScope {
    /// Returns the scope one level below this one.
    pub fn sub_scope(self) -> Option<DomainScope> {
        match self {
            DomainScope::Global => Some(DomainScope::Node),
            DomainScope::Node => Some(DomainScope::Module),
            DomainScope::Module => Some(DomainScope::Numa),
            DomainScope::Numa => Some(DomainScope::Core),
            DomainScope::Core => None,
        }
    }
}

/// Associated Functions for Domains
impl Domain {
    /// Returns the domain tag.
    pub fn tag(&self) -> &str {
        self.tag.as_str()
    }

    /// Returns the scope.
    pub fn scope(&self) -> DomainScope {
        self.scope
    }

    /// Returns the distance from the root.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Returns the position among the siblings.
    pub fn relative_index(&self) -> i32 {
        self.relative_index
    }

    /// Returns the index of the node this domain belongs to, `-1` above node scope.
    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    /// Returns the hostname of the module the domain belongs to.
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// Returns the hardware properties of the domain.
    pub fn hwinfo(&self) -> &HwInfo {
        &self.hwinfo
    }

    /// Returns the units contained in this subtree.
    pub fn unit_ids(&self) -> &[UnitId] {
        &self.unit_ids
    }

    /// Returns the number of units contained in this subtree.
    pub fn num_units(&self) -> usize {
        self.unit_ids.len()
    }

    /// Returns the child domains.
    pub fn children(&self) -> &[Arc<Domain>] {
        self.children.get().map(|children| children.as_slice()).unwrap_or(&[])
    }

    /// Returns the containing domain.
    pub fn parent(&self) -> Option<Arc<Domain>> {
        self.parent.upgrade()
    }

    /// Looks up a domain by tag, descending from this domain. The tag is parsed left to right;
    /// every dot-separated integer selects a child by relative index.
    pub fn find(self: &Arc<Self>, tag: &str) -> Result<Arc<Domain>, Fail> {
        if tag.is_empty() || !tag.starts_with('.') {
            let cause: String = format!("malformed domain tag: {:?}", tag);
            error!("find(): {}", cause);
            return Err(Fail::invalid_argument(&cause));
        }
        if tag == "." {
            return Ok(self.clone());
        }
        let mut domain: Arc<Domain> = self.clone();
        for part in tag[1..].split('.') {
            let index: usize = match part.parse() {
                Ok(index) => index,
                Err(_) => {
                    let cause: String = format!("malformed domain tag part {:?} in {:?}", part, tag);
                    error!("find(): {}", cause);
                    return Err(Fail::invalid_argument(&cause));
                },
            };
            let child: Arc<Domain> = match domain.children().get(index) {
                Some(child) => child.clone(),
                None => {
                    let cause: String = format!(
                        "subdomain index {} at level {} is out of bounds (subdomains: {}, tag: {:?})",
                        index,
                        domain.level,
                        domain.children().len(),
                        tag
                    );
                    error!("find(): {}", cause);
                    return Err(Fail::invalid_argument(&cause));
                },
            };
            domain = child;
        }
        Ok(domain)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds the locality tree top-down from the host topology and the gathered per-unit hardware
/// probes, and assigns every unit to its CORE leaf in `unit_locs`.
pub(crate) fn build(
    topo: &HostTopology,
    hwinfo_by_unit: &[HwInfo],
    root_host: &str,
    root_hwinfo: HwInfo,
    unit_locs: &mut [UnitLocality],
) -> Result<Arc<Domain>, Fail> {
    let mut hwinfo: HwInfo = root_hwinfo;
    hwinfo.num_modules = topo.num_modules() as i32;

    let mut tag: ArrayString<DOMAIN_TAG_MAX_SIZE> = ArrayString::new();
    let _ = tag.try_push('.');
    let root: Arc<Domain> = Arc::new(Domain {
        tag,
        scope: DomainScope::Global,
        level: 0,
        relative_index: 0,
        node_id: -1,
        host: bounded_host(root_host)?,
        hwinfo,
        unit_ids: (0..hwinfo_by_unit.len()).map(UnitId::from).collect(),
        parent: Weak::new(),
        children: OnceLock::new(),
    });
    create_subdomains(&root, topo, hwinfo_by_unit, unit_locs)?;
    Ok(root)
}

/// Recursively creates the subdomains of a domain, dispatching on its scope.
fn create_subdomains(
    domain: &Arc<Domain>,
    topo: &HostTopology,
    hwinfo_by_unit: &[HwInfo],
    unit_locs: &mut [UnitLocality],
) -> Result<(), Fail> {
    trace!(
        "create_subdomains(): domain {:?} scope {:?} level {}",
        domain.tag(),
        domain.scope(),
        domain.level()
    );
    let children: Vec<Arc<Domain>> = match domain.scope {
        DomainScope::Global => split_global(domain, topo)?,
        DomainScope::Node => split_node(domain, topo, hwinfo_by_unit)?,
        DomainScope::Module => split_module(domain, hwinfo_by_unit)?,
        DomainScope::Numa => split_numa(domain)?,
        DomainScope::Core => Vec::new(),
    };
    for child in &children {
        if child.scope == DomainScope::Core {
            // A CORE leaf holds exactly one unit; record its placement.
            if let Some(&unit) = child.unit_ids.first() {
                let record: &mut UnitLocality = &mut unit_locs[usize::from(unit)];
                record.unit = unit;
                record.domain_tag = child.tag;
                record.host = child.host;
                record.hwinfo = child.hwinfo;
            }
        }
        create_subdomains(child, topo, hwinfo_by_unit, unit_locs)?;
    }
    if domain.children.set(children).is_err() {
        let cause: String = format!("domain {:?} already has subdomains", domain.tag());
        error!("create_subdomains(): {}", cause);
        return Err(Fail::invalid_argument(&cause));
    }
    Ok(())
}

/// Splits the global domain into one subdomain per node.
fn split_global(domain: &Arc<Domain>, topo: &HostTopology) -> Result<Vec<Arc<Domain>>, Fail> {
    let mut children: Vec<Arc<Domain>> = Vec::with_capacity(topo.num_nodes());
    for rel_idx in 0..topo.num_nodes() {
        let host: &str = topo.host_name(rel_idx)?;
        let unit_ids: Vec<UnitId> = topo.node_units(host)?.to_vec();
        let mut hwinfo: HwInfo = domain.hwinfo;
        hwinfo.num_modules = topo.node_modules(host)?.len() as i32;
        children.push(new_subdomain(
            domain,
            DomainScope::Node,
            rel_idx,
            host,
            hwinfo,
            rel_idx as i32,
            unit_ids,
        )?);
    }
    Ok(children)
}

/// Splits a node into its processing modules. Usually there is only one module (the host system)
/// and the split is a pass-through; coprocessor modules make it heterogenous.
fn split_node(
    domain: &Arc<Domain>,
    topo: &HostTopology,
    hwinfo_by_unit: &[HwInfo],
) -> Result<Vec<Arc<Domain>>, Fail> {
    let modules: Vec<&str> = topo.node_modules(domain.host())?;
    let mut children: Vec<Arc<Domain>> = Vec::with_capacity(modules.len());
    for (rel_idx, module_host) in modules.into_iter().enumerate() {
        let unit_ids: Vec<UnitId> = topo.module_units(module_host)?.to_vec();
        // The probe of a unit on the module knows its NUMA and core layout; the node's own
        // hardware record may describe a different module.
        let mut hwinfo: HwInfo = match unit_ids.first() {
            Some(&unit) => hwinfo_by_unit[usize::from(unit)],
            None => domain.hwinfo,
        };
        hwinfo.num_modules = 1;
        children.push(new_subdomain(
            domain,
            DomainScope::Module,
            rel_idx,
            module_host,
            hwinfo,
            domain.node_id,
            unit_ids,
        )?);
    }
    Ok(children)
}

/// Splits a module into its NUMA domains. Units are assigned by their probed NUMA id through an
/// explicit id-to-child map, so NUMA ids need not be dense.
fn split_module(domain: &Arc<Domain>, hwinfo_by_unit: &[HwInfo]) -> Result<Vec<Arc<Domain>>, Fail> {
    let mut numa_ids: Vec<i32> = domain
        .unit_ids
        .iter()
        .map(|&unit| hwinfo_by_unit[usize::from(unit)].numa_id)
        .collect();
    numa_ids.sort_unstable();
    numa_ids.dedup();

    let num_children: usize = numa_ids.len().max(domain.hwinfo.num_numa.max(0) as usize);
    let mut children: Vec<Arc<Domain>> = Vec::with_capacity(num_children);
    for rel_idx in 0..num_children {
        let unit_ids: Vec<UnitId> = match numa_ids.get(rel_idx) {
            Some(&numa_id) => domain
                .unit_ids
                .iter()
                .copied()
                .filter(|&unit| hwinfo_by_unit[usize::from(unit)].numa_id == numa_id)
                .collect(),
            None => Vec::new(),
        };
        let mut hwinfo: HwInfo = domain.hwinfo;
        hwinfo.num_modules = 1;
        hwinfo.num_numa = 1;
        hwinfo.num_cores = unit_ids.len() as i32;
        children.push(new_subdomain(
            domain,
            DomainScope::Numa,
            rel_idx,
            domain.host(),
            hwinfo,
            domain.node_id,
            unit_ids,
        )?);
    }
    Ok(children)
}

/// Splits a NUMA domain into balanced slices of consecutive units, one CORE leaf per unit.
/// Segments below NUMA scope are assumed to be homogenous.
fn split_numa(domain: &Arc<Domain>) -> Result<Vec<Arc<Domain>>, Fail> {
    let num_children: usize = domain.unit_ids.len();
    if num_children == 0 {
        return Ok(Vec::new());
    }
    let slice_len: usize = domain.unit_ids.len() / num_children;
    let mut children: Vec<Arc<Domain>> = Vec::with_capacity(num_children);
    for rel_idx in 0..num_children {
        let unit_ids: Vec<UnitId> = domain.unit_ids[rel_idx * slice_len..(rel_idx + 1) * slice_len].to_vec();
        let mut hwinfo: HwInfo = domain.hwinfo;
        hwinfo.num_modules = 1;
        hwinfo.num_numa = 1;
        hwinfo.num_cores = (domain.hwinfo.num_cores / num_children as i32).max(1);
        children.push(new_subdomain(
            domain,
            DomainScope::Core,
            rel_idx,
            domain.host(),
            hwinfo,
            domain.node_id,
            unit_ids,
        )?);
    }
    Ok(children)
}

/// Creates one subdomain with the tag of its parent extended by the relative index.
fn new_subdomain(
    parent: &Arc<Domain>,
    scope: DomainScope,
    rel_idx: usize,
    host: &str,
    hwinfo: HwInfo,
    node_id: i32,
    unit_ids: Vec<UnitId>,
) -> Result<Arc<Domain>, Fail> {
    let mut tag: ArrayString<DOMAIN_TAG_MAX_SIZE> = ArrayString::new();
    if parent.level > 0 {
        tag = parent.tag;
    }
    if write!(tag, ".{}", rel_idx).is_err() {
        let cause: String = format!("domain tag exceeds {} characters", DOMAIN_TAG_MAX_SIZE);
        error!("new_subdomain(): {}", cause);
        return Err(Fail::resource_exhausted(&cause));
    }
    Ok(Arc::new(Domain {
        tag,
        scope,
        level: parent.level + 1,
        relative_index: rel_idx as i32,
        node_id,
        host: bounded_host(host)?,
        hwinfo,
        unit_ids,
        parent: Arc::downgrade(parent),
        children: OnceLock::new(),
    }))
}

fn bounded_host(host: &str) -> Result<ArrayString<HOST_NAME_MAX_SIZE>, Fail> {
    match ArrayString::from(host) {
        Ok(host) => Ok(host),
        Err(_) => {
            let cause: String = format!("hostname exceeds {} characters: {}", HOST_NAME_MAX_SIZE, host);
            error!("bounded_host(): {}", cause);
            Err(Fail::invalid_argument(&cause))
        },
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
