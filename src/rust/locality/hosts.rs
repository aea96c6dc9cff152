// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::HOST_NAME_MAX_SIZE,
    types::UnitId,
};
use ::arrayvec::ArrayString;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Units running on one distinct hostname. Every distinct hostname names a *module*; a module
/// whose name designates a subordinate processing element (a coprocessor reporting its own
/// hostname) belongs to the *node* of its parent hostname, all others are their own node.
pub struct HostUnits {
    /// The hostname.
    host: ArrayString<HOST_NAME_MAX_SIZE>,
    /// Hostname of the node this module lives in, for subordinate modules.
    parent: Option<ArrayString<HOST_NAME_MAX_SIZE>>,
    /// Nesting level: 0 for nodes, 1 for subordinate modules.
    level: i32,
    /// Units reporting this hostname, in unit order.
    units: Vec<UnitId>,
}

/// Topology of hostnames over all units of the team. Hosts, nodes, and the modules of a node are
/// ordered by first appearance in the gathered hostname array; that order defines the relative
/// index used by the locality tree.
pub struct HostTopology {
    /// One record per distinct hostname, in first-appearance order.
    hosts: Vec<HostUnits>,
    /// Indices of node-level hosts, in first-appearance order.
    nodes: Vec<usize>,
    /// Per node: module host indices, the node's own module first.
    node_modules: Vec<Vec<usize>>,
    /// Per node: units of the node and all its modules, in module order.
    node_units: Vec<Vec<UnitId>>,
}

/// Policy resolving the parent hostname of a subordinate module.
pub type ModuleParentFn = fn(&str) -> Option<String>;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Default subordinate-module rule: a hostname of the form `<base>-mic<N>` names a coprocessor
/// living in node `<base>`.
pub fn default_module_parent(host: &str) -> Option<String> {
    let index: usize = host.rfind("-mic")?;
    let suffix: &str = &host[index + 4..];
    if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
        Some(host[..index].to_string())
    } else {
        None
    }
}

/// Returns the hostname of the calling process.
pub fn local_hostname() -> Result<String, Fail> {
    let mut buffer: [u8; HOST_NAME_MAX_SIZE] = [0; HOST_NAME_MAX_SIZE];
    let ret: i32 = unsafe { libc::gethostname(buffer.as_mut_ptr() as *mut libc::c_char, buffer.len()) };
    if ret != 0 {
        let cause: String = format!("failed to get hostname");
        error!("local_hostname(): {}", cause);
        return Err(Fail::new(libc::EIO, &cause));
    }
    let len: usize = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    match ::std::str::from_utf8(&buffer[..len]) {
        Ok(name) => Ok(name.to_string()),
        Err(_) => {
            let cause: String = format!("hostname is not valid utf-8");
            error!("local_hostname(): {}", cause);
            Err(Fail::invalid_argument(&cause))
        },
    }
}

fn bounded_name(name: &str) -> Result<ArrayString<HOST_NAME_MAX_SIZE>, Fail> {
    match ArrayString::from(name) {
        Ok(name) => Ok(name),
        Err(_) => {
            let cause: String = format!("hostname exceeds {} characters: {}", HOST_NAME_MAX_SIZE, name);
            error!("bounded_name(): {}", cause);
            Err(Fail::invalid_argument(&cause))
        },
    }
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Host Unit Records
impl HostUnits {
    /// Returns the hostname.
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// Returns the parent hostname of a subordinate module.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.as_str())
    }

    /// Returns the nesting level.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Returns the units reporting this hostname.
    pub fn units(&self) -> &[UnitId] {
        &self.units
    }
}

/// Associated Functions for Host Topologies
impl HostTopology {
    /// Builds the topology from the gathered hostname array, using the default subordinate-module
    /// rule. An empty input yields an empty topology.
    pub fn new(hostnames: &[String]) -> Result<Self, Fail> {
        Self::with_policy(hostnames, default_module_parent)
    }

    /// Builds the topology with a custom subordinate-module rule.
    pub fn with_policy(hostnames: &[String], parent_of: ModuleParentFn) -> Result<Self, Fail> {
        let mut hosts: Vec<HostUnits> = Vec::new();
        for (unit, name) in hostnames.iter().enumerate() {
            match hosts.iter_mut().find(|h| h.host.as_str() == name.as_str()) {
                Some(record) => record.units.push(UnitId::from(unit)),
                None => hosts.push(HostUnits {
                    host: bounded_name(name)?,
                    parent: None,
                    level: 0,
                    units: vec![UnitId::from(unit)],
                }),
            }
        }

        // Attach subordinate modules to their nodes. A module whose designated parent was not
        // observed in the team stays a node of its own.
        let parents: Vec<Option<String>> = hosts.iter().map(|h| parent_of(h.host.as_str())).collect();
        for (index, parent) in parents.into_iter().enumerate() {
            if let Some(parent) = parent {
                if hosts.iter().any(|h| h.host.as_str() == parent.as_str()) {
                    hosts[index].parent = Some(bounded_name(&parent)?);
                    hosts[index].level = 1;
                } else {
                    warn!(
                        "with_policy(): module {} names absent parent {}, treating it as a node",
                        hosts[index].host.as_str(),
                        parent
                    );
                }
            }
        }

        let nodes: Vec<usize> = hosts
            .iter()
            .enumerate()
            .filter(|(_, h)| h.level == 0)
            .map(|(index, _)| index)
            .collect();

        let node_modules: Vec<Vec<usize>> = nodes
            .iter()
            .map(|&node| {
                let mut modules: Vec<usize> = vec![node];
                for (index, host) in hosts.iter().enumerate() {
                    if host.parent.as_ref().map(|p| p.as_str()) == Some(hosts[node].host.as_str()) {
                        modules.push(index);
                    }
                }
                modules
            })
            .collect();

        let node_units: Vec<Vec<UnitId>> = node_modules
            .iter()
            .map(|modules| modules.iter().flat_map(|&m| hosts[m].units.iter().copied()).collect())
            .collect();

        Ok(Self {
            hosts,
            nodes,
            node_modules,
            node_units,
        })
    }

    /// Returns the number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of modules (distinct hostnames).
    pub fn num_modules(&self) -> usize {
        self.hosts.len()
    }

    /// Returns the hostname of the node at the given index.
    pub fn host_name(&self, node_index: usize) -> Result<&str, Fail> {
        match self.nodes.get(node_index) {
            Some(&host_index) => Ok(self.hosts[host_index].host()),
            None => {
                let cause: String = format!("node index out of range (index={})", node_index);
                error!("host_name(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Returns all units of the node with the given hostname, including units of its subordinate
    /// modules.
    pub fn node_units(&self, host: &str) -> Result<&[UnitId], Fail> {
        match self.node_index(host) {
            Some(index) => Ok(&self.node_units[index]),
            None => {
                let cause: String = format!("no such node: {}", host);
                error!("node_units(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Returns the units reporting exactly the given hostname.
    pub fn module_units(&self, host: &str) -> Result<&[UnitId], Fail> {
        match self.hosts.iter().find(|h| h.host.as_str() == host) {
            Some(record) => Ok(&record.units),
            None => {
                let cause: String = format!("no such module: {}", host);
                error!("module_units(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Returns the module hostnames of the node with the given hostname, the node's own module
    /// first.
    pub fn node_modules(&self, host: &str) -> Result<Vec<&str>, Fail> {
        match self.node_index(host) {
            Some(index) => Ok(self.node_modules[index].iter().map(|&m| self.hosts[m].host()).collect()),
            None => {
                let cause: String = format!("no such node: {}", host);
                error!("node_modules(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Returns the record of every distinct hostname, in first-appearance order.
    pub fn hosts(&self) -> &[HostUnits] {
        &self.hosts
    }

    fn node_index(&self, host: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|&h| self.hosts[h].host.as_str() == host)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
