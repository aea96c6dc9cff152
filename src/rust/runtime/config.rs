// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Runtime configuration, parsed from a YAML file. All keys live under the `pgasrt` section and
/// every key is optional; absent keys fall back to built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw YAML object.
    config_obj: Yaml,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Configurations
impl Config {
    /// Reads the configuration from a file.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_string(&config_s)
    }

    /// Parses the configuration from a string.
    pub fn from_string(config_s: &str) -> Result<Self, Fail> {
        let mut docs: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(docs) => docs,
            Err(e) => {
                let cause: String = format!("malformed configuration: {:?}", e);
                error!("from_string(): {}", cause);
                return Err(Fail::invalid_argument(&cause));
            },
        };
        let config_obj: Yaml = if docs.is_empty() { Yaml::Null } else { docs.remove(0) };
        Ok(Self { config_obj })
    }

    /// Number of worker threads, if configured. Zero selects inline execution.
    pub fn workers(&self) -> Result<Option<usize>, Fail> {
        match &self.config_obj["pgasrt"]["workers"] {
            Yaml::BadValue | Yaml::Null => Ok(None),
            Yaml::Integer(n) if *n >= 0 => Ok(Some(*n as usize)),
            _ => {
                let cause: String = format!("workers must be a non-negative integer");
                error!("workers(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }

    /// Hostname override for locality discovery, if configured.
    pub fn hostname(&self) -> Result<Option<String>, Fail> {
        match &self.config_obj["pgasrt"]["hostname"] {
            Yaml::BadValue | Yaml::Null => Ok(None),
            Yaml::String(name) => Ok(Some(name.clone())),
            _ => {
                let cause: String = format!("hostname must be a string");
                error!("hostname(): {}", cause);
                Err(Fail::invalid_argument(&cause))
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Config {
    /// A configuration with every key at its default.
    fn default() -> Self {
        Self { config_obj: Yaml::Null }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
