// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-config: loads the machine file and the process-group file into the
//! read-only `hale-core` model.
//!
//! Identifiers in the files are textual paths; everything is hashed and
//! resolved to indices here, once, so the daemons never see a string-keyed
//! lookup.

pub mod env;
pub mod groups;
pub mod machine;

pub use env::{config_dir, CONFIG_DIR_ENV};
pub use groups::{load_groups_str, GroupsError};
pub use machine::load_machine_str;

use std::path::Path;

use hale_core::ConfigSet;
use thiserror::Error;

/// File name of the machine-level settings.
pub const MACHINE_FILE: &str = "machine.toml";
/// File name of the process-group definitions.
pub const GROUPS_FILE: &str = "groups.toml";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("parsing {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("{context}: unknown {what} `{name}`")]
    UnknownReference { context: String, what: &'static str, name: String },

    #[error("{context}: {what}")]
    Invalid { context: String, what: String },

    #[error(transparent)]
    Model(#[from] hale_core::config::ConfigError),
}

/// Load and validate the complete configuration from a directory holding
/// [`MACHINE_FILE`] and [`GROUPS_FILE`].
pub fn load_dir(dir: &Path) -> Result<ConfigSet, LoadError> {
    let machine_path = dir.join(MACHINE_FILE);
    let machine_raw = std::fs::read_to_string(&machine_path)
        .map_err(|source| LoadError::Io { path: machine_path.display().to_string(), source })?;
    let machine = load_machine_str(&machine_raw)
        .map_err(|source| LoadError::Parse { path: machine_path.display().to_string(), source })?;

    let groups_path = dir.join(GROUPS_FILE);
    let groups_raw = std::fs::read_to_string(&groups_path)
        .map_err(|source| LoadError::Io { path: groups_path.display().to_string(), source })?;
    let (groups, hm) = load_groups_str(&groups_raw, &machine).map_err(|err| match err {
        groups::GroupsError::Parse(source) => {
            LoadError::Parse { path: groups_path.display().to_string(), source }
        }
        groups::GroupsError::Load(err) => *err,
    })?;

    let set = ConfigSet { machine, groups, hm };
    set.validate()?;
    Ok(set)
}

/// Load from the directory selected by the environment.
pub fn load() -> Result<ConfigSet, LoadError> {
    load_dir(&config_dir())
}
