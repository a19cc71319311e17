//! Optional YAML policy file and its merge with the command line.
//!
//! Every field of the file is optional. A field that is present overrides
//! the corresponding flag, including an explicit `false`; a field that is
//! absent leaves the flag alone. This is why booleans are `Option<bool>`
//! and not `bool` with a default.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::cli::WardenOpts;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config file {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("parsing config file {path:?}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub container_id: Option<String>,
    pub block_syscalls: Option<Vec<String>>,
    pub block_privilege_escalation: Option<bool>,
    pub file_paths: Option<Vec<PathBuf>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let buf = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            source,
            path: path.to_path_buf(),
        })?;
        serde_yaml::from_str(&buf).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }
}

/// What the operator asked for, before any name is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub container_id: Option<String>,
    pub syscalls: Vec<String>,
    pub block_privilege_escalation: bool,
    pub file_paths: Vec<PathBuf>,
}

impl PolicyRequest {
    pub fn merge(opts: &WardenOpts, file: Option<ConfigFile>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            container_id: file.container_id.or_else(|| opts.container_id.clone()),
            syscalls: file
                .block_syscalls
                .unwrap_or_else(|| opts.block_syscalls.clone()),
            block_privilege_escalation: file
                .block_privilege_escalation
                .unwrap_or(opts.block_privilege_escalation),
            file_paths: file.file_paths.unwrap_or_else(|| opts.file_paths.clone()),
        }
    }

    /// True when no filter would be started.
    pub fn is_empty(&self) -> bool {
        self.syscalls.is_empty() && !self.block_privilege_escalation && self.file_paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn opts(args: &[&str]) -> WardenOpts {
        WardenOpts::try_parse_from(std::iter::once("warden").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parse_full_file() {
        let parsed: ConfigFile = serde_yaml::from_str(
            r#"
            container_id: "deadbeef"
            block_syscalls: [ptrace, openat]
            block_privilege_escalation: true
            file_paths: [/etc/shadow]
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            ConfigFile {
                container_id: Some("deadbeef".to_string()),
                block_syscalls: Some(vec!["ptrace".to_string(), "openat".to_string()]),
                block_privilege_escalation: Some(true),
                file_paths: Some(vec![PathBuf::from("/etc/shadow")]),
            }
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        let r: Result<ConfigFile, _> = serde_yaml::from_str("block_sycalls: [ptrace]");
        assert!(r.is_err());
    }

    #[test]
    fn no_file_keeps_the_flags() {
        let request = PolicyRequest::merge(&opts(&["-c", "abc", "-s", "ptrace", "-p"]), None);
        assert_eq!(request.container_id.as_deref(), Some("abc"));
        assert_eq!(request.syscalls, vec!["ptrace"]);
        assert!(request.block_privilege_escalation);
        assert!(request.file_paths.is_empty());
    }

    #[test]
    fn present_fields_win_over_flags() {
        let file = ConfigFile {
            container_id: Some("from-file".to_string()),
            block_syscalls: Some(vec!["openat".to_string()]),
            ..Default::default()
        };
        let request = PolicyRequest::merge(&opts(&["-c", "from-cli", "-s", "ptrace"]), Some(file));
        assert_eq!(request.container_id.as_deref(), Some("from-file"));
        assert_eq!(request.syscalls, vec!["openat"]);
    }

    #[test]
    fn explicit_false_overrides_the_flag() {
        let file = ConfigFile {
            block_privilege_escalation: Some(false),
            ..Default::default()
        };
        let request = PolicyRequest::merge(&opts(&["-c", "abc", "-p"]), Some(file));
        assert!(!request.block_privilege_escalation);
    }

    #[test]
    fn absent_boolean_keeps_the_flag() {
        let request = PolicyRequest::merge(&opts(&["-c", "abc", "-p"]), Some(ConfigFile::default()));
        assert!(request.block_privilege_escalation);
    }

    #[test]
    fn emptiness_ignores_the_container_id() {
        let request = PolicyRequest::merge(&opts(&["-c", "abc"]), None);
        assert!(request.is_empty());
        let request = PolicyRequest::merge(&opts(&["-c", "abc", "-f", "/etc/shadow"]), None);
        assert!(!request.is_empty());
    }
}
