//! Turning an operator request into a fully resolved policy.
//!
//! Resolution happens exactly once, before anything is loaded into the
//! kernel, and is fail-fast: one unknown syscall name or missing file makes
//! the whole run abort instead of silently enforcing a partial policy.

use std::{
    io,
    os::unix::fs::MetadataExt,
    path::PathBuf,
};

use bpf_common::{
    cgroup::{self, ResolutionError},
    platform,
};
use comfy_table::{ContentArrangement, Table};
use thiserror::Error;

use crate::config::PolicyRequest;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("a container id is required, pass -c or set container_id in the config file")]
    MissingContainerId,
    #[error("resolving container `{id}`")]
    Container {
        id: String,
        #[source]
        source: ResolutionError,
    },
    #[error(transparent)]
    Syscall(#[from] platform::UnknownSyscallError),
    #[error("resolving file path {path:?}")]
    FilePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The resolved policy of one run. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct Policy {
    pub container_id: String,
    pub cgroup_id: u64,
    /// Blocked syscalls as (name, number) pairs.
    pub syscalls: Vec<(String, u32)>,
    pub block_privilege_escalation: bool,
    /// Blocked files as (path, inode) pairs.
    pub file_paths: Vec<(PathBuf, u64)>,
}

impl Policy {
    pub fn resolve(request: &PolicyRequest) -> Result<Self, PolicyError> {
        let container_id = request
            .container_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(PolicyError::MissingContainerId)?;
        let cgroup_id = cgroup::resolve(&container_id).map_err(|source| PolicyError::Container {
            id: container_id.clone(),
            source,
        })?;
        Self::resolve_rules(request, container_id, cgroup_id)
    }

    fn resolve_rules(
        request: &PolicyRequest,
        container_id: String,
        cgroup_id: u64,
    ) -> Result<Self, PolicyError> {
        let syscalls = request
            .syscalls
            .iter()
            .map(|name| Ok((name.clone(), platform::name_to_code(name)?)))
            .collect::<Result<Vec<_>, PolicyError>>()?;
        let file_paths = request
            .file_paths
            .iter()
            .map(|path| {
                let metadata =
                    std::fs::metadata(path).map_err(|source| PolicyError::FilePath {
                        path: path.clone(),
                        source,
                    })?;
                Ok((path.clone(), metadata.ino()))
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Self {
            container_id,
            cgroup_id,
            syscalls,
            block_privilege_escalation: request.block_privilege_escalation,
            file_paths,
        })
    }

    pub fn syscall_codes(&self) -> Vec<u32> {
        self.syscalls.iter().map(|(_, code)| *code).collect()
    }

    pub fn inodes(&self) -> Vec<u64> {
        self.file_paths.iter().map(|(_, inode)| *inode).collect()
    }

    /// Human readable enforcement plan, printed in dry-run mode.
    pub fn render_plan(&self) -> String {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["filter", "rule"]);
        for (name, code) in &self.syscalls {
            table.add_row(vec![
                "syscall".to_string(),
                format!("kill on syscall {name} ({code})"),
            ]);
        }
        if self.block_privilege_escalation {
            table.add_row(vec![
                "privilege".to_string(),
                "kill on privilege escalation attempt".to_string(),
            ]);
        }
        for (path, inode) in &self.file_paths {
            table.add_row(vec![
                "file-access".to_string(),
                format!("kill on open of {} (inode {inode})", path.display()),
            ]);
        }
        format!(
            "Enforcement plan for container {} (cgroup id {}):\n{table}",
            self.container_id, self.cgroup_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(syscalls: &[&str], paths: &[&str]) -> PolicyRequest {
        PolicyRequest {
            container_id: Some("0123abcd".to_string()),
            syscalls: syscalls.iter().map(|s| s.to_string()).collect(),
            block_privilege_escalation: false,
            file_paths: paths.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn resolves_syscall_names_in_request_order() {
        let policy =
            Policy::resolve_rules(&request(&["ptrace", "openat"], &[]), "id".to_string(), 7)
                .unwrap();
        assert_eq!(
            policy.syscalls,
            vec![("ptrace".to_string(), 101), ("openat".to_string(), 257)]
        );
        assert_eq!(policy.syscall_codes(), vec![101, 257]);
    }

    #[test]
    fn unknown_syscall_aborts_resolution() {
        let err = Policy::resolve_rules(&request(&["ptrace", "not_a_syscall"], &[]), "id".to_string(), 7)
            .unwrap_err();
        assert!(err.to_string().contains("not_a_syscall"));
    }

    #[test]
    fn file_paths_resolve_to_inodes() {
        let dir = std::env::temp_dir().join(format!("warden-policy-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("secret");
        std::fs::write(&file, b"x").unwrap();
        let expected = std::fs::metadata(&file).unwrap().ino();

        let policy = Policy::resolve_rules(
            &request(&[], &[file.to_str().unwrap()]),
            "id".to_string(),
            7,
        )
        .unwrap();
        assert_eq!(policy.inodes(), vec![expected]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_aborts_resolution() {
        let err = Policy::resolve_rules(
            &request(&[], &["/definitely/not/there"]),
            "id".to_string(),
            7,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::FilePath { .. }));
    }

    #[test]
    fn missing_container_id_is_an_error() {
        let mut r = request(&["ptrace"], &[]);
        r.container_id = None;
        assert!(matches!(
            Policy::resolve(&r),
            Err(PolicyError::MissingContainerId)
        ));
        r.container_id = Some(String::new());
        assert!(matches!(
            Policy::resolve(&r),
            Err(PolicyError::MissingContainerId)
        ));
    }

    #[test]
    fn plan_names_every_rule() {
        let policy = Policy {
            container_id: "0123abcd".to_string(),
            cgroup_id: 42,
            syscalls: vec![("ptrace".to_string(), 101)],
            block_privilege_escalation: true,
            file_paths: vec![(PathBuf::from("/etc/shadow"), 99)],
        };
        let plan = policy.render_plan();
        assert!(plan.contains("0123abcd"));
        assert!(plan.contains("cgroup id 42"));
        assert!(plan.contains("ptrace (101)"));
        assert!(plan.contains("privilege escalation"));
        assert!(plan.contains("/etc/shadow"));
        assert!(plan.contains("inode 99"));
    }
}
