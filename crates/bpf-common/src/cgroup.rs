//! Container id → cgroup id resolution.
//!
//! On cgroup v2 the cgroup id exposed to eBPF by `bpf_get_current_cgroup_id`
//! is the inode number of the cgroup directory, so resolving a container
//! comes down to finding its directory under `/sys/fs/cgroup` and reading
//! the inode. The well-known locations of the common container engines are
//! tried first; engines keep moving their layout around between versions,
//! so a recursive scan is the fallback.

use std::{
    fs, io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use thiserror::Error;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("container id must not be empty")]
    EmptyId,
    #[error("container `{id}` not found under {root:?}")]
    NotFound { id: String, root: PathBuf },
    #[error("reading cgroup filesystem at {path:?}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Resolve a container id to its cgroup id.
pub fn resolve(container_id: &str) -> Result<u64, ResolutionError> {
    resolve_in(Path::new(CGROUP_ROOT), container_id)
}

/// Same as [`resolve`], with the cgroup filesystem root as a parameter.
pub fn resolve_in(root: &Path, container_id: &str) -> Result<u64, ResolutionError> {
    if container_id.is_empty() {
        return Err(ResolutionError::EmptyId);
    }

    for candidate in candidate_paths(root, container_id) {
        if candidate.is_dir() {
            return cgroup_id_of(&candidate);
        }
    }

    if let Some(path) = scan(root, container_id) {
        return cgroup_id_of(&path);
    }

    Err(ResolutionError::NotFound {
        id: container_id.to_string(),
        root: root.to_path_buf(),
    })
}

/// Well-known per-engine cgroup locations, cheapest checks first.
fn candidate_paths(root: &Path, id: &str) -> Vec<PathBuf> {
    vec![
        // docker with the systemd cgroup driver
        root.join(format!("system.slice/docker-{id}.scope")),
        // docker with the cgroupfs driver
        root.join(format!("docker/{id}")),
        // podman
        root.join(format!("machine.slice/libpod-{id}.scope")),
        root.join(format!(
            "user.slice/user-0.slice/user@0.service/user.slice/libpod-{id}.scope"
        )),
    ]
}

/// Walk the cgroup tree looking for a directory whose name contains the
/// container id. Unreadable directories are skipped: a partial view is
/// still better than failing resolution outright.
fn scan(dir: &Path, id: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && name.contains(id)
        {
            return Some(path);
        }
        if let Some(found) = scan(&path, id) {
            return Some(found);
        }
    }
    None
}

fn cgroup_id_of(path: &Path) -> Result<u64, ResolutionError> {
    let metadata = fs::metadata(path).map_err(|source| ResolutionError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(metadata.ino())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tree(subdir: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "warden-cgroup-test-{}-{}",
            std::process::id(),
            subdir.replace('/', "-"),
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join(subdir)).unwrap();
        root
    }

    #[test]
    fn resolves_docker_systemd_scope() {
        let id = "0123456789abcdef";
        let root = make_tree(&format!("system.slice/docker-{id}.scope"));
        let expected = fs::metadata(root.join(format!("system.slice/docker-{id}.scope")))
            .unwrap()
            .ino();
        assert_eq!(resolve_in(&root, id).unwrap(), expected);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn falls_back_to_scanning() {
        let id = "fedcba9876543210";
        let root = make_tree(&format!("kubepods.slice/some-nesting/crio-{id}.scope"));
        let expected = fs::metadata(root.join(format!("kubepods.slice/some-nesting/crio-{id}.scope")))
            .unwrap()
            .ino();
        assert_eq!(resolve_in(&root, id).unwrap(), expected);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn unknown_container_names_the_id() {
        let root = make_tree("system.slice");
        let err = resolve_in(&root, "deadbeef").unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
        assert!(err.to_string().contains("deadbeef"));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn empty_id_is_rejected() {
        let root = make_tree("docker");
        assert!(matches!(
            resolve_in(&root, ""),
            Err(ResolutionError::EmptyId)
        ));
        fs::remove_dir_all(&root).unwrap();
    }
}
