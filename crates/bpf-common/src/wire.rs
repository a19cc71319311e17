//! Kernel ↔ userspace wire schema.
//!
//! These types cross the eBPF boundary as raw bytes: the rule-table keys are
//! written by userspace and looked up by the probes, the termination record
//! travels the other way on a perf event array. Every struct here must stay
//! byte-identical to its C counterpart in the probe sources, padding
//! included, which is why padding fields are explicit.

use std::fmt;

use aya::Pod;

/// Process names are truncated to this length by the kernel.
pub const TASK_COMM_LEN: usize = 16;

/// Maximum number of entries of every rule table. Must match MAX_RULES in
/// the probe sources.
pub const MAX_RULES: u32 = 1024;

/// Rule-table values are placeholders: key presence is the whole rule.
pub const RULE_MARKER: u8 = 0;

/// Key of the syscall filter rule table: one blocked syscall for one cgroup.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyscallRuleKey {
    pub syscall_nr: u32,
    _pad: u32,
    pub cgroup_id: u64,
}

unsafe impl Pod for SyscallRuleKey {}

impl SyscallRuleKey {
    pub fn new(syscall_nr: u32, cgroup_id: u64) -> Self {
        Self {
            syscall_nr,
            _pad: 0,
            cgroup_id,
        }
    }
}

/// Key of the file-access rule table. Path identity is the inode number of
/// the blocked path, resolved by userspace before the program is attached.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRuleKey {
    pub inode: u64,
    pub cgroup_id: u64,
}

unsafe impl Pod for FileRuleKey {}

impl FileRuleKey {
    pub fn new(inode: u64, cgroup_id: u64) -> Self {
        Self { inode, cgroup_id }
    }
}

/// Emitted by a probe once per matched-and-killed event, strictly after the
/// SIGKILL was accepted by the kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminationRecord {
    pub pid: u32,
    pub uid: u32,
    /// 0 for filter kinds with no meaningful event code.
    pub syscall_nr: u32,
    _pad: u32,
    pub cgroup_id: u64,
    pub comm: [u8; TASK_COMM_LEN],
}

unsafe impl Pod for TerminationRecord {}

impl TerminationRecord {
    /// Process name as a string, truncated at the first NUL.
    pub fn comm_str(&self) -> std::borrow::Cow<'_, str> {
        let len = self
            .comm
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(TASK_COMM_LEN);
        String::from_utf8_lossy(&self.comm[..len])
    }
}

impl fmt::Display for TerminationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid={} uid={} comm={} cgroup={}",
            self.pid,
            self.uid,
            self.comm_str(),
            self.cgroup_id
        )
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{align_of, offset_of, size_of};

    use super::*;

    #[test]
    fn syscall_rule_key_layout() {
        assert_eq!(size_of::<SyscallRuleKey>(), 16);
        assert_eq!(align_of::<SyscallRuleKey>(), 8);
        assert_eq!(offset_of!(SyscallRuleKey, syscall_nr), 0);
        assert_eq!(offset_of!(SyscallRuleKey, cgroup_id), 8);
    }

    #[test]
    fn file_rule_key_layout() {
        assert_eq!(size_of::<FileRuleKey>(), 16);
        assert_eq!(offset_of!(FileRuleKey, inode), 0);
        assert_eq!(offset_of!(FileRuleKey, cgroup_id), 8);
    }

    #[test]
    fn termination_record_layout() {
        assert_eq!(size_of::<TerminationRecord>(), 40);
        assert_eq!(offset_of!(TerminationRecord, pid), 0);
        assert_eq!(offset_of!(TerminationRecord, uid), 4);
        assert_eq!(offset_of!(TerminationRecord, syscall_nr), 8);
        assert_eq!(offset_of!(TerminationRecord, cgroup_id), 16);
        assert_eq!(offset_of!(TerminationRecord, comm), 24);
    }

    #[test]
    fn comm_truncated_at_nul() {
        let mut record = TerminationRecord {
            pid: 1,
            uid: 0,
            syscall_nr: 0,
            _pad: 0,
            cgroup_id: 42,
            comm: [0; TASK_COMM_LEN],
        };
        record.comm[..4].copy_from_slice(b"bash");
        assert_eq!(record.comm_str(), "bash");

        // no NUL terminator: the whole buffer is the name
        let full = TerminationRecord {
            comm: [b'x'; TASK_COMM_LEN],
            ..record
        };
        assert_eq!(full.comm_str().len(), TASK_COMM_LEN);
    }
}
