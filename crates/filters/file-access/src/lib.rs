//! File-access enforcement program.
//!
//! Hooks `security_file_open`, which sees every open after path resolution.
//! Path identity is the inode number: userspace resolves the blocked paths
//! once and the probe matches on (inode, cgroup id), so renames and
//! symlinks inside the container cannot dodge the rule.

use bpf_common::{
    BpfSender, Program, ProgramBuilder, ProgramError,
    aya::maps::HashMap,
    ebpf_program,
    program::BpfContext,
    wire::{FileRuleKey, RULE_MARKER, TerminationRecord},
};

const MODULE_NAME: &str = "file-access-filter";
const RULES_MAP: &str = "file_rules";
const EVENTS_MAP: &str = "termination_events";

pub async fn program(
    ctx: BpfContext,
    cgroup_id: u64,
    inodes: Vec<u64>,
    sender: impl BpfSender<TerminationRecord>,
) -> Result<Program, ProgramError> {
    let binary = ebpf_program!("file_access");
    let mut program = ProgramBuilder::new(ctx, MODULE_NAME, binary)
        .kprobe("security_file_open")
        .start(move |bpf| {
            let map = bpf
                .map_mut(RULES_MAP)
                .ok_or_else(|| ProgramError::MapNotFound(RULES_MAP.to_string()))?;
            let mut rules: HashMap<_, FileRuleKey, u8> = HashMap::try_from(map)?;
            for inode in inodes {
                rules.insert(FileRuleKey::new(inode, cgroup_id), RULE_MARKER, 0)?;
            }
            Ok(())
        })
        .await?;
    program.read_events(EVENTS_MAP, sender).await?;
    Ok(program)
}
