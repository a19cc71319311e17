//! Syscall-blocking enforcement program.
//!
//! Intercepts the x86_64 syscall dispatch entry and kills any process inside
//! the target cgroup which attempts one of the blocked syscalls. Matching
//! happens entirely in kernel context, so a blocked call never completes.

use bpf_common::{
    BpfSender, Program, ProgramBuilder, ProgramError,
    aya::maps::HashMap,
    ebpf_program,
    program::BpfContext,
    wire::{RULE_MARKER, SyscallRuleKey, TerminationRecord},
};

const MODULE_NAME: &str = "syscall-filter";
const RULES_MAP: &str = "syscall_rules";
const EVENTS_MAP: &str = "termination_events";

/// Load and attach the syscall filter for one cgroup. The rule table is
/// fully populated before the kprobe is armed; it is never written again
/// for the lifetime of the returned [`Program`].
pub async fn program(
    ctx: BpfContext,
    cgroup_id: u64,
    syscalls: Vec<u32>,
    sender: impl BpfSender<TerminationRecord>,
) -> Result<Program, ProgramError> {
    let binary = ebpf_program!("syscall");
    let mut program = ProgramBuilder::new(ctx, MODULE_NAME, binary)
        .kprobe("x64_sys_call")
        .start(move |bpf| {
            let map = bpf
                .map_mut(RULES_MAP)
                .ok_or_else(|| ProgramError::MapNotFound(RULES_MAP.to_string()))?;
            let mut rules: HashMap<_, SyscallRuleKey, u8> = HashMap::try_from(map)?;
            for syscall_nr in syscalls {
                rules.insert(SyscallRuleKey::new(syscall_nr, cgroup_id), RULE_MARKER, 0)?;
            }
            Ok(())
        })
        .await?;
    program.read_events(EVENTS_MAP, sender).await?;
    Ok(program)
}
