//! Privilege-escalation enforcement program.
//!
//! Hooks `commit_creds`, the choke point every credential change goes
//! through. The rule table is keyed by cgroup id alone: with the filter
//! enabled, any privilege transition inside the target container is killed.

use bpf_common::{
    BpfSender, Program, ProgramBuilder, ProgramError,
    aya::maps::HashMap,
    ebpf_program,
    program::BpfContext,
    wire::{RULE_MARKER, TerminationRecord},
};

const MODULE_NAME: &str = "privilege-filter";
const RULES_MAP: &str = "privilege_rules";
const EVENTS_MAP: &str = "termination_events";

pub async fn program(
    ctx: BpfContext,
    cgroup_id: u64,
    sender: impl BpfSender<TerminationRecord>,
) -> Result<Program, ProgramError> {
    let binary = ebpf_program!("privilege");
    let mut program = ProgramBuilder::new(ctx, MODULE_NAME, binary)
        .kprobe("commit_creds")
        .start(move |bpf| {
            let map = bpf
                .map_mut(RULES_MAP)
                .ok_or_else(|| ProgramError::MapNotFound(RULES_MAP.to_string()))?;
            let mut rules: HashMap<_, u64, u8> = HashMap::try_from(map)?;
            rules.insert(cgroup_id, RULE_MARKER, 0)?;
            Ok(())
        })
        .await?;
    program.read_events(EVENTS_MAP, sender).await?;
    Ok(program)
}
