//! Filter lifecycle coordinator.
//!
//! Starts one enforcement program per policy section, runs their event
//! consumers until a termination signal arrives, then tears everything
//! down. Startup is fail-fast: if any filter fails to come up, the ones
//! already running are torn down before the error is returned, so a
//! partial policy is never left enforcing. Teardown always waits for every
//! started filter to confirm exit before the process ends, because each
//! filter task owns the kernel resources of its program.

use std::fmt;

use bpf_common::{
    log_error,
    platform,
    program::{BpfContext, ProgramError},
    wire::TerminationRecord,
    Program,
};
use tokio::{
    signal::unix::{signal, Signal, SignalKind},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    policy::Policy,
    shutdown::{CleanExit, FilterError, ShutdownSender, ShutdownSignal},
};

const EVENT_CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Syscall,
    Privilege,
    FileAccess,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterKind::Syscall => write!(f, "syscall-filter"),
            FilterKind::Privilege => write!(f, "privilege-filter"),
            FilterKind::FileAccess => write!(f, "file-access-filter"),
        }
    }
}

struct FilterInstance {
    kind: FilterKind,
    task: JoinHandle<Result<CleanExit, FilterError>>,
}

/// Enforce the policy until SIGINT, SIGTERM or SIGHUP.
pub async fn run(policy: Policy, ctx: BpfContext) -> anyhow::Result<()> {
    // Handlers are registered before the first filter starts: once any
    // kernel resource exists, nothing on this path may fail without going
    // through shutdown_all.
    let mut termination = TerminationSignals::register()?;

    let (tx_shutdown, rx_shutdown) = ShutdownSignal::new();
    let mut instances = Vec::new();

    if let Err(err) = start_filters(&policy, ctx, &rx_shutdown, &mut instances).await {
        log::error!(
            "startup failed, tearing down {} already running filter(s)",
            instances.len()
        );
        shutdown_all(&tx_shutdown, instances).await;
        return Err(err.into());
    }

    log::info!(
        "{} filter(s) enforcing on container {} (cgroup id {})",
        instances.len(),
        policy.container_id,
        policy.cgroup_id
    );

    termination.wait().await;
    shutdown_all(&tx_shutdown, instances).await;
    Ok(())
}

/// Start every filter the policy asks for, appending each one to
/// `instances` as soon as it is running so the caller can tear down
/// whatever came up before a later failure.
async fn start_filters(
    policy: &Policy,
    ctx: BpfContext,
    shutdown: &ShutdownSignal,
    instances: &mut Vec<FilterInstance>,
) -> Result<(), ProgramError> {
    if !policy.syscalls.is_empty() {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let program =
            syscall_filter::program(ctx.clone(), policy.cgroup_id, policy.syscall_codes(), tx)
                .await?;
        instances.push(spawn_filter(
            FilterKind::Syscall,
            program,
            rx,
            shutdown.clone(),
        ));
    }
    if policy.block_privilege_escalation {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let program = privilege_filter::program(ctx.clone(), policy.cgroup_id, tx).await?;
        instances.push(spawn_filter(
            FilterKind::Privilege,
            program,
            rx,
            shutdown.clone(),
        ));
    }
    if !policy.file_paths.is_empty() {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let program =
            file_access_filter::program(ctx, policy.cgroup_id, policy.inodes(), tx).await?;
        instances.push(spawn_filter(
            FilterKind::FileAccess,
            program,
            rx,
            shutdown.clone(),
        ));
    }
    Ok(())
}

/// Spawn the consumer task of one filter. The task owns the [`Program`]:
/// when it exits, dropping the program detaches the kprobe and releases
/// the rule table and the event channel.
fn spawn_filter(
    kind: FilterKind,
    program: Program,
    mut events: mpsc::Receiver<Result<TerminationRecord, ProgramError>>,
    mut shutdown: ShutdownSignal,
) -> FilterInstance {
    let task = tokio::spawn(async move {
        let _program = program;
        loop {
            tokio::select! {
                r = shutdown.recv() => return r,
                event = events.recv() => match event {
                    Some(Ok(record)) => report(kind, &record),
                    // Losing a record never affects enforcement, the
                    // process was already killed in the kernel.
                    Some(Err(err)) => log_error(&format!("{kind}: event channel error"), err),
                    None => return shutdown.recv().await,
                }
            }
        }
    });
    FilterInstance { kind, task }
}

fn report(kind: FilterKind, record: &TerminationRecord) {
    match kind {
        FilterKind::Syscall => {
            let name = platform::code_to_name(record.syscall_nr).unwrap_or("unknown");
            log::warn!(
                "{kind}: killed {record} attempting syscall {name} ({})",
                record.syscall_nr
            );
        }
        FilterKind::Privilege => {
            log::warn!("{kind}: killed {record} attempting privilege escalation");
        }
        FilterKind::FileAccess => {
            log::warn!("{kind}: killed {record} opening a blocked file");
        }
    }
}

/// The process termination signals warden reacts to.
struct TerminationSignals {
    sig_int: Signal,
    sig_term: Signal,
    sig_hup: Signal,
}

impl TerminationSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            sig_int: signal(SignalKind::interrupt())?,
            sig_term: signal(SignalKind::terminate())?,
            sig_hup: signal(SignalKind::hangup())?,
        })
    }

    async fn wait(&mut self) {
        tokio::select! {
            _ = self.sig_int.recv() => log::trace!("SIGINT received"),
            _ = self.sig_term.recv() => log::trace!("SIGTERM received"),
            _ = self.sig_hup.recv() => log::trace!("SIGHUP received"),
        }
    }
}

/// Raise the shared cancellation once, then wait for every filter to
/// confirm teardown.
async fn shutdown_all(tx_shutdown: &ShutdownSender, instances: Vec<FilterInstance>) {
    tx_shutdown.send_signal();
    for instance in instances {
        match instance.task.await {
            Ok(Ok(_)) => log::info!("{} stopped", instance.kind),
            Ok(Err(err)) => log::warn!("{}: teardown error: {err:?}", instance.kind),
            Err(err) => log::warn!("{}: task panicked: {err:?}", instance.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    fn stub_instance(
        kind: FilterKind,
        shutdown: &ShutdownSignal,
        stopped: &Arc<AtomicUsize>,
    ) -> FilterInstance {
        let mut shutdown = shutdown.clone();
        let stopped = stopped.clone();
        FilterInstance {
            kind,
            task: tokio::spawn(async move {
                let exit = shutdown.recv().await;
                stopped.fetch_add(1, Ordering::SeqCst);
                exit
            }),
        }
    }

    #[tokio::test]
    async fn teardown_joins_every_started_instance() {
        let kinds = [
            FilterKind::Syscall,
            FilterKind::Privilege,
            FilterKind::FileAccess,
        ];
        for n in 0..=kinds.len() {
            let (tx, rx) = ShutdownSignal::new();
            let stopped = Arc::new(AtomicUsize::new(0));
            let instances = kinds[..n]
                .iter()
                .map(|kind| stub_instance(*kind, &rx, &stopped))
                .collect();
            tokio::time::timeout(Duration::from_secs(5), shutdown_all(&tx, instances))
                .await
                .expect("teardown must not hang");
            assert_eq!(stopped.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test]
    async fn signal_handlers_come_up_without_any_filter_running() {
        // Registration happens before the first filter starts, so a
        // registration error can never leave instances needing teardown.
        TerminationSignals::register().expect("signal registration");
    }

    #[tokio::test]
    async fn teardown_covers_instances_started_before_a_failure() {
        // Two filters came up, the third failed to start: teardown must
        // still reach both of the running ones.
        let (tx, rx) = ShutdownSignal::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let mut instances = Vec::new();
        instances.push(stub_instance(FilterKind::Syscall, &rx, &stopped));
        instances.push(stub_instance(FilterKind::Privilege, &rx, &stopped));
        let startup: Result<(), ProgramError> =
            Err(ProgramError::MapNotFound("file_rules".to_string()));
        assert!(startup.is_err());

        tokio::time::timeout(Duration::from_secs(5), shutdown_all(&tx, instances))
            .await
            .expect("teardown must not hang");
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
    }
}
