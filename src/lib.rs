pub mod cli;
pub mod config;
pub mod coordinator;
pub mod policy;
pub mod shutdown;

use anyhow::{ensure, Context};
use bpf_common::program::{BpfContext, PERF_PAGES_DEFAULT};
use nix::unistd::geteuid;

use crate::{
    cli::WardenOpts,
    config::{ConfigFile, PolicyRequest},
    policy::Policy,
};

/// Init logger. The RUST_LOG environment variable overrides the verbosity
/// chosen on the command line.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    let mut logger = env_logger::Builder::new();
    if std::env::var_os("RUST_LOG").is_some() {
        logger.parse_default_env();
    } else {
        logger.filter_level(override_log_level.unwrap_or(log::LevelFilter::Info));
    }
    logger.init();
}

pub async fn run(options: WardenOpts) -> anyhow::Result<()> {
    let file = options
        .config_file
        .as_deref()
        .map(ConfigFile::load)
        .transpose()?;
    let request = PolicyRequest::merge(&options, file);

    // An empty policy is a no-op, not an error. Checked before resolution
    // so a bare invocation does not require a container id.
    if request.is_empty() {
        log::info!("no filters requested, exiting");
        return Ok(());
    }

    let policy = Policy::resolve(&request)?;

    if options.dry_run {
        println!("{}", policy.render_plan());
        return Ok(());
    }

    ensure!(
        geteuid().is_root(),
        "loading eBPF programs requires root, re-run with sudo"
    );
    bpf_common::bump_memlock_rlimit().context("removing memlock limit")?;
    let ctx = BpfContext::new(PERF_PAGES_DEFAULT)?;

    coordinator::run(policy, ctx).await
}
