use std::path::PathBuf;

use clap::Parser;

pub const NAME: &str = "warden";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Enforce per-container security policy with eBPF")]
pub struct WardenOpts {
    /// Full container id, as printed by `docker ps --no-trunc`
    #[clap(short = 'c', long)]
    pub container_id: Option<String>,
    /// System calls to kill on sight inside the container
    #[clap(short = 's', long = "block-syscalls", value_delimiter = ',')]
    pub block_syscalls: Vec<String>,
    /// Kill privilege escalation attempts inside the container
    #[clap(short = 'p', long)]
    pub block_privilege_escalation: bool,
    /// Paths the container must not open. Repeat for multiple paths
    #[clap(short = 'f', long = "file-path")]
    pub file_paths: Vec<PathBuf>,
    /// YAML policy file. Values set there override the flags
    #[clap(short = 'y', long)]
    pub config_file: Option<PathBuf>,
    /// Print the resolved policy and exit without touching the kernel
    #[clap(long)]
    pub dry_run: bool,
    /// Pass many times for a more verbose output. Passing `-v` adds debug
    /// logs, `-vv` enables trace logging
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub fn log_level_from_verbosity_flag_count(num: u8) -> Option<log::LevelFilter> {
    match num {
        0 => None,
        1 => Some(log::LevelFilter::Debug),
        2..=u8::MAX => Some(log::LevelFilter::Trace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_list_is_comma_separated() {
        let opts =
            WardenOpts::try_parse_from(["warden", "-c", "abc", "-s", "openat,ptrace"]).unwrap();
        assert_eq!(opts.block_syscalls, vec!["openat", "ptrace"]);
        assert_eq!(opts.container_id.as_deref(), Some("abc"));
        assert!(!opts.block_privilege_escalation);
        assert!(!opts.dry_run);
    }

    #[test]
    fn file_paths_repeat() {
        let opts = WardenOpts::try_parse_from([
            "warden", "-c", "abc", "-f", "/etc/shadow", "-f", "/etc/passwd",
        ])
        .unwrap();
        assert_eq!(
            opts.file_paths,
            vec![PathBuf::from("/etc/shadow"), PathBuf::from("/etc/passwd")]
        );
    }
}
