use thiserror::Error;

#[derive(Error, Debug)]
#[error("raising memlock rlimit failed")]
pub struct MemlockError(#[source] std::io::Error);

/// Kernels older than 5.11 charge eBPF map memory against RLIMIT_MEMLOCK,
/// so we lift it before loading any program.
pub fn bump_memlock_rlimit() -> Result<(), MemlockError> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(MemlockError(std::io::Error::last_os_error()));
    }
    Ok(())
}
