//! Unix process limits applied in the child between fork and exec.

use std::io;

use tokio::process::Command;

/// Limits for one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildLimits {
    /// Soft `RLIMIT_NOFILE`.
    pub max_open_files: u64,
    /// Soft `RLIMIT_AS` in bytes, when enforced.
    pub max_address_space: Option<u64>,
}

/// Run the child in its own process group with lowered soft limits.
pub(crate) fn apply(cmd: &mut Command, limits: ChildLimits) {
    // SAFETY: the hook runs in the forked child before exec. It only calls
    // setpgid/getrlimit/setrlimit, which are async-signal-safe, and does not
    // allocate.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            lower_open_files(limits.max_open_files)?;
            if let Some(bytes) = limits.max_address_space {
                lower_address_space(bytes)?;
            }
            Ok(())
        });
    }
}

fn lower_open_files(max: u64) -> io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let limit = libc::rlimit {
        rlim_cur: clamp_soft(max as libc::rlim_t, current.rlim_max),
        rlim_max: current.rlim_max,
    };
    // SAFETY: `limit` is a valid rlimit with soft <= hard.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn lower_address_space(bytes: u64) -> io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let limit = libc::rlimit {
        rlim_cur: clamp_soft(bytes as libc::rlim_t, current.rlim_max),
        rlim_max: current.rlim_max,
    };
    // SAFETY: `limit` is a valid rlimit with soft <= hard.
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn clamp_soft(wanted: libc::rlim_t, hard: libc::rlim_t) -> libc::rlim_t {
    if hard == libc::RLIM_INFINITY {
        wanted
    } else {
        wanted.min(hard)
    }
}

/// SIGKILL every process in the group led by `pid`. Missing groups are fine.
pub(crate) fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain syscall; a stale pgid yields ESRCH, which is ignored.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_limit_never_exceeds_hard() {
        assert_eq!(clamp_soft(16, 1024), 16);
        assert_eq!(clamp_soft(4096, 1024), 1024);
        assert_eq!(clamp_soft(16, libc::RLIM_INFINITY), 16);
    }

    #[test]
    fn killing_a_missing_group_is_harmless() {
        kill_process_group(u32::MAX);
    }
}
