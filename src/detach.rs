use crate::prelude::*;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, fork, setsid};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::IntoRawFd;

/// Separates the monitor from the process tree that invoked it
pub trait Detacher {
    /// Returns `true` in the instance that should carry on with the monitoring, `false` in the
    /// invoking one, which is expected to exit right away.
    fn detach(&self) -> Result<bool>;
}

/// Classic double fork: the surviving grandchild leads a new session, has no controlling
/// terminal, and is reparented away from the invoker.
pub struct ForkDetacher;

impl Detacher for ForkDetacher {
    fn detach(&self) -> Result<bool> {
        // SAFETY: the binary is single-threaded when it detaches
        match unsafe { fork() }.context("Failed to fork the monitor")? {
            ForkResult::Parent { child } => {
                // The intermediate exits as soon as it has forked again, don't leave a zombie
                let _ = waitpid(child, None);
                return Ok(false);
            }
            ForkResult::Child => {}
        }

        if setsid().is_err() {
            // SAFETY: _exit is async-signal-safe and skips the invoker's atexit handlers
            unsafe { libc::_exit(1) };
        }

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {}
            Ok(ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
            Err(_) => unsafe { libc::_exit(1) },
        }

        redirect_std_streams()?;
        Ok(true)
    }
}

/// Does not detach at all: the caller itself carries on
pub struct InlineDetacher;

impl Detacher for InlineDetacher {
    fn detach(&self) -> Result<bool> {
        Ok(true)
    }
}

fn redirect_std_streams() -> Result<()> {
    let dev_null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("Failed to open /dev/null")?
        .into_raw_fd();

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(dev_null, fd) } < 0 {
            bail!("Failed to redirect fd {fd}: {}", io::Error::last_os_error());
        }
    }

    if dev_null > libc::STDERR_FILENO {
        unsafe { libc::close(dev_null) };
    }

    Ok(())
}
