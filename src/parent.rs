// Arming the parent death signal races with the parent exiting: if the
// parent is already gone when the signal is set, the kernel will never
// deliver it. The only way to notice is to look at the parent process id
// after arming, which changes to the reaper (init, or the closest child
// subreaper) once the original parent has exited.
//
// Everything here is async-signal-safe, so it can run between fork and exec.

use libc::c_int;
use nix::sys::signal::{self, Signal};
use nix::unistd::{getppid, Pid};

use crate::death_signal::{set_death_signal, DeathSignalError, DISABLED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    /// The signal is set and the expected parent was still alive afterwards.
    Watching { parent: Pid },

    /// The signal is set, but the expected parent had already exited, so it
    /// will not be delivered for that exit.
    ParentGone { expected: Pid, current: Pid },
}

impl Armed {
    pub fn is_parent_gone(&self) -> bool {
        matches!(self, Self::ParentGone { .. })
    }
}

/// Sets the parent death signal of the calling thread, then checks that the
/// parent is still `expected_parent`.
pub fn arm(signal: c_int, expected_parent: Pid) -> Result<Armed, DeathSignalError> {
    set_death_signal(signal)?;

    let current = getppid();

    if current == expected_parent {
        Ok(Armed::Watching { parent: current })
    } else {
        Ok(Armed::ParentGone {
            expected: expected_parent,
            current,
        })
    }
}

/// Like [`arm`], but when the parent is already gone, delivers the signal to
/// the calling thread immediately, as the kernel would have done had it been
/// armed in time.
pub fn arm_or_raise(signal: c_int, expected_parent: Pid) -> Result<Armed, DeathSignalError> {
    let armed = arm(signal, expected_parent)?;

    if armed.is_parent_gone() && signal != DISABLED {
        raise(signal)?;
    }

    Ok(armed)
}

// `nix::sys::signal::raise` only takes the standard signals, and real-time
// death signals are valid too.
fn raise(signal: c_int) -> Result<(), DeathSignalError> {
    match Signal::try_from(signal) {
        Ok(signal) => signal::raise(signal).map_err(DeathSignalError::System),
        Err(_) => {
            let outcome = unsafe { libc::raise(signal) };
            match outcome {
                0 => Ok(()),
                _ => Err(DeathSignalError::System(nix::errno::Errno::last())),
            }
        }
    }
}
