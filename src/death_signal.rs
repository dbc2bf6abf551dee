// Reading and writing the parent death signal of the calling thread.
// See: https://man7.org/linux/man-pages/man2/PR_SET_PDEATHSIG.2const.html
//
// The attribute belongs to the calling *thread*. It is delivered when the
// thread that created this process exits, not when the parent process as a
// whole exits, and a newly spawned thread always starts with it disabled.

use std::io;

use libc::c_int;
use nix::errno::Errno;
use thiserror::Error;

/// The value of a disabled parent death signal.
pub const DISABLED: c_int = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeathSignalError {
    /// The kernel does not implement the parent death signal control call.
    #[error("the parent death signal is not supported on this platform")]
    OperationNotSupported,

    /// The kernel rejected the value as a signal number.
    #[error("invalid parent death signal: {0}")]
    InvalidSignal(c_int),

    /// Any other failure reported by the kernel.
    #[error("prctl failed: {0}")]
    System(Errno),
}

impl DeathSignalError {
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::OperationNotSupported => None,
            Self::InvalidSignal(_) => Some(Errno::EINVAL as i32),
            Self::System(errno) => Some(*errno as i32),
        }
    }
}

// Constructing an `io::Error` from a raw code does not allocate, which keeps
// this conversion usable from `pre_exec` hooks.
impl From<DeathSignalError> for io::Error {
    fn from(err: DeathSignalError) -> Self {
        match err {
            DeathSignalError::OperationNotSupported => {
                io::Error::from_raw_os_error(Errno::ENOSYS as i32)
            }
            DeathSignalError::InvalidSignal(_) => {
                io::Error::from_raw_os_error(Errno::EINVAL as i32)
            }
            DeathSignalError::System(errno) => io::Error::from_raw_os_error(errno as i32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Get,
    Set(c_int),
}

// The same errno means different things depending on the option: `EINVAL`
// from a get can only mean the kernel does not know the option, while from
// a set it means the kernel refused the signal number.
fn classify(operation: Operation, errno: Errno) -> DeathSignalError {
    match (operation, errno) {
        (_, Errno::ENOSYS) => DeathSignalError::OperationNotSupported,
        (Operation::Get, Errno::EINVAL) => DeathSignalError::OperationNotSupported,
        (Operation::Set(signal), Errno::EINVAL) => DeathSignalError::InvalidSignal(signal),
        (_, errno) => DeathSignalError::System(errno),
    }
}

/// Returns the parent death signal of the calling thread, or `0` if none is
/// configured.
#[cfg(target_os = "linux")]
pub fn get_death_signal() -> Result<c_int, DeathSignalError> {
    use libc::{c_ulong, prctl, PR_GET_PDEATHSIG};

    let mut signal: c_int = DISABLED;
    let outcome = unsafe {
        prctl(
            PR_GET_PDEATHSIG,
            &mut signal as *mut c_int as c_ulong,
            0 as c_ulong,
            0 as c_ulong,
            0 as c_ulong,
        )
    };

    match outcome {
        0 => Ok(signal),
        _ => Err(classify(Operation::Get, Errno::last())),
    }
}

/// Sets the parent death signal of the calling thread. `0` disables it.
///
/// No validation happens before the kernel call: the range of valid signal
/// numbers belongs to the running kernel, and a rejected value is reported as
/// [`DeathSignalError::InvalidSignal`] with the previous value left in place.
///
/// If the parent has already exited when this is called, no signal will be
/// delivered for that exit. See [`crate::parent::arm`] to detect that case.
///
/// This function only issues a single system call and is async-signal-safe.
#[cfg(target_os = "linux")]
pub fn set_death_signal(signal: c_int) -> Result<(), DeathSignalError> {
    use libc::{c_ulong, prctl, PR_SET_PDEATHSIG};

    // Negative values become large unsigned values, which the kernel rejects.
    let outcome = unsafe {
        prctl(
            PR_SET_PDEATHSIG,
            signal as c_ulong,
            0 as c_ulong,
            0 as c_ulong,
            0 as c_ulong,
        )
    };

    match outcome {
        0 => Ok(()),
        _ => Err(classify(Operation::Set(signal), Errno::last())),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn get_death_signal() -> Result<c_int, DeathSignalError> {
    Err(DeathSignalError::OperationNotSupported)
}

#[cfg(not(target_os = "linux"))]
pub fn set_death_signal(_signal: c_int) -> Result<(), DeathSignalError> {
    Err(DeathSignalError::OperationNotSupported)
}

pub fn disable_death_signal() -> Result<(), DeathSignalError> {
    set_death_signal(DISABLED)
}

#[cfg(all(test, target_os = "linux"))]
pub(crate) mod tests {
    use super::*;
    use crate::signal::max_signal;
    use std::thread;

    // The attribute is per-thread and a new thread starts with it disabled,
    // so running each test body on its own thread keeps tests from seeing
    // each other's values.
    pub fn in_fresh_thread<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        thread::spawn(f).join().expect("test thread panicked")
    }

    #[test]
    fn default_is_disabled() {
        let signal = in_fresh_thread(get_death_signal).expect("failed to get death signal");

        assert_eq!(signal, DISABLED);
    }

    #[test]
    fn set_then_get_round_trips() {
        in_fresh_thread(|| {
            for signal in 1..=max_signal() {
                set_death_signal(signal)
                    .unwrap_or_else(|err| panic!("failed to set {signal}: {err}"));
                assert_eq!(get_death_signal(), Ok(signal));
            }

            disable_death_signal().expect("failed to disable death signal");
        });
    }

    #[test]
    fn disable_is_idempotent() {
        in_fresh_thread(|| {
            set_death_signal(libc::SIGUSR1).expect("failed to set death signal");

            for _ in 0..3 {
                disable_death_signal().expect("failed to disable death signal");
                assert_eq!(get_death_signal(), Ok(DISABLED));
            }
        });
    }

    #[test]
    fn invalid_signal_is_rejected_and_value_kept() {
        in_fresh_thread(|| {
            set_death_signal(libc::SIGHUP).expect("failed to set death signal");

            for signal in [max_signal() + 1, 1_000_000, c_int::MAX, -1, c_int::MIN] {
                assert_eq!(
                    set_death_signal(signal),
                    Err(DeathSignalError::InvalidSignal(signal))
                );
                assert_eq!(get_death_signal(), Ok(libc::SIGHUP));
            }

            disable_death_signal().expect("failed to disable death signal");
        });
    }

    #[test]
    fn attribute_is_not_shared_between_threads() {
        in_fresh_thread(|| {
            set_death_signal(libc::SIGKILL).expect("failed to set death signal");
            assert_eq!(get_death_signal(), Ok(libc::SIGKILL));

            let other = thread::spawn(get_death_signal)
                .join()
                .expect("test thread panicked");
            assert_eq!(other, Ok(DISABLED));

            // Setting it elsewhere does not change it here either.
            thread::spawn(|| set_death_signal(libc::SIGTERM))
                .join()
                .expect("test thread panicked")
                .expect("failed to set death signal");
            assert_eq!(get_death_signal(), Ok(libc::SIGKILL));

            disable_death_signal().expect("failed to disable death signal");
        });
    }

    #[test]
    fn classify_errno() {
        for (operation, errno, expected) in [
            (
                Operation::Get,
                Errno::EINVAL,
                DeathSignalError::OperationNotSupported,
            ),
            (
                Operation::Get,
                Errno::ENOSYS,
                DeathSignalError::OperationNotSupported,
            ),
            (
                Operation::Get,
                Errno::EFAULT,
                DeathSignalError::System(Errno::EFAULT),
            ),
            (
                Operation::Set(99),
                Errno::EINVAL,
                DeathSignalError::InvalidSignal(99),
            ),
            (
                Operation::Set(15),
                Errno::ENOSYS,
                DeathSignalError::OperationNotSupported,
            ),
            (
                Operation::Set(15),
                Errno::EPERM,
                DeathSignalError::System(Errno::EPERM),
            ),
        ] {
            assert_eq!(classify(operation, errno), expected);
        }
    }

    #[test]
    fn error_into_io_error_keeps_code() {
        let err: io::Error = DeathSignalError::System(Errno::EPERM).into();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));

        let err: io::Error = DeathSignalError::InvalidSignal(-1).into();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        assert_eq!(DeathSignalError::OperationNotSupported.raw_os_error(), None);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            DeathSignalError::InvalidSignal(65).to_string(),
            "invalid parent death signal: 65"
        );
        assert_eq!(
            DeathSignalError::OperationNotSupported.to_string(),
            "the parent death signal is not supported on this platform"
        );
    }
}
