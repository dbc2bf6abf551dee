// Setting up a child process between fork and exec, so that it is armed
// against its parent's death before the command starts running.
//
// The hook runs in the forked child, where only async-signal-safe calls are
// allowed: no allocation, no locks, no logging.

use std::io;

use std::{mem, ptr, thread};

use libc::c_int;
use log::trace;
use nix::errno::Errno;
use nix::unistd::{getpid, setsid, Pid};
use thiserror::Error;

use crate::death_signal::{set_death_signal, DeathSignalError, DISABLED};
use crate::parent::arm_or_raise;
use crate::signal::signal_name;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChildSetupError {
    #[error("{0}")]
    DeathSignal(DeathSignalError),

    #[error("cannot ignore {name}: {errno}")]
    Ignore { name: String, errno: Errno },
}

/// What to do in a child process before it executes its command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildSetup {
    death_signal: Option<c_int>,
    new_session: bool,
    ignored: Vec<c_int>,
}

impl ChildSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal the child receives when the thread that spawned it exits.
    ///
    /// If the spawning process has already exited by the time the child is
    /// armed, the child raises the signal on itself before exec.
    pub fn death_signal(mut self, signal: c_int) -> Self {
        self.death_signal = Some(signal);
        self
    }

    /// Start the child in a new session, detached from the controlling
    /// terminal and from the spawner's process group.
    pub fn new_session(mut self, new_session: bool) -> Self {
        self.new_session = new_session;
        self
    }

    /// Have the child start with `signal` ignored. Ignored dispositions
    /// survive exec. `SIGKILL` and `SIGSTOP` cannot be ignored and are
    /// skipped, as is `0`, which is not a signal.
    pub fn ignore_signal(mut self, signal: c_int) -> Self {
        if signal != DISABLED && !self.ignored.contains(&signal) {
            self.ignored.push(signal);
        }
        self
    }

    pub fn ignored_signals(&self) -> &[c_int] {
        &self.ignored
    }

    pub fn get_death_signal(&self) -> Option<c_int> {
        self.death_signal
    }

    /// Checks, without touching the calling thread or process, that the
    /// kernel accepts the death signal and the ignored signals.
    ///
    /// Failures inside the child can only be reported as a bare error code
    /// from `spawn`, so checking first gives a clearer error.
    pub fn check(&self) -> Result<(), ChildSetupError> {
        if let Some(signal) = self.death_signal {
            // The attribute is per-thread, so trying it on a scratch thread
            // leaves the caller's own value alone.
            thread::spawn(move || set_death_signal(signal))
                .join()
                .unwrap_or(Err(DeathSignalError::InvalidSignal(signal)))
                .map_err(ChildSetupError::DeathSignal)?;
        }

        for &signal in &self.ignored {
            // Querying the current disposition fails for invalid signals.
            let mut current: libc::sigaction = unsafe { mem::zeroed() };
            if unsafe { libc::sigaction(signal, ptr::null(), &mut current) } != 0 {
                return Err(ChildSetupError::Ignore {
                    name: signal_name(signal),
                    errno: Errno::last(),
                });
            }
        }

        Ok(())
    }

    fn apply(&self, parent: Pid) -> io::Result<()> {
        if self.new_session {
            setsid()?;
        }

        if let Some(signal) = self.death_signal {
            arm_or_raise(signal, parent)?;
        }

        for &signal in &self.ignored {
            if signal == libc::SIGKILL || signal == libc::SIGSTOP {
                continue;
            }

            if unsafe { libc::signal(signal, libc::SIG_IGN) } == libc::SIG_ERR {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    fn into_hook(self) -> impl FnMut() -> io::Result<()> + Send + Sync + 'static {
        let parent = getpid();

        trace!(
            "child of {} will receive {} when its parent exits",
            parent,
            self.death_signal
                .map(signal_name)
                .unwrap_or_else(|| "nothing".to_string())
        );

        move || self.apply(parent)
    }
}

pub trait DeathSignalCommandExt {
    /// Runs `setup` in the child process before it executes the command.
    ///
    /// The death signal is tied to the thread that calls `spawn`, not to the
    /// spawning process: if that thread exits, the child is signalled even
    /// though the rest of the process keeps running.
    fn child_setup(&mut self, setup: ChildSetup) -> &mut Self;
}

impl DeathSignalCommandExt for std::process::Command {
    fn child_setup(&mut self, setup: ChildSetup) -> &mut Self {
        use std::os::unix::process::CommandExt;

        unsafe { self.pre_exec(setup.into_hook()) }
    }
}

impl DeathSignalCommandExt for tokio::process::Command {
    fn child_setup(&mut self, setup: ChildSetup) -> &mut Self {
        unsafe { self.pre_exec(setup.into_hook()) }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn output(command: &mut Command) -> String {
        let output = command
            .stdout(Stdio::piped())
            .output()
            .expect("failed to run command");
        assert!(output.status.success(), "status: {:?}", output.status);
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn status_field(status: &str, field: &str) -> String {
        status
            .lines()
            .find_map(|line| line.strip_prefix(field))
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| panic!("missing {field} in {status}"))
    }

    #[test]
    fn builder() {
        let setup = ChildSetup::new()
            .death_signal(libc::SIGTERM)
            .new_session(true)
            .ignore_signal(libc::SIGHUP)
            .ignore_signal(libc::SIGHUP)
            .ignore_signal(libc::SIGINT);

        assert_eq!(setup.get_death_signal(), Some(libc::SIGTERM));
        assert_eq!(setup.ignored_signals(), &[libc::SIGHUP, libc::SIGINT]);
        assert_eq!(ChildSetup::new().get_death_signal(), None);
    }

    #[test]
    fn ignoring_no_signal_is_skipped() {
        let setup = ChildSetup::new().ignore_signal(DISABLED);

        assert!(setup.ignored_signals().is_empty());

        let status = Command::new("true")
            .child_setup(setup)
            .status()
            .expect("failed to run command");
        assert!(status.success());
    }

    #[test]
    fn check_accepts_valid_setup() {
        let setup = ChildSetup::new()
            .death_signal(libc::SIGTERM)
            .ignore_signal(libc::SIGHUP)
            .ignore_signal(libc::SIGKILL);

        assert_eq!(setup.check(), Ok(()));
        assert_eq!(ChildSetup::new().check(), Ok(()));
    }

    #[test]
    fn check_rejects_invalid_death_signal() {
        let setup = ChildSetup::new().death_signal(4096);

        assert_eq!(
            setup.check(),
            Err(ChildSetupError::DeathSignal(DeathSignalError::InvalidSignal(4096)))
        );
    }

    #[test]
    fn check_rejects_invalid_ignored_signal() {
        let setup = ChildSetup::new().ignore_signal(4096);

        assert_eq!(
            setup.check(),
            Err(ChildSetupError::Ignore {
                name: "signal 4096".to_string(),
                errno: Errno::EINVAL,
            })
        );
        assert_eq!(
            setup.check().unwrap_err().to_string(),
            "cannot ignore signal 4096: EINVAL: Invalid argument"
        );
    }

    #[test]
    fn ignored_signals_survive_exec() {
        let setup = ChildSetup::new()
            .ignore_signal(libc::SIGUSR1)
            .ignore_signal(libc::SIGKILL);

        let status = output(
            Command::new("cat")
                .arg("/proc/self/status")
                .child_setup(setup),
        );

        let ignored = u64::from_str_radix(&status_field(&status, "SigIgn:"), 16)
            .expect("invalid SigIgn mask");
        assert_ne!(ignored & (1 << (libc::SIGUSR1 - 1)), 0);
        assert_eq!(ignored & (1 << (libc::SIGKILL - 1)), 0);
    }

    #[test]
    fn new_session_makes_child_a_session_leader() {
        let stat = output(
            Command::new("cat")
                .arg("/proc/self/stat")
                .child_setup(ChildSetup::new().new_session(true)),
        );

        // pid (comm) state ppid pgrp session ...
        let after_comm = &stat[stat.rfind(')').expect("invalid stat") + 1..];
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        let (pgrp, session) = (fields[2], fields[3]);
        let pid = stat.split_whitespace().next().expect("invalid stat");

        assert_eq!(session, pid);
        assert_eq!(pgrp, pid);
    }

    #[test]
    fn invalid_death_signal_fails_spawn() {
        let err = Command::new("true")
            .child_setup(ChildSetup::new().death_signal(-1))
            .status()
            .expect_err("spawn should fail");

        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }
}
