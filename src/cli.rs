use std::num::ParseIntError;

use libc::c_int;
use nix::unistd::Pid;
use pdeathsig::command::ChildSetup;
use pdeathsig::package::VERSION;
use pdeathsig::signal::{parse_signal, signal_name};
use pdeathsig::DISABLED;

use ::log::warn;
use clap::{Args, Parser, Subcommand};

/// Get and set the parent death signal.
///
/// On Linux, a process can ask the kernel to send it a signal when its
/// parent exits. This tool reads that setting, or runs a command with it
/// set, so that the command does not outlive the process that started it.
#[derive(Debug, Parser)]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the parent death signal of this process.
    ///
    /// Prints `0` when no signal is set. The setting survives exec, so this
    /// shows what the process that executed this tool had configured.
    Get(GetArgs),

    /// Set the parent death signal, then replace this process with the
    /// command.
    ///
    /// The command keeps this tool's process id and parent, and receives the
    /// signal when that parent exits.
    Exec(ExecArgs),

    /// Run the command as a child process that receives the signal when
    /// this tool exits.
    ///
    /// Signals sent to this tool are forwarded to the command, and this tool
    /// exits with the command's exit code.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Print the signal's name instead of its number.
    #[arg(long)]
    pub name: bool,
}

#[derive(Debug, Args)]
pub struct SignalArgs {
    /// The signal to deliver when the parent exits.
    ///
    /// Accepts a number, a name with or without the `SIG` prefix (such as
    /// `TERM` or `SIGKILL`), a real-time signal (such as `RTMIN+2`), or
    /// `none` to disable it.
    #[arg(
        short,
        long,
        env = "PDEATHSIG_SIGNAL",
        value_name = "SIGNAL",
        default_value = "TERM",
        value_parser = parse_signal
    )]
    pub signal: c_int,
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    #[command(flatten)]
    pub signal: SignalArgs,

    /// The process id the parent is expected to have, usually `$PPID`
    /// from the calling shell.
    ///
    /// If the parent exits before the signal is set, the kernel will never
    /// deliver it. When the parent is no longer this process once the
    /// signal is set, it has already exited, and the signal is delivered
    /// right away instead. Without this option the parent is read when this
    /// tool starts, which cannot notice a parent that exited before that.
    #[arg(
        long,
        env = "PDEATHSIG_EXPECT_PARENT",
        value_name = "PID",
        value_parser = parse_pid
    )]
    pub expect_parent: Option<Pid>,

    /// Run the command even if the parent has already exited.
    #[arg(long)]
    pub ignore_orphaned: bool,

    /// The command to execute. Required.
    #[arg(index = 1, allow_hyphen_values = true, last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub signal: SignalArgs,

    /// Start the command in a new session.
    #[arg(long)]
    pub setsid: bool,

    /// A signal for the command to ignore. Can be given more than once.
    ///
    /// `SIGKILL` and `SIGSTOP` cannot be ignored.
    #[arg(long = "ignore", value_name = "SIGNAL", value_parser = parse_signal)]
    pub ignore: Vec<c_int>,

    /// The command to execute. Required.
    #[arg(index = 1, allow_hyphen_values = true, last = true, required = true)]
    pub command: Vec<String>,
}

fn parse_pid(input: &str) -> Result<Pid, ParseIntError> {
    input.trim().parse().map(Pid::from_raw)
}

impl RunArgs {
    pub fn child_setup(&self) -> ChildSetup {
        self.ignore.iter().fold(
            ChildSetup::new()
                .death_signal(self.signal.signal)
                .new_session(self.setsid),
            |setup, &signal| setup.ignore_signal(signal),
        )
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = self.signal.warnings();
        let death_signal = self.signal.signal;

        for &signal in &self.ignore {
            if signal == DISABLED {
                warnings.push("using --ignore none; it has no effect".to_string());
            } else if signal == libc::SIGKILL || signal == libc::SIGSTOP {
                warnings.push(format!(
                    "using --ignore {}; it cannot be ignored and will be skipped",
                    signal_name(signal)
                ));
            } else if signal == death_signal {
                warnings.push(format!(
                    "using --ignore {} alongside --signal {}; \
                    the command will ignore its parent's death",
                    signal_name(signal),
                    signal_name(death_signal)
                ));
            }
        }

        warnings
    }
}

impl SignalArgs {
    fn warnings(&self) -> Vec<String> {
        if self.signal == DISABLED {
            return vec!["using --signal none; \
                the command will not be signalled when its parent exits"
                .to_string()];
        }

        Vec::new()
    }
}

impl ExecArgs {
    fn warnings(&self) -> Vec<String> {
        let mut warnings = self.signal.warnings();

        if self.ignore_orphaned && self.expect_parent.is_none() {
            warnings.push(
                "using --ignore-orphaned without --expect-parent; \
                it has no effect"
                    .to_string(),
            );
        }

        warnings
    }
}

impl Cli {
    fn warnings(&self) -> Vec<String> {
        match &self.command {
            Command::Get(_) => Vec::new(),
            Command::Exec(args) => args.warnings(),
            Command::Run(args) => args.warnings(),
        }
    }

    pub fn warn(&self) {
        for warning in self.warnings() {
            warn!("{}", warning);
        }
    }
}
