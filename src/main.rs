mod cli;
mod exit;
mod signals;

use crate::cli::{Cli, Command, ExecArgs, GetArgs, RunArgs};
use crate::exit::exit_code;
use crate::signals::signal_stream;

use ::log::{debug, error, trace, warn};
use pdeathsig::command::DeathSignalCommandExt;
use pdeathsig::package::NAME;
use pdeathsig::parent::{arm, arm_or_raise, Armed};
use pdeathsig::signal::signal_name;
use pdeathsig::get_death_signal;
use std::error::Error;
use std::ffi::CString;
use std::io::{self, Write};
use std::process::{exit, ExitStatus};
use tokio::process::Child;
use tokio::select;
use tokio_stream::StreamExt;

use clap::Parser;
use env_logger::Env;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = record.level().to_string().to_ascii_lowercase();
            writeln!(buf, "{}: {}: {}", NAME, level, record.args())
        })
        .init();

    let cli = Cli::parse();
    cli.warn();

    let result = match cli.command {
        Command::Get(args) => get(args),
        Command::Exec(args) => exec(args),
        Command::Run(args) => run(args),
    };

    match result {
        Ok(code) => exit(code),
        Err(err) => {
            error!("{}", err);
            exit(1)
        }
    }
}

fn get(args: GetArgs) -> Result<i32, Box<dyn Error>> {
    let signal = get_death_signal()?;

    if args.name {
        println!("{}", signal_name(signal));
    } else {
        println!("{}", signal);
    }

    Ok(0)
}

// Arms the death signal on this process and replaces it with the command.
// The signal survives exec, unless the command is set-user-ID,
// set-group-ID or has file capabilities, in which case the kernel clears it.
fn exec(args: ExecArgs) -> Result<i32, Box<dyn Error>> {
    let signal = args.signal.signal;
    let parent = args.expect_parent.unwrap_or_else(nix::unistd::getppid);

    let armed = if args.ignore_orphaned {
        arm(signal, parent)?
    } else {
        arm_or_raise(signal, parent)?
    };

    match armed {
        Armed::Watching { parent } => {
            debug!("armed {} against parent {}", signal_name(signal), parent);
        }
        Armed::ParentGone { expected, current } => {
            warn!(
                "parent {} exited before {} was armed; now watching {}",
                expected,
                signal_name(signal),
                current
            );
        }
    }

    let argv = args
        .command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    trace!("executing: {}", args.command.join(" "));

    match nix::unistd::execvp(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(err) => Err(format!("failed to execute {}: {}", args.command[0], err).into()),
    }
}

// The child's death signal fires when the thread that spawned it exits, so
// the child is spawned on the main thread, which lives as long as the
// process does.
#[tokio::main(flavor = "current_thread")]
async fn run(args: RunArgs) -> Result<i32, Box<dyn Error>> {
    let setup = args.child_setup();
    setup.check()?;

    let child = command(&args.command)
        .child_setup(setup)
        .spawn()
        .map_err(|err| format!("failed to execute {}: {}", args.command[0], err))?;

    let exit_status = forward_signals_and_wait(child).await?;

    debug!("command exited with: {}", exit_status);

    exit_code(exit_status)
}

async fn forward_signals_and_wait(mut child: Child) -> io::Result<ExitStatus> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let mut signals = signal_stream()?;

    loop {
        select! {
            biased;

            status = child.wait() => {
                return status
            }

            Some(signal) = signals.next() => {
                match child.id().and_then(|id| i32::try_from(id).ok()) {
                    Some(id) => match kill(Pid::from_raw(id), signal) {
                        Ok(_) => trace!("forwarded signal to child: {}", signal),
                        Err(err) => debug!("error forwarding signal to child: {}", err),
                    },
                    None => debug!("cannot forward signal to child: child process has no PID"),
                }
            }
        }
    }
}

fn command(argv: &[String]) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(&argv[0]);
    command.args(&argv[1..]);
    command
}
