use nix::sys::signal::Signal;
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::{wrappers::SignalStream, Stream, StreamExt, StreamMap};

fn nix_to_tokio(signal: &Signal) -> SignalKind {
    match signal {
        Signal::SIGINT => SignalKind::interrupt(),
        Signal::SIGTERM => SignalKind::terminate(),
        Signal::SIGHUP => SignalKind::hangup(),
        Signal::SIGQUIT => SignalKind::quit(),
        Signal::SIGUSR1 => SignalKind::user_defined1(),
        Signal::SIGUSR2 => SignalKind::user_defined2(),
        Signal::SIGWINCH => SignalKind::window_change(),
        _ => panic!("unsupported signal: {:?}", signal),
    }
}

// Signals that are meaningful to forward from `pdeathsig run` to the command.
//
// Only signals that can be caught are listed. If the wrapper is killed by
// `SIGKILL`, the command receives its death signal instead, which is the
// point of running it through the wrapper.
const CHILD_FORWARDABLE_SIGNALS: [Signal; 7] = [
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGWINCH,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
];

pub fn signal_stream() -> io::Result<impl Stream<Item = Signal>> {
    let mut signals = StreamMap::new();

    for nix_signal in &CHILD_FORWARDABLE_SIGNALS {
        signals.insert(
            *nix_signal,
            SignalStream::new(signal(nix_to_tokio(nix_signal))?),
        );
    }

    Ok(signals.map(|(signal, _)| signal))
}
