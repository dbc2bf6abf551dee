use std::str::FromStr;

use libc::c_int;
use nix::sys::signal::Signal;
use thiserror::Error;

use crate::death_signal::DISABLED;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSignalError {
    #[error("empty signal name")]
    Empty,

    #[error("unknown signal name: {0}")]
    UnknownName(String),

    #[error("real-time signal offset out of range: {0}")]
    RealTimeOutOfRange(String),
}

#[cfg(target_os = "linux")]
#[allow(unused_unsafe)]
fn real_time_range() -> Option<(c_int, c_int)> {
    Some(unsafe { (libc::SIGRTMIN(), libc::SIGRTMAX()) })
}

#[cfg(not(target_os = "linux"))]
fn real_time_range() -> Option<(c_int, c_int)> {
    None
}

/// The highest signal number on this platform.
pub fn max_signal() -> c_int {
    match real_time_range() {
        Some((_, max)) => max,
        None => libc::SIGSYS,
    }
}

// Returns a human readable name for a signal number, as used in log
// messages and by `pdeathsig get --name`.
pub fn signal_name(signal: c_int) -> String {
    if signal == DISABLED {
        return "none".to_string();
    }

    if let Ok(signal) = Signal::try_from(signal) {
        return signal.as_str().to_string();
    }

    if let Some((min, max)) = real_time_range() {
        if (min..=max).contains(&signal) {
            let from_min = signal - min;
            let from_max = max - signal;

            return match (from_min, from_max) {
                (0, _) => "SIGRTMIN".to_string(),
                (_, 0) => "SIGRTMAX".to_string(),
                (offset, rest) if offset <= rest => format!("SIGRTMIN+{offset}"),
                (_, rest) => format!("SIGRTMAX-{rest}"),
            };
        }
    }

    format!("signal {signal}")
}

/// Parses a signal given as a number, as `none`, or by name.
///
/// Names are case-insensitive and the `SIG` prefix is optional. Real-time
/// signals are written `RTMIN+n` or `RTMAX-n`.
///
/// Numbers are not checked against the platform's signal range: the kernel
/// is the authority on which values it accepts.
pub fn parse_signal(input: &str) -> Result<c_int, ParseSignalError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ParseSignalError::Empty);
    }

    if let Ok(number) = input.parse::<c_int>() {
        return Ok(number);
    }

    let upper = input.to_ascii_uppercase();

    if upper == "NONE" {
        return Ok(DISABLED);
    }

    let name = upper.strip_prefix("SIG").unwrap_or(&upper);

    if let Some(signal) = parse_real_time(name, input)? {
        return Ok(signal);
    }

    match Signal::from_str(&format!("SIG{name}")) {
        Ok(signal) => Ok(signal as c_int),
        Err(_) => Err(ParseSignalError::UnknownName(input.to_string())),
    }
}

fn parse_real_time(name: &str, input: &str) -> Result<Option<c_int>, ParseSignalError> {
    let unknown = || ParseSignalError::UnknownName(input.to_string());

    let (from_min, rest, sign) = if let Some(rest) = name.strip_prefix("RTMIN") {
        (true, rest, 1)
    } else if let Some(rest) = name.strip_prefix("RTMAX") {
        (false, rest, -1)
    } else {
        return Ok(None);
    };

    let Some((min, max)) = real_time_range() else {
        return Err(unknown());
    };

    let offset = match rest {
        "" => 0,
        _ => {
            let digits = match (sign, rest.as_bytes()[0]) {
                (1, b'+') | (-1, b'-') => &rest[1..],
                _ => return Err(unknown()),
            };
            digits.parse::<c_int>().map_err(|_| unknown())?
        }
    };

    let signal = if from_min {
        min.checked_add(offset)
    } else {
        max.checked_sub(offset)
    };

    match signal {
        Some(signal) if (min..=max).contains(&signal) => Ok(Some(signal)),
        _ => Err(ParseSignalError::RealTimeOutOfRange(input.to_string())),
    }
}
