use std::error::Error;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

// Shells report a process killed by signal `n` as exiting with `128 + n`.
// The wrapper does the same, so that its own exit code is indistinguishable
// from the command's.
pub fn exit_code(status: ExitStatus) -> Result<i32, Box<dyn Error>> {
    if let Some(code) = status.code() {
        Ok(code)
    } else {
        match status.signal() {
            Some(signal) => Ok(128 + signal),
            None => Err("command exited without code or signal".into()),
        }
    }
}
