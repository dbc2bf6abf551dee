//! Get and set the parent death signal of the calling thread.
//!
//! On Linux, a thread can ask the kernel to send it a signal when its parent
//! exits. This crate exposes that attribute with a typed error contract
//! ([`get_death_signal`], [`set_death_signal`]), a way to close the race with
//! a parent that is already gone ([`parent::arm`]), and a way to arm child
//! processes before they exec ([`command::DeathSignalCommandExt`]).
//!
//! The attribute belongs to a *thread*, not to a process. Setting it on one
//! thread does not affect the others, a new thread starts with it disabled,
//! and for a child process it fires when the thread that spawned the child
//! exits.

pub mod command;
pub mod death_signal;
pub mod package;
pub mod parent;
pub mod signal;

pub use death_signal::{
    disable_death_signal, get_death_signal, set_death_signal, DeathSignalError, DISABLED,
};
