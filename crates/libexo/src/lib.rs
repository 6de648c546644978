#![cfg_attr(not(test), no_std)]

//! # libexo
//!
//! The user half of the exokernel: the pieces of the C library that make `fork` work without
//! kernel support for address-space copies.
//!
//! [`fork`] shares every user page below the stack top with the child copy-on-write, gives the
//! child a fresh exception stack and installs [`pgfault`] as its page fault upcall. The first
//! write to a shared page in either environment faults into [`pgfault`], which replaces the
//! mapping with a private writable copy.
//!
//! Everything here runs against the [`exoabi::UserEnv`] traits, so it works with any kernel
//! binding that implements them.

extern crate alloc;

mod entry;
mod fork;
mod pgfault;
mod process;

pub use entry::{abort, exit, run};
pub use fork::{ForkError, Forked, after_exofork, duppage, fork, sfork};
pub use pgfault::pgfault;
pub use process::{Process, set_pgfault_handler};
