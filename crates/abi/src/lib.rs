#![cfg_attr(not(test), no_std)]

//! # Exokernel ABI
//!
//! Types shared between the exokernel and the user-level library linked into every environment:
//!
//! - Address, page and frame newtypes for the 32-bit two-level paging model.
//! - Page permission flags, including the software copy-on-write bit.
//! - The user memory layout.
//! - Environment ids and the read-only environment table entry.
//! - The fault record pushed on the user exception stack.
//! - The syscall interface and the user-visible views of kernel state.

mod address;
mod entry;
mod env;
mod flags;
pub mod memlayout;
mod numbers;
mod syscall;
mod trap;

pub use address::{MAX_ADDRESS, PhysicalAddress, VirtualAddress};
pub use entry::PageEntry;
pub use env::{ENVGENSHIFT, EnvId, EnvInfo, EnvStatus, LOG2NENV, NENV};
pub use flags::{FlagConflict, PageFlags};
pub use numbers::{FrameNumber, PageNumber};
pub use syscall::{
    AddressSpaceView, Exofork, FaultError, MemoryFault, RegionPages, SysError, Syscalls, Upcall,
    UpcallEntry, UserEnv, UserMemory,
};
pub use trap::{Registers, UTrapframe};

pub use x86_64::structures::idt::PageFaultErrorCode;
