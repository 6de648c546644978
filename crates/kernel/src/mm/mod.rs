//! Memory management for the emulated machine: physical frames and per-environment page tables.

mod address_space;
mod frame;
mod page_directory;
mod page_table;
mod physical_memory;

pub use address_space::AddressSpace;
pub use physical_memory::{AllocError, PhysicalMemory};
