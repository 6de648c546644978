//! User virtual memory layout.
//!
//! ```text
//!    4 Gig -------->  +------------------------------+
//!                     :     kernel, read-only views  :
//!    UTOP,UXSTACKTOP  +------------------------------+ 0xeec00000
//!                     |     User Exception Stack     | RW/RW  PGSIZE
//!                     +------------------------------+ 0xeebff000
//!                     |       Empty Memory (*)       | --/--  PGSIZE
//!    USTACKTOP  --->  +------------------------------+ 0xeebfe000
//!                     |      Normal User Stack       | RW/RW  PGSIZE
//!                     +------------------------------+ 0xeebfd000
//!                     :              .               :
//!                     |   Program Data & Heap        |
//!    UTEXT -------->  +------------------------------+ 0x00800000
//!    PFTEMP ------->  |       Empty Memory (*)       |        PTSIZE
//!                     |                              |
//!    UTEMP -------->  +------------------------------+ 0x00400000
//!                     |       Empty Memory (*)       |
//!    0 ------------>  +------------------------------+
//! ```

use crate::VirtualAddress;

/// log2 of the page size.
pub const PGSHIFT: usize = 12;

/// Bytes mapped by a page.
pub const PGSIZE: usize = 1 << PGSHIFT;

/// Offset of the page-table index in a linear address.
pub const PTXSHIFT: usize = 12;

/// Offset of the page-directory index in a linear address.
pub const PDXSHIFT: usize = 22;

/// Page-directory entries per page directory.
pub const NPDENTRIES: usize = 1024;

/// Page-table entries per page table.
pub const NPTENTRIES: usize = 1024;

/// Bytes mapped by one page-directory entry.
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;

/// Top of user-accessible memory. Everything at or above is kernel territory.
pub const UTOP: VirtualAddress = VirtualAddress::new(0xEEC0_0000);

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: VirtualAddress = UTOP;

/// Lowest address of the user exception stack page.
pub const UXSTACKBOTTOM: VirtualAddress = VirtualAddress::new(UXSTACKTOP.as_usize() - PGSIZE);

/// Top of the normal user stack. The page between it and the exception stack is a guard.
pub const USTACKTOP: VirtualAddress = VirtualAddress::new(UTOP.as_usize() - 2 * PGSIZE);

/// Where user programs are loaded.
pub const UTEXT: VirtualAddress = VirtualAddress::new(2 * PTSIZE);

/// Region for temporary page mappings.
pub const UTEMP: VirtualAddress = VirtualAddress::new(PTSIZE);

/// Scratch page used by the user-level page fault handler while it copies a page.
pub const PFTEMP: VirtualAddress = VirtualAddress::new(UTEMP.as_usize() + PTSIZE - PGSIZE);
