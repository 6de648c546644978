//! The kernel interface seen from user space.
//!
//! [`Syscalls`] is the trap interface proper. [`AddressSpaceView`] models the read-only page
//! tables and environment table the kernel maps into every environment, and [`UserMemory`] stands
//! in for ordinary loads and stores through the MMU. A kernel binds all three to one environment
//! and hands the result to user code as a [`UserEnv`].

use core::fmt;

use thiserror::Error;

use crate::{
    EnvId, EnvInfo, EnvStatus, PageEntry, PageFlags, PageNumber, UTrapframe, VirtualAddress,
    memlayout::NPTENTRIES,
};

/// Error returned by a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SysError {
    #[error("unspecified error")]
    Unspecified,
    #[error("bad environment")]
    BadEnv,
    #[error("invalid parameter")]
    Invalid,
    #[error("out of memory")]
    NoMemory,
    #[error("out of environments")]
    NoFreeEnv,
    #[error("segmentation fault")]
    Fault,
}

impl SysError {
    /// Returns the negative code used on the raw syscall ABI.
    pub const fn code(self) -> i32 {
        match self {
            SysError::Unspecified => -1,
            SysError::BadEnv => -2,
            SysError::Invalid => -3,
            SysError::NoMemory => -4,
            SysError::NoFreeEnv => -5,
            SysError::Fault => -6,
        }
    }

    /// Decodes a raw syscall return value. Non-negative values are not errors.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(SysError::Unspecified),
            -2 => Some(SysError::BadEnv),
            -3 => Some(SysError::Invalid),
            -4 => Some(SysError::NoMemory),
            -5 => Some(SysError::NoFreeEnv),
            -6 => Some(SysError::Fault),
            c if c < 0 => Some(SysError::Unspecified),
            _ => None,
        }
    }
}

/// Outcome of [`Syscalls::exofork`], as seen by each of the two executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exofork {
    /// Seen by the caller: the new environment's id.
    Parent(EnvId),
    /// Seen by the new environment when it first runs.
    Child,
}

/// A user memory access could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryFault {
    /// The fault could not be handled and the environment was destroyed.
    #[error("environment {env} killed by fault at {va}")]
    Killed { env: EnvId, va: VirtualAddress },
    /// The environment no longer exists.
    #[error("environment {0} does not exist")]
    NoSuchEnv(EnvId),
}

/// Error returned by a page fault upcall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FaultError {
    /// The fault is not one the handler knows how to repair.
    #[error("unhandled page fault at {va} (err {err:#x}, pte {flags})")]
    Unhandled {
        va: VirtualAddress,
        err: u64,
        flags: PageFlags,
    },
    /// A syscall made while repairing the fault failed.
    #[error("{step}: {source}")]
    Syscall {
        step: &'static str,
        #[source]
        source: SysError,
    },
    /// The handler itself faulted.
    #[error(transparent)]
    Access(#[from] MemoryFault),
}

/// Signature of a page fault upcall.
///
/// The kernel calls it on the faulting environment's exception stack, with a binding to that
/// environment. Returning `Ok` resumes the faulting access; returning `Err` kills the environment.
pub type UpcallEntry = fn(&dyn UserEnv, &UTrapframe) -> Result<(), FaultError>;

/// A registered upcall entry point.
#[derive(Clone, Copy)]
pub struct Upcall(pub UpcallEntry);

impl Upcall {
    /// Returns the address of the entry point.
    pub fn entry_point(self) -> usize {
        self.0 as usize
    }

    /// Invokes the upcall.
    pub fn call(self, env: &dyn UserEnv, utf: &UTrapframe) -> Result<(), FaultError> {
        (self.0)(env, utf)
    }
}

impl PartialEq for Upcall {
    fn eq(&self, other: &Self) -> bool {
        self.entry_point() == other.entry_point()
    }
}

impl Eq for Upcall {}

impl fmt::Debug for Upcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Upcall({:#x})", self.entry_point())
    }
}

/// The syscalls available to user code. `EnvId::CURRENT` names the caller.
pub trait Syscalls {
    /// Returns the caller's id.
    fn getenvid(&self) -> EnvId;

    /// Creates a new, not-runnable environment whose registers are a copy of the caller's.
    fn exofork(&self) -> Result<Exofork, SysError>;

    /// Sets the status of `env`, which must be `Runnable` or `NotRunnable`.
    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<(), SysError>;

    /// Registers the page fault upcall of `env`.
    fn env_set_pgfault_upcall(&self, env: EnvId, upcall: Upcall) -> Result<(), SysError>;

    /// Maps a fresh zero-filled page at `va` in `env`, replacing any existing mapping.
    fn page_alloc(&self, env: EnvId, va: VirtualAddress, perm: PageFlags) -> Result<(), SysError>;

    /// Maps the page at `src_va` in `src_env` at `dst_va` in `dst_env`.
    fn page_map(
        &self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError>;

    /// Removes the mapping at `va` in `env`. Unmapping an absent page succeeds.
    fn page_unmap(&self, env: EnvId, va: VirtualAddress) -> Result<(), SysError>;

    /// Destroys `env`.
    fn env_destroy(&self, env: EnvId) -> Result<(), SysError>;

    /// Writes `text` to the console.
    fn cputs(&self, text: &str);
}

/// Read-only view of the caller's paging structures and of the environment table.
pub trait AddressSpaceView {
    /// Returns the page-directory entry for region `pdx`.
    fn pde(&self, pdx: usize) -> PageEntry;

    /// Returns the page-table entry for `page`. Empty if the region has no page table.
    fn pte(&self, page: PageNumber) -> PageEntry;

    /// Returns the environment-table entry in `slot`, or `None` if out of range.
    fn env_info(&self, slot: usize) -> Option<EnvInfo>;

    /// Returns true if `page` is present and user-accessible.
    fn is_user_mapped(&self, page: PageNumber) -> bool {
        if !self.pde(page.pdx()).is_present() {
            return false;
        }
        let flags = self.pte(page).flags();
        flags.is_present() && flags.is_user()
    }

    /// Iterates over the present pages of region `pdx`, in address order.
    fn region_pages(&self, pdx: usize) -> RegionPages<'_, Self>
    where
        Self: Sized,
    {
        RegionPages {
            view: self,
            pdx,
            next: 0,
        }
    }
}

/// Iterator over the present pages of one page-directory region.
pub struct RegionPages<'a, V: ?Sized> {
    view: &'a V,
    pdx: usize,
    next: usize,
}

impl<V: AddressSpaceView + ?Sized> Iterator for RegionPages<'_, V> {
    type Item = (PageNumber, PageEntry);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.view.pde(self.pdx).is_present() {
            return None;
        }
        while self.next < NPTENTRIES {
            let page = PageNumber::new(self.pdx * NPTENTRIES + self.next);
            self.next += 1;
            let entry = self.view.pte(page);
            if entry.is_present() {
                return Some((page, entry));
            }
        }
        None
    }
}

/// Loads and stores through the caller's page tables.
///
/// Accesses behave as the MMU does: they may fault, in which case the kernel runs the
/// environment's page fault upcall and retries.
pub trait UserMemory {
    /// Reads `buf.len()` bytes starting at `va`.
    fn load(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MemoryFault>;

    /// Writes `data` starting at `va`.
    fn store(&self, va: VirtualAddress, data: &[u8]) -> Result<(), MemoryFault>;

    /// Reads one byte.
    fn load_u8(&self, va: VirtualAddress) -> Result<u8, MemoryFault> {
        let mut byte = [0u8];
        self.load(va, &mut byte)?;
        Ok(byte[0])
    }

    /// Writes one byte.
    fn store_u8(&self, va: VirtualAddress, value: u8) -> Result<(), MemoryFault> {
        self.store(va, &[value])
    }
}

/// Everything a user environment can reach: syscalls, its view of the kernel tables, and memory.
pub trait UserEnv: Syscalls + AddressSpaceView + UserMemory {}

impl<T: Syscalls + AddressSpaceView + UserMemory + ?Sized> UserEnv for T {}
