//! Environment identifiers and the read-only environment table entry visible to user code.

use core::fmt;

use crate::Upcall;

/// log2 of the number of environment slots.
pub const LOG2NENV: usize = 10;

/// Number of environment slots.
pub const NENV: usize = 1 << LOG2NENV;

/// Shift of the generation counter inside an [`EnvId`].
pub const ENVGENSHIFT: u32 = 12;

/// Identifies an environment.
///
/// The low [`LOG2NENV`] bits select the slot in the environment table; the bits from
/// [`ENVGENSHIFT`] up form a generation counter, so that a stale id stops matching once its slot
/// is reused. The value zero never names a real environment: syscalls interpret it as "the
/// calling environment".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// Refers to the calling environment.
    pub const CURRENT: Self = Self(0);

    /// Creates an id from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds the id for `slot` in the given generation.
    pub const fn from_parts(generation: u32, slot: usize) -> Self {
        Self((generation << ENVGENSHIFT) | (slot as u32 & (NENV as u32 - 1)))
    }

    /// Returns the raw value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the environment-table slot this id refers to.
    pub const fn index(self) -> usize {
        self.0 as usize & (NENV - 1)
    }

    /// Returns the generation counter.
    pub const fn generation(self) -> u32 {
        self.0 >> ENVGENSHIFT
    }

    /// Returns true for the "calling environment" alias.
    pub const fn is_current(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvStatus {
    /// The slot is unused.
    Free,
    /// Being torn down.
    Dying,
    /// Waiting to be scheduled.
    Runnable,
    /// Currently executing.
    Running,
    /// Exists but must not be scheduled yet.
    NotRunnable,
}

/// Read-only copy of an environment-table entry.
#[derive(Debug, Clone, Copy)]
pub struct EnvInfo {
    /// The environment's own id.
    pub id: EnvId,
    /// The environment that created it, or zero for environments created by the kernel.
    pub parent_id: EnvId,
    /// Scheduling status.
    pub status: EnvStatus,
    /// Registered page fault upcall.
    pub pgfault_upcall: Option<Upcall>,
    /// Number of times the environment has been scheduled.
    pub runs: u32,
}
