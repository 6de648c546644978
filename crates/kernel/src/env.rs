//! The environment table.

use alloc::vec::Vec;

use exoabi::{
    ENVGENSHIFT, EnvId, EnvInfo, EnvStatus, Exofork, NENV, Registers, SysError, Upcall,
};

use crate::mm::AddressSpace;

/// A live environment.
pub struct Env {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub pgfault_upcall: Option<Upcall>,
    pub runs: u32,
    /// Saved registers.
    pub regs: Registers,
    /// Value the environment observes from `exofork` when it first runs.
    pub pending: Option<Exofork>,
    /// Set while the page fault upcall runs.
    pub in_upcall: bool,
    /// Page faults taken so far.
    pub faults: u32,
    pub address_space: AddressSpace,
}

impl Env {
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent_id: self.parent_id,
            status: self.status,
            pgfault_upcall: self.pgfault_upcall,
            runs: self.runs,
        }
    }
}

struct Slot {
    /// Id of the current or most recent occupant. Zero if never used.
    last_id: EnvId,
    env: Option<Env>,
}

pub struct EnvTable {
    slots: Vec<Slot>,
}

impl EnvTable {
    /// Creates a table with `size` slots.
    ///
    /// # Panics
    /// Panics if `size` is zero or larger than [`NENV`].
    pub fn new(size: usize) -> Self {
        assert!(size > 0 && size <= NENV, "environment table size out of range");
        Self {
            slots: (0..size)
                .map(|_| Slot {
                    last_id: EnvId::CURRENT,
                    env: None,
                })
                .collect(),
        }
    }

    /// Reserves the lowest free slot and returns the id its next occupant will have.
    pub fn next_id(&self) -> Result<EnvId, SysError> {
        let (index, slot) = self
            .slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.env.is_none())
            .ok_or(SysError::NoFreeEnv)?;

        // Bump the generation so stale ids for this slot stop matching.
        let mut generation = slot.last_id.generation() + 1;
        if generation > u32::MAX >> ENVGENSHIFT {
            generation = 1;
        }
        Ok(EnvId::from_parts(generation, index))
    }

    /// Installs `env` in the slot named by its id.
    ///
    /// # Panics
    /// Panics if the slot is occupied.
    pub fn insert(&mut self, env: Env) {
        let slot = &mut self.slots[env.id.index()];
        assert!(slot.env.is_none(), "environment slot {} in use", env.id.index());
        slot.last_id = env.id;
        slot.env = Some(env);
    }

    /// Removes the environment `id`, returning it.
    pub fn remove(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.last_id != id {
            return None;
        }
        slot.env.take()
    }

    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(id.index())
            .and_then(|slot| slot.env.as_ref())
            .filter(|env| env.id == id)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.index())
            .and_then(|slot| slot.env.as_mut())
            .filter(|env| env.id == id)
    }

    /// Resolves `id` on behalf of `caller`.
    ///
    /// Zero names the caller. With `checkperm`, the target must be the caller or one of its
    /// immediate children.
    pub fn resolve(&self, caller: EnvId, id: EnvId, checkperm: bool) -> Result<EnvId, SysError> {
        let id = if id.is_current() { caller } else { id };
        let env = self.get(id).ok_or(SysError::BadEnv)?;
        if checkperm && env.id != caller && env.parent_id != caller {
            return Err(SysError::BadEnv);
        }
        Ok(env.id)
    }

    /// Read-only view of slot `index`, including free slots.
    pub fn info(&self, index: usize) -> Option<EnvInfo> {
        let slot = self.slots.get(index)?;
        Some(match &slot.env {
            Some(env) => env.info(),
            None => EnvInfo {
                id: slot.last_id,
                parent_id: EnvId::CURRENT,
                status: EnvStatus::Free,
                pgfault_upcall: None,
                runs: 0,
            },
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Env> {
        self.slots.iter_mut().filter_map(|slot| slot.env.as_mut())
    }

    /// Number of live environments.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.env.is_some()).count()
    }
}
