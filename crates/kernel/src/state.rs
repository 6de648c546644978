use exoabi::{EnvId, EnvStatus, Registers, SysError};

use crate::{
    env::{Env, EnvTable},
    mm::{AddressSpace, PhysicalMemory},
};

/// Everything the kernel lock protects.
pub(crate) struct State {
    pub memory: PhysicalMemory,
    pub envs: EnvTable,
}

impl State {
    pub fn new(frames: usize, max_envs: usize) -> Self {
        Self {
            memory: PhysicalMemory::new(frames),
            envs: EnvTable::new(max_envs),
        }
    }

    /// Creates a not-runnable environment with an empty address space.
    pub fn alloc_env(&mut self, parent_id: EnvId, regs: Registers) -> Result<EnvId, SysError> {
        let id = self.envs.next_id()?;
        let address_space = AddressSpace::new(&mut self.memory)?;
        self.envs.insert(Env {
            id,
            parent_id,
            status: EnvStatus::NotRunnable,
            pgfault_upcall: None,
            runs: 0,
            regs,
            pending: None,
            in_upcall: false,
            faults: 0,
            address_space,
        });
        log::debug!("[{}] new env {}", parent_id, id);
        Ok(id)
    }

    /// Frees environment `id` and everything it maps. Returns false if it did not exist.
    pub fn free_env(&mut self, id: EnvId) -> bool {
        match self.envs.remove(id) {
            Some(env) => {
                log::debug!("[{}] freeing {} mapped pages", id, env.address_space.mapped_pages());
                env.address_space.teardown(&mut self.memory);
                true
            }
            None => false,
        }
    }

    pub fn env(&self, id: EnvId) -> Result<&Env, SysError> {
        self.envs.get(id).ok_or(SysError::BadEnv)
    }

    pub fn env_mut(&mut self, id: EnvId) -> Result<&mut Env, SysError> {
        self.envs.get_mut(id).ok_or(SysError::BadEnv)
    }
}
