#![cfg_attr(not(test), no_std)]

//! # Emulated exokernel
//!
//! A software model of a small exokernel, complete enough to run user-level copy-on-write fork:
//!
//! - Emulated physical memory with reference-counted frames.
//! - Per-environment two-level page tables.
//! - The environment table, with generation-tagged ids.
//! - The page, status and upcall syscalls.
//! - MMU-checked user loads and stores that raise page faults, delivered to the environment's
//!   upcall on its exception stack.
//!
//! User code reaches the kernel through an [`EnvHandle`], which implements the
//! [`exoabi::UserEnv`] traits for one environment.

extern crate alloc;

mod console;
mod env;
mod handle;
mod mm;
mod state;
mod syscall;
mod trap;

use exoabi::{
    EnvId, EnvInfo, EnvStatus, Exofork, PageFlags, Registers, SysError, VirtualAddress,
    memlayout::{PGSIZE, USTACKTOP, UTEXT},
};
use spin::Mutex;

pub use console::Console;
pub use handle::EnvHandle;
pub use mm::AllocError;

use state::State;

/// Sizes of the emulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Physical frames, including the reserved frame 0.
    pub frames: usize,
    /// Environment-table slots, at most [`exoabi::NENV`].
    pub max_envs: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            frames: 1024,
            max_envs: exoabi::NENV,
        }
    }
}

/// An environment picked to run, with the `exofork` result it resumes with, if it is a child
/// that has not run yet.
#[derive(Debug, Clone, Copy)]
pub struct Scheduled<'k> {
    pub env: EnvHandle<'k>,
    pub exofork: Option<Exofork>,
}

pub struct Kernel {
    state: Mutex<State>,
    console: Console,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        log::debug!(
            "emulated kernel: {} frames, {} environment slots",
            config.frames,
            config.max_envs
        );
        Self {
            state: Mutex::new(State::new(config.frames, config.max_envs)),
            console: Console::new(),
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Creates a runnable environment with no parent and a one-page user stack below
    /// [`USTACKTOP`].
    pub fn create_env(&self) -> Result<EnvId, SysError> {
        let mut state = self.state.lock();
        let regs = Registers {
            eip: UTEXT.as_usize() as u32,
            esp: USTACKTOP.as_usize() as u32,
            ..Registers::default()
        };
        let id = state.alloc_env(EnvId::CURRENT, regs)?;

        let stack = USTACKTOP - PGSIZE;
        if let Err(err) = map_fresh_page(&mut state, id, stack, PageFlags::user_writable()) {
            state.free_env(id);
            return Err(err);
        }
        state.env_mut(id)?.status = EnvStatus::Runnable;
        Ok(id)
    }

    /// Returns a handle for `id`. The handle does not check that the environment exists.
    pub fn env(&self, id: EnvId) -> EnvHandle<'_> {
        EnvHandle::new(self, id)
    }

    /// Switches to environment `id`, which must be runnable.
    ///
    /// The environment that was running before goes back to runnable. A child created by
    /// `exofork` that runs for the first time receives [`Exofork::Child`].
    pub fn schedule(&self, id: EnvId) -> Result<Scheduled<'_>, SysError> {
        let mut state = self.state.lock();
        if state.env(id)?.status != EnvStatus::Runnable {
            return Err(SysError::Invalid);
        }

        for env in state.envs.iter_mut() {
            if env.status == EnvStatus::Running {
                env.status = EnvStatus::Runnable;
            }
        }

        let env = state.env_mut(id)?;
        env.status = EnvStatus::Running;
        env.runs += 1;
        let exofork = env.pending.take();
        log::debug!("scheduling {} (run {})", id, env.runs);

        Ok(Scheduled {
            env: EnvHandle::new(self, id),
            exofork,
        })
    }

    /// Read-only view of environment `id`, or `None` if it no longer exists.
    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        self.state.lock().envs.get(id).map(|env| env.info())
    }

    /// Number of live environments.
    pub fn env_count(&self) -> usize {
        self.state.lock().envs.len()
    }

    /// Number of free physical frames.
    pub fn free_frames(&self) -> usize {
        self.state.lock().memory.free_frames()
    }

    /// Number of mappings referring to the frame mapped at `va` in `id`.
    pub fn frame_refs(&self, id: EnvId, va: VirtualAddress) -> Option<u32> {
        let state = self.state.lock();
        let (frame, _) = state.envs.get(id)?.address_space.lookup(va)?;
        Some(state.memory.refs(frame))
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

/// Allocates a zeroed frame and maps it at `va` in `id`.
pub(crate) fn map_fresh_page(
    state: &mut State,
    id: EnvId,
    va: VirtualAddress,
    perm: PageFlags,
) -> Result<(), SysError> {
    let State { memory, envs } = state;
    let env = envs.get_mut(id).ok_or(SysError::BadEnv)?;
    let frame = memory.allocate()?;
    if let Err(err) = env.address_space.insert(memory, va, frame, perm) {
        memory.free(frame);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exoabi::{AddressSpaceView, Syscalls};

    #[test]
    fn created_env_has_a_stack() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let env = kernel.env(id);

        let stack = env.pte((USTACKTOP - PGSIZE).page_number());
        assert!(stack.is_present());
        assert!(stack.flags().is_writable());
        assert_eq!(kernel.env_info(id).unwrap().status, EnvStatus::Runnable);
    }

    #[test]
    fn schedule_requires_runnable() {
        let kernel = Kernel::default();
        let parent = kernel.create_env().unwrap();
        let Exofork::Parent(child) = kernel.env(parent).exofork().unwrap() else {
            panic!("exofork returned to the child");
        };

        assert_eq!(kernel.schedule(child).err(), Some(SysError::Invalid));
        assert_eq!(kernel.schedule(EnvId::new(0xdead)).err(), Some(SysError::BadEnv));
    }

    #[test]
    fn child_resumes_with_pending_exofork() {
        let kernel = Kernel::default();
        let parent = kernel.create_env().unwrap();
        let Exofork::Parent(child) = kernel.env(parent).exofork().unwrap() else {
            panic!("exofork returned to the child");
        };
        kernel
            .env(parent)
            .env_set_status(child, EnvStatus::Runnable)
            .unwrap();

        let first = kernel.schedule(child).unwrap();
        assert_eq!(first.exofork, Some(Exofork::Child));
        assert_eq!(first.env.id(), child);

        let parent_run = kernel.schedule(parent).unwrap();
        assert_eq!(parent_run.exofork, None);
        assert_eq!(kernel.env_info(child).unwrap().status, EnvStatus::Runnable);
        assert_eq!(kernel.env_info(parent).unwrap().status, EnvStatus::Running);

        let again = kernel.schedule(child).unwrap();
        assert_eq!(again.exofork, None);
        assert_eq!(kernel.env_info(child).unwrap().runs, 2);
    }

    #[test]
    fn create_env_fails_cleanly_without_memory() {
        // Frame 0 is reserved and the directory takes the only other one.
        let kernel = Kernel::new(KernelConfig {
            frames: 2,
            max_envs: 4,
        });
        assert_eq!(kernel.create_env(), Err(SysError::NoMemory));
        assert_eq!(kernel.env_count(), 0);
        assert_eq!(kernel.free_frames(), 1);
    }
}
