//! Syscall implementations.
//!
//! Every syscall runs with the kernel lock held for its whole duration and either completes or
//! leaves no trace. `caller` is always a concrete id; [`crate::EnvHandle`] supplies it.

use exoabi::{
    EnvId, EnvStatus, Exofork, PageFlags, SysError, Upcall, VirtualAddress, memlayout::UTOP,
};

use crate::{Kernel, console::kprintln, map_fresh_page};

/// Logs a syscall and its outcome when the `trace-syscalls` feature is enabled.
macro_rules! trace_syscall {
    ($caller:expr, $name:literal, $body:block) => {{
        let result = (|| -> Result<_, SysError> { $body })();
        #[cfg(feature = "trace-syscalls")]
        log::trace!("[{}] {} -> {:?}", $caller, $name, result);
        result
    }};
}

/// Checks a user virtual address passed to a page syscall.
fn check_user_va(va: VirtualAddress) -> Result<(), SysError> {
    if va >= UTOP || !va.is_page_aligned() {
        return Err(SysError::Invalid);
    }
    Ok(())
}

/// Checks a permission set passed to a page syscall.
fn check_perm(perm: PageFlags) -> Result<(), SysError> {
    if !perm.is_valid_syscall_permission() || (perm.is_writable() && perm.is_copy_on_write()) {
        return Err(SysError::Invalid);
    }
    Ok(())
}

impl Kernel {
    pub(crate) fn sys_exofork(&self, caller: EnvId) -> Result<Exofork, SysError> {
        trace_syscall!(caller, "exofork", {
            let mut state = self.state.lock();
            let mut regs = state.env(caller)?.regs;
            // The child sees zero in eax, the classic "I am the child" return value.
            regs.eax = 0;
            let child = state.alloc_env(caller, regs)?;
            state.env_mut(child)?.pending = Some(Exofork::Child);
            Ok(Exofork::Parent(child))
        })
    }

    pub(crate) fn sys_env_set_status(
        &self,
        caller: EnvId,
        env: EnvId,
        status: EnvStatus,
    ) -> Result<(), SysError> {
        trace_syscall!(caller, "env_set_status", {
            if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
                return Err(SysError::Invalid);
            }
            let mut state = self.state.lock();
            let target = state.envs.resolve(caller, env, true)?;
            state.env_mut(target)?.status = status;
            Ok(())
        })
    }

    pub(crate) fn sys_env_set_pgfault_upcall(
        &self,
        caller: EnvId,
        env: EnvId,
        upcall: Upcall,
    ) -> Result<(), SysError> {
        trace_syscall!(caller, "env_set_pgfault_upcall", {
            let mut state = self.state.lock();
            let target = state.envs.resolve(caller, env, true)?;
            state.env_mut(target)?.pgfault_upcall = Some(upcall);
            Ok(())
        })
    }

    pub(crate) fn sys_page_alloc(
        &self,
        caller: EnvId,
        env: EnvId,
        va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        trace_syscall!(caller, "page_alloc", {
            let mut state = self.state.lock();
            let target = state.envs.resolve(caller, env, true)?;
            check_user_va(va)?;
            check_perm(perm)?;
            map_fresh_page(&mut state, target, va, perm)
        })
    }

    pub(crate) fn sys_page_map(
        &self,
        caller: EnvId,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        trace_syscall!(caller, "page_map", {
            let mut state = self.state.lock();
            let src = state.envs.resolve(caller, src_env, true)?;
            let dst = state.envs.resolve(caller, dst_env, true)?;
            check_user_va(src_va)?;
            check_user_va(dst_va)?;
            check_perm(perm)?;

            let (frame, src_flags) = state
                .env(src)?
                .address_space
                .lookup(src_va)
                .ok_or(SysError::Invalid)?;
            if perm.is_writable() && !src_flags.is_writable() {
                return Err(SysError::Invalid);
            }

            let state = &mut *state;
            let target = state.envs.get_mut(dst).ok_or(SysError::BadEnv)?;
            target
                .address_space
                .insert(&mut state.memory, dst_va, frame, perm)?;
            Ok(())
        })
    }

    pub(crate) fn sys_page_unmap(
        &self,
        caller: EnvId,
        env: EnvId,
        va: VirtualAddress,
    ) -> Result<(), SysError> {
        trace_syscall!(caller, "page_unmap", {
            let mut state = self.state.lock();
            let target = state.envs.resolve(caller, env, true)?;
            check_user_va(va)?;
            let state = &mut *state;
            if let Some(env) = state.envs.get_mut(target) {
                env.address_space.remove(&mut state.memory, va);
            }
            Ok(())
        })
    }

    pub(crate) fn sys_env_destroy(&self, caller: EnvId, env: EnvId) -> Result<(), SysError> {
        trace_syscall!(caller, "env_destroy", {
            let target = {
                let mut state = self.state.lock();
                let target = state.envs.resolve(caller, env, true)?;
                state.free_env(target);
                target
            };
            if target == caller {
                kprintln!(self.console, "[{}] exiting gracefully", caller);
            } else {
                kprintln!(self.console, "[{}] destroying {}", caller, target);
            }
            kprintln!(self.console, "[{}] free env {}", caller, target);
            Ok(())
        })
    }

    #[cfg_attr(not(feature = "trace-syscalls"), allow(unused_variables))]
    pub(crate) fn sys_cputs(&self, caller: EnvId, text: &str) {
        #[cfg(feature = "trace-syscalls")]
        log::trace!("[{}] cputs {} bytes", caller, text.len());
        self.console.write_str(text);
    }

    /// Destroys `id` on the kernel's own initiative. The caller reports why.
    pub(crate) fn kill(&self, id: EnvId) {
        if self.state.lock().free_env(id) {
            kprintln!(self.console, "[{}] free env {}", id, id);
        }
    }
}
