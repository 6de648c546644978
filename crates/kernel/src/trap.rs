//! Page fault delivery.
//!
//! A user-mode page fault is reflected to the environment's registered upcall: the kernel pushes
//! a [`UTrapframe`] at the top of the exception stack, releases its lock and calls the upcall
//! with a handle on the faulting environment. Faults that cannot be reflected destroy the
//! environment.

use exoabi::{
    EnvId, MemoryFault, PageFaultErrorCode, UTrapframe, Upcall, VirtualAddress,
    memlayout::{PGSIZE, UXSTACKBOTTOM},
};

use crate::{Kernel, console::kprintln, state::State};

/// Why a fault could not be reflected to user space.
enum Refusal {
    /// The environment no longer exists.
    Gone,
    Fatal(&'static str),
}

/// Handles a page fault taken by `id` at `va`.
///
/// Returns `Ok` once the upcall has returned successfully; the caller retries the access.
pub(crate) fn page_fault(
    kernel: &Kernel,
    id: EnvId,
    va: VirtualAddress,
    err: PageFaultErrorCode,
) -> Result<(), MemoryFault> {
    log::debug!("[{}] page fault at {} ({:?})", id, va, err);

    let delivery = push_trapframe(&mut kernel.state.lock(), id, va, err);
    let (upcall, utf) = match delivery {
        Ok(delivery) => delivery,
        Err(Refusal::Gone) => return Err(MemoryFault::NoSuchEnv(id)),
        Err(Refusal::Fatal(reason)) => return Err(fatal(kernel, id, va, reason)),
    };

    let result = upcall.call(&kernel.env(id), &utf);

    let alive = match kernel.state.lock().envs.get_mut(id) {
        Some(env) => {
            env.in_upcall = false;
            true
        }
        None => false,
    };
    if !alive {
        return Err(MemoryFault::Killed { env: id, va });
    }

    result.map_err(|error| {
        kprintln!(kernel.console, "[{}] user panic: {}", id, error);
        log::error!("[{}] page fault upcall failed: {}", id, error);
        kernel.kill(id);
        MemoryFault::Killed { env: id, va }
    })
}

/// Checks that the fault can be reflected and writes the trap frame onto the exception stack.
fn push_trapframe(
    state: &mut State,
    id: EnvId,
    va: VirtualAddress,
    err: PageFaultErrorCode,
) -> Result<(Upcall, UTrapframe), Refusal> {
    let State { memory, envs } = state;
    let env = envs.get_mut(id).ok_or(Refusal::Gone)?;
    env.faults += 1;

    let upcall = env
        .pgfault_upcall
        .ok_or(Refusal::Fatal("no page fault upcall registered"))?;
    if env.in_upcall {
        return Err(Refusal::Fatal("fault inside the page fault upcall"));
    }

    let entry = env
        .address_space
        .entry_mut(UXSTACKBOTTOM)
        .ok_or(Refusal::Fatal("exception stack not mapped"))?;
    let mut flags = entry.flags();
    if !flags.is_user() || !flags.is_writable() {
        return Err(Refusal::Fatal("exception stack not writable"));
    }
    let frame = entry
        .frame()
        .ok_or(Refusal::Fatal("exception stack not mapped"))?;
    flags.mark_accessed(true);
    entry.set_flags(flags);

    let utf = UTrapframe {
        fault_va: va,
        err,
        regs: env.regs,
    };
    memory.bytes_mut(frame)[PGSIZE - UTrapframe::SIZE..].copy_from_slice(&utf.to_bytes());
    env.in_upcall = true;

    Ok((upcall, utf))
}

/// Reports an unrecoverable fault and destroys the environment.
pub(crate) fn fatal(
    kernel: &Kernel,
    id: EnvId,
    va: VirtualAddress,
    reason: &'static str,
) -> MemoryFault {
    let eip = kernel
        .state
        .lock()
        .envs
        .get(id)
        .map_or(0, |env| env.regs.eip);
    kprintln!(
        kernel.console,
        "[{}] user fault va {:08x} ip {:08x}",
        id,
        va.as_usize(),
        eip
    );
    log::warn!("[{}] killed by fault at {}: {}", id, va, reason);
    kernel.kill(id);
    MemoryFault::Killed { env: id, va }
}

#[cfg(test)]
mod tests {
    use exoabi::{
        AddressSpaceView, EnvId, FaultError, MemoryFault, PageFlags, Syscalls, UTrapframe,
        Upcall, UserEnv, UserMemory,
        memlayout::{PGSIZE, USTACKTOP, UTEXT, UXSTACKBOTTOM, UXSTACKTOP},
    };

    use crate::Kernel;

    /// Makes the faulting page writable.
    fn grant_write(env: &dyn UserEnv, utf: &UTrapframe) -> Result<(), FaultError> {
        let va = utf.fault_va.align_down(PGSIZE);
        env.page_alloc(EnvId::CURRENT, va, PageFlags::user_writable())
            .map_err(|source| FaultError::Syscall {
                step: "page_alloc",
                source,
            })
    }

    /// Returns without fixing anything.
    fn ignore(_: &dyn UserEnv, _: &UTrapframe) -> Result<(), FaultError> {
        Ok(())
    }

    /// Refuses every fault.
    fn refuse(_: &dyn UserEnv, utf: &UTrapframe) -> Result<(), FaultError> {
        Err(FaultError::Unhandled {
            va: utf.fault_va,
            err: utf.err.bits(),
            flags: PageFlags::empty(),
        })
    }

    /// Reads the trap frame back off the exception stack and checks it.
    fn inspect_stack(env: &dyn UserEnv, utf: &UTrapframe) -> Result<(), FaultError> {
        let mut bytes = [0u8; UTrapframe::SIZE];
        env.load(UXSTACKTOP - UTrapframe::SIZE, &mut bytes)?;
        if bytes != utf.to_bytes() {
            return Err(FaultError::Unhandled {
                va: utf.fault_va,
                err: utf.err.bits(),
                flags: PageFlags::empty(),
            });
        }
        grant_write(env, utf)
    }

    /// Touches an unmapped page from inside the handler.
    fn nested(env: &dyn UserEnv, _: &UTrapframe) -> Result<(), FaultError> {
        env.load_u8(UTEXT + 16 * PGSIZE)?;
        Ok(())
    }

    fn env_with_upcall(kernel: &Kernel, upcall: Upcall) -> EnvId {
        let id = kernel.create_env().unwrap();
        let env = kernel.env(id);
        env.page_alloc(EnvId::CURRENT, UXSTACKBOTTOM, PageFlags::user_writable())
            .unwrap();
        env.env_set_pgfault_upcall(EnvId::CURRENT, upcall)
            .unwrap();
        id
    }

    #[test]
    fn fault_without_upcall_kills() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let env = kernel.env(id);

        assert_eq!(
            env.store_u8(UTEXT, 1),
            Err(MemoryFault::Killed { env: id, va: UTEXT })
        );
        assert!(kernel.env_info(id).is_none());
        assert!(
            kernel
                .console()
                .contains(&format!("[{}] user fault va 00800000 ip 00800000", id))
        );
    }

    #[test]
    fn handled_fault_is_retried() {
        let kernel = Kernel::default();
        let id = env_with_upcall(&kernel, Upcall(grant_write));
        let env = kernel.env(id);

        env.store_u8(UTEXT + 5, 0x41).unwrap();
        assert_eq!(env.load_u8(UTEXT + 5), Ok(0x41));
        assert_eq!(env.fault_count(), 1);
    }

    #[test]
    fn trapframe_is_on_the_exception_stack() {
        let kernel = Kernel::default();
        let id = env_with_upcall(&kernel, Upcall(inspect_stack));
        kernel.env(id).store_u8(UTEXT, 7).unwrap();
        assert!(
            kernel
                .env(id)
                .pte(UXSTACKBOTTOM.page_number())
                .flags()
                .is_dirty()
        );
    }

    #[test]
    fn fault_that_persists_kills() {
        let kernel = Kernel::default();
        let id = env_with_upcall(&kernel, Upcall(ignore));
        assert_eq!(
            kernel.env(id).load_u8(UTEXT),
            Err(MemoryFault::Killed { env: id, va: UTEXT })
        );
        assert!(kernel.env_info(id).is_none());
    }

    #[test]
    fn failing_upcall_kills_with_diagnostic() {
        let kernel = Kernel::default();
        let id = env_with_upcall(&kernel, Upcall(refuse));
        assert!(kernel.env(id).store_u8(UTEXT, 1).is_err());
        assert!(
            kernel
                .console()
                .contains(&format!("[{}] user panic: unhandled page fault", id))
        );
        assert!(kernel.env_info(id).is_none());
    }

    #[test]
    fn nested_fault_kills() {
        let kernel = Kernel::default();
        let id = env_with_upcall(&kernel, Upcall(nested));
        assert!(kernel.env(id).store_u8(UTEXT, 1).is_err());
        assert!(kernel.env_info(id).is_none());
        assert_eq!(kernel.env_count(), 0);
    }

    #[test]
    fn missing_exception_stack_kills() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let env = kernel.env(id);
        env.env_set_pgfault_upcall(EnvId::CURRENT, Upcall(grant_write))
            .unwrap();
        assert!(env.store_u8(UTEXT, 1).is_err());
        assert!(kernel.env_info(id).is_none());
    }

    #[test]
    fn stack_page_does_not_fault() {
        let kernel = Kernel::default();
        let env = kernel.env(kernel.create_env().unwrap());
        env.store(USTACKTOP - 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(env.fault_count(), 0);
    }
}
