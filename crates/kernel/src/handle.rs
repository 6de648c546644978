//! The kernel as seen by one environment.

use core::fmt;

use exoabi::{
    AddressSpaceView, EnvId, EnvInfo, EnvStatus, Exofork, MemoryFault, PageEntry,
    PageFaultErrorCode, PageFlags, PageNumber, SysError, Syscalls, Upcall, UserMemory,
    VirtualAddress,
    memlayout::{NPDENTRIES, PGSIZE},
};

use crate::{Kernel, trap};

/// Binds a kernel to one environment.
///
/// Every syscall made through the handle is made on behalf of that environment, and loads and
/// stores go through its page tables. Handles are cheap to copy and do not keep the environment
/// alive; once it is destroyed, syscalls fail with [`SysError::BadEnv`].
#[derive(Clone, Copy)]
pub struct EnvHandle<'k> {
    kernel: &'k Kernel,
    id: EnvId,
}

impl<'k> EnvHandle<'k> {
    pub(crate) fn new(kernel: &'k Kernel, id: EnvId) -> Self {
        Self { kernel, id }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    /// Number of page faults the environment has taken, or zero if it no longer exists.
    pub fn fault_count(&self) -> u32 {
        self.kernel
            .state
            .lock()
            .envs
            .get(self.id)
            .map_or(0, |env| env.faults)
    }

    /// Returns true while the environment exists.
    pub fn is_alive(&self) -> bool {
        self.kernel.state.lock().envs.get(self.id).is_some()
    }

    /// Runs `op` on the bytes of the page containing `va`, from `va` to the end of the page,
    /// faulting the page in first if needed.
    fn with_page<R>(
        &self,
        va: VirtualAddress,
        write: bool,
        mut op: impl FnMut(&mut [u8]) -> R,
    ) -> Result<R, MemoryFault> {
        let mut faulted = false;
        loop {
            match self.try_access(va, write, &mut op)? {
                Ok(result) => return Ok(result),
                Err(_) if faulted => {
                    return Err(trap::fatal(
                        self.kernel,
                        self.id,
                        va,
                        "fault persists after the upcall",
                    ));
                }
                Err(err) => {
                    trap::page_fault(self.kernel, self.id, va, err)?;
                    faulted = true;
                }
            }
        }
    }

    /// One attempt at an access, as the MMU would make it.
    ///
    /// The outer error means the environment is gone; the inner one is the page fault to raise.
    fn try_access<R>(
        &self,
        va: VirtualAddress,
        write: bool,
        op: &mut impl FnMut(&mut [u8]) -> R,
    ) -> Result<Result<R, PageFaultErrorCode>, MemoryFault> {
        let mut guard = self.kernel.state.lock();
        let state = &mut *guard;
        let env = state
            .envs
            .get_mut(self.id)
            .ok_or(MemoryFault::NoSuchEnv(self.id))?;

        let mut err = PageFaultErrorCode::USER_MODE;
        if write {
            err |= PageFaultErrorCode::CAUSED_BY_WRITE;
        }

        let Some(entry) = env.address_space.entry_mut(va.align_down(PGSIZE)) else {
            return Ok(Err(err));
        };
        let mut flags = entry.flags();
        if !flags.is_user() || (write && !flags.is_writable()) {
            return Ok(Err(err | PageFaultErrorCode::PROTECTION_VIOLATION));
        }
        let Some(frame) = entry.frame() else {
            return Ok(Err(err));
        };
        flags.mark_accessed(write);
        entry.set_flags(flags);

        let page = state.memory.bytes_mut(frame);
        Ok(Ok(op(&mut page[va.page_offset()..])))
    }

    /// Splits `[va, va + len)` into per-page pieces and runs `op` on each with its offset into
    /// the caller's buffer.
    fn for_each_page(
        &self,
        va: VirtualAddress,
        len: usize,
        write: bool,
        mut op: impl FnMut(usize, &mut [u8]),
    ) -> Result<(), MemoryFault> {
        let mut done = 0;
        while done < len {
            let Some(addr) = VirtualAddress::try_new(va.as_usize() + done) else {
                return Err(trap::fatal(
                    self.kernel,
                    self.id,
                    va,
                    "access wraps the address space",
                ));
            };
            let chunk = (PGSIZE - addr.page_offset()).min(len - done);
            self.with_page(addr, write, |page| op(done, &mut page[..chunk]))?;
            done += chunk;
        }
        Ok(())
    }
}

impl fmt::Debug for EnvHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvHandle").field("id", &self.id).finish()
    }
}

impl Syscalls for EnvHandle<'_> {
    fn getenvid(&self) -> EnvId {
        self.id
    }

    fn exofork(&self) -> Result<Exofork, SysError> {
        self.kernel.sys_exofork(self.id)
    }

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<(), SysError> {
        self.kernel.sys_env_set_status(self.id, env, status)
    }

    fn env_set_pgfault_upcall(&self, env: EnvId, upcall: Upcall) -> Result<(), SysError> {
        self.kernel.sys_env_set_pgfault_upcall(self.id, env, upcall)
    }

    fn page_alloc(&self, env: EnvId, va: VirtualAddress, perm: PageFlags) -> Result<(), SysError> {
        self.kernel.sys_page_alloc(self.id, env, va, perm)
    }

    fn page_map(
        &self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        self.kernel
            .sys_page_map(self.id, src_env, src_va, dst_env, dst_va, perm)
    }

    fn page_unmap(&self, env: EnvId, va: VirtualAddress) -> Result<(), SysError> {
        self.kernel.sys_page_unmap(self.id, env, va)
    }

    fn env_destroy(&self, env: EnvId) -> Result<(), SysError> {
        self.kernel.sys_env_destroy(self.id, env)
    }

    fn cputs(&self, text: &str) {
        self.kernel.sys_cputs(self.id, text);
    }
}

impl AddressSpaceView for EnvHandle<'_> {
    fn pde(&self, pdx: usize) -> PageEntry {
        if pdx >= NPDENTRIES {
            return PageEntry::empty();
        }
        self.kernel
            .state
            .lock()
            .envs
            .get(self.id)
            .map(|env| env.address_space.pde(pdx))
            .unwrap_or_default()
    }

    fn pte(&self, page: PageNumber) -> PageEntry {
        if page.pdx() >= NPDENTRIES {
            return PageEntry::empty();
        }
        self.kernel
            .state
            .lock()
            .envs
            .get(self.id)
            .map(|env| env.address_space.pte(page))
            .unwrap_or_default()
    }

    fn env_info(&self, slot: usize) -> Option<EnvInfo> {
        self.kernel.state.lock().envs.info(slot)
    }
}

impl UserMemory for EnvHandle<'_> {
    fn load(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let len = buf.len();
        self.for_each_page(va, len, false, |offset, page| {
            buf[offset..offset + page.len()].copy_from_slice(page);
        })
    }

    fn store(&self, va: VirtualAddress, data: &[u8]) -> Result<(), MemoryFault> {
        self.for_each_page(va, data.len(), true, |offset, page| {
            let len = page.len();
            page.copy_from_slice(&data[offset..offset + len]);
        })
    }
}
