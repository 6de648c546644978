//! The copy-on-write page fault handler.

use exoabi::{
    EnvId, FaultError, PageEntry, PageFlags, SysError, UTrapframe, UserEnv,
    memlayout::{PFTEMP, PGSIZE},
};

/// Custom page fault handler: if the faulting page is copy-on-write, map in a private writable
/// copy of it.
///
/// Only a write to a copy-on-write page is repaired. Anything else is reported as
/// [`FaultError::Unhandled`], which the kernel treats as fatal.
pub fn pgfault(env: &dyn UserEnv, utf: &UTrapframe) -> Result<(), FaultError> {
    let addr = utf.fault_va;
    let page = addr.page_number();
    let pte = if env.pde(page.pdx()).is_present() {
        env.pte(page)
    } else {
        PageEntry::empty()
    };
    let flags = pte.flags();

    if !utf.is_write() || !flags.is_copy_on_write() {
        return Err(FaultError::Unhandled {
            va: addr,
            err: utf.err.bits(),
            flags,
        });
    }

    let va = addr.align_down(PGSIZE);
    env.page_alloc(EnvId::CURRENT, PFTEMP, PageFlags::user_writable())
        .map_err(step("page_alloc"))?;

    let mut contents = [0u8; PGSIZE];
    env.load(va, &mut contents)?;
    env.store(PFTEMP, &contents)?;

    env.page_map(
        EnvId::CURRENT,
        PFTEMP,
        EnvId::CURRENT,
        va,
        PageFlags::user_writable(),
    )
    .map_err(step("page_map"))?;
    env.page_unmap(EnvId::CURRENT, PFTEMP)
        .map_err(step("page_unmap"))?;

    log::trace!("[{}] private copy of {}", env.getenvid(), va);
    Ok(())
}

fn step(step: &'static str) -> impl Fn(SysError) -> FaultError {
    move |source| FaultError::Syscall { step, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exoabi::{
        AddressSpaceView, PageFaultErrorCode, Registers, Syscalls, UserMemory, VirtualAddress,
        memlayout::UTEXT,
    };
    use exokernel::{Kernel, KernelConfig};

    fn write_fault(va: VirtualAddress) -> UTrapframe {
        UTrapframe {
            fault_va: va,
            err: PageFaultErrorCode::PROTECTION_VIOLATION
                | PageFaultErrorCode::CAUSED_BY_WRITE
                | PageFaultErrorCode::USER_MODE,
            regs: Registers::default(),
        }
    }

    /// Maps `UTEXT` copy-on-write over a frame holding `fill`.
    fn cow_page(kernel: &Kernel, fill: u8) -> exokernel::EnvHandle<'_> {
        let env = kernel.env(kernel.create_env().unwrap());
        env.page_alloc(EnvId::CURRENT, UTEXT, PageFlags::user_writable())
            .unwrap();
        env.store(UTEXT, &[fill; PGSIZE]).unwrap();
        env.page_map(
            EnvId::CURRENT,
            UTEXT,
            EnvId::CURRENT,
            UTEXT,
            PageFlags::user_copy_on_write(),
        )
        .unwrap();
        env
    }

    #[test]
    fn copies_the_page_and_makes_it_writable() {
        let kernel = Kernel::default();
        let env = cow_page(&kernel, 0x5A);
        let old = env.pte(UTEXT.page_number()).frame();

        pgfault(&env, &write_fault(UTEXT + 0x123)).unwrap();

        let pte = env.pte(UTEXT.page_number());
        assert_ne!(pte.frame(), old);
        assert!(pte.flags().is_writable());
        assert!(!pte.flags().is_copy_on_write());
        assert!(!env.pte(PFTEMP.page_number()).is_present());

        let mut contents = [0u8; PGSIZE];
        env.load(UTEXT, &mut contents).unwrap();
        assert!(contents.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn read_fault_is_unhandled() {
        let kernel = Kernel::default();
        let env = cow_page(&kernel, 1);
        let utf = UTrapframe {
            err: PageFaultErrorCode::PROTECTION_VIOLATION | PageFaultErrorCode::USER_MODE,
            ..write_fault(UTEXT)
        };
        assert!(matches!(
            pgfault(&env, &utf),
            Err(FaultError::Unhandled { va, .. }) if va == UTEXT
        ));
    }

    #[test]
    fn write_to_plain_read_only_page_is_unhandled() {
        let kernel = Kernel::default();
        let env = kernel.env(kernel.create_env().unwrap());
        env.page_alloc(EnvId::CURRENT, UTEXT, PageFlags::user_readonly())
            .unwrap();

        let err = pgfault(&env, &write_fault(UTEXT)).unwrap_err();
        assert_eq!(
            err,
            FaultError::Unhandled {
                va: UTEXT,
                err: write_fault(UTEXT).err.bits(),
                flags: PageFlags::user_readonly(),
            }
        );
    }

    #[test]
    fn write_to_unmapped_region_is_unhandled() {
        let kernel = Kernel::default();
        let env = kernel.env(kernel.create_env().unwrap());
        let va = VirtualAddress::new(0x1000_0000);
        assert!(matches!(
            pgfault(&env, &write_fault(va)),
            Err(FaultError::Unhandled { flags, .. }) if flags == PageFlags::empty()
        ));
    }

    #[test]
    fn allocation_failure_names_the_step() {
        // Directory, stack page and its table, then the page at UTEXT and its table.
        let kernel = Kernel::new(KernelConfig {
            frames: 6,
            max_envs: 2,
        });
        let env = cow_page(&kernel, 3);
        assert_eq!(
            pgfault(&env, &write_fault(UTEXT)),
            Err(FaultError::Syscall {
                step: "page_alloc",
                source: SysError::NoMemory,
            })
        );
    }
}
