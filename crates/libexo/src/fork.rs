//! User-level fork with copy-on-write.

use exoabi::{
    EnvId, EnvStatus, Exofork, PageFlags, PageNumber, SysError, UserEnv,
    memlayout::{USTACKTOP, UXSTACKBOTTOM},
};
use thiserror::Error;

use crate::{Process, pgfault::pgfault, set_pgfault_handler};

/// Which side of a fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    /// The original environment; carries the child's id.
    Parent(EnvId),
    /// The new environment.
    Child,
}

/// Error returned by [`fork`]. Names the step that failed; nothing is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForkError {
    #[error("set_pgfault_handler: {source}")]
    Handler {
        #[source]
        source: SysError,
    },
    #[error("sys_exofork: {source}")]
    Exofork {
        #[source]
        source: SysError,
    },
    #[error("duppage {page}: {source}")]
    DupPage {
        page: PageNumber,
        #[source]
        source: SysError,
    },
    #[error("exception stack for {child}: {source}")]
    ExceptionStack {
        child: EnvId,
        #[source]
        source: SysError,
    },
    #[error("page fault upcall for {child}: {source}")]
    Upcall {
        child: EnvId,
        #[source]
        source: SysError,
    },
    #[error("set status of {child}: {source}")]
    SetStatus {
        child: EnvId,
        #[source]
        source: SysError,
    },
    #[error("no environment table entry with an upcall for {0}")]
    MissingEnv(EnvId),
}

/// Maps the page `page` of the caller into `child` at the same address.
///
/// Writable and copy-on-write pages are shared copy-on-write: the child's mapping is made first,
/// then the caller's own mapping is downgraded to copy-on-write as well. Read-only pages are
/// shared read-only.
pub fn duppage<E: UserEnv>(env: &E, child: EnvId, page: PageNumber) -> Result<(), ForkError> {
    let va = page.start();
    let flags = env.pte(page).flags();
    let map_into = |dst: EnvId, perm: PageFlags| {
        env.page_map(EnvId::CURRENT, va, dst, va, perm)
            .map_err(|source| ForkError::DupPage { page, source })
    };

    if flags.is_writable() || flags.is_copy_on_write() {
        map_into(child, PageFlags::user_copy_on_write())?;
        map_into(EnvId::CURRENT, PageFlags::user_copy_on_write())?;
        log::trace!("duppage {} copy-on-write", va);
    } else {
        map_into(child, PageFlags::user_readonly())?;
        log::trace!("duppage {} read-only", va);
    }
    Ok(())
}

/// User-level fork with copy-on-write.
///
/// Sets up the page fault handler, creates a child, and continues with [`after_exofork`]. The
/// parent sees [`Forked::Parent`] with the child's id once the child is runnable. The child's
/// execution resumes in `after_exofork` with [`Exofork::Child`] and sees [`Forked::Child`].
pub fn fork<E: UserEnv>(process: &mut Process<E>) -> Result<Forked, ForkError> {
    set_pgfault_handler(process, pgfault).map_err(|source| ForkError::Handler { source })?;

    let outcome = process
        .env()
        .exofork()
        .map_err(|source| ForkError::Exofork { source })?;
    after_exofork(process, outcome)
}

/// The part of [`fork`] that runs after the environment has been duplicated, on each side.
pub fn after_exofork<E: UserEnv>(
    process: &mut Process<E>,
    outcome: Exofork,
) -> Result<Forked, ForkError> {
    match outcome {
        Exofork::Child => {
            // thisenv still points at the parent's entry.
            let info = process.refresh_thisenv().map_err(ForkError::MissingEnv)?;
            log::debug!("[{}] child of {} running", info.id, info.parent_id);
            Ok(Forked::Child)
        }
        Exofork::Parent(child) => {
            populate_child(process, child)?;
            Ok(Forked::Parent(child))
        }
    }
}

/// Duplicates the address space below the user stack top into `child`, gives it its own
/// exception stack and upcall, and marks it runnable.
fn populate_child<E: UserEnv>(process: &Process<E>, child: EnvId) -> Result<(), ForkError> {
    let env = process.env();
    let limit = USTACKTOP.page_number();

    let mut pages = 0usize;
    for pdx in 0..=USTACKTOP.pdx() {
        for (page, entry) in env.region_pages(pdx) {
            if page >= limit {
                break;
            }
            if entry.flags().is_user() {
                duppage(env, child, page)?;
                pages += 1;
            }
        }
    }

    env.page_alloc(child, UXSTACKBOTTOM, PageFlags::user_writable())
        .map_err(|source| ForkError::ExceptionStack { child, source })?;

    let upcall = process
        .thisenv()
        .and_then(|info| info.pgfault_upcall)
        .ok_or(ForkError::MissingEnv(env.getenvid()))?;
    env.env_set_pgfault_upcall(child, upcall)
        .map_err(|source| ForkError::Upcall { child, source })?;

    env.env_set_status(child, EnvStatus::Runnable)
        .map_err(|source| ForkError::SetStatus { child, source })?;

    log::debug!("[{}] forked {} ({} pages shared)", env.getenvid(), child, pages);
    Ok(())
}

/// Shared-memory fork. Not implemented.
pub fn sfork<E: UserEnv>(_process: &mut Process<E>) -> Result<Forked, SysError> {
    log::warn!("sfork not implemented");
    Err(SysError::Invalid)
}
