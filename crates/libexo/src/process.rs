//! Process-local state of the user library.

use exoabi::{
    EnvId, EnvInfo, EnvStatus, PageFlags, SysError, Upcall, UpcallEntry, UserEnv,
    memlayout::UXSTACKBOTTOM,
};

/// The library's view of the environment it is running in.
///
/// Holds what would be process-global variables in a conventional C runtime: the binding to the
/// kernel, the `thisenv` slot in the read-only environment table, and the registered page fault
/// handler. A [`Process`] is copied wholesale into a forked child (see [`Process::inherit`]), so
/// after a fork the child's `thisenv` still names the parent until the child path of
/// [`crate::after_exofork`] fixes it.
#[derive(Debug, Clone)]
pub struct Process<E> {
    env: E,
    thisenv: usize,
    pgfault_handler: Option<Upcall>,
}

impl<E: UserEnv> Process<E> {
    /// Starts the runtime in the environment bound to `env`.
    pub fn new(env: E) -> Self {
        let thisenv = env.getenvid().index();
        Self {
            env,
            thisenv,
            pgfault_handler: None,
        }
    }

    /// The kernel binding.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// This environment's entry in the environment table, as recorded in `thisenv`.
    pub fn thisenv(&self) -> Option<EnvInfo> {
        self.env.env_info(self.thisenv)
    }

    /// Looks up the caller's own id and points `thisenv` at its table entry.
    ///
    /// Fails with the caller's id if the slot no longer holds a live environment.
    pub(crate) fn refresh_thisenv(&mut self) -> Result<EnvInfo, EnvId> {
        let id = self.env.getenvid();
        self.thisenv = id.index();
        self.thisenv()
            .filter(|info| info.id == id && info.status != EnvStatus::Free)
            .ok_or(id)
    }

    /// The page fault handler registered through [`set_pgfault_handler`], if any.
    pub fn pgfault_handler(&self) -> Option<Upcall> {
        self.pgfault_handler
    }

    /// Copies this process's state on top of a new kernel binding, as the duplicated image of a
    /// forked child sees it.
    pub fn inherit<F: UserEnv>(&self, env: F) -> Process<F> {
        Process {
            env,
            thisenv: self.thisenv,
            pgfault_handler: self.pgfault_handler,
        }
    }
}

/// Installs `handler` as the page fault upcall of the calling environment.
///
/// The first registration also maps the exception stack page, unless it is already mapped.
/// Registering again replaces the handler.
pub fn set_pgfault_handler<E: UserEnv>(
    process: &mut Process<E>,
    handler: UpcallEntry,
) -> Result<(), SysError> {
    let env = &process.env;
    if process.pgfault_handler.is_none() && !env.is_user_mapped(UXSTACKBOTTOM.page_number()) {
        env.page_alloc(EnvId::CURRENT, UXSTACKBOTTOM, PageFlags::user_writable())?;
        log::debug!("[{}] exception stack at {}", env.getenvid(), UXSTACKBOTTOM);
    }

    let upcall = Upcall(handler);
    env.env_set_pgfault_upcall(EnvId::CURRENT, upcall)?;
    process.pgfault_handler = Some(upcall);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exoabi::{AddressSpaceView, FaultError, Syscalls, UTrapframe};
    use exokernel::Kernel;

    fn first(_: &dyn UserEnv, _: &UTrapframe) -> Result<(), FaultError> {
        Ok(())
    }

    fn second(env: &dyn UserEnv, _: &UTrapframe) -> Result<(), FaultError> {
        env.cputs("second");
        Ok(())
    }

    #[test]
    fn thisenv_names_the_caller() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let process = Process::new(kernel.env(id));
        assert_eq!(process.thisenv().unwrap().id, id);
        assert!(process.pgfault_handler().is_none());
    }

    #[test]
    fn first_registration_maps_exception_stack() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let mut process = Process::new(kernel.env(id));

        set_pgfault_handler(&mut process, first).unwrap();
        let pte = process.env().pte(UXSTACKBOTTOM.page_number());
        assert!(pte.flags().is_writable());
        assert_eq!(process.thisenv().unwrap().pgfault_upcall, Some(Upcall(first)));
    }

    #[test]
    fn reregistering_replaces_the_handler_and_keeps_the_stack() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let mut process = Process::new(kernel.env(id));
        set_pgfault_handler(&mut process, first).unwrap();
        let stack = process.env().pte(UXSTACKBOTTOM.page_number()).frame();
        let free = kernel.free_frames();

        set_pgfault_handler(&mut process, second).unwrap();
        assert_eq!(process.env().pte(UXSTACKBOTTOM.page_number()).frame(), stack);
        assert_eq!(kernel.free_frames(), free);
        assert_eq!(process.pgfault_handler(), Some(Upcall(second)));
        assert_eq!(process.thisenv().unwrap().pgfault_upcall, Some(Upcall(second)));
    }

    #[test]
    fn inherited_thisenv_is_stale_until_refreshed() {
        let kernel = Kernel::default();
        let parent_id = kernel.create_env().unwrap();
        let parent = Process::new(kernel.env(parent_id));
        let exoabi::Exofork::Parent(child_id) = parent.env().exofork().unwrap() else {
            panic!("exofork returned to the child");
        };

        let mut child = parent.inherit(kernel.env(child_id));
        assert_eq!(child.thisenv().unwrap().id, parent_id);

        let info = child.refresh_thisenv().unwrap();
        assert_eq!(info.id, child_id);
        assert_eq!(child.thisenv().unwrap().id, child_id);
    }

    #[test]
    fn refresh_fails_for_a_destroyed_env() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let mut process = Process::new(kernel.env(id));
        process.env().env_destroy(EnvId::CURRENT).unwrap();
        assert_eq!(process.refresh_thisenv().err(), Some(id));
    }
}
