//! Program entry and exit.

use core::fmt::Display;

use exoabi::{EnvId, UserEnv};

use crate::Process;

/// Runs `umain` as the body of the environment bound to `env`, then exits.
///
/// An error returned by `umain` is reported through [`abort`].
pub fn run<E, F, Err>(env: E, umain: F)
where
    E: UserEnv,
    F: FnOnce(&mut Process<E>) -> Result<(), Err>,
    Err: Display,
{
    let mut process = Process::new(env);
    match umain(&mut process) {
        Ok(()) => exit(&process),
        Err(err) => abort(&process, &err),
    }
}

/// Destroys the calling environment.
pub fn exit<E: UserEnv>(process: &Process<E>) {
    let env = process.env();
    if let Err(err) = env.env_destroy(EnvId::CURRENT) {
        log::warn!("[{}] exit failed: {}", env.getenvid(), err);
    }
}

/// Prints a `user panic` diagnostic to the console and destroys the calling environment.
pub fn abort<E: UserEnv>(process: &Process<E>, err: &dyn Display) {
    let env = process.env();
    let id = env.getenvid();
    env.cputs(&alloc::format!("[{}] user panic: {}\n", id, err));
    log::error!("[{}] user panic: {}", id, err);
    exit(process);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ForkError, Forked, fork};
    use exoabi::{EnvStatus, SysError, Syscalls};
    use exokernel::{Kernel, KernelConfig};

    #[test]
    fn successful_umain_exits() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let env = kernel.schedule(id).unwrap().env;

        run(env, |process| -> Result<(), SysError> {
            process.env().cputs("hello\n");
            Ok(())
        });

        assert!(kernel.env_info(id).is_none());
        assert!(kernel.console().contains("hello"));
        assert!(kernel.console().contains(&format!("[{}] exiting gracefully", id)));
        assert!(!kernel.console().contains("user panic"));
    }

    #[test]
    fn failing_umain_panics_and_exits() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();

        run(kernel.env(id), |_| Err(SysError::NoMemory));

        assert!(
            kernel
                .console()
                .contains(&format!("[{}] user panic: out of memory", id))
        );
        assert_eq!(kernel.env_count(), 0);
    }

    #[test]
    fn failed_fork_is_reported_by_step() {
        let kernel = Kernel::new(KernelConfig {
            max_envs: 1,
            ..KernelConfig::default()
        });
        let id = kernel.create_env().unwrap();

        run(kernel.env(id), |process| fork(process).map(|_| ()));

        assert!(
            kernel
                .console()
                .contains(&format!("[{}] user panic: sys_exofork: out of environments", id))
        );
        assert_eq!(kernel.env_count(), 0);
    }

    #[test]
    fn forking_umain_leaves_a_runnable_child() {
        let kernel = Kernel::default();
        let id = kernel.create_env().unwrap();
        let mut forked = None;

        run(kernel.env(id), |process| -> Result<(), ForkError> {
            forked = Some(fork(process)?);
            Ok(())
        });

        let Some(Forked::Parent(child)) = forked else {
            panic!("fork did not return to the parent");
        };
        assert!(kernel.env_info(id).is_none());
        assert_eq!(kernel.env_info(child).unwrap().status, EnvStatus::Runnable);
    }
}
