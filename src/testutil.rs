//! Test-only harness for driving a real traced child process through a
//! full `Supervisor`. Adapted from the teacher's `utils::tests::fork_test`:
//! fork a real child (here, one running an arbitrary in-process closure
//! rather than `execvp`-ing a binary), `PTRACE_TRACEME` + `SIGSTOP`
//! synchronize it, then let a `Supervisor` run it to completion.
//!
//! `test_in_subprocess` mirrors the teacher's helper of the same intent:
//! isolating each test's child process tree from the test runner's own
//! process so a crash or hang in one test can't wedge another.

#![cfg(test)]

use crate::supervisor::Supervisor;
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult};

/// Runs `body` in a forked subprocess and waits for it to exit cleanly,
/// so a test's own child processes never leak into the test runner.
pub fn test_in_subprocess<F: FnOnce()>(body: F) {
    match unsafe { fork() }.expect("fork for test isolation") {
        ForkResult::Child => {
            body();
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            assert_eq!(waitpid(child, None), Ok(WaitStatus::Exited(child, 0)));
        }
    }
}

/// Forks a traced child that runs `child_body`, then drives it to
/// completion with a fresh `Supervisor`. Returns the supervisor so its
/// registry (counters, inode/mtime mappings) can be inspected by the
/// caller after the run.
pub fn run_under_supervisor<F: FnOnce()>(child_body: F) -> Supervisor {
    match unsafe { fork() }.expect("fork traced child") {
        ForkResult::Child => {
            ptrace::traceme().expect("test ptrace traceme");
            kill(getpid(), Signal::SIGSTOP).expect("test child sigstop");
            child_body();
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            let mut supervisor = Supervisor::new(crate::supervisor::detect_kernel_seccomp_support());
            supervisor.attach_root(child).expect("attach to test child");
            supervisor.run();
            supervisor
        }
    }
}
