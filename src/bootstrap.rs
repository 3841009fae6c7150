//! Child-side process creation: fork, declare the child traceable, and
//! exec the user's command. Grounded in the teacher's
//! `PRoot::launch_process` (`process/proot.rs`), minus the mount-namespace
//! and chroot setup that function never itself performed beyond a `//TODO`
//! comment - that scaffolding is out of scope here (SPEC_FULL.md §1).

use crate::errors::{Error, Result};
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execvp, fork, getpid, ForkResult, Pid};
use std::ffi::CString;

/// Forks and, in the child, declares itself traceable, raises `SIGSTOP` to
/// synchronize with the parent's `attach_root` (which needs to observe
/// that stop before installing ptrace options), then execs `command` with
/// `args`. Returns the child's pid to the parent; never returns in the
/// child (a successful `execvp` replaces its image, and a failed one is
/// reported via `Error` before the child aborts the process).
pub fn spawn_traced(command: &str, args: &[String]) -> Result<Pid> {
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            if let Err(err) = run_child(command, args) {
                eprintln!("failed to start traced command {:?}: {}", command, err);
                std::process::exit(127);
            }
            unreachable!("execvp does not return on success");
        }
    }
}

fn run_child(command: &str, args: &[String]) -> Result<()> {
    ptrace::traceme()?;
    kill(getpid(), Signal::SIGSTOP)?;

    let program = CString::new(command).map_err(|err| Error::msg(err))?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program.clone());
    for arg in args {
        argv.push(CString::new(arg.as_str()).map_err(|err| Error::msg(err))?);
    }

    execvp(&program, &argv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};

    #[test]
    fn spawn_traced_stops_the_child_before_exec() {
        let pid = spawn_traced("true", &[]).expect("fork succeeds");
        match waitpid(pid, None).expect("waitpid on the synchronizing stop") {
            WaitStatus::Stopped(stopped_pid, Signal::SIGSTOP) => {
                assert_eq!(stopped_pid, pid);
            }
            other => panic!("expected a synchronizing SIGSTOP, got {:?}", other),
        }
        kill(pid, Signal::SIGKILL).expect("clean up the stopped child");
        let _ = waitpid(pid, None);
    }
}
