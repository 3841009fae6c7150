//! `execve` bookkeeping. A successful exec is reported as a
//! `PTRACE_EVENT_EXEC` stop rather than an ordinary syscall-exit, so the
//! supervisor's event loop (not this handler's `post`) is what resets phase
//! and discards directory-listing state buffered for fds the new image no
//! longer has; this handler only covers the *failed*-execve case, which does
//! return through a normal post-hook. Fork/clone/vfork/exit lifecycle
//! (spawning and retiring per-tracee state, live-thread/thread-group
//! membership) is likewise driven directly by the supervisor's event loop
//! rather than a syscall handler.

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::registry::GlobalRegistry;
use crate::tracee::TraceeState;

pub struct ExecveHandler;

impl ExecveHandler {
    pub fn new() -> Self {
        ExecveHandler
    }
}

impl SyscallHandler for ExecveHandler {
    fn name(&self) -> &'static str {
        "execve_dirents_reset"
    }

    fn pre(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<PostAction> {
        // A successful execve() never reaches this post-hook at all: the
        // kernel reports it as a `PTRACE_EVENT_EXEC` stop instead of an
        // ordinary syscall-exit, and the supervisor resets phase/handler and
        // discards buffered dirents directly from that event (see
        // `Supervisor::handle_ptrace_event`). The only way `post` runs here
        // is a *failed* execve (e.g. ENOENT), which does return through the
        // normal syscall-exit path with the old image, and its fds, still
        // intact - so there's nothing to discard.
        Ok(PostAction::Done)
    }
}
