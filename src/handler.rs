//! The per-syscall handler abstraction: one small trait object per
//! syscall number that knows how to make that syscall's outcome
//! deterministic, dispatched from a factory the way the kernel module
//! dispatches syscall groups to their translators.

use crate::errors::Result;
use crate::register::Word;
use crate::registry::GlobalRegistry;
use crate::tracee::TraceeState;

/// What the supervisor should do with the tracee after a handler's `post`
/// has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    /// Nothing more to do; resume the tracee normally.
    Done,
    /// Rewind the instruction pointer and let the same syscall run again
    /// (used for short reads/writes and EINTR-style retries).
    Replay,
    /// Replace the pending syscall with a different one before resuming,
    /// then replay the original once the injected call's result has been
    /// consumed (used to stat a file being deleted before the kernel
    /// actually removes its inode).
    Inject { sysno: i64, args: [Word; 6] },
}

/// A deterministic treatment for one syscall (or small family of syscall
/// numbers, e.g. `stat`/`lstat`/`fstat`/`newfstatat`).
///
/// `pre` runs at the seccomp pre-hook (or, on older kernels, the sysenter
/// stop) and may rewrite arguments in place. Returning `Ok(false)` tells the
/// supervisor this handler declined to touch the call (it looked at the
/// arguments and decided they don't need virtualization this time); `pre`
/// is otherwise assumed to always resume the tracee itself via the
/// registers it was given.
///
/// `post` runs once the syscall has actually returned and may rewrite the
/// result or tracee memory, then tells the supervisor what to do next via
/// `PostAction`.
pub trait SyscallHandler {
    fn name(&self) -> &'static str;

    fn pre(
        &mut self,
        state: &mut TraceeState,
        global: &mut GlobalRegistry,
    ) -> Result<bool>;

    fn post(
        &mut self,
        state: &mut TraceeState,
        global: &mut GlobalRegistry,
    ) -> Result<PostAction>;
}
