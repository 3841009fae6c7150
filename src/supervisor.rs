//! The supervisor event loop: drives the `ptrace` event stream across an
//! entire process tree, dispatching syscall-stops to handlers and
//! fork/clone/exec/exit events to lifecycle bookkeeping. Grounded in the
//! teacher's `PRoot::event_loop` (`process/proot.rs`) and `EventHandler`
//! (`process/event.rs`), but demultiplexes onto virtualization handlers
//! instead of path-translation ones, and owns the tracee map directly
//! rather than delegating restart decisions to each `Tracee`.

use crate::errors::{Error, ErrorKind, Result};
use crate::handler::PostAction;
use crate::handlers;
use crate::register::{Current, Original, SysArg1, SysArg2, SysArg3, SysArg4, SysArg5};
use crate::registry::GlobalRegistry;
use crate::tracee::{HookPhase, TraceeState};
use libc::{c_int, utsname};
use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::sys::ptrace::{self, Event as PtraceEvent};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use nix::Error as NixError;
use std::collections::HashMap;
use std::convert::TryFrom;

/// `PTRACE_O_*` flags every traced pid is configured with once attached,
/// matching the teacher's `Tracee::set_ptrace_options` default set.
fn trace_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACESYSGOOD
        | ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACEVFORKDONE
        | ptrace::Options::PTRACE_O_TRACECLONE
        | ptrace::Options::PTRACE_O_TRACEEXEC
        | ptrace::Options::PTRACE_O_TRACEEXIT
}

/// Checks `uname().release` for a major.minor >= 4.8, the kernel version
/// that added a dedicated seccomp pre-hook event. Below that, the
/// supervisor must track the enter/exit phase itself via `HookPhase`
/// instead of relying on a separate pre-hook stop (see SPEC_FULL.md
/// §4.6a). In practice both code paths drive the same `HookPhase`
/// toggle, since this crate always resumes via plain `PTRACE_SYSCALL`
/// rather than installing a real seccomp-BPF filter; the flag is kept on
/// the registry to record the detection and for diagnostic logging, not
/// because the event loop branches on it.
pub fn detect_kernel_seccomp_support() -> bool {
    let mut name: utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut name) } != 0 {
        return false;
    }
    let release = unsafe { std::ffi::CStr::from_ptr(name.release.as_ptr()) };
    let release = release.to_string_lossy();
    let mut parts = release.split('.');
    let major: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    major > 4 || (major == 4 && minor >= 8)
}

/// Drives the whole traced process tree to completion.
pub struct Supervisor {
    pub registry: GlobalRegistry,
    tracees: HashMap<Pid, TraceeState>,
    root_pid: Option<Pid>,
    exit_status: i32,
}

impl Supervisor {
    pub fn new(kernel_has_seccomp_pre_event: bool) -> Self {
        Supervisor {
            registry: GlobalRegistry::new(kernel_has_seccomp_pre_event),
            tracees: HashMap::new(),
            root_pid: None,
            exit_status: 0,
        }
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    /// Waits for the root tracee's synchronizing `SIGSTOP` (raised by
    /// `bootstrap::spawn_traced` right after `PTRACE_TRACEME`), installs
    /// tracing options, registers it as the first live thread and its own
    /// thread-group leader, and arms the first syscall-stop.
    pub fn attach_root(&mut self, pid: Pid) -> Result<()> {
        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {}
            other => {
                return Err(Error::msg(format!(
                    "expected the root tracee's synchronizing SIGSTOP, got {:?} instead",
                    other
                ))
                .with_kind(ErrorKind::FatalTracing));
            }
        }

        ptrace::setoptions(pid, trace_options())?;
        self.register_new_tracee(pid, pid);
        self.root_pid = Some(pid);
        ptrace::syscall(pid, None)?;
        Ok(())
    }

    /// Runs the event loop until the live-thread set is empty (property 6
    /// in SPEC_FULL.md §8), then returns the status to report to the shell:
    /// the root tracee's exit code, or 128+signum if it died by signal.
    pub fn run(&mut self) -> i32 {
        while !self.registry.is_empty() {
            let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(NixError::Sys(Errno::ECHILD)) => break,
                Err(err) => {
                    warn!("waitpid failed, ending the run early: {}", err);
                    break;
                }
            };
            self.handle_wait_status(status);
        }
        self.registry.counters.log_summary();
        self.exit_status
    }

    fn handle_wait_status(&mut self, status: WaitStatus) {
        match status {
            WaitStatus::Exited(pid, code) => {
                debug!("{}: exited with status {}", pid, code);
                if Some(pid) == self.root_pid {
                    self.exit_status = code;
                }
                self.retire(pid);
            }
            WaitStatus::Signaled(pid, signal, _core_dumped) => {
                debug!("{}: killed by signal {:?}", pid, signal);
                if Some(pid) == self.root_pid {
                    self.exit_status = 128 + signal as i32;
                }
                self.retire(pid);
            }
            WaitStatus::PtraceSyscall(pid) => {
                self.handle_syscall_stop(pid);
            }
            WaitStatus::PtraceEvent(pid, _signal, raw_event) => {
                self.handle_ptrace_event(pid, raw_event);
                self.resume(pid, None);
            }
            WaitStatus::Stopped(pid, Signal::SIGSTOP) if !self.tracees.contains_key(&pid) => {
                // The synchronizing stop of a just-forked/cloned child,
                // already registered from the parent's matching
                // `PTRACE_EVENT_{FORK,VFORK,CLONE}` stop.
                self.resume(pid, None);
            }
            WaitStatus::Stopped(pid, signal) => {
                // A genuine signal-delivery-stop, unrelated to syscall
                // tracing. Hold the signal so the next resume redelivers it
                // to the tracee instead of swallowing it.
                if let Some(tracee) = self.tracees.get_mut(&pid) {
                    tracee.signal_to_deliver = Some(signal as i32);
                }
                self.resume(pid, None);
            }
            WaitStatus::Continued(pid) => {
                trace!("{}: continued", pid);
            }
            WaitStatus::StillAlive => {}
        }
    }

    /// Pre/post dispatch for one syscall-stop. Uses field-disjoint
    /// destructuring so the active handler (borrowed from `tracees`) can be
    /// called with a simultaneous mutable borrow of `registry`.
    fn handle_syscall_stop(&mut self, pid: Pid) {
        let Supervisor { registry, tracees, .. } = self;

        let tracee = match tracees.get_mut(&pid) {
            Some(tracee) => tracee,
            None => {
                warn!("{}: syscall-stop for an untracked pid, ignoring", pid);
                return;
            }
        };

        if let Err(err) = tracee.registers.fetch() {
            if err.is_tracee_vanished() {
                return;
            }
            warn!("{}: failed to fetch registers: {}", pid, err);
            return;
        }

        match tracee.phase {
            HookPhase::Pre => Self::handle_pre(registry, tracee),
            HookPhase::Post => Self::handle_post(registry, tracee),
        }

        if let Err(err) = tracee.registers.push() {
            if !err.is_tracee_vanished() {
                warn!("{}: failed to push registers: {}", pid, err);
            }
        }

        self.resume(pid, None);
    }

    fn handle_pre(registry: &mut GlobalRegistry, tracee: &mut TraceeState) {
        // A replay or the second half of an injection lands back here with
        // `active_handler` still populated (`drive_post` only clears it on
        // `Done`); its own state machine treats this re-entry as a no-op
        // continuation rather than starting over (see e.g.
        // `UnlinkHandler::pre`'s `Stage` guard and `ReadWriteHandler::pre`'s
        // `started` flag). Only a genuinely fresh syscall - one seen with no
        // handler already in flight - looks one up from scratch.
        if tracee.active_handler.is_none() {
            let sysno = tracee.registers.get_sys_num(Current);
            let args = [
                tracee.registers.get_arg(Current, SysArg1),
                tracee.registers.get_arg(Current, SysArg2),
                tracee.registers.get_arg(Current, SysArg3),
                tracee.registers.get_arg(Current, SysArg4),
                tracee.registers.get_arg(Current, SysArg5),
            ];
            tracee.remember_first_try(sysno, args);
            tracee.active_handler = handlers::for_sysno(sysno);
        }

        tracee.registers.save(Original);

        if let Some(mut handler) = tracee.active_handler.take() {
            match handler.pre(tracee, registry) {
                // The handler touched the call and wants its post-hook run.
                Ok(true) => tracee.active_handler = Some(handler),
                // The handler looked at this call and declined to touch it;
                // the next stop is still this same syscall's ordinary
                // exit-stop, but there's no handler state to drive there, so
                // `handle_post` should treat it as a no-op (see its `None`
                // branch) rather than re-entering this handler.
                Ok(false) => tracee.active_handler = None,
                Err(err) => {
                    warn!("{}: handler {} pre() failed: {}", tracee.pid, handler.name(), err);
                    tracee.active_handler = None;
                }
            }
        }

        tracee.phase = HookPhase::Post;
    }

    fn handle_post(registry: &mut GlobalRegistry, tracee: &mut TraceeState) {
        let handler = match tracee.active_handler.take() {
            Some(handler) => handler,
            None => {
                tracee.phase = HookPhase::Pre;
                return;
            }
        };

        Self::drive_post(registry, tracee, handler);
    }

    /// Runs one handler's `post`, then acts on the `PostAction` it returns.
    /// `Replay` and `Inject` are handled identically at this layer: both
    /// rewind the instruction pointer and flip the phase back to `Pre`
    /// while keeping the same handler instance, so the next syscall-enter
    /// stop naturally re-enters `handle_pre` as a continuation rather than
    /// a fresh dispatch. The only difference between them lives inside
    /// `pre()` (`Inject` additionally substitutes a different syscall
    /// before resuming).
    fn drive_post(registry: &mut GlobalRegistry, tracee: &mut TraceeState, mut handler: Box<dyn crate::handler::SyscallHandler>) {
        match handler.post(tracee, registry) {
            Ok(PostAction::Done) => {
                tracee.active_handler = None;
                tracee.phase = HookPhase::Pre;
            }
            Ok(PostAction::Replay) => {
                // The handler has already adjusted whatever arguments need
                // adjusting (e.g. `ReadWriteHandler` advancing the buffer
                // pointer past bytes already transferred) directly on the
                // live registers; restoring `Original` here would undo
                // that, so only the instruction pointer gets rewound. Any
                // retry accounting is the handler's own responsibility
                // (see `ReadWriteHandler::post`), since only it knows
                // whether this replay is an actual retry or a first
                // attempt at something else.
                tracee.registers.rewind_for_replay();
                tracee.active_handler = Some(handler);
                tracee.phase = HookPhase::Pre;
            }
            Ok(PostAction::Inject { sysno, args }) => {
                registry.counters.total_replays += 1;
                registry.counters.injected_syscalls += 1;
                tracee.registers.restore_from(Original);
                tracee.registers.set_sys_num(sysno, "injecting syscall requested by handler post()");
                tracee.registers.set_arg(SysArg1, args[0], "injected arg1");
                tracee.registers.set_arg(SysArg2, args[1], "injected arg2");
                tracee.registers.set_arg(SysArg3, args[2], "injected arg3");
                tracee.registers.set_arg(SysArg4, args[3], "injected arg4");
                tracee.registers.set_arg(SysArg5, args[4], "injected arg5");
                tracee.registers.rewind_for_replay();
                tracee.active_handler = Some(handler);
                tracee.phase = HookPhase::Pre;
            }
            Err(err) => {
                warn!("{}: handler {} post() failed: {}", tracee.pid, handler.name(), err);
                tracee.active_handler = None;
                tracee.phase = HookPhase::Pre;
            }
        }
    }

    /// Handles a `PTRACE_EVENT_*` stop: fork/vfork/clone register the new
    /// child (whose pid `PTRACE_GETEVENTMSG` reports), execve resets the
    /// tracee's pre/post phase and drops its stale handler and buffered
    /// dirents (see below - a successful execve has no ordinary syscall-exit
    /// stop of its own), exit and seccomp stops are logged only (the former
    /// is redundant with the `Exited`/`Signaled` wait statuses; the latter
    /// never fires since this supervisor never installs a seccomp-BPF
    /// filter).
    fn handle_ptrace_event(&mut self, pid: Pid, raw_event: c_int) {
        if raw_event == PtraceEvent::PTRACE_EVENT_FORK as c_int
            || raw_event == PtraceEvent::PTRACE_EVENT_VFORK as c_int
            || raw_event == PtraceEvent::PTRACE_EVENT_CLONE as c_int
        {
            match ptrace::getevent(pid) {
                Ok(new_pid) => {
                    let child = Pid::from_raw(new_pid as i32);
                    debug!("{}: new child {} ({:?})", pid, child, raw_event);
                    let group = self.registry.thread_group_of(pid).unwrap_or(pid);
                    self.register_new_tracee(child, group);
                }
                Err(err) => warn!("{}: PTRACE_GETEVENTMSG failed: {}", pid, err),
            }
            return;
        }

        if raw_event == PtraceEvent::PTRACE_EVENT_EXEC as c_int {
            trace!("{}: execve event", pid);
            // A successful execve() never reaches an ordinary syscall-exit
            // stop - this event stop is the only notification the kernel
            // ever delivers for it - so nothing will call `drive_post` for
            // the pre-hook `ExecveHandler` this tracee is still holding.
            // Reset its phase and drop that handler here instead, and
            // discard any directory-listing state buffered for fds the new
            // image no longer has, matching what a syscall-exit post-hook
            // would have done had one actually fired.
            if let Some(tracee) = self.tracees.get_mut(&pid) {
                tracee.phase = HookPhase::Pre;
                tracee.active_handler = None;
                tracee.discard_dir_entries();
            }
            return;
        }

        if raw_event == PtraceEvent::PTRACE_EVENT_VFORK_DONE as c_int {
            trace!("{}: vfork done", pid);
            return;
        }

        if raw_event == PtraceEvent::PTRACE_EVENT_EXIT as c_int {
            trace!("{}: pre-exit event", pid);
            return;
        }

        if raw_event == PtraceEvent::PTRACE_EVENT_SECCOMP as c_int {
            trace!("{}: seccomp event", pid);
        }
    }

    fn register_new_tracee(&mut self, pid: Pid, group: Pid) {
        self.tracees.insert(pid, TraceeState::new(pid));
        self.registry.add_thread(pid);
        self.registry.add_thread_group_member(group, pid);
    }

    /// Drops all bookkeeping for a pid that has actually exited (as
    /// opposed to one merely stopped mid-syscall).
    fn retire(&mut self, pid: Pid) {
        self.tracees.remove(&pid);
        self.registry.remove_thread(pid);
        self.registry.remove_thread_group_member(pid);
    }

    /// Resumes a tracee with `PTRACE_SYSCALL`, redelivering any signal that
    /// was held back by a prior signal-delivery-stop.
    fn resume(&mut self, pid: Pid, extra_signal: Option<Signal>) {
        let signal = extra_signal.or_else(|| {
            self.tracees.get_mut(&pid).and_then(|tracee| {
                tracee
                    .signal_to_deliver
                    .take()
                    .and_then(|raw| Signal::try_from(raw).ok())
            })
        });

        if let Err(err) = ptrace::syscall(pid, signal) {
            match err {
                NixError::Sys(Errno::ESRCH) => {}
                err => warn!("{}: failed to resume: {}", pid, err),
            }
        }
    }
}
