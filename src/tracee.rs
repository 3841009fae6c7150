//! Per-tracee state: the bookkeeping the supervisor keeps for one traced
//! pid between the pre-hook and post-hook halves of a syscall, and across
//! syscalls for the handful of things that outlive a single one (buffered
//! directory entries, an fd slated for deletion).

use crate::handler::SyscallHandler;
use crate::register::Registers;
use crate::registry::DIR_ENTRIES_BYTES;
use crate::wire::DirEntry;
use nix::unistd::Pid;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;

/// Where a tracee sits relative to the current syscall, mirroring
/// `TraceeStatus` in spirit but split on the pre/post-hook boundary rather
/// than enter/exit, since this supervisor's event source is seccomp rather
/// than `PTRACE_SYSCALL` sysenter/sysexit pairs on kernels that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Waiting for the seccomp pre-hook (or, pre-4.8, for the first of the
    /// enter/exit pair) of the next syscall.
    Pre,
    /// Pre-hook has run; waiting for the syscall's real exit.
    Post,
}

/// One buffered `getdents64` batch: the virtualized entries not yet handed
/// back to the tracee, and how many bytes of the original buffer they
/// consumed (bounded by `DIR_ENTRIES_BYTES`).
#[derive(Debug, Default)]
pub struct BufferedDirents {
    pub entries: VecDeque<DirEntry>,
    pub bytes_buffered: usize,
}

impl BufferedDirents {
    pub fn has_room(&self) -> bool {
        self.bytes_buffered < DIR_ENTRIES_BYTES
    }
}

/// Everything the supervisor tracks for a single traced pid across its
/// lifetime. Not `Debug`: `active_handler` is a trait object and handler
/// implementations carry no useful debug representation.
pub struct TraceeState {
    pub pid: Pid,
    pub phase: HookPhase,
    /// Set on kernels without a native seccomp pre-hook event (< 4.8): true
    /// between the enter stop and the matching exit stop.
    pub is_pre_exit: bool,
    /// A signal the supervisor owes the tracee on its next restart (e.g. one
    /// that arrived mid-syscall and was held back).
    pub signal_to_deliver: Option<i32>,
    /// Real inode of a file this tracee has `unlink`-ed but whose mtime/inode
    /// mapping must survive until the matching registry cleanup runs.
    pub inode_to_delete: Option<u64>,
    pub registers: Registers,
    /// The syscall number and first five arguments as observed at the most
    /// recent pre-hook, kept so the post-hook can tell a replay from a fresh
    /// call.
    pub first_try_sysno: Option<i64>,
    pub first_try_args: [u64; 5],
    /// Whether the in-flight syscall was substituted by a handler (its
    /// number or arguments differ from what the tracee originally asked
    /// for).
    pub syscall_injected: bool,
    /// Running total of bytes this tracee has moved via retried read/write
    /// syscalls, used only for debug logging.
    pub total_bytes: u64,
    /// Buffered, not-yet-delivered `getdents64` output, keyed by the
    /// directory fd it came from.
    pub dir_entries: HashMap<RawFd, BufferedDirents>,
    /// The handler instantiated at this syscall's pre-hook, carried forward
    /// so the matching post-hook resumes the same state machine rather than
    /// looking the syscall number up again (a different event from an
    /// unrelated pid may arrive in between).
    pub active_handler: Option<Box<dyn SyscallHandler>>,
}

impl TraceeState {
    pub fn new(pid: Pid) -> Self {
        TraceeState {
            pid,
            phase: HookPhase::Pre,
            is_pre_exit: false,
            signal_to_deliver: None,
            inode_to_delete: None,
            registers: Registers::new(pid),
            first_try_sysno: None,
            first_try_args: [0; 5],
            syscall_injected: false,
            total_bytes: 0,
            dir_entries: HashMap::new(),
            active_handler: None,
        }
    }

    /// Records the syscall this tracee is about to attempt, so a later
    /// post-hook can recognize a replay of the same call.
    pub fn remember_first_try(&mut self, sysno: i64, args: [u64; 5]) {
        self.first_try_sysno = Some(sysno);
        self.first_try_args = args;
        self.syscall_injected = false;
    }

    pub fn is_replay_of(&self, sysno: i64, args: &[u64; 5]) -> bool {
        self.first_try_sysno == Some(sysno) && &self.first_try_args == args
    }

    /// Drops all buffered directory state for this tracee, matching the
    /// spec's requirement that an `execve` discards any in-flight
    /// `getdents64` buffering rather than leaking it into the new image.
    pub fn discard_dir_entries(&mut self) {
        self.dir_entries.clear();
    }

    pub fn buffered_dirents_for(&mut self, fd: RawFd) -> &mut BufferedDirents {
        self.dir_entries.entry(fd).or_insert_with(BufferedDirents::default)
    }

    pub fn close_dirents_for(&mut self, fd: RawFd) {
        self.dir_entries.remove(&fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_starts_in_pre_phase() {
        let state = TraceeState::new(Pid::from_raw(1));
        assert_eq!(state.phase, HookPhase::Pre);
        assert!(state.inode_to_delete.is_none());
    }

    #[test]
    fn replay_detection_matches_sysno_and_args() {
        let mut state = TraceeState::new(Pid::from_raw(1));
        state.remember_first_try(0, [3, 0, 100, 0, 0]);
        assert!(state.is_replay_of(0, &[3, 0, 100, 0, 0]));
        assert!(!state.is_replay_of(0, &[3, 0, 50, 0, 0]));
        assert!(!state.is_replay_of(1, &[3, 0, 100, 0, 0]));
    }

    #[test]
    fn exec_discards_buffered_dirents() {
        let mut state = TraceeState::new(Pid::from_raw(1));
        state.buffered_dirents_for(4).entries.push_back(DirEntry {
            ino: 1,
            off: 1,
            d_type: 4,
            name: b"a".to_vec(),
        });
        assert!(!state.dir_entries.is_empty());
        state.discard_dir_entries();
        assert!(state.dir_entries.is_empty());
    }
}
