//! Process-wide state shared by every traced pid: the virtualization
//! registries, the live-thread bookkeeping, the shared logical clock, and
//! the event counters. Everything here is mutated from the supervisor
//! thread only (see the concurrency model in SPEC_FULL.md §5), so no
//! synchronization is needed.

use crate::errors::Result;
use crate::mapper::{InodeRegistry, MtimeRegistry};
use log::debug;
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};

/// Logical clock epoch: 1993-08-10T00:00:00Z in Unix seconds. Chosen (as
/// `dettrace` does) to sit comfortably in the past so a traced program never
/// observes a file whose virtual mtime is in the future relative to the
/// wall clock it might also consult.
pub const CLOCK_EPOCH: u64 = 744_847_200;

/// Base id the inode registry assigns its first virtual inode.
pub const INODE_BASE: u64 = 1;

/// How many bytes of `getdents64` output a single tracee state buffers at
/// once before flushing, matching the fixed `dirEntriesBytes` constant.
pub const DIR_ENTRIES_BYTES: usize = 32 * 1024;

/// The nine event counters tracked across the whole run. `devRandomOpens`
/// and `devUrandomOpens` count *opens*, not reads — reconstructing per-fd
/// read lineage is explicitly out of scope for the core (see SPEC_FULL.md
/// §9's open questions).
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub read_retry_events: u32,
    pub write_retry_events: u32,
    pub get_random_calls: u32,
    pub dev_urandom_opens: u32,
    pub dev_random_opens: u32,
    pub time_calls: u32,
    pub blocking_induced_replays: u32,
    pub total_replays: u32,
    pub injected_syscalls: u32,
}

impl Counters {
    pub fn log_summary(&self) {
        debug!(
            "counters: read_retry={} write_retry={} get_random={} urandom_opens={} random_opens={} \
             time_calls={} blocking_replays={} total_replays={} injected={}",
            self.read_retry_events,
            self.write_retry_events,
            self.get_random_calls,
            self.dev_urandom_opens,
            self.dev_random_opens,
            self.time_calls,
            self.blocking_induced_replays,
            self.total_replays,
            self.injected_syscalls,
        );
    }
}

/// Process-wide registry, owned by the supervisor and passed by mutable
/// reference into every handler call.
#[derive(Debug)]
pub struct GlobalRegistry {
    pub inodes: InodeRegistry,
    pub mtimes: MtimeRegistry,
    live_threads: HashSet<Pid>,
    thread_groups: HashMap<Pid, HashSet<Pid>>,
    thread_group_of: HashMap<Pid, Pid>,
    pub counters: Counters,
    clock: u64,
    /// Whether the running kernel reports a dedicated seccomp pre-hook
    /// event (>= 4.8) or requires the supervisor to track enter/exit phase
    /// itself via `TraceeState::is_pre_exit`.
    pub kernel_has_seccomp_pre_event: bool,
}

impl GlobalRegistry {
    pub fn new(kernel_has_seccomp_pre_event: bool) -> Self {
        GlobalRegistry {
            inodes: InodeRegistry::new(INODE_BASE),
            mtimes: MtimeRegistry::new(),
            live_threads: HashSet::new(),
            thread_groups: HashMap::new(),
            thread_group_of: HashMap::new(),
            counters: Counters::default(),
            clock: CLOCK_EPOCH,
            kernel_has_seccomp_pre_event,
        }
    }

    /// Advances the shared logical clock by one tick and returns the new
    /// reading. Called exactly once per time-observing syscall, regardless
    /// of which tracee observed it, so that forked lineages share a single
    /// consistent timeline (see SPEC_FULL.md §9's resolved open question).
    pub fn advance_clock(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn logical_time(&self) -> u64 {
        self.clock
    }

    /// Overrides the logical clock's starting point, used by the `--clock-base`
    /// CLI flag so a test harness can pin down what the tracee observes
    /// without waiting for `CLOCK_EPOCH` ticks to roll over.
    pub fn set_logical_clock(&mut self, base: u64) {
        self.clock = base;
    }

    pub fn add_thread(&mut self, pid: Pid) {
        self.live_threads.insert(pid);
    }

    pub fn remove_thread(&mut self, pid: Pid) {
        self.live_threads.remove(&pid);
    }

    pub fn is_thread_live(&self, pid: Pid) -> bool {
        self.live_threads.contains(&pid)
    }

    pub fn live_thread_count(&self) -> usize {
        self.live_threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live_threads.is_empty()
    }

    /// Adds `pid` as a member of `group`'s thread group, creating the group
    /// (with its own `(group, group)` self-edge) if this is the first
    /// member. Keeps the reverse index in lockstep.
    pub fn add_thread_group_member(&mut self, group: Pid, pid: Pid) {
        self.thread_groups.entry(group).or_insert_with(|| {
            let mut set = HashSet::new();
            set.insert(group);
            set
        });
        self.thread_groups.get_mut(&group).unwrap().insert(pid);
        self.thread_group_of.insert(pid, group);
    }

    /// Removes `pid` from whichever thread group it belongs to. Erases the
    /// group entirely once its last member leaves.
    pub fn remove_thread_group_member(&mut self, pid: Pid) {
        if let Some(group) = self.thread_group_of.remove(&pid) {
            if let Some(members) = self.thread_groups.get_mut(&group) {
                members.remove(&pid);
                if members.is_empty() {
                    self.thread_groups.remove(&group);
                }
            }
        }
    }

    pub fn thread_group_of(&self, pid: Pid) -> Option<Pid> {
        self.thread_group_of.get(&pid).copied()
    }

    pub fn thread_group_members(&self, group: Pid) -> Option<&HashSet<Pid>> {
        self.thread_groups.get(&group)
    }

    /// Invariant check used by property tests: the multimap and the reverse
    /// index never disagree about membership.
    #[cfg(test)]
    pub fn thread_groups_consistent(&self) -> bool {
        for (pid, group) in &self.thread_group_of {
            match self.thread_groups.get(group) {
                Some(members) if members.contains(pid) => {}
                _ => return false,
            }
        }
        for (group, members) in &self.thread_groups {
            for pid in members {
                if self.thread_group_of.get(pid) != Some(group) {
                    return false;
                }
            }
        }
        true
    }
}

/// Virtualizes a real inode into its deterministic stand-in, assigning one
/// if this is the first sighting. Small free function rather than a method
/// so handlers can call it without importing `InodeRegistry` directly.
pub fn virtual_inode_for(registry: &mut GlobalRegistry, real_inode: u64) -> u64 {
    registry.inodes.add_real(real_inode)
}

/// Virtualizes a real inode's mtime, stamping it with the current logical
/// time on first sighting and leaving it unchanged afterwards.
pub fn virtual_mtime_for(registry: &mut GlobalRegistry, real_inode: u64) -> u64 {
    let now = registry.logical_time();
    registry.mtimes.observe(real_inode, now)
}

pub fn lookup_real_inode(registry: &GlobalRegistry, virtual_inode: u64) -> Result<u64> {
    registry.inodes.get_real(virtual_inode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_is_empty_and_terminates() {
        let registry = GlobalRegistry::new(true);
        assert!(registry.is_empty());
    }

    #[test]
    fn thread_lifecycle_tracks_liveness() {
        let mut registry = GlobalRegistry::new(true);
        let pid = Pid::from_raw(100);
        registry.add_thread(pid);
        assert!(!registry.is_empty());
        assert!(registry.is_thread_live(pid));
        registry.remove_thread(pid);
        assert!(registry.is_empty());
    }

    #[test]
    fn thread_group_self_edge_always_present_while_nonempty() {
        let mut registry = GlobalRegistry::new(true);
        let group = Pid::from_raw(10);
        registry.add_thread_group_member(group, group);
        assert!(registry.thread_group_members(group).unwrap().contains(&group));

        let child = Pid::from_raw(11);
        registry.add_thread_group_member(group, child);
        assert_eq!(registry.thread_group_of(child), Some(group));
        assert!(registry.thread_groups_consistent());
    }

    #[test]
    fn thread_group_erased_when_last_member_leaves() {
        let mut registry = GlobalRegistry::new(true);
        let group = Pid::from_raw(20);
        registry.add_thread_group_member(group, group);
        registry.remove_thread_group_member(group);
        assert!(registry.thread_group_members(group).is_none());
        assert!(registry.thread_groups_consistent());
    }

    #[test]
    fn logical_clock_is_monotonic_and_shared() {
        let mut registry = GlobalRegistry::new(true);
        let t0 = registry.logical_time();
        let t1 = registry.advance_clock();
        let t2 = registry.advance_clock();
        assert!(t1 > t0);
        assert!(t2 > t1);
    }

    #[test]
    fn virtual_inode_helper_assigns_dense_ids() {
        let mut registry = GlobalRegistry::new(true);
        assert_eq!(virtual_inode_for(&mut registry, 42), 1);
        assert_eq!(virtual_inode_for(&mut registry, 42), 1);
        assert_eq!(virtual_inode_for(&mut registry, 99), 2);
        assert_eq!(lookup_real_inode(&registry, 2).unwrap(), 99);
    }
}
