//! Factory mapping a syscall number to the handler that virtualizes it,
//! grouped by virtualization concern (stat-like, read/write, random,
//! getdents, time, lifecycle) the way the teacher's `kernel::groups`
//! groups its own standard syscalls by path-translation shape.

mod getdents;
mod lifecycle;
mod random;
mod rw;
mod stat;
mod time;
mod unlink;

use crate::handler::SyscallHandler;

/// Builds the handler for `sysno`, or `None` if this catalog has no
/// virtualization for it (the supervisor then resumes the tracee without
/// any pre/post interposition).
pub fn for_sysno(sysno: i64) -> Option<Box<dyn SyscallHandler>> {
    if sysno == sc::nr::STAT as i64
        || sysno == sc::nr::LSTAT as i64
        || sysno == sc::nr::FSTAT as i64
        || sysno == sc::nr::NEWFSTATAT as i64
    {
        return Some(Box::new(stat::StatHandler::new(sysno)));
    }

    if sysno == sc::nr::READ as i64 || sysno == sc::nr::WRITE as i64 {
        return Some(Box::new(rw::ReadWriteHandler::new(sysno)));
    }

    if sysno == sc::nr::GETRANDOM as i64 {
        return Some(Box::new(random::GetRandomHandler::new()));
    }

    if sysno == sc::nr::OPEN as i64 || sysno == sc::nr::OPENAT as i64 {
        return Some(Box::new(random::OpenHandler::new(sysno)));
    }

    if sysno == sc::nr::GETDENTS64 as i64 {
        return Some(Box::new(getdents::GetDentsHandler::new(sysno)));
    }

    if sysno == sc::nr::CLOCK_GETTIME as i64
        || sysno == sc::nr::GETTIMEOFDAY as i64
        || sysno == sc::nr::TIME as i64
    {
        return Some(Box::new(time::TimeHandler::new(sysno)));
    }

    if sysno == sc::nr::UNLINK as i64 || sysno == sc::nr::UNLINKAT as i64 {
        return Some(Box::new(unlink::UnlinkHandler::new(sysno)));
    }

    if sysno == sc::nr::EXECVE as i64 {
        return Some(Box::new(lifecycle::ExecveHandler::new()));
    }

    None
}
