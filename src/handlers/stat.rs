//! Deterministic `stat`/`lstat`/`fstat`/`newfstatat`: replaces the real
//! inode number and modification time in the kernel's answer with their
//! virtual stand-ins after the real syscall has already filled in the
//! tracee's buffer.

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::register::{read_record, write_struct, Current, SysArg2, SysArg3, SysArgIndex, Word};
use crate::registry::{virtual_inode_for, virtual_mtime_for, GlobalRegistry};
use crate::tracee::TraceeState;

pub struct StatHandler {
    sysno: i64,
}

impl StatHandler {
    pub fn new(sysno: i64) -> Self {
        StatHandler { sysno }
    }

    /// `newfstatat(dirfd, path, buf, flags)` carries the output buffer in
    /// arg 3; every other member of this family (`stat`, `lstat`, `fstat`)
    /// carries it in arg 2.
    fn buf_arg(&self) -> SysArgIndex {
        if self.sysno == sc::nr::NEWFSTATAT as i64 {
            SysArg3
        } else {
            SysArg2
        }
    }
}

impl SyscallHandler for StatHandler {
    fn name(&self) -> &'static str {
        "stat_family"
    }

    fn pre(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        // No argument rewriting needed; the virtualization happens entirely
        // in the post-hook once the real metadata is known.
        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        let result = state.registers.get_result(Current);
        if result < 0 {
            return Ok(PostAction::Done);
        }

        let buf_addr = state.registers.get_arg(Current, self.buf_arg()) as *const Word;
        let mut record: libc::stat = read_record(state.pid, buf_addr)?;

        let real_inode = record.st_ino;
        record.st_ino = virtual_inode_for(global, real_inode);
        record.st_mtime = virtual_mtime_for(global, real_inode) as libc::time_t;
        record.st_mtime_nsec = 0;

        write_struct(state.pid, buf_addr as *mut Word, &record)?;
        Ok(PostAction::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newfstatat_reads_its_buffer_from_arg3() {
        let handler = StatHandler::new(sc::nr::NEWFSTATAT as i64);
        assert!(matches!(handler.buf_arg(), SysArg3));
    }

    #[test]
    fn plain_stat_reads_its_buffer_from_arg2() {
        let handler = StatHandler::new(sc::nr::STAT as i64);
        assert!(matches!(handler.buf_arg(), SysArg2));
    }
}
