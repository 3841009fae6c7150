//! Doomed-inode capture for `unlink`/`unlinkat`: the registries need the
//! real inode of the file being removed so they can erase it, but by the
//! time the real unlink's post-hook runs the inode no longer resolves to
//! anything. This handler substitutes an `lstat` for the first pass,
//! reads the inode out of a scratch buffer below the tracee's stack, then
//! injects the real unlink for a second pass before finishing.

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::register::{
    read_record, Current, StackPointer, SysArg1, SysArg2, SysArg3, SysArg4, SysArg5, SysArgIndex,
    Word,
};
use crate::registry::GlobalRegistry;
use crate::tracee::TraceeState;

/// Bytes below the stack pointer borrowed as scratch space for the
/// injected `lstat`'s output buffer; clears the x86_64 SysV red zone (128
/// bytes) with room to spare for `libc::stat`.
const SCRATCH_OFFSET: Word = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    CapturingInode,
    RunningRealUnlink,
    Done,
}

pub struct UnlinkHandler {
    sysno: i64,
    stage: Stage,
    scratch_addr: Word,
    real_sysno: i64,
    real_args: [Word; 6],
}

impl UnlinkHandler {
    pub fn new(sysno: i64) -> Self {
        UnlinkHandler {
            sysno,
            stage: Stage::CapturingInode,
            scratch_addr: 0,
            real_sysno: sysno,
            real_args: [0; 6],
        }
    }

    fn path_arg(&self) -> SysArgIndex {
        if self.sysno == sc::nr::UNLINKAT as i64 {
            SysArg2
        } else {
            SysArg1
        }
    }
}

impl SyscallHandler for UnlinkHandler {
    fn name(&self) -> &'static str {
        "unlink_doomed_inode_capture"
    }

    fn pre(&mut self, state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        if self.stage != Stage::CapturingInode {
            return Ok(true);
        }

        let path_ptr = state.registers.get_arg(Current, self.path_arg());
        self.real_sysno = state.registers.get_sys_num(Current);
        self.real_args = [
            state.registers.get_arg(Current, SysArg1),
            state.registers.get_arg(Current, SysArg2),
            state.registers.get_arg(Current, SysArg3),
            state.registers.get_arg(Current, SysArg4),
            state.registers.get_arg(Current, SysArg5),
            0,
        ];
        self.scratch_addr = state
            .registers
            .get(Current, StackPointer)
            .wrapping_sub(SCRATCH_OFFSET);

        state
            .registers
            .set_sys_num(sc::nr::LSTAT as i64, "substituting lstat to capture the doomed inode");
        state.registers.set_arg(SysArg1, path_ptr, "lstat path argument");
        state
            .registers
            .set_arg(SysArg2, self.scratch_addr, "scratch stat buffer below the red zone");

        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        match self.stage {
            Stage::CapturingInode => {
                let result = state.registers.get_result(Current);
                if result == 0 {
                    let record: libc::stat = read_record(state.pid, self.scratch_addr as *const Word)?;
                    state.inode_to_delete = Some(record.st_ino);
                }
                self.stage = Stage::RunningRealUnlink;
                Ok(PostAction::Inject {
                    sysno: self.real_sysno,
                    args: self.real_args,
                })
            }
            Stage::RunningRealUnlink => {
                let result = state.registers.get_result(Current);
                if result == 0 {
                    if let Some(real_inode) = state.inode_to_delete.take() {
                        let _ = global.inodes.erase_real(real_inode);
                        let _ = global.mtimes.erase_real(real_inode);
                    }
                }
                self.stage = Stage::Done;
                Ok(PostAction::Done)
            }
            Stage::Done => Ok(PostAction::Done),
        }
    }
}
