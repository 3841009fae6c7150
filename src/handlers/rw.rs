//! Coalesces short `read`/`write` transfers into a single result the
//! tracee observes, by replaying the syscall against the remaining buffer
//! until the originally requested length is satisfied (or the kernel
//! reports end-of-file/short-write with a zero-byte transfer).

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::register::{Current, SysArg2, SysArg3, Word};
use crate::registry::GlobalRegistry;
use crate::tracee::TraceeState;

pub struct ReadWriteHandler {
    sysno: i64,
    started: bool,
    original_buf: Word,
    requested: u64,
    accumulated: u64,
}

impl ReadWriteHandler {
    pub fn new(sysno: i64) -> Self {
        ReadWriteHandler {
            sysno,
            started: false,
            original_buf: 0,
            requested: 0,
            accumulated: 0,
        }
    }

    fn is_read(&self) -> bool {
        self.sysno == sc::nr::READ as i64
    }
}

impl SyscallHandler for ReadWriteHandler {
    fn name(&self) -> &'static str {
        "read_write_coalesce"
    }

    fn pre(&mut self, state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        if !self.started {
            self.original_buf = state.registers.get_arg(Current, SysArg2);
            self.requested = state.registers.get_arg(Current, SysArg3) as u64;
            self.accumulated = 0;
            self.started = true;
        }
        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        let result = state.registers.get_result(Current);
        if result < 0 {
            return Ok(PostAction::Done);
        }

        let copied = result as u64;
        self.accumulated += copied;
        state.total_bytes += copied;

        // Either the tracee got everything it asked for, or the kernel
        // returned a zero-byte transfer (EOF on read, or nothing left to
        // flush on write) — either way there is nothing left to retry.
        if self.accumulated >= self.requested || copied == 0 {
            state.registers.set_result(
                self.accumulated as i64,
                "coalescing retried short transfer into one observed result",
            );
            return Ok(PostAction::Done);
        }

        if self.is_read() {
            global.counters.read_retry_events += 1;
        } else {
            global.counters.write_retry_events += 1;
        }
        global.counters.total_replays += 1;

        let next_buf = self.original_buf.wrapping_add(self.accumulated as Word);
        let next_len = self.requested - self.accumulated;
        state
            .registers
            .set_arg(SysArg2, next_buf, "advancing buffer past bytes already transferred");
        state
            .registers
            .set_arg(SysArg3, next_len as Word, "shrinking length to the remaining bytes");

        Ok(PostAction::Replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_handler_identifies_itself_as_a_read() {
        assert!(ReadWriteHandler::new(sc::nr::READ as i64).is_read());
        assert!(!ReadWriteHandler::new(sc::nr::WRITE as i64).is_read());
    }
}
