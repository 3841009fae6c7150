//! Deterministic `clock_gettime`/`gettimeofday`/`time`: every call
//! advances the shared logical clock by one tick and reports that reading
//! instead of the real wall/monotonic clock.

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::register::{write_struct, Current, SysArg1, SysArg2, Word};
use crate::registry::GlobalRegistry;
use crate::tracee::TraceeState;

pub struct TimeHandler {
    sysno: i64,
}

impl TimeHandler {
    pub fn new(sysno: i64) -> Self {
        TimeHandler { sysno }
    }
}

impl SyscallHandler for TimeHandler {
    fn name(&self) -> &'static str {
        "logical_time"
    }

    fn pre(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        let result = state.registers.get_result(Current);
        if result < 0 {
            return Ok(PostAction::Done);
        }

        global.counters.time_calls += 1;
        let now = global.advance_clock();

        if self.sysno == sc::nr::CLOCK_GETTIME as i64 {
            let addr = state.registers.get_arg(Current, SysArg2) as *mut Word;
            let ts = libc::timespec {
                tv_sec: now as libc::time_t,
                tv_nsec: 0,
            };
            write_struct(state.pid, addr, &ts)?;
        } else if self.sysno == sc::nr::GETTIMEOFDAY as i64 {
            let addr = state.registers.get_arg(Current, SysArg1) as Word;
            if addr != 0 {
                let tv = libc::timeval {
                    tv_sec: now as libc::time_t,
                    tv_usec: 0,
                };
                write_struct(state.pid, addr as *mut Word, &tv)?;
            }
        } else {
            // time(2): the reading is the return value, and optionally also
            // written to the tracee-supplied pointer if one was given.
            let addr = state.registers.get_arg(Current, SysArg1) as Word;
            if addr != 0 {
                write_struct(state.pid, addr as *mut Word, &(now as libc::time_t))?;
            }
            state
                .registers
                .set_result(now as i64, "reporting the logical clock from time(2)");
        }

        Ok(PostAction::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_for_each_recognized_syscall() {
        for sysno in [sc::nr::CLOCK_GETTIME, sc::nr::GETTIMEOFDAY, sc::nr::TIME] {
            let _ = TimeHandler::new(sysno as i64);
        }
    }
}
