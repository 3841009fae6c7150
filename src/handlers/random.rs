//! Determinism for randomness sources: `getrandom` has its output
//! overwritten with a reproducible byte stream, while `open`/`openat` of
//! `/dev/urandom` and `/dev/random` are only counted, not virtualized —
//! the same documented limitation the mtime registry carries, preserved
//! rather than worked around (see the registry module's counters).

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::register::{read_cstring, write_record, Current, SysArg1, SysArg2, Word};
use crate::registry::GlobalRegistry;
use crate::tracee::TraceeState;

const MAX_PATH_LEN: usize = 4096;

/// A small xorshift64* stream seeded from the call index, not cryptographic
/// randomness: the point is that two runs of the same program produce the
/// same bytes, not that the bytes are unpredictable.
fn deterministic_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

pub struct GetRandomHandler;

impl GetRandomHandler {
    pub fn new() -> Self {
        GetRandomHandler
    }
}

impl SyscallHandler for GetRandomHandler {
    fn name(&self) -> &'static str {
        "getrandom"
    }

    fn pre(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        let result = state.registers.get_result(Current);
        if result < 0 {
            return Ok(PostAction::Done);
        }

        let seed = global.counters.get_random_calls as u64;
        global.counters.get_random_calls += 1;

        let buf_addr = state.registers.get_arg(Current, SysArg1) as *mut Word;
        let bytes = deterministic_bytes(seed, result as usize);
        write_record(state.pid, buf_addr, &bytes)?;

        Ok(PostAction::Done)
    }
}

/// `open`/`openat` pass through untouched; this handler only watches for
/// the two device paths it cares about so the run's event counters stay
/// accurate.
pub struct OpenHandler {
    sysno: i64,
}

impl OpenHandler {
    pub fn new(sysno: i64) -> Self {
        OpenHandler { sysno }
    }

    fn path_arg(&self) -> crate::register::SysArgIndex {
        if self.sysno == sc::nr::OPENAT as i64 {
            SysArg2
        } else {
            SysArg1
        }
    }
}

impl SyscallHandler for OpenHandler {
    fn name(&self) -> &'static str {
        "open_random_device_watch"
    }

    fn pre(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        let result = state.registers.get_result(Current);
        if result < 0 {
            return Ok(PostAction::Done);
        }

        let path_addr = state.registers.get_arg(Current, self.path_arg()) as *const Word;
        let path = read_cstring(state.pid, path_addr, MAX_PATH_LEN)?;

        if path == b"/dev/urandom" {
            global.counters.dev_urandom_opens += 1;
        } else if path == b"/dev/random" {
            global.counters.dev_random_opens += 1;
        }

        Ok(PostAction::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_bytes_are_stable_for_a_fixed_seed() {
        let a = deterministic_bytes(7, 16);
        let b = deterministic_bytes(7, 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn deterministic_bytes_differ_across_seeds() {
        let a = deterministic_bytes(1, 16);
        let b = deterministic_bytes(2, 16);
        assert_ne!(a, b);
    }

    #[test]
    fn openat_reads_its_path_from_arg2() {
        let handler = OpenHandler::new(sc::nr::OPENAT as i64);
        assert!(matches!(handler.path_arg(), SysArg2));
    }
}
