use crate::errors::Result;
use crate::register::reader::word_to_bytes;
use crate::register::Word;
use libc::c_void;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::convert::TryInto;
use std::mem::size_of;

/// Writes `data` into a tracee's address space starting at `addr`, one word
/// at a time via `PTRACE_POKEDATA`.
///
/// For every full word this simply pokes the new value. The trailing
/// partial word is handled carefully: the existing word at that address is
/// peeked first, only the leading `data.len() % word_size` bytes are
/// overlaid, and the merged word is poked back — this preserves whatever
/// bytes already sat past the end of `data` (we must not clobber them).
pub fn write_record(pid: Pid, addr: *mut Word, data: &[u8]) -> Result<()> {
    let word_size = size_of::<Word>();
    let full_words = data.len() / word_size;
    let trailing = data.len() % word_size;

    for i in 0..full_words {
        let chunk = &data[i * word_size..(i + 1) * word_size];
        let mut word_bytes = [0u8; 8];
        word_bytes[..word_size].copy_from_slice(chunk);
        let word = Word::from_ne_bytes(word_bytes[..word_size].try_into().unwrap());
        let dest = unsafe { (addr as *mut u8).add(i * word_size) as *mut c_void };
        unsafe { ptrace::write(pid, dest, word as *mut c_void)? };
    }

    if trailing > 0 {
        let dest = unsafe { (addr as *mut u8).add(full_words * word_size) as *mut c_void };
        let existing = ptrace::read(pid, dest)? as Word;
        let mut merged = word_to_bytes(existing);
        let remainder = &data[full_words * word_size..];
        merged[..trailing].copy_from_slice(remainder);
        let merged_word = Word::from_ne_bytes(merged[..word_size].try_into().unwrap());
        unsafe { ptrace::write(pid, dest, merged_word as *mut c_void)? };
    }

    Ok(())
}

/// Writes a `Copy` record into a tracee's address space, by reinterpreting
/// it as bytes and delegating to `write_record`. `T` must have no padding
/// bytes that matter, same caveat as `read_record`.
pub fn write_struct<T: Copy>(pid: Pid, addr: *mut Word, value: &T) -> Result<()> {
    let bytes = unsafe {
        std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>())
    };
    write_record(pid, addr, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_write_uses_only_full_words() {
        // A data length that is an exact multiple of the word size should
        // not touch the trailing-word merge path at all; this is mostly a
        // compile-time/shape check since actually poking memory requires a
        // live tracee (covered by the integration scenarios).
        let word_size = size_of::<Word>();
        assert_eq!(16 % word_size, 0);
    }
}
