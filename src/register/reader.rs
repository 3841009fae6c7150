use crate::errors::Result;
use crate::register::Word;
use libc::c_void;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::mem::{size_of, transmute};

#[cfg(target_pointer_width = "64")]
#[inline]
pub fn word_to_bytes(value: Word) -> [u8; 8] {
    unsafe { transmute(value) }
}

#[cfg(target_pointer_width = "32")]
#[inline]
pub fn word_to_bytes(value: Word) -> [u8; 4] {
    unsafe { transmute(value) }
}

/// Reads a `sizeof::<T>()`-byte record out of a tracee's address space,
/// one word at a time via `PTRACE_PEEKDATA`.
///
/// `T` must be a plain, `Copy` record with no padding invariants that
/// matter (it is filled byte-by-byte from the tracee's raw memory).
pub fn read_record<T: Copy>(pid: Pid, addr: *const Word) -> Result<T> {
    let word_size = size_of::<Word>();
    let record_size = size_of::<T>();
    let mut buf = vec![0u8; record_size];
    let mut copied = 0usize;
    let mut word_index = 0isize;

    while copied < record_size {
        let src = unsafe { (addr as *const u8).offset(word_index * word_size as isize) as *mut c_void };
        let word = ptrace::read(pid, src)? as Word;
        let bytes = word_to_bytes(word);
        let n = std::cmp::min(word_size, record_size - copied);
        buf[copied..copied + n].copy_from_slice(&bytes[..n]);
        copied += n;
        word_index += 1;
    }

    debug_assert_eq!(buf.len(), record_size);
    Ok(unsafe { std::ptr::read(buf.as_ptr() as *const T) })
}

/// Reads `len` bytes out of a tracee's address space starting at `addr`,
/// word-at-a-time. Unlike `read_record`, `len` is a runtime value, for
/// records whose size isn't known until the syscall that produced them
/// returns (e.g. a `getdents64` buffer).
pub fn read_bytes(pid: Pid, addr: *const Word, len: usize) -> Result<Vec<u8>> {
    let word_size = size_of::<Word>();
    let mut buf = vec![0u8; len];
    let mut copied = 0usize;
    let mut word_index = 0isize;

    while copied < len {
        let src = unsafe { (addr as *const u8).offset(word_index * word_size as isize) as *mut c_void };
        let word = ptrace::read(pid, src)? as Word;
        let bytes = word_to_bytes(word);
        let n = std::cmp::min(word_size, len - copied);
        buf[copied..copied + n].copy_from_slice(&bytes[..n]);
        copied += n;
        word_index += 1;
    }

    Ok(buf)
}

/// Reads a NUL-terminated byte string out of a tracee's address space,
/// word-by-word, stopping (without including) the first NUL byte, or once
/// `max_size` bytes have been collected.
pub fn read_cstring(pid: Pid, addr: *const Word, max_size: usize) -> Result<Vec<u8>> {
    let word_size = size_of::<Word>();
    let mut bytes = Vec::with_capacity(max_size.min(256));
    let mut word_index = 0isize;

    loop {
        let src = unsafe { (addr as *const u8).offset(word_index * word_size as isize) as *mut c_void };
        let word = ptrace::read(pid, src)? as Word;
        for &byte in word_to_bytes(word).iter() {
            if byte == 0 {
                bytes.shrink_to_fit();
                return Ok(bytes);
            }
            bytes.push(byte);
            if bytes.len() >= max_size {
                return Ok(bytes);
            }
        }
        word_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_to_bytes_preserves_byte_order() {
        let number: Word = 'h' as u64
            + 'e' as u64 * 256
            + 'l' as u64 * 256 * 256
            + 'l' as u64 * 256 * 256 * 256
            + 'o' as u64 * 256 * 256 * 256 * 256;
        let bytes = word_to_bytes(number);
        assert_eq!(bytes, [b'h', b'e', b'l', b'l', b'o', 0, 0, 0]);
    }
}
