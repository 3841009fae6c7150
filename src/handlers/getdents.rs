//! Stable `getdents64` ordering: real directory iteration order depends on
//! on-disk layout, which varies run to run. Entries are virtualized,
//! accumulated per-fd, sorted by name, and re-emitted from that stable
//! order rather than handed straight back to the tracee.

use crate::errors::Result;
use crate::handler::{PostAction, SyscallHandler};
use crate::register::{read_bytes, write_record, Current, SysArg1, SysArg2, SysArg3, Word};
use crate::registry::{virtual_inode_for, GlobalRegistry};
use crate::tracee::TraceeState;
use crate::wire::{encode_dirents, parse_dirents, DirEntry};
use std::os::unix::io::RawFd;

pub struct GetDentsHandler;

impl GetDentsHandler {
    pub fn new(_sysno: i64) -> Self {
        GetDentsHandler
    }
}

impl SyscallHandler for GetDentsHandler {
    fn name(&self) -> &'static str {
        "getdents64_stable_order"
    }

    fn pre(&mut self, _state: &mut TraceeState, _global: &mut GlobalRegistry) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, state: &mut TraceeState, global: &mut GlobalRegistry) -> Result<PostAction> {
        let result = state.registers.get_result(Current);
        if result < 0 {
            return Ok(PostAction::Done);
        }

        let fd = state.registers.get_arg(Current, SysArg1) as RawFd;
        let buf_addr = state.registers.get_arg(Current, SysArg2) as *const Word;
        let buf_len = state.registers.get_arg(Current, SysArg3) as usize;
        let pid = state.pid;

        if result > 0 {
            let raw = read_bytes(pid, buf_addr, result as usize)?;
            let mut fresh = parse_dirents(&raw);
            for entry in fresh.iter_mut() {
                entry.ino = virtual_inode_for(global, entry.ino);
            }

            let bucket = state.buffered_dirents_for(fd);
            let mut combined: Vec<DirEntry> = bucket.entries.drain(..).collect();
            combined.extend(fresh.drain(..));
            combined.sort_by(|a, b| a.name.cmp(&b.name));
            bucket.bytes_buffered = combined.iter().map(DirEntry::wire_len).sum();
            bucket.entries.extend(combined);
        }

        let bucket = state.buffered_dirents_for(fd);
        let mut to_emit = Vec::new();
        let mut emitted_len = 0usize;
        while let Some(front) = bucket.entries.front() {
            let len = front.wire_len();
            if emitted_len + len > buf_len {
                break;
            }
            emitted_len += len;
            to_emit.push(bucket.entries.pop_front().expect("front just peeked"));
        }
        bucket.bytes_buffered = bucket.bytes_buffered.saturating_sub(emitted_len);

        let encoded = encode_dirents(&to_emit);
        if !encoded.is_empty() {
            write_record(pid, buf_addr as *mut Word, &encoded)?;
        }

        // Always override the result, even when `to_emit` is empty (e.g. the
        // tracee shrank its buffer between calls so nothing buffered fits
        // this time): the kernel already wrote its own, real-inode,
        // on-disk-ordered bytes straight into the tracee's buffer, and those
        // must never reach the tracee un-virtualized. Reporting 0 here is
        // correct either way - it's the real end-of-directory case, or this
        // call simply contributed nothing this round and the tracee will
        // ask again with more room.
        let bucket_now_empty = bucket.entries.is_empty();

        state.registers.set_result(
            encoded.len() as i64,
            "replacing on-disk-ordered dirents with the stable, virtualized batch",
        );

        if bucket_now_empty {
            state.close_dirents_for(fd);
        }

        Ok(PostAction::Done)
    }
}
