//! The one wire format the core touches directly: `getdents64`'s
//! `linux_dirent64` records, as read back from a tracee's buffer so their
//! `d_ino` field can be rewritten to a virtual inode before the buffer is
//! written back.

use std::convert::TryInto;

/// Fixed portion of `struct linux_dirent64` (see `<linux/dirent.h>`):
/// `u64 d_ino; i64 d_off; u16 d_reclen; u8 d_type;`, followed by a
/// variable-length NUL-terminated `d_name`. Little-endian, packed, no
/// padding between fields (the kernel writes it that way).
const HEADER_LEN: usize = 8 + 8 + 2 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub off: i64,
    pub d_type: u8,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// Total on-wire length of this entry once re-encoded, rounded the way
    /// the kernel rounds `d_reclen` (up to 8-byte alignment).
    fn reclen(&self) -> u16 {
        let raw = HEADER_LEN + self.name.len() + 1; // +1 for the NUL
        let aligned = (raw + 7) & !7;
        aligned as u16
    }

    /// Public byte-count view of `reclen`, used by buffering logic that
    /// needs to know how much room an entry will take before encoding it.
    pub fn wire_len(&self) -> usize {
        self.reclen() as usize
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let reclen = self.reclen() as usize;
        out.extend_from_slice(&self.ino.to_le_bytes());
        out.extend_from_slice(&self.off.to_le_bytes());
        out.extend_from_slice(&(reclen as u16).to_le_bytes());
        out.push(self.d_type);
        out.extend_from_slice(&self.name);
        out.push(0); // NUL terminator
        let written = HEADER_LEN + self.name.len() + 1;
        out.resize(out.len() + (reclen - written), 0);
    }
}

/// Parses a raw `getdents64` buffer into individual entries. Stops at the
/// first malformed/truncated record rather than panicking, since a short
/// read from the tracee is possible (and handled at a higher level).
pub fn parse_dirents(buf: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + HEADER_LEN <= buf.len() {
        let ino = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        let off = i64::from_le_bytes(buf[offset + 8..offset + 16].try_into().unwrap());
        let reclen = u16::from_le_bytes(buf[offset + 16..offset + 18].try_into().unwrap()) as usize;
        let d_type = buf[offset + 18];

        if reclen == 0 || offset + reclen > buf.len() {
            break;
        }

        let name_start = offset + HEADER_LEN;
        let name_end = buf[name_start..offset + reclen]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
            .unwrap_or(offset + reclen);
        let name = buf[name_start..name_end].to_vec();

        entries.push(DirEntry { ino, off, d_type, name });
        offset += reclen;
    }

    entries
}

/// Re-serializes entries back into a `getdents64`-shaped buffer.
pub fn encode_dirents(entries: &[DirEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        entry.encode_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ino: u64, name: &str) -> DirEntry {
        DirEntry {
            ino,
            off: 1,
            d_type: 4,
            name: name.as_bytes().to_vec(),
        }
    }

    #[test]
    fn round_trips_through_encode_and_parse() {
        let entries = vec![sample(1, "a"), sample(2, "bb"), sample(3, "ccc")];
        let encoded = encode_dirents(&entries);
        let parsed = parse_dirents(&encoded);
        assert_eq!(parsed, entries);
    }

    #[test]
    fn records_are_eight_byte_aligned() {
        let entries = vec![sample(1, "x")];
        let encoded = encode_dirents(&entries);
        assert_eq!(encoded.len() % 8, 0);
    }

    #[test]
    fn stops_cleanly_on_truncated_buffer() {
        let entries = vec![sample(1, "a"), sample(2, "b")];
        let mut encoded = encode_dirents(&entries);
        encoded.truncate(encoded.len() - 2);
        let parsed = parse_dirents(&encoded);
        assert_eq!(parsed.len(), 1);
    }
}
