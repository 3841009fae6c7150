#[macro_use]
mod abi;
mod reader;
mod regs;
mod writer;

use libc::c_ulong;

/// A machine word as ptrace sees it: 8 bytes on x86_64.
pub type Word = c_ulong;

pub use self::reader::{read_bytes, read_cstring, read_record};
pub use self::regs::Register::*;
pub use self::regs::RegVersion::*;
pub use self::regs::SysArgIndex;
pub use self::regs::SysArgIndex::*;
pub use self::regs::{RegVersion, Register, Registers, SYSCALL_INSTRUCTION_SIZE};
pub use self::writer::{write_record, write_struct};
