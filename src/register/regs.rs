use crate::errors::Result;
use crate::register::Word;
use libc::user_regs_struct;
use log::trace;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::fmt;

/// Size in bytes of the `syscall` instruction on x86_64. Rewinding the
/// instruction pointer by this amount after a syscall-exit stop re-arms the
/// same syscall for replay.
pub const SYSCALL_INSTRUCTION_SIZE: Word = 2;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RegVersion {
    /// The tracee's live registers, as of the last `fetch`.
    Current = 0,
    /// A snapshot taken before a replay/injection, used to restore the
    /// tracee to the state it was in before the supervisor touched it.
    Original = 1,
}
use self::RegVersion::*;

#[derive(Debug, Copy, Clone)]
#[allow(dead_code)]
pub enum SysArgIndex {
    SysArg1 = 0,
    SysArg2,
    SysArg3,
    SysArg4,
    SysArg5,
    SysArg6,
}
use self::SysArgIndex::*;

#[derive(Debug, Copy, Clone)]
pub enum Register {
    SysNum,
    SysArg(SysArgIndex),
    SysResult,
    StackPointer,
    InstrPointer,
}
use self::Register::*;

/// A cached, lazily-pushed view of a tracee's general purpose registers.
///
/// Callers read and mutate the `Current` version freely; nothing reaches the
/// kernel until `push`. `save(Original)` snapshots `Current` so that a later
/// `restore_from` (used when a replay needs to undo an injection) has
/// something to roll back to.
#[derive(Debug)]
pub struct Registers {
    pid: Pid,
    registers: [Option<user_regs_struct>; 2],
    changed: bool,
}

#[allow(dead_code)]
impl Registers {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            registers: [None, None],
            changed: false,
        }
    }

    #[cfg(test)]
    pub fn from_raw(pid: Pid, raw_regs: user_regs_struct) -> Self {
        Self {
            pid,
            registers: [Some(raw_regs), None],
            changed: false,
        }
    }

    /// Retrieves all tracee's general purpose registers via `PTRACE_GETREGS`
    /// and caches them as `Current`.
    pub fn fetch(&mut self) -> Result<()> {
        let regs = ptrace::getregs(self.pid)?;
        self.registers[Current as usize] = Some(regs);
        self.changed = false;
        Ok(())
    }

    /// Pushes the cached `Current` registers back to the tracee via
    /// `PTRACE_SETREGS`, if anything was actually changed since `fetch`.
    pub fn push(&mut self) -> Result<()> {
        if !self.changed {
            return Ok(());
        }
        let pid = self.pid;
        let regs = *self.get_regs(Current);
        ptrace::setregs(pid, regs)?;
        self.changed = false;
        Ok(())
    }

    #[inline]
    pub fn get(&self, version: RegVersion, register: Register) -> Word {
        self.get_raw(self.get_regs(version), register)
    }

    #[inline]
    pub fn set(&mut self, register: Register, new_value: Word, justification: &'static str) {
        let current_value = self.get(Current, register);
        if current_value == new_value {
            return;
        }
        trace!(
            "{}: reg {:?} {:#x} -> {:#x} ({})",
            self.pid, register, current_value, new_value, justification
        );
        self.set_raw(register, new_value);
        self.changed = true;
    }

    /// Saves the `Current` registers into `version` (only `Original` makes
    /// sense as a target; `Current` is always written by `fetch`).
    #[inline]
    pub fn save(&mut self, version: RegVersion) {
        if version != Current {
            let current = *self.get_regs(Current);
            self.registers[version as usize] = Some(current);
        }
    }

    /// Overwrites `Current` with the previously `save`d `Original` snapshot.
    /// Used to roll the tracee's arguments back after an injected syscall
    /// before replaying the original one.
    pub fn restore_from(&mut self, version: RegVersion) {
        if version == Current {
            return;
        }
        let saved = *self
            .registers
            .get(version as usize)
            .and_then(|r| r.as_ref())
            .expect("restore_from requires a prior save()");
        self.registers[Current as usize] = Some(saved);
        self.changed = true;
    }

    /// Rewinds the instruction pointer by the syscall-instruction size, so
    /// the next resume re-executes the same syscall instruction.
    pub fn rewind_for_replay(&mut self) {
        let ip = self.get(Current, InstrPointer);
        self.set(InstrPointer, ip - SYSCALL_INSTRUCTION_SIZE, "rewinding ip for replay");
    }

    #[inline]
    pub fn get_pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn get_sys_num(&self, version: RegVersion) -> i64 {
        self.get(version, SysNum) as i64
    }

    #[inline]
    pub fn set_sys_num(&mut self, new_value: i64, justification: &'static str) {
        self.set(SysNum, new_value as Word, justification);
    }

    #[inline]
    pub fn get_arg(&self, version: RegVersion, index: SysArgIndex) -> Word {
        self.get(version, SysArg(index))
    }

    #[inline]
    pub fn set_arg(&mut self, index: SysArgIndex, value: Word, justification: &'static str) {
        self.set(SysArg(index), value, justification);
    }

    #[inline]
    pub fn get_result(&self, version: RegVersion) -> i64 {
        self.get(version, SysResult) as i64
    }

    #[inline]
    pub fn set_result(&mut self, value: i64, justification: &'static str) {
        self.set(SysResult, value as Word, justification);
    }

    #[inline]
    fn get_raw(&self, raw: &user_regs_struct, register: Register) -> Word {
        match register {
            SysNum => get_reg!(raw, SysArgNum),
            SysArg(SysArg1) => get_reg!(raw, SysArg1),
            SysArg(SysArg2) => get_reg!(raw, SysArg2),
            SysArg(SysArg3) => get_reg!(raw, SysArg3),
            SysArg(SysArg4) => get_reg!(raw, SysArg4),
            SysArg(SysArg5) => get_reg!(raw, SysArg5),
            SysArg(SysArg6) => get_reg!(raw, SysArg6),
            SysResult => get_reg!(raw, SysArgResult),
            StackPointer => get_reg!(raw, StackPointer),
            InstrPointer => get_reg!(raw, InstrPointer),
        }
    }

    #[inline]
    fn set_raw(&mut self, register: Register, new_value: Word) {
        let raw = self.get_mut_regs(Current);
        match register {
            SysNum => get_reg!(raw, SysArgNum) = new_value,
            SysArg(SysArg1) => get_reg!(raw, SysArg1) = new_value,
            SysArg(SysArg2) => get_reg!(raw, SysArg2) = new_value,
            SysArg(SysArg3) => get_reg!(raw, SysArg3) = new_value,
            SysArg(SysArg4) => get_reg!(raw, SysArg4) = new_value,
            SysArg(SysArg5) => get_reg!(raw, SysArg5) = new_value,
            SysArg(SysArg6) => get_reg!(raw, SysArg6) = new_value,
            SysResult => get_reg!(raw, SysArgResult) = new_value,
            StackPointer => get_reg!(raw, StackPointer) = new_value,
            InstrPointer => get_reg!(raw, InstrPointer) = new_value,
        };
    }

    #[inline]
    fn get_regs(&self, version: RegVersion) -> &user_regs_struct {
        match self.registers[version as usize] {
            Some(ref regs) => regs,
            None => unreachable!("register version {:?} was never fetched/saved", version),
        }
    }

    #[inline]
    fn get_mut_regs(&mut self, version: RegVersion) -> &mut user_regs_struct {
        match self.registers[version as usize] {
            Some(ref mut regs) => regs,
            None => unreachable!("register version {:?} was never fetched/saved", version),
        }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let raw = self.get_regs(Current);
        write!(
            f,
            "(pid {}: syscall {} - args [{}, {}, {}, {}, {}, {}], result {})",
            self.pid,
            get_reg!(raw, SysArgNum),
            get_reg!(raw, SysArg1),
            get_reg!(raw, SysArg2),
            get_reg!(raw, SysArg3),
            get_reg!(raw, SysArg4),
            get_reg!(raw, SysArg5),
            get_reg!(raw, SysArg6),
            get_reg!(raw, SysArgResult),
        )
    }
}
