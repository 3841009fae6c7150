/// Maps the abstract register names used throughout the tracer onto the
/// concrete fields of `libc::user_regs_struct`, following the x86_64 syscall
/// ABI (see `sysdeps/unix/sysv/linux/x86_64/syscall.S` in glibc).
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
#[macro_use]
pub mod regs_offset {
    macro_rules! get_reg {
        ($regs:expr, SysArgNum)    => ($regs.orig_rax);
        ($regs:expr, SysArg1)      => ($regs.rdi);
        ($regs:expr, SysArg2)      => ($regs.rsi);
        ($regs:expr, SysArg3)      => ($regs.rdx);
        ($regs:expr, SysArg4)      => ($regs.r10);
        ($regs:expr, SysArg5)      => ($regs.r8);
        ($regs:expr, SysArg6)      => ($regs.r9);
        ($regs:expr, SysArgResult) => ($regs.rax);
        ($regs:expr, StackPointer) => ($regs.rsp);
        ($regs:expr, InstrPointer) => ($regs.rip);
    }
}
