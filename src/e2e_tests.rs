//! End-to-end scenarios (SPEC_FULL.md §8, S1-S6): each forks a real traced
//! child that performs the literal syscalls the scenario describes, and
//! asserts on what the child itself observed once the syscalls return
//! (shipped back to the parent over a pipe, since a `fork` does not share
//! memory). Every scenario is driven through a real `Supervisor`, the same
//! one `main.rs` uses, via `testutil::run_under_supervisor`.

use crate::registry::CLOCK_EPOCH;
use crate::testutil::run_under_supervisor;
use nix::unistd::{close, pipe, read as nix_read, write as nix_write};
use std::ffi::CString;
use std::mem::size_of;
use std::os::unix::io::RawFd;

fn unique_path(tag: &str) -> CString {
    let path = std::env::temp_dir().join(format!("dettracer-e2e-{}-{}", tag, std::process::id()));
    CString::new(path.to_str().unwrap()).unwrap()
}

fn send_u64(fd: RawFd, value: u64) {
    nix_write(fd, &value.to_ne_bytes()).expect("write to result pipe");
}

fn recv_u64(fd: RawFd) -> u64 {
    let mut buf = [0u8; size_of::<u64>()];
    let mut filled = 0;
    while filled < buf.len() {
        let n = nix_read(fd, &mut buf[filled..]).expect("read from result pipe");
        assert!(n > 0, "result pipe closed early");
        filled += n;
    }
    u64::from_ne_bytes(buf)
}

unsafe fn do_stat(path: &CString) -> libc::stat {
    let mut buf: libc::stat = std::mem::zeroed();
    let result = libc::stat(path.as_ptr(), &mut buf);
    assert_eq!(result, 0, "stat({:?}) failed: errno {}", path, *libc::__errno_location());
    buf
}

#[test]
fn s1_stat_twice_same_file_yields_stable_virtual_identity() {
    let path = unique_path("s1");
    std::fs::write(path.to_str().unwrap(), b"contents").unwrap();

    let (read_fd, write_fd) = pipe().expect("pipe");
    let child_path = path.clone();
    let supervisor = run_under_supervisor(move || unsafe {
        let s1 = do_stat(&child_path);
        let s2 = do_stat(&child_path);
        send_u64(write_fd, s1.st_ino);
        send_u64(write_fd, s1.st_mtime as u64);
        send_u64(write_fd, s2.st_ino);
        send_u64(write_fd, s2.st_mtime as u64);
        close(write_fd).ok();
    });

    let s1_ino = recv_u64(read_fd);
    let s1_mtime = recv_u64(read_fd);
    let s2_ino = recv_u64(read_fd);
    let s2_mtime = recv_u64(read_fd);
    close(read_fd).ok();
    std::fs::remove_file(path.to_str().unwrap()).ok();

    assert_eq!(supervisor.exit_status(), 0);
    assert_eq!(s1_ino, 1);
    assert_eq!(s2_ino, 1);
    assert_eq!(s1_mtime, CLOCK_EPOCH);
    assert_eq!(s2_mtime, CLOCK_EPOCH);
}

#[test]
fn s2_stat_two_different_files_yields_distinct_virtual_ids() {
    let path_a = unique_path("s2a");
    let path_b = unique_path("s2b");
    std::fs::write(path_a.to_str().unwrap(), b"a").unwrap();
    std::fs::write(path_b.to_str().unwrap(), b"b").unwrap();

    let (read_fd, write_fd) = pipe().expect("pipe");
    let child_a = path_a.clone();
    let child_b = path_b.clone();
    let supervisor = run_under_supervisor(move || unsafe {
        let s1 = do_stat(&child_a);
        let s2 = do_stat(&child_b);
        send_u64(write_fd, s1.st_ino);
        send_u64(write_fd, s2.st_ino);
        close(write_fd).ok();
    });

    let s1_ino = recv_u64(read_fd);
    let s2_ino = recv_u64(read_fd);
    close(read_fd).ok();
    std::fs::remove_file(path_a.to_str().unwrap()).ok();
    std::fs::remove_file(path_b.to_str().unwrap()).ok();

    assert_eq!(supervisor.exit_status(), 0);
    assert_eq!(s1_ino, 1);
    assert_eq!(s2_ino, 2);
}

#[test]
fn s3_unlink_then_create_never_reuses_a_virtual_inode() {
    let path = unique_path("s3");
    std::fs::write(path.to_str().unwrap(), b"first").unwrap();

    let (read_fd, write_fd) = pipe().expect("pipe");
    let child_path = path.clone();
    let supervisor = run_under_supervisor(move || unsafe {
        let s1 = do_stat(&child_path);
        let unlink_result = libc::unlink(child_path.as_ptr());
        assert_eq!(unlink_result, 0);
        let fd = libc::creat(child_path.as_ptr(), 0o644);
        assert!(fd >= 0);
        libc::close(fd);
        let s2 = do_stat(&child_path);
        send_u64(write_fd, s1.st_ino);
        send_u64(write_fd, s2.st_ino);
        close(write_fd).ok();
    });

    let s1_ino = recv_u64(read_fd);
    let s2_ino = recv_u64(read_fd);
    close(read_fd).ok();
    std::fs::remove_file(path.to_str().unwrap()).ok();

    assert_eq!(supervisor.exit_status(), 0);
    assert_eq!(s1_ino, 1);
    assert_eq!(s2_ino, 2);
}

#[test]
fn s4_short_read_is_coalesced_into_one_observed_transfer() {
    let path = unique_path("s4");
    let payload = vec![7u8; 100];
    std::fs::write(path.to_str().unwrap(), &payload).unwrap();

    let (read_fd, write_fd) = pipe().expect("pipe");
    let child_path = path.clone();
    let supervisor = run_under_supervisor(move || unsafe {
        let fd = libc::open(child_path.as_ptr(), libc::O_RDONLY);
        assert!(fd >= 0);
        let mut buf = vec![0u8; 100];
        let n = libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 100);
        libc::close(fd);
        send_u64(write_fd, n as u64);
        close(write_fd).ok();
    });

    let observed_len = recv_u64(read_fd);
    close(read_fd).ok();
    std::fs::remove_file(path.to_str().unwrap()).ok();

    assert_eq!(supervisor.exit_status(), 0);
    // The kernel may itself already satisfy a 100-byte read from a regular
    // file in one transfer; what this scenario actually pins down is that
    // the tracee never observes a short result for a file that size, not
    // that a retry necessarily happened (that depends on I/O scheduling
    // this test does not control).
    assert_eq!(observed_len, 100);
}

#[test]
fn s5_getrandom_is_counted_and_deterministic() {
    let (read_fd, write_fd) = pipe().expect("pipe");
    let supervisor = run_under_supervisor(move || unsafe {
        let mut buf1 = [0u8; 16];
        let mut buf2 = [0u8; 16];
        let r1 = libc::syscall(libc::SYS_getrandom, buf1.as_mut_ptr(), 16usize, 0);
        let r2 = libc::syscall(libc::SYS_getrandom, buf2.as_mut_ptr(), 16usize, 0);
        assert_eq!(r1, 16);
        assert_eq!(r2, 16);
        nix_write(write_fd, &buf1).expect("write buf1");
        nix_write(write_fd, &buf2).expect("write buf2");
        close(write_fd).ok();
    });

    let mut buf1 = [0u8; 16];
    let mut buf2 = [0u8; 16];
    let mut filled = 0;
    while filled < buf1.len() {
        filled += nix_read(read_fd, &mut buf1[filled..]).unwrap();
    }
    filled = 0;
    while filled < buf2.len() {
        filled += nix_read(read_fd, &mut buf2[filled..]).unwrap();
    }
    close(read_fd).ok();

    assert_eq!(supervisor.exit_status(), 0);
    assert_eq!(supervisor.registry.counters.get_random_calls, 2);
    // Deterministic, but not constant: two distinct calls in the same run
    // still draw from different points of the xorshift stream.
    assert_ne!(buf1, buf2);
}

#[test]
fn s6_forked_child_inherits_the_inode_registry_and_live_set_tracks_it() {
    let path = unique_path("s6");
    std::fs::write(path.to_str().unwrap(), b"shared").unwrap();

    let (read_fd, write_fd) = pipe().expect("pipe");
    let child_path = path.clone();
    let supervisor = run_under_supervisor(move || unsafe {
        // Parent (the root tracee) primes the inode mapping first, so the
        // forked grandchild is guaranteed to see the same virtual id.
        let _ = do_stat(&child_path);

        match nix::unistd::fork().expect("fork inside traced child") {
            nix::unistd::ForkResult::Child => {
                let s = do_stat(&child_path);
                send_u64(write_fd, s.st_ino);
                libc::_exit(0);
            }
            nix::unistd::ForkResult::Parent { child } => {
                let mut status = 0;
                libc::waitpid(child.as_raw(), &mut status, 0);
                close(write_fd).ok();
            }
        }
    });

    let grandchild_ino = recv_u64(read_fd);
    close(read_fd).ok();
    std::fs::remove_file(path.to_str().unwrap()).ok();

    assert_eq!(supervisor.exit_status(), 0);
    assert_eq!(grandchild_ino, 1);
}

#[test]
fn s7_execve_resets_phase_so_post_exec_syscalls_stay_in_sync() {
    // The root tracee stats a file (to get its own handler mid-flight, the
    // way a real traced program would), then execve()s into a fresh image.
    // A successful execve() reports through `PTRACE_EVENT_EXEC`, not an
    // ordinary syscall-exit, so if the supervisor failed to reset the
    // tracee's pre/post phase and drop its stale handler there, the new
    // image's very first syscall-exit would get misrouted through the old
    // `ExecveHandler::post` and every handled syscall after that would read
    // the wrong registers. `/bin/sh` makes enough real syscalls (openat,
    // mmap, read, ...) on its way to `exit 7` that such a corruption would
    // very likely crash, hang, or otherwise fail to reach a clean exit - so
    // an exact exit status of 7 here is a meaningful regression check, not
    // just a smoke test.
    let path = unique_path("s7");
    std::fs::write(path.to_str().unwrap(), b"before-exec").unwrap();

    let child_path = path.clone();
    let supervisor = run_under_supervisor(move || unsafe {
        let _ = do_stat(&child_path);

        let shell = CString::new("/bin/sh").unwrap();
        let flag = CString::new("-c").unwrap();
        let script = CString::new("exit 7").unwrap();
        let argv: [*const libc::c_char; 4] =
            [shell.as_ptr(), flag.as_ptr(), script.as_ptr(), std::ptr::null()];
        let envp: [*const libc::c_char; 1] = [std::ptr::null()];
        libc::execve(shell.as_ptr(), argv.as_ptr(), envp.as_ptr());
        // execve only returns on failure.
        libc::_exit(111);
    });

    std::fs::remove_file(path.to_str().unwrap()).ok();
    assert_eq!(supervisor.exit_status(), 7);
}
