//! Installs the tracer's own signal dispositions before entering the event
//! loop. Adapted from the teacher's `process::sigactions::prepare_sigactions`:
//! same blanket "ignore everything except a short, explicit list" policy,
//! narrowed to what this supervisor actually needs - it has no `show_info`
//! diagnostic hook, and `SIGCHLD` must keep its default action (not be
//! ignored) so `waitpid` in the event loop keeps observing tracee state
//! changes.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Configures dispositions for every signal the tracer process itself (not
/// a tracee) might receive. Job-control and un-installable signals
/// (`SIGCHLD`, `SIGCONT`, `SIGTSTP`, `SIGTTIN`, `SIGTTOU`, `SIGSTOP`,
/// `SIGKILL`) are left at their default action; everything else is
/// ignored so a stray signal destined for a tracee but briefly delivered
/// to the tracer first doesn't kill the supervisor itself.
pub fn install() {
    let signal_set = SigSet::all();
    let sa_flags = SaFlags::SA_RESTART;

    for signal in Signal::iterator() {
        match signal {
            Signal::SIGCHLD
            | Signal::SIGCONT
            | Signal::SIGTSTP
            | Signal::SIGTTIN
            | Signal::SIGTTOU
            | Signal::SIGSTOP
            | Signal::SIGKILL => continue,
            _ => {}
        }

        let action = SigAction::new(SigHandler::SigIgn, sa_flags, signal_set);
        if let Err(err) = unsafe { sigaction(signal, &action) } {
            log::warn!("sigaction failed for {:?}: {}", signal, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_runs_without_panicking() {
        install();
    }
}
