//! Signal plumbing.
//!
//! Handlers never touch the world: each stream is polled at one point
//! in the dispatch loop, which observes flags and acts between passes.

use tokio::signal::unix::{Signal, SignalKind, signal};

pub struct Signals {
    pub hup: Signal,
    pub usr1: Signal,
    pub usr2: Signal,
    pub int: Signal,
    pub term: Signal,
    pub child: Signal,
}

/// Something a signal asked the dispatch loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGHUP: reload TLS certificates and tunables.
    Reconfigure,
    /// SIGUSR1: log status lines.
    DumpStatus,
    /// SIGUSR2: wall players, save, shut down.
    Emergency,
    /// SIGINT/SIGTERM: graceful shutdown.
    Shutdown,
    /// SIGCHLD: reap the dumper/resolver.
    ChildExited,
}

impl Signals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Signals {
            hup: signal(SignalKind::hangup())?,
            usr1: signal(SignalKind::user_defined1())?,
            usr2: signal(SignalKind::user_defined2())?,
            int: signal(SignalKind::interrupt())?,
            term: signal(SignalKind::terminate())?,
            child: signal(SignalKind::child())?,
        })
    }

    /// Wait for the next signal of interest.
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.hup.recv() => SignalEvent::Reconfigure,
            _ = self.usr1.recv() => SignalEvent::DumpStatus,
            _ = self.usr2.recv() => SignalEvent::Emergency,
            _ = self.int.recv() => SignalEvent::Shutdown,
            _ = self.term.recv() => SignalEvent::Shutdown,
            _ = self.child.recv() => SignalEvent::ChildExited,
        }
    }
}

/// Reap every exited child without blocking; returns (pid, status)
/// pairs for the dispatch loop to match against the dumper and the
/// resolver.
pub fn reap_children() -> Vec<(libc::pid_t, i32)> {
    let mut reaped = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        let code = if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else {
            128 + libc::WTERMSIG(status)
        };
        reaped.push((pid, code));
    }
    reaped
}
