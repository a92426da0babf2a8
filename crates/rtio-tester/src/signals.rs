//! Signal handling for operator abort.
//!
//! SIGINT and SIGTERM raise the session's [`AbortFlag`], which is polled at
//! the top of every routine iteration and inside the pacing wait. The first
//! signal restores the default disposition, so a second one terminates the
//! process.

use rtio_runtime::AbortFlag;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How often the poll thread checks for a delivered signal.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signals the tester reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Signal bookkeeping shared with the poll thread.
#[derive(Debug, Default)]
pub struct SignalState {
    signal_count: AtomicU32,
}

impl SignalState {
    fn record_signal(&self, kind: SignalKind) {
        let count = self.signal_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(signal = %kind, count, "Abort signal received");
    }

    /// Signals received so far.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Last signal number, written from the handler; only atomics are
/// async-signal-safe.
#[cfg(unix)]
static PENDING: AtomicI32 = AtomicI32::new(0);

/// Wait for a signal recorded in `pending`, then raise `abort`.
///
/// Returns once the flag is raised, whether by a signal or by anyone else.
#[cfg(unix)]
fn poll_signals(pending: &AtomicI32, abort: &AbortFlag, state: &SignalState) {
    loop {
        let signum = pending.swap(0, Ordering::Relaxed);
        if signum != 0 {
            let kind = if signum == libc::SIGTERM {
                SignalKind::Terminate
            } else {
                SignalKind::Interrupt
            };
            state.record_signal(kind);
            abort.request();
        }
        if abort.is_requested() {
            debug!("Signal poll thread exiting");
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Connects process signals to an abort flag.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Register handlers that raise `abort`.
    ///
    /// On non-Unix platforms no handler is installed.
    pub fn new(abort: AbortFlag) -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::default()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers(abort)?;
        #[cfg(not(unix))]
        drop(abort);

        Ok(handler)
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn register_unix_handlers(&self, abort: AbortFlag) -> std::io::Result<()> {
        use std::os::raw::c_int;

        extern "C" fn on_signal(signum: c_int) {
            PENDING.store(signum, Ordering::Relaxed);
            // SAFETY: signal() is async-signal-safe.
            unsafe {
                libc::signal(signum, libc::SIG_DFL);
            }
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("rtio-signals".into())
            .spawn(move || poll_signals(&PENDING, &abort, &state))?;

        let handler = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
        for signum in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: the handler only touches an atomic and calls signal().
            let previous = unsafe { libc::signal(signum, handler) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Signal bookkeeping.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}
