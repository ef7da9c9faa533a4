//! Self-pipe signal handling (§5, §9): handlers do nothing but record which signal fired and wake
//! the event loop by writing one byte to a pipe. Everything else — re-enumeration on `SIGHUP`,
//! shutdown on `SIGTERM`/`SIGINT`, child-reaping on `SIGCHLD` — happens on the main thread, outside
//! signal-handler context.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd;

use crate::error::{AppError, Result};

const TERM: u8 = 0b0001;
const INT: u8 = 0b0010;
const HUP: u8 = 0b0100;
const CHLD: u8 = 0b1000;

static PENDING: AtomicU8 = AtomicU8::new(0);
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handler(raw: libc::c_int) {
    let bit = match raw {
        libc::SIGTERM => TERM,
        libc::SIGINT => INT,
        libc::SIGHUP => HUP,
        libc::SIGCHLD => CHLD,
        _ => return,
    };
    PENDING.fetch_or(bit, Ordering::SeqCst);
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Which signals arrived since the last [`Signals::take`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fired {
    pub term: bool,
    pub int: bool,
    pub hup: bool,
    pub chld: bool,
}

impl Fired {
    pub fn any(self) -> bool {
        self.term || self.int || self.hup || self.chld
    }

    pub fn shutdown_requested(self) -> bool {
        self.term || self.int
    }
}

/// One process's handle on the self-pipe. `read_fd` is what the event loop polls for readiness.
pub struct Signals {
    pub read_fd: RawFd,
}

impl Signals {
    /// Installs handlers for `SIGTERM`/`SIGINT`/`SIGHUP`, and `SIGCHLD` when `watch_chld` is set
    /// (only the parent cares about reaping its child). Call once per process, after `fork`: the
    /// pipe and the installed handlers are per-process state that does not survive `fork` usefully
    /// shared between parent and child.
    pub fn install(watch_chld: bool) -> Result<Self> {
        let (read_fd, write_fd) =
            unistd::pipe().map_err(|e| AppError::io_fatal("self-pipe", nix_io(e)))?;
        for fd in [read_fd, write_fd] {
            fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
                .map_err(|e| AppError::io_fatal("self-pipe nonblock", nix_io(e)))?;
        }
        WRITE_FD.store(write_fd, Ordering::SeqCst);

        let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());
        let mut signals = vec![Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP];
        if watch_chld {
            signals.push(Signal::SIGCHLD);
        }
        for sig in signals {
            // SAFETY: `handler` only touches an atomic and calls `write(2)` on a fd stored before
            // any handler could possibly run, both async-signal-safe.
            unsafe { signal::sigaction(sig, &action) }
                .map_err(|e| AppError::io_fatal("sigaction", nix_io(e)))?;
        }
        Ok(Signals { read_fd })
    }

    /// Drains the self-pipe and returns which signals fired since the last call.
    pub fn take(&self) -> Fired {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                break;
            }
        }
        let bits = PENDING.swap(0, Ordering::SeqCst);
        Fired {
            term: bits & TERM != 0,
            int: bits & INT != 0,
            hup: bits & HUP != 0,
            chld: bits & CHLD != 0,
        }
    }
}

fn nix_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
