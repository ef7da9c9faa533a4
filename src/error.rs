//! The error taxonomy of this crate, and its propagation policy.
//!
//! Each variant corresponds to one of the error kinds named by the design: most are recoverable
//! at a specific scope (one encode, one decode, one socket) and only a few are fatal to the whole
//! process. Callers match on the variant to decide what to do; see the comment on each variant.

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad flag combination, unknown interface name, malformed country code, etc. Fatal at
    /// startup: print usage and exit non-zero.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Raw socket open or setuid/setgid/chroot failed. Fatal at startup; disables a single
    /// (proto, netif) pair if it happens mid-run instead (see `is_fatal`).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The codec tried to write past the end of a frame buffer. Aborts only the current encode.
    #[error("frame buffer overflow: tried to write {attempted} bytes with {remaining} remaining")]
    FrameOverflow { attempted: usize, remaining: usize },

    /// The codec tried to read past the end of a frame buffer. Aborts only the current decode.
    #[error("frame buffer underflow: tried to read {attempted} bytes with {remaining} remaining")]
    FrameUnderflow { attempted: usize, remaining: usize },

    /// A protocol decoder rejected the frame body as structurally invalid (e.g. a TLV whose
    /// declared length exceeds the remaining frame). Drops only the current received frame.
    #[error("malformed {proto} frame: {reason}")]
    Malformed { proto: &'static str, reason: String },

    /// A transient I/O condition (EAGAIN, a short write, a send to a dead interface). Logged at
    /// WARN and retried on the next tick; never fatal.
    #[error("transient I/O error on {context}: {source}")]
    IoTransient {
        context: String,
        #[source]
        source: io::Error,
    },

    /// An unrecoverable I/O condition at setup time (socketpair, fork, bind). Fatal.
    #[error("fatal I/O error on {context}: {source}")]
    IoFatal {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The IPC channel carried a tag or length that neither side could have legitimately sent.
    /// Fatal to both processes: the protocol invariant is broken and neither side can trust the
    /// other's framing anymore.
    #[error("privilege-separation protocol violation: {0}")]
    PrivsepProtocol(String),

    /// Sentinel used internally to unwind an event loop cleanly on SIGTERM/SIGINT/EOF. Never
    /// logged as an error.
    #[error("shutdown requested")]
    Shutdown,
}

impl AppError {
    pub fn io_transient(context: impl Into<String>, source: io::Error) -> Self {
        AppError::IoTransient {
            context: context.into(),
            source,
        }
    }

    pub fn io_fatal(context: impl Into<String>, source: io::Error) -> Self {
        AppError::IoFatal {
            context: context.into(),
            source,
        }
    }

    pub fn malformed(proto: &'static str, reason: impl fmt::Display) -> Self {
        AppError::Malformed {
            proto,
            reason: reason.to_string(),
        }
    }

    /// True for the handful of variants that must terminate the whole process rather than just
    /// the operation that produced them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::PermissionDenied(_) | AppError::PrivsepProtocol(_) | AppError::IoFatal { .. }
        )
    }
}
