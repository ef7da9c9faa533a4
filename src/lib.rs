//! `nadvd`: a link-layer neighbor discovery advertiser and listener.
//!
//! Speaks LLDP (IEEE 802.1AB), CDP, EDP, FDP, and NDP over raw Ethernet. Runs as two cooperating
//! processes: a privileged parent holding every raw socket, and an unprivileged child that does
//! all protocol encoding, decoding, and scheduling. See [`parent`] and [`child`] for the split.

pub mod child;
pub mod config;
pub mod error;
pub mod iface;
pub mod ipc;
pub mod parent;
pub mod peer;
pub mod platform;
pub mod proto;
pub mod scheduler;
pub mod signal;
pub mod sysinfo;
pub mod tlv;

pub use error::{AppError, Result};
