//! CLI surface and validated runtime configuration.
//!
//! `clap`'s derive API owns argument parsing (promoted here from the teacher's dev-only use in
//! `examples/pcap_dump.rs` to a real dependency, since this crate has no library-only story: it's
//! a daemon). Everything `clap` can't express — "at least one protocol must end up enabled",
//! country code shape — is checked by [`Config::from_cli`] after parsing.
//!
//! The short-flag set and its semantics (including the `-y`/`-z` fallthrough) mirror the daemon
//! this crate replaces letter-for-letter; see `-y`'s doc comment below for the one surprising case.

use std::net::IpAddr;

use clap::Parser;

use crate::error::{AppError, Result};
use crate::proto::Proto;

/// Chrooted to on privilege drop. Fixed rather than configurable: the original daemon never
/// exposed a flag for this either, since an empty, unwritable jail needs no variation.
pub const CHROOT_DIR: &str = "/var/empty";

/// Unprivileged account the child drops to when `-u` is not given.
pub const DEFAULT_USER: &str = "_nadvd";

const DEFAULT_PID_FILE: &str = "/var/run/nadvd.pid";
const DEFAULT_INTERVAL_SECS: u32 = 30;

#[derive(Parser, Debug, Clone)]
#[command(name = "nadvd", about = "Link-layer neighbor discovery advertiser and listener")]
pub struct Cli {
    /// Auto-enable: protocols start disabled and turn on permanently after their first received
    /// frame. Implies `-r`.
    #[arg(short = 'a')]
    pub auto_enable: bool,

    /// Two-letter ISO 3166-1 country code advertised in LLDP-MED Location TLVs.
    #[arg(short = 'c', value_name = "CC")]
    pub country: Option<String>,

    /// Interface name to exclude from discovery, may be repeated.
    #[arg(short = 'e', value_name = "IFACE")]
    pub exclude: Vec<String>,

    /// Run in the foreground; do not daemonize.
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Physical location string advertised in LLDP-MED Location TLVs.
    #[arg(short = 'l', value_name = "LOC")]
    pub location: Option<String>,

    /// Management address advertised in outgoing frames, as a literal IPv4 or IPv6 address (not
    /// an interface name, despite the flag's mnemonic).
    #[arg(short = 'm', value_name = "ADDR")]
    pub mgmt_iface: Option<String>,

    /// Advertise the management address on every interface instead of only the one it's
    /// actually configured on.
    #[arg(short = 'n')]
    pub maddr_all_ifaces: bool,

    /// Perform exactly one enumerate-and-transmit pass, then exit 0.
    #[arg(short = 'o')]
    pub run_once: bool,

    /// Use each interface's own MAC as its chassis ID instead of one shared primary MAC.
    #[arg(short = 'q')]
    pub chassis_per_iface: bool,

    /// Receive and decode frames in addition to sending them.
    #[arg(short = 'r')]
    pub receive: bool,

    /// Silent: build frames and run the scheduler, but never actually transmit.
    #[arg(short = 's')]
    pub silent: bool,

    /// Include tap/tun interfaces.
    #[arg(short = 't')]
    pub include_tap: bool,

    /// Unprivileged child's user, e.g. `_nadvd`. Defaults to [`DEFAULT_USER`].
    #[arg(short = 'u', value_name = "USER")]
    pub user: Option<String>,

    /// Increase log verbosity; may be repeated.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Include wireless interfaces.
    #[arg(short = 'w')]
    pub include_wireless: bool,

    /// Use the locally configured interface description as a source of information. In the
    /// original parser's `getopt` switch this case falls through into `-z`'s, so `-y` also turns
    /// on receive and the store-received-info-in-description behavior; `-z` alone does not turn
    /// on `-y`'s behavior.
    #[arg(short = 'y')]
    pub use_descr: bool,

    /// Write received neighbor info back into the interface description via the platform adapter.
    /// Implies receive, independent of `-y`.
    #[arg(short = 'z')]
    pub write_descr: bool,

    /// Enable LLDP.
    #[arg(short = 'L')]
    pub lldp: bool,

    /// Enable CDP (Cisco Discovery Protocol).
    #[arg(short = 'C')]
    pub cdp: bool,

    /// Enable EDP (Extreme Discovery Protocol).
    #[arg(short = 'E')]
    pub edp: bool,

    /// Enable FDP (Foundry Discovery Protocol).
    #[arg(short = 'F')]
    pub fdp: bool,

    /// Enable NDP (Nortel Discovery Protocol).
    #[arg(short = 'N')]
    pub ndp: bool,

    /// Explicit list of interfaces to operate on; empty means "all eligible".
    #[arg(trailing_var_arg = true)]
    pub only: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub protocols: Vec<Proto>,
    pub auto_enable: bool,
    pub country: Option<[u8; 2]>,
    pub exclude: Vec<String>,
    pub foreground: bool,
    pub location: Option<String>,
    pub mgmt_iface: Option<String>,
    pub mgmt_addr_literal: Option<IpAddr>,
    pub maddr_all_ifaces: bool,
    pub run_once: bool,
    pub chassis_per_iface: bool,
    pub receive: bool,
    pub send: bool,
    pub include_tap: bool,
    pub user: String,
    pub verbose: u8,
    pub include_wireless: bool,
    pub use_descr: bool,
    pub write_descr: bool,
    pub only: Vec<String>,
    pub interval_secs: u32,
    pub pid_file: String,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut protocols = Vec::new();
        if cli.lldp {
            protocols.push(Proto::Lldp);
        }
        if cli.cdp {
            protocols.push(Proto::Cdp);
        }
        if cli.edp {
            protocols.push(Proto::Edp);
        }
        if cli.fdp {
            protocols.push(Proto::Fdp);
        }
        if cli.ndp {
            protocols.push(Proto::Ndp);
        }

        if protocols.is_empty() && !cli.auto_enable {
            return Err(AppError::ConfigInvalid(
                "no protocol enabled: pass -a or one of -L/-C/-E/-F/-N".to_string(),
            ));
        }

        let country = match cli.country {
            Some(cc) => Some(validate_country(&cc)?),
            None => None,
        };

        // -y falls through into -z's effects in the parser this mirrors; -z alone does not
        // turn on -y's.
        let write_descr = cli.write_descr || cli.use_descr;
        let receive = cli.receive || cli.auto_enable || write_descr;

        let mgmt_addr_literal = match &cli.mgmt_iface {
            Some(value) => value.parse::<IpAddr>().ok(),
            None => None,
        };

        let pid_file = std::env::var("NADVD_PID_FILE").unwrap_or_else(|_| DEFAULT_PID_FILE.to_string());

        Ok(Config {
            protocols,
            auto_enable: cli.auto_enable,
            country,
            exclude: cli.exclude,
            foreground: cli.foreground,
            location: cli.location,
            mgmt_iface: cli.mgmt_iface,
            mgmt_addr_literal,
            maddr_all_ifaces: cli.maddr_all_ifaces,
            run_once: cli.run_once,
            chassis_per_iface: cli.chassis_per_iface,
            receive,
            send: !cli.silent,
            include_tap: cli.include_tap,
            user: cli.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            verbose: cli.verbose,
            include_wireless: cli.include_wireless,
            use_descr: cli.use_descr,
            write_descr,
            only: cli.only,
            interval_secs: DEFAULT_INTERVAL_SECS,
            pid_file,
        })
    }

    pub fn protocol_enabled(&self, proto: Proto) -> bool {
        self.protocols.contains(&proto)
    }
}

/// A valid country code is exactly two uppercase ASCII letters (`AB`, not `abc` or `A1`).
fn validate_country(cc: &str) -> Result<[u8; 2]> {
    let bytes = cc.as_bytes();
    if bytes.len() == 2 && bytes.iter().all(|b| b.is_ascii_uppercase()) {
        Ok([bytes[0], bytes[1]])
    } else {
        Err(AppError::ConfigInvalid(format!(
            "invalid country code {cc:?}: expected two uppercase letters"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            auto_enable: false,
            country: None,
            exclude: vec![],
            foreground: false,
            location: None,
            mgmt_iface: None,
            maddr_all_ifaces: false,
            run_once: false,
            chassis_per_iface: false,
            receive: false,
            silent: false,
            include_tap: false,
            user: None,
            verbose: 0,
            include_wireless: false,
            use_descr: false,
            write_descr: false,
            lldp: true,
            cdp: false,
            edp: false,
            fdp: false,
            ndp: false,
            only: vec![],
        }
    }

    #[test]
    fn valid_country_code_accepted() {
        let mut cli = base_cli();
        cli.country = Some("AB".to_string());
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.country, Some([b'A', b'B']));
    }

    #[test]
    fn lowercase_country_code_rejected() {
        let mut cli = base_cli();
        cli.country = Some("abc".to_string());
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn single_letter_with_digit_rejected() {
        let mut cli = base_cli();
        cli.country = Some("A1".to_string());
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn no_protocol_and_no_auto_flag_is_invalid() {
        let mut cli = base_cli();
        cli.lldp = false;
        let err = Config::from_cli(cli).unwrap_err();
        assert!(matches!(err, AppError::ConfigInvalid(_)));
    }

    #[test]
    fn auto_enable_with_no_protocol_flags_is_valid_and_implies_receive() {
        let mut cli = base_cli();
        cli.lldp = false;
        cli.auto_enable = true;
        let cfg = Config::from_cli(cli).unwrap();
        assert!(cfg.protocols.is_empty());
        assert!(cfg.receive);
    }

    #[test]
    fn enabling_every_protocol_flag_enables_all_five() {
        let mut cli = base_cli();
        cli.lldp = true;
        cli.cdp = true;
        cli.edp = true;
        cli.fdp = true;
        cli.ndp = true;
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.protocols.len(), 5);
    }

    #[test]
    fn pid_file_defaults_when_unset() {
        std::env::remove_var("NADVD_PID_FILE");
        let cfg = Config::from_cli(base_cli()).unwrap();
        assert_eq!(cfg.pid_file, DEFAULT_PID_FILE);
    }

    #[test]
    fn silent_flag_disables_send_but_not_receive() {
        let mut cli = base_cli();
        cli.silent = true;
        let cfg = Config::from_cli(cli).unwrap();
        assert!(!cfg.send);
        assert!(!cfg.receive);
    }

    #[test]
    fn use_descr_implies_write_descr_and_receive() {
        let mut cli = base_cli();
        cli.use_descr = true;
        let cfg = Config::from_cli(cli).unwrap();
        assert!(cfg.write_descr);
        assert!(cfg.receive);
    }

    #[test]
    fn write_descr_alone_does_not_imply_use_descr() {
        let mut cli = base_cli();
        cli.write_descr = true;
        let cfg = Config::from_cli(cli).unwrap();
        assert!(cfg.receive);
        assert!(!cfg.use_descr);
    }

    #[test]
    fn user_defaults_when_unset() {
        let cfg = Config::from_cli(base_cli()).unwrap();
        assert_eq!(cfg.user, DEFAULT_USER);
    }
}
