use std::io::Write as _;
use std::os::fd::{FromRawFd, RawFd};

use clap::Parser;
use nix::fcntl::{flock, FlockArg};
use nix::unistd::{fork, ForkResult};

use nadvd::child::Child;
use nadvd::config::{Cli, Config};
use nadvd::ipc::{new_channel_pair, Channel};
use nadvd::parent::Parent;
use nadvd::platform::LinuxAdapter;
use nadvd::AppError;

fn main() {
    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("nadvd: {e}");
            std::process::exit(2);
        }
    };

    install_tracing(&config);

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

/// Installs the process-wide `tracing` subscriber. Foreground gets a compact one-line-per-event
/// formatter with no ANSI when stderr isn't a tty; background gets the same formatter without
/// ANSI and with target/module paths, since this crate carries no syslog dependency of its own
/// (see DESIGN.md) — only the formatting hook described for daemonized mode is provided here.
fn install_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let default_level = match config.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.foreground && std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_target(!config.foreground)
        .with_writer(std::io::stderr);

    if config.foreground {
        builder.without_time().init();
    } else {
        builder.init();
    }
}

fn run(config: Config) -> Result<(), AppError> {
    let pidfile = PidFile::create(&config.pid_file)?;

    let (cmd_parent, cmd_child) = new_channel_pair()?;
    let (msg_parent, msg_child) = new_channel_pair()?;

    // SAFETY: single-threaded at this point (only the main thread has run so far), and neither
    // branch touches data the other branch mutates afterward.
    match unsafe { fork() }.map_err(|e| AppError::io_fatal("fork", nix_io(e)))? {
        ForkResult::Parent { child } => {
            drop((cmd_child, msg_child));
            let cmd = Channel::new(cmd_parent)?;
            let msg = Channel::new(msg_parent)?;
            let adapter = LinuxAdapter::new();
            let mut parent = Parent::new(adapter, cmd, msg, child, config.receive);
            let result = parent.run();
            pidfile.remove();
            result
        }
        ForkResult::Child => {
            drop((cmd_parent, msg_parent));
            drop(pidfile);
            run_child(config, cmd_child, msg_child)
        }
    }
}

fn run_child(config: Config, cmd_child: std::os::unix::net::UnixStream, msg_child: std::os::unix::net::UnixStream) -> Result<(), AppError> {
    let adapter = LinuxAdapter::new();
    let cmd = Channel::new(cmd_child)?;
    let msg = Channel::new(msg_child)?;
    let run_once = config.run_once;

    let mut child = Child::new(adapter, config, cmd, msg)?;
    child.drop_privileges()?;

    if run_once {
        child.run_once()
    } else {
        child.run()
    }
}

/// The privileged parent's exclusive lock on `NADVD_PID_FILE`, held for the process lifetime and
/// removed on clean shutdown. A second instance of the daemon trying to start sees the lock fail
/// and exits rather than racing the first for raw sockets.
struct PidFile {
    path: String,
    fd: RawFd,
}

impl PidFile {
    fn create(path: &str) -> Result<Self, AppError> {
        let fd = nix::fcntl::open(
            path,
            nix::fcntl::OFlag::O_CREAT | nix::fcntl::OFlag::O_WRONLY,
            nix::sys::stat::Mode::from_bits_truncate(0o644),
        )
        .map_err(|e| AppError::io_fatal("open pidfile", nix_io(e)))?;

        flock(fd, FlockArg::LockExclusiveNonblock)
            .map_err(|_| AppError::PermissionDenied(format!("{path} is locked by another instance")))?;

        let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
        let pid = std::process::id();
        file.set_len(0).map_err(|e| AppError::io_fatal("truncate pidfile", e))?;
        write!(file, "{pid}\n").map_err(|e| AppError::io_fatal("write pidfile", e))?;
        std::mem::forget(file); // keep `fd` alive and owned by `PidFile`, not the transient `File`

        Ok(PidFile { path: path.to_string(), fd })
    }

    fn remove(self) {
        let _ = std::fs::remove_file(&self.path);
        // `self` drops here, closing the fd exactly once.
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.fd);
    }
}

fn nix_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
