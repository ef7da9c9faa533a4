//! The privileged parent process (§3, §6).
//!
//! This is the only code in the whole agent allowed to hold a raw socket or the pidfile lock. It
//! never parses a TLV: every accepted frame is handed, byte-for-byte, down the `msg` socketpair to
//! the child. It executes exactly the small command set the child is allowed to ask for
//! (`OpenTx`, `Send`, `SetDescr`, `Shutdown`); anything else is a privilege-separation protocol
//! violation and fatal to both processes.

use std::collections::BTreeMap;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::error::{AppError, Result};
use crate::ipc::{Channel, Tag};
use crate::platform::{dest_mac_is_discovery_multicast, PlatformAdapter};
use crate::signal::Signals;

pub struct Parent<A: PlatformAdapter> {
    adapter: A,
    cmd: Channel,
    msg: Channel,
    child_pid: Pid,
    sockets: BTreeMap<u32, RawFd>,
    receive: bool,
}

impl<A: PlatformAdapter> Parent<A> {
    pub fn new(adapter: A, cmd: Channel, msg: Channel, child_pid: Pid, receive: bool) -> Self {
        Parent {
            adapter,
            cmd,
            msg,
            child_pid,
            sockets: BTreeMap::new(),
            receive,
        }
    }

    /// Runs until the child closes its end of `cmd` (clean shutdown) or a fatal error occurs.
    /// Reaps the child before returning.
    pub fn run(&mut self) -> Result<()> {
        let signals = Signals::install(true)?;
        let result = self.event_loop(&signals);
        self.reap_child();
        for &fd in self.sockets.values() {
            let _ = nix::unistd::close(fd);
        }
        match result {
            Err(AppError::Shutdown) => Ok(()),
            other => other,
        }
    }

    fn event_loop(&mut self, signals: &Signals) -> Result<()> {
        loop {
            let mut targets: Vec<RawFd> = vec![signals.read_fd, self.cmd.as_raw_fd()];
            if self.receive {
                targets.extend(self.sockets.values().copied());
            }
            let mut fds: Vec<nix::poll::PollFd> = targets
                .iter()
                .map(|&fd| nix::poll::PollFd::new(borrowed(fd), nix::poll::PollFlags::POLLIN))
                .collect();

            match nix::poll::poll(&mut fds, -1i32) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(AppError::io_fatal("parent poll", nix_io(e))),
            }

            let fired = signals.take();
            if fired.chld {
                self.reap_child();
            }
            if fired.shutdown_requested() {
                // Ask the child to wind down; it will close `cmd` when it's done, which we'll
                // observe as a clean EOF on the next `recv`.
                let _ = self.cmd.send(Tag::Shutdown, &[]);
            }

            if readable(&fds, 1) {
                match self.cmd.recv() {
                    Ok(frame) => self.handle_command(frame.tag, &frame.body)?,
                    Err(AppError::Shutdown) => return Err(AppError::Shutdown),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => tracing::warn!(error = %e, "cmd channel read failed"),
                }
            }

            if self.receive {
                for (i, &fd) in targets.iter().enumerate().skip(2) {
                    if !readable(&fds, i) {
                        continue;
                    }
                    match self.adapter.recv(fd) {
                        Ok((ifindex, bytes)) => {
                            if dest_mac_is_discovery_multicast(&bytes) {
                                let mut body = Vec::with_capacity(4 + bytes.len());
                                body.extend_from_slice(&ifindex.to_le_bytes());
                                body.extend_from_slice(&bytes);
                                if let Err(e) = self.msg.send(Tag::Recv, &body) {
                                    if e.is_fatal() {
                                        return Err(e);
                                    }
                                    tracing::warn!(error = %e, "msg channel write failed");
                                }
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, ifindex, "raw socket recv failed"),
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, tag: Tag, body: &[u8]) -> Result<()> {
        match tag {
            Tag::OpenTx => {
                let ifindex = read_u32(body)?;
                let result = self.open_socket(ifindex);
                self.reply(result)
            }
            Tag::Send => {
                if body.len() < 4 {
                    return Err(AppError::PrivsepProtocol("Send body shorter than ifindex".into()));
                }
                let ifindex = read_u32(&body[..4])?;
                let frame = &body[4..];
                let result = self.send_frame(ifindex, frame);
                self.reply(result)
            }
            Tag::SetDescr => {
                let result = self.set_descr(body);
                self.reply(result)
            }
            Tag::Shutdown => Err(AppError::Shutdown),
            other => Err(AppError::PrivsepProtocol(format!("unexpected command tag {other:?}"))),
        }
    }

    fn open_socket(&mut self, ifindex: u32) -> std::io::Result<()> {
        if self.sockets.contains_key(&ifindex) {
            return Ok(());
        }
        let fd = self.adapter.open_raw()?;
        if let Err(e) = self.adapter.bind_tx(fd, ifindex) {
            let _ = nix::unistd::close(fd);
            return Err(e);
        }
        let _ = crate::platform::attach_classifier(fd);
        self.sockets.insert(ifindex, fd);
        Ok(())
    }

    fn send_frame(&mut self, ifindex: u32, frame: &[u8]) -> std::io::Result<()> {
        self.open_socket(ifindex)?;
        let fd = *self.sockets.get(&ifindex).expect("just opened above");
        self.adapter.send(fd, ifindex, frame)?;
        Ok(())
    }

    fn set_descr(&self, body: &[u8]) -> std::io::Result<()> {
        if body.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty SetDescr body"));
        }
        let name_len = body[0] as usize;
        if body.len() < 1 + name_len {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "truncated SetDescr body"));
        }
        let name = String::from_utf8_lossy(&body[1..1 + name_len]);
        let descr = String::from_utf8_lossy(&body[1 + name_len..]);
        self.adapter.set_descr(&name, &descr)
    }

    fn reply(&mut self, result: std::io::Result<()>) -> Result<()> {
        match result {
            Ok(()) => self.cmd.send(Tag::Ack, &[]),
            Err(e) => {
                tracing::warn!(error = %e, "command failed, replying Nack");
                self.cmd.send(Tag::Nack, e.to_string().as_bytes())
            }
        }
    }

    fn reap_child(&self) {
        loop {
            match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(_) => break,
            }
        }
    }
}

fn borrowed(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: every fd passed here (the self-pipe, the cmd socket, the raw sockets) outlives the
    // single `poll` call it's used in; none are closed while a `PollFd` referencing them is alive.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

fn readable(fds: &[nix::poll::PollFd], index: usize) -> bool {
    fds.get(index)
        .and_then(|fd| fd.revents())
        .map(|r| r.contains(nix::poll::PollFlags::POLLIN))
        .unwrap_or(false)
}

fn read_u32(body: &[u8]) -> Result<u32> {
    if body.len() < 4 {
        return Err(AppError::PrivsepProtocol("command body shorter than one ifindex".into()));
    }
    Ok(u32::from_le_bytes([body[0], body[1], body[2], body[3]]))
}

fn nix_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
