//! The unprivileged child process (§3, §6).
//!
//! Drops privileges once at startup, then owns everything that isn't a raw socket: the interface
//! table, the peer table, the auto-enable state machine, and the transmit scheduler. Every send
//! is routed through the parent via the `cmd` channel; every receive arrives pre-filtered on the
//! `msg` channel.

use std::time::{Duration, Instant};

use nix::unistd::{Gid, Uid};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::iface::{enumerate, ExcludeSet, IfTable};
use crate::ipc::{Channel, Tag};
use crate::peer::{PeerTable, ProtoStates};
use crate::platform::PlatformAdapter;
use crate::proto::Proto;
use crate::scheduler::TxScheduler;
use crate::signal::Signals;
use crate::sysinfo::SysInfo;

const POLL_CAP: Duration = Duration::from_secs(1);

pub struct Child<A: PlatformAdapter> {
    adapter: A,
    config: Config,
    cmd: Channel,
    msg: Channel,
    ifaces: IfTable,
    exclude: ExcludeSet,
    peers: PeerTable,
    protos: ProtoStates,
    scheduler: TxScheduler,
    sysinfo: SysInfo,
    opened: std::collections::BTreeSet<u32>,
}

impl<A: PlatformAdapter> Child<A> {
    pub fn new(adapter: A, config: Config, cmd: Channel, msg: Channel) -> Result<Self> {
        let mut exclude = ExcludeSet::new();
        for name in &config.exclude {
            exclude.insert(name.clone());
        }

        let mut ifaces = IfTable::new();
        enumerate(&adapter, &mut ifaces, &exclude)?;

        let sysinfo = SysInfo::collect(&adapter, &config, ifaces.physif_count)
            .map_err(|e| AppError::io_fatal("sysinfo collection", e))?;

        let protos = ProtoStates::new(&config.protocols, config.auto_enable);
        let scheduler = TxScheduler::new(Duration::from_secs(config.interval_secs as u64));

        Ok(Child {
            adapter,
            config,
            cmd,
            msg,
            ifaces,
            exclude,
            peers: PeerTable::new(),
            protos,
            scheduler,
            sysinfo,
            opened: std::collections::BTreeSet::new(),
        })
    }

    /// Drops from root to the configured unprivileged account, optionally chrooting. Must run
    /// before any frame is processed and before the event loop starts; the parent retains every
    /// capability this step gives away.
    pub fn drop_privileges(&self) -> Result<()> {
        let user = nix::unistd::User::from_name(&self.config.user)
            .map_err(|e| AppError::PermissionDenied(format!("looking up user {}: {e}", self.config.user)))?
            .ok_or_else(|| AppError::PermissionDenied(format!("no such user: {}", self.config.user)))?;

        nix::unistd::chroot(crate::config::CHROOT_DIR)
            .map_err(|e| AppError::PermissionDenied(format!("chroot to {}: {e}", crate::config::CHROOT_DIR)))?;
        std::env::set_current_dir("/").map_err(|e| AppError::io_fatal("chdir after chroot", e))?;

        let gid = Gid::from_raw(user.gid.as_raw());
        nix::unistd::setgid(gid).map_err(|e| AppError::PermissionDenied(format!("setgid: {e}")))?;
        let uid = Uid::from_raw(user.uid.as_raw());
        nix::unistd::setuid(uid).map_err(|e| AppError::PermissionDenied(format!("setuid: {e}")))?;
        Ok(())
    }

    /// Performs exactly one enumerate-and-transmit pass and returns, for `-o` (§4.4).
    pub fn run_once(&mut self) -> Result<()> {
        let now = Instant::now();
        self.reconcile_schedule(now);
        for (ifindex, proto) in self.scheduler.due(now) {
            self.transmit(ifindex, proto, proto.module().default_ttl_secs())?;
        }
        Ok(())
    }

    /// Runs until a shutdown signal or the `cmd`/`msg` channels close.
    pub fn run(&mut self) -> Result<()> {
        let signals = Signals::install(false)?;
        self.reconcile_schedule(Instant::now());

        let result = self.event_loop(&signals);
        self.send_goodbyes();
        let _ = self.cmd.send(Tag::Shutdown, &[]);
        match result {
            Err(AppError::Shutdown) => Ok(()),
            other => other,
        }
    }

    fn event_loop(&mut self, signals: &Signals) -> Result<()> {
        loop {
            let now = Instant::now();
            self.peers.expire(now);

            let wait = self.scheduler.next_wait(now, POLL_CAP);
            let targets = [signals.read_fd, self.cmd.as_raw_fd(), self.msg.as_raw_fd()];
            let mut fds: Vec<nix::poll::PollFd> = targets
                .iter()
                .map(|&fd| nix::poll::PollFd::new(borrowed(fd), nix::poll::PollFlags::POLLIN))
                .collect();
            let timeout_ms = wait.as_millis().min(i32::MAX as u128) as i32;

            match nix::poll::poll(&mut fds, timeout_ms) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(AppError::io_fatal("child poll", nix_io(e))),
            }

            let fired = signals.take();
            if fired.shutdown_requested() {
                return Err(AppError::Shutdown);
            }
            if fired.hup {
                self.reenumerate()?;
            }

            if readable(&fds, 1) {
                match self.cmd.recv() {
                    Ok(frame) if frame.tag == Tag::Shutdown => return Err(AppError::Shutdown),
                    Ok(_) => {} // Ack/Nack to a prior request; nothing to reconcile here.
                    Err(AppError::Shutdown) => return Err(AppError::Shutdown),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => tracing::warn!(error = %e, "cmd channel read failed"),
                }
            }

            if readable(&fds, 2) {
                match self.msg.recv() {
                    Ok(frame) if frame.tag == Tag::Recv => self.on_recv(&frame.body),
                    Ok(_) => {}
                    Err(AppError::Shutdown) => return Err(AppError::Shutdown),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => tracing::warn!(error = %e, "msg channel read failed"),
                }
            }

            let now = Instant::now();
            for (ifindex, proto) in self.scheduler.due(now) {
                if let Err(e) = self.transmit(ifindex, proto, proto.module().default_ttl_secs()) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, %proto, ifindex, "transmit failed");
                }
            }
        }
    }

    fn on_recv(&mut self, body: &[u8]) {
        if body.len() < 4 {
            tracing::warn!("Recv body shorter than one ifindex, dropping");
            return;
        }
        let ifindex = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let bytes = crate::proto::strip_vlan_tag(&body[4..]);
        let bytes = bytes.as_ref();

        let Some(proto) = crate::proto::classify(bytes) else {
            return;
        };
        if !self.protos.is_enabled(proto) && !self.config.auto_enable {
            return;
        }
        match proto.module().decode(bytes) {
            Ok(neighbor) => {
                let now = Instant::now();
                self.protos.on_decode(proto, now);
                self.peers.apply(ifindex, proto, neighbor, now);
                if self.config.write_descr {
                    self.write_descr_for(ifindex, proto);
                }
            }
            Err(e) => tracing::debug!(error = %e, %proto, ifindex, "dropping malformed frame"),
        }
    }

    fn write_descr_for(&mut self, ifindex: u32, proto: Proto) {
        let Some(netif) = self.ifaces.get(ifindex) else { return };
        let Some(record) = self.peers.get(ifindex, proto) else { return };
        let descr = format!("{}: {} ({})", proto, record.chassis_id, record.port_id);
        let mut body = Vec::with_capacity(1 + netif.name.len() + descr.len());
        body.push(netif.name.len().min(255) as u8);
        body.extend_from_slice(netif.name.as_bytes());
        body.extend_from_slice(descr.as_bytes());
        if let Err(e) = self.cmd.send(Tag::SetDescr, &body) {
            tracing::warn!(error = %e, "SetDescr request failed");
        }
    }

    fn reenumerate(&mut self) -> Result<()> {
        enumerate(&self.adapter, &mut self.ifaces, &self.exclude)?;
        self.reconcile_schedule(Instant::now());
        Ok(())
    }

    fn reconcile_schedule(&mut self, now: Instant) {
        let enabled = self.protos.enabled_protocols();
        let pairs: Vec<(u32, Proto)> = self
            .ifaces
            .iter()
            .filter(|n| n.is_eligible(self.config.include_tap, self.config.include_wireless))
            .flat_map(|n| enabled.iter().map(move |&p| (n.index, p)))
            .collect();
        self.scheduler.reconcile(pairs, now);
    }

    fn transmit(&mut self, ifindex: u32, proto: Proto, ttl_secs: u16) -> Result<()> {
        if !self.config.send {
            return Ok(());
        }
        let Some(netif) = self.ifaces.get(ifindex) else {
            return Ok(());
        };
        let local_mac = if self.config.chassis_per_iface {
            netif.hwaddr
        } else {
            self.ifaces.iter().next().map(|n| n.hwaddr).unwrap_or(netif.hwaddr)
        };

        let scoped_sysinfo;
        let info = if !self.config.maddr_all_ifaces && !Self::owns_mgmt_addr(netif, self.sysinfo.mgmt_addr) {
            scoped_sysinfo = SysInfo { mgmt_addr: None, ..self.sysinfo.clone() };
            &scoped_sysinfo
        } else {
            &self.sysinfo
        };

        let mut buf = [0u8; crate::tlv::ETHER_MAX_LEN];
        let local_ipv4 = netif.ipv4.first().copied();
        let n = proto.module().encode(info, local_mac, &netif.name, ifindex, local_ipv4, ttl_secs, &mut buf)?;

        self.ensure_opened(ifindex)?;
        let mut body = Vec::with_capacity(4 + n);
        body.extend_from_slice(&ifindex.to_le_bytes());
        body.extend_from_slice(&buf[..n]);
        self.cmd.send(Tag::Send, &body)?;
        self.cmd.recv().map(|_| ())
    }

    /// Whether `netif` is the interface the configured management address resolves to. Without
    /// `-n`, only that interface's outgoing frames carry the management address TLV.
    fn owns_mgmt_addr(netif: &crate::iface::NetIf, mgmt_addr: Option<std::net::IpAddr>) -> bool {
        match mgmt_addr {
            Some(std::net::IpAddr::V4(v4)) => netif.ipv4.contains(&v4),
            Some(std::net::IpAddr::V6(v6)) => netif.ipv6.contains(&v6),
            None => false,
        }
    }

    fn ensure_opened(&mut self, ifindex: u32) -> Result<()> {
        if self.opened.contains(&ifindex) {
            return Ok(());
        }
        self.cmd.send(Tag::OpenTx, &ifindex.to_le_bytes())?;
        self.cmd.recv()?;
        self.opened.insert(ifindex);
        Ok(())
    }

    fn send_goodbyes(&mut self) {
        let now = Instant::now();
        for (ifindex, proto) in self.scheduler.due_for_goodbye() {
            if let Err(e) = self.transmit(ifindex, proto, 0) {
                tracing::warn!(error = %e, %proto, ifindex, "goodbye transmit failed");
            }
        }
        let _ = now;
    }
}

fn borrowed(fd: std::os::unix::io::RawFd) -> std::os::fd::BorrowedFd<'static> {
    // SAFETY: the self-pipe and both IPC channel fds outlive every `poll` call they're used in.
    unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }
}

fn readable(fds: &[nix::poll::PollFd], index: usize) -> bool {
    fds.get(index)
        .and_then(|fd| fd.revents())
        .map(|r| r.contains(nix::poll::PollFlags::POLLIN))
        .unwrap_or(false)
}

fn nix_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
