//! Length-prefixed framing for the two socketpairs that connect the privileged parent to the
//! unprivileged child: `cmd` (child → parent requests, parent → child replies) and `msg`
//! (parent → child: received frames and peer-table deltas).
//!
//! Every frame is `{u16 tag; u16 len; u8 body[len]}`, little-endian. Reads go through a
//! [`buf_redux::BufReader`] with a [`MinBuffered`] policy so a short read never has to be
//! reassembled by hand — the same pattern the teacher library uses in `block/rdr.rs` to buffer a
//! pcap-ng section reader, generalised here from a file reader to a socketpair reader.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use buf_redux::policy::MinBuffered;
use buf_redux::BufReader;

use crate::error::{AppError, Result};

const MAX_BODY_LEN: usize = crate::tlv::ETHER_MAX_LEN + 64;
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    OpenTx = 1,
    Send = 2,
    Recv = 3,
    SetDescr = 4,
    Shutdown = 5,
    Peer = 6,
    Ack = 7,
    Nack = 8,
}

impl Tag {
    fn from_u16(v: u16) -> Result<Self> {
        Ok(match v {
            1 => Tag::OpenTx,
            2 => Tag::Send,
            3 => Tag::Recv,
            4 => Tag::SetDescr,
            5 => Tag::Shutdown,
            6 => Tag::Peer,
            7 => Tag::Ack,
            8 => Tag::Nack,
            other => return Err(AppError::PrivsepProtocol(format!("unknown ipc tag {other}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: Tag,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(tag: Tag, body: Vec<u8>) -> Result<Self> {
        if body.len() > MAX_BODY_LEN {
            return Err(AppError::PrivsepProtocol(format!(
                "ipc body too large: {} > {MAX_BODY_LEN}",
                body.len()
            )));
        }
        Ok(Frame { tag, body })
    }
}

/// A buffered, length-prefixed reader/writer pair over one end of a socketpair.
pub struct Channel {
    reader: BufReader<UnixStream, MinBuffered>,
    writer: UnixStream,
}

impl Channel {
    pub fn new(stream: UnixStream) -> Result<Self> {
        let writer = stream.try_clone().map_err(|e| AppError::io_fatal("ipc channel dup", e))?;
        let reader = BufReader::with_capacity(4096, stream).set_policy(MinBuffered(HEADER_LEN));
        Ok(Channel { reader, writer })
    }

    pub fn send(&mut self, tag: Tag, body: &[u8]) -> Result<()> {
        if body.len() > MAX_BODY_LEN {
            return Err(AppError::PrivsepProtocol(format!(
                "ipc body too large: {} > {MAX_BODY_LEN}",
                body.len()
            )));
        }
        let mut header = [0u8; HEADER_LEN];
        header[0..2].copy_from_slice(&(tag as u16).to_le_bytes());
        header[2..4].copy_from_slice(&(body.len() as u16).to_le_bytes());
        self.writer
            .write_all(&header)
            .map_err(|e| AppError::io_transient("ipc write header", e))?;
        self.writer
            .write_all(body)
            .map_err(|e| AppError::io_transient("ipc write body", e))?;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact_mapped(&mut header)?;
        let tag = Tag::from_u16(u16::from_le_bytes([header[0], header[1]]))?;
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        if len > MAX_BODY_LEN {
            return Err(AppError::PrivsepProtocol(format!(
                "peer declared an oversized ipc body: {len} > {MAX_BODY_LEN}"
            )));
        }
        let mut body = vec![0u8; len];
        self.read_exact_mapped(&mut body)?;
        Ok(Frame { tag, body })
    }

    fn read_exact_mapped(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(AppError::Shutdown),
            Err(e) => Err(AppError::io_transient("ipc read", e)),
        }
    }

    /// The fd an event loop should `poll(2)` for readability. Shared by the reader and writer
    /// halves since both wrap the same underlying socketpair fd.
    pub fn as_raw_fd(&self) -> RawFd {
        self.writer.as_raw_fd()
    }
}

/// Builds the two socketpairs (`cmd`, `msg`) the parent and child share across `fork(2)`.
pub fn new_channel_pair() -> Result<(UnixStream, UnixStream)> {
    UnixStream::pair().map_err(|e| AppError::io_fatal("ipc socketpair", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame_over_a_real_socketpair() {
        let (a, b) = new_channel_pair().unwrap();
        let mut chan_a = Channel::new(a).unwrap();
        let mut chan_b = Channel::new(b).unwrap();

        chan_a.send(Tag::Send, b"hello").unwrap();
        let frame = chan_b.recv().unwrap();
        assert_eq!(frame.tag, Tag::Send);
        assert_eq!(frame.body, b"hello");
    }

    #[test]
    fn rejects_oversized_body_before_writing() {
        let (a, _b) = new_channel_pair().unwrap();
        let mut chan_a = Channel::new(a).unwrap();
        let oversized = vec![0u8; MAX_BODY_LEN + 1];
        assert!(chan_a.send(Tag::Send, &oversized).is_err());
    }

    #[test]
    fn peer_shutdown_surfaces_as_shutdown_error() {
        let (a, b) = new_channel_pair().unwrap();
        drop(a);
        let mut chan_b = Channel::new(b).unwrap();
        let err = chan_b.recv().unwrap_err();
        assert!(matches!(err, AppError::Shutdown));
    }
}
