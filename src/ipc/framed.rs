//! Primitive frame encoders/decoders.
//!
//! Four encodings, per the wire format: `simple` (fixed-width host byte
//! order scalars -- safe only because every peer is a fork of the same
//! orchestrator binary), `buf` (`uint32` length prefix plus bytes),
//! `str` (the same, required to be valid UTF-8), and `fd` (out-of-band
//! descriptor passing, used solely to hand an HTTP response body to the
//! RRDP worker).

use std::io::{self, Read, Write};

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Maximum accepted `buf`/`str` length. Guards against a corrupt or
/// hostile peer driving an allocation from an attacker-controlled
/// length prefix; exceeding it is the framed-decode overflow case that
/// maps to a `Fatal` error (spec error kind 6).
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

pub fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_ne_bytes(buf))
}

pub fn write_buf<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), FramedError> {
    let len = u32::try_from(bytes.len()).map_err(|_| FramedError::Overflow)?;
    if len > MAX_FRAME_LEN {
        return Err(FramedError::Overflow);
    }
    write_u32(w, len)?;
    w.write_all(bytes)?;
    Ok(())
}

pub fn read_buf<R: Read>(r: &mut R) -> Result<Vec<u8>, FramedError> {
    let len = read_u32(r)?;
    if len > MAX_FRAME_LEN {
        return Err(FramedError::Overflow);
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_str<W: Write>(w: &mut W, s: &str) -> Result<(), FramedError> {
    write_buf(w, s.as_bytes())
}

pub fn read_str<R: Read>(r: &mut R) -> Result<String, FramedError> {
    let bytes = read_buf(r)?;
    String::from_utf8(bytes).map_err(|_| FramedError::Malformed)
}

/// Sends an open file descriptor as ancillary data alongside a
/// one-byte marker, used only to hand an HTTP response body over to
/// the RRDP worker without copying it through the orchestrator.
#[cfg(unix)]
pub fn send_fd(sock: RawFd, fd: RawFd) -> Result<(), FramedError> {
    use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
    use std::io::IoSlice;
    let marker = [0u8; 1];
    let iov = [IoSlice::new(&marker)];
    let fds = [fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(sock, &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|_| FramedError::Io)?;
    Ok(())
}

#[cfg(unix)]
pub fn recv_fd(sock: RawFd) -> Result<RawFd, FramedError> {
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
    use std::io::IoSliceMut;
    let mut marker = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut marker)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
    let msg = recvmsg::<()>(sock, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
        .map_err(|_| FramedError::Io)?;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(fd) = fds.first() {
                return Ok(*fd);
            }
        }
    }
    Err(FramedError::Malformed)
}

//------------ FramedError --------------------------------------------------------

#[derive(Debug)]
pub enum FramedError {
    Io,
    Overflow,
    Malformed,
}

impl From<io::Error> for FramedError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FramedError::Malformed
        } else {
            FramedError::Io
        }
    }
}

impl std::fmt::Display for FramedError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FramedError::Io => f.write_str("I/O error on framed channel"),
            FramedError::Overflow => f.write_str("frame length exceeds maximum"),
            FramedError::Malformed => f.write_str("malformed frame"),
        }
    }
}

impl std::error::Error for FramedError { }

impl From<FramedError> for io::Error {
    fn from(err: FramedError) -> Self {
        match err {
            FramedError::Io => io::Error::new(io::ErrorKind::Other, err.to_string()),
            FramedError::Overflow | FramedError::Malformed => {
                io::Error::new(io::ErrorKind::InvalidData, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn buf_round_trips() {
        let mut wire = Vec::new();
        write_buf(&mut wire, b"hello world").unwrap();
        let mut cursor = Cursor::new(wire);
        assert_eq!(read_buf(&mut cursor).unwrap(), b"hello world");
    }

    #[test]
    fn str_round_trips() {
        let mut wire = Vec::new();
        write_str(&mut wire, "rsync://host/module/ca.cer").unwrap();
        let mut cursor = Cursor::new(wire);
        assert_eq!(read_str(&mut cursor).unwrap(), "rsync://host/module/ca.cer");
    }

    #[test]
    fn u32_round_trips() {
        let mut wire = Vec::new();
        write_u32(&mut wire, 0xdead_beef).unwrap();
        let mut cursor = Cursor::new(wire);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0xdead_beef);
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut wire = Vec::new();
        write_u32(&mut wire, MAX_FRAME_LEN + 1).unwrap();
        let mut cursor = Cursor::new(wire);
        assert!(matches!(read_buf(&mut cursor), Err(FramedError::Overflow)));
    }
}
