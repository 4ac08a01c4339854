//! Frame-level byte I/O.
//!
//! Reading uses `tokio`'s big-endian `AsyncReadExt` helpers directly against
//! the socket; a complete frame is read with a single length-prefixed
//! `read_exact`, which gives us "wait for more bytes, never lose the
//! partial buffer" for free instead of hand-rolled accumulation.
//!
//! Building outbound frames is synchronous: handlers assemble a `Vec<u8>`
//! with [`FrameWriter`] (styled after the teacher's `BinaryWriter<W: Write>`)
//! and hand the finished bytes to a session's outbound queue.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// A fully-read, still-undecoded frame.
#[derive(Debug)]
pub struct RawFrame {
    pub seq: u32,
    pub payload: Vec<u8>,
}

/// Sequence numbers `>= 0x8000_0000` are server-initiated pushes; anything
/// below is a request sequence echoed back in the ACK/NACK.
pub fn is_push_seq(seq: u32) -> bool {
    seq >= 0x8000_0000
}

/// Read one complete frame. Returns `Ok(None)` on a clean EOF that arrives
/// before any bytes of a new frame — the normal way a connection ends.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<RawFrame>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len < 4 {
        return Err(WireError::FrameTooShort);
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let seq = BigEndian::read_u32(&body[0..4]);
    let payload = body[4..].to_vec();
    Ok(Some(RawFrame { seq, payload }))
}

/// Write already-framed bytes and flush. A session's writer task is the
/// only place this is called from — handlers never touch a socket directly.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Assembles one outbound frame's payload field by field, then hands back
/// the complete `len | seq | payload` bytes.
#[derive(Default)]
pub struct FrameWriter {
    payload: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.payload
            .write_u32::<BigEndian>(v)
            .expect("writes into a Vec<u8> never fail");
        self
    }

    /// Length-prefixed string field.
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_u32(s.len() as u32);
        self.payload.extend_from_slice(s.as_bytes());
        self
    }

    /// Raw bytes with no length prefix of their own (trailing blobs whose
    /// size is implied by the frame length, e.g. gamebuffer/savestate).
    pub fn write_bytes(&mut self, b: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(b);
        self
    }

    pub fn finish(self, seq: u32) -> Vec<u8> {
        assemble(seq, &self.payload)
    }
}

/// Assemble a complete frame from a sequence number and a ready payload.
pub fn assemble(seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.write_u32::<BigEndian>(4 + payload.len() as u32)
        .expect("writes into a Vec<u8> never fail");
    out.write_u32::<BigEndian>(seq)
        .expect("writes into a Vec<u8> never fail");
    out.extend_from_slice(payload);
    out
}

/// A four-zero-byte ACK payload, echoing the request sequence.
pub fn ack(seq: u32) -> Vec<u8> {
    assemble(seq, &[0, 0, 0, 0])
}

/// A NACK carrying a big-endian error code, echoing the request sequence.
pub fn nack(seq: u32, code: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload
        .write_u32::<BigEndian>(code)
        .expect("writes into a Vec<u8> never fail");
    assemble(seq, &payload)
}

/// Cursor-based decoder for a request payload's fields.
pub struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(payload),
        }
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        self.cursor.read_u32::<BigEndian>()
    }

    /// Length-prefixed string. The wire makes no encoding guarantee, so
    /// invalid UTF-8 is replaced rather than treated as a decode error.
    pub fn read_string(&mut self) -> io::Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_raw(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_raw(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Everything left in the payload: trailing byte blobs (gamebuffer /
    /// savestate) whose length is implied by the frame, not re-encoded.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let pos = self.cursor.position() as usize;
        let rest = self.cursor.get_ref()[pos..].to_vec();
        self.cursor.set_position(self.cursor.get_ref().len() as u64);
        rest
    }
}
