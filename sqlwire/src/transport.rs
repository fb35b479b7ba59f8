//! The [`Transport`] trait.
use bytes::{Buf, Bytes, BytesMut};
use std::{
    collections::VecDeque,
    io,
    task::{Context, Poll, ready},
};

use crate::{Result, phase::ProtocolError};

/// One complete payload received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Postgres bodies start with the message type, MySQL bodies are the packet payload.
    pub body: Bytes,
    /// Declared payload length.
    pub len: u32,
    /// Packet sequence id, MySQL only.
    pub seq: u8,
}

impl Payload {
    /// Payload whose declared length is the body length.
    pub fn new(body: Bytes, seq: u8) -> Self {
        let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
        Self { body, len, seq }
    }

    pub fn with_len(body: Bytes, len: u32, seq: u8) -> Self {
        Self { body, len, seq }
    }

    /// Postgres message with its message type.
    pub fn message(msgtype: u8, body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.extend_from_slice(&[msgtype]);
        buf.extend_from_slice(body);
        Self::new(buf.freeze(), 0)
    }

    /// First byte of the body.
    pub fn first(&self) -> Option<u8> {
        self.body.first().copied()
    }
}

/// A buffered stream which can send bytes and receive [`Payload`]s.
pub trait Transport: Unpin {
    /// Buffer for outgoing bytes.
    ///
    /// Note that sending is buffered, caller must also call
    /// [`poll_flush`][1] or [`flush`][2] afterwards.
    ///
    /// [1]: Transport::poll_flush
    /// [2]: TransportExt::flush
    fn send_buf(&mut self) -> &mut BytesMut;

    /// Poll to flush the send buffer to the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive one payload.
    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Payload>>;
}

impl<P> Transport for &mut P where P: Transport {
    fn send_buf(&mut self) -> &mut BytesMut {
        P::send_buf(self)
    }

    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Payload>> {
        P::poll_recv(self, cx)
    }
}

/// An extension trait to provide `Future` API for [`Transport`].
pub trait TransportExt: Transport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    /// Receive one payload.
    fn recv(&mut self) -> impl Future<Output = Result<Payload>> {
        std::future::poll_fn(|cx| self.poll_recv(cx))
    }
}

impl<T> TransportExt for T where T: Transport { }

/// How payloads are delimited in a byte stream.
///
/// A [`Transport`] over a socket splits its read buffer with [`Framing::split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Message type, big endian length including itself, body.
    Postgres,
    /// Little endian 3 bytes length, sequence id, body.
    ///
    /// Payloads of maximum length continue in the next packet.
    MySql,
}

const MYSQL_MAX_PACKET: usize = 0xFF_FF_FF;

impl Framing {
    /// Split one complete payload from the front of `buf`.
    ///
    /// Returns `None` if more bytes are required.
    pub fn split(&self, buf: &mut BytesMut) -> Result<Option<Payload>, ProtocolError> {
        match self {
            Framing::Postgres => {
                let Some(mut header) = buf.get(..5) else {
                    return Ok(None);
                };
                header.advance(1);
                let len = header.get_u32() as usize;
                if len < 4 {
                    return Err(ProtocolError::malformed("message length"));
                }
                if buf.len() < 1 + len {
                    buf.reserve(1 + len - buf.len());
                    return Ok(None);
                }
                let mut body = buf.split_to(1 + len);
                // move msgtype next to the body, dropping the length
                body[4] = body[0];
                body.advance(4);
                Ok(Some(Payload::new(body.freeze(), 0)))
            },
            Framing::MySql => {
                // a payload may span several packets, find the last one first
                let mut offset = 0;
                let mut total = 0;
                loop {
                    let Some(mut header) = buf.get(offset..offset + 4) else {
                        return Ok(None);
                    };
                    let len = header.get_uint_le(3) as usize;
                    if buf.len() < offset + 4 + len {
                        buf.reserve(offset + 4 + len - buf.len());
                        return Ok(None);
                    }
                    total += len;
                    offset += 4 + len;
                    if len < MYSQL_MAX_PACKET {
                        break;
                    }
                }

                let mut header = &buf[..4];
                let first_len = header.get_uint_le(3) as u32;
                let seq = header.get_u8();

                let mut body = BytesMut::with_capacity(total);
                let mut packets = buf.split_to(offset);
                while packets.has_remaining() {
                    let len = packets.get_uint_le(3) as usize;
                    packets.advance(1);
                    body.extend_from_slice(&packets[..len]);
                    packets.advance(len);
                }
                Ok(Some(Payload::with_len(body.freeze(), first_len, seq)))
            },
        }
    }
}

/// [`Transport`] which replays scripted payloads and records flushed bytes.
///
/// Receiving when the script is exhausted fails with [`io::ErrorKind::UnexpectedEof`].
#[derive(Debug, Default)]
pub struct Replay {
    script: VecDeque<Payload>,
    write_buf: BytesMut,
    sent: Vec<Bytes>,
}

impl Replay {
    pub fn new(script: impl IntoIterator<Item = Payload>) -> Self {
        Self { script: script.into_iter().collect(), ..Default::default() }
    }

    /// Append payloads to the script.
    pub fn push(&mut self, payloads: impl IntoIterator<Item = Payload>) {
        self.script.extend(payloads);
    }

    /// Bytes of every flush, in order.
    pub fn sent(&self) -> &[Bytes] {
        &self.sent
    }

    /// Payloads not yet received.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Transport for Replay {
    fn send_buf(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
        if !self.write_buf.is_empty() {
            self.sent.push(self.write_buf.split().freeze());
        }
        Poll::Ready(Ok(()))
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Payload>> {
        ready!(self.poll_flush(cx)?);
        match self.script.pop_front() {
            Some(payload) => Poll::Ready(Ok(payload)),
            None => Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_postgres() {
        let mut buf = BytesMut::from(&b"C\0\0\0\x0dSELECT 1\0Z\0\0\0\x05I"[..]);
        let payload = Framing::Postgres.split(&mut buf).unwrap().unwrap();
        assert_eq!(&payload.body[..], b"CSELECT 1\0");
        let payload = Framing::Postgres.split(&mut buf).unwrap().unwrap();
        assert_eq!(&payload.body[..], b"ZI");
        assert!(buf.is_empty());

        let mut buf = BytesMut::from(&b"D\0\0\0\x0a\0\x01"[..]);
        assert!(Framing::Postgres.split(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn split_mysql() {
        let mut buf = BytesMut::from(&b"\x01\x00\x00\x01\x02\x05\x00\x00\x02\x03def"[..]);
        let payload = Framing::MySql.split(&mut buf).unwrap().unwrap();
        assert_eq!(payload, Payload::new(Bytes::from_static(b"\x02"), 1));
        assert!(Framing::MySql.split(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\x00");
        let payload = Framing::MySql.split(&mut buf).unwrap().unwrap();
        assert_eq!(payload.seq, 2);
        assert_eq!(&payload.body[..], b"\x03def\x00");
    }

    #[test]
    fn reassemble_mysql() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\xff\xff\xff\x03");
        buf.extend_from_slice(&vec![7u8; MYSQL_MAX_PACKET]);
        buf.extend_from_slice(b"\x02\x00\x00\x04ab");

        let payload = Framing::MySql.split(&mut buf).unwrap().unwrap();
        assert_eq!(payload.len, MYSQL_MAX_PACKET as u32);
        assert_eq!(payload.seq, 3);
        assert_eq!(payload.body.len(), MYSQL_MAX_PACKET + 2);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn replay_records_flush() {
        let mut io = Replay::new([Payload::message(b'Z', b"I")]);
        io.send_buf().extend_from_slice(b"S\0\0\0\x04");
        let payload = io.recv().await.unwrap();
        assert_eq!(payload.first(), Some(b'Z'));
        assert_eq!(io.sent(), [Bytes::from_static(b"S\0\0\0\x04")]);
        assert!(io.recv().await.is_err());
    }
}
