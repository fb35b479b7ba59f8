//! Postgres frontend messages written by the command encoders.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, BytesMut};

use super::Oid;
use crate::{
    column::Format,
    encode::Encoded,
    ext::{BufMutExt, StrExt, UsizeExt},
};

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    let body_len = msg.body_len();
    buf.reserve(1 + 4 + body_len as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    // length includes itself
    buf.put_u32(4 + body_len);
    msg.encode(buf);

    debug_assert_eq!(
        buf.len() - offset,
        1 + 4 + body_len as usize,
        "{} body length mismatch",
        F::MSGTYPE as char,
    );
}

/// A message sent from the client.
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Length of the body, excluding the message type and the length field.
    fn body_len(&self) -> u32;

    /// Write the body, exactly [`body_len`][FrontendProtocol::body_len] bytes.
    fn encode(self, buf: &mut BytesMut);
}

/// Object addressed by [`Describe`] and [`Close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    fn code(self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }
}

/// Simple query, may contain several statements.
pub struct Query<'a> {
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn body_len(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Create a named prepared statement.
///
/// A zero oid leaves the parameter type to the server.
pub struct Parse<'a> {
    pub name: &'a str,
    pub sql: &'a str,
    pub oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn body_len(&self) -> u32 {
        self.name.nul_string_len() + self.sql.nul_string_len() + 2 + 4 * self.oids.len().to_u32()
    }

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.oids.len().to_u16());
        for &oid in self.oids {
            buf.put_u32(oid);
        }
    }
}

/// Bind parameters to a portal.
///
/// Parameters are always sent in binary, a single format code applies to all of them.
pub struct Bind<'a> {
    pub portal: &'a str,
    pub stmt: &'a str,
    pub params: &'a [Encoded],
    pub results: Format,
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn body_len(&self) -> u32 {
        let values = self.params.iter().map(|e| 4 + e.value().map_or(0, <[u8]>::len).to_u32()).sum::<u32>();
        self.portal.nul_string_len()
            + self.stmt.nul_string_len()
            + 2 + 2 // param format codes
            + 2 + values
            + 2 + 2 // result format codes
    }

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.portal);
        buf.put_nul_string(self.stmt);

        buf.put_u16(1);
        buf.put_u16(Format::Binary.format_code());

        buf.put_u16(self.params.len().to_u16());
        for param in self.params {
            // -1 for NULL, which has no value bytes
            buf.put_i32(param.size());
            if let Some(value) = param.value() {
                buf.put_slice(value);
            }
        }

        buf.put_u16(1);
        buf.put_u16(self.results.format_code());
    }
}

/// Ask for the `RowDescription` (or `NoData`) of a statement or portal.
pub struct Describe<'a>(pub Target, pub &'a str);

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn body_len(&self) -> u32 {
        1 + self.1.nul_string_len()
    }

    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(self.0.code());
        buf.put_nul_string(self.1);
    }
}

/// Run a bound portal.
pub struct Execute<'a> {
    pub portal: &'a str,
    /// Zero denotes no limit.
    pub max_rows: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn body_len(&self) -> u32 {
        self.portal.nul_string_len() + 4
    }

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.portal);
        buf.put_u32(self.max_rows);
    }
}

/// Release a statement or portal on the server.
pub struct Close<'a>(pub Target, pub &'a str);

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn body_len(&self) -> u32 {
        1 + self.1.nul_string_len()
    }

    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(self.0.code());
        buf.put_nul_string(self.1);
    }
}

/// End of an extended query command, the server answers with `ReadyForQuery`.
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn body_len(&self) -> u32 {
        0
    }

    fn encode(self, _: &mut BytesMut) { }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::Encode;

    #[test]
    fn execute_layout() {
        let mut buf = BytesMut::new();
        write(Execute { portal: "p1", max_rows: 2 }, &mut buf);
        assert_eq!(&buf[..], b"E\0\0\0\x0bp1\0\0\0\0\x02");
    }

    #[test]
    fn sync_layout() {
        let mut buf = BytesMut::new();
        write(Sync, &mut buf);
        assert_eq!(&buf[..], b"S\0\0\0\x04");
    }

    #[test]
    fn bind_layout() {
        let mut buf = BytesMut::new();
        let params = [7i16.encode(), None::<i32>.encode()];
        write(Bind { portal: "", stmt: "s1", params: &params, results: Format::Binary }, &mut buf);
        assert_eq!(
            &buf[..],
            b"B\0\0\0\x1c\0s1\0\0\x01\0\x01\0\x02\0\0\0\x02\0\x07\xff\xff\xff\xff\0\x01\0\x01"
        );
    }

    #[test]
    fn parse_layout() {
        let mut buf = BytesMut::new();
        write(Parse { name: "s1", sql: "SELECT $1", oids: &[23] }, &mut buf);
        assert_eq!(&buf[..], b"P\0\0\0\x17s1\0SELECT $1\0\0\x01\0\0\0\x17");
    }
}
