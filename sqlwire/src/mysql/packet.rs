//! MySQL response packets.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_response_packets.html>
use bytes::{Buf, Bytes};

use super::{Capabilities, Status};
use crate::{
    column::{ColumnDefinition, Format, RowDesc},
    common::ByteStr,
    error::ServerError,
    phase::ProtocolError,
};

pub const OK_HEADER: u8 = 0x00;
pub const LOCAL_INFILE_HEADER: u8 = 0xFB;
pub const EOF_HEADER: u8 = 0xFE;
pub const ERR_HEADER: u8 = 0xFF;

/// Payloads of this declared length or longer are never a terminal marker.
pub const MAX_PAYLOAD_LEN: u32 = 0xFF_FF_FF;

/// Checked reads of MySQL wire primitives.
pub trait MySqlBufExt {
    fn get_u8_checked(&mut self) -> Result<u8, ProtocolError>;

    fn get_u16_le_checked(&mut self) -> Result<u16, ProtocolError>;

    fn get_u32_le_checked(&mut self) -> Result<u32, ProtocolError>;

    /// Read a length-encoded integer, `None` is the `0xFB` NULL marker.
    fn get_uint_lenenc(&mut self) -> Result<Option<u64>, ProtocolError>;

    /// Read a length-encoded byte sequence, `None` is the `0xFB` NULL marker.
    fn get_bytes_lenenc(&mut self) -> Result<Option<Bytes>, ProtocolError>;

    fn get_str_lenenc(&mut self) -> Result<ByteStr, ProtocolError>;
}

fn truncated() -> ProtocolError {
    ProtocolError::malformed("packet, unexpected end of payload")
}

macro_rules! checked {
    ($self:ident, $n:literal, $get:ident) => {{
        if $self.remaining() < $n {
            return Err(truncated());
        }
        Ok($self.$get())
    }};
}

impl MySqlBufExt for Bytes {
    fn get_u8_checked(&mut self) -> Result<u8, ProtocolError> {
        checked!(self, 1, get_u8)
    }

    fn get_u16_le_checked(&mut self) -> Result<u16, ProtocolError> {
        checked!(self, 2, get_u16_le)
    }

    fn get_u32_le_checked(&mut self) -> Result<u32, ProtocolError> {
        checked!(self, 4, get_u32_le)
    }

    fn get_uint_lenenc(&mut self) -> Result<Option<u64>, ProtocolError> {
        let int = match self.get_u8_checked()? {
            0xFB => return Ok(None),
            0xFC => u64::from(self.get_u16_le_checked()?),
            0xFD => {
                if self.remaining() < 3 {
                    return Err(truncated());
                }
                self.get_uint_le(3)
            },
            0xFE => {
                if self.remaining() < 8 {
                    return Err(truncated());
                }
                self.get_u64_le()
            },
            0xFF => return Err(ProtocolError::malformed("length encoded integer")),
            v => u64::from(v),
        };
        Ok(Some(int))
    }

    fn get_bytes_lenenc(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        let Some(len) = self.get_uint_lenenc()? else {
            return Ok(None);
        };
        let len = usize::try_from(len).map_err(|_| truncated())?;
        if self.len() < len {
            return Err(truncated());
        }
        Ok(Some(self.split_to(len)))
    }

    fn get_str_lenenc(&mut self) -> Result<ByteStr, ProtocolError> {
        match self.get_bytes_lenenc()? {
            Some(bytes) => ByteStr::from_utf8(bytes).map_err(|_| ProtocolError::malformed("utf8 string")),
            None => Ok(ByteStr::default()),
        }
    }
}

/// Successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: Status,
    pub warnings: u16,
}

impl OkPacket {
    /// Decode OK packet, the header may be `0x00` or `0xFE` when EOF is deprecated.
    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let header = body.get_u8_checked()?;
        if !matches!(header, OK_HEADER | EOF_HEADER) {
            return Err(ProtocolError::unexpected(OK_HEADER, header));
        }

        let affected_rows = body.get_uint_lenenc()?.unwrap_or_default();
        let last_insert_id = body.get_uint_lenenc()?.unwrap_or_default();
        let status = Status::from_bits_truncate(body.get_u16_le_checked()?);
        let warnings = body.get_u16_le_checked()?;

        Ok(Self { affected_rows, last_insert_id, status, warnings })
    }
}

/// Legacy terminal marker.
#[derive(Debug, Clone, Copy)]
pub struct EofPacket {
    pub warnings: u16,
    pub status: Status,
}

impl EofPacket {
    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let header = body.get_u8_checked()?;
        if header != EOF_HEADER {
            return Err(ProtocolError::unexpected(EOF_HEADER, header));
        }

        let warnings = body.get_u16_le_checked()?;
        let status = Status::from_bits_truncate(body.get_u16_le_checked()?);

        Ok(Self { warnings, status })
    }
}

/// Decode ERR packet into [`ServerError`].
pub fn decode_err(mut body: Bytes, capabilities: Capabilities) -> Result<ServerError, ProtocolError> {
    let header = body.get_u8_checked()?;
    if header != ERR_HEADER {
        return Err(ProtocolError::unexpected(ERR_HEADER, header));
    }

    let code = body.get_u16_le_checked()?;

    let mut sql_state = None;
    if capabilities.contains(Capabilities::PROTOCOL_41) && body.first() == Some(&b'#') {
        body.advance(1);
        if body.len() < 5 {
            return Err(truncated());
        }
        let state = ByteStr::from_utf8(body.split_to(5))
            .map_err(|_| ProtocolError::malformed("sql state"))?;
        sql_state = Some(state);
    }

    let message = ByteStr::from_utf8(body).map_err(|_| ProtocolError::malformed("error message"))?;

    Ok(ServerError {
        code: Some(code),
        sql_state,
        severity: None,
        message,
        detail: None,
    })
}

/// Decode the column count packet.
pub fn decode_column_count(mut body: Bytes) -> Result<usize, ProtocolError> {
    let count = body
        .get_uint_lenenc()?
        .ok_or_else(|| ProtocolError::malformed("column count"))?;
    usize::try_from(count).map_err(|_| ProtocolError::malformed("column count"))
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html
/// Decode one `ColumnDefinition41` packet.
pub fn decode_column(mut body: Bytes, ordinal: u16) -> Result<ColumnDefinition, ProtocolError> {
    let catalog = body.get_str_lenenc()?;
    if catalog != "def" {
        return Err(ProtocolError::malformed("column definition catalog"));
    }

    let _schema = body.get_str_lenenc()?;
    let _table_alias = body.get_str_lenenc()?;
    let _table = body.get_str_lenenc()?;
    let alias = body.get_str_lenenc()?;
    let _name = body.get_str_lenenc()?;

    let fixed_len = body.get_uint_lenenc()?.unwrap_or_default();
    if fixed_len != 0x0c {
        return Err(ProtocolError::malformed("column definition fixed fields"));
    }

    let _charset = body.get_u16_le_checked()?;
    let _max_size = body.get_u32_le_checked()?;
    let ty = body.get_u8_checked()?;
    let flags = body.get_u16_le_checked()?;
    let _decimals = body.get_u8_checked()?;

    Ok(ColumnDefinition::new(ordinal, alias, ty.into(), Format::Text).with_flags(flags))
}

/// Decode a text protocol row, one length-encoded value per column.
pub fn decode_text_row(mut body: Bytes, desc: &RowDesc) -> Result<Vec<Option<Bytes>>, ProtocolError> {
    let mut values = Vec::with_capacity(desc.len());
    for _ in 0..desc.len() {
        values.push(body.get_bytes_lenenc()?);
    }
    if body.has_remaining() {
        return Err(ProtocolError::malformed("text row, trailing bytes"));
    }
    Ok(values)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn err_packet() {
        let body = Bytes::from_static(b"\xff\x19\x04#42000Unknown database 'unknown'");
        let err = decode_err(body, Capabilities::PROTOCOL_41).unwrap();
        assert_eq!(err.code(), Some(1049));
        assert_eq!(err.sql_state(), Some("42000"));
        assert_eq!(err.message(), "Unknown database 'unknown'");

        let body = Bytes::from_static(b"\xff\x84\x04Got packets out of order");
        let err = decode_err(body, Capabilities::PROTOCOL_41).unwrap();
        assert_eq!(err.code(), Some(1156));
        assert_eq!(err.sql_state(), None);
    }

    #[test]
    fn ok_packet() {
        let ok = OkPacket::decode(Bytes::from_static(b"\x00\x03\xfc\x10\x27\x02\x00\x00\x00")).unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.last_insert_id, 10000);
        assert_eq!(ok.status, Status::AUTOCOMMIT);

        assert!(OkPacket::decode(Bytes::from_static(b"\x00\x01")).is_err());
    }

    #[test]
    fn eof_packet() {
        let eof = EofPacket::decode(Bytes::from_static(b"\xfe\x00\x00\x0a\x00")).unwrap();
        assert!(eof.status.contains(Status::MORE_RESULTS_EXISTS));
        assert!(EofPacket::decode(Bytes::from_static(b"\x00\x00\x00\x02\x00")).is_err());
    }

    #[test]
    fn column_definition() {
        let body = Bytes::from_static(
            b"\x03def\x04test\x05users\x05users\x02id\x02id\x0c\x3f\x00\x0b\x00\x00\x00\x03\x03\x42\x00",
        );
        let col = decode_column(body, 0).unwrap();
        assert_eq!(col.name(), "id");
        assert_eq!(col.type_code(), 3);
        assert_eq!(col.flags(), 0x4203);
        assert_eq!(col.format(), Format::Text);
    }

    #[test]
    fn text_row() {
        let desc = RowDesc::new(vec![
            ColumnDefinition::new(0, "id", 3, Format::Text),
            ColumnDefinition::new(1, "name", 253, Format::Text),
        ]);
        let values = decode_text_row(Bytes::from_static(b"\x0242\xfb"), &desc).unwrap();
        assert_eq!(values, vec![Some(Bytes::from_static(b"42")), None]);

        assert!(decode_text_row(Bytes::from_static(b"\x0242"), &desc).is_err());
        assert!(decode_text_row(Bytes::from_static(b"\x0242\xfb\x00"), &desc).is_err());
    }
}
