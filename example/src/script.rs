//! Server responses replayed by the examples.
use bytes::{BufMut, BytesMut};
use sqlwire::transport::Payload;

pub fn mysql(seq: u8, body: &[u8]) -> Payload {
    Payload::new(BytesMut::from(body).freeze(), seq)
}

/// MySQL column definition of a `BIGINT` or `VARCHAR` column.
pub fn mysql_column(seq: u8, name: &str, type_code: u8) -> Payload {
    let mut body = BytesMut::new();
    for part in ["def", "", "t", "t", name, name] {
        body.put_u8(part.len() as u8);
        body.put_slice(part.as_bytes());
    }
    body.put_u8(0x0c);
    body.put_u16_le(0x21);
    body.put_u32_le(255);
    body.put_u8(type_code);
    body.put_u16_le(0);
    body.put_u8(0);
    body.put_u16_le(0);
    Payload::new(body.freeze(), seq)
}

/// MySQL text protocol row.
pub fn mysql_row(seq: u8, values: &[&str]) -> Payload {
    let mut body = BytesMut::new();
    for value in values {
        body.put_u8(value.len() as u8);
        body.put_slice(value.as_bytes());
    }
    Payload::new(body.freeze(), seq)
}

pub fn pg(msgtype: u8, body: &[u8]) -> Payload {
    Payload::message(msgtype, body)
}

/// Postgres row description of binary `int4` columns.
pub fn pg_columns(names: &[&str]) -> Payload {
    let mut body = BytesMut::new();
    body.put_u16(names.len() as u16);
    for name in names {
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        body.put_u32(0);
        body.put_i16(0);
        body.put_u32(23);
        body.put_i16(4);
        body.put_i32(-1);
        body.put_u16(1);
    }
    pg(b'T', &body)
}

/// Postgres data row of `int4` values.
pub fn pg_row(values: &[i32]) -> Payload {
    let mut body = BytesMut::new();
    body.put_u16(values.len() as u16);
    for value in values {
        body.put_i32(4);
        body.put_i32(*value);
    }
    pg(b'D', &body)
}

pub fn pg_complete(tag: &str) -> Payload {
    let mut body = BytesMut::from(tag.as_bytes());
    body.put_u8(0);
    pg(b'C', &body)
}

pub fn pg_ready() -> Payload {
    pg(b'Z', b"I")
}
