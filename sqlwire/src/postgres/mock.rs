//! Backend payload builders for tests.
use bytes::{Buf, BufMut, BytesMut};

use super::Oid;
use crate::transport::Payload;

fn message(msgtype: u8, f: impl FnOnce(&mut BytesMut)) -> Payload {
    let mut body = BytesMut::new();
    f(&mut body);
    Payload::message(msgtype, &body)
}

pub fn parse_complete() -> Payload {
    Payload::message(b'1', b"")
}

pub fn bind_complete() -> Payload {
    Payload::message(b'2', b"")
}

pub fn close_complete() -> Payload {
    Payload::message(b'3', b"")
}

pub fn no_data() -> Payload {
    Payload::message(b'n', b"")
}

pub fn portal_suspended() -> Payload {
    Payload::message(b's', b"")
}

pub fn ready() -> Payload {
    Payload::message(b'Z', b"I")
}

/// Binary format columns.
pub fn row_description(columns: &[(&str, Oid)]) -> Payload {
    message(b'T', |buf| {
        buf.put_u16(columns.len() as u16);
        for (name, oid) in columns {
            buf.put_slice(name.as_bytes());
            buf.put_u8(0);
            buf.put_u32(0);
            buf.put_i16(0);
            buf.put_u32(*oid);
            buf.put_i16(-1);
            buf.put_i32(-1);
            buf.put_u16(1);
        }
    })
}

pub fn data_row(values: &[Option<&[u8]>]) -> Payload {
    message(b'D', |buf| {
        buf.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(value) => {
                    buf.put_i32(value.len() as i32);
                    buf.put_slice(value);
                },
                None => buf.put_i32(-1),
            }
        }
    })
}

pub fn command_complete(tag: &str) -> Payload {
    message(b'C', |buf| {
        buf.put_slice(tag.as_bytes());
        buf.put_u8(0);
    })
}

pub fn error(sql_state: &str, msg: &str) -> Payload {
    message(b'E', |buf| {
        for (field, value) in [(b'S', "ERROR"), (b'C', sql_state), (b'M', msg)] {
            buf.put_u8(field);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0);
    })
}

/// Message types of every frontend message in `sent`.
pub fn msgtypes(mut sent: &[u8]) -> Vec<u8> {
    let mut types = vec![];
    while sent.has_remaining() {
        types.push(sent.get_u8());
        let len = sent.get_u32() as usize;
        sent.advance(len - 4);
    }
    types
}
