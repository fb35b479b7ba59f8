//! MySQL text protocol query.
use bytes::{BufMut, BytesMut};

use super::MySqlProtocol;
use crate::{
    Config,
    collect::Collector,
    common::verbose,
    fetch::Fetch,
    phase::CommandDecoder,
    transport::Transport,
};

use super::packet::MAX_PAYLOAD_LEN;

const COM_QUERY: u8 = 0x03;

/// `COM_QUERY` command.
#[derive(Debug)]
pub struct ComQuery<'a> {
    pub sql: &'a str,
}

impl ComQuery<'_> {
    /// Write the command as packets starting with sequence id zero.
    pub fn write(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::with_capacity(1 + self.sql.len());
        body.put_u8(COM_QUERY);
        body.put_slice(self.sql.as_bytes());
        write_packets(&body, 0, buf);
    }
}

/// Frame `payload` as packets, splitting it every maximum packet length.
///
/// A payload of exact multiple of the maximum length is followed by an empty packet.
///
/// Returns the next sequence id.
pub fn write_packets(payload: &[u8], mut seq: u8, buf: &mut BytesMut) -> u8 {
    const MAX: usize = MAX_PAYLOAD_LEN as usize;

    let mut last_len = MAX;

    buf.reserve(payload.len() + 4 * (payload.len() / MAX + 1));

    for chunk in payload.chunks(MAX) {
        put_header(buf, chunk.len(), seq);
        buf.put_slice(chunk);
        seq = seq.wrapping_add(1);
        last_len = chunk.len();
    }

    if last_len == MAX {
        put_header(buf, 0, seq);
        seq = seq.wrapping_add(1);
    }

    seq
}

fn put_header(buf: &mut BytesMut, len: usize, seq: u8) {
    let len = len as u32;
    buf.put_slice(&len.to_le_bytes()[..3]);
    buf.put_u8(seq);
}

/// Send `sql` as a text protocol query and decode every result set with `collector`.
pub fn query<IO, C>(mut io: IO, sql: &str, collector: C, config: &Config) -> Fetch<IO, MySqlProtocol, C>
where
    IO: Transport,
    C: Collector,
{
    verbose!(sql, "COM_QUERY");
    ComQuery { sql }.write(io.send_buf());
    Fetch::new(io, CommandDecoder::new(MySqlProtocol::from_config(config), collector))
}
