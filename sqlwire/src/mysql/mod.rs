//! MySQL payload interpretation.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response.html>
use crate::{
    Config,
    column::{ColumnDefinition, RowDesc},
    decode::ResultMetadata,
    phase::{Intercept, Protocol, ProtocolError, ResultEnd, Start, Step},
    transport::Payload,
};

mod capabilities;
pub mod packet;
pub mod query;

pub use capabilities::{Capabilities, Status};
pub use query::{ComQuery, query};

use packet::{EOF_HEADER, ERR_HEADER, EofPacket, LOCAL_INFILE_HEADER, MAX_PAYLOAD_LEN, OK_HEADER, OkPacket};

/// [`Protocol`] for MySQL text protocol responses.
#[derive(Debug, Clone)]
pub struct MySqlProtocol {
    capabilities: Capabilities,
    sequence: u8,
}

impl MySqlProtocol {
    /// Create new protocol, expecting responses to a command sent with sequence id zero.
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities, sequence: 1 }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut capabilities = Capabilities::PROTOCOL_41 | Capabilities::MULTI_RESULTS;
        capabilities.set(Capabilities::DEPRECATE_EOF, config.deprecate_eof());
        Self::new(capabilities)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Terminal marker of a result set, `OK` when EOF is deprecated.
    fn decode_end(&self, payload: Payload) -> Result<ResultEnd, ProtocolError> {
        let (status, meta) = if self.deprecate_eof() {
            let ok = OkPacket::decode(payload.body)?;
            let meta = ResultMetadata {
                affected_rows: Some(ok.affected_rows),
                last_insert_id: Some(ok.last_insert_id),
                more_results: false,
            };
            (ok.status, meta)
        } else {
            let eof = EofPacket::decode(payload.body)?;
            (eof.status, ResultMetadata::default())
        };

        Ok(ResultEnd {
            meta: ResultMetadata {
                more_results: status.contains(Status::MORE_RESULTS_EXISTS),
                ..meta
            },
            suspended: status.is_suspended(),
        })
    }
}

/// A `0xFE` payload is a terminal marker only when shorter than the maximum packet length,
/// a text row may begin with `0xFE` when its first value is at least 16MB long.
fn is_terminal(payload: &Payload) -> bool {
    payload.first() == Some(EOF_HEADER) && payload.len < MAX_PAYLOAD_LEN
}

impl Protocol for MySqlProtocol {
    fn check_sequence(&mut self, payload: &Payload) -> Result<(), ProtocolError> {
        if payload.seq != self.sequence {
            return Err(ProtocolError::Sequence { expected: self.sequence, found: payload.seq });
        }
        // reassembled payload spans one packet per maximum length, plus the last one
        let packets = match payload.len >= MAX_PAYLOAD_LEN {
            true => payload.body.len() / MAX_PAYLOAD_LEN as usize + 1,
            false => 1,
        };
        self.sequence = payload.seq.wrapping_add(packets as u8);
        Ok(())
    }

    fn intercept(&mut self, payload: Payload) -> Result<Intercept, ProtocolError> {
        match payload.first() {
            Some(ERR_HEADER) => Ok(Intercept::Error(packet::decode_err(payload.body, self.capabilities)?)),
            Some(_) => Ok(Intercept::Pass(payload)),
            None => Err(ProtocolError::malformed("empty payload")),
        }
    }

    fn decode_init(&mut self, payload: Payload) -> Result<Start, ProtocolError> {
        match payload.first() {
            Some(OK_HEADER) => {
                let ok = OkPacket::decode(payload.body)?;
                Ok(Start::End(ResultEnd {
                    meta: ResultMetadata {
                        affected_rows: Some(ok.affected_rows),
                        last_insert_id: Some(ok.last_insert_id),
                        more_results: ok.status.contains(Status::MORE_RESULTS_EXISTS),
                    },
                    suspended: ok.status.is_suspended(),
                }))
            },
            Some(found @ LOCAL_INFILE_HEADER) => Err(ProtocolError::unexpected_phase(found, "Init")),
            Some(_) => Ok(Start::Columns(packet::decode_column_count(payload.body)?)),
            None => Err(ProtocolError::malformed("empty payload")),
        }
    }

    fn decode_column(&mut self, payload: Payload, ordinal: u16) -> Result<ColumnDefinition, ProtocolError> {
        packet::decode_column(payload.body, ordinal)
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities.contains(Capabilities::DEPRECATE_EOF)
    }

    fn decode_eof(&mut self, payload: Payload) -> Result<(), ProtocolError> {
        if !is_terminal(&payload) {
            let found = payload.first().unwrap_or_default();
            return Err(ProtocolError::unexpected(EOF_HEADER, found));
        }
        EofPacket::decode(payload.body)?;
        Ok(())
    }

    fn decode_row_or_end(&mut self, payload: Payload, desc: &RowDesc) -> Result<Step, ProtocolError> {
        match is_terminal(&payload) {
            true => Ok(Step::End(self.decode_end(payload)?)),
            false => Ok(Step::Row(packet::decode_text_row(payload.body, desc)?)),
        }
    }

    fn ends_with_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, Bytes, BytesMut};
    use std::task::Poll;

    use super::*;
    use crate::{
        collect::{Collect, RowSet},
        error::ErrorKind,
        phase::{CommandDecoder, Phase},
    };

    fn lenenc(buf: &mut BytesMut, value: &[u8]) {
        buf.put_u8(value.len() as u8);
        buf.put_slice(value);
    }

    fn column(name: &str, ty: u8) -> Bytes {
        let mut buf = BytesMut::new();
        for part in [&b"def"[..], b"test", b"t", b"t", name.as_bytes(), name.as_bytes()] {
            lenenc(&mut buf, part);
        }
        buf.put_u8(0x0c);
        buf.put_u16_le(0x21);
        buf.put_u32_le(11);
        buf.put_u8(ty);
        buf.put_u16_le(0);
        buf.put_u8(0);
        buf.freeze()
    }

    fn row(values: &[&str]) -> Bytes {
        let mut buf = BytesMut::new();
        for value in values {
            lenenc(&mut buf, value.as_bytes());
        }
        buf.freeze()
    }

    fn ok(header: u8, affected: u8, status: u16) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(header);
        buf.put_u8(affected);
        buf.put_u8(0);
        buf.put_u16_le(status);
        buf.put_u16_le(0);
        buf.freeze()
    }

    fn eof(status: u16) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFE);
        buf.put_u16_le(0);
        buf.put_u16_le(status);
        buf.freeze()
    }

    /// Feed bodies with consecutive sequence ids.
    fn feed<C: crate::collect::Collector>(
        decoder: &mut CommandDecoder<MySqlProtocol, C>,
        bodies: Vec<Bytes>,
    ) -> Vec<Poll<crate::Result<crate::CommandResult<C::Output>>>> {
        bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| decoder.decode(Payload::new(body, i as u8 + 1)))
            .collect()
    }

    fn protocol(deprecate_eof: bool) -> MySqlProtocol {
        MySqlProtocol::from_config(&Config::default().with_deprecate_eof(deprecate_eof))
    }

    #[test]
    fn rows_with_deprecated_eof() {
        let mut decoder = CommandDecoder::new(protocol(true), Collect::<(i32, String)>::new());
        let mut polls = feed(&mut decoder, vec![
            Bytes::from_static(b"\x02"),
            column("id", 3),
            column("name", 253),
            row(&["1", "foo"]),
            row(&["2", "bar"]),
            ok(0xFE, 0, 0x0002),
        ]);

        let last = polls.pop().unwrap();
        assert!(polls.iter().all(Poll::is_pending));

        let Poll::Ready(Ok(result)) = last else { panic!("command incomplete") };
        assert_eq!(result.results.len(), 1);
        let first = &result.results[0];
        assert_eq!(first.size, 2);
        assert_eq!(first.value, vec![(1, "foo".into()), (2, "bar".into())]);
        assert_eq!(first.desc.as_ref().unwrap().names().collect::<Vec<_>>(), ["id", "name"]);
        assert!(!first.meta.more_results);
        assert_eq!(decoder.phase(), Phase::Done);
    }

    #[test]
    fn rows_with_eof() {
        let mut decoder = CommandDecoder::new(protocol(false), RowSet);
        let mut polls = feed(&mut decoder, vec![
            Bytes::from_static(b"\x01"),
            column("id", 3),
            eof(0x0002),
            row(&["7"]),
            eof(0x0002),
        ]);

        let Poll::Ready(Ok(result)) = polls.pop().unwrap() else { panic!("command incomplete") };
        let first = &result.results[0];
        assert_eq!(first.size, 1);
        assert_eq!(first.value[0].try_get::<_, i64>("id").unwrap(), 7);
        assert_eq!(first.meta.affected_rows, None);
    }

    #[test]
    fn zero_rows() {
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        let mut polls = feed(&mut decoder, vec![
            Bytes::from_static(b"\x01"),
            column("id", 3),
            ok(0xFE, 0, 0x0002),
        ]);

        let Poll::Ready(Ok(result)) = polls.pop().unwrap() else { panic!("command incomplete") };
        assert_eq!(result.results[0].size, 0);
        assert!(result.results[0].value.is_empty());
        assert!(result.results[0].desc.is_some());
    }

    #[test]
    fn chained_results() {
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        let mut polls = feed(&mut decoder, vec![
            ok(0x00, 3, 0x000a),
            Bytes::from_static(b"\x01"),
            column("id", 3),
            row(&["1"]),
            ok(0xFE, 0, 0x0002),
        ]);

        let Poll::Ready(Ok(result)) = polls.pop().unwrap() else { panic!("command incomplete") };
        assert_eq!(result.results.len(), 2);

        let update = &result.results[0];
        assert_eq!(update.meta.affected_rows, Some(3));
        assert!(update.meta.more_results);
        assert!(update.desc.is_none());
        assert_eq!(update.size, 0);

        let select = &result.results[1];
        assert!(!select.meta.more_results);
        assert_eq!(select.size, 1);
    }

    #[test]
    fn error_on_second_result_set() {
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        let mut polls = feed(&mut decoder, vec![
            Bytes::from_static(b"\x01"),
            column("id", 3),
            row(&["1"]),
            ok(0xFE, 0, 0x000a),
            Bytes::from_static(b"\xff\x7a\x04#42S02Table 'test.nope' doesn't exist"),
        ]);

        let Poll::Ready(Err(err)) = polls.pop().unwrap() else { panic!("expected failure") };
        let server = err.as_server_error().unwrap();
        assert_eq!(server.code(), Some(1146));
        assert_eq!(server.sql_state(), Some("42S02"));
        assert!(polls.iter().all(Poll::is_pending));

        let after = decoder.decode(Payload::new(ok(0x00, 0, 0), 6));
        assert!(matches!(after, Poll::Ready(Err(e)) if e.is_protocol()));
    }

    #[test]
    fn large_row_starting_with_eof_header() {
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        feed(&mut decoder, vec![Bytes::from_static(b"\x01"), column("blob", 251)]);

        // 0xFE prefixed length encoded value, declared as a maximum length packet
        let mut body = BytesMut::new();
        body.put_u8(0xFE);
        body.put_u64_le(3);
        body.put_slice(b"abc");
        let poll = decoder.decode(Payload::with_len(body.freeze(), MAX_PAYLOAD_LEN, 3));
        assert!(poll.is_pending());
        assert_eq!(decoder.phase(), Phase::RowDataOrEnd);

        let Poll::Ready(Ok(result)) = decoder.decode(Payload::new(ok(0xFE, 0, 0x0002), 4)) else {
            panic!("command incomplete")
        };
        assert_eq!(result.results[0].size, 1);
        assert_eq!(result.results[0].value[0].try_get::<_, Bytes>(0).unwrap(), "abc");
    }

    #[test]
    fn sequence_gap() {
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        assert!(decoder.decode(Payload::new(Bytes::from_static(b"\x01"), 1)).is_pending());
        let poll = decoder.decode(Payload::new(column("id", 3), 3));
        let Poll::Ready(Err(err)) = poll else { panic!("expected failure") };
        assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::Sequence { expected: 2, found: 3 })));
    }

    #[test]
    fn oversized_column_count() {
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        let count = Bytes::from_static(b"\xfe\xff\xff\xff\xff\xff\xff\xff\x0f");
        let Poll::Ready(Err(err)) = decoder.decode(Payload::new(count, 1)) else {
            panic!("expected failure")
        };
        assert!(err.is_protocol());

        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        let count = Bytes::from_static(b"\xfd\x00\x00\x01");
        let Poll::Ready(Err(err)) = decoder.decode(Payload::new(count, 1)) else {
            panic!("expected failure")
        };
        assert!(err.is_protocol());

        // the largest count ordinals can address
        let mut decoder = CommandDecoder::new(protocol(true), RowSet);
        let count = Bytes::from_static(b"\xfc\xff\xff");
        assert!(decoder.decode(Payload::new(count, 1)).is_pending());
        assert_eq!(decoder.phase(), Phase::ColumnDefinitions);
    }

    #[test]
    fn collector_failure_is_deferred() {
        let mut decoder = CommandDecoder::new(protocol(true), Collect::<(i32,)>::new());
        let mut polls = feed(&mut decoder, vec![
            Bytes::from_static(b"\x01"),
            column("id", 3),
            row(&["nan"]),
            row(&["2"]),
            ok(0xFE, 0, 0x0002),
        ]);

        let last = polls.pop().unwrap();
        assert!(polls.iter().all(Poll::is_pending));
        let Poll::Ready(Err(err)) = last else { panic!("expected failure") };
        assert!(matches!(err.kind(), ErrorKind::Decode(_)));
    }
}
