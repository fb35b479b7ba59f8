//! Extended query protocol.
//!
//! <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-EXT-QUERY>
use bytes::BytesMut;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use super::{
    backend::{BackendMessage, CommandComplete, ErrorResponse, NoticeResponse},
    frontend::{self, Target},
};
use crate::{
    Error, Result,
    collect::{Collector, Count},
    column::{ColumnDefinition, Format, RowDesc},
    common::{debug, verbose, warning},
    decode::{CommandResult, ResultMetadata},
    encode::Encoded,
    fetch::Exchange,
    phase::{CommandDecoder, Intercept, Protocol, ProtocolError, ResultEnd, Start, Step},
    statement::{PortalName, PreparedStatement},
    transport::{Payload, Transport},
};

/// SQLSTATE `invalid_sql_statement_name`.
const INVALID_STATEMENT_NAME: &str = "26000";

/// `ParameterStatus` and `NotificationResponse` are only skipped, they are not decoded.
const PARAMETER_STATUS: u8 = b'S';
const NOTIFICATION_RESPONSE: u8 = b'A';

/// Write an extended query command.
///
/// Responses possible:
/// - `ParseComplete` from `Parse`, if the statement was not parsed yet
/// - `BindComplete` from `Bind`
/// - `RowDescription` or `NoData` from `Describe`
/// - `DataRow` from `Execute`
/// - `Execute` phase is always terminated by the appearance of exactly one of these messages:
///   - `CommandComplete`
///   - `EmptyQueryResponse`
///   - `ErrorResponse`
///   - `PortalSuspended`
/// - `CloseComplete` from `Close`, for non cached statement
/// - `ReadyForQuery` from `Sync`
#[derive(Debug)]
pub struct ExtendedQuery<'a> {
    pub stmt: &'a PreparedStatement,
    pub portal: &'a str,
    pub params: &'a [Encoded],
    /// Maximum rows per execution, zero denotes no limit.
    pub fetch: u32,
    /// Continue a suspended portal, only `Execute` and `Sync` are written.
    pub suspended: bool,
}

impl ExtendedQuery<'_> {
    /// Write the command into `buf`.
    ///
    /// Returns `true` if `Parse` was written.
    pub fn write(self, buf: &mut BytesMut) -> bool {
        let ExtendedQuery { stmt, portal, params, fetch, suspended } = self;

        if suspended {
            frontend::write(frontend::Execute { portal, max_rows: fetch }, buf);
            frontend::write(frontend::Sync, buf);
            return false;
        }

        let parsing = stmt.take_parse();
        if parsing {
            verbose!(name = %stmt.name(), "parse");
            let oids = params.iter().map(Encoded::oid).collect::<Vec<_>>();
            frontend::write(frontend::Parse { name: stmt.name().as_str(), sql: stmt.sql(), oids: &oids }, buf);
            stmt.set_param_oids(oids);
        }

        frontend::write(frontend::Bind { portal, stmt: stmt.name().as_str(), params, results: Format::Binary }, buf);
        frontend::write(frontend::Describe(Target::Portal, portal), buf);
        frontend::write(frontend::Execute { portal, max_rows: fetch }, buf);

        if !stmt.is_cached() && fetch == 0 {
            frontend::write(frontend::Close(Target::Statement, stmt.name().as_str()), buf);
        }

        frontend::write(frontend::Sync, buf);
        parsing
    }
}

/// Write a command which closes `portal`, and `stmt` if it is not cached.
///
/// Responses are `CloseComplete` for each close and `ReadyForQuery`.
pub fn close_portal(stmt: &PreparedStatement, portal: &str, buf: &mut BytesMut) {
    frontend::write(frontend::Close(Target::Portal, portal), buf);
    if !stmt.is_cached() {
        frontend::write(frontend::Close(Target::Statement, stmt.name().as_str()), buf);
    }
    frontend::write(frontend::Sync, buf);
}

/// Write a command which closes `stmt`.
///
/// Responses are `CloseComplete` and `ReadyForQuery`. Closing a statement the
/// server does not know is not an error.
pub fn close_statement(stmt: &PreparedStatement, buf: &mut BytesMut) {
    frontend::write(frontend::Close(Target::Statement, stmt.name().as_str()), buf);
    frontend::write(frontend::Sync, buf);
}

/// Postgres interpretation of a command response.
///
/// Every command ends with `ReadyForQuery`, an `ErrorResponse` makes the
/// server skip to it.
#[derive(Debug, Default)]
pub struct PgProtocol {
    parse_complete: bool,
}

impl PgProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once `ParseComplete` was received.
    pub fn parse_complete(&self) -> bool {
        self.parse_complete
    }
}

fn command_end(cmd: &CommandComplete) -> ResultEnd {
    ResultEnd {
        meta: ResultMetadata {
            affected_rows: cmd.rows_affected(),
            ..Default::default()
        },
        suspended: false,
    }
}

fn suspended_end() -> ResultEnd {
    ResultEnd { suspended: true, ..Default::default() }
}

impl Protocol for PgProtocol {
    fn intercept(&mut self, payload: Payload) -> Result<Intercept, ProtocolError> {
        match payload.first() {
            Some(ErrorResponse::MSGTYPE) => match BackendMessage::from_body(payload.body)? {
                BackendMessage::ErrorResponse(err) => Ok(Intercept::Error(err.to_server_error()?)),
                msg => Err(ProtocolError::unexpected(ErrorResponse::MSGTYPE, msg.msgtype())),
            },
            Some(NoticeResponse::MSGTYPE) => {
                if let BackendMessage::NoticeResponse(notice) = BackendMessage::from_body(payload.body)? {
                    let notice = notice.to_server_error()?;
                    debug!("{notice}");
                }
                Ok(Intercept::Skip)
            },
            Some(PARAMETER_STATUS | NOTIFICATION_RESPONSE) => Ok(Intercept::Skip),
            Some(_) => Ok(Intercept::Pass(payload)),
            None => Err(ProtocolError::malformed("empty message")),
        }
    }

    fn decode_init(&mut self, payload: Payload) -> Result<Start, ProtocolError> {
        match BackendMessage::from_body(payload.body)? {
            BackendMessage::ParseComplete(_) => {
                self.parse_complete = true;
                Ok(Start::Skip)
            },
            BackendMessage::BindComplete(_)
            | BackendMessage::NoData(_)
            | BackendMessage::CloseComplete(_)
            | BackendMessage::ParameterDescription(_) => Ok(Start::Skip),
            BackendMessage::RowDescription(desc) => Ok(Start::Described(desc.to_desc()?)),
            BackendMessage::CommandComplete(cmd) => Ok(Start::End(command_end(&cmd))),
            BackendMessage::EmptyQueryResponse(_) => Ok(Start::End(ResultEnd::default())),
            BackendMessage::PortalSuspended(_) => Ok(Start::End(suspended_end())),
            BackendMessage::ReadyForQuery(_) => Ok(Start::Ready),
            msg => Err(ProtocolError::unexpected_phase(msg.msgtype(), "Init")),
        }
    }

    fn decode_column(&mut self, payload: Payload, _: u16) -> Result<ColumnDefinition, ProtocolError> {
        Err(ProtocolError::unexpected_phase(payload.first().unwrap_or_default(), "ColumnDefinitions"))
    }

    fn deprecate_eof(&self) -> bool {
        true
    }

    fn decode_eof(&mut self, payload: Payload) -> Result<(), ProtocolError> {
        Err(ProtocolError::unexpected_phase(payload.first().unwrap_or_default(), "ColumnDefinitionsCompleted"))
    }

    fn decode_row_or_end(&mut self, payload: Payload, _: &RowDesc) -> Result<Step, ProtocolError> {
        match BackendMessage::from_body(payload.body)? {
            BackendMessage::DataRow(row) => Ok(Step::Row(row.into_values()?)),
            BackendMessage::CommandComplete(cmd) => Ok(Step::End(command_end(&cmd))),
            BackendMessage::PortalSuspended(_) => Ok(Step::End(suspended_end())),
            BackendMessage::EmptyQueryResponse(_) => Ok(Step::End(ResultEnd::default())),
            msg => Err(ProtocolError::unexpected_phase(msg.msgtype(), "RowDataOrEnd")),
        }
    }

    fn ends_with_ready(&self) -> bool {
        true
    }
}

/// Map a failed execution of `stmt`.
///
/// When the server forgot a statement this connection believes parsed, the
/// error becomes [`ProtocolError::StaleStatement`]. In both that case and a
/// rejected `Parse`, the next execution parses again.
pub(crate) fn map_failure(stmt: &PreparedStatement, parsing: bool, parse_complete: bool, err: Error) -> Error {
    let missing = err
        .as_server_error()
        .and_then(|e| e.sql_state())
        .is_some_and(|state| state == INVALID_STATEMENT_NAME);

    if !parsing && missing {
        warning!("prepared statement {} no longer exists", stmt.name());
        stmt.reset_parsed();
        return Error::from(ProtocolError::stale(stmt.name().to_bytestr()));
    }

    if parsing && !parse_complete {
        stmt.reset_parsed();
    }

    err
}

/// Execute a prepared statement through the unnamed portal.
///
/// With `fetch` greater than zero, the result may be
/// [`suspended`][CommandResult::suspended], use a
/// [`PgCursor`][crate::cursor::PgCursor] to read further.
///
/// A non-cached statement is closed before the future resolves, in the same
/// round trip when possible, otherwise with a second `Close` command.
pub fn execute<IO, C>(
    mut io: IO,
    stmt: Arc<PreparedStatement>,
    params: &[Encoded],
    fetch: u32,
    collector: C,
) -> Execute<IO, C>
where
    IO: Transport,
    C: Collector,
{
    let portal = PortalName::unnamed();
    let parsing = ExtendedQuery {
        stmt: &stmt,
        portal: portal.as_str(),
        params,
        fetch,
        suspended: false,
    }
    .write(io.send_buf());

    Execute {
        io,
        // a suspended portal keeps the statement, it is not closed in band
        close_after: !stmt.is_cached() && fetch > 0,
        stmt,
        parsing,
        state: ExecuteState::Command(Exchange::new(CommandDecoder::new(PgProtocol::new(), collector))),
    }
}

/// Future returned from [`execute`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Execute<IO, C: Collector> {
    io: IO,
    stmt: Arc<PreparedStatement>,
    parsing: bool,
    close_after: bool,
    state: ExecuteState<C>,
}

enum ExecuteState<C: Collector> {
    Command(Exchange<PgProtocol, C>),
    /// The statement is closed, `result` is returned afterwards.
    Closing {
        exchange: Exchange<PgProtocol, Count>,
        result: Option<Result<CommandResult<C::Output>>>,
    },
}

impl<IO, C: Collector> Unpin for Execute<IO, C> { }

impl<IO, C> Future for Execute<IO, C>
where
    IO: Transport,
    C: Collector,
{
    type Output = Result<CommandResult<C::Output>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        loop {
            match &mut me.state {
                ExecuteState::Command(exchange) => {
                    let result = ready!(exchange.poll_exchange(&mut me.io, cx));
                    let parse_complete = exchange.decoder().protocol().parse_complete();
                    let result = result.map_err(|err| map_failure(&me.stmt, me.parsing, parse_complete, err));

                    // an error makes the server skip the in band `Close`
                    let close = match &result {
                        Ok(_) => me.close_after,
                        Err(err) => !me.stmt.is_cached() && err.as_server_error().is_some(),
                    };
                    if !close {
                        return Poll::Ready(result);
                    }

                    verbose!(name = %me.stmt.name(), "close statement");
                    close_statement(&me.stmt, me.io.send_buf());
                    me.state = ExecuteState::Closing {
                        exchange: Exchange::new(CommandDecoder::new(PgProtocol::new(), Count)),
                        result: Some(result),
                    };
                },
                ExecuteState::Closing { exchange, result } => {
                    let closed = ready!(exchange.poll_exchange(&mut me.io, cx));
                    let Some(result) = result.take() else {
                        panic!("`Execute` polled after complete")
                    };
                    return Poll::Ready(match (result, closed) {
                        (Ok(_), Err(err)) => Err(err),
                        (result, _) => result,
                    });
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ErrorKind,
        collect::{Collect, Count},
        encode::Encode,
        postgres::mock,
        statement::StatementCache,
        transport::Replay,
    };

    fn script() -> Vec<Payload> {
        vec![
            mock::bind_complete(),
            mock::row_description(&[("id", 23)]),
            mock::data_row(&[Some(&7i32.to_be_bytes()[..])]),
            mock::command_complete("SELECT 1"),
            mock::ready(),
        ]
    }

    #[tokio::test]
    async fn parse_once() {
        let cache = StatementCache::new(true);
        let stmt = cache.prepare("SELECT id FROM foo WHERE id = $1");
        let params = [7i32.encode()];

        let mut io = Replay::new([mock::parse_complete()]);
        io.push(script());
        let result = execute(&mut io, stmt.clone(), &params, 0, Collect::<(i32,)>::new()).await.unwrap();
        assert_eq!(result.into_value(), Some(vec![(7,)]));
        assert_eq!(mock::msgtypes(&io.sent()[0]), b"PBDES");
        assert_eq!(stmt.param_oids(), [23]);

        let mut io = Replay::new(script());
        let stmt = cache.prepare("SELECT id FROM foo WHERE id = $1");
        let result = execute(&mut io, stmt, &params, 0, Count).await.unwrap();
        assert_eq!(result.results[0].value, 1);
        assert_eq!(mock::msgtypes(&io.sent()[0]), b"BDES");
        assert_eq!(io.remaining(), 0);
    }

    #[test]
    fn continuation() {
        let stmt = StatementCache::new(true).prepare("SELECT 1");
        let mut buf = BytesMut::new();
        let parsing = ExtendedQuery {
            stmt: &stmt,
            portal: "p1",
            params: &[],
            fetch: 2,
            suspended: true,
        }
        .write(&mut buf);

        assert!(!parsing);
        assert!(!stmt.is_parsed());
        assert_eq!(&buf[..], b"E\0\0\0\x0bp1\0\0\0\0\x02S\0\0\0\x04");
    }

    #[test]
    fn close_non_cached() {
        let stmt = StatementCache::new(false).prepare("SELECT 1");
        let write = |fetch| {
            let mut buf = BytesMut::new();
            stmt.reset_parsed();
            ExtendedQuery { stmt: &stmt, portal: "", params: &[], fetch, suspended: false }.write(&mut buf);
            mock::msgtypes(&buf)
        };
        assert_eq!(write(0), b"PBDECS");
        assert_eq!(write(5), b"PBDES");

        let cached = StatementCache::new(true).prepare("SELECT 1");
        let mut buf = BytesMut::new();
        ExtendedQuery { stmt: &cached, portal: "", params: &[], fetch: 0, suspended: false }.write(&mut buf);
        assert_eq!(mock::msgtypes(&buf), b"PBDES");
    }

    #[test]
    fn close_portal_layout() {
        let mut buf = BytesMut::new();
        let cached = StatementCache::new(true).prepare("SELECT 1");
        close_portal(&cached, "p1", &mut buf);
        assert_eq!(&buf[..], b"C\0\0\0\x08Pp1\0S\0\0\0\x04");

        let mut buf = BytesMut::new();
        let stmt = StatementCache::new(false).prepare("SELECT 1");
        close_portal(&stmt, "p1", &mut buf);
        assert_eq!(mock::msgtypes(&buf), b"CCS");
    }

    #[tokio::test]
    async fn error_drains_until_ready() {
        let stmt = StatementCache::new(true).prepare("SELECT 1 / id FROM foo");
        let mut io = Replay::new([
            mock::parse_complete(),
            mock::bind_complete(),
            mock::row_description(&[("n", 23)]),
            mock::data_row(&[Some(&1i32.to_be_bytes()[..])]),
            mock::error("22012", "division by zero"),
            mock::ready(),
        ]);

        let err = execute(&mut io, stmt.clone(), &[], 0, Count).await.unwrap_err();
        let server = err.as_server_error().unwrap();
        assert_eq!(server.sql_state(), Some("22012"));
        assert_eq!(io.remaining(), 0);
        // parse succeeded, the statement still exists
        assert!(stmt.is_parsed());
    }

    #[tokio::test]
    async fn stale_statement() {
        let stmt = StatementCache::new(true).prepare("SELECT 1");
        assert!(stmt.take_parse());

        let mut io = Replay::new([
            mock::error("26000", "prepared statement does not exist"),
            mock::ready(),
        ]);
        let err = execute(&mut io, stmt.clone(), &[], 0, Count).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::StaleStatement { .. })));
        assert!(!stmt.is_parsed());

        // next execution parses again
        let mut io = Replay::new([mock::parse_complete()]);
        io.push(script());
        execute(&mut io, stmt.clone(), &[], 0, Count).await.unwrap();
        assert_eq!(mock::msgtypes(&io.sent()[0]), b"PBDES");
        assert!(stmt.is_parsed());
    }

    #[tokio::test]
    async fn rejected_parse() {
        let stmt = StatementCache::new(true).prepare("SELEC 1");
        let mut io = Replay::new([mock::error("42601", "syntax error"), mock::ready()]);
        let err = execute(&mut io, stmt.clone(), &[], 0, Count).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert!(!stmt.is_parsed());
    }

    #[tokio::test]
    async fn failed_non_cached_is_closed() {
        let stmt = StatementCache::new(false).prepare("SELECT 1 / id FROM foo");
        let mut io = Replay::new([
            mock::parse_complete(),
            mock::bind_complete(),
            mock::error("22012", "division by zero"),
            mock::ready(),
            mock::close_complete(),
            mock::ready(),
        ]);

        let err = execute(&mut io, stmt.clone(), &[], 0, Count).await.unwrap_err();
        assert_eq!(err.as_server_error().and_then(|e| e.sql_state()), Some("22012"));

        let sent = io.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(mock::msgtypes(&sent[0]), b"PBDECS");
        assert_eq!(mock::msgtypes(&sent[1]), b"CS");
        assert_eq!(&sent[1][5..6], b"S");
        assert!(sent[1].windows(stmt.name().as_str().len()).any(|e| e == stmt.name().as_str().as_bytes()));
        assert_eq!(io.remaining(), 0);
    }

    #[tokio::test]
    async fn suspended_non_cached_is_closed() {
        let stmt = StatementCache::new(false).prepare("SELECT id FROM foo");
        let mut io = Replay::new([
            mock::parse_complete(),
            mock::bind_complete(),
            mock::row_description(&[("id", 23)]),
            mock::data_row(&[Some(&1i32.to_be_bytes()[..])]),
            mock::portal_suspended(),
            mock::ready(),
            mock::close_complete(),
            mock::ready(),
        ]);

        let result = execute(&mut io, stmt, &[], 1, Count).await.unwrap();
        assert!(result.suspended);
        assert_eq!(result.results[0].value, 1);

        let sent = io.sent();
        assert_eq!(mock::msgtypes(&sent[0]), b"PBDES");
        assert_eq!(mock::msgtypes(&sent[1]), b"CS");
        assert_eq!(io.remaining(), 0);
    }

    #[tokio::test]
    async fn successful_non_cached_closes_in_band() {
        let stmt = StatementCache::new(false).prepare("SELECT 1");
        let mut io = Replay::new([
            mock::parse_complete(),
            mock::bind_complete(),
            mock::row_description(&[("n", 23)]),
            mock::data_row(&[Some(&1i32.to_be_bytes()[..])]),
            mock::command_complete("SELECT 1"),
            mock::close_complete(),
            mock::ready(),
        ]);

        execute(&mut io, stmt, &[], 0, Count).await.unwrap();
        assert_eq!(io.sent().len(), 1);
        assert_eq!(io.remaining(), 0);
    }

    #[tokio::test]
    async fn suspended_portal() {
        let stmt = StatementCache::new(true).prepare("SELECT id FROM foo");
        let mut io = Replay::new([
            mock::parse_complete(),
            mock::bind_complete(),
            mock::row_description(&[("id", 23)]),
            mock::data_row(&[Some(&1i32.to_be_bytes()[..])]),
            mock::portal_suspended(),
            mock::ready(),
        ]);

        let result = execute(&mut io, stmt, &[], 1, Count).await.unwrap();
        assert!(result.suspended);
        assert_eq!(result.results[0].value, 1);
        assert_eq!(result.results[0].desc.as_ref().map(|e| e.len()), Some(1));
    }

    #[tokio::test]
    async fn no_rows() {
        let stmt = StatementCache::new(true).prepare("UPDATE foo SET id = 1");
        let mut io = Replay::new([
            mock::parse_complete(),
            mock::bind_complete(),
            mock::no_data(),
            mock::command_complete("UPDATE 3"),
            mock::ready(),
        ]);

        let result = execute(&mut io, stmt, &[], 0, Count).await.unwrap();
        assert_eq!(result.affected_rows(), 3);
        assert!(result.results[0].desc.is_none());
    }

    #[tokio::test]
    async fn notice_is_skipped() {
        let stmt = StatementCache::new(true).prepare("SELECT 1");
        let mut io = Replay::new([
            mock::parse_complete(),
            Payload::message(b'N', b"SNOTICE\0C00000\0Mhello\0\0"),
            Payload::message(b'S', b"TimeZone\0UTC\0"),
        ]);
        io.push(script());
        let result = execute(&mut io, stmt, &[], 0, Count).await.unwrap();
        assert_eq!(result.results[0].value, 1);
    }
}
