//! Packet decode state machine.
//!
//! Both MySQL and Postgres responses to a row returning command share the same
//! overall shape:
//!
//! ```text
//! Init -> ColumnDefinitions -> (ColumnDefinitionsCompleted) -> RowDataOrEnd -> Init | Done
//! ```
//!
//! The phase logic lives in [`CommandDecoder`], interpretation of each payload
//! is delegated to a [`Protocol`].
use bytes::Bytes;
use std::task::Poll;

use crate::{
    Result,
    collect::Collector,
    column::{ColumnDefinition, RowDesc},
    common::{span, verbose},
    decode::{self, CommandResult, QueryResult, ResultMetadata, RowResultDecoder},
    error::{Error, ServerError},
    transport::Payload,
};

mod error;

pub use error::ProtocolError;

/// Payload interpretation of one database protocol.
pub trait Protocol {
    /// Validate the packet sequence id.
    fn check_sequence(&mut self, payload: &Payload) -> Result<(), ProtocolError> {
        let _ = payload;
        Ok(())
    }

    /// Classify payloads which may arrive in any phase.
    fn intercept(&mut self, payload: Payload) -> Result<Intercept, ProtocolError>;

    /// Interpret the first payload of a result set.
    fn decode_init(&mut self, payload: Payload) -> Result<Start, ProtocolError>;

    /// Decode exactly one column definition.
    fn decode_column(&mut self, payload: Payload, ordinal: u16) -> Result<ColumnDefinition, ProtocolError>;

    /// Column definitions are not followed by a terminal marker.
    fn deprecate_eof(&self) -> bool;

    /// Consume the terminal marker after column definitions.
    fn decode_eof(&mut self, payload: Payload) -> Result<(), ProtocolError>;

    /// Interpret a payload while rows are expected.
    fn decode_row_or_end(&mut self, payload: Payload, desc: &RowDesc) -> Result<Step, ProtocolError>;

    /// The command always ends with an explicit ready marker, even after an error.
    fn ends_with_ready(&self) -> bool;
}

/// Result of [`Protocol::intercept`].
pub enum Intercept {
    /// Server reported an error.
    Error(ServerError),
    /// Payload carries nothing for the command.
    Skip,
    /// Payload should be interpreted by the current phase.
    Pass(Payload),
}

/// Result of [`Protocol::decode_init`].
pub enum Start {
    /// Payload carries nothing for the command.
    Skip,
    /// Number of column definitions that follows.
    Columns(usize),
    /// Complete row description.
    Described(RowDesc),
    /// Result set without rows.
    End(ResultEnd),
    /// End of command marker.
    Ready,
}

/// Result of [`Protocol::decode_row_or_end`].
pub enum Step {
    /// Raw values of one row, one per column.
    Row(Vec<Option<Bytes>>),
    /// Terminal packet of the result set.
    End(ResultEnd),
}

/// Terminal packet of a result set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultEnd {
    pub meta: ResultMetadata,
    pub suspended: bool,
}

/// Current phase of a [`CommandDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ColumnDefinitions,
    ColumnDefinitionsCompleted,
    RowDataOrEnd,
    /// A server error was received, payloads are ignored until the ready marker.
    Draining,
    Done,
}

/// Decode every payload of one command into [`CommandResult`].
pub struct CommandDecoder<P, C: Collector> {
    protocol: P,
    collector: C,
    phase: Phase,
    column_count: usize,
    columns: Vec<ColumnDefinition>,
    rows: Option<RowResultDecoder<C::Acc>>,
    results: Vec<QueryResult<C::Output>>,
    suspended: bool,
    failure: Option<Error>,
}

impl<P: Protocol, C: Collector> CommandDecoder<P, C> {
    pub fn new(protocol: P, collector: C) -> Self {
        Self {
            protocol,
            collector,
            phase: Phase::Init,
            column_count: 0,
            columns: vec![],
            rows: None,
            results: vec![],
            suspended: false,
            failure: None,
        }
    }

    /// Start directly expecting rows of already known description.
    ///
    /// Used when continuing a suspended portal, the server does not send
    /// the description again.
    pub fn resume(protocol: P, mut collector: C, desc: RowDesc) -> Self {
        let rows = RowResultDecoder::new(desc, &mut collector);
        Self {
            phase: Phase::RowDataOrEnd,
            rows: Some(rows),
            ..Self::new(protocol, collector)
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Description of the result set being decoded.
    pub fn desc(&self) -> Option<&RowDesc> {
        self.rows.as_ref().map(RowResultDecoder::desc)
    }

    /// Feed one payload.
    ///
    /// Returns [`Poll::Ready`] once the command completes, any payload
    /// afterwards is a protocol error.
    pub fn decode(&mut self, payload: Payload) -> Poll<Result<CommandResult<C::Output>>> {
        span!("decode", phase = ?self.phase);

        if let Phase::Done = self.phase {
            return Poll::Ready(Err(ProtocolError::Completed.into()));
        }

        match self.step(payload) {
            Ok(true) => Poll::Ready(self.complete()),
            Ok(false) => Poll::Pending,
            Err(err) => {
                self.transition(Phase::Done);
                Poll::Ready(Err(err.into()))
            },
        }
    }

    /// Returns `true` when the command completes.
    fn step(&mut self, payload: Payload) -> Result<bool, ProtocolError> {
        self.protocol.check_sequence(&payload)?;

        let payload = match self.protocol.intercept(payload)? {
            Intercept::Pass(payload) => payload,
            Intercept::Skip => return Ok(false),
            Intercept::Error(err) => return Ok(self.server_error(err)),
        };

        match self.phase {
            Phase::Init => match self.protocol.decode_init(payload)? {
                Start::Skip => Ok(false),
                Start::Ready => Ok(true),
                Start::Columns(0) => Err(ProtocolError::column_count(1, 0)),
                Start::Columns(count) if count > u16::MAX as usize => {
                    Err(ProtocolError::malformed("column count"))
                },
                Start::Columns(count) => {
                    self.column_count = count;
                    self.columns = Vec::with_capacity(count);
                    self.transition(Phase::ColumnDefinitions);
                    Ok(false)
                },
                Start::Described(desc) => {
                    self.start_rows(desc);
                    Ok(false)
                },
                Start::End(end) => {
                    let result = decode::empty(&mut self.collector, end.meta);
                    Ok(self.end_result_set(result, end))
                },
            },
            Phase::ColumnDefinitions => {
                let ordinal = u16::try_from(self.columns.len())
                    .map_err(|_| ProtocolError::malformed("column count"))?;
                let column = self.protocol.decode_column(payload, ordinal)?;
                self.columns.push(column);

                if self.columns.len() == self.column_count {
                    let desc = RowDesc::new(std::mem::take(&mut self.columns));
                    match self.protocol.deprecate_eof() {
                        true => self.start_rows(desc),
                        false => {
                            self.rows = Some(RowResultDecoder::new(desc, &mut self.collector));
                            self.transition(Phase::ColumnDefinitionsCompleted);
                        },
                    }
                }
                Ok(false)
            },
            Phase::ColumnDefinitionsCompleted => {
                self.protocol.decode_eof(payload)?;
                self.transition(Phase::RowDataOrEnd);
                Ok(false)
            },
            Phase::RowDataOrEnd => {
                let Some(rows) = self.rows.as_mut() else {
                    return Err(ProtocolError::malformed("row phase without description"));
                };
                match self.protocol.decode_row_or_end(payload, rows.desc())? {
                    Step::Row(values) => {
                        if values.len() != rows.desc().len() {
                            return Err(ProtocolError::column_count(rows.desc().len(), values.len()));
                        }
                        if self.failure.is_some() {
                            rows.skip_row();
                        } else if let Err(err) = rows.decode_row(&mut self.collector, values) {
                            self.failure = Some(err.into());
                        }
                        Ok(false)
                    },
                    Step::End(end) => {
                        let Some(rows) = self.rows.take() else {
                            return Err(ProtocolError::malformed("row phase without description"));
                        };
                        let result = rows.complete(&mut self.collector, end.meta);
                        Ok(self.end_result_set(result, end))
                    },
                }
            },
            Phase::Draining => match self.protocol.decode_init(payload) {
                Ok(Start::Ready) => Ok(true),
                _ => Ok(false),
            },
            Phase::Done => Err(ProtocolError::Completed),
        }
    }

    fn start_rows(&mut self, desc: RowDesc) {
        verbose!(columns = desc.len(), "row description");
        self.rows = Some(RowResultDecoder::new(desc, &mut self.collector));
        self.transition(Phase::RowDataOrEnd);
    }

    /// Returns `true` when the command completes.
    fn end_result_set(&mut self, result: QueryResult<C::Output>, end: ResultEnd) -> bool {
        verbose!(size = result.size, more = end.meta.more_results, "result set end");

        self.column_count = 0;
        self.columns.clear();
        self.rows = None;
        self.suspended |= end.suspended;

        if self.failure.is_none() {
            self.results.push(result);
        }

        self.transition(Phase::Init);
        !end.meta.more_results && !self.protocol.ends_with_ready()
    }

    /// Returns `true` when the command completes.
    fn server_error(&mut self, err: ServerError) -> bool {
        verbose!(%err, "server error");

        if self.failure.is_none() {
            self.failure = Some(err.into());
        }
        self.results.clear();
        self.rows = None;

        match self.protocol.ends_with_ready() {
            true => {
                self.transition(Phase::Draining);
                false
            },
            false => true,
        }
    }

    fn complete(&mut self) -> Result<CommandResult<C::Output>> {
        self.transition(Phase::Done);
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(CommandResult {
                results: std::mem::take(&mut self.results),
                suspended: self.suspended,
            }),
        }
    }

    fn transition(&mut self, phase: Phase) {
        verbose!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }
}
