//! Paged reads over a server side portal.
use std::{
    future::poll_fn,
    sync::Arc,
    task::{Context, Poll, ready},
};

use crate::{
    Error, Result, Row,
    collect::{Count, RowSet},
    column::RowDesc,
    common::verbose,
    encode::Encoded,
    fetch::Exchange,
    phase::CommandDecoder,
    postgres::{
        ExtendedQuery, PgProtocol,
        extended::{close_portal, close_statement, map_failure},
    },
    statement::{PortalName, PreparedStatement},
    transport::Transport,
};

/// One page of rows.
#[derive(Debug, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    /// The portal was suspended, more rows can be read.
    pub has_more: bool,
}

/// A query whose rows are read in pages.
///
/// At most one [`read`][Cursor::read] may be in flight.
pub trait Cursor: Unpin {
    /// Request the next page of at most `fetch` rows.
    ///
    /// The first read executes the query.
    fn read(&mut self, fetch: u32);

    /// Poll the page requested by [`read`][Cursor::read].
    ///
    /// # Panics
    ///
    /// Panics if no read was requested.
    fn poll_page(&mut self, cx: &mut Context) -> Poll<Result<Page>>;

    /// Returns `true` if the last page was suspended.
    fn has_more(&self) -> bool;

    /// Request the cursor to be closed.
    ///
    /// A read in flight is drained and discarded first.
    fn close(&mut self);

    /// Poll the close requested by [`close`][Cursor::close].
    ///
    /// Returns immediately when there is nothing to close.
    fn poll_close(&mut self, cx: &mut Context) -> Poll<Result<()>>;
}

/// An extension trait to provide `Future` API for [`Cursor`].
pub trait CursorExt: Cursor {
    /// Read the next page.
    fn next_page(&mut self, fetch: u32) -> impl Future<Output = Result<Page>> {
        self.read(fetch);
        poll_fn(|cx| self.poll_page(cx))
    }

    /// Close the cursor.
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> {
        self.close();
        poll_fn(|cx| self.poll_close(cx))
    }
}

impl<T> CursorExt for T where T: Cursor { }

enum State {
    Idle,
    Reading {
        exchange: Exchange<PgProtocol, RowSet>,
        parsing: bool,
    },
    /// Every row was read, the next page is empty.
    Exhausted,
    Closing(Exchange<PgProtocol, Count>),
}

/// [`Cursor`] over a named Postgres portal.
///
/// Suspended portals only survive until the end of the transaction, so a
/// cursor reading more than one page should run inside `BEGIN`.
pub struct PgCursor<IO> {
    io: IO,
    stmt: Arc<PreparedStatement>,
    portal: PortalName,
    params: Vec<Encoded>,
    desc: Option<RowDesc>,
    started: bool,
    has_more: bool,
    closing: bool,
    /// A failed read left a non-cached statement on the server.
    stmt_open: bool,
    state: State,
}

impl<IO: Transport> PgCursor<IO> {
    pub fn new(io: IO, stmt: Arc<PreparedStatement>, params: Vec<Encoded>) -> Self {
        Self {
            io,
            stmt,
            portal: PortalName::next(),
            params,
            desc: None,
            started: false,
            has_more: false,
            closing: false,
            stmt_open: false,
            state: State::Idle,
        }
    }

    pub fn portal(&self) -> &PortalName {
        &self.portal
    }

    /// Returns the underlying transport.
    pub fn into_inner(self) -> IO {
        self.io
    }

    fn reset(&mut self) {
        self.started = false;
        self.has_more = false;
        self.desc = None;
    }

    fn fail(&mut self, err: &Error) {
        self.reset();
        // the statement outlives a failed read, it is closed with the cursor
        self.stmt_open |= !self.stmt.is_cached() && err.as_server_error().is_some();
    }
}

impl<IO: Transport> Cursor for PgCursor<IO> {
    fn read(&mut self, fetch: u32) {
        if self.closing || !matches!(self.state, State::Idle) {
            return;
        }

        let decoder = match (&self.desc, self.started) {
            (_, true) if !self.has_more => {
                self.state = State::Exhausted;
                return;
            },
            (Some(desc), true) => {
                verbose!(portal = %self.portal, fetch, "continue portal");
                ExtendedQuery {
                    stmt: &self.stmt,
                    portal: self.portal.as_str(),
                    params: &[],
                    fetch,
                    suspended: true,
                }
                .write(self.io.send_buf());
                self.state = State::Reading {
                    exchange: Exchange::new(CommandDecoder::resume(PgProtocol::new(), RowSet, desc.clone())),
                    parsing: false,
                };
                return;
            },
            _ => CommandDecoder::new(PgProtocol::new(), RowSet),
        };

        verbose!(portal = %self.portal, fetch, "open portal");
        let parsing = ExtendedQuery {
            stmt: &self.stmt,
            portal: self.portal.as_str(),
            params: &self.params,
            fetch,
            suspended: false,
        }
        .write(self.io.send_buf());

        self.started = true;
        self.state = State::Reading { exchange: Exchange::new(decoder), parsing };
    }

    fn poll_page(&mut self, cx: &mut Context) -> Poll<Result<Page>> {
        let (result, parsing, parse_complete) = match &mut self.state {
            State::Reading { exchange, parsing } => {
                let result = ready!(exchange.poll_exchange(&mut self.io, cx));
                (result, *parsing, exchange.decoder().protocol().parse_complete())
            },
            State::Exhausted => {
                self.state = State::Idle;
                return Poll::Ready(Ok(Page::default()));
            },
            State::Idle | State::Closing(_) => panic!("`poll_page` called without `read`"),
        };
        self.state = State::Idle;

        match result {
            Ok(result) => {
                self.has_more = result.suspended;
                let mut rows = vec![];
                for set in result.results {
                    if self.desc.is_none() {
                        self.desc = set.desc;
                    }
                    rows.extend(set.value);
                }
                Poll::Ready(Ok(Page { rows, has_more: self.has_more }))
            },
            Err(err) => {
                self.fail(&err);
                Poll::Ready(Err(map_failure(&self.stmt, parsing, parse_complete, err)))
            },
        }
    }

    fn has_more(&self) -> bool {
        self.has_more
    }

    fn close(&mut self) {
        self.closing = true;
    }

    fn poll_close(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        loop {
            match &mut self.state {
                State::Reading { exchange, .. } => {
                    let result = ready!(exchange.poll_exchange(&mut self.io, cx));
                    self.state = State::Idle;
                    match result {
                        Ok(result) => self.has_more = result.suspended,
                        Err(err) => self.fail(&err),
                    }
                },
                State::Exhausted => self.state = State::Idle,
                State::Idle => {
                    if self.started {
                        verbose!(portal = %self.portal, "close portal");
                        close_portal(&self.stmt, self.portal.as_str(), self.io.send_buf());
                    } else if self.stmt_open {
                        verbose!(name = %self.stmt.name(), "close statement");
                        close_statement(&self.stmt, self.io.send_buf());
                    } else {
                        self.closing = false;
                        return Poll::Ready(Ok(()));
                    }
                    self.reset();
                    self.stmt_open = false;
                    self.state = State::Closing(Exchange::new(CommandDecoder::new(PgProtocol::new(), Count)));
                },
                State::Closing(exchange) => {
                    let result = ready!(exchange.poll_exchange(&mut self.io, cx));
                    self.state = State::Idle;
                    self.closing = false;
                    return Poll::Ready(result.map(|_| ()));
                },
            }
        }
    }
}
