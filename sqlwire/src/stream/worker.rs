use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{Demand, EndHandler, ExceptionHandler, RowHandler, StreamError, StreamMessage};
use crate::{
    Error, FromRow, Row,
    common::{debug, verbose},
    cursor::Cursor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// No cursor is open.
    Closed,
    /// Cursor open, no read in flight.
    Open,
    Reading,
    Closing,
}

/// Future which owns every state of a [`RowStream`][super::RowStream].
///
/// Resolves when every handle is dropped and the cursor is closed.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct StreamWorker<C, T> {
    recv: UnboundedReceiver<StreamMessage<T>>,
    cursor: C,
    fetch_size: u32,

    handler: Option<RowHandler<T>>,
    end_handler: Option<EndHandler>,
    exception_handler: Option<ExceptionHandler>,

    demand: Demand,
    state: CursorState,
    /// Open the cursor once the previous one is closed.
    reopen: bool,
    buffer: VecDeque<Row>,
    has_more: bool,
    detached: bool,
}

impl<C: Cursor, T: FromRow> StreamWorker<C, T> {
    pub(crate) fn new(cursor: C, fetch_size: u32, recv: UnboundedReceiver<StreamMessage<T>>) -> Self {
        Self {
            recv,
            cursor,
            fetch_size,
            handler: None,
            end_handler: None,
            exception_handler: None,
            demand: Demand::default(),
            state: CursorState::Closed,
            reopen: false,
            buffer: VecDeque::new(),
            has_more: false,
            detached: false,
        }
    }

    /// Apply every pending message.
    fn poll_messages(&mut self, cx: &mut Context) {
        while !self.detached {
            match self.recv.poll_recv(cx) {
                Poll::Ready(Some(msg)) => self.apply(msg),
                Poll::Ready(None) => {
                    verbose!("all stream handles dropped");
                    self.detached = true;
                    self.discard();
                },
                Poll::Pending => break,
            }
        }
    }

    fn apply(&mut self, msg: StreamMessage<T>) {
        match msg {
            StreamMessage::Handler(Some(handler)) => match self.state {
                CursorState::Closed => {
                    self.handler = Some(handler);
                    self.open();
                },
                CursorState::Closing => {
                    self.handler = Some(handler);
                    self.reopen = true;
                },
                CursorState::Open | CursorState::Reading => {
                    self.exception(StreamError::HandlerAttached.into());
                },
            },
            StreamMessage::Handler(None) => {
                self.handler = None;
                self.reopen = false;
                self.discard();
            },
            StreamMessage::EndHandler(handler) => self.end_handler = handler,
            StreamMessage::ExceptionHandler(handler) => self.exception_handler = handler,
            StreamMessage::Pause => self.demand = Demand::Bounded(0),
            StreamMessage::Fetch(amount) => self.demand = self.demand.add(amount),
            StreamMessage::Resume => self.demand = Demand::Unbounded,
            StreamMessage::Close => {
                self.reopen = false;
                self.discard();
            },
        }
    }

    fn open(&mut self) {
        verbose!(fetch = self.fetch_size, "open cursor");
        self.cursor.read(self.fetch_size);
        self.state = CursorState::Reading;
        self.has_more = false;
    }

    /// Close the open cursor, dropping every buffered row.
    fn discard(&mut self) {
        self.buffer.clear();
        if let CursorState::Open | CursorState::Reading = self.state {
            verbose!("close cursor");
            self.cursor.close();
            self.state = CursorState::Closing;
        }
    }

    fn exception(&mut self, err: Error) {
        match self.exception_handler.as_mut() {
            Some(handler) => handler(err),
            None => {
                debug!("unhandled row stream error: {err}");
            },
        }
    }

    /// Deliver buffered rows while there is demand.
    fn emit(&mut self, cx: &mut Context) {
        loop {
            // handler may have paused or closed the stream reentrantly
            self.poll_messages(cx);

            if self.demand.is_zero() || self.handler.is_none() {
                return;
            }
            let Some(row) = self.buffer.pop_front() else {
                return;
            };
            self.demand.decrement();

            match T::from_row(row) {
                Ok(row) => {
                    if let Some(handler) = self.handler.as_mut() {
                        handler(row);
                    }
                },
                Err(err) => {
                    self.discard();
                    self.exception(err.into());
                },
            }
        }
    }
}

impl<C: Cursor, T: FromRow> Future for StreamWorker<C, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        loop {
            me.poll_messages(cx);
            me.emit(cx);

            match me.state {
                CursorState::Closed => {
                    if me.detached {
                        return Poll::Ready(());
                    }
                    if me.reopen {
                        me.reopen = false;
                        me.open();
                        continue;
                    }
                    return Poll::Pending;
                },
                CursorState::Open => {
                    // dormant until demand, no read and no end event
                    if !me.buffer.is_empty() || me.demand.is_zero() {
                        return Poll::Pending;
                    }
                    if me.has_more {
                        verbose!(fetch = me.fetch_size, "read next page");
                        me.cursor.read(me.fetch_size);
                        me.state = CursorState::Reading;
                        continue;
                    }
                    verbose!("row stream ended");
                    me.cursor.close();
                    me.state = CursorState::Closing;
                    if let Some(end) = me.end_handler.as_mut() {
                        end();
                    }
                },
                CursorState::Reading => match me.cursor.poll_page(cx) {
                    Poll::Ready(Ok(page)) => {
                        verbose!(rows = page.rows.len(), more = page.has_more, "page");
                        me.buffer.extend(page.rows);
                        me.has_more = page.has_more;
                        me.state = CursorState::Open;
                    },
                    Poll::Ready(Err(err)) => {
                        me.state = CursorState::Closed;
                        me.has_more = false;
                        me.buffer.clear();
                        me.exception(StreamError::Fetch(Box::new(err)).into());
                    },
                    Poll::Pending => return Poll::Pending,
                },
                CursorState::Closing => match me.cursor.poll_close(cx) {
                    Poll::Ready(result) => {
                        me.state = CursorState::Closed;
                        if let Err(err) = result {
                            me.exception(err);
                        }
                    },
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}
