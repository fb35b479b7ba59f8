//! Row stream with handler callbacks and demand control.
//!
//! A [`RowStream`] is a cheaply cloneable handle, every operation is a
//! message to a [`StreamWorker`] which owns the [`Cursor`], the handlers and
//! the buffered rows. The worker is a future which must be spawned or
//! polled by the caller.
//!
//! ```no_run
//! # async fn app(cursor: impl sqlwire::cursor::Cursor + Send + 'static) {
//! use sqlwire::stream;
//!
//! let (rows, worker) = stream::row_stream::<_, (i32,)>(cursor, 50);
//! tokio::spawn(worker);
//!
//! rows.handler(|(id,)| println!("{id}"))
//!     .end_handler(|| println!("done"))
//!     .exception_handler(|err| eprintln!("{err}"));
//! # }
//! ```
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{Error, FromRow, Result, cursor::Cursor};

mod worker;

pub use worker::StreamWorker;

pub(crate) type RowHandler<T> = Box<dyn FnMut(T) + Send>;
pub(crate) type EndHandler = Box<dyn FnMut() + Send>;
pub(crate) type ExceptionHandler = Box<dyn FnMut(Error) + Send>;

pub(crate) enum StreamMessage<T> {
    Handler(Option<RowHandler<T>>),
    EndHandler(Option<EndHandler>),
    ExceptionHandler(Option<ExceptionHandler>),
    Pause,
    Fetch(u64),
    Resume,
    Close,
}

/// Create a stream over `cursor`, reading `fetch_size` rows per page.
///
/// Nothing is read until a [`handler`][RowStream::handler] is attached.
pub fn row_stream<C, T>(cursor: C, fetch_size: u32) -> (RowStream<T>, StreamWorker<C, T>)
where
    C: Cursor,
    T: FromRow,
{
    let (send, recv) = mpsc::unbounded_channel();
    (RowStream { send }, StreamWorker::new(cursor, fetch_size.max(1), recv))
}

/// Handle of a row stream.
///
/// Operations are applied in the order they are sent, including the ones
/// sent from inside a handler, which are applied before the next row.
pub struct RowStream<T> {
    send: UnboundedSender<StreamMessage<T>>,
}

impl<T> RowStream<T> {
    fn send(&self, msg: StreamMessage<T>) -> &Self {
        // the worker is gone once the stream is finished, nothing left to control
        let _ = self.send.send(msg);
        self
    }

    /// Attach the row handler, opening the cursor if none is open.
    ///
    /// Attaching while a cursor is open is rejected with
    /// [`StreamError::HandlerAttached`] delivered to the exception handler.
    pub fn handler(&self, f: impl FnMut(T) + Send + 'static) -> &Self {
        self.send(StreamMessage::Handler(Some(Box::new(f))))
    }

    /// Detach the row handler, an open cursor is closed.
    pub fn remove_handler(&self) -> &Self {
        self.send(StreamMessage::Handler(None))
    }

    /// Called once after the last row.
    pub fn end_handler(&self, f: impl FnMut() + Send + 'static) -> &Self {
        self.send(StreamMessage::EndHandler(Some(Box::new(f))))
    }

    /// Called when a page cannot be read or a row cannot be converted.
    pub fn exception_handler(&self, f: impl FnMut(Error) + Send + 'static) -> &Self {
        self.send(StreamMessage::ExceptionHandler(Some(Box::new(f))))
    }

    /// Stop delivering rows.
    pub fn pause(&self) -> &Self {
        self.send(StreamMessage::Pause)
    }

    /// Allow `amount` more rows to be delivered.
    pub fn fetch(&self, amount: u64) -> &Self {
        self.send(StreamMessage::Fetch(amount))
    }

    /// Deliver rows without limit.
    pub fn resume(&self) -> &Self {
        self.send(StreamMessage::Resume)
    }

    /// Close the cursor, buffered and in flight rows are discarded.
    ///
    /// Closing a closed stream does nothing.
    pub fn close(&self) -> &Self {
        self.send(StreamMessage::Close)
    }
}

impl<T: Send + 'static> RowStream<T> {
    /// Consume rows as a [`Stream`][futures_core::Stream].
    ///
    /// Replaces every handler of this stream.
    pub fn subscribe(&self) -> Subscription<T> {
        let (send, recv) = mpsc::unbounded_channel();
        let rows = send.clone();
        let end = send.clone();
        self.send(StreamMessage::ExceptionHandler(Some(Box::new(move |err| {
            let _ = send.send(Event::Error(err));
        }))));
        self.send(StreamMessage::EndHandler(Some(Box::new(move || {
            let _ = end.send(Event::End);
        }))));
        self.send(StreamMessage::Handler(Some(Box::new(move |row| {
            let _ = rows.send(Event::Row(row));
        }))));
        Subscription { stream: self.clone(), recv, done: false }
    }
}

impl<T> Clone for RowStream<T> {
    fn clone(&self) -> Self {
        Self { send: self.send.clone() }
    }
}

impl<T> fmt::Debug for RowStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowStream")
    }
}

/// Number of rows the handler is willing to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Bounded(u64),
    Unbounded,
}

impl Default for Demand {
    fn default() -> Self {
        Demand::Unbounded
    }
}

impl Demand {
    /// Add demand, saturating to unbounded.
    pub fn add(self, amount: u64) -> Demand {
        match self {
            Demand::Bounded(n) => match n.checked_add(amount) {
                Some(u64::MAX) | None => Demand::Unbounded,
                Some(n) => Demand::Bounded(n),
            },
            Demand::Unbounded => Demand::Unbounded,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Demand::Bounded(0))
    }

    /// Account for one delivered row.
    pub fn decrement(&mut self) {
        if let Demand::Bounded(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

enum Event<T> {
    Row(T),
    End,
    Error(Error),
}

/// [`Stream`][futures_core::Stream] of rows returned from [`RowStream::subscribe`].
///
/// The stream ends after the last row or after the first error.
/// Dropping the subscription closes the stream.
pub struct Subscription<T> {
    stream: RowStream<T>,
    recv: UnboundedReceiver<Event<T>>,
    done: bool,
}

impl<T> Subscription<T> {
    /// Returns the controlling handle.
    pub fn stream(&self) -> &RowStream<T> {
        &self.stream
    }
}

impl<T> futures_core::Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        if me.done {
            return Poll::Ready(None);
        }
        match me.recv.poll_recv(cx) {
            Poll::Ready(Some(Event::Row(row))) => Poll::Ready(Some(Ok(row))),
            Poll::Ready(Some(Event::Error(err))) => {
                me.done = true;
                Poll::Ready(Some(Err(err)))
            },
            Poll::Ready(Some(Event::End) | None) => {
                me.done = true;
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if !self.done {
            self.stream.close();
        }
    }
}

/// An error from a [`RowStream`].
pub enum StreamError {
    /// A row handler was attached while a cursor is open.
    HandlerAttached,
    /// Reading a page failed, the cursor was discarded.
    Fetch(Box<Error>),
}

impl StreamError {
    /// Returns the page read failure.
    pub fn fetch_error(&self) -> Option<&Error> {
        match self {
            StreamError::Fetch(err) => Some(err),
            StreamError::HandlerAttached => None,
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Fetch(err) => Some(&**err),
            StreamError::HandlerAttached => None,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::HandlerAttached => f.write_str("row handler already attached to an open cursor"),
            StreamError::Fetch(err) => write!(f, "failed to read page: {err}"),
        }
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn demand() {
        assert_eq!(Demand::default(), Demand::Unbounded);
        assert_eq!(Demand::Bounded(2).add(3), Demand::Bounded(5));
        assert_eq!(Demand::Bounded(2).add(u64::MAX), Demand::Unbounded);
        assert_eq!(Demand::Bounded(0).add(u64::MAX), Demand::Unbounded);

        let mut demand = Demand::Bounded(1);
        demand.decrement();
        assert!(demand.is_zero());
        demand.decrement();
        assert!(demand.is_zero());

        let mut demand = Demand::Unbounded;
        demand.decrement();
        assert_eq!(demand, Demand::Unbounded);
    }
}
