//! Command exchange over a [`Transport`].
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use crate::{
    Result,
    collect::Collector,
    decode::CommandResult,
    phase::{CommandDecoder, Protocol},
    transport::Transport,
};

/// Flush an encoded command then feed every received payload to a [`CommandDecoder`].
///
/// Unlike [`Fetch`], the transport is borrowed on each poll, so it can be
/// kept by the owner between commands.
pub struct Exchange<P, C: Collector> {
    decoder: CommandDecoder<P, C>,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Flush,
    Recv,
    Complete,
}

impl<P, C: Collector> Exchange<P, C> {
    pub fn new(decoder: CommandDecoder<P, C>) -> Self {
        Self { decoder, phase: Phase::Flush }
    }

    pub fn decoder(&self) -> &CommandDecoder<P, C> {
        &self.decoder
    }
}

impl<P: Protocol, C: Collector> Exchange<P, C> {
    /// The command must already be written into [`Transport::send_buf`].
    ///
    /// # Panics
    ///
    /// Panics if polled after returning [`Poll::Ready`].
    pub fn poll_exchange<IO: Transport>(
        &mut self,
        io: &mut IO,
        cx: &mut Context,
    ) -> Poll<Result<CommandResult<C::Output>>> {
        loop {
            match self.phase {
                Phase::Flush => {
                    ready!(io.poll_flush(cx)?);
                    self.phase = Phase::Recv;
                },
                Phase::Recv => {
                    let payload = match ready!(io.poll_recv(cx)) {
                        Ok(payload) => payload,
                        Err(err) => {
                            self.phase = Phase::Complete;
                            return Poll::Ready(Err(err));
                        },
                    };
                    if let Poll::Ready(result) = self.decoder.decode(payload) {
                        self.phase = Phase::Complete;
                        return Poll::Ready(result);
                    }
                },
                Phase::Complete => panic!("`Exchange` polled after complete"),
            }
        }
    }
}

/// Future which flushes an encoded command and decodes its responses.
///
/// The command must already be written into [`Transport::send_buf`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Fetch<IO, P, C: Collector> {
    io: IO,
    exchange: Exchange<P, C>,
}

impl<IO, P, C: Collector> Fetch<IO, P, C> {
    pub fn new(io: IO, decoder: CommandDecoder<P, C>) -> Self {
        Self { io, exchange: Exchange::new(decoder) }
    }

    pub fn decoder(&self) -> &CommandDecoder<P, C> {
        self.exchange.decoder()
    }

    /// Returns the underlying transport.
    pub fn into_inner(self) -> IO {
        self.io
    }
}

// no field is structurally pinned
impl<IO, P, C: Collector> Unpin for Fetch<IO, P, C> { }

impl<IO, P, C> Future for Fetch<IO, P, C>
where
    IO: Transport,
    P: Protocol,
    C: Collector,
{
    type Output = Result<CommandResult<C::Output>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        me.exchange.poll_exchange(&mut me.io, cx)
    }
}
