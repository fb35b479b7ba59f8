//! Simple query protocol.
//!
//! <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-SIMPLE-QUERY>
use super::{extended::PgProtocol, frontend};
use crate::{collect::Collector, fetch::Fetch, phase::CommandDecoder, transport::Transport};

/// Send a simple `Query`.
///
/// The sql may contain several statements, each produces one result set.
/// Values arrive in text format.
pub fn query<IO, C>(mut io: IO, sql: &str, collector: C) -> Fetch<IO, PgProtocol, C>
where
    IO: Transport,
    C: Collector,
{
    frontend::write(frontend::Query { sql }, io.send_buf());
    Fetch::new(io, CommandDecoder::new(PgProtocol::new(), collector))
}
