//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 43 ┃ 00 | 00 | 00 | 32 ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! A [`Payload`][crate::transport::Payload] keeps the message type byte and drops the length.
//!
//! ## Extended Query
//!
//! Parameterized statements go through `Parse`, `Bind`, `Describe` and `Execute`, closed
//! by a `Sync`. The server answers every step, and always ends with `ReadyForQuery`, even
//! when one of the steps failed. See [`extended`].
//!
//! <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-EXT-QUERY>

mod pg_type;

pub mod frontend;
pub mod backend;
pub mod extended;
pub mod simple;

#[cfg(test)]
pub(crate) mod mock;

pub use pg_type::{Oid, PgType, oid};

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol};
pub use extended::{ExtendedQuery, PgProtocol, execute};
pub use simple::query;
