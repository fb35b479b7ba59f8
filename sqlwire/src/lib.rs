//! Command execution pipeline for the Postgres and MySQL wire protocols.
//!
//! `sqlwire` turns packets received from a database server into typed
//! results. It does not open connections, the caller provides a
//! [`Transport`][transport::Transport].
//!
//! # Examples
//!
//! MySQL text query:
//!
//! ```no_run
//! use sqlwire::{Config, collect::Collect, mysql, transport::Transport};
//!
//! # async fn app(mut io: impl Transport) -> sqlwire::Result<()> {
//! let config = Config::from_env();
//!
//! let users = mysql::query(&mut io, "SELECT id, name FROM users", Collect::<(i64, String)>::new(), &config)
//!     .await?
//!     .into_value()
//!     .unwrap_or_default();
//! # Ok(())
//! # }
//! ```
//!
//! Postgres prepared statement, parsed once per connection:
//!
//! ```no_run
//! use sqlwire::{Encode, collect::Count, postgres, statement::StatementCache, transport::Transport};
//!
//! # async fn app(mut io: impl Transport) -> sqlwire::Result<()> {
//! let cache = StatementCache::default();
//! let stmt = cache.prepare("DELETE FROM sessions WHERE user_id = $1");
//!
//! let deleted = postgres::execute(&mut io, stmt, &[420i32.encode()], 0, Count)
//!     .await?
//!     .affected_rows();
//! # Ok(())
//! # }
//! ```
//!
//! Paged reads are available through [`cursor::PgCursor`] and the
//! [`stream`] module.

pub mod common;
mod ext;

mod config;
mod error;

// Protocol
pub mod phase;
pub mod postgres;
pub mod mysql;

// Component
pub mod column;
pub mod row;
pub mod encode;
pub mod collect;
pub mod decode;
pub mod statement;

// Operation
pub mod transport;
pub mod fetch;
pub mod cursor;
pub mod stream;

pub use config::{Config, ParseError};
pub use error::{Error, ErrorKind, Result, ServerError};

pub use encode::Encode;
pub use row::{Row, FromRow, Decode, DecodeError};
pub use collect::Collector;
pub use decode::{CommandResult, QueryResult, ResultMetadata};
