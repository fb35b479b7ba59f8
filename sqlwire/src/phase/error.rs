//! Protocol error
use std::fmt;

use crate::common::ByteStr;

/// An error when interpreting payloads from the server.
///
/// Any protocol error is fatal for the in-flight command.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    ColumnCount {
        expected: usize,
        found: usize,
    },
    Sequence {
        expected: u8,
        found: u8,
    },
    Malformed {
        what: &'static str,
    },
    StaleStatement {
        name: ByteStr,
    },
    Completed,
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn column_count(expected: usize, found: usize) -> ProtocolError {
        Self::ColumnCount { expected, found }
    }

    pub(crate) fn malformed(what: &'static str) -> ProtocolError {
        Self::Malformed { what }
    }

    pub(crate) fn stale(name: ByteStr) -> ProtocolError {
        Self::StaleStatement { name }
    }
}

struct Header(u8);

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_ascii_alphanumeric() {
            write!(f, "{}", self.0 as char)
        } else {
            write!(f, "0x{:02x}", self.0)
        }
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Unexpected { expect, found, phase } => {
                match expect {
                    Some(m) => write!(f, "Expected packet `{}` found `{}`", Header(*m), Header(*found))?,
                    None => write!(f, "Unexpected packet `{}`", Header(*found))?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::ColumnCount { expected, found } => {
                write!(f, "Expected {expected} columns, found {found}")
            },
            ProtocolError::Sequence { expected, found } => {
                write!(f, "Packet out of order, expected sequence {expected} found {found}")
            },
            ProtocolError::Malformed { what } => write!(f, "Malformed {what}"),
            ProtocolError::StaleStatement { name } => {
                write!(f, "Prepared statement `{name}` no longer exists on the server")
            },
            ProtocolError::Completed => f.write_str("Payload received after command completed"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
