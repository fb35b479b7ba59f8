//! Result set column metadata.
use std::{ops::Deref, sync::Arc};

use crate::common::ByteStr;

/// Value transmission format of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Values are sent as their textual representation.
    ///
    /// MySQL text protocol rows and Postgres format code zero.
    Text,
    /// Values are sent in the binary representation of their type.
    ///
    /// Postgres format code one, integers in network byte order.
    Binary,
}

impl Format {
    /// Postgres format code.
    pub fn format_code(&self) -> u16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }

    pub(crate) fn from_code(code: u16) -> Option<Format> {
        match code {
            0 => Some(Format::Text),
            1 => Some(Format::Binary),
            _ => None,
        }
    }
}

/// Description of one result set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub(crate) ordinal: u16,
    pub(crate) name: ByteStr,
    pub(crate) type_code: u32,
    pub(crate) flags: u16,
    pub(crate) format: Format,
}

impl ColumnDefinition {
    pub fn new(ordinal: u16, name: impl Into<ByteStr>, type_code: u32, format: Format) -> Self {
        Self { ordinal, name: name.into(), type_code, flags: 0, format }
    }

    pub(crate) fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Position in the row, starting at zero.
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Postgres type [`Oid`][crate::postgres::Oid] or MySQL column type byte.
    pub fn type_code(&self) -> u32 {
        self.type_code
    }

    /// MySQL column flags, zero for Postgres.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn format(&self) -> Format {
        self.format
    }
}

/// Ordered columns of one result set.
///
/// Cheap to clone, every row of a result set shares the same description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDesc {
    columns: Arc<[ColumnDefinition]>,
}

impl RowDesc {
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        Self { columns: columns.into() }
    }

    /// Find the position of column by name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|e| e.name() == name)
    }

    /// Returns all column names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(ColumnDefinition::name)
    }
}

impl Deref for RowDesc {
    type Target = [ColumnDefinition];

    fn deref(&self) -> &Self::Target {
        &self.columns
    }
}
