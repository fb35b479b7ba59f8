//! Decoded row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::Bytes;
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error};

use crate::{
    column::{ColumnDefinition, Format, RowDesc},
    ext::FmtExt,
    postgres::PgType,
};

/// One decoded row.
///
/// Values are owned by the row, the decoder keeps nothing after handing it over.
#[derive(Clone)]
pub struct Row {
    desc: RowDesc,
    values: Vec<Option<Bytes>>,
}

impl Row {
    pub(crate) fn new(desc: RowDesc, values: Vec<Option<Bytes>>) -> Self {
        debug_assert_eq!(desc.len(), values.len(), "row description length missmatch");
        Self { desc, values }
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the shared row description.
    pub fn desc(&self) -> &RowDesc {
        &self.desc
    }

    /// Get column by index or name.
    pub fn column<I: Index>(&self, idx: I) -> Result<Column, DecodeError> {
        let nth = idx.position(&self.desc)?;
        Ok(Column::new(self.desc[nth].clone(), self.values[nth].clone()))
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        R::decode(self.column(idx)?)
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }
}

impl IntoIterator for Row {
    type Item = Column;

    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            desc: self.desc,
            values: self.values.into_iter(),
            iter_n: 0,
        }
    }
}

/// [`IntoIterator`] implementation from [`Row`].
#[derive(Debug)]
pub struct IntoIter {
    desc: RowDesc,
    values: std::vec::IntoIter<Option<Bytes>>,
    iter_n: usize,
}

impl Iterator for IntoIter {
    type Item = Column;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.values.next()?;
        let def = self.desc[self.iter_n].clone();
        self.iter_n += 1;
        Some(Column::new(def, value))
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (def, value) in self.desc.iter().zip(&self.values) {
            dbg.key(&def.name());
            match value {
                None => dbg.value(&format_args!("NULL")),
                Some(v) => dbg.value(&v.lossy()),
            };
        }
        dbg.finish()
    }
}

/// One column value with its definition.
#[derive(Debug, Clone)]
pub struct Column {
    def: ColumnDefinition,
    value: Option<Bytes>,
}

impl Column {
    fn new(def: ColumnDefinition, value: Option<Bytes>) -> Self {
        Self { def, value }
    }

    pub fn definition(&self) -> &ColumnDefinition {
        &self.def
    }

    /// Returns column name.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Return `true` if value is NULL.
    pub const fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Extract the inner bytes as slice.
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Consume self into the inner [`Bytes`].
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }

    /// Try consume self into the inner [`Bytes`].
    ///
    /// Return [`DecodeError::Null`] if value is `NULL`.
    pub fn try_into_value(self) -> Result<Bytes, DecodeError> {
        self.value.ok_or(DecodeError::Null)
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }

    fn text(self) -> Result<String, DecodeError> {
        Ok(String::from_utf8(self.try_into_value()?.into())?)
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i as usize)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from [`Column`].
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

impl Decode for () {
    fn decode(_: Column) -> Result<Self, DecodeError> {
        Ok(())
    }
}

/// Binary values are checked against the postgres oid, text values are parsed.
macro_rules! decode_number {
    ($($ty:ty),*) => {$(
        impl Decode for $ty {
            fn decode(col: Column) -> Result<Self, DecodeError> {
                match col.def.format() {
                    Format::Binary => {
                        if col.def.type_code() != <$ty as PgType>::OID {
                            return Err(DecodeError::TypeMissmatch(col.def.type_code()));
                        }
                        let value = col.try_into_value()?;
                        let be = <[u8; size_of::<$ty>()]>::try_from(&value[..])
                            .map_err(|_| DecodeError::Parse(stringify!($ty).into()))?;
                        Ok(<$ty>::from_be_bytes(be))
                    }
                    Format::Text => col
                        .text()?
                        .parse()
                        .map_err(|_| DecodeError::Parse(stringify!($ty).into())),
                }
            }
        }
    )*};
}

decode_number!(i16, i32, i64, f32, f64);

impl Decode for u64 {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        match col.def.format() {
            Format::Binary => {
                let value = i64::decode(col)?;
                u64::try_from(value).map_err(|_| DecodeError::Parse("u64".into()))
            }
            Format::Text => col.text()?.parse().map_err(|_| DecodeError::Parse("u64".into())),
        }
    }
}

impl Decode for bool {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.def.format() == Format::Binary && col.def.type_code() != bool::OID {
            return Err(DecodeError::TypeMissmatch(col.def.type_code()));
        }
        let value = col.try_into_value()?;
        match &value[..] {
            [1] | b"t" | b"1" | b"true" => Ok(true),
            [0] | b"f" | b"0" | b"false" => Ok(false),
            _ => Err(DecodeError::Parse("bool".into())),
        }
    }
}

impl Decode for String {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        // text, varchar, bpchar and name share the same binary representation
        if col.def.format() == Format::Binary && !matches!(col.def.type_code(), 25 | 1043 | 1042 | 19) {
            return Err(DecodeError::TypeMissmatch(col.def.type_code()));
        }
        col.text()
    }
}

impl Decode for Bytes {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.try_into_value()
    }
}

impl Decode for Vec<u8> {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.try_into_value().map(Into::into)
    }
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the nth column.
    fn position(self, desc: &RowDesc) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, desc: &RowDesc) -> Result<usize, DecodeError> {
        match self < desc.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, desc: &RowDesc) -> Result<usize, DecodeError> {
        desc.position(self).ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Server returned non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Column type does not match the requested type.
    TypeMissmatch(u32),
    /// Textual value could not be parsed.
    Parse(Cow<'static,str>),
    /// Row is null.
    Null,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::TypeMissmatch(code) => write!(f, "data type missmatch, found type {code}"),
            Self::Parse(ty) => write!(f, "invalid {ty} value"),
            Self::Null => write!(f, "unexpected NULL value"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(format: Format) -> Row {
        let desc = RowDesc::new(vec![
            ColumnDefinition::new(0, "id", 23, format),
            ColumnDefinition::new(1, "name", 25, format),
            ColumnDefinition::new(2, "note", 25, format),
        ]);
        let id = match format {
            Format::Binary => Bytes::from_static(&[0, 0, 1, 164]),
            Format::Text => Bytes::from_static(b"420"),
        };
        Row::new(desc, vec![Some(id), Some(Bytes::from_static(b"Foo")), None])
    }

    #[test]
    fn binary_values() {
        let row = row(Format::Binary);
        assert_eq!(row.try_get::<_, i32>(0).unwrap(), 420);
        assert_eq!(row.try_get::<_, String>("name").unwrap(), "Foo");
        assert_eq!(row.try_get::<_, Option<String>>("note").unwrap(), None);
        assert!(matches!(row.try_get::<_, i64>(0), Err(DecodeError::TypeMissmatch(23))));
        assert!(matches!(row.try_get::<_, String>(2), Err(DecodeError::Null)));
    }

    #[test]
    fn text_values() {
        let (id, name, note) = row(Format::Text).decode::<(i64, String, Option<String>)>().unwrap();
        assert_eq!(id, 420);
        assert_eq!(name, "Foo");
        assert!(note.is_none());
    }

    #[test]
    fn missing_column() {
        let row = row(Format::Text);
        assert!(matches!(row.try_get::<_, i32>("foo"), Err(DecodeError::ColumnNotFound(_))));
        assert!(matches!(row.try_get::<_, i32>(3), Err(DecodeError::IndexOutOfBounds(3))));
    }

    #[test]
    fn iterate_columns() {
        let names = row(Format::Text).into_iter().map(|c| c.name().to_owned()).collect::<Vec<_>>();
        assert_eq!(names, ["id", "name", "note"]);
    }
}
