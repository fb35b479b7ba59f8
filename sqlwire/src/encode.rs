//! Parameter encoding.
use bytes::Bytes;

use crate::postgres::{Oid, PgType, oid};

/// A value ready to be sent as a bind parameter.
///
/// Always in binary format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    oid: Oid,
    value: Option<Bytes>,
}

impl Encoded {
    pub fn new(oid: Oid, value: Option<Bytes>) -> Self {
        Self { oid, value }
    }

    /// A `NULL` of unspecified type.
    pub fn null() -> Self {
        Self { oid: oid::UNSPECIFIED, value: None }
    }

    /// Type of the parameter, zero means unspecified.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Length sent before the value, `-1` for `NULL`.
    pub fn size(&self) -> i32 {
        match &self.value {
            Some(value) => value.len().try_into().expect("parameter too large for protocol"),
            None => -1,
        }
    }
}

/// Type that can be encoded as a bind parameter.
pub trait Encode {
    fn encode(self) -> Encoded;
}

impl Encode for Encoded {
    fn encode(self) -> Encoded {
        self
    }
}

impl<T: Encode + PgType> Encode for Option<T> {
    fn encode(self) -> Encoded {
        match self {
            Some(value) => value.encode(),
            None => Encoded::new(T::OID, None),
        }
    }
}

macro_rules! encode_number {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            fn encode(self) -> Encoded {
                Encoded::new(<$ty>::OID, Some(Bytes::copy_from_slice(&self.to_be_bytes())))
            }
        }
    )*};
}

encode_number!(i16, i32, i64, f32, f64);

impl Encode for bool {
    fn encode(self) -> Encoded {
        Encoded::new(bool::OID, Some(Bytes::copy_from_slice(&[self as u8])))
    }
}

impl Encode for &str {
    fn encode(self) -> Encoded {
        Encoded::new(<str as PgType>::OID, Some(Bytes::copy_from_slice(self.as_bytes())))
    }
}

impl Encode for String {
    fn encode(self) -> Encoded {
        Encoded::new(String::OID, Some(Bytes::from(self.into_bytes())))
    }
}

impl Encode for Bytes {
    fn encode(self) -> Encoded {
        Encoded::new(Bytes::OID, Some(self))
    }
}

impl Encode for Vec<u8> {
    fn encode(self) -> Encoded {
        Encoded::new(Bytes::OID, Some(Bytes::from(self)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_values() {
        let i = 420i32.encode();
        assert_eq!(i.oid(), 23);
        assert_eq!(i.value(), Some(&[0, 0, 1, 164][..]));
        assert_eq!(i.size(), 4);

        let null = None::<i64>.encode();
        assert_eq!(null.oid(), 20);
        assert_eq!(null.size(), -1);
        assert!(null.is_null());

        assert_eq!("Foo".encode().value(), Some(&b"Foo"[..]));
    }
}
