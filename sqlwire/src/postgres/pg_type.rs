/// Postgres object identifier, an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Oids of the builtin types parameters are encoded as.
pub mod oid {
    use super::Oid;

    /// Leaves the parameter type to the server.
    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
}

/// Rust type sent as a fixed postgres type.
pub trait PgType {
    const OID: Oid;
}

macro_rules! pg_type {
    ($($ty:ty => $oid:ident),* $(,)?) => {$(
        impl PgType for $ty {
            const OID: Oid = oid::$oid;
        }
    )*};
}

pg_type! {
    bool => BOOL,
    i16 => INT2,
    i32 => INT4,
    i64 => INT8,
    f32 => FLOAT4,
    f64 => FLOAT8,
    str => TEXT,
    String => TEXT,
    bytes::Bytes => BYTEA,
    Vec<u8> => BYTEA,
}
