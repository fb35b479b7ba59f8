//! Postgres Backend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, Bytes};

use crate::{
    column::{ColumnDefinition, Format, RowDesc},
    common::ByteStr,
    error::ServerError,
    ext::BytesExt,
    phase::ProtocolError,
};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages which may appear in response to a query.
#[derive(Debug)]
pub enum BackendMessage {
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    ParameterDescription(ParameterDescription),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NoData,
    NoticeResponse,
    ParameterDescription,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

impl BackendMessage {
    /// Split the message type from a [`Payload`][crate::transport::Payload] body and decode.
    pub fn from_body(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::malformed("empty message"));
        }
        let msgtype = body.get_u8();
        Self::decode(msgtype, body)
    }
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

fn truncated(what: &'static str) -> ProtocolError {
    ProtocolError::malformed(what)
}

fn nul_bytestr(body: &mut Bytes, what: &'static str) -> Result<ByteStr, ProtocolError> {
    match body.get_nul_bytestr() {
        Some(Ok(s)) => Ok(s),
        Some(Err(_)) | None => Err(truncated(what)),
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';

    /// Decode the same fields as [`ErrorResponse`].
    pub fn to_server_error(&self) -> Result<ServerError, ProtocolError> {
        fields(self.body.clone())
    }
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(NoticeResponse { body })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message terminator and no string follows.
/// Since more field types might be added in future,
/// frontends should silently ignore fields of unrecognized type.
///
/// `String` The field value.
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn to_server_error(&self) -> Result<ServerError, ProtocolError> {
        fields(self.body.clone())
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

// https://www.postgresql.org/docs/current/protocol-error-fields.html
fn fields(mut body: Bytes) -> Result<ServerError, ProtocolError> {
    let mut err = ServerError {
        code: None,
        sql_state: None,
        severity: None,
        message: ByteStr::default(),
        detail: None,
    };

    loop {
        if body.is_empty() {
            return Err(truncated("ErrorResponse"));
        }
        let field = body.get_u8();
        if field == b'\0' {
            break;
        }
        let value = nul_bytestr(&mut body, "ErrorResponse")?;
        match field {
            b'V' => err.severity = Some(value),
            b'S' if err.severity.is_none() => err.severity = Some(value),
            b'C' => err.sql_state = Some(value),
            b'M' => err.message = value,
            b'D' => err.detail = Some(value),
            _ => { },
        }
    }

    Ok(err)
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    /// Specifies the number of fields in a row (can be zero).
    pub field_len: u16,
    /// Undecoded response body.
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';

    /// Decode every field description.
    pub fn to_desc(&self) -> Result<RowDesc, ProtocolError> {
        let mut body = self.body.clone();
        let mut columns = Vec::with_capacity(self.field_len as usize);

        for ordinal in 0..self.field_len {
            let name = nul_bytestr(&mut body, "RowDescription")?;
            // table oid, attribute number, type oid, type size, type modifier, format code
            if body.remaining() < 4 + 2 + 4 + 2 + 4 + 2 {
                return Err(truncated("RowDescription"));
            }
            let _table_oid = body.get_u32();
            let _attribute = body.get_i16();
            let oid = body.get_u32();
            let _size = body.get_i16();
            let _modifier = body.get_i32();
            let format = Format::from_code(body.get_u16())
                .ok_or_else(|| truncated("RowDescription format code"))?;

            columns.push(ColumnDefinition::new(ordinal, name, oid, format));
        }

        Ok(RowDesc::new(columns))
    }
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 2 {
            return Err(truncated("RowDescription"));
        }
        Ok(Self {
            field_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';

    /// Split every column value, `None` is NULL.
    pub fn into_values(self) -> Result<Vec<Option<Bytes>>, ProtocolError> {
        let mut body = self.body;
        let mut values = Vec::with_capacity(self.column_len as usize);

        for _ in 0..self.column_len {
            if body.remaining() < 4 {
                return Err(truncated("DataRow"));
            }
            let value = match body.get_i32() {
                -1 => None,
                len if len < 0 => return Err(truncated("DataRow value length")),
                len => {
                    let len = len as usize;
                    if body.remaining() < len {
                        return Err(truncated("DataRow"));
                    }
                    Some(body.split_to(len))
                },
            };
            values.push(value);
        }

        Ok(values)
    }
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 2 {
            return Err(truncated("DataRow"));
        }
        Ok(Self {
            column_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
/// oid used to be the object ID of the inserted row if rows was 1 and the target table had OIDs,
/// but OIDs system columns are not supported anymore; therefore oid is always 0.
///
/// For a DELETE, UPDATE, MERGE, SELECT, MOVE, FETCH or COPY command,
/// the tag is the command name followed by the number of rows.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';

    /// Number of rows affected by the command, when the tag reports one.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut whs = self.tag.split_whitespace();
        let tag = whs.next()?;
        let rows = whs.next()?;
        match tag {
            "INSERT" => whs.next()?,
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
            _ => return None,
        }
        .parse()
        .ok()
    }
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: nul_bytestr(&mut body, "CommandComplete")?,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The number of parameters used by the statement (can be zero).
    pub param_len: u16,
    /// Then, for each parameter, the object ID of the parameter data type.
    pub oids: Bytes,
}

impl ParameterDescription  {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 2 {
            return Err(truncated("ParameterDescription"));
        }
        Ok(Self {
            param_len: body.get_u16(),
            oids: body,
        })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(Self::MSGTYPE,msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';

    /// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
    struct ReadyForQuery, b'Z';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_tag() {
        let tag = |tag: &'static str| CommandComplete { tag: ByteStr::from_static(tag) }.rows_affected();
        assert_eq!(tag("INSERT 0 5"), Some(5));
        assert_eq!(tag("SELECT 2"), Some(2));
        assert_eq!(tag("UPDATE 10"), Some(10));
        assert_eq!(tag("CREATE TABLE"), None);
        assert_eq!(tag("BEGIN"), None);
    }

    #[test]
    fn error_fields() {
        let body = Bytes::from_static(
            b"SERROR\0VERROR\0C26000\0Mprepared statement \"s1\" does not exist\0\0",
        );
        let err = ErrorResponse::decode(b'E', body).unwrap().to_server_error().unwrap();
        assert_eq!(err.severity(), Some("ERROR"));
        assert_eq!(err.sql_state(), Some("26000"));
        assert_eq!(err.message(), "prepared statement \"s1\" does not exist");
        assert_eq!(err.code(), None);
    }

    #[test]
    fn row_description() {
        let body = Bytes::from_static(b"\0\x02id\0\0\0\0\0\0\x01\0\0\0\x17\0\x04\xff\xff\xff\xff\0\x01name\0\0\0\0\0\0\x02\0\0\0\x19\xff\xff\xff\xff\xff\xff\0\x01");
        let desc = RowDescription::decode(b'T', body).unwrap().to_desc().unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].type_code(), 23);
        assert_eq!(desc[1].name(), "name");
        assert_eq!(desc[1].format(), Format::Binary);
        assert_eq!(desc[1].ordinal(), 1);
    }

    #[test]
    fn data_row() {
        let body = Bytes::from_static(b"\0\x02\0\0\0\x02hi\xff\xff\xff\xff");
        let values = DataRow::decode(b'D', body).unwrap().into_values().unwrap();
        assert_eq!(values, vec![Some(Bytes::from_static(b"hi")), None]);

        let body = Bytes::from_static(b"\0\x01\0\0\0\x05hi");
        assert!(DataRow::decode(b'D', body).unwrap().into_values().is_err());
    }

    #[test]
    fn unknown_message() {
        assert!(BackendMessage::from_body(Bytes::from_static(b"?")).is_err());
        assert!(BackendMessage::from_body(Bytes::new()).is_err());
        assert_eq!(BackendMessage::message_name(b'Z'), "ReadyForQuery");
    }
}
