//! MySQL flag sets.

// https://dev.mysql.com/doc/dev/mysql-server/latest/mysql__com_8h.html
bitflags::bitflags! {
    /// Server status flags, carried by OK and EOF packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u16 {
        /// A transaction is active.
        const IN_TRANS = 0x0001;
        /// Autocommit mode is set.
        const AUTOCOMMIT = 0x0002;
        /// Another result set follows.
        const MORE_RESULTS_EXISTS = 0x0008;
        const NO_GOOD_INDEX_USED = 0x0010;
        const NO_INDEX_USED = 0x0020;
        /// A cursor still has rows.
        const CURSOR_EXISTS = 0x0040;
        /// The cursor has sent its last row.
        const LAST_ROW_SENT = 0x0080;
        const DB_DROPPED = 0x0100;
        const NO_BACKSLASH_ESCAPES = 0x0200;
        const METADATA_CHANGED = 0x0400;
        const QUERY_WAS_SLOW = 0x0800;
        const PS_OUT_PARAMS = 0x1000;
        const IN_TRANS_READONLY = 0x2000;
        const SESSION_STATE_CHANGED = 0x4000;
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
bitflags::bitflags! {
    /// Client capabilities negotiated at connection time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const LONG_PASSWORD = 0x0000_0001;
        const FOUND_ROWS = 0x0000_0002;
        const LONG_FLAG = 0x0000_0004;
        const CONNECT_WITH_DB = 0x0000_0008;
        const LOCAL_FILES = 0x0000_0080;
        /// ERR packets carry a SQL state.
        const PROTOCOL_41 = 0x0000_0200;
        const TRANSACTIONS = 0x0000_2000;
        const SECURE_CONNECTION = 0x0000_8000;
        const MULTI_STATEMENTS = 0x0001_0000;
        /// Multiple result sets for `COM_QUERY`.
        const MULTI_RESULTS = 0x0002_0000;
        const PS_MULTI_RESULTS = 0x0004_0000;
        const PLUGIN_AUTH = 0x0008_0000;
        const SESSION_TRACK = 0x0080_0000;
        /// OK packets replace EOF packets.
        const DEPRECATE_EOF = 0x0100_0000;
    }
}

impl Status {
    /// The result set ended while a cursor still has rows.
    pub fn is_suspended(&self) -> bool {
        self.contains(Status::CURSOR_EXISTS) && !self.contains(Status::LAST_ROW_SENT)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursor_status() {
        assert!(Status::CURSOR_EXISTS.is_suspended());
        assert!(!(Status::CURSOR_EXISTS | Status::LAST_ROW_SENT).is_suspended());
        assert!(!Status::MORE_RESULTS_EXISTS.is_suspended());
        assert_eq!(Status::from_bits_truncate(0x000a), Status::AUTOCOMMIT | Status::MORE_RESULTS_EXISTS);
    }
}
