//! MySQL client/server protocol.
//!
//! Every packet starts with a 4-byte header: a 3-byte little-endian payload
//! length and a 1-byte sequence id. Payloads of `2^24 - 1` bytes or more are
//! split, and a payload that is an exact multiple of the maximum is followed
//! by an empty packet.

pub mod reader;
pub mod stream;
pub mod writer;

pub use reader::PacketReader;
pub use stream::PacketStream;
pub use writer::PacketWriter;

use sqlbridge_core::error::{Error, QueryError, QueryErrorKind};

/// Largest payload a single packet can carry.
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FF_FF;

/// Capability flags exchanged in the handshake.
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u32 = 1 << 10;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// What every profile asks for.
    pub const BASE_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_TRANSACTIONS
        | CLIENT_FOUND_ROWS;

    /// Added on top of the base flags by the modern client.
    pub const MODERN_CLIENT_FLAGS: u32 = CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_MULTI_RESULTS
        | CLIENT_DEPRECATE_EOF;
}

/// Commands (`COM_*`) the drivers send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    Ping = 0x0e,
}

/// Server status flags carried by OK and EOF packets.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
}

/// Collation ids sent in the handshake response.
pub mod charset {
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_length: u32,
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// What a server response payload is, judged from its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ok,
    Err,
    /// `0xFE` with a short payload. Outside a result set this is an auth
    /// switch request.
    Eof,
    LocalInfile,
    Data,
}

impl PacketKind {
    pub fn of(payload: &[u8]) -> Self {
        match payload.first() {
            Some(0x00) => PacketKind::Ok,
            Some(0xFF) => PacketKind::Err,
            Some(0xFE) if payload.len() < 9 => PacketKind::Eof,
            Some(0xFB) => PacketKind::LocalInfile,
            _ => PacketKind::Data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// Empty for errors sent before the handshake completes
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    /// The server error as a query error, classified by error number.
    pub fn into_error(self, sql: Option<&str>) -> Error {
        Error::Query(QueryError {
            kind: QueryErrorKind::from_code(self.error_code),
            sql: sql.map(str::to_string),
            code: self.error_code,
            sqlstate: (!self.sql_state.is_empty()).then_some(self.sql_state),
            message: self.error_message,
            source: None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}
