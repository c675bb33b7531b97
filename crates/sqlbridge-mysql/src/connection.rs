//! Blocking MySQL connection.
//!
//! Implements the client side of the protocol the drivers need: the v10
//! handshake with plugin authentication, the text protocol (`COM_QUERY`),
//! `COM_INIT_DB`, `COM_PING` and `COM_QUIT`. Results are fully buffered into
//! a [`Cursor`].

// Packet lengths are bounded by the 24-bit framing.
#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use sqlbridge_core::backend::BackendConnection;
use sqlbridge_core::cursor::Cursor;
use sqlbridge_core::error::{ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, QueryErrorKind};

use crate::auth::{self, caching_sha2, plugins};
use crate::config::{HandshakeProfile, MySqlConfig};
use crate::escape;
use crate::protocol::{
    Command, ErrPacket, OkPacket, PacketKind, PacketReader, PacketStream, PacketWriter,
    capabilities, server_status,
};
use crate::transport::Transport;
use crate::types::{ColumnDef, parse_text_row};

/// Client error raised when the server asks for a plugin the client
/// cannot speak.
pub const CR_AUTH_PLUGIN_CANNOT_LOAD: u16 = 2059;

/// The server's initial handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    /// Scramble (parts one and two), without the trailing NUL
    pub auth_data: Vec<u8>,
    pub auth_plugin: String,
}

impl ServerHandshake {
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let mut r = PacketReader::new(payload);
        let protocol_version = r.read_u8().ok_or_else(|| malformed("empty handshake"))?;
        if protocol_version != 10 {
            return Err(malformed(format!(
                "unsupported protocol version {} (server too old)",
                protocol_version
            )));
        }
        let server_version = r.read_null_string();
        let connection_id = r.read_u32_le().ok_or_else(|| malformed("handshake has no connection id"))?;
        let mut auth_data = r
            .read_bytes(8)
            .ok_or_else(|| malformed("handshake has no scramble"))?
            .to_vec();
        r.skip(1);
        let caps_low = r.read_u16_le().ok_or_else(|| malformed("handshake has no capabilities"))?;
        let charset = r.read_u8().unwrap_or(0);
        let status_flags = r.read_u16_le().unwrap_or(0);
        let caps_high = r.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_low) | (u32::from(caps_high) << 16);
        let scramble_len = usize::from(r.read_u8().unwrap_or(0));
        r.skip(10);

        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len = scramble_len.saturating_sub(8).max(13);
            let part2 = r.read_bytes(len.min(r.remaining())).unwrap_or_default();
            auth_data.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            r.read_null_string()
        } else {
            String::new()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities,
            charset,
            status_flags,
            auth_data,
            auth_plugin: if auth_plugin.is_empty() {
                plugins::MYSQL_NATIVE_PASSWORD.to_string()
            } else {
                auth_plugin
            },
        })
    }
}

/// A live, authenticated MySQL link.
pub struct MySqlConnection {
    stream: PacketStream<Transport>,
    config: MySqlConfig,
    server: ServerHandshake,
    /// Capabilities both sides agreed on
    capabilities: u32,
    status_flags: u16,
    affected_rows: u64,
    insert_id: u64,
    warnings: u16,
    /// Set when an exchange failed mid-flight; the stream position is unknown.
    poisoned: bool,
}

impl fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("addr", &self.config.display_addr())
            .field("user", &self.config.user)
            .field("profile", &self.config.profile)
            .field("connection_id", &self.server.connection_id)
            .field("server_version", &self.server.server_version)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Open the transport, run the handshake and authenticate.
    #[tracing::instrument(level = "debug", skip(config), fields(addr = %config.display_addr(), user = %config.user))]
    pub fn connect(config: MySqlConfig) -> Result<Self, Error> {
        let mut stream = PacketStream::new(Transport::open(&config)?);
        let greeting = stream.read_payload()?;
        if PacketKind::of(&greeting) == PacketKind::Err {
            // Refused before the handshake (too many connections, host blocked).
            return Err(handshake_refused(&greeting));
        }
        let server = ServerHandshake::parse(&greeting)?;
        if server.capabilities & capabilities::CLIENT_PROTOCOL_41 == 0 {
            return Err(malformed("server does not speak protocol 4.1"));
        }

        let capabilities = config.capability_flags() & server.capabilities;
        let mut conn = Self {
            stream,
            status_flags: server.status_flags,
            capabilities,
            config,
            server,
            affected_rows: 0,
            insert_id: 0,
            warnings: 0,
            poisoned: false,
        };
        conn.authenticate()?;
        tracing::debug!(
            connection_id = conn.server.connection_id,
            server_version = %conn.server.server_version,
            "Connected to MySQL server"
        );
        Ok(conn)
    }

    pub fn server(&self) -> &ServerHandshake {
        &self.server
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn no_backslash_escapes(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    fn has(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }

    fn authenticate(&mut self) -> Result<(), Error> {
        let mut plugin = match self.config.profile {
            HandshakeProfile::Modern => self.server.auth_plugin.clone(),
            HandshakeProfile::Legacy => plugins::MYSQL_NATIVE_PASSWORD.to_string(),
        };
        let mut nonce = self.server.auth_data.clone();
        let secure = self.stream.get_ref().is_secure();
        let response = auth::initial_response(&plugin, &self.config.password, &nonce, secure);
        self.send_handshake_response(&plugin, &response)?;

        loop {
            let payload = self.stream.read_payload()?;
            // Auth switch requests share the 0xFE header with EOF but are longer.
            match payload.first().copied() {
                Some(0x00) => {
                    if let Some(ok) = PacketReader::new(&payload).parse_ok_packet() {
                        self.status_flags = ok.status_flags;
                    }
                    return Ok(());
                }
                Some(0xFF) => {
                    let err = PacketReader::new(&payload)
                        .parse_err_packet()
                        .ok_or_else(|| malformed("invalid error packet during authentication"))?;
                    return Err(auth_rejected(err));
                }
                Some(0xFE) => {
                    let mut r = PacketReader::new(&payload[1..]);
                    let requested = r.read_null_string();
                    if requested.is_empty() {
                        return Err(unsupported_plugin("mysql_old_password"));
                    }
                    if self.config.profile == HandshakeProfile::Legacy
                        && requested != plugins::MYSQL_NATIVE_PASSWORD
                    {
                        return Err(unsupported_plugin(&requested));
                    }
                    let data = r.read_rest();
                    nonce = data.strip_suffix(&[0]).unwrap_or(data).to_vec();
                    tracing::debug!(plugin = %requested, "Server switched authentication plugin");
                    plugin = requested;
                    let response =
                        auth::initial_response(&plugin, &self.config.password, &nonce, secure);
                    self.stream.write_payload(&response)?;
                }
                Some(0x01) => {
                    self.more_auth_data(&plugin, &nonce, &payload[1..], secure)?;
                }
                _ => return Err(malformed("unexpected packet during authentication")),
            }
        }
    }

    /// Handle an auth-more-data packet for the SHA-256 plugins.
    fn more_auth_data(&mut self, plugin: &str, nonce: &[u8], data: &[u8], secure: bool) -> Result<(), Error> {
        let password = self.config.password.clone();
        if data.starts_with(b"-----BEGIN") {
            let encrypted = auth::encrypt_password(&password, nonce, data)?;
            return self.stream.write_payload(&encrypted);
        }
        match (plugin, data.first().copied()) {
            (plugins::CACHING_SHA2_PASSWORD, Some(caching_sha2::FAST_AUTH_SUCCESS)) => Ok(()),
            (plugins::CACHING_SHA2_PASSWORD, Some(caching_sha2::PERFORM_FULL_AUTH)) => {
                if secure {
                    self.stream.write_payload(&auth::cleartext(&password))
                } else {
                    self.stream.write_payload(&[caching_sha2::REQUEST_PUBLIC_KEY])
                }
            }
            _ => Err(malformed(format!("unexpected authentication data for {}", plugin))),
        }
    }

    fn send_handshake_response(&mut self, plugin: &str, auth_response: &[u8]) -> Result<(), Error> {
        let mut w = PacketWriter::with_capacity(128);
        w.write_u32_le(self.capabilities);
        w.write_u32_le(self.config.max_packet_size);
        w.write_u8(self.config.profile.collation());
        w.write_zeros(23);
        w.write_null_terminated(&self.config.user);

        if self.has(capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            w.write_lenenc_bytes(auth_response);
        } else {
            w.write_u8(auth_response.len() as u8);
            w.write_bytes(auth_response);
        }
        if self.has(capabilities::CLIENT_PLUGIN_AUTH) {
            w.write_null_terminated(plugin);
        }
        self.stream.write_payload(w.as_bytes())
    }

    /// Send a command and read its first response packet.
    fn command(&mut self, command: Command, arg: &[u8]) -> Result<Vec<u8>, Error> {
        let mut w = PacketWriter::command(command);
        w.write_bytes(arg);
        self.stream.reset_sequence();
        self.stream.write_payload(w.as_bytes())?;
        self.stream.read_payload()
    }

    fn apply_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
    }

    /// Run one request/response exchange. Any failure other than a server
    /// error packet leaves the link unusable, and later exchanges fail
    /// without touching the wire.
    fn exchange<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        if self.poisoned {
            return Err(link_broken());
        }
        let result = f(self);
        if result.as_ref().is_err_and(|e| !matches!(e, Error::Query(_))) {
            tracing::warn!(
                connection_id = self.server.connection_id,
                "Exchange failed mid-flight, marking link broken"
            );
            self.poisoned = true;
        }
        result
    }

    /// Run one text-protocol statement.
    pub fn run(&mut self, sql: &str) -> Result<Cursor, Error> {
        self.exchange(|conn| {
            let first = conn.command(Command::Query, sql.as_bytes())?;
            let cursor = conn.read_response(first, sql)?;
            conn.drain_more_results(sql)?;
            Ok(cursor)
        })
    }

    fn read_response(&mut self, payload: Vec<u8>, sql: &str) -> Result<Cursor, Error> {
        match PacketKind::of(&payload) {
            PacketKind::Ok => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| malformed("invalid OK packet"))?;
                self.apply_ok(&ok);
                Ok(Cursor::from_ok(ok.affected_rows, ok.last_insert_id))
            }
            PacketKind::Err => Err(self.server_error(&payload, Some(sql))),
            PacketKind::LocalInfile => {
                // Decline by sending an empty file, then collect the verdict.
                self.stream.write_payload(&[])?;
                let verdict = self.stream.read_payload()?;
                if let Some(ok) = PacketReader::new(&verdict).parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Permission,
                    sql: Some(sql.to_string()),
                    code: 2068,
                    sqlstate: None,
                    message: "LOAD DATA LOCAL INFILE is not supported".to_string(),
                    source: None,
                }))
            }
            _ => self.read_result_set(&payload, sql),
        }
    }

    fn read_result_set(&mut self, first: &[u8], sql: &str) -> Result<Cursor, Error> {
        let count = PacketReader::new(first)
            .read_lenenc_int()
            .ok_or_else(|| malformed("invalid column count"))?;
        let columns = (0..count)
            .map(|_| ColumnDef::parse(&self.stream.read_payload()?))
            .collect::<Result<Vec<_>, Error>>()?;

        let deprecate_eof = self.has(capabilities::CLIENT_DEPRECATE_EOF);
        if !deprecate_eof {
            let eof = self.stream.read_payload()?;
            if PacketKind::of(&eof) != PacketKind::Eof {
                return Err(malformed("missing EOF after column definitions"));
            }
        }

        let mut rows = Vec::new();
        loop {
            let payload = self.stream.read_payload()?;
            match PacketKind::of(&payload) {
                PacketKind::Eof if deprecate_eof => {
                    let ok = PacketReader::new(&payload).parse_ok_packet().unwrap_or_default();
                    self.status_flags = ok.status_flags;
                    self.warnings = ok.warnings;
                    break;
                }
                PacketKind::Eof => {
                    let eof = PacketReader::new(&payload).parse_eof_packet().unwrap_or_default();
                    self.status_flags = eof.status_flags;
                    self.warnings = eof.warnings;
                    break;
                }
                PacketKind::Err => return Err(self.server_error(&payload, Some(sql))),
                _ => rows.push(parse_text_row(&payload, &columns)?),
            }
        }

        self.affected_rows = rows.len() as u64;
        self.insert_id = 0;
        let names = columns.into_iter().map(|c| c.name).collect();
        Ok(Cursor::new(names, rows).with_counts(self.affected_rows, 0))
    }

    /// Discard any further results (multi-statement or `CALL`), keeping the
    /// stream in sync. Counters reflect the last result.
    fn drain_more_results(&mut self, sql: &str) -> Result<(), Error> {
        while self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0 {
            let payload = self.stream.read_payload()?;
            self.read_response(payload, sql)?;
        }
        Ok(())
    }

    fn server_error(&self, payload: &[u8], sql: Option<&str>) -> Error {
        match PacketReader::new(payload).parse_err_packet() {
            Some(err) => err.into_error(sql),
            None => malformed("invalid error packet"),
        }
    }

    fn expect_ok(&mut self, payload: &[u8]) -> Result<(), Error> {
        match PacketKind::of(payload) {
            PacketKind::Ok => {
                if let Some(ok) = PacketReader::new(payload).parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            PacketKind::Err => Err(self.server_error(payload, None)),
            _ => Err(malformed("expected an OK packet")),
        }
    }

    pub fn init_db(&mut self, database: &str) -> Result<(), Error> {
        self.exchange(|conn| {
            let reply = conn.command(Command::InitDb, database.as_bytes())?;
            conn.expect_ok(&reply)
        })
    }

    /// `COM_PING`. Fails when the link is gone or broken.
    pub fn send_ping(&mut self) -> Result<(), Error> {
        self.exchange(|conn| {
            let reply = conn.command(Command::Ping, &[])?;
            conn.expect_ok(&reply)
        })
    }

    /// Send `COM_QUIT` and shut the transport down. Best effort.
    pub fn quit(mut self) {
        self.stream.reset_sequence();
        let _ = self.stream.write_payload(&[Command::Quit as u8]);
        self.stream.into_inner().shutdown();
    }
}

impl BackendConnection for MySqlConnection {
    fn query(&mut self, sql: &str) -> sqlbridge_core::Result<Cursor> {
        self.run(sql)
    }

    fn ping(&mut self) -> bool {
        !self.poisoned && self.send_ping().is_ok()
    }

    fn close(self) {
        self.quit();
    }

    fn escape_string(&self, text: &str) -> String {
        escape::escape_string(text, self.no_backslash_escapes())
    }

    fn select_db(&mut self, database: &str) -> sqlbridge_core::Result<()> {
        self.init_db(database)
    }

    fn set_charset(&mut self, charset: &str) -> sqlbridge_core::Result<()> {
        if charset.is_empty() || !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed(format!("invalid character set name '{}'", charset)));
        }
        self.run(&format!("SET NAMES {}", charset)).map(drop)
    }

    fn server_version(&self) -> &str {
        &self.server.server_version
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn insert_id(&self) -> u64 {
        self.insert_id
    }
}

fn malformed(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
    })
}

fn link_broken() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: "connection is out of sync after a failed exchange".to_string(),
        source: None,
    })
}

fn auth_rejected(err: ErrPacket) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: format!("{} ({})", err.error_message, err.error_code),
        source: Some(Box::new(err.into_error(None))),
    })
}

fn unsupported_plugin(plugin: &str) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: format!(
            "The server requested authentication method unknown to the client [{}] ({})",
            plugin, CR_AUTH_PLUGIN_CANNOT_LOAD
        ),
        source: None,
    })
}

fn handshake_refused(payload: &[u8]) -> Error {
    let message = PacketReader::new(payload)
        .parse_err_packet()
        .map_or_else(|| "server refused the connection".to_string(), |e| {
            format!("{} ({})", e.error_message, e.error_code)
        });
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Refused,
        message,
        source: None,
    })
}
