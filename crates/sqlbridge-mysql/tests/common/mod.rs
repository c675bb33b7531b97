//! A scripted MySQL server that speaks just enough of the wire protocol to
//! drive the client end to end: the v10 greeting, the authentication
//! exchanges, and text-protocol replies to `COM_QUERY`, `COM_INIT_DB`,
//! `COM_PING` and `COM_QUIT`.

#![allow(dead_code, clippy::cast_possible_truncation)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;

use sqlbridge_core::{ConnectionOptions, Error};
use sqlbridge_mysql::auth::{self, caching_sha2, plugins};
use sqlbridge_mysql::protocol::{PacketReader, PacketStream, PacketWriter, capabilities, server_status};

/// Scramble sent in the greeting.
pub const NONCE: &[u8; 20] = b"Nq3#xv8!Lp0@Zr5&Tw2%";
/// Scramble sent with an auth switch request.
pub const SWITCH_NONCE: &[u8; 20] = b"Ha7*Jd4^Mk1(Qs9)Ub6_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Native,
    CachingSha2Fast,
    CachingSha2Full,
    /// Greets with `caching_sha2_password`, then switches to native
    SwitchToNative,
    Sha256,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub version: String,
    pub user: String,
    pub password: String,
    pub auth: Auth,
    pub deprecate_eof: bool,
    pub no_backslash_escapes: bool,
    pub databases: Vec<String>,
    /// Connections past this count are refused in the greeting
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: "8.0.36".to_string(),
            user: "app".to_string(),
            password: "secret".to_string(),
            auth: Auth::Native,
            deprecate_eof: true,
            no_backslash_escapes: false,
            databases: vec!["app".to_string()],
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Ok { affected_rows: u64, insert_id: u64 },
    Rows { columns: Vec<String>, rows: Vec<Vec<Option<String>>> },
    Error { code: u16, state: String, message: String },
    /// Close the socket without answering
    Hangup,
    /// Sleep, then send the inner reply
    Delayed { delay: Duration, reply: Box<Reply> },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok {
            affected_rows: 0,
            insert_id: 0,
        }
    }

    pub fn affected(affected_rows: u64, insert_id: u64) -> Self {
        Reply::Ok {
            affected_rows,
            insert_id,
        }
    }

    pub fn rows(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Self {
        Reply::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        }
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed {
            delay,
            reply: Box::new(reply),
        }
    }

    pub fn error(code: u16, state: &str, message: impl Into<String>) -> Self {
        Reply::Error {
            code,
            state: state.to_string(),
            message: message.into(),
        }
    }
}

/// What a client sent in its handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub capabilities: u32,
    pub collation: u8,
    pub user: String,
    pub auth_response: Vec<u8>,
    pub plugin: String,
}

#[derive(Debug, Clone, Default)]
pub struct Seen {
    pub connections: usize,
    pub handshakes: Vec<Handshake>,
    pub queries: Vec<String>,
    pub init_db: Vec<String>,
    pub pings: usize,
    pub quits: usize,
}

type Handler = dyn Fn(&str) -> Option<Reply> + Send + Sync;

struct Shared {
    config: ServerConfig,
    handler: Box<Handler>,
    key: Option<RsaPrivateKey>,
    seen: Arc<Mutex<Seen>>,
}

pub struct FakeServer {
    addr: SocketAddr,
    seen: Arc<Mutex<Seen>>,
}

impl FakeServer {
    /// Listen on an ephemeral port. `handler` answers `COM_QUERY`; `None`
    /// falls back to [`default_reply`].
    pub fn start<F>(config: ServerConfig, handler: F) -> Self
    where
        F: Fn(&str) -> Option<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake server");
        let addr = listener.local_addr().expect("fake server address");
        let seen = Arc::new(Mutex::new(Seen::default()));
        let key = matches!(config.auth, Auth::CachingSha2Full | Auth::Sha256)
            .then(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("generate RSA key"));
        let shared = Arc::new(Shared {
            config,
            handler: Box::new(handler),
            key,
            seen: Arc::clone(&seen),
        });

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let _ = serve(stream, &shared);
                });
            }
        });

        Self { addr, seen }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Options pointing at this server with the default account.
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions::new()
            .host("127.0.0.1")
            .port(self.addr.port())
            .user("app")
            .password("secret")
            .database("app")
    }

    pub fn seen(&self) -> MutexGuard<'_, Seen> {
        self.seen.lock().expect("seen lock")
    }

    pub fn queries(&self) -> Vec<String> {
        self.seen().queries.clone()
    }
}

/// Poll `check` for up to two seconds; the server records some events
/// after the client has already moved on.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Replies for everything a test does not script: session `SET`s succeed,
/// `SHOW VARIABLES` is empty, anything else is a syntax error.
pub fn default_reply(sql: &str) -> Reply {
    if sql.starts_with("SET ") {
        Reply::ok()
    } else if sql.starts_with("SHOW VARIABLES") {
        Reply::rows(&["Variable_name", "Value"], Vec::new())
    } else {
        Reply::error(
            1064,
            "42000",
            format!("You have an error in your SQL syntax near '{sql}'"),
        )
    }
}

fn serve(stream: TcpStream, shared: &Shared) -> Result<(), Error> {
    let connection = {
        let mut seen = shared.seen.lock().expect("seen lock");
        seen.connections += 1;
        seen.connections
    };
    let config = &shared.config;
    let mut stream = PacketStream::new(stream);

    if config.max_connections.is_some_and(|max| connection > max) {
        return stream.write_payload(&err_packet(1040, None, "Too many connections"));
    }

    stream.write_payload(&greeting(config, connection as u32))?;
    let response = stream.read_payload()?;
    let Some(handshake) = parse_handshake_response(&response) else {
        return stream.write_payload(&err_packet(1043, Some("08S01"), "Bad handshake"));
    };
    shared.seen.lock().expect("seen lock").handshakes.push(handshake.clone());

    if !authenticate(&mut stream, shared, &handshake)? {
        let message = format!("Access denied for user '{}'@'localhost'", handshake.user);
        return stream.write_payload(&err_packet(1045, Some("28000"), &message));
    }
    let status = status_flags(config);
    stream.write_payload(&ok_packet(0, 0, status))?;

    let deprecate_eof = handshake.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0;
    loop {
        let Ok(packet) = stream.read_payload() else {
            return Ok(());
        };
        let arg = String::from_utf8_lossy(packet.get(1..).unwrap_or_default()).into_owned();
        match packet.first() {
            Some(0x01) => {
                shared.seen.lock().expect("seen lock").quits += 1;
                return Ok(());
            }
            Some(0x02) => {
                shared.seen.lock().expect("seen lock").init_db.push(arg.clone());
                if config.databases.contains(&arg) {
                    stream.write_payload(&ok_packet(0, 0, status))?;
                } else {
                    let message = format!("Unknown database '{arg}'");
                    stream.write_payload(&err_packet(1049, Some("42000"), &message))?;
                }
            }
            Some(0x0e) => {
                shared.seen.lock().expect("seen lock").pings += 1;
                stream.write_payload(&ok_packet(0, 0, status))?;
            }
            Some(0x03) => {
                shared.seen.lock().expect("seen lock").queries.push(arg.clone());
                let mut reply = (shared.handler)(&arg).unwrap_or_else(|| default_reply(&arg));
                while let Reply::Delayed { delay, reply: inner } = reply {
                    thread::sleep(delay);
                    reply = *inner;
                }
                match reply {
                    Reply::Hangup => return Ok(()),
                    Reply::Delayed { .. } => unreachable!("delays are unwrapped above"),
                    Reply::Ok {
                        affected_rows,
                        insert_id,
                    } => stream.write_payload(&ok_packet(affected_rows, insert_id, status))?,
                    Reply::Error {
                        code,
                        state,
                        message,
                    } => stream.write_payload(&err_packet(code, Some(&state), &message))?,
                    Reply::Rows { columns, rows } => {
                        write_result_set(&mut stream, &columns, &rows, status, deprecate_eof)?;
                    }
                }
            }
            _ => stream.write_payload(&err_packet(1047, Some("08S01"), "Unknown command"))?,
        }
    }
}

fn status_flags(config: &ServerConfig) -> u16 {
    let mut status = server_status::SERVER_STATUS_AUTOCOMMIT;
    if config.no_backslash_escapes {
        status |= server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES;
    }
    status
}

fn greeting(config: &ServerConfig, connection_id: u32) -> Vec<u8> {
    let mut caps = capabilities::BASE_CLIENT_FLAGS
        | capabilities::CLIENT_CONNECT_WITH_DB
        | capabilities::CLIENT_PLUGIN_AUTH
        | capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | capabilities::CLIENT_MULTI_RESULTS;
    if config.deprecate_eof {
        caps |= capabilities::CLIENT_DEPRECATE_EOF;
    }
    let plugin = match config.auth {
        Auth::Native => plugins::MYSQL_NATIVE_PASSWORD,
        Auth::CachingSha2Fast | Auth::CachingSha2Full | Auth::SwitchToNative => {
            plugins::CACHING_SHA2_PASSWORD
        }
        Auth::Sha256 => plugins::SHA256_PASSWORD,
    };

    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_terminated(&config.version);
    w.write_u32_le(connection_id);
    w.write_bytes(&NONCE[..8]);
    w.write_u8(0);
    w.write_u16_le((caps & 0xFFFF) as u16);
    w.write_u8(255);
    w.write_u16_le(status_flags(config));
    w.write_u16_le((caps >> 16) as u16);
    w.write_u8(21);
    w.write_zeros(10);
    w.write_bytes(&NONCE[8..]);
    w.write_u8(0);
    w.write_null_terminated(plugin);
    w.into_bytes()
}

fn parse_handshake_response(payload: &[u8]) -> Option<Handshake> {
    let mut r = PacketReader::new(payload);
    let capabilities = r.read_u32_le()?;
    let _max_packet = r.read_u32_le()?;
    let collation = r.read_u8()?;
    r.skip(23);
    let user = r.read_null_string();
    let auth_response = if capabilities & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        r.read_lenenc_bytes()?.to_vec()
    } else {
        let len = r.read_u8()?;
        r.read_bytes(usize::from(len))?.to_vec()
    };
    if capabilities & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        r.read_null_string();
    }
    let plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        r.read_null_string()
    } else {
        String::new()
    };
    Some(Handshake {
        capabilities,
        collation,
        user,
        auth_response,
        plugin,
    })
}

fn authenticate(
    stream: &mut PacketStream<TcpStream>,
    shared: &Shared,
    handshake: &Handshake,
) -> Result<bool, Error> {
    let config = &shared.config;
    if handshake.user != config.user {
        return Ok(false);
    }
    let native = |nonce: &[u8], response: &[u8]| response == auth::mysql_native_password(&config.password, nonce);
    if handshake.capabilities & capabilities::CLIENT_PLUGIN_AUTH == 0 {
        return Ok(native(NONCE, &handshake.auth_response));
    }

    match config.auth {
        Auth::Native => Ok(native(NONCE, &handshake.auth_response)),
        Auth::SwitchToNative => {
            let mut w = PacketWriter::new();
            w.write_u8(0xFE);
            w.write_null_terminated(plugins::MYSQL_NATIVE_PASSWORD);
            w.write_bytes(SWITCH_NONCE);
            w.write_u8(0);
            stream.write_payload(w.as_bytes())?;
            let answer = stream.read_payload()?;
            Ok(native(SWITCH_NONCE, &answer))
        }
        Auth::CachingSha2Fast => {
            if handshake.auth_response != auth::caching_sha2_password(&config.password, NONCE) {
                return Ok(false);
            }
            stream.write_payload(&[0x01, caching_sha2::FAST_AUTH_SUCCESS])?;
            Ok(true)
        }
        Auth::CachingSha2Full => {
            stream.write_payload(&[0x01, caching_sha2::PERFORM_FULL_AUTH])?;
            if stream.read_payload()? != [caching_sha2::REQUEST_PUBLIC_KEY] {
                return Ok(false);
            }
            rsa_exchange(stream, shared)
        }
        Auth::Sha256 => {
            if handshake.auth_response != [1u8] {
                return Ok(false);
            }
            rsa_exchange(stream, shared)
        }
    }
}

/// Send the public key, then check the encrypted password.
fn rsa_exchange(stream: &mut PacketStream<TcpStream>, shared: &Shared) -> Result<bool, Error> {
    let key = shared.key.as_ref().expect("RSA key for full authentication");
    let pem = key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key");
    let mut payload = vec![0x01];
    payload.extend_from_slice(pem.as_bytes());
    stream.write_payload(&payload)?;

    let encrypted = stream.read_payload()?;
    let Ok(decrypted) = key.decrypt(Oaep::new::<Sha1>(), &encrypted) else {
        return Ok(false);
    };
    let plain: Vec<u8> = decrypted
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ NONCE[i % NONCE.len()])
        .collect();
    let mut expected = shared.config.password.as_bytes().to_vec();
    expected.push(0);
    Ok(plain == expected)
}

fn ok_packet(affected_rows: u64, insert_id: u64, status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected_rows);
    w.write_lenenc_int(insert_id);
    w.write_u16_le(status);
    w.write_u16_le(0);
    w.into_bytes()
}

fn err_packet(code: u16, state: Option<&str>, message: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    if let Some(state) = state {
        w.write_u8(b'#');
        w.write_bytes(state.as_bytes());
    }
    w.write_bytes(message.as_bytes());
    w.into_bytes()
}

fn eof_packet(status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFE);
    w.write_u16_le(0);
    w.write_u16_le(status);
    w.into_bytes()
}

fn column_definition(name: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_lenenc_bytes(b"def");
    w.write_lenenc_bytes(b"app");
    w.write_lenenc_bytes(b"t");
    w.write_lenenc_bytes(b"t");
    w.write_lenenc_bytes(name.as_bytes());
    w.write_lenenc_bytes(name.as_bytes());
    w.write_lenenc_int(0x0c);
    w.write_u16_le(33);
    w.write_u32_le(1024);
    // VAR_STRING
    w.write_u8(0xFD);
    w.write_u16_le(0);
    w.write_u8(0);
    w.write_zeros(2);
    w.into_bytes()
}

fn write_result_set(
    stream: &mut PacketStream<TcpStream>,
    columns: &[String],
    rows: &[Vec<Option<String>>],
    status: u16,
    deprecate_eof: bool,
) -> Result<(), Error> {
    let mut w = PacketWriter::new();
    w.write_lenenc_int(columns.len() as u64);
    stream.write_payload(w.as_bytes())?;
    for column in columns {
        stream.write_payload(&column_definition(column))?;
    }
    if !deprecate_eof {
        stream.write_payload(&eof_packet(status))?;
    }

    for row in rows {
        let mut w = PacketWriter::new();
        for value in row {
            match value {
                Some(text) => w.write_lenenc_bytes(text.as_bytes()),
                None => w.write_u8(0xFB),
            }
        }
        stream.write_payload(w.as_bytes())?;
    }

    if deprecate_eof {
        let mut terminator = ok_packet(0, 0, status);
        terminator[0] = 0xFE;
        stream.write_payload(&terminator)
    } else {
        stream.write_payload(&eof_packet(status))
    }
}
