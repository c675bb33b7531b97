//! The seam between the generic driver handle and a backend family.
//!
//! A backend knows how to open a physical link and what it needs from the
//! environment; the link itself runs statements and escapes text. Everything
//! else (lazy connect, session setup, retry, escaping fast paths,
//! introspection) lives once in [`crate::driver::DriverHandle`].

use crate::capability::{DriverInfo, Environment};
use crate::cursor::Cursor;
use crate::error::Result;
use crate::options::ConnectionOptions;

/// A live physical connection.
pub trait BackendConnection {
    /// Run one statement and buffer its result.
    ///
    /// Server errors come back as [`crate::Error::Query`] with the server's
    /// error number; transport failures as `Io` or `Connection`.
    fn query(&mut self, sql: &str) -> Result<Cursor>;

    /// Lightweight liveness probe. Never errors.
    fn ping(&mut self) -> bool;

    /// Close the link, best effort.
    fn close(self);

    /// Escape `text` for use inside a quoted string literal, honouring the
    /// session's current SQL mode.
    fn escape_string(&self, text: &str) -> String;

    /// Make `database` the session default.
    fn select_db(&mut self, database: &str) -> Result<()>;

    /// Switch the session character set.
    fn set_charset(&mut self, charset: &str) -> Result<()>;

    /// Version string reported by the server at handshake.
    fn server_version(&self) -> &str;

    /// Rows changed by the last statement.
    fn affected_rows(&self) -> u64;

    /// Auto-increment id generated by the last statement.
    fn insert_id(&self) -> u64;
}

/// A backend family variant.
pub trait Backend {
    type Connection: BackendConnection;

    /// Name, server family and minimum server version.
    const INFO: DriverInfo;

    /// Whether this variant can run in `env`.
    fn is_supported(env: &Environment) -> bool;

    /// The environment this build provides.
    fn environment(&self) -> Environment {
        Environment::default()
    }

    /// Open a physical link. Failures carry the backend diagnostic.
    fn open(&mut self, options: &ConnectionOptions) -> Result<Self::Connection>;
}
