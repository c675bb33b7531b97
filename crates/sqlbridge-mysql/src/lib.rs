//! MySQL-family drivers for sqlbridge.
//!
//! This crate implements the MySQL client/server protocol from scratch over
//! blocking std sockets and plugs it into [`sqlbridge_core`] as two backend
//! variants:
//!
//! - [`MySqli`]: plugin authentication (`caching_sha2_password` with RSA full
//!   authentication, `sha256_password`, `mysql_native_password`), deprecate-EOF
//!   framing, utf8mb4 handshake
//! - [`LegacyMySql`]: protocol 4.1 with `mysql_native_password` only, for
//!   runtimes that still ship the legacy client
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlbridge_core::{ConnectionOptions, Database, PendingStatement};
//! use sqlbridge_mysql::MySqliDriver;
//!
//! let options = ConnectionOptions::new()
//!     .host("localhost:3306")
//!     .user("app")
//!     .password("secret")
//!     .database("app");
//! let mut db = MySqliDriver::new(sqlbridge_mysql::MySqli::new(), options);
//!
//! let title: Option<String> = db
//!     .load_result(PendingStatement::new("SELECT title FROM #__content WHERE id = 1"))?
//!     .and_then(|v| v.to_text());
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod escape;
pub mod legacy;
pub mod mysqli;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod types;

use sqlbridge_core::capability::Environment;
use sqlbridge_core::driver::DriverHandle;

pub use config::{HandshakeProfile, MySqlConfig};
pub use connection::{MySqlConnection, ServerHandshake};
pub use legacy::LegacyMySql;
pub use mysqli::MySqli;
pub use registry::{registry, registry_for};

/// Driver handle over the modern client.
pub type MySqliDriver = DriverHandle<MySqli>;

/// Driver handle over the legacy client.
pub type LegacyMySqlDriver = DriverHandle<LegacyMySql>;

/// The environment this build provides: the current runtime major, plus a
/// client extension for every enabled driver feature.
pub fn build_environment() -> Environment {
    let mut env = Environment::default();
    if cfg!(feature = "mysqli") {
        env = env.with_extension(mysqli::EXTENSION);
    }
    if cfg!(feature = "legacy") {
        env = env.with_extension(legacy::EXTENSION);
    }
    env
}
