//! The legacy MySQL client driver.
//!
//! Speaks a plain protocol 4.1 handshake with `mysql_native_password` and
//! EOF-framed result sets. Its client library was removed from runtime
//! major 2 onwards, so it only runs in older environments.

use sqlbridge_core::backend::Backend;
use sqlbridge_core::capability::{DriverInfo, Environment};
use sqlbridge_core::options::ConnectionOptions;

use crate::config::{HandshakeProfile, MySqlConfig};
use crate::connection::MySqlConnection;

pub const EXTENSION: &str = "mysql";

/// First runtime major without the legacy client library.
pub const REMOVED_IN_RUNTIME_MAJOR: u32 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyMySql;

impl Backend for LegacyMySql {
    type Connection = MySqlConnection;

    const INFO: DriverInfo = DriverInfo {
        name: "mysql",
        server_type: "mysql",
        minimum_version: "5.0.4",
    };

    fn is_supported(env: &Environment) -> bool {
        env.runtime_major() < REMOVED_IN_RUNTIME_MAJOR && env.has_extension(EXTENSION)
    }

    fn environment(&self) -> Environment {
        crate::build_environment()
    }

    fn open(&mut self, options: &ConnectionOptions) -> sqlbridge_core::Result<MySqlConnection> {
        MySqlConnection::connect(MySqlConfig::from_options(options, HandshakeProfile::Legacy))
    }
}
