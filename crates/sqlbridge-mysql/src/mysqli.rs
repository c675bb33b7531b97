//! The modern MySQL client driver.

use std::time::Duration;

use sqlbridge_core::backend::Backend;
use sqlbridge_core::capability::{DriverInfo, Environment};
use sqlbridge_core::options::ConnectionOptions;

use crate::config::{HandshakeProfile, MySqlConfig};
use crate::connection::MySqlConnection;

/// Client extension name the driver depends on.
pub const EXTENSION: &str = "mysqli";

/// Plugin authentication, deprecate-EOF framing and a utf8mb4 handshake.
#[derive(Debug, Clone, Default)]
pub struct MySqli {
    io_timeout: Option<Duration>,
}

impl MySqli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every read and write on the link. Without it the link uses the
    /// options' `connect_timeout`.
    #[must_use]
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }
}

impl Backend for MySqli {
    type Connection = MySqlConnection;

    const INFO: DriverInfo = DriverInfo {
        name: "mysqli",
        server_type: "mysql",
        minimum_version: "5.0.4",
    };

    fn is_supported(env: &Environment) -> bool {
        env.has_extension(EXTENSION)
    }

    fn environment(&self) -> Environment {
        crate::build_environment()
    }

    fn open(&mut self, options: &ConnectionOptions) -> sqlbridge_core::Result<MySqlConnection> {
        let mut config = MySqlConfig::from_options(options, HandshakeProfile::Modern);
        if let Some(timeout) = self.io_timeout {
            config = config.io_timeout(timeout);
        }
        MySqlConnection::connect(config)
    }
}
