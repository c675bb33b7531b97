//! Physical link configuration.
//!
//! A [`MySqlConfig`] is derived from the backend-neutral
//! [`ConnectionOptions`] plus the [`HandshakeProfile`] of the driver variant
//! opening the link.

use std::time::Duration;

use sqlbridge_core::host::Endpoint;
use sqlbridge_core::options::ConnectionOptions;

use crate::protocol::{capabilities, charset};

/// How the client negotiates the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeProfile {
    /// Plugin authentication, deprecate-EOF framing, utf8mb4 collation.
    #[default]
    Modern,
    /// Protocol 4.1 only: `mysql_native_password`, EOF framing,
    /// `utf8_general_ci`.
    Legacy,
}

impl HandshakeProfile {
    pub const fn client_flags(self) -> u32 {
        match self {
            HandshakeProfile::Modern => {
                capabilities::BASE_CLIENT_FLAGS | capabilities::MODERN_CLIENT_FLAGS
            }
            HandshakeProfile::Legacy => capabilities::BASE_CLIENT_FLAGS,
        }
    }

    pub const fn collation(self) -> u8 {
        match self {
            HandshakeProfile::Modern => charset::UTF8MB4_GENERAL_CI,
            HandshakeProfile::Legacy => charset::UTF8_GENERAL_CI,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub host: String,
    pub endpoint: Endpoint,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
    /// Read/write timeout on the socket, applied before the greeting is
    /// read. Defaults to `connect_timeout`; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    pub profile: HandshakeProfile,
    pub max_packet_size: u32,
}

impl MySqlConfig {
    pub fn from_options(options: &ConnectionOptions, profile: HandshakeProfile) -> Self {
        Self {
            host: options.host.clone(),
            endpoint: options.endpoint.clone(),
            user: options.user.clone(),
            password: options.password.clone(),
            connect_timeout: options.connect_timeout,
            io_timeout: Some(options.connect_timeout),
            profile,
            max_packet_size: 16 * 1024 * 1024,
        }
    }

    #[must_use]
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Client capability flags to request, before masking with the server's.
    pub fn capability_flags(&self) -> u32 {
        self.profile.client_flags()
    }

    /// `host:port` or the socket path, for diagnostics.
    pub fn display_addr(&self) -> String {
        match &self.endpoint {
            Endpoint::Port(port) => format!("{}:{}", self.host, port),
            Endpoint::Socket(path) => path.clone(),
        }
    }
}
