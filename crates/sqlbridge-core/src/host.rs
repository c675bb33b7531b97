//! Host string parsing shared by every MySQL-family backend.
//!
//! A configured host may carry its own port or socket path:
//!
//! ```text
//! 127.0.0.1:3307          IPv4 with port
//! [fe80::1%eth0]:3307     bracketed IPv6 with port
//! db.example.com:3307     named host (an optional `scheme://` prefix is kept)
//! localhost:/tmp/my.sock  named host with a socket path
//! :3307                   port only, host becomes "localhost"
//! ```
//!
//! Anything else (a naked IPv6 literal, for instance) is passed through
//! unchanged. Parsing never fails.

use regex::Regex;
use std::sync::OnceLock;

/// Well-known MySQL port.
pub const DEFAULT_PORT: u16 = 3306;

/// Host used when none is configured, or when only `:port` is given.
pub const DEFAULT_HOST: &str = "localhost";

/// Where to reach the server once the host string has been split.
///
/// Exactly one of port or socket is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP port
    Port(u16),
    /// Unix domain socket path (or named pipe)
    Socket(String),
}

impl Endpoint {
    /// Classify a port token: a value that parses as a port number is a
    /// port, anything else is a socket path.
    pub fn from_token(token: &str) -> Self {
        match token.trim().parse::<u16>() {
            Ok(port) => Endpoint::Port(port),
            Err(_) => Endpoint::Socket(token.to_string()),
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Port(p) => Some(*p),
            Endpoint::Socket(_) => None,
        }
    }

    pub fn socket(&self) -> Option<&str> {
        match self {
            Endpoint::Port(_) => None,
            Endpoint::Socket(s) => Some(s),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Port(DEFAULT_PORT)
    }
}

/// A host string split into host name and endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub host: String,
    pub endpoint: Endpoint,
}

const IPV4: &str = r"^(?P<host>((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?))(:(?P<port>.+))?$";
const IPV6_BRACKETED: &str = r"^(?P<host>\[.*\])(:(?P<port>.+))?$";
const NAMED: &str = r"(?i)^(?P<host>(\w+:/{2,3})?[a-z0-9.\-]+)(:(?P<port>[^:]+))?$";
const PORT_ONLY: &str = r"^:(?P<port>[^:]+)$";

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn ipv4() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, IPV4)
}

fn ipv6_bracketed() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, IPV6_BRACKETED)
}

fn named() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, NAMED)
}

fn port_only() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, PORT_ONLY)
}

/// Split `raw` into host and endpoint.
///
/// `fallback` is the port token used when the host string carries none
/// (the configured port, the configured socket, or [`DEFAULT_PORT`]).
/// An embedded port of `0` counts as absent, except in the `:port` form.
pub fn parse_host(raw: &str, fallback: &str) -> HostSpec {
    let mut host = raw.to_string();
    let mut token = fallback.to_string();

    let with_port = [ipv4(), ipv6_bracketed(), named()];
    let matched = with_port
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(raw));

    if let Some(caps) = matched {
        if let Some(h) = caps.name("host") {
            host = h.as_str().to_string();
        }
        let embedded = caps.name("port").map_or("", |m| m.as_str());
        if !embedded.is_empty() && embedded != "0" {
            token = embedded.to_string();
        }
    } else if let Some(caps) = port_only().and_then(|re| re.captures(raw)) {
        host = DEFAULT_HOST.to_string();
        if let Some(p) = caps.name("port") {
            token = p.as_str().to_string();
        }
    }

    HostSpec {
        host,
        endpoint: Endpoint::from_token(&token),
    }
}
