//! Byte transports: TCP or a Unix domain socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use sqlbridge_core::error::{ConnectionError, ConnectionErrorKind, Error};
use sqlbridge_core::host::Endpoint;

use crate::config::MySqlConfig;

#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Open the endpoint named by `config`.
    pub fn open(config: &MySqlConfig) -> Result<Self, Error> {
        let transport = match &config.endpoint {
            Endpoint::Port(port) => Self::tcp(config, *port)?,
            Endpoint::Socket(path) => Self::unix(config, path)?,
        };
        transport
            .set_timeouts(config.io_timeout)
            .map_err(|e| failed(config, ConnectionErrorKind::Connect, e))?;
        Ok(transport)
    }

    fn tcp(config: &MySqlConfig, port: u16) -> Result<Self, Error> {
        let host = tcp_host(&config.host);
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| failed(config, ConnectionErrorKind::Connect, e))?;

        let mut last = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok(Transport::Tcp(stream));
                }
                Err(e) => last = e,
            }
        }
        let kind = if last.kind() == io::ErrorKind::ConnectionRefused {
            ConnectionErrorKind::Refused
        } else {
            ConnectionErrorKind::Connect
        };
        Err(failed(config, kind, last))
    }

    #[cfg(unix)]
    fn unix(config: &MySqlConfig, path: &str) -> Result<Self, Error> {
        UnixStream::connect(path)
            .map(Transport::Unix)
            .map_err(|e| failed(config, ConnectionErrorKind::Connect, e))
    }

    #[cfg(not(unix))]
    fn unix(_config: &MySqlConfig, path: &str) -> Result<Self, Error> {
        Err(Error::Config(sqlbridge_core::error::ConfigError {
            message: format!("socket '{}' cannot be used on this platform", path),
            source: None,
        }))
    }

    /// Unix sockets count as a secure channel for cleartext passwords.
    pub fn is_secure(&self) -> bool {
        match self {
            Transport::Tcp(_) => false,
            #[cfg(unix)]
            Transport::Unix(_) => true,
        }
    }

    fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            #[cfg(unix)]
            Transport::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = match self {
            Transport::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Transport::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Transport::Unix(s) => s.flush(),
        }
    }
}

/// Host name as the resolver wants it: no URI scheme, no IPv6 brackets.
fn tcp_host(host: &str) -> &str {
    let host = host.split_once("://").map_or(host, |(_, rest)| rest);
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn failed(config: &MySqlConfig, kind: ConnectionErrorKind, err: io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: format!("Could not connect to MySQL server at {}: {}", config.display_addr(), err),
        source: Some(Box::new(err)),
    })
}
