//! Error types for driver operations.

use std::fmt;

/// Client error code reported when the server has gone away.
pub const CR_SERVER_GONE_ERROR: u16 = 2006;
/// Client error code reported when the connection was lost mid-query.
pub const CR_SERVER_LOST: u16 = 2013;

/// The primary error type for all driver operations.
#[derive(Debug)]
pub enum Error {
    /// The backend client is not available in this environment
    Unsupported(UnsupportedError),
    /// Connection-related errors (connect, select, authentication)
    Connection(ConnectionError),
    /// Statement execution errors
    Query(QueryError),
    /// Malformed or unexpected wire data
    Protocol(ProtocolError),
    /// Row value conversion errors
    Type(TypeError),
    /// Options bag errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct UnsupportedError {
    /// Name of the driver that refused to run
    pub driver: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
    /// Could not select the configured database
    Database,
}

/// A statement that failed after the permitted reconnect attempt.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// The rendered statement text
    pub sql: Option<String>,
    /// Backend error number (0 when unknown)
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Deadlock or lock wait timeout
    Deadlock,
    /// The connection dropped while the statement ran
    ConnectionLost,
    /// Other database error
    Database,
}

impl QueryErrorKind {
    /// Classify a MySQL server error number.
    pub fn from_code(code: u16) -> Self {
        match code {
            1062 | 1451 | 1452 | 1216 | 1217 => QueryErrorKind::Constraint,
            1046 | 1049 | 1051 | 1054 | 1146 => QueryErrorKind::NotFound,
            1044 | 1045 | 1142 | 1143 => QueryErrorKind::Permission,
            1205 | 1213 => QueryErrorKind::Deadlock,
            1064 | 1149 => QueryErrorKind::Syntax,
            CR_SERVER_GONE_ERROR | CR_SERVER_LOST => QueryErrorKind::ConnectionLost,
            _ => QueryErrorKind::Database,
        }
    }
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Disconnected
                    | ConnectionErrorKind::Refused
            ),
            Error::Query(q) => q.kind == QueryErrorKind::ConnectionLost,
            Error::Protocol(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Backend error number and message, as the executor records them.
    ///
    /// Transport failures without a server error packet report
    /// [`CR_SERVER_GONE_ERROR`].
    pub fn code_and_message(&self) -> (u16, String) {
        match self {
            Error::Query(q) => (q.code, q.message.clone()),
            Error::Connection(c) if c.kind == ConnectionErrorKind::Disconnected => {
                (CR_SERVER_GONE_ERROR, c.message.clone())
            }
            Error::Io(e) => (CR_SERVER_GONE_ERROR, e.to_string()),
            other => (0, other.to_string()),
        }
    }

    /// Get SQLSTATE if available (e.g., "42S02" for a missing table)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unsupported(e) => write!(f, "Unsupported driver '{}': {}", e.driver, e.message),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, " SQLSTATE {}", sqlstate)?;
        }
        if let Some(sql) = &self.sql {
            write!(f, " SQL={}", sql)?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<UnsupportedError> for Error {
    fn from(err: UnsupportedError) -> Self {
        Error::Unsupported(err)
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
