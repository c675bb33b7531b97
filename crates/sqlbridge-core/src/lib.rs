//! Core types and traits for sqlbridge.
//!
//! This crate holds everything that is the same for every backend family:
//!
//! - `ConnectionOptions` resolver with host/port/socket splitting
//! - `Database` trait, the uniform contract handed to applications
//! - `DriverHandle`, which implements `Database` once over any `Backend`
//!   (lazy connect, session setup, escaping, reconnect-and-replay, introspection)
//! - `DriverRegistry` for capability probing and driver selection
//! - `Value`, `Row` and `Cursor` for buffered results

pub mod backend;
pub mod capability;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod host;
pub mod introspect;
pub mod log;
pub mod options;
pub mod row;
pub mod statement;
pub mod value;

pub use backend::{Backend, BackendConnection};
pub use capability::{CURRENT_RUNTIME_MAJOR, DriverInfo, DriverRegistry, Environment};
pub use cursor::Cursor;
pub use driver::{ConnectionState, Database, DisconnectHook, DriverHandle, NAME_QUOTE, NULL_DATE};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, TypeError, UnsupportedError,
};
pub use host::{Endpoint, HostSpec, parse_host};
pub use introspect::{ColumnMetadata, TableColumns, Tables};
pub use log::{ExecutionLog, LogEntry};
pub use options::{ConnectionOptions, RawOptions};
pub use row::{ColumnInfo, FromValue, Row};
pub use statement::{BuiltQuery, PendingStatement, Statement};
pub use value::Value;
