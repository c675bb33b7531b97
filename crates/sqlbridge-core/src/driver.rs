//! The driver handle: connector state machine, escaper, executor and
//! metadata introspector, written once over any [`Backend`].
//!
//! A handle connects lazily. Every operation that needs the server opens the
//! link on first use and runs the fixed session setup. When a statement fails
//! and the link turns out to be dead, the handle reconnects and replays the
//! statement exactly once before giving up.

use std::fmt;

use crate::backend::{Backend, BackendConnection};
use crate::capability::{DriverInfo, Environment};
use crate::cursor::Cursor;
use crate::error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result, TypeError,
    UnsupportedError,
};
use crate::introspect::{self, ColumnMetadata, TableColumns, Tables};
use crate::log::ExecutionLog;
use crate::options::ConnectionOptions;
use crate::row::Row;
use crate::statement::{self, PendingStatement};
use crate::value::Value;

/// Callback run by [`Database::disconnect`] while the link is still open.
pub type DisconnectHook = Box<dyn FnMut(&mut dyn Database)>;

/// Identifier quote character for the MySQL family.
pub const NAME_QUOTE: char = '`';

/// Zero date as the MySQL family spells it.
pub const NULL_DATE: &str = "0000-00-00 00:00:00";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Uniform database contract, object safe so a selection layer can hand out
/// `Box<dyn Database>` and hooks can receive `&mut dyn Database`.
pub trait Database {
    /// Name, server family and minimum version of the backend.
    fn info(&self) -> DriverInfo;

    /// Whether the backend can run in the handle's environment.
    fn is_supported(&self) -> bool;

    fn options(&self) -> &ConnectionOptions;

    fn state(&self) -> ConnectionState;

    /// Open the link and run session setup. No-op when already open.
    fn connect(&mut self) -> Result<()>;

    /// Run the disconnect hooks, then close the link. Idempotent.
    fn disconnect(&mut self);

    /// Whether a link exists and answers a ping. Never errors.
    fn connected(&mut self) -> bool;

    /// Make `database` the session default. Returns `false` for an empty
    /// name without touching the server.
    fn select(&mut self, database: &str) -> Result<bool>;

    fn add_disconnect_hook(&mut self, hook: DisconnectHook);

    /// Toggle debug mode. Turning it on starts a fresh execution log.
    fn set_debug(&mut self, debug: bool);

    fn execution_log(&self) -> Option<&ExecutionLog>;

    /// Escape a value for inclusion in SQL text.
    ///
    /// Numbers render without a connection; text goes through the backend's
    /// native escaping. `extra` also escapes the `LIKE` wildcards `%` and `_`.
    fn escape(&mut self, value: &Value, extra: bool) -> Result<String>;

    /// Escape `text` and wrap it in single quotes.
    fn quote(&mut self, text: &str) -> Result<String> {
        Ok(format!("'{}'", self.escape(&Value::from(text), false)?))
    }

    /// Quote an identifier, part by part.
    fn quote_name(&self, name: &str) -> String {
        statement::quote_identifier(name, self.name_quote())
    }

    fn name_quote(&self) -> char {
        NAME_QUOTE
    }

    fn null_date(&self) -> &str {
        NULL_DATE
    }

    /// Table prefix substituted for `#__`.
    fn prefix(&self) -> &str;

    /// Run a statement, reconnecting and replaying once if the link died.
    fn execute(&mut self, statement: PendingStatement) -> Result<&mut Cursor>;

    /// First column of the first row.
    fn load_result(&mut self, statement: PendingStatement) -> Result<Option<Value>> {
        let cursor = self.execute(statement)?;
        Ok(cursor.fetch_row().and_then(|row| row.get(0).cloned()))
    }

    /// First row.
    fn load_row(&mut self, statement: PendingStatement) -> Result<Option<Row>> {
        let cursor = self.execute(statement)?;
        Ok(cursor.fetch_row().cloned())
    }

    fn load_rows(&mut self, statement: PendingStatement) -> Result<Vec<Row>> {
        let cursor = self.execute(statement)?;
        Ok(cursor.fetch_all().to_vec())
    }

    /// First column of every row.
    fn load_column(&mut self, statement: PendingStatement) -> Result<Vec<Value>> {
        let cursor = self.execute(statement)?;
        Ok(cursor
            .fetch_all()
            .iter()
            .filter_map(|row| row.get(0).cloned())
            .collect())
    }

    fn get_affected_rows(&mut self) -> Result<u64>;

    /// Rows in `cursor`, or in the last result when `None`.
    fn get_num_rows(&self, cursor: Option<&Cursor>) -> usize;

    fn insert_id(&mut self) -> Result<u64>;

    /// Server version string.
    fn get_version(&mut self) -> Result<String>;

    /// Statements executed by this handle, replays included.
    fn get_count(&self) -> u64;

    fn get_error_num(&self) -> u16;

    fn get_error_msg(&self) -> &str;

    /// Whether the server meets the backend's minimum version.
    fn is_min_version(&mut self) -> Result<bool> {
        let minimum = self.info().minimum_version;
        let version = self.get_version()?;
        Ok(introspect::compare_versions(&version, minimum) != std::cmp::Ordering::Less)
    }

    /// Whether the session character set is `utf8mb4`.
    fn has_utf8mb4_support(&self) -> bool;

    /// Whether the session runs a UTF-8 character set at all.
    fn has_utf_support(&self) -> bool;

    /// Whether the server version is new enough for `utf8mb4`.
    fn server_claims_utf8mb4_support(&mut self) -> Result<bool> {
        let version = self.get_version()?;
        Ok(introspect::server_claims_utf8mb4(&version))
    }

    /// Default collation of the selected database.
    fn get_collation(&mut self) -> Result<Option<String>> {
        variable_value(self, r#"SHOW VARIABLES LIKE "collation_database""#)
    }

    /// Collation of the connection.
    fn get_connection_collation(&mut self) -> Result<Option<String>> {
        variable_value(self, r#"SHOW VARIABLES LIKE "collation_connection""#)
    }

    /// Columns of `table`; bare types when `type_only`.
    fn get_table_columns(&mut self, table: &str, type_only: bool) -> Result<TableColumns> {
        let escaped = self.escape(&Value::from(table), false)?;
        let sql = format!("SHOW FULL COLUMNS FROM {}", self.quote_name(&escaped));
        let rows = self.load_rows(sql.into())?;
        if type_only {
            let mut types = Vec::with_capacity(rows.len());
            for row in &rows {
                let field: String = row.get_named("Field")?;
                let ty: String = row.get_named("Type")?;
                types.push((field, introspect::strip_type_precision(&ty)));
            }
            Ok(TableColumns::Types(types))
        } else {
            rows.iter()
                .map(ColumnMetadata::from_row)
                .collect::<Result<Vec<_>>>()
                .map(TableColumns::Full)
        }
    }

    /// `CREATE TABLE` statement of each table, in the order given.
    fn get_table_create(&mut self, tables: Tables) -> Result<Vec<(String, String)>> {
        let mut result = Vec::new();
        for table in tables.iter() {
            let escaped = self.escape(&Value::from(table), false)?;
            let sql = format!("SHOW CREATE TABLE {}", self.quote_name(&escaped));
            let ddl = match self.load_row(sql.into())? {
                Some(row) => row.get_as::<String>(1)?,
                None => String::new(),
            };
            result.push((table.to_string(), ddl));
        }
        Ok(result)
    }

    /// Index rows of `table` as `SHOW KEYS` reports them.
    fn get_table_keys(&mut self, table: &str) -> Result<Vec<Row>> {
        let sql = format!("SHOW KEYS FROM {}", self.quote_name(table));
        self.load_rows(sql.into())
    }

    /// Tables of the selected database.
    fn get_table_list(&mut self) -> Result<Vec<String>> {
        self.load_column("SHOW TABLES".into())?
            .into_iter()
            .map(|v| {
                v.to_text().ok_or_else(|| {
                    Error::Type(TypeError {
                        expected: "String",
                        actual: v.type_name().to_string(),
                        column: None,
                    })
                })
            })
            .collect()
    }

    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<&mut dyn Database>;

    fn rename_table(&mut self, old: &str, new: &str) -> Result<&mut dyn Database>;
}

fn variable_value<D: Database + ?Sized>(db: &mut D, sql: &str) -> Result<Option<String>> {
    Ok(db
        .load_row(sql.into())?
        .and_then(|row| row.get_by_name("Value").and_then(Value::to_text)))
}

/// A database handle over backend `B`.
pub struct DriverHandle<B: Backend> {
    backend: B,
    options: ConnectionOptions,
    environment: Environment,
    connection: Option<B::Connection>,
    state: ConnectionState,
    count: u64,
    error_num: u16,
    error_msg: String,
    utf8mb4: bool,
    utf: bool,
    hooks: Vec<DisconnectHook>,
    log: Option<ExecutionLog>,
    cursor: Cursor,
}

impl<B: Backend> fmt::Debug for DriverHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("driver", &B::INFO.name)
            .field("host", &self.options.host)
            .field("state", &self.state)
            .field("count", &self.count)
            .field("error_num", &self.error_num)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> DriverHandle<B> {
    /// Create a handle. Nothing connects until first use.
    pub fn new(backend: B, options: ConnectionOptions) -> Self {
        let environment = backend.environment();
        let log = options.debug.then(ExecutionLog::new);
        Self {
            backend,
            options,
            environment,
            connection: None,
            state: ConnectionState::Disconnected,
            count: 0,
            error_num: 0,
            error_msg: String::new(),
            utf8mb4: false,
            utf: false,
            hooks: Vec::new(),
            log,
            cursor: Cursor::default(),
        }
    }

    /// Probe capabilities against `environment` instead of the build's.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn session_setup(&mut self, conn: &mut B::Connection) -> Result<()> {
        if let Err(e) = conn.query("SET @@SESSION.sql_mode = '';") {
            tracing::warn!(error = %e, "Could not relax sql_mode");
        }

        if self.options.select && !self.options.database.is_empty() {
            conn.select_db(&self.options.database)
                .map_err(|e| select_failed(&self.options.database, e))?;
        }

        self.utf8mb4 = introspect::server_claims_utf8mb4(conn.server_version());
        self.utf = self.apply_charset(conn);

        if self.options.debug {
            if query_cache_enabled(conn) {
                if let Err(e) = conn.query("SET query_cache_type = 0;") {
                    tracing::warn!(error = %e, "Could not disable query cache");
                }
            }
            if profiling_available(conn) {
                if let Err(e) = conn.query("SET profiling_history_size = 100, profiling = 1;") {
                    tracing::warn!(error = %e, "Could not enable profiling");
                }
            }
        }
        Ok(())
    }

    fn apply_charset(&mut self, conn: &mut B::Connection) -> bool {
        if self.utf8mb4 {
            match conn.set_charset("utf8mb4") {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(error = %e, "Server rejected utf8mb4, falling back to utf8");
                    self.utf8mb4 = false;
                }
            }
        }
        conn.set_charset("utf8").is_ok()
    }

    /// Drop a dead link without running hooks.
    fn discard_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.state = ConnectionState::Disconnected;
    }

    fn attempt(&mut self, sql: &str) -> Result<Cursor> {
        self.count += 1;
        self.error_num = 0;
        self.error_msg.clear();

        let entry = match self.log.as_mut() {
            Some(log) if self.options.debug => {
                tracing::debug!(target: "databasequery", sql = %sql, "Executing statement");
                Some(log.start(sql))
            }
            _ => None,
        };

        let result = match self.connection.as_mut() {
            Some(conn) => conn.query(sql),
            None => Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "no connection to the database server".to_string(),
                source: None,
            })),
        };

        if let (Some(log), Some(index)) = (self.log.as_mut(), entry) {
            log.finish(index);
        }
        result
    }

    fn guard_connection(&self, sql: &str) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        tracing::error!(
            target: "database",
            code = self.error_num,
            message = %self.error_msg,
            "Database query failed"
        );
        Err(Error::Query(QueryError {
            kind: QueryErrorKind::ConnectionLost,
            sql: Some(sql.to_string()),
            code: self.error_num,
            sqlstate: None,
            message: self.error_msg.clone(),
            source: None,
        }))
    }

    /// Record `failure` as the handle's error state and turn it into the
    /// error raised to the caller, with `later` attached as its source.
    fn fail(&mut self, sql: &str, failure: Error, later: Option<Error>) -> Error {
        let (code, message) = failure.code_and_message();
        self.error_num = code;
        self.error_msg.clone_from(&message);
        tracing::error!(
            target: "database",
            code,
            message = %message,
            sql = %sql,
            "Database query failed"
        );

        let kind = match &failure {
            Error::Query(q) => q.kind,
            _ => QueryErrorKind::ConnectionLost,
        };
        let sqlstate = failure.sqlstate().map(str::to_string);
        let source: Option<Box<dyn std::error::Error + Send + Sync>> = match (later, failure) {
            (Some(later), _) => Some(Box::new(later)),
            (None, Error::Query(q)) => q.source,
            (None, other) => Some(Box::new(other)),
        };
        Error::Query(QueryError {
            kind,
            sql: Some(sql.to_string()),
            code,
            sqlstate,
            message,
            source,
        })
    }

    fn store(&mut self, cursor: Cursor) -> &mut Cursor {
        self.cursor = cursor;
        &mut self.cursor
    }

    fn connection_mut(&mut self) -> Result<&mut B::Connection> {
        self.connect()?;
        self.connection.as_mut().ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "no connection to the database server".to_string(),
                source: None,
            })
        })
    }
}

fn select_failed(database: &str, cause: Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Database,
        message: format!("Could not connect to database '{}': {}", database, cause),
        source: Some(Box::new(cause)),
    })
}

fn query_cache_enabled<C: BackendConnection>(conn: &mut C) -> bool {
    conn.query("SHOW VARIABLES LIKE 'query_cache_type'")
        .ok()
        .and_then(|mut cursor| {
            cursor
                .fetch_row()
                .and_then(|row| row.get_by_name("Value").and_then(Value::to_text))
        })
        .is_some_and(|value| value.eq_ignore_ascii_case("ON"))
}

fn profiling_available<C: BackendConnection>(conn: &mut C) -> bool {
    conn.query("SHOW VARIABLES LIKE 'have_profiling'")
        .is_ok_and(|cursor| cursor.num_rows() > 0)
}

/// Backslash-escape the `LIKE` wildcards.
fn escape_wildcards(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl<B: Backend> Database for DriverHandle<B> {
    fn info(&self) -> DriverInfo {
        B::INFO
    }

    fn is_supported(&self) -> bool {
        B::is_supported(&self.environment)
    }

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    #[tracing::instrument(level = "debug", skip(self), fields(driver = B::INFO.name, host = %self.options.host))]
    fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        if !B::is_supported(&self.environment) {
            return Err(Error::Unsupported(UnsupportedError {
                driver: B::INFO.name,
                message: format!(
                    "make sure the {} client is installed and enabled",
                    B::INFO.name
                ),
            }));
        }

        self.state = ConnectionState::Connecting;
        let mut conn = match self.backend.open(&self.options) {
            Ok(conn) => conn,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                tracing::debug!(error = %e, "Connection attempt failed");
                return Err(match e {
                    Error::Connection(_) | Error::Unsupported(_) => e,
                    other => Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Connect,
                        message: format!("Could not connect to MySQL server: {}", other),
                        source: Some(Box::new(other)),
                    }),
                });
            }
        };

        if let Err(e) = self.session_setup(&mut conn) {
            conn.close();
            self.state = ConnectionState::Disconnected;
            return Err(e);
        }

        tracing::debug!(
            version = conn.server_version(),
            utf8mb4 = self.utf8mb4,
            "Connected"
        );
        self.connection = Some(conn);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connection.is_some() {
            let mut hooks = std::mem::take(&mut self.hooks);
            for hook in &mut hooks {
                hook(&mut *self);
            }
            hooks.append(&mut self.hooks);
            self.hooks = hooks;

            if let Some(conn) = self.connection.take() {
                conn.close();
            }
            tracing::debug!(driver = B::INFO.name, "Disconnected");
        }
        self.connection = None;
        self.state = ConnectionState::Disconnected;
    }

    fn connected(&mut self) -> bool {
        self.connection.as_mut().is_some_and(|conn| conn.ping())
    }

    fn select(&mut self, database: &str) -> Result<bool> {
        self.connect()?;
        if database.is_empty() {
            return Ok(false);
        }
        let conn = self.connection_mut()?;
        conn.select_db(database)
            .map_err(|e| select_failed(database, e))?;
        Ok(true)
    }

    fn add_disconnect_hook(&mut self, hook: DisconnectHook) {
        self.hooks.push(hook);
    }

    fn set_debug(&mut self, debug: bool) {
        self.options.debug = debug;
        if debug && self.log.is_none() {
            self.log = Some(ExecutionLog::new());
        }
    }

    fn execution_log(&self) -> Option<&ExecutionLog> {
        self.log.as_ref()
    }

    fn escape(&mut self, value: &Value, extra: bool) -> Result<String> {
        let text = match value {
            Value::Int(v) => return Ok(v.to_string()),
            Value::UInt(v) => return Ok(v.to_string()),
            Value::Bool(v) => return Ok(if *v { "1" } else { "0" }.to_string()),
            Value::Float(v) => return Ok(v.to_string().replace(',', ".")),
            Value::Null => return Ok("NULL".to_string()),
            Value::Text(s) | Value::Decimal(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Json(j) => j.to_string(),
        };

        let conn = self.connection_mut()?;
        let escaped = conn.escape_string(&text);
        Ok(if extra {
            escape_wildcards(&escaped)
        } else {
            escaped
        })
    }

    fn prefix(&self) -> &str {
        &self.options.prefix
    }

    fn execute(&mut self, statement: PendingStatement) -> Result<&mut Cursor> {
        self.connect()?;
        let sql = statement.render(&self.options.prefix);
        self.guard_connection(&sql)?;

        let failure = match self.attempt(&sql) {
            Ok(cursor) => return Ok(self.store(cursor)),
            Err(e) => e,
        };
        let (code, message) = failure.code_and_message();
        self.error_num = code;
        self.error_msg.clone_from(&message);

        if self.connected() {
            return Err(self.fail(&sql, failure, None));
        }

        tracing::warn!(code, message = %message, "Connection lost, reconnecting once");
        self.discard_connection();
        if let Err(reconnect) = self.connect() {
            return Err(self.fail(&sql, failure, Some(reconnect)));
        }

        match self.attempt(&sql) {
            Ok(cursor) => Ok(self.store(cursor)),
            Err(replay) => Err(self.fail(&sql, failure, Some(replay))),
        }
    }

    fn get_affected_rows(&mut self) -> Result<u64> {
        Ok(self.connection_mut()?.affected_rows())
    }

    fn get_num_rows(&self, cursor: Option<&Cursor>) -> usize {
        cursor.unwrap_or(&self.cursor).num_rows()
    }

    fn insert_id(&mut self) -> Result<u64> {
        Ok(self.connection_mut()?.insert_id())
    }

    fn get_version(&mut self) -> Result<String> {
        Ok(self.connection_mut()?.server_version().to_string())
    }

    fn get_count(&self) -> u64 {
        self.count
    }

    fn get_error_num(&self) -> u16 {
        self.error_num
    }

    fn get_error_msg(&self) -> &str {
        &self.error_msg
    }

    fn has_utf8mb4_support(&self) -> bool {
        self.utf8mb4
    }

    fn has_utf_support(&self) -> bool {
        self.utf
    }

    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<&mut dyn Database> {
        let sql = format!(
            "DROP TABLE {}{}",
            if if_exists { "IF EXISTS " } else { "" },
            self.quote_name(table)
        );
        self.execute(sql.into())?;
        Ok(self)
    }

    fn rename_table(&mut self, old: &str, new: &str) -> Result<&mut dyn Database> {
        let sql = format!(
            "RENAME TABLE {} TO {}",
            self.quote_name(old),
            self.quote_name(new)
        );
        self.execute(sql.into())?;
        Ok(self)
    }
}

impl<B: Backend> Drop for DriverHandle<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CR_SERVER_GONE_ERROR;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    enum Reply {
        Rows(Cursor),
        ServerError(u16, &'static str),
        /// The link dies before the server answers
        Drop,
    }

    #[derive(Default)]
    struct Script {
        replies: VecDeque<Reply>,
        canned: HashMap<String, Cursor>,
        sent: Vec<String>,
        opens: usize,
        closes: usize,
        refuse_open_after: Option<usize>,
        alive: bool,
        version: String,
        reject_utf8mb4: bool,
        fail_select: bool,
        charsets: Vec<String>,
        selected: Vec<String>,
    }

    #[derive(Clone)]
    struct Scripted(Rc<RefCell<Script>>);

    impl Scripted {
        fn new() -> Self {
            Scripted(Rc::new(RefCell::new(Script {
                version: "8.0.36".to_string(),
                ..Script::default()
            })))
        }

        fn push(&self, reply: Reply) -> &Self {
            self.0.borrow_mut().replies.push_back(reply);
            self
        }

        fn script(&self) -> std::cell::RefMut<'_, Script> {
            self.0.borrow_mut()
        }

        fn sent_without_setup(&self) -> Vec<String> {
            self.0
                .borrow()
                .sent
                .iter()
                .filter(|s| !s.starts_with("SET ") && !s.starts_with("SHOW VARIABLES"))
                .cloned()
                .collect()
        }
    }

    struct ScriptedLink {
        script: Rc<RefCell<Script>>,
        version: String,
    }

    impl BackendConnection for ScriptedLink {
        fn query(&mut self, sql: &str) -> Result<Cursor> {
            let mut s = self.script.borrow_mut();
            if !s.alive {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "MySQL server has gone away",
                )));
            }
            s.sent.push(sql.to_string());
            if let Some(cursor) = s.canned.get(sql) {
                return Ok(cursor.clone());
            }
            if sql.starts_with("SET ") || sql.starts_with("SHOW VARIABLES") {
                return Ok(Cursor::new(vec!["Variable_name".into(), "Value".into()], vec![]));
            }
            match s.replies.pop_front() {
                None => Ok(Cursor::from_ok(0, 0)),
                Some(Reply::Rows(cursor)) => Ok(cursor),
                Some(Reply::ServerError(code, message)) => Err(Error::Query(QueryError {
                    kind: QueryErrorKind::from_code(code),
                    sql: None,
                    code,
                    sqlstate: Some("42000".to_string()),
                    message: message.to_string(),
                    source: None,
                })),
                Some(Reply::Drop) => {
                    s.alive = false;
                    Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "Lost connection to MySQL server during query",
                    )))
                }
            }
        }

        fn ping(&mut self) -> bool {
            self.script.borrow().alive
        }

        fn close(self) {
            self.script.borrow_mut().closes += 1;
        }

        fn escape_string(&self, text: &str) -> String {
            text.replace('\\', "\\\\").replace('\'', "\\'")
        }

        fn select_db(&mut self, database: &str) -> Result<()> {
            let mut s = self.script.borrow_mut();
            if s.fail_select {
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::NotFound,
                    sql: None,
                    code: 1049,
                    sqlstate: Some("42000".to_string()),
                    message: format!("Unknown database '{}'", database),
                    source: None,
                }));
            }
            s.selected.push(database.to_string());
            Ok(())
        }

        fn set_charset(&mut self, charset: &str) -> Result<()> {
            let mut s = self.script.borrow_mut();
            if charset == "utf8mb4" && s.reject_utf8mb4 {
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: None,
                    code: 1115,
                    sqlstate: None,
                    message: "Unknown character set: 'utf8mb4'".to_string(),
                    source: None,
                }));
            }
            s.charsets.push(charset.to_string());
            Ok(())
        }

        fn server_version(&self) -> &str {
            &self.version
        }

        fn affected_rows(&self) -> u64 {
            7
        }

        fn insert_id(&self) -> u64 {
            42
        }
    }

    impl Backend for Scripted {
        type Connection = ScriptedLink;

        const INFO: DriverInfo = DriverInfo {
            name: "scripted",
            server_type: "mysql",
            minimum_version: "5.0.4",
        };

        fn is_supported(env: &Environment) -> bool {
            env.has_extension("scripted")
        }

        fn environment(&self) -> Environment {
            Environment::default().with_extension("scripted")
        }

        fn open(&mut self, _options: &ConnectionOptions) -> Result<ScriptedLink> {
            let mut s = self.0.borrow_mut();
            if s.refuse_open_after.is_some_and(|n| s.opens >= n) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "Connection refused",
                )));
            }
            s.opens += 1;
            s.alive = true;
            Ok(ScriptedLink {
                script: Rc::clone(&self.0),
                version: s.version.clone(),
            })
        }
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions::new()
            .host("localhost")
            .user("u")
            .password("p")
            .database("d")
    }

    fn handle(script: &Scripted) -> DriverHandle<Scripted> {
        DriverHandle::new(script.clone(), options())
    }

    fn one_row() -> Cursor {
        Cursor::new(vec!["1".into()], vec![vec![Value::Int(1)]])
    }

    #[test]
    fn execute_connects_lazily_and_runs_setup() {
        let script = Scripted::new();
        script.push(Reply::Rows(one_row()));
        let mut db = handle(&script);
        assert_eq!(db.state(), ConnectionState::Disconnected);
        assert_eq!(script.script().opens, 0);

        let cursor = db.execute("SELECT 1".into()).unwrap();
        assert_eq!(cursor.num_rows(), 1);
        assert_eq!(db.get_count(), 1);
        assert_eq!(db.state(), ConnectionState::Connected);

        let s = script.script();
        assert_eq!(s.sent, vec!["SET @@SESSION.sql_mode = '';", "SELECT 1"]);
        assert_eq!(s.selected, vec!["d"]);
        assert_eq!(s.charsets, vec!["utf8mb4"]);
        drop(s);
        assert!(db.has_utf8mb4_support());
        assert!(db.has_utf_support());
    }

    #[test]
    fn select_disabled_skips_database() {
        let script = Scripted::new();
        let mut db = DriverHandle::new(script.clone(), options().select(false));
        db.connect().unwrap();
        assert!(script.script().selected.is_empty());
    }

    #[test]
    fn failed_select_closes_fresh_link() {
        let script = Scripted::new();
        script.script().fail_select = true;
        let mut db = handle(&script);

        let err = db.connect().unwrap_err();
        match &err {
            Error::Connection(c) => {
                assert_eq!(c.kind, ConnectionErrorKind::Database);
                assert!(c.message.contains("Could not connect to database"));
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert_eq!(script.script().closes, 1);
        assert_eq!(db.state(), ConnectionState::Disconnected);
        assert!(!db.connected());
    }

    #[test]
    fn open_failure_is_a_connection_error() {
        let script = Scripted::new();
        script.script().refuse_open_after = Some(0);
        let mut db = handle(&script);
        let err = db.execute("SELECT 1".into()).unwrap_err();
        assert!(matches!(err, Error::Connection(ref c) if c.kind == ConnectionErrorKind::Connect));
        assert!(err.to_string().contains("Connection refused"));
        assert_eq!(db.get_count(), 0);
    }

    #[test]
    fn utf8mb4_rejected_falls_back_to_utf8() {
        let script = Scripted::new();
        script.script().reject_utf8mb4 = true;
        let mut db = handle(&script);
        db.connect().unwrap();
        assert!(!db.has_utf8mb4_support());
        assert!(db.has_utf_support());
        assert_eq!(script.script().charsets, vec!["utf8"]);
    }

    #[test]
    fn old_server_goes_straight_to_utf8() {
        let script = Scripted::new();
        script.script().version = "5.1.73".to_string();
        let mut db = handle(&script);
        db.connect().unwrap();
        assert!(!db.has_utf8mb4_support());
        assert_eq!(script.script().charsets, vec!["utf8"]);
        assert!(db.is_min_version().unwrap());
        assert!(!db.server_claims_utf8mb4_support().unwrap());
    }

    #[test]
    fn debug_mode_disables_cache_and_enables_profiling() {
        let script = Scripted::new();
        {
            let mut s = script.script();
            s.canned.insert(
                "SHOW VARIABLES LIKE 'query_cache_type'".to_string(),
                Cursor::new(
                    vec!["Variable_name".into(), "Value".into()],
                    vec![vec![Value::from("query_cache_type"), Value::from("ON")]],
                ),
            );
            s.canned.insert(
                "SHOW VARIABLES LIKE 'have_profiling'".to_string(),
                Cursor::new(
                    vec!["Variable_name".into(), "Value".into()],
                    vec![vec![Value::from("have_profiling"), Value::from("YES")]],
                ),
            );
        }
        let mut db = DriverHandle::new(script.clone(), options().debug(true));
        db.execute("SELECT 1".into()).unwrap();

        let sent = script.script().sent.clone();
        assert!(sent.contains(&"SET query_cache_type = 0;".to_string()));
        assert!(sent.contains(&"SET profiling_history_size = 100, profiling = 1;".to_string()));

        let log = db.execution_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].sql, "SELECT 1");
        assert!(log.entries()[0].finished.is_some());
    }

    #[test]
    fn without_debug_no_toggles_and_no_log() {
        let script = Scripted::new();
        let mut db = handle(&script);
        db.execute("SELECT 1".into()).unwrap();
        assert!(db.execution_log().is_none());
        assert!(
            !script
                .script()
                .sent
                .iter()
                .any(|s| s.starts_with("SHOW VARIABLES"))
        );
    }

    #[test]
    fn dropped_link_reconnects_and_replays_once() {
        let script = Scripted::new();
        script.push(Reply::Drop).push(Reply::Rows(one_row()));
        let mut db = handle(&script);

        let rows = db.execute("SELECT 1".into()).unwrap().num_rows();
        assert_eq!(rows, 1);
        assert_eq!(db.get_count(), 2);
        assert_eq!(script.script().opens, 2);
        assert_eq!(script.sent_without_setup(), vec!["SELECT 1", "SELECT 1"]);
        assert_eq!(db.get_error_num(), 0);
    }

    #[test]
    fn replay_failure_reports_original_error() {
        let script = Scripted::new();
        script
            .push(Reply::Drop)
            .push(Reply::ServerError(1146, "Table 'd.t' doesn't exist"));
        let mut db = handle(&script);

        let err = db.execute("SELECT * FROM t".into()).unwrap_err();
        assert_eq!(err.code_and_message().0, CR_SERVER_GONE_ERROR);
        assert!(
            err.code_and_message()
                .1
                .contains("Lost connection to MySQL server")
        );
        assert_eq!(err.sql(), Some("SELECT * FROM t"));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert!(source.is_some_and(|s| s.contains("1146")));
        assert_eq!(script.script().opens, 2);
        assert_eq!(db.get_count(), 2);
        assert_eq!(db.get_error_num(), CR_SERVER_GONE_ERROR);
    }

    #[test]
    fn reconnect_failure_reports_original_error() {
        let script = Scripted::new();
        script.push(Reply::Drop);
        script.script().refuse_open_after = Some(1);
        let mut db = handle(&script);

        let err = db.execute("UPDATE t SET a = 1".into()).unwrap_err();
        match &err {
            Error::Query(q) => {
                assert_eq!(q.code, CR_SERVER_GONE_ERROR);
                assert_eq!(q.kind, QueryErrorKind::ConnectionLost);
                assert_eq!(q.sql.as_deref(), Some("UPDATE t SET a = 1"));
            }
            other => panic!("expected query error, got {other:?}"),
        }
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert!(source.is_some_and(|s| s.contains("Connection refused")));
        assert_eq!(db.get_count(), 1);
        assert_eq!(db.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn live_link_failure_is_not_retried() {
        let script = Scripted::new();
        script.push(Reply::ServerError(1064, "You have an error in your SQL syntax"));
        let mut db = handle(&script);

        let err = db.execute("SELEC 1".into()).unwrap_err();
        match &err {
            Error::Query(q) => {
                assert_eq!(q.code, 1064);
                assert_eq!(q.kind, QueryErrorKind::Syntax);
                assert_eq!(q.sqlstate.as_deref(), Some("42000"));
            }
            other => panic!("expected query error, got {other:?}"),
        }
        assert_eq!(script.script().opens, 1);
        assert_eq!(db.get_count(), 1);
        assert_eq!(db.get_error_num(), 1064);
        assert!(db.get_error_msg().contains("SQL syntax"));
    }

    #[test]
    fn error_state_resets_on_next_statement() {
        let script = Scripted::new();
        script.push(Reply::ServerError(1064, "syntax"));
        let mut db = handle(&script);
        assert!(db.execute("SELEC 1".into()).is_err());
        db.execute("SELECT 1".into()).unwrap();
        assert_eq!(db.get_error_num(), 0);
        assert_eq!(db.get_error_msg(), "");
    }

    #[test]
    fn limit_and_prefix_are_rendered() {
        let script = Scripted::new();
        let mut db = DriverHandle::new(script.clone(), options().prefix("app_"));
        db.execute(PendingStatement::new("SELECT * FROM #__users").limit(10, 5))
            .unwrap();
        assert_eq!(
            script.sent_without_setup(),
            vec!["SELECT * FROM app_users LIMIT 10, 5"]
        );
    }

    #[test]
    fn disconnect_runs_hooks_once() {
        let script = Scripted::new();
        let mut db = handle(&script);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);
        db.add_disconnect_hook(Box::new(move |db: &mut dyn Database| {
            seen.borrow_mut().push(db.get_count());
        }));
        let seen = Rc::clone(&calls);
        db.add_disconnect_hook(Box::new(move |_db: &mut dyn Database| {
            seen.borrow_mut().push(99);
        }));

        db.execute("SELECT 1".into()).unwrap();
        db.disconnect();
        db.disconnect();

        assert_eq!(*calls.borrow(), vec![1, 99]);
        assert_eq!(script.script().closes, 1);
        assert_eq!(db.state(), ConnectionState::Disconnected);
        assert!(!db.connected());
    }

    #[test]
    fn disconnect_without_link_skips_hooks() {
        let script = Scripted::new();
        let mut db = handle(&script);
        let calls = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&calls);
        db.add_disconnect_hook(Box::new(move |_db: &mut dyn Database| {
            *seen.borrow_mut() += 1;
        }));
        db.disconnect();
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn hooks_may_use_the_link() {
        let script = Scripted::new();
        let mut db = handle(&script);
        db.add_disconnect_hook(Box::new(|db: &mut dyn Database| {
            let _ = db.execute("DELETE FROM sessions".into());
        }));
        db.connect().unwrap();
        db.disconnect();
        assert_eq!(script.sent_without_setup(), vec!["DELETE FROM sessions"]);
    }

    #[test]
    fn drop_closes_the_link() {
        let script = Scripted::new();
        {
            let mut db = handle(&script);
            db.connect().unwrap();
        }
        assert_eq!(script.script().closes, 1);
    }

    #[test]
    fn numbers_escape_without_connecting() {
        let script = Scripted::new();
        let mut db = handle(&script);
        for v in [0i64, -5, i64::MAX] {
            assert_eq!(db.escape(&Value::Int(v), false).unwrap(), v.to_string());
        }
        assert_eq!(db.escape(&Value::UInt(u64::MAX), true).unwrap(), u64::MAX.to_string());
        assert_eq!(db.escape(&Value::Float(1.5), false).unwrap(), "1.5");
        assert_eq!(db.escape(&Value::Float(-0.25), false).unwrap(), "-0.25");
        assert_eq!(db.escape(&Value::Bool(true), false).unwrap(), "1");
        assert_eq!(db.escape(&Value::Null, false).unwrap(), "NULL");
        assert_eq!(script.script().opens, 0);
    }

    #[test]
    fn strings_escape_natively_and_extra_adds_wildcards() {
        let script = Scripted::new();
        let mut db = handle(&script);
        for s in ["plain", "O'Reilly", "100% _done_", "a\\b%", ""] {
            let base = db.escape(&Value::from(s), false).unwrap();
            let extra = db.escape(&Value::from(s), true).unwrap();
            assert_eq!(extra, base.replace('%', "\\%").replace('_', "\\_"));
        }
        assert_eq!(db.escape(&Value::from("O'Reilly"), false).unwrap(), "O\\'Reilly");
        assert_eq!(db.quote("it's").unwrap(), "'it\\'s'");
        assert_eq!(script.script().opens, 1);
    }

    #[test]
    fn unsupported_environment_refuses_to_connect() {
        let script = Scripted::new();
        let mut db = handle(&script).with_environment(Environment::default());
        assert!(!db.is_supported());
        assert!(matches!(db.connect(), Err(Error::Unsupported(_))));
        assert!(matches!(
            db.escape(&Value::from("x"), false),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(db.escape(&Value::Int(3), false).unwrap(), "3");
        assert_eq!(script.script().opens, 0);
    }

    #[test]
    fn connection_accessors() {
        let script = Scripted::new();
        let mut db = handle(&script);
        assert!(!db.connected());
        assert_eq!(db.get_affected_rows().unwrap(), 7);
        assert_eq!(db.insert_id().unwrap(), 42);
        assert_eq!(db.get_version().unwrap(), "8.0.36");
        assert!(db.connected());
        assert_eq!(db.get_num_rows(None), 0);
        assert_eq!(db.get_num_rows(Some(&one_row())), 1);
        assert_eq!(db.quote_name("d.t"), "`d`.`t`");
        assert_eq!(db.null_date(), NULL_DATE);
        assert_eq!(db.info().name, "scripted");
    }

    #[test]
    fn select_empty_name_is_false() {
        let script = Scripted::new();
        let mut db = DriverHandle::new(script.clone(), options().select(false));
        assert!(!db.select("").unwrap());
        assert!(db.select("other").unwrap());
        assert_eq!(script.script().selected, vec!["other"]);
    }

    #[test]
    fn loaders() {
        let script = Scripted::new();
        let cursor = Cursor::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
            ],
        );
        for _ in 0..4 {
            script.push(Reply::Rows(cursor.clone()));
        }
        let mut db = handle(&script);
        assert_eq!(db.load_result("q".into()).unwrap(), Some(Value::Int(1)));
        assert_eq!(
            db.load_row("q".into()).unwrap().and_then(|r| r.get(1).cloned()),
            Some(Value::from("a"))
        );
        assert_eq!(db.load_rows("q".into()).unwrap().len(), 2);
        assert_eq!(
            db.load_column("q".into()).unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );
        assert_eq!(db.load_result("q".into()).unwrap(), None);
    }

    #[test]
    fn table_columns_type_only_and_full() {
        let script = Scripted::new();
        let columns = Cursor::new(
            vec!["Field".into(), "Type".into(), "Null".into(), "Key".into()],
            vec![
                vec![
                    Value::from("id"),
                    Value::from("int(11)"),
                    Value::from("NO"),
                    Value::from("PRI"),
                ],
                vec![
                    Value::from("title"),
                    Value::from("varchar(255)"),
                    Value::from("YES"),
                    Value::from(""),
                ],
            ],
        );
        script
            .push(Reply::Rows(columns.clone()))
            .push(Reply::Rows(columns));
        let mut db = handle(&script);

        let bare = db.get_table_columns("#__content", true).unwrap();
        assert_eq!(
            bare,
            TableColumns::Types(vec![
                ("id".into(), "int".into()),
                ("title".into(), "varchar".into()),
            ])
        );
        match db.get_table_columns("#__content", false).unwrap() {
            TableColumns::Full(cols) => {
                assert_eq!(cols[1].column_type, "varchar(255)");
                assert!(cols[1].is_nullable());
            }
            other => panic!("expected full metadata, got {other:?}"),
        }
        assert_eq!(
            script.sent_without_setup()[0],
            "SHOW FULL COLUMNS FROM `jos_content`"
        );
    }

    #[test]
    fn table_create_for_each_table() {
        let script = Scripted::new();
        for name in ["a", "b"] {
            script.push(Reply::Rows(Cursor::new(
                vec!["Table".into(), "Create Table".into()],
                vec![vec![
                    Value::from(name),
                    Value::from(format!("CREATE TABLE `{name}` (x int)")),
                ]],
            )));
        }
        let mut db = handle(&script);
        let ddl = db.get_table_create(vec!["a", "b"].into()).unwrap();
        assert_eq!(ddl[0], ("a".to_string(), "CREATE TABLE `a` (x int)".to_string()));
        assert_eq!(ddl[1].0, "b");
        assert_eq!(
            script.sent_without_setup(),
            vec!["SHOW CREATE TABLE `a`", "SHOW CREATE TABLE `b`"]
        );
    }

    #[test]
    fn drop_and_rename_chain() {
        let script = Scripted::new();
        let mut db = handle(&script);
        db.drop_table("old", true)
            .unwrap()
            .rename_table("new", "old")
            .unwrap()
            .drop_table("tmp", false)
            .unwrap();
        assert_eq!(
            script.sent_without_setup(),
            vec![
                "DROP TABLE IF EXISTS `old`",
                "RENAME TABLE `new` TO `old`",
                "DROP TABLE `tmp`",
            ]
        );
    }

    #[test]
    fn collation_lookup() {
        let script = Scripted::new();
        script.script().canned.insert(
            r#"SHOW VARIABLES LIKE "collation_database""#.to_string(),
            Cursor::new(
                vec!["Variable_name".into(), "Value".into()],
                vec![vec![
                    Value::from("collation_database"),
                    Value::from("utf8mb4_unicode_ci"),
                ]],
            ),
        );
        let mut db = handle(&script);
        assert_eq!(
            db.get_collation().unwrap().as_deref(),
            Some("utf8mb4_unicode_ci")
        );
        assert_eq!(db.get_connection_collation().unwrap(), None);
    }

    #[test]
    fn table_list_and_keys() {
        let script = Scripted::new();
        script
            .push(Reply::Rows(Cursor::new(
                vec!["Tables_in_d".into()],
                vec![vec![Value::from("jos_users")], vec![Value::from("jos_content")]],
            )))
            .push(Reply::Rows(Cursor::new(
                vec!["Table".into(), "Key_name".into()],
                vec![vec![Value::from("jos_users"), Value::from("PRIMARY")]],
            )));
        let mut db = handle(&script);
        assert_eq!(db.get_table_list().unwrap(), vec!["jos_users", "jos_content"]);
        let keys = db.get_table_keys("jos_users").unwrap();
        assert_eq!(keys[0].get_named::<String>("Key_name").unwrap(), "PRIMARY");
        assert_eq!(script.sent_without_setup()[1], "SHOW KEYS FROM `jos_users`");
    }

    #[test]
    fn handle_works_behind_a_trait_object() {
        let script = Scripted::new();
        script.push(Reply::Rows(one_row()));
        let mut db: Box<dyn Database> = Box::new(handle(&script));
        assert_eq!(db.load_result("SELECT 1".into()).unwrap(), Some(Value::Int(1)));
        db.disconnect();
        assert_eq!(script.script().closes, 1);
    }
}
