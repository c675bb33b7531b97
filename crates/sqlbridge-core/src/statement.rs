//! Statements handed to the executor.
//!
//! A statement is either raw SQL text or a structured query object built by
//! an external query builder. Raw text may be paired with a limit/offset,
//! which the executor appends as `LIMIT offset, limit`; a structured query
//! renders its own limiting and never gets a second clause.

use std::fmt;

/// A query object produced by a query builder.
pub trait BuiltQuery: fmt::Debug {
    /// Render the full statement, including whatever LIMIT it manages.
    fn to_sql(&self) -> String;
}

/// The SQL source of a pending statement.
#[derive(Debug)]
pub enum Statement {
    Raw(String),
    Built(Box<dyn BuiltQuery>),
}

impl Statement {
    pub fn is_raw(&self) -> bool {
        matches!(self, Statement::Raw(_))
    }

    pub fn to_sql(&self) -> String {
        match self {
            Statement::Raw(sql) => sql.clone(),
            Statement::Built(query) => query.to_sql(),
        }
    }
}

/// A statement plus the optional limit/offset pair for one execute call.
#[derive(Debug)]
pub struct PendingStatement {
    statement: Statement,
    offset: u64,
    limit: u64,
}

impl PendingStatement {
    pub fn new(statement: impl Into<Statement>) -> Self {
        Self {
            statement: statement.into(),
            offset: 0,
            limit: 0,
        }
    }

    /// Limit the rows returned. Ignored for structured query objects.
    pub fn limit(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Render the final SQL: prefix substitution first, then the LIMIT
    /// clause for raw text when a limit or offset was set.
    pub fn render(&self, prefix: &str) -> String {
        let mut sql = replace_prefix(&self.statement.to_sql(), prefix, PREFIX_PLACEHOLDER);
        if self.statement.is_raw() && (self.limit > 0 || self.offset > 0) {
            sql.push_str(&format!(" LIMIT {}, {}", self.offset, self.limit));
        }
        sql
    }
}

impl From<Statement> for PendingStatement {
    fn from(statement: Statement) -> Self {
        Self::new(statement)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::Raw(sql.to_string())
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::Raw(sql)
    }
}

impl From<Box<dyn BuiltQuery>> for Statement {
    fn from(query: Box<dyn BuiltQuery>) -> Self {
        Statement::Built(query)
    }
}

impl From<&str> for PendingStatement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for PendingStatement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl From<Box<dyn BuiltQuery>> for PendingStatement {
    fn from(query: Box<dyn BuiltQuery>) -> Self {
        Self::new(query)
    }
}

/// Placeholder replaced by the configured table prefix.
pub const PREFIX_PLACEHOLDER: &str = "#__";

/// Replace `placeholder` with `prefix` outside quoted string literals.
///
/// Single- and double-quoted literals are copied verbatim, honouring both
/// backslash escapes and doubled quotes. Backtick-quoted identifiers are
/// substituted like bare text.
pub fn replace_prefix(sql: &str, prefix: &str, placeholder: &str) -> String {
    if placeholder.is_empty() || !sql.contains(placeholder) {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + 16);
    let mut rest = sql;

    while !rest.is_empty() {
        let Some(quote_at) = rest.find(['\'', '"']) else {
            out.push_str(&rest.replace(placeholder, prefix));
            break;
        };

        out.push_str(&rest[..quote_at].replace(placeholder, prefix));
        let quote = rest.as_bytes()[quote_at];
        let literal_start = quote_at;
        let bytes = rest.as_bytes();
        let mut i = quote_at + 1;
        let mut closed = false;
        while i < bytes.len() {
            if bytes[i] == b'\\' {
                i += 2;
                continue;
            }
            if bytes[i] == quote {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                    continue;
                }
                closed = true;
                i += 1;
                break;
            }
            i += 1;
        }

        let end = i.min(bytes.len());
        out.push_str(&rest[literal_start..end]);
        rest = &rest[end..];
        if !closed {
            break;
        }
    }

    out
}

/// Quote an identifier with `quote`, part by part.
///
/// `db.table` becomes `` `db`.`table` ``; embedded quote characters are
/// doubled.
pub fn quote_identifier(name: &str, quote: char) -> String {
    let doubled = format!("{quote}{quote}");
    name.split('.')
        .map(|part| {
            format!(
                "{quote}{}{quote}",
                part.replace(quote, &doubled)
            )
        })
        .collect::<Vec<_>>()
        .join(".")
}
