//! Schema metadata shapes and the pure helpers behind introspection.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::Result;
use crate::row::Row;

/// One row of `SHOW FULL COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub field: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub collation: Option<String>,
    /// `YES` or `NO`
    pub null: String,
    /// `PRI`, `UNI`, `MUL` or empty
    pub key: String,
    pub default: Option<String>,
    pub extra: String,
    pub privileges: String,
    pub comment: String,
}

impl ColumnMetadata {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            field: row.get_named("Field")?,
            column_type: row.get_named("Type")?,
            collation: optional_text(row, "Collation")?,
            null: optional_text(row, "Null")?.unwrap_or_default(),
            key: optional_text(row, "Key")?.unwrap_or_default(),
            default: optional_text(row, "Default")?,
            extra: optional_text(row, "Extra")?.unwrap_or_default(),
            privileges: optional_text(row, "Privileges")?.unwrap_or_default(),
            comment: optional_text(row, "Comment")?.unwrap_or_default(),
        })
    }

    pub fn is_nullable(&self) -> bool {
        self.null.eq_ignore_ascii_case("YES")
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == "PRI"
    }
}

fn optional_text(row: &Row, name: &str) -> Result<Option<String>> {
    if row.contains_column(name) {
        row.get_named(name)
    } else {
        Ok(None)
    }
}

/// Column listing of a table, in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TableColumns {
    /// Column name to bare type (`varchar`, `int unsigned`)
    Types(Vec<(String, String)>),
    /// Column name to full metadata
    Full(Vec<ColumnMetadata>),
}

impl TableColumns {
    pub fn len(&self) -> usize {
        match self {
            TableColumns::Types(t) => t.len(),
            TableColumns::Full(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            TableColumns::Types(t) => t.iter().map(|(n, _)| n.as_str()).collect(),
            TableColumns::Full(f) => f.iter().map(|c| c.field.as_str()).collect(),
        }
    }

    /// Type of `column`, bare or full depending on how it was loaded.
    pub fn type_of(&self, column: &str) -> Option<&str> {
        match self {
            TableColumns::Types(t) => t
                .iter()
                .find(|(n, _)| n == column)
                .map(|(_, ty)| ty.as_str()),
            TableColumns::Full(f) => f
                .iter()
                .find(|c| c.field == column)
                .map(|c| c.column_type.as_str()),
        }
    }
}

/// One or more table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables(Vec<String>);

impl Tables {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Tables {
    fn from(name: &str) -> Self {
        Tables(vec![name.to_string()])
    }
}

impl From<String> for Tables {
    fn from(name: String) -> Self {
        Tables(vec![name])
    }
}

impl From<Vec<String>> for Tables {
    fn from(names: Vec<String>) -> Self {
        Tables(names)
    }
}

impl From<Vec<&str>> for Tables {
    fn from(names: Vec<&str>) -> Self {
        Tables(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Tables {
    fn from(names: &[&str]) -> Self {
        Tables(names.iter().map(|n| (*n).to_string()).collect())
    }
}

/// Remove every digit and parenthesis from a column type:
/// `varchar(255)` becomes `varchar`, `decimal(10,2)` becomes `decimal,`.
pub fn strip_type_precision(column_type: &str) -> String {
    column_type
        .chars()
        .filter(|c| !c.is_ascii_digit() && *c != '(' && *c != ')')
        .collect()
}

/// Oldest server version with the `utf8mb4` character set.
pub const UTF8MB4_MIN_VERSION: &str = "5.5.3";

/// MariaDB prefixes its version with this for replication compatibility.
const MARIADB_REPLICATION_PREFIX: &str = "5.5.5-";

/// Whether a server reporting `version` supports `utf8mb4`.
pub fn server_claims_utf8mb4(version: &str) -> bool {
    let version = version
        .strip_prefix(MARIADB_REPLICATION_PREFIX)
        .unwrap_or(version);
    compare_versions(version, UTF8MB4_MIN_VERSION) != Ordering::Less
}

/// Compare dotted version strings numerically.
///
/// Each component's leading digits are compared; suffixes such as
/// `-MariaDB-log` are ignored and missing components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-'])
            .map_while(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
