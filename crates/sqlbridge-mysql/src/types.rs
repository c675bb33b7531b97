//! Column definitions and text-protocol value decoding.

use sqlbridge_core::Value;
use sqlbridge_core::error::{Error, ProtocolError};

use crate::protocol::PacketReader;
use crate::protocol::charset;
use crate::protocol::reader::NULL_MARKER;

/// `MYSQL_TYPE_*` code of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldType(pub u8);

#[allow(dead_code)]
impl FieldType {
    pub const DECIMAL: Self = Self(0x00);
    pub const TINY: Self = Self(0x01);
    pub const SHORT: Self = Self(0x02);
    pub const LONG: Self = Self(0x03);
    pub const FLOAT: Self = Self(0x04);
    pub const DOUBLE: Self = Self(0x05);
    pub const NULL: Self = Self(0x06);
    pub const TIMESTAMP: Self = Self(0x07);
    pub const LONGLONG: Self = Self(0x08);
    pub const INT24: Self = Self(0x09);
    pub const DATE: Self = Self(0x0A);
    pub const TIME: Self = Self(0x0B);
    pub const DATETIME: Self = Self(0x0C);
    pub const YEAR: Self = Self(0x0D);
    pub const VARCHAR: Self = Self(0x0F);
    pub const BIT: Self = Self(0x10);
    pub const JSON: Self = Self(0xF5);
    pub const NEWDECIMAL: Self = Self(0xF6);
    pub const ENUM: Self = Self(0xF7);
    pub const SET: Self = Self(0xF8);
    pub const TINY_BLOB: Self = Self(0xF9);
    pub const MEDIUM_BLOB: Self = Self(0xFA);
    pub const LONG_BLOB: Self = Self(0xFB);
    pub const BLOB: Self = Self(0xFC);
    pub const VAR_STRING: Self = Self(0xFD);
    pub const STRING: Self = Self(0xFE);
    pub const GEOMETRY: Self = Self(0xFF);

    pub const fn is_integer(self) -> bool {
        matches!(self.0, 0x01 | 0x02 | 0x03 | 0x08 | 0x09 | 0x0D)
    }

    pub const fn is_float(self) -> bool {
        matches!(self.0, 0x04 | 0x05)
    }

    pub const fn is_decimal(self) -> bool {
        matches!(self.0, 0x00 | 0xF6)
    }

    /// String and blob types; binary or text depending on the collation.
    pub const fn is_string_like(self) -> bool {
        matches!(self.0, 0x0F | 0xF7..=0xFE)
    }
}

pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// One column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a protocol 4.1 column definition packet.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let mut r = PacketReader::new(payload);
        let mut text = |field: &str| {
            r.read_lenenc_string()
                .ok_or_else(|| malformed(format!("column definition is missing {}", field), payload))
        };
        let _catalog = text("catalog")?;
        let schema = text("schema")?;
        let table = text("table")?;
        let _org_table = text("org_table")?;
        let name = text("name")?;
        let org_name = text("org_name")?;

        // Length of the fixed-size block, always 0x0c.
        let _ = r.read_lenenc_int();
        let (charset, column_length, column_type, flags, decimals) = fixed_block(&mut r)
            .ok_or_else(|| malformed("column definition is truncated", payload))?;

        Ok(Self {
            schema,
            table,
            name,
            org_name,
            charset,
            column_length,
            column_type: FieldType(column_type),
            flags,
            decimals,
        })
    }

    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    /// Binary collation: the column carries bytes, not text.
    pub fn is_binary(&self) -> bool {
        self.charset == u16::from(charset::BINARY)
    }
}

fn fixed_block(r: &mut PacketReader<'_>) -> Option<(u16, u32, u8, u16, u8)> {
    Some((
        r.read_u16_le()?,
        r.read_u32_le()?,
        r.read_u8()?,
        r.read_u16_le()?,
        r.read_u8()?,
    ))
}

/// Decode one text-protocol cell.
///
/// Numbers that fail to parse (e.g. out-of-range values) fall back to text.
pub fn decode_text_value(column: &ColumnDef, data: &[u8]) -> Value {
    let ty = column.column_type;
    let text = || String::from_utf8_lossy(data).into_owned();

    if ty.is_integer() {
        let s = text();
        let parsed = if column.is_unsigned() {
            s.parse::<u64>().ok().map(Value::UInt)
        } else {
            s.parse::<i64>().ok().map(Value::Int)
        };
        return parsed.unwrap_or(Value::Text(s));
    }
    if ty.is_float() {
        let s = text();
        return s.parse::<f64>().map_or(Value::Text(s), Value::Float);
    }
    if ty.is_decimal() {
        return Value::Decimal(text());
    }
    match ty {
        FieldType::NULL => Value::Null,
        FieldType::BIT | FieldType::GEOMETRY => Value::Bytes(data.to_vec()),
        FieldType::JSON => {
            serde_json::from_slice(data).map_or_else(|_| Value::Text(text()), Value::Json)
        }
        t if t.is_string_like() && column.is_binary() => Value::Bytes(data.to_vec()),
        _ => Value::Text(text()),
    }
}

/// Decode a text-protocol row.
pub fn parse_text_row(payload: &[u8], columns: &[ColumnDef]) -> Result<Vec<Value>, Error> {
    let mut r = PacketReader::new(payload);
    columns
        .iter()
        .map(|column| {
            if r.peek() == Some(NULL_MARKER) {
                r.skip(1);
                return Ok(Value::Null);
            }
            r.read_lenenc_bytes()
                .map(|cell| decode_text_value(column, cell))
                .ok_or_else(|| malformed(format!("row is truncated at column '{}'", column.name), payload))
        })
        .collect()
}

fn malformed(message: impl Into<String>, payload: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: Some(payload.to_vec()),
    })
}
