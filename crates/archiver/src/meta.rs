//! Table metadata and the row model
//!
//! A table is described once per session as an ordered list of
//! [`ColumnDescriptor`]s. That order is authoritative: every [`Row`] carries
//! exactly one value per descriptor, in the same position.

use archiver_rdbc::types::{Row as DbRow, Value};
use serde::Serialize;
use std::fmt;

/// Whether a column accepts NULL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Nullability {
    /// `YES`
    Nullable,
    /// `NO`
    NotNull,
}

impl Nullability {
    /// Parse the describe-table null flag (`YES` / `NO`)
    pub fn parse(flag: &str) -> Self {
        if flag.eq_ignore_ascii_case("YES") {
            Self::Nullable
        } else {
            Self::NotNull
        }
    }
}

/// Index role of a column as reported by describe-table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KeyRole {
    /// Not indexed (empty flag)
    None,
    /// `PRI` - part of the primary key
    Primary,
    /// `UNI` - first column of a unique index
    Unique,
    /// `MUL` - first column of a non-unique index
    Multiple,
    /// Anything else the server reports
    Other(String),
}

impl KeyRole {
    /// Parse the describe-table key flag, case-insensitively
    pub fn parse(flag: &str) -> Self {
        match flag.trim().to_ascii_uppercase().as_str() {
            "" => Self::None,
            "PRI" => Self::Primary,
            "UNI" => Self::Unique,
            "MUL" => Self::Multiple,
            _ => Self::Other(flag.trim().to_string()),
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Primary => write!(f, "PRI"),
            Self::Unique => write!(f, "UNI"),
            Self::Multiple => write!(f, "MUL"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Static schema metadata for one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub field: String,
    /// Declared type, e.g. `bigint(20) unsigned`
    pub declared_type: String,
    /// Null flag
    pub nullable: Nullability,
    /// Index role
    pub key_role: KeyRole,
    /// Default value (None when the server reports NULL)
    pub default: Option<String>,
    /// Extra attributes, e.g. `auto_increment`
    pub extra: String,
}

impl ColumnDescriptor {
    /// Build a descriptor by hand
    pub fn new(field: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            declared_type: declared_type.into(),
            nullable: Nullability::Nullable,
            key_role: KeyRole::None,
            default: None,
            extra: String::new(),
        }
    }

    /// Mark the column as the primary key
    pub fn primary(mut self) -> Self {
        self.key_role = KeyRole::Primary;
        self.nullable = Nullability::NotNull;
        self
    }

    /// Decode one describe-table row.
    ///
    /// The row must hold the fixed 6-tuple `(Field, Type, Null, Key, Default,
    /// Extra)`, positionally.
    pub fn from_describe_row(row: &DbRow) -> std::result::Result<Self, String> {
        if row.len() < 6 {
            return Err(format!(
                "describe row has {} columns, expected 6",
                row.len()
            ));
        }
        let text = |idx: usize| row.get(idx).and_then(Value::as_string);

        let field = text(0).ok_or("describe row has a NULL field name")?;
        Ok(Self {
            field,
            declared_type: text(1).unwrap_or_default(),
            nullable: Nullability::parse(&text(2).unwrap_or_default()),
            key_role: KeyRole::parse(&text(3).unwrap_or_default()),
            default: text(4),
            extra: text(5).unwrap_or_default(),
        })
    }

    /// Whether this column is the primary key
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.key_role == KeyRole::Primary
    }
}

/// Locate the single primary-key column: `(ordinal, descriptor)`.
///
/// A composite key reports `PRI` on every member column and yields `None`.
pub fn find_primary_key(columns: &[ColumnDescriptor]) -> Option<(usize, &ColumnDescriptor)> {
    let mut primary = columns.iter().enumerate().filter(|(_, c)| c.is_primary());
    match (primary.next(), primary.next()) {
        (Some(found), None) => Some(found),
        _ => None,
    }
}

/// Count of columns flagged `PRI`
pub fn primary_key_width(columns: &[ColumnDescriptor]) -> usize {
    columns.iter().filter(|c| c.is_primary()).count()
}

/// How keyset cursor values must be bound for a given key column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Signed integer column
    Signed,
    /// Unsigned integer column
    Unsigned,
    /// `BINARY`, `VARBINARY` or `BLOB`; bound as raw bytes
    Binary,
    /// Anything else, compared as text
    Text,
}

impl KeyKind {
    /// Infer from a declared type such as `int(11)` or `bigint unsigned`
    pub fn from_declared_type(declared: &str) -> Self {
        let lower = declared.trim().to_ascii_lowercase();
        let base: String = lower
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        match base.as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                if lower.contains("unsigned") {
                    Self::Unsigned
                } else {
                    Self::Signed
                }
            }
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                Self::Binary
            }
            _ => Self::Text,
        }
    }

    /// Turn a harvested key into the cursor bound for the next window.
    ///
    /// Raw bytes are passed through untouched whatever the kind, so the
    /// cursor always equals the stored key byte for byte.
    pub fn cursor_value(&self, key: &Value) -> std::result::Result<Value, String> {
        let text = match key {
            Value::Null => return Err("primary key value is NULL".into()),
            Value::Bytes(raw) => return Ok(Value::Bytes(raw.clone())),
            Value::String(s) => s.as_str(),
            other => return Ok(other.clone()),
        };
        match self {
            Self::Signed => text
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|e| format!("key '{}' is not a signed integer: {}", text, e)),
            Self::Unsigned => text
                .parse::<u64>()
                .map(Value::UInt64)
                .map_err(|e| format!("key '{}' is not an unsigned integer: {}", text, e)),
            Self::Binary => Ok(Value::Bytes(text.as_bytes().to_vec())),
            Self::Text => Ok(Value::String(text.to_string())),
        }
    }
}

/// Printable form of a key: its text, or `0x…` hex when it is not UTF-8
pub fn key_label(key: &Value) -> String {
    match key {
        Value::Bytes(raw) => match std::str::from_utf8(raw) {
            Ok(text) => text.to_string(),
            Err(_) => raw.iter().fold(String::from("0x"), |mut hex, b| {
                hex.push_str(&format!("{:02x}", b));
                hex
            }),
        },
        other => other.as_string().unwrap_or_else(|| "NULL".into()),
    }
}

/// One table row in column order.
///
/// Every value is held as text, except binary data that is not valid UTF-8,
/// which stays as raw bytes so keys survive the trip to the purger intact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(Vec<Value>);

impl Row {
    /// Create a row from text values already in column order
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self(values.into_iter().map(Value::from).collect())
    }

    /// Normalize driver values: NULL and non-UTF-8 bytes are kept, the rest
    /// rendered as text
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Null | Value::String(_) => v,
                    Value::Bytes(raw) => match String::from_utf8(raw) {
                        Ok(text) => Value::String(text),
                        Err(e) => Value::Bytes(e.into_bytes()),
                    },
                    other => other.as_string().map_or(Value::Null, Value::String),
                })
                .collect(),
        )
    }

    /// Number of values
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no values
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text at `idx`; `None` for NULL, binary or out of range
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).and_then(Value::as_str)
    }

    /// Raw bytes at `idx`, for text and binary values alike
    pub fn bytes(&self, idx: usize) -> Option<&[u8]> {
        match self.0.get(idx)? {
            Value::String(s) => Some(s.as_bytes()),
            Value::Bytes(raw) => Some(raw),
            _ => None,
        }
    }

    /// Value at `idx` as held
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    /// Whether the value at `idx` is NULL
    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.0.get(idx), Some(Value::Null))
    }

    /// All values
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Take the values
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Option<String>>> for Row {
    fn from(values: Vec<Option<String>>) -> Self {
        Self::new(values)
    }
}
