//! Values and rows exchanged with a backend
//!
//! Once a row leaves the driver the archiver only ever looks at its text
//! form, so [`Value`] keeps just enough shape to bind parameters with the
//! right wire type and to render results without losing digits.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A single column value or statement parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// BOOL / TINYINT(1)
    Bool(bool),
    /// Any signed integer column
    Int64(i64),
    /// BIGINT UNSIGNED and friends
    UInt64(u64),
    /// FLOAT, DOUBLE
    Float64(f64),
    /// Character data; DECIMAL arrives here too
    String(String),
    /// Binary data that is not valid UTF-8
    Bytes(Vec<u8>),
    /// DATE
    Date(NaiveDate),
    /// TIME within a single day
    Time(NaiveTime),
    /// DATETIME, TIMESTAMP
    DateTime(NaiveDateTime),
}

impl Value {
    /// True for SQL NULL
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view, parsing text when needed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            Self::UInt64(n) => i64::try_from(*n).ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Unsigned view, parsing text when needed
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(n) => Some(*n),
            Self::Int64(n) => u64::try_from(*n).ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Borrow text without copying
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Text rendering, `None` only for NULL.
    ///
    /// Booleans render as `1`/`0` the way MySQL prints them; stray binary is
    /// decoded lossily.
    pub fn as_string(&self) -> Option<String> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(b) => u8::from(*b).to_string(),
            Self::Int64(n) => n.to_string(),
            Self::UInt64(n) => n.to_string(),
            Self::Float64(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        })
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int64,
    i64 => Int64,
    u32 => UInt64,
    u64 => UInt64,
    f64 => Float64,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One result row, values in select-list order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Pair column labels with their values
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column labels as reported by the server
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at `idx`
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Drop the labels, keep the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
