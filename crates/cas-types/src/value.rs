//! Broker value representation.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::TypeError;

/// A single value as carried by the broker protocol.
///
/// Values are used both for bound statement parameters and for column data
/// fetched from a result set.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// SQL NULL.
    Null,
    /// SHORT (16-bit integer).
    Short(i16),
    /// INT (32-bit integer).
    Int(i32),
    /// BIGINT (64-bit integer).
    BigInt(i64),
    /// FLOAT (single precision).
    Float(f32),
    /// DOUBLE (double precision).
    Double(f64),
    /// NUMERIC, kept in its exact textual form.
    Numeric(String),
    /// CHAR / VARCHAR / STRING.
    String(String),
    /// BIT / VARBIT.
    Bytes(Bytes),
    /// DATE.
    #[cfg(feature = "chrono")]
    Date(chrono::NaiveDate),
    /// TIME.
    #[cfg(feature = "chrono")]
    Time(chrono::NaiveTime),
    /// TIMESTAMP / DATETIME.
    #[cfg(feature = "chrono")]
    Timestamp(chrono::NaiveDateTime),
    /// SET / MULTISET / SEQUENCE.
    Collection(Vec<Value>),
    /// Object identifier.
    Oid(Oid),
}

/// Type tag of a [`Value`] or a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ValueType {
    /// NULL literal.
    Null,
    /// SHORT.
    Short,
    /// INT.
    Int,
    /// BIGINT.
    BigInt,
    /// FLOAT.
    Float,
    /// DOUBLE.
    Double,
    /// NUMERIC.
    Numeric,
    /// Character string.
    String,
    /// Bit string.
    Bytes,
    /// DATE.
    Date,
    /// TIME.
    Time,
    /// TIMESTAMP / DATETIME.
    Timestamp,
    /// Collection.
    Collection,
    /// Object identifier.
    Oid,
    /// Binary large object.
    Blob,
    /// Character large object.
    Clob,
}

impl ValueType {
    /// Get the SQL type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Short => "SHORT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Numeric => "NUMERIC",
            Self::String => "STRING",
            Self::Bytes => "VARBIT",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Collection => "SEQUENCE",
            Self::Oid => "OBJECT",
            Self::Blob => "BLOB",
            Self::Clob => "CLOB",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Check whether the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type tag of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Short(_) => ValueType::Short,
            Self::Int(_) => ValueType::Int,
            Self::BigInt(_) => ValueType::BigInt,
            Self::Float(_) => ValueType::Float,
            Self::Double(_) => ValueType::Double,
            Self::Numeric(_) => ValueType::Numeric,
            Self::String(_) => ValueType::String,
            Self::Bytes(_) => ValueType::Bytes,
            #[cfg(feature = "chrono")]
            Self::Date(_) => ValueType::Date,
            #[cfg(feature = "chrono")]
            Self::Time(_) => ValueType::Time,
            #[cfg(feature = "chrono")]
            Self::Timestamp(_) => ValueType::Timestamp,
            Self::Collection(_) => ValueType::Collection,
            Self::Oid(_) => ValueType::Oid,
        }
    }

    /// Get the SQL type name of this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Numeric(v) | Self::String(v) => f.write_str(v),
            Self::Bytes(v) => {
                for b in v.iter() {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            #[cfg(feature = "chrono")]
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            #[cfg(feature = "chrono")]
            Self::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            #[cfg(feature = "chrono")]
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.3f")),
            Self::Collection(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Self::Oid(oid) => write!(f, "{oid}"),
        }
    }
}

/// Object identifier: page, slot and volume of a stored object.
///
/// The textual form is `@page|slot|volume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid {
    /// Page id.
    pub page_id: i32,
    /// Slot id within the page.
    pub slot_id: i16,
    /// Volume id.
    pub vol_id: i16,
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}|{}|{}", self.page_id, self.slot_id, self.vol_id)
    }
}

impl FromStr for Oid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidValue(format!("invalid oid string '{s}'"));

        let body = s.strip_prefix('@').ok_or_else(invalid)?;
        let mut parts = body.split('|');
        let page_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let slot_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let vol_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            page_id,
            slot_id,
            vol_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_names() {
        assert_eq!(Value::Null.type_name(), "NULL");
        assert_eq!(Value::Int(1).type_name(), "INT");
        assert_eq!(Value::String("x".into()).value_type(), ValueType::String);
        assert!(Value::Null.is_null());
        assert!(!Value::Short(0).is_null());
    }

    #[test]
    fn test_oid_parse_and_display() {
        let oid: Oid = "@620|3|0".parse().unwrap();
        assert_eq!(oid.page_id, 620);
        assert_eq!(oid.slot_id, 3);
        assert_eq!(oid.vol_id, 0);
        assert_eq!(oid.to_string(), "@620|3|0");
    }

    #[test]
    fn test_oid_rejects_malformed() {
        assert!("620|3|0".parse::<Oid>().is_err());
        assert!("@620|3".parse::<Oid>().is_err());
        assert!("@620|3|0|1".parse::<Oid>().is_err());
        assert!("@a|b|c".parse::<Oid>().is_err());
    }

    #[test]
    fn test_collection_display() {
        let v = Value::Collection(vec![Value::Int(1), Value::String("a".into())]);
        assert_eq!(v.to_string(), "{1, a}");
    }
}
