//! Conversions between [`Value`] and Rust types.

use bytes::Bytes;

use crate::error::TypeError;
use crate::value::{Oid, Value};

/// Read a Rust value out of a broker [`Value`].
pub trait FromValue: Sized {
    /// Convert from a non-NULL value.
    fn from_value(value: &Value) -> Result<Self, TypeError>;

    /// Convert from a value that may be NULL.
    fn from_value_nullable(value: &Value) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_value(value).map(Some)
        }
    }
}

/// Turn a Rust value into a broker [`Value`] for binding.
pub trait ToValue {
    /// Convert to a value.
    fn to_value(&self) -> Value;
}

fn mismatch(expected: &'static str, value: &Value) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.type_name().to_string(),
        }
    }
}

fn parse_text<T: std::str::FromStr>(target: &'static str, text: &str) -> Result<T, TypeError> {
    text.trim()
        .parse()
        .map_err(|_| TypeError::InvalidValue(format!("cannot convert '{text}' to {target}")))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        Ok(value.clone())
    }

    fn from_value_nullable(value: &Value) -> Result<Option<Self>, TypeError> {
        Ok(Some(value.clone()))
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Short(v) => Ok(*v),
            Value::Int(v) => i16::try_from(*v).map_err(|_| TypeError::OutOfRange { target: "i16" }),
            Value::BigInt(v) => {
                i16::try_from(*v).map_err(|_| TypeError::OutOfRange { target: "i16" })
            }
            Value::String(s) | Value::Numeric(s) => parse_text("i16", s),
            _ => Err(mismatch("i16", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Short(v) => Ok(i32::from(*v)),
            Value::Int(v) => Ok(*v),
            Value::BigInt(v) => {
                i32::try_from(*v).map_err(|_| TypeError::OutOfRange { target: "i32" })
            }
            Value::String(s) | Value::Numeric(s) => parse_text("i32", s),
            _ => Err(mismatch("i32", value)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Short(v) => Ok(i64::from(*v)),
            Value::Int(v) => Ok(i64::from(*v)),
            Value::BigInt(v) => Ok(*v),
            Value::String(s) | Value::Numeric(s) => parse_text("i64", s),
            _ => Err(mismatch("i64", value)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Short(v) => Ok(f32::from(*v)),
            Value::String(s) | Value::Numeric(s) => parse_text("f32", s),
            _ => Err(mismatch("f32", value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Double(v) => Ok(*v),
            Value::Float(v) => Ok(f64::from(*v)),
            Value::Short(v) => Ok(f64::from(*v)),
            Value::Int(v) => Ok(f64::from(*v)),
            Value::String(s) | Value::Numeric(s) => parse_text("f64", s),
            _ => Err(mismatch("f64", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Null => Err(TypeError::UnexpectedNull),
            Value::String(s) | Value::Numeric(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            _ => Err(mismatch("bytes", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        Bytes::from_value(value).map(|b| b.to_vec())
    }
}

impl FromValue for Oid {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Oid(oid) => Ok(*oid),
            Value::String(s) => s.parse(),
            _ => Err(mismatch("oid", value)),
        }
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Collection(items) => Ok(items.clone()),
            _ => Err(mismatch("collection", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        T::from_value_nullable(value)
    }
}

#[cfg(feature = "chrono")]
impl FromValue for chrono::NaiveDate {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::Timestamp(ts) => Ok(ts.date()),
            _ => Err(mismatch("date", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromValue for chrono::NaiveTime {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Time(t) => Ok(*t),
            Value::Timestamp(ts) => Ok(ts.time()),
            _ => Err(mismatch("time", value)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Date(d) => Ok(d.and_time(chrono::NaiveTime::MIN)),
            _ => Err(mismatch("timestamp", value)),
        }
    }
}

#[cfg(feature = "decimal")]
impl FromValue for rust_decimal::Decimal {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Numeric(s) | Value::String(s) => parse_text("decimal", s),
            Value::Short(v) => Ok(Self::from(*v)),
            Value::Int(v) => Ok(Self::from(*v)),
            Value::BigInt(v) => Ok(Self::from(*v)),
            _ => Err(mismatch("decimal", value)),
        }
    }
}

macro_rules! to_value {
    ($ty:ty, $variant:ident) => {
        impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::$variant(self.clone())
            }
        }
    };
}

to_value!(i16, Short);
to_value!(i32, Int);
to_value!(i64, BigInt);
to_value!(f32, Float);
to_value!(f64, Double);
to_value!(String, String);
to_value!(Bytes, Bytes);
to_value!(Oid, Oid);
to_value!(Vec<Value>, Collection);

#[cfg(feature = "chrono")]
to_value!(chrono::NaiveDate, Date);
#[cfg(feature = "chrono")]
to_value!(chrono::NaiveTime, Time);
#[cfg(feature = "chrono")]
to_value!(chrono::NaiveDateTime, Timestamp);

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Value {
        Value::String((*self).to_string())
    }
}

impl ToValue for [u8] {
    fn to_value(&self) -> Value {
        Value::Bytes(Bytes::copy_from_slice(self))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

#[cfg(feature = "decimal")]
impl ToValue for rust_decimal::Decimal {
    fn to_value(&self) -> Value {
        Value::Numeric(self.to_string())
    }
}
