//! # cas-types
//!
//! Value types exchanged with a CAS broker and conversions to and from
//! native Rust types.
//!
//! Bind parameters are converted with [`ToValue`], column data is read back
//! with [`FromValue`]. Both directions go through the [`Value`] enum, which
//! mirrors the broker's type system.
//!
//! ## Example
//!
//! ```
//! use cas_types::{FromValue, ToValue, Value};
//!
//! let v = 42i32.to_value();
//! assert_eq!(v, Value::Int(42));
//!
//! let widened = i64::from_value(&v).unwrap();
//! assert_eq!(widened, 42);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod convert;
pub mod error;
pub mod value;

pub use convert::{FromValue, ToValue};
pub use error::TypeError;
pub use value::{Oid, Value, ValueType};
