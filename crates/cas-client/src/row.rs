//! Row representation for fetched results.
//!
//! Rows are 0-indexed, like slices. The statement-level accessors on
//! [`Driver`](crate::Driver) are 1-based.

use std::sync::Arc;

use cas_protocol::ColumnInfo;
use cas_types::{FromValue, TypeError, Value};

/// One fetched row with its column metadata.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[ColumnInfo]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get a value by 0-based column index.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, TypeError> {
        let value = self.values.get(index).ok_or_else(|| {
            TypeError::InvalidValue(format!(
                "column index {index} out of range, row has {} columns",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Get a value by column label (case-insensitive).
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .position(name)
            .ok_or_else(|| TypeError::InvalidValue(format!("no column named '{name}'")))?;
        self.get(index)
    }

    /// Get a value, or `None` if it is NULL, missing or not convertible.
    pub fn try_get<T: FromValue>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_value_nullable(v).ok().flatten())
    }

    /// Get the raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get the raw value by column label.
    #[must_use]
    pub fn get_raw_by_name(&self, name: &str) -> Option<&Value> {
        self.position(name).and_then(|i| self.values.get(i))
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ColumnInfo, &Value)> {
        self.columns.iter().zip(self.values.iter())
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cas_types::ValueType;

    fn sample() -> Row {
        let columns: Arc<[ColumnInfo]> = vec![
            ColumnInfo::new("id", ValueType::Int),
            ColumnInfo::new("Name", ValueType::String),
        ]
        .into();
        Row::new(columns, vec![Value::Int(7), Value::Null])
    }

    #[test]
    fn test_get_by_index_and_name() {
        let row = sample();
        assert_eq!(row.get::<i32>(0).unwrap(), 7);
        assert_eq!(row.get_by_name::<i64>("ID").unwrap(), 7);
        assert_eq!(row.get_by_name::<Option<String>>("name").unwrap(), None);
        assert!(row.get::<i32>(5).is_err());
        assert!(row.get_by_name::<i32>("missing").is_err());
    }

    #[test]
    fn test_try_get_null() {
        let row = sample();
        assert_eq!(row.try_get::<String>(1), None);
        assert_eq!(row.try_get::<i32>(0), Some(7));
        assert_eq!(row.get_raw_by_name("name"), Some(&Value::Null));
        assert_eq!(row.len(), 2);
        assert_eq!(row.iter().count(), 2);
    }
}
