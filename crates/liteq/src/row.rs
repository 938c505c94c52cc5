use std::ops::Index;

use indexmap::IndexMap;

pub use rusqlite::types::Value;

/// A single result row, materialised as an insertion-ordered map from
/// column name to [`Value`].
///
/// Columns keep the order the statement produced them in. When a statement
/// returns two columns with the same name, the later one wins.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    pub(crate) fn new(columns: IndexMap<String, Value>) -> Self {
        Self { columns }
    }

    /// The value of the named column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// The named column as an integer.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.columns.get(column)? {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The named column as a float.
    pub fn get_f64(&self, column: &str) -> Option<f64> {
        match self.columns.get(column)? {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// The named column as text.
    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.columns.get(column)? {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Column names, in statement order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, column: &str) -> &Value {
        self.columns
            .get(column)
            .unwrap_or_else(|| panic!("no column found for name: {column}"))
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}
