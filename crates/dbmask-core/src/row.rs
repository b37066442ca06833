//! Row snapshots.
//!
//! A [`RowSnapshot`] is the ephemeral column-to-value mapping for one row:
//! the pre-mutation state fetched from the database, and the post-mutation
//! state after rule application. Hooks consume both, then the snapshots are
//! discarded.

use crate::value::SqlValue;

/// An ordered column-to-value mapping for a single row.
///
/// Column order matches the order values were inserted (for fetched rows,
/// the select's column order), which keeps generated statements stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSnapshot {
    entries: Vec<(String, SqlValue)>,
}

impl RowSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the value of a column, if present.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Sets a column value, inserting it if absent.
    pub fn set(&mut self, column: &str, value: SqlValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| name == column) {
            entry.1 = value;
        } else {
            self.entries.push((String::from(column), value));
        }
    }

    /// Iterates over `(column, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for RowSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (column, value) in iter {
            row.set(&column, value);
        }
        row
    }
}
