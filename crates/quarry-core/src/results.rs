//! Tabular query results.
//!
//! Values are kept as the engine returned them: nullable strings. Converting
//! them to typed values is left to callers, guided by the column type tags.

use std::ops::{Bound, RangeBounds};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// One result row: an ordered sequence of nullable cell values.
pub type Row = Vec<Option<String>>;

// ---------------------------------------------------------------------------
// ResultSet
// ---------------------------------------------------------------------------

/// Results of one completed execution.
///
/// Invariant: every row has exactly as many cells as there are column names,
/// and there are exactly as many column types as column names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawResultSet")]
pub struct ResultSet {
    column_names: Vec<String>,
    column_types: Vec<String>,
    rows: Vec<Row>,
}

/// Deserialized form of [`ResultSet`], checked through [`ResultSet::new`].
#[derive(Deserialize)]
struct RawResultSet {
    column_names: Vec<String>,
    column_types: Vec<String>,
    rows: Vec<Row>,
}

impl TryFrom<RawResultSet> for ResultSet {
    type Error = CoreError;

    fn try_from(raw: RawResultSet) -> Result<Self, Self::Error> {
        Self::new(raw.column_names, raw.column_types, raw.rows)
    }
}

impl ResultSet {
    /// Creates a result set, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Format`] if the column types or any row do not
    /// match the number of column names.
    pub fn new(
        column_names: Vec<String>,
        column_types: Vec<String>,
        rows: Vec<Row>,
    ) -> Result<Self, CoreError> {
        let arity = column_names.len();
        if column_types.len() != arity {
            return Err(CoreError::Format(format!(
                "{} column types for {arity} columns",
                column_types.len()
            )));
        }
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != arity) {
            return Err(CoreError::Format(format!(
                "row {index} has {} values, expected {arity}",
                row.len()
            )));
        }
        Ok(Self {
            column_names,
            column_types,
            rows,
        })
    }

    /// Column names in result order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Column type tags in result order.
    pub fn column_types(&self) -> &[String] {
        &self.column_types
    }

    /// All rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns.
    pub fn arity(&self) -> usize {
        self.column_names.len()
    }

    /// Returns one row as `(column name, value)` pairs.
    pub fn record(&self, index: usize) -> Option<Vec<(&str, Option<&str>)>> {
        let row = self.rows.get(index)?;
        Some(
            self.column_names
                .iter()
                .zip(row)
                .map(|(name, value)| (name.as_str(), value.as_deref()))
                .collect(),
        )
    }

    /// Returns a new result set of the same shape holding the selected rows.
    ///
    /// Out-of-range bounds are clamped to the available rows.
    #[must_use]
    pub fn slice(&self, range: impl RangeBounds<usize>) -> ResultSet {
        let len = self.rows.len();
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&n) => n.saturating_add(1),
            Bound::Excluded(&n) => n,
            Bound::Unbounded => len,
        }
        .clamp(start, len);
        ResultSet {
            column_names: self.column_names.clone(),
            column_types: self.column_types.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    /// Consumes the result set, returning names, types and rows.
    pub fn into_parts(self) -> (Vec<String>, Vec<String>, Vec<Row>) {
        (self.column_names, self.column_types, self.rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
