//! Column rules.
//!
//! Each rule targets one column and carries exactly one value source,
//! expressed as a tagged variant so a single evaluator can dispatch on it.

use std::sync::Arc;

use crate::error::Result;
use crate::generator::Generator;
use crate::row::RowSnapshot;
use crate::value::SqlValue;

/// Closure producing a value from the generator alone.
pub type GenFn = Arc<dyn Fn(&mut dyn Generator) -> Result<SqlValue> + Send + Sync>;

/// Closure producing a value from the full row plus the generator.
pub type RowFn = Arc<dyn Fn(&RowSnapshot, &mut dyn Generator) -> Result<SqlValue> + Send + Sync>;

/// Where a rule's replacement value comes from.
#[derive(Clone)]
pub enum ReplaceSource {
    /// A fixed value, used verbatim (after `#row#` expansion for text).
    Static(SqlValue),
    /// A user closure over the generator.
    Closure(GenFn),
    /// A generator request described declaratively.
    Generated {
        /// Semantic kind passed to the generator (`email`, `uuid`, ...).
        kind: String,
        /// Extra parameters forwarded to the generator.
        params: Vec<SqlValue>,
        /// Demand that the generator never repeats a value for this kind.
        unique: bool,
        /// Sometimes yield `default_value` instead of generating.
        optional: bool,
        /// Value used when the optional branch is taken.
        default_value: SqlValue,
        /// Probability of the optional branch; generator default when unset.
        optional_weight: Option<f64>,
    },
    /// A user closure over the full (possibly already mutated) row.
    FromRow(RowFn),
}

impl std::fmt::Debug for ReplaceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Closure(_) => f.write_str("Closure(..)"),
            Self::Generated { kind, unique, .. } => f
                .debug_struct("Generated")
                .field("kind", kind)
                .field("unique", unique)
                .finish_non_exhaustive(),
            Self::FromRow(_) => f.write_str("FromRow(..)"),
        }
    }
}

/// A single column rewrite rule.
#[derive(Debug, Clone)]
pub struct ColumnRule {
    /// Target column.
    pub name: String,
    /// Optional raw row filter; when present the rewrite is expressed as a
    /// conditional assignment, not a row exclusion.
    pub where_sql: Option<String>,
    /// The value source.
    pub source: ReplaceSource,
}

impl ColumnRule {
    /// Returns whether this rule needs the full row to compute its value.
    #[must_use]
    pub const fn needs_full_row(&self) -> bool {
        matches!(self.source, ReplaceSource::FromRow(_))
    }
}
