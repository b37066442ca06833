//! Table blueprints.
//!
//! A [`Blueprint`] is the immutable description of how one table's rows are
//! rewritten: primary key, global row filter, ordered column rules, post-row
//! hooks, and declared table dependencies. It is produced by one build pass
//! over a [`BlueprintBuilder`], driven by a single user callback.
//!
//! Column rules are opened through an explicit [`ColumnRuleBuilder`] handle
//! returned by [`BlueprintBuilder::column`]; the rule is committed into the
//! blueprint's column sequence when the handle is dropped with a value
//! source set. A handle that never receives a value source commits nothing.

use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::generator::Generator;
use crate::row::RowSnapshot;
use crate::rule::{ColumnRule, GenFn, ReplaceSource, RowFn};
use crate::value::SqlValue;

/// Closure run after a row's own mutation; receives the pre- and
/// post-mutation snapshots and returns auxiliary statements to execute.
pub type HookFn =
    Arc<dyn Fn(&RowSnapshot, &RowSnapshot, &mut dyn Generator) -> Result<Vec<String>> + Send + Sync>;

/// Immutable description of one table's anonymization.
#[derive(Clone)]
pub struct Blueprint {
    /// Owning schema name, used to qualify cross-table references.
    pub database: String,
    /// The table being described.
    pub table: String,
    /// Identity columns used in `WHERE` clauses for in-place updates.
    pub primary: Vec<String>,
    /// Accumulated raw global filters, ANDed together at read time.
    pub global_where: Vec<String>,
    /// Column rules in application order.
    pub columns: Vec<ColumnRule>,
    /// Post-row hooks in registration order.
    pub after: Vec<HookFn>,
    /// Tables that must be fully processed before this one.
    pub dependencies: Vec<String>,
}

impl Blueprint {
    /// Builds a blueprint by running `callback` once over a fresh builder.
    pub fn build<F>(database: &str, table: &str, callback: F) -> Self
    where
        F: FnOnce(&mut BlueprintBuilder),
    {
        let mut builder = BlueprintBuilder::new(database, table);
        callback(&mut builder);
        builder.finish()
    }

    /// Returns the combined global filter, if any was declared.
    #[must_use]
    pub fn combined_where(&self) -> Option<String> {
        if self.global_where.is_empty() {
            None
        } else {
            Some(
                self.global_where
                    .iter()
                    .map(|w| format!("({w})"))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            )
        }
    }

    /// Returns whether any rule needs the full row fetched.
    #[must_use]
    pub fn needs_full_row(&self) -> bool {
        self.columns.iter().any(ColumnRule::needs_full_row)
    }
}

impl std::fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blueprint")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("primary", &self.primary)
            .field("global_where", &self.global_where)
            .field("columns", &self.columns)
            .field("hooks", &self.after.len())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Mutable state for one blueprint build pass.
pub struct BlueprintBuilder {
    database: String,
    table: String,
    default_primary: Vec<String>,
    primary: Option<Vec<String>>,
    global_where: Vec<String>,
    columns: Vec<ColumnRule>,
    after: Vec<HookFn>,
    dependencies: Vec<String>,
}

impl BlueprintBuilder {
    /// Creates a builder with the conventional `id` default primary key.
    #[must_use]
    pub fn new(database: &str, table: &str) -> Self {
        Self::with_default_primary(database, table, vec![String::from("id")])
    }

    /// Creates a builder with an explicit default primary key, applied at
    /// [`finish`](Self::finish) time if [`primary`](Self::primary) was never
    /// called.
    #[must_use]
    pub fn with_default_primary(database: &str, table: &str, default_primary: Vec<String>) -> Self {
        Self {
            database: String::from(database),
            table: String::from(table),
            default_primary,
            primary: None,
            global_where: Vec::new(),
            columns: Vec::new(),
            after: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Sets the identity columns used for in-place updates.
    pub fn primary<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Appends to the table-wide row filter. Multiple calls accumulate and
    /// are ANDed together when the select is built.
    pub fn global_where(&mut self, raw_sql: &str) -> &mut Self {
        self.global_where.push(String::from(raw_sql));
        self
    }

    /// Declares that `table` must be fully processed before this one.
    pub fn depends_on(&mut self, table: &str) -> &mut Self {
        self.push_dependency(table);
        self
    }

    /// Opens a rule for `column`, returning the handle that configures it.
    pub fn column(&mut self, name: &str) -> ColumnRuleBuilder<'_> {
        ColumnRuleBuilder {
            builder: self,
            name: String::from(name),
            where_sql: None,
            source: None,
            sync_targets: Vec::new(),
        }
    }

    /// Registers a post-row hook and merges its extra dependencies.
    pub fn after_update<F, I, S>(&mut self, hook: F, extra_dependencies: I) -> &mut Self
    where
        F: Fn(&RowSnapshot, &RowSnapshot, &mut dyn Generator) -> Result<Vec<String>>
            + Send
            + Sync
            + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.push(Arc::new(hook));
        for dependency in extra_dependencies {
            self.push_dependency(&dependency.into());
        }
        self
    }

    /// Finalizes the build, defaulting the primary key if unset.
    #[must_use]
    pub fn finish(self) -> Blueprint {
        Blueprint {
            database: self.database,
            table: self.table,
            primary: self.primary.unwrap_or(self.default_primary),
            global_where: self.global_where,
            columns: self.columns,
            after: self.after,
            dependencies: self.dependencies,
        }
    }

    fn push_dependency(&mut self, table: &str) {
        if table != self.table && !self.dependencies.iter().any(|d| d == table) {
            self.dependencies.push(String::from(table));
        }
    }
}

/// A column synchronization target: propagate the rewritten value of this
/// column into `database.table.field` once the row's own mutation lands.
#[derive(Debug, Clone)]
struct SyncTarget {
    field: String,
    table: String,
    database: Option<String>,
}

/// Handle onto one in-progress column rule.
///
/// The rule is committed when the handle drops, provided a value source was
/// set. Re-declaring a column name is not validated; set-clauses are emitted
/// per occurrence, so the last one wins at SQL-build time.
pub struct ColumnRuleBuilder<'a> {
    builder: &'a mut BlueprintBuilder,
    name: String,
    where_sql: Option<String>,
    source: Option<ReplaceSource>,
    sync_targets: Vec<SyncTarget>,
}

impl ColumnRuleBuilder<'_> {
    /// Attaches a raw conditional filter: rows outside it keep their
    /// original value for this column.
    #[must_use]
    pub fn where_sql(mut self, raw_sql: &str) -> Self {
        self.where_sql = Some(String::from(raw_sql));
        self
    }

    /// Replaces the column with a static value.
    #[must_use]
    pub fn replace_with<V: Into<SqlValue>>(mut self, value: V) -> Self {
        self.source = Some(ReplaceSource::Static(value.into()));
        self
    }

    /// Replaces the column with the result of a generator closure.
    #[must_use]
    pub fn replace_with_fn<F>(mut self, closure: F) -> Self
    where
        F: Fn(&mut dyn Generator) -> Result<SqlValue> + Send + Sync + 'static,
    {
        let closure: GenFn = Arc::new(closure);
        self.source = Some(ReplaceSource::Closure(closure));
        self
    }

    /// Replaces the column with a generated value of the given kind.
    ///
    /// Uniqueness, parameters and optionality are configured through
    /// [`unique`](Self::unique), [`params`](Self::params) and
    /// [`optional`](Self::optional).
    #[must_use]
    pub fn replace_with_generated(mut self, kind: &str) -> Self {
        self.source = Some(ReplaceSource::Generated {
            kind: String::from(kind),
            params: Vec::new(),
            unique: false,
            optional: false,
            default_value: SqlValue::Null,
            optional_weight: None,
        });
        self
    }

    /// Forwards extra parameters with each generator request.
    #[must_use]
    pub fn params(mut self, values: Vec<SqlValue>) -> Self {
        if let Some(ReplaceSource::Generated { params, .. }) = &mut self.source {
            *params = values;
        }
        self
    }

    /// Demands that generated values never repeat within the run.
    #[must_use]
    pub fn unique(mut self) -> Self {
        if let Some(ReplaceSource::Generated { unique, .. }) = &mut self.source {
            *unique = true;
        }
        self
    }

    /// Makes the generated value optional: with probability `weight` (the
    /// generator's default rate when `None`) the rule yields `default`
    /// instead of a generated value.
    #[must_use]
    pub fn optional<V: Into<SqlValue>>(mut self, default: V, weight: Option<f64>) -> Self {
        if let Some(ReplaceSource::Generated {
            optional,
            default_value,
            optional_weight,
            ..
        }) = &mut self.source
        {
            *optional = true;
            *default_value = default.into();
            *optional_weight = weight;
        }
        self
    }

    /// Replaces the column with a value computed from the full row (as
    /// mutated by earlier-declared rules) plus the generator.
    #[must_use]
    pub fn replace_by_fields<F>(mut self, closure: F) -> Self
    where
        F: Fn(&RowSnapshot, &mut dyn Generator) -> Result<SqlValue> + Send + Sync + 'static,
    {
        let closure: RowFn = Arc::new(closure);
        self.source = Some(ReplaceSource::FromRow(closure));
        self
    }

    /// Propagates this column's rewritten value into a dependent column
    /// once the row's own mutation lands.
    ///
    /// Expands into a post-row hook (`UPDATE target SET field = new WHERE
    /// field = old`) and adds the target table to the blueprint's
    /// dependencies. `database` defaults to the blueprint's own schema.
    #[must_use]
    pub fn synchronize_column(
        mut self,
        field: &str,
        table: Option<&str>,
        database: Option<&str>,
    ) -> Self {
        self.sync_targets.push(SyncTarget {
            field: String::from(field),
            table: table.map_or_else(|| self.builder.table.clone(), String::from),
            database: database.map(String::from),
        });
        self
    }
}

impl Drop for ColumnRuleBuilder<'_> {
    fn drop(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);

        self.builder.columns.push(ColumnRule {
            name: name.clone(),
            where_sql: self.where_sql.take(),
            source,
        });

        let targets = std::mem::take(&mut self.sync_targets);
        if targets.is_empty() {
            return;
        }
        for target in &targets {
            self.builder.push_dependency(&target.table);
        }
        let own_database = self.builder.database.clone();
        let hook: HookFn = Arc::new(move |before, after, _generator| {
            let old = before.get(&name).ok_or_else(|| CoreError::MissingColumn {
                column: name.clone(),
            })?;
            let new = after.get(&name).ok_or_else(|| CoreError::MissingColumn {
                column: name.clone(),
            })?;
            Ok(targets
                .iter()
                .map(|t| {
                    let database = t.database.as_deref().unwrap_or(&own_database);
                    format!(
                        "UPDATE {database}.{table} SET {field} = {new} WHERE {field} = {old}",
                        table = t.table,
                        field = t.field,
                        new = new.to_sql_inline(),
                        old = old.to_sql_inline(),
                    )
                })
                .collect())
        });
        self.builder.after.push(hook);
    }
}
