//! JSON run-spec loading.
//!
//! A run spec is one JSON document carrying the connection settings plus the
//! per-table blueprints, for runs that do not need the programmatic builder
//! API. Field-derived rules close over Rust code and have no JSON encoding;
//! a `"type": "fields"` column is rejected with a pointed error instead of
//! being silently dropped.
//!
//! Tables are keyed by name in a sorted map so two loads of the same file
//! always register blueprints in the same order.

use std::collections::BTreeMap;
use std::path::Path;

use dbmask_core::blueprint::BlueprintBuilder;
use dbmask_core::{Blueprint, SqlValue};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::Config;
use crate::error::{EngineError, Result};

#[derive(Debug, Deserialize)]
struct SpecFile {
    #[serde(flatten)]
    config: Config,
    #[serde(default)]
    tables: BTreeMap<String, TableSpec>,
}

#[derive(Debug, Deserialize)]
struct TableSpec {
    /// Identity columns; the conventional `id` when absent.
    primary: Option<Vec<String>>,
    #[serde(default, rename = "where")]
    where_sql: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    columns: Vec<ColumnSpec>,
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    #[serde(rename = "type")]
    kind: RuleKind,
    /// Static value for `static` rules, generator kind for `generator`.
    #[serde(default)]
    value: JsonValue,
    #[serde(default)]
    params: Vec<JsonValue>,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    default_value: JsonValue,
    optional_weight: Option<f64>,
    #[serde(rename = "where")]
    where_sql: Option<String>,
    #[serde(default)]
    synchronize: Vec<SyncSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RuleKind {
    Static,
    Generator,
    Fields,
}

#[derive(Debug, Deserialize)]
struct SyncSpec {
    column: String,
    table: Option<String>,
    database: Option<String>,
}

/// Loads a run spec from disk and validates its connection settings.
pub fn load_spec_file(path: &Path) -> Result<(Config, Vec<Blueprint>)> {
    let text = std::fs::read_to_string(path)?;
    load_spec(&text)
}

/// Parses a run spec, returning the validated config and the blueprints in
/// table-name order.
pub fn load_spec(text: &str) -> Result<(Config, Vec<Blueprint>)> {
    let spec: SpecFile = serde_json::from_str(text)?;
    spec.config.validate()?;

    let mut blueprints = Vec::with_capacity(spec.tables.len());
    for (table, table_spec) in &spec.tables {
        debug!(table = %table, columns = table_spec.columns.len(), "Loaded table spec");
        blueprints.push(build_table(&spec.config, table, table_spec)?);
    }
    Ok((spec.config, blueprints))
}

fn build_table(config: &Config, table: &str, spec: &TableSpec) -> Result<Blueprint> {
    let mut builder = BlueprintBuilder::new(&config.connection.database, table);
    if let Some(primary) = &spec.primary {
        builder.primary(primary.clone());
    }
    for clause in &spec.where_sql {
        builder.global_where(clause);
    }
    for dependency in &spec.depends_on {
        builder.depends_on(dependency);
    }
    for column in &spec.columns {
        apply_column(&mut builder, table, column)?;
    }
    Ok(builder.finish())
}

fn apply_column(builder: &mut BlueprintBuilder, table: &str, spec: &ColumnSpec) -> Result<()> {
    let mut rule = builder.column(&spec.name);
    if let Some(predicate) = &spec.where_sql {
        rule = rule.where_sql(predicate);
    }

    rule = match spec.kind {
        RuleKind::Static => rule.replace_with(scalar(&spec.value, table, &spec.name)?),
        RuleKind::Generator => {
            let JsonValue::String(kind) = &spec.value else {
                return Err(EngineError::Spec(format!(
                    "{table}.{}: generator rule needs a string `value` naming the kind",
                    spec.name
                )));
            };
            let mut rule = rule.replace_with_generated(kind);
            if !spec.params.is_empty() {
                let params = spec
                    .params
                    .iter()
                    .map(|p| scalar(p, table, &spec.name))
                    .collect::<Result<Vec<SqlValue>>>()?;
                rule = rule.params(params);
            }
            if spec.unique {
                rule = rule.unique();
            }
            if spec.optional {
                rule = rule.optional(
                    scalar(&spec.default_value, table, &spec.name)?,
                    spec.optional_weight,
                );
            }
            rule
        }
        RuleKind::Fields => {
            return Err(EngineError::Spec(format!(
                "{table}.{}: field-derived rules close over code and cannot be \
                 expressed in a spec file; register this table through the builder API",
                spec.name
            )));
        }
    };

    for sync in &spec.synchronize {
        rule = rule.synchronize_column(&sync.column, sync.table.as_deref(), sync.database.as_deref());
    }
    drop(rule);
    Ok(())
}

fn scalar(value: &JsonValue, table: &str, column: &str) -> Result<SqlValue> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::Int(i64::from(*b))),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(SqlValue::Uint(u))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Float(f))
            } else {
                Err(EngineError::Spec(format!(
                    "{table}.{column}: numeric value out of range"
                )))
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(EngineError::Spec(format!(
            "{table}.{column}: expected a scalar value"
        ))),
    }
}
