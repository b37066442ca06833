//! Per-row value computation and SQL construction.
//!
//! Rules are applied in declaration order over an evolving copy of the row,
//! so a later `FromRow` rule sees values written by earlier rules. The
//! resulting assignments become one `UPDATE` (in-place mode) or one
//! `INSERT ... SET` (migration mode) per row.

use crate::blueprint::Blueprint;
use crate::error::{CoreError, Result};
use crate::generator::{Generator, DEFAULT_OPTIONAL_WEIGHT};
use crate::row::RowSnapshot;
use crate::rule::ReplaceSource;
use crate::value::SqlValue;

/// Placeholder expanded to the row's 0-based ordinal within its table.
pub const ROW_TOKEN: &str = "#row#";

/// One computed set-clause: the column, its new value, and the optional raw
/// predicate gating the assignment.
#[derive(Debug, Clone)]
struct Assignment {
    column: String,
    value: SqlValue,
    where_sql: Option<String>,
}

/// The outcome of applying a blueprint's rules to one fetched row.
#[derive(Debug, Clone)]
pub struct ComputedRow {
    /// The row as fetched.
    pub before: RowSnapshot,
    /// The row after all rules applied.
    pub after: RowSnapshot,
    assignments: Vec<Assignment>,
}

/// Builds the streaming select for a blueprint.
///
/// The column list collapses to `*` when any rule needs the full row or when
/// `full_row` is forced (migration mode copies untouched columns and so
/// always needs everything); otherwise it is the primary key plus the rule
/// columns, de-duplicated in declaration order.
#[must_use]
pub fn select_statement(blueprint: &Blueprint, full_row: bool) -> String {
    let columns = if full_row || blueprint.needs_full_row() {
        String::from("*")
    } else {
        let mut columns: Vec<&str> = Vec::new();
        for key in &blueprint.primary {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
        for rule in &blueprint.columns {
            if !columns.contains(&rule.name.as_str()) {
                columns.push(&rule.name);
            }
        }
        columns.join(", ")
    };

    let mut sql = format!("SELECT {columns} FROM {table}", table = blueprint.table);
    if let Some(filter) = blueprint.combined_where() {
        sql.push_str(" WHERE ");
        sql.push_str(&filter);
    }
    sql
}

/// Applies the blueprint's rules, in declaration order, to one row.
///
/// `row_index` is the 0-based ordinal of the row within its table and feeds
/// `#row#` expansion in static and generator-returned text values.
pub fn apply_rules(
    blueprint: &Blueprint,
    row: &RowSnapshot,
    row_index: usize,
    generator: &mut dyn Generator,
) -> Result<ComputedRow> {
    let before = row.clone();
    let mut after = row.clone();
    let mut assignments = Vec::with_capacity(blueprint.columns.len());

    for rule in &blueprint.columns {
        let value = match &rule.source {
            ReplaceSource::FromRow(closure) => closure(&after, generator)?,
            ReplaceSource::Static(value) => expand_row_token(value.clone(), row_index),
            ReplaceSource::Closure(closure) => expand_row_token(closure(generator)?, row_index),
            ReplaceSource::Generated {
                kind,
                params,
                unique,
                optional,
                default_value,
                optional_weight,
            } => {
                if *optional
                    && generator.chance(optional_weight.unwrap_or(DEFAULT_OPTIONAL_WEIGHT))
                {
                    default_value.clone()
                } else {
                    expand_row_token(generator.request(kind, params, *unique)?, row_index)
                }
            }
        };

        after.set(&rule.name, value.clone());
        assignments.push(Assignment {
            column: rule.name.clone(),
            value,
            where_sql: rule.where_sql.clone(),
        });
    }

    Ok(ComputedRow {
        before,
        after,
        assignments,
    })
}

/// Builds the in-place mutation for one computed row.
///
/// Conditional rules compile to `col = (CASE WHEN <pred> THEN <new> ELSE col
/// END)` so non-matching rows keep their original value without being
/// excluded from the update. The row is identified by primary-key equality
/// against its pre-mutation values.
pub fn update_statement(blueprint: &Blueprint, computed: &ComputedRow) -> Result<String> {
    let set: Vec<String> = computed
        .assignments
        .iter()
        .map(|a| set_clause(a, None))
        .collect();

    Ok(format!(
        "UPDATE {table} SET {set} WHERE {filter}",
        table = blueprint.table,
        set = set.join(", "),
        filter = primary_key_filter(blueprint, &computed.before)?,
    ))
}

/// Builds the migration-mode insert for one computed row.
///
/// Every column not covered by a rule is copied verbatim from the source
/// (including `NULL`). A conditional rule cannot reference the destination
/// column inside an `INSERT`, so its `ELSE` arm carries the source value
/// instead.
#[must_use]
pub fn insert_statement(blueprint: &Blueprint, computed: &ComputedRow) -> String {
    let mut set: Vec<String> = Vec::with_capacity(computed.before.len());
    for (column, original) in computed.before.iter() {
        // Last-declared assignment wins for re-declared columns.
        let clause = computed
            .assignments
            .iter()
            .rev()
            .find(|a| a.column == column)
            .map_or_else(
                || format!("{column} = {}", original.to_sql_inline()),
                |a| set_clause(a, Some(original)),
            );
        set.push(clause);
    }

    format!(
        "INSERT INTO {table} SET {set}",
        table = blueprint.table,
        set = set.join(", "),
    )
}

fn set_clause(assignment: &Assignment, insert_fallback: Option<&SqlValue>) -> String {
    let new = assignment.value.to_sql_inline();
    assignment.where_sql.as_ref().map_or_else(
        || format!("{} = {new}", assignment.column),
        |predicate| {
            let otherwise = insert_fallback
                .map_or_else(|| assignment.column.clone(), SqlValue::to_sql_inline);
            format!(
                "{column} = (CASE WHEN {predicate} THEN {new} ELSE {otherwise} END)",
                column = assignment.column,
            )
        },
    )
}

fn primary_key_filter(blueprint: &Blueprint, before: &RowSnapshot) -> Result<String> {
    let mut parts = Vec::with_capacity(blueprint.primary.len());
    for key in &blueprint.primary {
        let value = before.get(key).ok_or_else(|| CoreError::MissingColumn {
            column: key.clone(),
        })?;
        parts.push(format!("{key} = {}", value.to_sql_inline()));
    }
    Ok(parts.join(" AND "))
}

fn expand_row_token(value: SqlValue, row_index: usize) -> SqlValue {
    match value {
        SqlValue::Text(s) if s.contains(ROW_TOKEN) => {
            SqlValue::Text(s.replace(ROW_TOKEN, &row_index.to_string()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Blueprint;
    use crate::generator::Generator;

    /// Deterministic generator: returns `<kind>-<n>` and a scripted chance.
    struct ScriptedGenerator {
        counter: usize,
        chance: bool,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                counter: 0,
                chance: false,
            }
        }
    }

    impl Generator for ScriptedGenerator {
        fn request(&mut self, kind: &str, _params: &[SqlValue], _unique: bool) -> Result<SqlValue> {
            self.counter += 1;
            Ok(SqlValue::Text(format!("{kind}-{}", self.counter)))
        }

        fn chance(&mut self, _weight: f64) -> bool {
            self.chance
        }
    }

    fn user_row() -> RowSnapshot {
        [
            (String::from("id"), SqlValue::Int(7)),
            (String::from("email"), SqlValue::from("real@corp.internal")),
            (String::from("note"), SqlValue::Null),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_select_minimal_column_list() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table.column("email").replace_with("x");
            table.column("id").replace_with_generated("uuid");
        });
        assert_eq!(select_statement(&blueprint, false), "SELECT id, email FROM users");
    }

    #[test]
    fn test_select_star_for_from_row_rules_and_migration() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table
                .column("created_at")
                .replace_by_fields(|row, _g| Ok(row.get("updated_at").cloned().unwrap()));
        });
        assert_eq!(select_statement(&blueprint, false), "SELECT * FROM users");

        let plain = Blueprint::build("app", "users", |table| {
            table.column("email").replace_with("x");
        });
        assert_eq!(select_statement(&plain, true), "SELECT * FROM users");
    }

    #[test]
    fn test_select_appends_global_where() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table.global_where("id != 10");
            table.column("email").replace_with("x");
        });
        assert_eq!(
            select_statement(&blueprint, false),
            "SELECT id, email FROM users WHERE (id != 10)"
        );
    }

    #[test]
    fn test_row_token_expansion() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table.column("email").replace_with("email_#row#@example.com");
        });
        let mut generator = ScriptedGenerator::new();

        for (index, expected) in [
            (0, "email_0@example.com"),
            (1, "email_1@example.com"),
        ] {
            let computed = apply_rules(&blueprint, &user_row(), index, &mut generator).unwrap();
            assert_eq!(
                computed.after.get("email"),
                Some(&SqlValue::from(expected))
            );
        }
    }

    #[test]
    fn test_update_statement_with_conditional_rule() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table
                .column("email")
                .where_sql("id != 1")
                .replace_with("masked@example.com");
        });
        let mut generator = ScriptedGenerator::new();
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(
            update_statement(&blueprint, &computed).unwrap(),
            "UPDATE users SET email = (CASE WHEN id != 1 THEN 'masked@example.com' ELSE email END) \
             WHERE id = 7"
        );
    }

    #[test]
    fn test_from_row_sees_earlier_rule_output() {
        // email is rewritten first, so the copy picks up the new value.
        let blueprint = Blueprint::build("app", "users", |table| {
            table.column("email").replace_with("x");
            table
                .column("note")
                .replace_by_fields(|row, _g| Ok(row.get("email").cloned().unwrap()));
        });
        let mut generator = ScriptedGenerator::new();
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(computed.after.get("note"), Some(&SqlValue::from("x")));

        // Declared the other way round, the copy sees the original value.
        let reversed = Blueprint::build("app", "users", |table| {
            table
                .column("note")
                .replace_by_fields(|row, _g| Ok(row.get("email").cloned().unwrap()));
            table.column("email").replace_with("x");
        });
        let computed = apply_rules(&reversed, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(
            computed.after.get("note"),
            Some(&SqlValue::from("real@corp.internal"))
        );
    }

    #[test]
    fn test_optional_rule_takes_default_when_chance_hits() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table
                .column("email")
                .replace_with_generated("email")
                .optional("nobody@example.com", Some(1.0));
        });
        let mut generator = ScriptedGenerator::new();
        generator.chance = true;
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(
            computed.after.get("email"),
            Some(&SqlValue::from("nobody@example.com"))
        );

        generator.chance = false;
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(computed.after.get("email"), Some(&SqlValue::from("email-1")));
    }

    #[test]
    fn test_insert_copies_untouched_columns_verbatim() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table.column("email").replace_with("masked@example.com");
        });
        let mut generator = ScriptedGenerator::new();
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(
            insert_statement(&blueprint, &computed),
            "INSERT INTO users SET id = 7, email = 'masked@example.com', note = NULL"
        );
    }

    #[test]
    fn test_insert_conditional_rule_falls_back_to_source_value() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table
                .column("email")
                .where_sql("id != 1")
                .replace_with("masked@example.com");
        });
        let mut generator = ScriptedGenerator::new();
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        assert_eq!(
            insert_statement(&blueprint, &computed),
            "INSERT INTO users SET id = 7, \
             email = (CASE WHEN id != 1 THEN 'masked@example.com' ELSE 'real@corp.internal' END), \
             note = NULL"
        );
    }

    #[test]
    fn test_composite_primary_key_filter() {
        let blueprint = Blueprint::build("app", "memberships", |table| {
            table.primary(["user_id", "group_id"]);
            table.column("joined_at").replace_with("2020-01-01");
        });
        let row: RowSnapshot = [
            (String::from("user_id"), SqlValue::Int(1)),
            (String::from("group_id"), SqlValue::Int(2)),
            (String::from("joined_at"), SqlValue::from("2024-05-05")),
        ]
        .into_iter()
        .collect();
        let mut generator = ScriptedGenerator::new();
        let computed = apply_rules(&blueprint, &row, 0, &mut generator).unwrap();
        assert_eq!(
            update_statement(&blueprint, &computed).unwrap(),
            "UPDATE memberships SET joined_at = '2020-01-01' WHERE user_id = 1 AND group_id = 2"
        );
    }

    #[test]
    fn test_missing_primary_key_column_is_an_error() {
        let blueprint = Blueprint::build("app", "users", |table| {
            table.primary(["missing"]);
            table.column("email").replace_with("x");
        });
        let mut generator = ScriptedGenerator::new();
        let computed = apply_rules(&blueprint, &user_row(), 0, &mut generator).unwrap();
        let err = update_statement(&blueprint, &computed).unwrap_err();
        assert!(matches!(err, CoreError::MissingColumn { .. }));
    }
}
