//! Migration-mode schema transplant.
//!
//! Before any row is copied, every destination table in the migration set is
//! dropped in dependency order (dependents before dependencies, so no
//! destination foreign key is violated mid-drop) and recreated in reverse
//! order (referenced tables first) from the source's canonical creation
//! statement. Foreign-key constraint clauses referencing tables inside the
//! migration set are stripped from the recreated schema: those links are
//! re-established by post-row hooks, not by schema.

use std::collections::HashSet;

use dbmask_core::Blueprint;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;

/// Drops and recreates the destination schema for every table in `order`.
pub async fn transplant_schema<D: Database>(
    destination: &D,
    source: &D,
    blueprints: &[Blueprint],
    order: &[usize],
) -> Result<()> {
    let migration_set: HashSet<&str> = order
        .iter()
        .map(|&i| blueprints[i].table.as_str())
        .collect();

    for &i in order {
        let table = &blueprints[i].table;
        debug!(table = %table, "Dropping destination table");
        destination
            .execute(format!("DROP TABLE IF EXISTS {table}"))
            .await?;
    }

    for &i in order.iter().rev() {
        let table = &blueprints[i].table;
        let create = source.show_create_table(table).await?;
        let create = strip_foreign_keys(&create, &migration_set);
        debug!(table = %table, "Recreating destination table");
        destination.execute(create).await?;
    }

    info!(tables = order.len(), "Schema transplant complete");
    Ok(())
}

/// Removes foreign-key constraint clauses that reference tables in
/// `migration_set` from a `SHOW CREATE TABLE` statement.
///
/// Constraints referencing tables outside the set are kept as-is.
#[must_use]
pub fn strip_foreign_keys(create_sql: &str, migration_set: &HashSet<&str>) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut stripped = false;
    for line in create_sql.lines() {
        if is_stripped_constraint(line, migration_set) {
            stripped = true;
            continue;
        }
        kept.push(line);
    }
    if !stripped {
        return String::from(create_sql);
    }

    // Dropping a definition line can leave a dangling comma on the last
    // remaining definition before the closing paren.
    let mut out: Vec<String> = Vec::with_capacity(kept.len());
    for (i, line) in kept.iter().enumerate() {
        let next_closes = kept
            .get(i + 1)
            .is_some_and(|next| next.trim_start().starts_with(')'));
        if next_closes && line.trim_end().ends_with(',') {
            let trimmed = line.trim_end();
            out.push(String::from(&trimmed[..trimmed.len() - 1]));
        } else {
            out.push(String::from(*line));
        }
    }
    out.join("\n")
}

fn is_stripped_constraint(line: &str, migration_set: &HashSet<&str>) -> bool {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("CONSTRAINT") || !trimmed.contains("FOREIGN KEY") {
        return false;
    }
    referenced_table(trimmed).is_some_and(|table| migration_set.contains(table))
}

/// Extracts the table name following `REFERENCES`, with or without
/// backquotes.
fn referenced_table(line: &str) -> Option<&str> {
    let rest = line.split("REFERENCES").nth(1)?.trim_start();
    if let Some(rest) = rest.strip_prefix('`') {
        rest.split('`').next()
    } else {
        rest.split([' ', '(']).next()
    }
}
