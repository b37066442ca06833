//! The anonymization run controller.
//!
//! Tables are processed strictly in dependency order, never interleaved.
//! Within a table, rows are fetched in cursor order off a streaming select
//! and each row's mutation (plus its post-row hook statements) is submitted
//! as one independent asynchronous unit. The engine counts in-flight units;
//! once the count exceeds the configured threshold it stops issuing rows and
//! drains every outstanding unit before continuing, which bounds memory and
//! connection contention on very large tables.
//!
//! Any statement or generator error aborts the whole run. There is no retry
//! and no partial-table resume; the table is left partially mutated.

use dbmask_core::blueprint::BlueprintBuilder;
use dbmask_core::schedule::processing_order;
use dbmask_core::{statement, Blueprint, FakeGenerator, Generator};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::transplant::transplant_schema;

/// Produces a fresh generator; invoked once per table so uniqueness
/// tracking never leaks across tables.
pub type GeneratorFactory = Box<dyn Fn() -> Box<dyn Generator> + Send + Sync>;

/// The anonymization engine.
///
/// In-place mode mutates rows through `destination`. Migration mode (a
/// `source` database is present) recreates the schema at `destination` and
/// inserts transformed rows read from `source`.
pub struct Anonymizer<D: Database> {
    config: Config,
    destination: D,
    source: Option<D>,
    blueprints: Vec<Blueprint>,
    make_generator: GeneratorFactory,
}

impl<D: Database> Anonymizer<D> {
    /// Creates an engine with the default locale-bound generator.
    #[must_use]
    pub fn new(config: Config, destination: D, source: Option<D>) -> Self {
        let locale = config.locale.clone();
        Self {
            config,
            destination,
            source,
            blueprints: Vec::new(),
            make_generator: Box::new(move || Box::new(FakeGenerator::new(&locale))),
        }
    }

    /// Replaces the generator factory (tests, custom providers).
    #[must_use]
    pub fn with_generator_factory(mut self, factory: GeneratorFactory) -> Self {
        self.make_generator = factory;
        self
    }

    /// Describes a table with a build callback.
    pub fn table<F>(&mut self, name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut BlueprintBuilder),
    {
        let blueprint = Blueprint::build(&self.config.connection.database, name, callback);
        self.add_blueprint(blueprint);
        self
    }

    /// Registers an already-built blueprint.
    pub fn add_blueprint(&mut self, blueprint: Blueprint) -> &mut Self {
        self.blueprints.push(blueprint);
        self
    }

    /// Returns the registered blueprints in declaration order.
    #[must_use]
    pub fn blueprints(&self) -> &[Blueprint] {
        &self.blueprints
    }

    /// Performs the anonymization run.
    ///
    /// A dependency cycle is detected here, before anything is touched. No
    /// re-enabling of integrity checks happens at the end; the pool is torn
    /// down with the process.
    pub async fn run(&self) -> Result<()> {
        let order = processing_order(&self.blueprints)?;

        self.destination.disable_foreign_key_checks().await?;
        if let Some(source) = &self.source {
            source.disable_foreign_key_checks().await?;
            transplant_schema(&self.destination, source, &self.blueprints, &order).await?;
        }

        for &i in &order {
            self.process_table(&self.blueprints[i]).await?;
        }

        info!(tables = order.len(), "Run complete");
        Ok(())
    }

    async fn process_table(&self, blueprint: &Blueprint) -> Result<()> {
        let migration = self.source.is_some();
        if !migration && blueprint.columns.is_empty() {
            // Nothing to write in place; in migration mode rows must still
            // be copied, rules or not.
            warn!(table = %blueprint.table, "No column rules, skipping table");
            return Ok(());
        }
        info!(table = %blueprint.table, migration, "Processing table");

        let mut generator = (self.make_generator)();
        let select = statement::select_statement(blueprint, migration);
        debug!(sql = %select, "Streaming select");

        let reader = self.source.as_ref().unwrap_or(&self.destination);
        let mut rows = reader.fetch(select);
        let mut in_flight = FuturesUnordered::new();
        let mut row_index: usize = 0;

        while let Some(row) = rows.next().await {
            let row = row?;
            let computed = statement::apply_rules(blueprint, &row, row_index, generator.as_mut())?;

            let mutation = if migration {
                statement::insert_statement(blueprint, &computed)
            } else {
                statement::update_statement(blueprint, &computed)?
            };

            let mut follow_ups = Vec::new();
            for hook in &blueprint.after {
                follow_ups.extend(hook(&computed.before, &computed.after, generator.as_mut())?);
            }

            in_flight.push(self.dispatch(mutation, follow_ups));
            row_index += 1;

            if in_flight.len() > self.config.max_inflight {
                while let Some(done) = in_flight.next().await {
                    done?;
                }
            }
        }

        while let Some(done) = in_flight.next().await {
            done?;
        }

        info!(table = %blueprint.table, rows = row_index, "Table complete");
        Ok(())
    }

    /// One row's submitted unit: the mutation itself, then its hook
    /// statements. Units are unordered among themselves; within a unit the
    /// hooks run only after the row's own mutation completed.
    async fn dispatch(&self, mutation: String, follow_ups: Vec<String>) -> Result<()> {
        debug!(sql = %mutation, "Dispatching mutation");
        self.destination.execute(mutation).await?;
        for sql in follow_ups {
            debug!(sql = %sql, "Dispatching follow-up");
            self.destination.execute(sql).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use dbmask_core::{CoreError, RowSnapshot, SqlValue};
    use futures::stream::BoxStream;

    use crate::config::{Config, ConnectionConfig};
    use crate::error::EngineError;

    /// In-memory database double: serves canned rows per table, records
    /// every executed statement, and tracks the in-flight high-water mark.
    #[derive(Clone, Default)]
    struct MockDatabase {
        rows: Arc<Mutex<HashMap<String, Vec<RowSnapshot>>>>,
        executed: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        peak_in_flight: Arc<AtomicUsize>,
    }

    impl MockDatabase {
        fn with_rows(table: &str, rows: Vec<RowSnapshot>) -> Self {
            let db = Self::default();
            db.add_rows(table, rows);
            db
        }

        fn add_rows(&self, table: &str, rows: Vec<RowSnapshot>) {
            self.rows.lock().unwrap().insert(String::from(table), rows);
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }

        fn peak(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    fn table_of(sql: &str) -> String {
        sql.split_whitespace()
            .skip_while(|token| *token != "FROM")
            .nth(1)
            .unwrap_or_default()
            .to_string()
    }

    impl Database for MockDatabase {
        async fn execute(&self, sql: String) -> Result<u64> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.executed.lock().unwrap().push(sql);
            Ok(1)
        }

        fn fetch(&self, sql: String) -> BoxStream<'static, Result<RowSnapshot>> {
            let rows = self
                .rows
                .lock()
                .unwrap()
                .get(&table_of(&sql))
                .cloned()
                .unwrap_or_default();
            Box::pin(futures::stream::iter(rows.into_iter().map(Ok)))
        }

        async fn show_create_table(&self, table: &str) -> Result<String> {
            Ok(format!(
                "CREATE TABLE `{table}` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n)"
            ))
        }

        async fn disable_foreign_key_checks(&self) -> Result<()> {
            self.executed
                .lock()
                .unwrap()
                .push(String::from("SET FOREIGN_KEY_CHECKS=0"));
            Ok(())
        }
    }

    fn config(max_inflight: usize) -> Config {
        Config {
            connection: ConnectionConfig {
                host: String::from("127.0.0.1"),
                user: String::from("app"),
                password: String::new(),
                database: String::from("app_db"),
                max_connections: 4,
            },
            source: None,
            max_inflight,
            locale: String::from("en_US"),
        }
    }

    fn user_rows(count: i64) -> Vec<RowSnapshot> {
        (0..count)
            .map(|id| {
                [
                    (String::from("id"), SqlValue::Int(id)),
                    (
                        String::from("email"),
                        SqlValue::Text(format!("user{id}@corp.internal")),
                    ),
                    (String::from("note"), SqlValue::Null),
                ]
                .into_iter()
                .collect()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_static_email_rewrites_every_row() {
        let db = MockDatabase::with_rows("users", user_rows(3));
        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("users", |table| {
            table.column("email").replace_with("john@example.com");
        });

        engine.run().await.unwrap();

        let updates: Vec<String> = db
            .executed()
            .into_iter()
            .filter(|sql| sql.starts_with("UPDATE"))
            .collect();
        assert_eq!(updates.len(), 3);
        for id in 0..3 {
            let expected =
                format!("UPDATE users SET email = 'john@example.com' WHERE id = {id}");
            assert!(updates.contains(&expected), "missing update for id {id}");
        }
    }

    #[tokio::test]
    async fn test_foreign_key_checks_disabled_before_any_mutation() {
        let db = MockDatabase::with_rows("users", user_rows(1));
        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("users", |table| {
            table.column("email").replace_with("x");
        });

        engine.run().await.unwrap();

        let executed = db.executed();
        assert_eq!(executed[0], "SET FOREIGN_KEY_CHECKS=0");
    }

    #[tokio::test]
    async fn test_tables_processed_in_dependency_order() {
        let db = MockDatabase::default();
        db.add_rows("users", user_rows(2));
        db.add_rows(
            "users_roles",
            vec![[
                (String::from("id"), SqlValue::Int(1)),
                (String::from("label"), SqlValue::from("admin")),
            ]
            .into_iter()
            .collect()],
        );

        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("users", |table| {
            table.depends_on("users_roles");
            table.column("email").replace_with("x");
        });
        engine.table("users_roles", |table| {
            table.column("label").replace_with("y");
        });

        engine.run().await.unwrap();

        let executed = db.executed();
        let last_roles = executed
            .iter()
            .rposition(|sql| sql.contains("users_roles"))
            .unwrap();
        let first_users = executed
            .iter()
            .position(|sql| sql.starts_with("UPDATE users "))
            .unwrap();
        assert!(last_roles < first_users);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_statement() {
        let db = MockDatabase::with_rows("a", user_rows(1));
        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("a", |table| {
            table.depends_on("b");
            table.column("email").replace_with("x");
        });
        engine.table("b", |table| {
            table.depends_on("a");
            table.column("email").replace_with("x");
        });

        let err = engine.run().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::CircularDependency { .. })
        ));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_tables_without_rules_are_skipped_in_place() {
        let db = MockDatabase::with_rows("audit", user_rows(5));
        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("audit", |_table| {});

        engine.run().await.unwrap();

        assert!(db
            .executed()
            .iter()
            .all(|sql| !sql.starts_with("UPDATE")));
    }

    #[tokio::test]
    async fn test_backpressure_bounds_in_flight_statements() {
        let threshold = 5;
        let db = MockDatabase::with_rows("users", user_rows(37));
        let mut engine = Anonymizer::new(config(threshold), db.clone(), None);
        engine.table("users", |table| {
            table.column("email").replace_with("email_#row#@example.com");
        });

        engine.run().await.unwrap();

        assert_eq!(
            db.executed()
                .iter()
                .filter(|sql| sql.starts_with("UPDATE"))
                .count(),
            37
        );
        // At most the threshold plus the row that tripped the barrier.
        assert!(
            db.peak() <= threshold + 1,
            "peak in-flight was {}",
            db.peak()
        );
    }

    #[tokio::test]
    async fn test_hook_runs_after_its_rows_mutation() {
        let db = MockDatabase::with_rows("users", user_rows(2));
        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("users", |table| {
            table
                .column("id")
                .replace_by_fields(|row, _g| match row.get("id") {
                    Some(SqlValue::Int(id)) => Ok(SqlValue::Text(format!("uuid-{id}"))),
                    _ => Ok(SqlValue::Null),
                })
                .synchronize_column("user_id", Some("users_roles"), None);
        });

        engine.run().await.unwrap();

        let executed = db.executed();
        for id in 0..2 {
            let mutation = executed
                .iter()
                .position(|sql| {
                    sql.starts_with("UPDATE users SET") && sql.ends_with(&format!("WHERE id = {id}"))
                })
                .unwrap();
            let hook = executed
                .iter()
                .position(|sql| sql.contains(&format!("WHERE user_id = {id}")))
                .unwrap();
            assert!(mutation < hook, "hook ran before mutation for id {id}");
        }
    }

    #[tokio::test]
    async fn test_hook_error_aborts_the_run() {
        let db = MockDatabase::with_rows("users", user_rows(1));
        let mut engine = Anonymizer::new(config(20), db, None);
        engine.table("users", |table| {
            table.column("email").replace_with("x");
            table.after_update(
                |_before, _after, _generator| {
                    Err(CoreError::Hook(String::from("sync target missing")))
                },
                Vec::<String>::new(),
            );
        });

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::Hook(_))));
    }

    #[tokio::test]
    async fn test_migration_copies_every_row_and_null_columns() {
        let source = MockDatabase::with_rows("users", user_rows(3));
        let destination = MockDatabase::default();

        let mut cfg = config(20);
        cfg.source = Some(cfg.connection.clone());
        let mut engine = Anonymizer::new(cfg, destination.clone(), Some(source.clone()));
        engine.table("users", |table| {
            table.column("email").replace_with("masked@example.com");
        });

        engine.run().await.unwrap();

        let executed = destination.executed();
        assert!(executed.contains(&String::from("DROP TABLE IF EXISTS users")));
        assert!(executed.iter().any(|sql| sql.starts_with("CREATE TABLE")));

        let inserts: Vec<&String> = executed
            .iter()
            .filter(|sql| sql.starts_with("INSERT INTO users SET"))
            .collect();
        assert_eq!(inserts.len(), 3);
        for sql in inserts {
            assert!(sql.contains("email = 'masked@example.com'"));
            assert!(sql.contains("note = NULL"));
        }
    }

    #[tokio::test]
    async fn test_migration_copies_tables_without_rules() {
        let source = MockDatabase::with_rows("audit", user_rows(2));
        let destination = MockDatabase::default();

        let mut cfg = config(20);
        cfg.source = Some(cfg.connection.clone());
        let mut engine = Anonymizer::new(cfg, destination.clone(), Some(source));
        engine.table("audit", |_table| {});

        engine.run().await.unwrap();

        assert_eq!(
            destination
                .executed()
                .iter()
                .filter(|sql| sql.starts_with("INSERT INTO audit SET"))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_fresh_generator_per_table() {
        struct CountingGenerator;
        impl Generator for CountingGenerator {
            fn request(
                &mut self,
                kind: &str,
                _params: &[SqlValue],
                _unique: bool,
            ) -> dbmask_core::Result<SqlValue> {
                Ok(SqlValue::Text(String::from(kind)))
            }
            fn chance(&mut self, _weight: f64) -> bool {
                false
            }
        }

        let instantiated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&instantiated);

        let db = MockDatabase::default();
        db.add_rows("a", user_rows(1));
        db.add_rows("b", user_rows(1));

        let mut engine = Anonymizer::new(config(20), db, None).with_generator_factory(Box::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(CountingGenerator)
            },
        ));
        engine.table("a", |table| {
            table.column("email").replace_with_generated("email");
        });
        engine.table("b", |table| {
            table.column("email").replace_with_generated("email");
        });

        engine.run().await.unwrap();
        assert_eq!(instantiated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generated_unique_values_never_repeat_within_table() {
        let db = MockDatabase::with_rows("users", user_rows(25));
        let mut engine = Anonymizer::new(config(20), db.clone(), None);
        engine.table("users", |table| {
            table.column("email").replace_with_generated("email").unique();
        });

        engine.run().await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for sql in db.executed().iter().filter(|s| s.starts_with("UPDATE")) {
            let value = sql
                .split("email = '")
                .nth(1)
                .and_then(|rest| rest.split('\'').next())
                .unwrap()
                .to_string();
            assert!(seen.insert(value), "duplicate generated email in {sql}");
        }
        assert_eq!(seen.len(), 25);
    }
}
