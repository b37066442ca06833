//! Asynchronous execution engine for [`dbmask_core`] blueprints.
//!
//! Connects to MySQL through `sqlx`, streams each table's rows, applies the
//! blueprint rules from [`dbmask_core`], and dispatches the resulting
//! mutation statements with bounded concurrency. Two modes are supported:
//! in-place anonymization of a single database, and migration, where the
//! schema and transformed rows are copied from a source server onto a
//! destination server.
//!
//! ```no_run
//! use dbmask_engine::config::{Config, ConnectionConfig};
//! use dbmask_engine::db::MySqlDatabase;
//! use dbmask_engine::engine::Anonymizer;
//!
//! # async fn run() -> dbmask_engine::error::Result<()> {
//! let config = Config {
//!     connection: ConnectionConfig {
//!         host: String::from("127.0.0.1"),
//!         user: String::from("app"),
//!         password: String::from("secret"),
//!         database: String::from("app_db"),
//!         max_connections: 20,
//!     },
//!     source: None,
//!     max_inflight: 20,
//!     locale: String::from("en_US"),
//! };
//! config.validate()?;
//!
//! let db = MySqlDatabase::connect(&config.connection).await?;
//! let mut engine = Anonymizer::new(config, db, None);
//! engine.table("users", |table| {
//!     table.column("email").replace_with_generated("email").unique();
//! });
//! engine.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod loader;
pub mod transplant;

pub use config::{Config, ConnectionConfig};
pub use db::{Database, MySqlDatabase};
pub use engine::{Anonymizer, GeneratorFactory};
pub use error::{EngineError, Result};
pub use loader::{load_spec, load_spec_file};
