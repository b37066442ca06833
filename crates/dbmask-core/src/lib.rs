//! Core logic for dbmask: declarative table blueprints, dependency-ordered
//! scheduling, and per-row value computation.
//!
//! This crate is pure — it never touches a database. It models *what* to
//! rewrite ([`Blueprint`], [`rule::ColumnRule`]), decides *in which order*
//! tables are processed ([`schedule::processing_order`]), and computes *the
//! SQL text* of each row's mutation ([`statement`]). The async execution
//! engine lives in `dbmask-engine`.
//!
//! # Example
//!
//! ```rust
//! use dbmask_core::blueprint::Blueprint;
//! use dbmask_core::generator::FakeGenerator;
//! use dbmask_core::statement;
//!
//! let blueprint = Blueprint::build("app", "users", |table| {
//!     table.primary(["id"]);
//!     table.global_where("id != 10");
//!
//!     // Static replacement, with per-row `#row#` expansion.
//!     table.column("email").replace_with("email_#row#@example.com");
//!
//!     // Generator-backed replacement, unique across the run.
//!     table.column("username").replace_with_generated("user_name").unique();
//!
//!     // Leave admin rows untouched via a conditional assignment.
//!     table
//!         .column("phone")
//!         .where_sql("is_admin = 0")
//!         .replace_with_generated("phone_number");
//! });
//!
//! assert_eq!(
//!     statement::select_statement(&blueprint, false),
//!     "SELECT id, email, username, phone FROM users WHERE (id != 10)"
//! );
//! ```

pub mod blueprint;
pub mod error;
pub mod generator;
pub mod row;
pub mod rule;
pub mod schedule;
pub mod statement;
pub mod value;

pub use blueprint::{Blueprint, BlueprintBuilder, ColumnRuleBuilder, HookFn};
pub use error::{CoreError, Result};
pub use generator::{FakeGenerator, Generator};
pub use row::RowSnapshot;
pub use rule::{ColumnRule, ReplaceSource};
pub use value::SqlValue;
