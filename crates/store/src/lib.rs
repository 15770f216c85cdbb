//! SQLite persistence for the resource model.
//!
//! The database holds the ownership tree of APIs, sources, cached files and
//! expected files, plus the fingerprint recorded for every cached file. Every
//! record is created through [`Repository::get_or_create`], keyed on the
//! natural key of its draft type, so that declaring the same resources twice
//! is harmless.

mod db;
mod entity;
pub mod error;
mod repo;
mod rows;

pub use crate::db::Database;
pub use crate::entity::{Entity, GetOrCreate};
pub use crate::repo::Repository;

/// Tables owned by the store, including the migration bookkeeping.
pub const TABLES: &[&str] = &["apis", "sources", "cached_files", "expected_files", "_sqlx_migrations"];

/// Whether `name` refers to a table that user data must not be written to:
/// one of [`TABLES`] or an SQLite internal table. Names are compared the way
/// SQLite resolves them, ignoring ASCII case.
pub fn is_reserved_table(name: &str) -> bool {
    let name = name.trim();
    TABLES.iter().any(|table| table.eq_ignore_ascii_case(name))
        || name.get(..7).is_some_and(|prefix| prefix.eq_ignore_ascii_case("sqlite_"))
}
