//! SeaORM migrations for multi-database support
//!
//! Migrations work across SQLite, PostgreSQL and MySQL. Backend-specific DDL
//! (partial indexes) is issued as raw SQL where the schema builder cannot
//! express it.

use sea_orm_migration::prelude::*;

/// Derive a migration's name from its containing folder when the migration
/// lives in `folder_name/mod.rs`.
///
/// `DeriveMigrationName` would report "mod" for every folder-based migration.
/// The folder name must follow the `mYYYYMMDD_HHMMSS_description` convention.
#[macro_export]
macro_rules! folder_migration_name {
    () => {
        impl sea_orm_migration::MigrationName for Migration {
            fn name(&self) -> &str {
                static NAME: ::std::sync::OnceLock<String> = ::std::sync::OnceLock::new();
                NAME.get_or_init(|| {
                    let f = file!();
                    let trimmed = f
                        .trim_end_matches("mod.rs")
                        .trim_end_matches(|c| c == '/' || c == '\\');
                    trimmed
                        .rsplit(|c| c == '/' || c == '\\')
                        .next()
                        .unwrap_or_default()
                        .to_string()
                })
            }
        }
    };
}

pub mod m20251001_000000_initial_schema;
pub mod m20251001_000001_queue_singleton_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251001_000000_initial_schema::Migration),
            Box::new(m20251001_000001_queue_singleton_index::Migration),
        ]
    }
}
