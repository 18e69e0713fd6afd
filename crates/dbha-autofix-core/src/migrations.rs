// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded database migrations.
//!
//! Products embedding the controller can run these programmatically:
//!
//! ```ignore
//! let pool = sqlx::PgPool::connect(&database_url).await?;
//! dbha_autofix_core::migrations::run_postgres(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with all controller migrations embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator with all controller migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run PostgreSQL migrations. Safe to call repeatedly; applied migrations
/// are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Run SQLite migrations. Safe to call repeatedly; applied migrations are
/// skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
