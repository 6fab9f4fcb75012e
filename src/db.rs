//! SQLite schema setup shared by the local object store and asset repository.

use sqlx::SqlitePool;

/// Schema applied by `--migrate`, embedded at build time.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Run the embedded migration, one statement at a time.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
