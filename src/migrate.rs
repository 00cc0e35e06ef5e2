use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tool (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `key` is the content hash of `data`; uniqueness never depends on
    // SQLite's JSON comparison.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spec (
            id INTEGER PRIMARY KEY,
            key TEXT NOT NULL UNIQUE,
            data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run (
            id INTEGER PRIMARY KEY,
            tool_id INTEGER NOT NULL REFERENCES tool(id),
            spec_id INTEGER NOT NULL REFERENCES spec(id),
            file_id INTEGER NOT NULL REFERENCES file(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            UNIQUE(tool_id, spec_id, file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS result (
            id INTEGER PRIMARY KEY,
            run_id INTEGER NOT NULL REFERENCES run(id) ON DELETE CASCADE,
            sr INTEGER NOT NULL,
            sc INTEGER NOT NULL,
            er INTEGER NOT NULL,
            ec INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_spec_file ON run(spec_id, file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_result_run_id ON result(run_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete every row, children first.
pub async fn truncate(pool: &SqlitePool) -> Result<()> {
    for table in ["result", "run", "spec", "file", "tool"] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(pool)
            .await?;
    }
    Ok(())
}
