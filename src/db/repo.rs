use crate::model::Entry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;
pub type Tx<'a> = Transaction<'a, Sqlite>;

/// Open the store. Failing here is fatal for the daemon.
pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url: {normalized}"))?
        .create_if_missing(true)
        // Enable WAL and stricter durability.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options)
        .await
        .context("failed to open entry store")?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create its parent
/// directory. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert a new entry unless `name` is already known.
///
/// Returns `true` when a row was added. A duplicate name is not an error and
/// never overwrites the stored row.
#[instrument(skip_all, fields(name = %name))]
pub async fn insert_if_absent(
    tx: &mut Tx<'_>,
    name: &str,
    title: &str,
    description: &str,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO entries (name, title, description, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(name)
    .bind(title)
    .bind(description)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Up to `limit` entries, newest first.
#[instrument(skip_all)]
pub async fn list_recent(pool: &Pool, limit: u32) -> Result<Vec<Entry>> {
    let rows = sqlx::query(
        "SELECT name, title, description, created_at FROM entries \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(entry_from_row).collect())
}

pub async fn count_entries(pool: &Pool) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}

fn entry_from_row(row: &SqliteRow) -> Entry {
    Entry {
        name: row.get("name"),
        title: row.get("title"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}
