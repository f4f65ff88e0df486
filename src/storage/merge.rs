use sqlx::{Connection, SqliteConnection};
use std::path::Path;

use super::schema::Database;
use super::types::{DatabaseError, MergeMode, MergeReport, TableMerge};

/// First 16 bytes of every SQLite 3 database file.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Schema name the staged file is attached under.
const STAGED_SCHEMA: &str = "staged";

impl Database {
    /// Fold the tables of a staged database file into this database.
    ///
    /// The staged file is attached as `staged`; for each of its user tables
    /// (in name order) the table is created in `main` when absent and every
    /// row is copied with `INSERT OR REPLACE`, so staged rows win on primary
    /// key conflicts. Each table copies inside its own transaction and is
    /// either fully merged or left untouched.
    ///
    /// With [`MergeMode::BestEffort`] a failing table is recorded in the
    /// report and the remaining tables are still processed. With
    /// [`MergeMode::AllOrNothing`] the first failure rolls back every table
    /// and returns [`DatabaseError::Merge`].
    ///
    /// The staged schema is detached before returning, on every path.
    pub async fn import_staged(
        &self,
        staged: &Path,
        mode: MergeMode,
    ) -> Result<MergeReport, DatabaseError> {
        // ATTACH would happily create an empty file at a bad path
        if !staged.is_file() {
            return Err(DatabaseError::Open {
                path: staged.display().to_string(),
                source: sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "staged database not found",
                )),
            });
        }

        let mut conn = self.pool.acquire().await?;

        sqlx::query(&format!("ATTACH DATABASE ? AS {STAGED_SCHEMA}"))
            .bind(staged.to_string_lossy().into_owned())
            .execute(&mut *conn)
            .await
            .map_err(|source| DatabaseError::Open {
                path: staged.display().to_string(),
                source,
            })?;

        tracing::debug!(staged = %staged.display(), mode = ?mode, "Attached staged database");

        let result = import_attached(&mut *conn, staged, mode).await;

        if let Err(e) = sqlx::query(&format!("DETACH DATABASE {STAGED_SCHEMA}"))
            .execute(&mut *conn)
            .await
        {
            tracing::warn!(error = %e, "Failed to detach staged database");
        }

        if let Ok(report) = &result {
            tracing::info!(
                merged = report.merged().count(),
                failed = report.failed().count(),
                rows = report.total_rows(),
                "Staged database imported"
            );
        }
        result
    }
}

/// Copy tables (and then indexes) out of the attached `staged` schema.
async fn import_attached(
    conn: &mut SqliteConnection,
    staged: &Path,
    mode: MergeMode,
) -> Result<MergeReport, DatabaseError> {
    let unusable = |reason: &str| DatabaseError::Staged {
        path: staged.display().to_string(),
        reason: reason.to_string(),
    };

    // An empty file name means SQLite attached a memory schema, not the file
    if attached_file(&mut *conn).await?.is_empty() {
        return Err(unusable("attached as an in-memory schema"));
    }

    let tables = staged_tables(&mut *conn).await?;
    let staged_len = std::fs::metadata(staged).map(|m| m.len()).unwrap_or(0);
    if tables.is_empty() && staged_len > 0 {
        return Err(unusable("no tables found"));
    }

    let mut report = match mode {
        MergeMode::BestEffort => merge_best_effort(&mut *conn, &tables).await,
        MergeMode::AllOrNothing => merge_all_or_nothing(&mut *conn, &tables).await?,
    };
    report.indexes = replay_indexes(&mut *conn).await;
    Ok(report)
}

/// File backing the attached `staged` schema, empty for memory schemas.
async fn attached_file(conn: &mut SqliteConnection) -> Result<String, DatabaseError> {
    let attached: Vec<(i64, String, Option<String>)> = sqlx::query_as("PRAGMA database_list")
        .fetch_all(&mut *conn)
        .await
        .map_err(DatabaseError::query("list attached databases"))?;

    Ok(attached
        .into_iter()
        .find(|(_, name, _)| name == STAGED_SCHEMA)
        .and_then(|(_, _, file)| file)
        .unwrap_or_default())
}

/// Recreate staged indexes whose table exists in `main` and which `main`
/// lacks. Failures are logged and skipped; returns the names created.
async fn replay_indexes(conn: &mut SqliteConnection) -> Vec<String> {
    let indexes: Vec<(String, String, String)> = match sqlx::query_as(&format!(
        "SELECT s.name, s.tbl_name, s.sql FROM {STAGED_SCHEMA}.sqlite_master s \
         WHERE s.type = 'index' AND s.sql IS NOT NULL \
         AND s.name NOT IN (SELECT name FROM main.sqlite_master WHERE type = 'index') \
         AND s.tbl_name IN (SELECT name FROM main.sqlite_master WHERE type = 'table') \
         ORDER BY s.name"
    ))
    .fetch_all(&mut *conn)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list staged indexes");
            return Vec::new();
        }
    };

    let mut created = Vec::new();
    for (name, table, sql) in indexes {
        match sqlx::query(&sql).execute(&mut *conn).await {
            Ok(_) => {
                tracing::debug!(index = %name, table = %table, "Recreated index");
                created.push(name);
            }
            Err(e) => tracing::warn!(index = %name, error = %e, "Skipping index that failed to build"),
        }
    }
    created
}

/// `(name, create_sql)` for every user table of the staged schema.
async fn staged_tables(
    conn: &mut SqliteConnection,
) -> Result<Vec<(String, Option<String>)>, DatabaseError> {
    sqlx::query_as(&format!(
        "SELECT name, sql FROM {STAGED_SCHEMA}.sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
    ))
    .fetch_all(&mut *conn)
    .await
    .map_err(DatabaseError::query("list staged tables"))
}

async fn merge_best_effort(
    conn: &mut SqliteConnection,
    tables: &[(String, Option<String>)],
) -> MergeReport {
    let mut report = MergeReport::default();

    for (name, create_sql) in tables {
        let outcome = match conn.begin().await {
            Ok(mut tx) => match copy_table(&mut *tx, name, create_sql.as_deref()).await {
                Ok(copied) => tx.commit().await.map(|_| copied),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(table = %name, error = %rollback_err, "Rollback failed");
                    }
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok((created, rows)) => {
                tracing::debug!(table = %name, created = created, rows = rows, "Merged table");
                report.tables.push(TableMerge {
                    name: name.clone(),
                    created,
                    rows,
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "Skipping table that failed to merge");
                report.tables.push(TableMerge {
                    name: name.clone(),
                    created: false,
                    rows: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    report
}

async fn merge_all_or_nothing(
    conn: &mut SqliteConnection,
    tables: &[(String, Option<String>)],
) -> Result<MergeReport, DatabaseError> {
    let mut tx = conn.begin().await?;
    let mut report = MergeReport::default();

    for (name, create_sql) in tables {
        match copy_table(&mut *tx, name, create_sql.as_deref()).await {
            Ok((created, rows)) => report.tables.push(TableMerge {
                name: name.clone(),
                created,
                rows,
                error: None,
            }),
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "Merge failed, rolling back import");
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                return Err(DatabaseError::Merge {
                    table: name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tx.commit().await?;
    Ok(report)
}

/// Create `name` in `main` if needed and copy every staged row into it.
///
/// Returns whether the table was created and how many rows were written.
async fn copy_table(
    conn: &mut SqliteConnection,
    name: &str,
    create_sql: Option<&str>,
) -> Result<(bool, u64), sqlx::Error> {
    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM main.sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

    let mut created = false;
    if exists.is_none() {
        // Without a CREATE statement the copy below fails with "no such table"
        if let Some(sql) = create_sql {
            match sqlx::query(sql).execute(&mut *conn).await {
                Ok(_) => created = true,
                Err(e) if is_already_exists(&e) => {
                    tracing::debug!(table = %name, "Table appeared concurrently, copying into it");
                }
                Err(e) => return Err(e),
            }
        }
    }

    let quoted = quote_ident(name);
    let result = sqlx::query(&format!(
        "INSERT OR REPLACE INTO main.{quoted} SELECT * FROM {STAGED_SCHEMA}.{quoted}"
    ))
    .execute(&mut *conn)
    .await?;

    Ok((created, result.rows_affected()))
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.message().contains("already exists"))
}

/// Quote an SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
