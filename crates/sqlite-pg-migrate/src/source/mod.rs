//! SQLite source database operations.
//!
//! Uses SQLx for connection pooling. Values are read by storage class
//! (INTEGER, REAL, TEXT, BLOB, NULL) rather than by declared type, since
//! SQLite does not enforce declared types.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::core::identifier::quote_sqlite;
use crate::core::{ColumnDescriptor, Row as DataRow, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for source database operations.
#[async_trait]
pub trait SourcePool: Send + Sync {
    /// User tables in creation order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Column metadata for a table, in declaration order.
    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Overwrite numeric values above `ceiling` with `ceiling`, in place.
    /// Returns the number of rows changed.
    async fn clamp_column(&self, table: &str, column: &str, ceiling: f64) -> Result<u64>;

    /// All rows of a table, values aligned to `columns`.
    async fn fetch_rows(&self, table: &str, columns: &[String]) -> Result<Vec<DataRow>>;

    /// Run a trivial query against the database.
    async fn test_connection(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// SQLite database reached through an SQLx pool.
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open an existing database file. A missing file is an error.
    pub async fn open(path: &Path, max_conns: u32) -> Result<Self> {
        if !path.exists() {
            return Err(MigrateError::Config(format!(
                "SQLite database not found: {}",
                path.display()
            )));
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);
        let source = Self::connect(options, max_conns, "opening SQLite source").await?;
        info!("Connected to SQLite: {}", path.display());
        Ok(source)
    }

    /// Open a database file, creating it if missing.
    pub async fn open_or_create(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let source = Self::connect(options, 1, "opening SQLite destination").await?;
        info!("Opened SQLite: {}", path.display());
        Ok(source)
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| MigrateError::pool(e, "parsing in-memory SQLite options"))?;
        Self::connect(options, 1, "opening in-memory SQLite").await
    }

    async fn connect(options: SqliteConnectOptions, max_conns: u32, context: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns.max(1))
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, context))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, context))?;

        Ok(Self { pool })
    }

    /// Run a statement with no parameters.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Replace the contents of `table` in one transaction.
    ///
    /// Creates the table from `columns` (name, SQLite type) when it does not
    /// exist, deletes every existing row, then inserts `rows`.
    pub async fn replace_table(
        &self,
        table: &str,
        columns: &[(String, String)],
        rows: &[DataRow],
    ) -> Result<u64> {
        let quoted_table = quote_sqlite(table)?;
        let defs = columns
            .iter()
            .map(|(name, ty)| Ok(format!("{} {}", quote_sqlite(name)?, ty)))
            .collect::<Result<Vec<_>>>()?;
        let names = columns
            .iter()
            .map(|(name, _)| quote_sqlite(name))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted_table,
            names.join(", "),
            placeholders
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quoted_table,
            defs.join(", ")
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM {}", quoted_table))
            .execute(&mut *tx)
            .await?;

        for row in rows {
            let mut query = sqlx::query(&insert_sql);
            for value in row {
                query = match value {
                    SqlValue::Null => query.bind(None::<String>),
                    SqlValue::Bool(v) => query.bind(i64::from(*v)),
                    SqlValue::I64(v) => query.bind(*v),
                    SqlValue::F64(v) => query.bind(*v),
                    SqlValue::Text(v) => query.bind(v.clone()),
                    SqlValue::Bytes(v) => query.bind(v.clone()),
                };
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    /// Convert one cell by its storage class.
    fn value_at(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        let storage = raw.type_info().name().to_string();

        let value = match storage.as_str() {
            "INTEGER" => SqlValue::I64(row.try_get_unchecked::<i64, _>(idx)?),
            "REAL" => SqlValue::F64(row.try_get_unchecked::<f64, _>(idx)?),
            "BLOB" => SqlValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
            _ => match row.try_get_unchecked::<String, _>(idx) {
                Ok(s) => SqlValue::Text(s),
                // Not valid UTF-8
                Err(_) => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
            },
        };
        Ok(value)
    }
}

#[async_trait]
impl SourcePool for SqliteSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(MigrateError::from))
            .collect()
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", dflt_value, pk
               FROM pragma_table_info(?1)
               ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let pk: i64 = row.try_get("pk")?;
            columns.push(ColumnDescriptor {
                table: table.to_string(),
                name: row.try_get("name")?,
                source_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                nullable: row.try_get::<i64, _>("notnull")? == 0,
                default: row.try_get("dflt_value")?,
                pk_position: u32::try_from(pk).ok().filter(|p| *p > 0),
            });
        }

        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn clamp_column(&self, table: &str, column: &str, ceiling: f64) -> Result<u64> {
        let col = quote_sqlite(column)?;
        let sql = format!(
            "UPDATE {} SET {col} = ?1 WHERE typeof({col}) IN ('integer', 'real') AND {col} > ?1",
            quote_sqlite(table)?,
            col = col
        );
        let result = sqlx::query(&sql).bind(ceiling).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_rows(&self, table: &str, columns: &[String]) -> Result<Vec<DataRow>> {
        let select_list = columns
            .iter()
            .map(|c| quote_sqlite(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!("SELECT {} FROM {}", select_list, quote_sqlite(table)?);

        let rows: Vec<SqliteRow> = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| (0..columns.len()).map(|i| Self::value_at(row, i)).collect())
            .collect()
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing SQLite connection"))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> SqliteSource {
        let db = SqliteSource::in_memory().await.unwrap();
        db.execute(
            "CREATE TABLE payments (
                id INTEGER PRIMARY KEY,
                name VARCHAR(20) NOT NULL DEFAULT 'x',
                fixed_fee REAL,
                note TEXT,
                data BLOB
            )",
        )
        .await
        .unwrap();
        db.execute(
            "INSERT INTO payments (id, name, fixed_fee, note, data) VALUES
                (1, 'a', 150000000, NULL, x'0102'),
                (2, 'b', 12.5, 'ok', NULL),
                (3, 'c', 'n/a', '7', NULL)",
        )
        .await
        .unwrap();
        db.execute("CREATE TABLE abilities (\"group\" TEXT, model TEXT, channel_id INTEGER, PRIMARY KEY (model, \"group\"))")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_list_tables_in_creation_order() {
        let db = seeded().await;
        assert_eq!(db.list_tables().await.unwrap(), vec!["payments", "abilities"]);
    }

    #[tokio::test]
    async fn test_load_columns() {
        let db = seeded().await;
        let cols = db.load_columns("payments").await.unwrap();
        assert_eq!(cols.len(), 5);
        assert_eq!(cols[0].name, "id");
        assert_eq!(cols[0].pk_position, Some(1));
        assert_eq!(cols[1].source_type, "VARCHAR(20)");
        assert!(!cols[1].nullable);
        assert_eq!(cols[1].default.as_deref(), Some("'x'"));
        assert!(cols[3].nullable);
        assert_eq!(cols[3].pk_position, None);

        let cols = db.load_columns("abilities").await.unwrap();
        let by_name = |n: &str| cols.iter().find(|c| c.name == n).unwrap().pk_position;
        assert_eq!(by_name("model"), Some(1));
        assert_eq!(by_name("group"), Some(2));
        assert_eq!(by_name("channel_id"), None);
    }

    #[tokio::test]
    async fn test_fetch_rows_by_storage_class() {
        let db = seeded().await;
        let columns: Vec<String> = ["id", "fixed_fee", "note", "data"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = db.fetch_rows("payments", &columns).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], SqlValue::I64(1));
        // REAL affinity stores the integer literal as a float.
        assert_eq!(rows[0][1], SqlValue::F64(150_000_000.0));
        assert_eq!(rows[0][2], SqlValue::Null);
        assert_eq!(rows[0][3], SqlValue::Bytes(vec![1, 2]));
        assert_eq!(rows[2][1], SqlValue::Text("n/a".to_string()));
    }

    #[tokio::test]
    async fn test_clamp_column() {
        let db = seeded().await;
        let changed = db
            .clamp_column("payments", "fixed_fee", 99_999_999.99)
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let rows = db
            .fetch_rows("payments", &["fixed_fee".to_string()])
            .await
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::F64(99_999_999.99));
        assert_eq!(rows[1][0], SqlValue::F64(12.5));
        // Text is left alone.
        assert_eq!(rows[2][0], SqlValue::Text("n/a".to_string()));
    }

    #[tokio::test]
    async fn test_replace_table() {
        let db = SqliteSource::in_memory().await.unwrap();
        let columns = vec![
            ("id".to_string(), "INTEGER".to_string()),
            ("enabled".to_string(), "INTEGER".to_string()),
            ("name".to_string(), "TEXT".to_string()),
        ];
        let rows = vec![
            vec![SqlValue::I64(1), SqlValue::Bool(true), SqlValue::Text("a".into())],
            vec![SqlValue::I64(2), SqlValue::Bool(false), SqlValue::Null],
        ];
        assert_eq!(db.replace_table("users", &columns, &rows).await.unwrap(), 2);
        // Second run replaces rather than appends.
        assert_eq!(db.replace_table("users", &columns, &rows[..1]).await.unwrap(), 1);

        let names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();
        let stored = db.fetch_rows("users", &names).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0][1], SqlValue::I64(1));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteSource::open(&dir.path().join("missing.db"), 1).await;
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }
}
