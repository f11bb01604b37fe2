//! PostgreSQL target database operations.
//!
//! Every unit of work (one table's structure, one table's data) runs inside a
//! [`TargetTransaction`] bracketed by explicit BEGIN and COMMIT/ROLLBACK on a
//! single pooled connection.

pub mod tls;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info};

use crate::config::PostgresConfig;
use crate::core::identifier::{ident_pg, qualify_pg};
use crate::core::{CreateTable, Row, SequenceBinding, SqlValue, TargetColumn};
use crate::error::{MigrateError, Result};
use tls::SslMode;

/// PostgreSQL limit on bind parameters per statement.
const MAX_PARAMS: usize = 65_535;

/// Trait for target database operations.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// Schema all tables live in.
    fn schema(&self) -> &str;

    /// Open a transaction on a dedicated connection.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>>;

    /// Check if a table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Base tables of the schema, by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Live column types of a table, in ordinal order.
    async fn column_types(&self, table: &str) -> Result<Vec<TargetColumn>>;

    /// All rows of a table, every value rendered as text.
    async fn read_table(&self, table: &str, columns: &[TargetColumn]) -> Result<Vec<Row>>;

    /// Columns whose default draws from a sequence.
    async fn sequence_bindings(&self) -> Result<Vec<SequenceBinding>>;

    /// Point the binding's sequence one past the column's maximum.
    /// Returns the value the next `nextval` will produce.
    async fn sync_sequence(&self, binding: &SequenceBinding) -> Result<i64>;

    /// Run a trivial query against the database.
    async fn test_connection(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// One open transaction. Dropping it without `commit` discards the work.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Drop a table if it exists.
    async fn drop_table(&mut self, table: &str) -> Result<()>;

    /// Execute a CREATE TABLE statement.
    async fn create_table(&mut self, create: &CreateTable) -> Result<()>;

    /// Remove every row of a table.
    async fn truncate_table(&mut self, table: &str) -> Result<()>;

    /// Check if a table exists.
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Live column types of a table, in ordinal order.
    async fn column_types(&mut self, table: &str) -> Result<Vec<TargetColumn>>;

    /// Insert rows aligned to `columns`, casting each value to its column type.
    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// PostgreSQL target pool implementation.
pub struct PgPool {
    pool: Pool,
    schema: String,
}

impl PgPool {
    /// Create a new PostgreSQL pool and verify connectivity.
    pub async fn new(config: &PostgresConfig, max_conns: usize) -> Result<Self> {
        let ssl_mode: SslMode = config.ssl_mode.parse()?;

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("sqlite-pg-migrate");
        pg_config.ssl_mode(ssl_mode.pg_mode());

        // Clean recycling discards connections returned mid-transaction.
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        };

        let mgr = match ssl_mode.connector() {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "connecting to PostgreSQL"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (schema {})",
            config.host, config.port, config.database, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }
}

#[async_trait]
impl TargetPool for PgPool {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let client = self.client("beginning transaction").await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client,
            schema: self.schema.clone(),
        }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client("checking table existence").await?;
        table_exists_on(&client, &self.schema, table).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client("listing tables").await?;
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&self.schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn column_types(&self, table: &str) -> Result<Vec<TargetColumn>> {
        let client = self.client("reading column types").await?;
        column_types_on(&client, &self.schema, table).await
    }

    async fn read_table(&self, table: &str, columns: &[TargetColumn]) -> Result<Vec<Row>> {
        let select_list = columns
            .iter()
            .map(|c| Ok(format!("{}::text", ident_pg(&c.name)?)))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}",
            select_list,
            qualify_pg(&self.schema, table)?
        );
        debug!("{}", sql);

        let client = self.client("reading table").await?;
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|i| SqlValue::from(row.get::<_, Option<String>>(i)))
                    .collect()
            })
            .collect())
    }

    async fn sequence_bindings(&self) -> Result<Vec<SequenceBinding>> {
        let client = self.client("discovering sequences").await?;
        let rows = client
            .query(
                "SELECT table_name::text, column_name::text, column_default::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND column_default LIKE 'nextval%'
                 ORDER BY table_name, ordinal_position",
                &[&self.schema],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| SequenceBinding {
                table: r.get(0),
                column: r.get(1),
                default_expr: r.get(2),
            })
            .collect())
    }

    async fn sync_sequence(&self, binding: &SequenceBinding) -> Result<i64> {
        let qualified = qualify_pg(&self.schema, &binding.table)?;
        let sql = sync_sequence_sql(&self.schema, binding)?;
        let sequence = binding.sequence_name().unwrap_or_default().to_string();

        let client = self.client("synchronizing sequence").await?;
        let row = client
            .query_one(sql.as_str(), &[&qualified, &binding.column, &sequence])
            .await?;
        Ok(row.get(0))
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Transaction on one pooled connection.
struct PgTransaction {
    client: Object,
    schema: String,
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn drop_table(&mut self, table: &str) -> Result<()> {
        let sql = drop_table_sql(&self.schema, table)?;
        debug!("{}", sql);
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn create_table(&mut self, create: &CreateTable) -> Result<()> {
        let sql = create.to_sql()?;
        debug!("{}", sql);
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn truncate_table(&mut self, table: &str) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", qualify_pg(&self.schema, table)?);
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        table_exists_on(&self.client, &self.schema, table).await
    }

    async fn column_types(&mut self, table: &str) -> Result<Vec<TargetColumn>> {
        column_types_on(&self.client, &self.schema, table).await
    }

    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let rows_per_statement = (MAX_PARAMS / columns.len()).max(1);
        let mut inserted = 0u64;
        for chunk in rows.chunks(rows_per_statement) {
            let (sql, params) = build_insert_sql(&self.schema, table, columns, chunk)?;
            let param_refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            inserted += self.client.execute(sql.as_str(), &param_refs).await?;
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

async fn table_exists_on(client: &Object, schema: &str, table: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
            &[&schema, &table],
        )
        .await?;
    Ok(row.get(0))
}

async fn column_types_on(client: &Object, schema: &str, table: &str) -> Result<Vec<TargetColumn>> {
    let rows = client
        .query(
            "SELECT column_name::text, data_type::text, udt_name::text
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| TargetColumn {
            name: r.get(0),
            data_type: r.get(1),
            udt_name: r.get(2),
        })
        .collect())
}

/// Build a multi-row INSERT binding every value as text with a cast to the
/// column's live type.
fn build_insert_sql(
    schema: &str,
    table: &str,
    columns: &[TargetColumn],
    rows: &[Row],
) -> Result<(String, Vec<Option<String>>)> {
    let col_list = columns
        .iter()
        .map(|c| ident_pg(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let casts: Vec<String> = columns.iter().map(TargetColumn::cast_type).collect();

    let mut placeholders = Vec::with_capacity(rows.len());
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut idx = 1;

    for row in rows {
        if row.len() != columns.len() {
            return Err(MigrateError::transfer(
                table,
                format!(
                    "row has {} values for {} columns",
                    row.len(),
                    columns.len()
                ),
            ));
        }
        let row_placeholders: Vec<String> = casts
            .iter()
            .map(|cast| {
                let p = format!("${}::text::{}", idx, cast);
                idx += 1;
                p
            })
            .collect();
        placeholders.push(format!("({})", row_placeholders.join(", ")));
        params.extend(row.iter().map(SqlValue::to_param_text));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify_pg(schema, table)?,
        col_list,
        placeholders.join(", ")
    );

    Ok((sql, params))
}

/// Plain drop: objects that depend on the table make it fail rather than
/// disappearing with it.
fn drop_table_sql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", qualify_pg(schema, table)?))
}

/// `setval` to one past the column maximum, never below 1. Binds the
/// qualified table ($1), the column ($2) and the sequence named in the
/// default ($3) as a fallback when the sequence is not owned by the column.
fn sync_sequence_sql(schema: &str, binding: &SequenceBinding) -> Result<String> {
    Ok(format!(
        "SELECT setval(
            COALESCE(pg_get_serial_sequence($1, $2), $3)::regclass,
            GREATEST(COALESCE((SELECT MAX({col})::bigint FROM {tbl}), 0), 0) + 1,
            false)",
        col = ident_pg(&binding.column)?,
        tbl = qualify_pg(schema, &binding.table)?
    ))
}
