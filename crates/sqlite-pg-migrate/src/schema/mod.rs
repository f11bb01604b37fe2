//! Structure phase: recreate each source table on the target.
//!
//! Each table is translated in its own transaction: DROP the existing table,
//! CREATE it from the source metadata, COMMIT. Translation is not incremental;
//! every run replaces the table wholesale.

use tracing::{error, info, warn};

use crate::config::MappingConfig;
use crate::core::{ColumnDef, CreateTable, TableDescriptor};
use crate::error::{MigrateError, Result};
use crate::source::SourcePool;
use crate::target::{TargetPool, TargetTransaction};
use crate::typemap::{format_default, TypeFamily, TypeMapper};

/// Target type given to single-column integer keys.
const SERIAL_TYPE: &str = "BIGSERIAL";

/// Builds and executes target CREATE TABLE statements.
pub struct SchemaTranslator {
    mapper: TypeMapper,
    mapping: MappingConfig,
    serial_primary_keys: bool,
}

impl SchemaTranslator {
    pub fn new(mapper: TypeMapper, mapping: MappingConfig, serial_primary_keys: bool) -> Self {
        Self {
            mapper,
            mapping,
            serial_primary_keys,
        }
    }

    /// Read a table's metadata from the source, attaching any key override.
    pub async fn describe(&self, source: &dyn SourcePool, table: &str) -> Result<TableDescriptor> {
        describe_table(source, &self.mapping, table).await
    }

    /// Compose the CREATE TABLE statement for a described table.
    pub fn build_create(&self, table: &TableDescriptor, schema: &str) -> Result<CreateTable> {
        if table.columns.is_empty() {
            return Err(MigrateError::schema(&table.name, "table has no columns"));
        }
        if let Some(keys) = &table.structural_override {
            if let Some(missing) = keys.iter().find(|k| !table.column_names().contains(&k.as_str())) {
                return Err(MigrateError::schema(
                    &table.name,
                    format!("primary key override names unknown column {}", missing),
                ));
            }
        }

        let serial_column = self.serial_column(table);
        let columns = table
            .columns
            .iter()
            .map(|col| {
                if serial_column == Some(col.name.as_str()) {
                    return ColumnDef {
                        name: col.name.clone(),
                        data_type: SERIAL_TYPE.to_string(),
                        not_null: !col.nullable,
                        default_clause: None,
                    };
                }
                let data_type = self.mapper.resolve(&col.source_type, &table.name, &col.name);
                let default_clause = format_default(&data_type, col.default.as_deref());
                if col.default.is_some() && default_clause.is_none() {
                    warn!(
                        "{}.{}: dropping default {:?} not valid for {}",
                        table.name,
                        col.name,
                        col.default.as_deref().unwrap_or_default(),
                        data_type
                    );
                }
                ColumnDef {
                    name: col.name.clone(),
                    data_type,
                    not_null: !col.nullable,
                    default_clause,
                }
            })
            .collect();

        Ok(CreateTable {
            schema: schema.to_string(),
            table: table.name.clone(),
            columns,
            primary_key: table.primary_key().to_vec(),
        })
    }

    /// Recreate one table on the target inside its own transaction.
    ///
    /// Any failure rolls the transaction back and is returned as a schema error.
    pub async fn translate(
        &self,
        source: &dyn SourcePool,
        target: &dyn TargetPool,
        table: &str,
    ) -> Result<CreateTable> {
        let mut tx = target
            .begin()
            .await
            .map_err(|e| MigrateError::schema(table, e.to_string()))?;

        match self.translate_in(source, tx.as_mut(), target.schema(), table).await {
            Ok(create) => {
                tx.commit()
                    .await
                    .map_err(|e| MigrateError::schema(table, e.to_string()))?;
                info!("Created table {}", table);
                Ok(create)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("Rollback failed for {}: {}", table, rb);
                }
                error!("Error creating table {}: {}", table, e);
                Err(match e {
                    MigrateError::Schema { .. } => e,
                    other => MigrateError::schema(table, other.to_string()),
                })
            }
        }
    }

    /// Translate every table, continuing past failures.
    pub async fn translate_all(
        &self,
        source: &dyn SourcePool,
        target: &dyn TargetPool,
        tables: &[String],
    ) -> Vec<(String, Result<CreateTable>)> {
        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let result = self.translate(source, target, table).await;
            results.push((table.clone(), result));
        }
        results
    }

    async fn translate_in(
        &self,
        source: &dyn SourcePool,
        tx: &mut dyn TargetTransaction,
        schema: &str,
        table: &str,
    ) -> Result<CreateTable> {
        let descriptor = self.describe(source, table).await?;
        let create = self.build_create(&descriptor, schema)?;
        tx.drop_table(table).await?;
        tx.create_table(&create).await?;
        Ok(create)
    }

    /// Column that becomes BIGSERIAL, if any: the sole key column, of the
    /// integer family, with no explicit type override.
    fn serial_column<'a>(&self, table: &'a TableDescriptor) -> Option<&'a str> {
        if !self.serial_primary_keys {
            return None;
        }
        let [key] = table.primary_key() else {
            return None;
        };
        let col = table.columns.iter().find(|c| &c.name == key)?;
        let integer = TypeFamily::of(&col.source_type) == Some(TypeFamily::Integer);
        (integer && !self.mapper.has_override(&table.name, &col.name)).then_some(col.name.as_str())
    }
}

/// Read a table's metadata and attach the configured key override.
pub async fn describe_table(
    source: &dyn SourcePool,
    mapping: &MappingConfig,
    table: &str,
) -> Result<TableDescriptor> {
    let columns = source.load_columns(table).await?;
    let key_override = mapping.primary_key_override(table).map(<[String]>::to_vec);
    Ok(TableDescriptor::new(table, columns, key_override))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingConfig;
    use crate::core::ColumnDescriptor;
    use crate::source::SqliteSource;
    use crate::testing::FakeTarget;
    use crate::typemap::OverrideRule;
    use std::collections::BTreeMap;

    fn column(table: &str, name: &str, ty: &str, pk: Option<u32>) -> ColumnDescriptor {
        ColumnDescriptor {
            table: table.to_string(),
            name: name.to_string(),
            source_type: ty.to_string(),
            nullable: pk.is_none(),
            default: None,
            pk_position: pk,
        }
    }

    fn mapping() -> MappingConfig {
        let mut mapping = MappingConfig::default();
        mapping.primary_key_overrides.insert(
            "abilities".to_string(),
            vec!["group".into(), "model".into(), "channel_id".into()],
        );
        let mut cols = BTreeMap::new();
        cols.insert("only_chat".to_string(), "BOOLEAN".to_string());
        cols.insert("status".to_string(), "BIGINT".to_string());
        mapping.type_overrides.insert("channels".to_string(), cols);
        mapping
    }

    fn translator(serial: bool) -> SchemaTranslator {
        let mapping = mapping();
        SchemaTranslator::new(TypeMapper::from_config(&mapping), mapping, serial)
    }

    #[test]
    fn test_build_create_applies_overrides() {
        let mut only_chat = column("channels", "only_chat", "INTEGER", None);
        only_chat.default = Some("0".to_string());
        let table = TableDescriptor::new(
            "channels",
            vec![
                column("channels", "id", "INTEGER", Some(1)),
                only_chat,
                column("channels", "name", "varchar(64)", None),
            ],
            None,
        );
        let create = translator(true).build_create(&table, "public").unwrap();
        assert_eq!(create.columns[0].data_type, "BIGSERIAL");
        assert_eq!(create.columns[1].data_type, "BOOLEAN");
        assert_eq!(create.columns[1].default_clause.as_deref(), Some("DEFAULT FALSE"));
        assert_eq!(create.columns[2].data_type, "VARCHAR(64)");
        assert_eq!(create.primary_key, vec!["id"]);
    }

    #[test]
    fn test_serial_disabled_keeps_bigint() {
        let table = TableDescriptor::new(
            "users",
            vec![column("users", "id", "integer", Some(1))],
            None,
        );
        let create = translator(false).build_create(&table, "public").unwrap();
        assert_eq!(create.columns[0].data_type, "BIGINT");
    }

    #[test]
    fn test_serial_skipped_for_composite_and_text_keys() {
        let t = translator(true);
        let composite = TableDescriptor::new(
            "pairs",
            vec![
                column("pairs", "a", "integer", Some(1)),
                column("pairs", "b", "integer", Some(2)),
            ],
            None,
        );
        let create = t.build_create(&composite, "public").unwrap();
        assert!(create.columns.iter().all(|c| c.data_type == "BIGINT"));

        let text_key = TableDescriptor::new(
            "options",
            vec![column("options", "key", "TEXT", Some(1))],
            None,
        );
        assert_eq!(t.build_create(&text_key, "public").unwrap().columns[0].data_type, "TEXT");
    }

    #[test]
    fn test_structural_override_replaces_key_clause() {
        let table = TableDescriptor::new(
            "abilities",
            vec![
                column("abilities", "group", "varchar(32)", None),
                column("abilities", "model", "varchar(255)", None),
                column("abilities", "channel_id", "integer", Some(1)),
            ],
            Some(vec!["group".into(), "model".into(), "channel_id".into()]),
        );
        let create = translator(true).build_create(&table, "public").unwrap();
        assert_eq!(create.primary_key, vec!["group", "model", "channel_id"]);
        // Override key is composite, so no BIGSERIAL.
        assert_eq!(create.columns[2].data_type, "BIGINT");
        let sql = create.to_sql().unwrap();
        assert!(sql.contains("PRIMARY KEY (\"group\", model, channel_id)"));
        assert_eq!(sql.matches("PRIMARY KEY").count(), 1);
    }

    #[test]
    fn test_override_with_unknown_column_is_error() {
        let table = TableDescriptor::new(
            "abilities",
            vec![column("abilities", "model", "text", None)],
            Some(vec!["group".into()]),
        );
        assert!(matches!(
            translator(true).build_create(&table, "public"),
            Err(MigrateError::Schema { .. })
        ));
    }

    #[test]
    fn test_overridden_integer_key_is_not_serial() {
        let mut overrides = BTreeMap::new();
        let mut cols = BTreeMap::new();
        cols.insert("id".to_string(), "BIGINT".to_string());
        overrides.insert("t".to_string(), cols);
        let t = SchemaTranslator::new(
            TypeMapper::new(OverrideRule::new(overrides)),
            MappingConfig::default(),
            true,
        );
        let table = TableDescriptor::new("t", vec![column("t", "id", "integer", Some(1))], None);
        assert_eq!(t.build_create(&table, "public").unwrap().columns[0].data_type, "BIGINT");
    }

    async fn source() -> SqliteSource {
        let db = SqliteSource::in_memory().await.unwrap();
        db.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, access_token CHAR(32), quota REAL DEFAULT 0)")
            .await
            .unwrap();
        db.execute("CREATE TABLE abilities (\"group\" varchar(32), model varchar(255), channel_id integer, enabled numeric DEFAULT 1)")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_translate_is_idempotent() {
        let db = source().await;
        let target = FakeTarget::new();
        let t = translator(true);

        let first = t.translate(&db, &target, "users").await.unwrap();
        let second = t.translate(&db, &target, "users").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(target.created("users"), Some(second));
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back_and_continues() {
        let db = source().await;
        let target = FakeTarget::new();
        target.fail_create("users");

        let results = translator(true)
            .translate_all(&db, &target, &["users".to_string(), "abilities".to_string()])
            .await;
        assert!(matches!(results[0].1, Err(MigrateError::Schema { .. })));
        assert!(results[1].1.is_ok());
        assert!(target.created("users").is_none());
        let abilities = target.created("abilities").unwrap();
        assert_eq!(abilities.primary_key, vec!["group", "model", "channel_id"]);
    }

    #[tokio::test]
    async fn test_failed_recreate_keeps_previous_table() {
        let db = source().await;
        let target = FakeTarget::new();
        let t = translator(true);
        t.translate(&db, &target, "users").await.unwrap();

        target.fail_create("users");
        assert!(t.translate(&db, &target, "users").await.is_err());
        // The DROP was rolled back with the failed CREATE.
        assert!(target.created("users").is_some());
    }
}
