//! Database Core - shared engine state
//!
//! This module contains:
//! - `Database` struct definition
//! - construction from an `EngineConfig`
//! - the programmatic schema API (tables, columns, indexes, keys, procedures)

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::database::metrics::Metrics;
use crate::dialect::Dialect;
use crate::error::{Result, SqlError};
use crate::sql::evaluator::{new_pattern_cache, PatternCache};
use crate::sql::executor::QueryExecutor;
use crate::types::{ColumnDef, ForeignKeyDef, IndexDef, Parameters, ProcedureDef, Row};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the unique index backing a primary key
pub const PRIMARY_INDEX: &str = "PRIMARY";

/// In-memory database shared by every connection opened on it
pub struct Database {
    /// Engine configuration
    pub(crate) config: EngineConfig,

    /// Dialect resolved from the configuration
    pub(crate) dialect: Dialect,

    /// Tables, views and procedures behind one database-wide lock
    pub(crate) catalog: RwLock<Catalog>,

    /// Database-wide counters; every connection forwards into these
    pub(crate) metrics: Arc<Metrics>,

    /// 🚀 Compiled LIKE patterns shared across connections
    pub(crate) pattern_cache: PatternCache,
}

impl Database {
    pub fn new(config: EngineConfig) -> Self {
        let dialect = config.build_dialect();
        info!(
            dialect = dialect.name(),
            version = dialect.version,
            thread_safe = config.thread_safe,
            "database created"
        );
        Self {
            catalog: RwLock::new(Catalog::new(dialect.text_comparison_case_insensitive)),
            config,
            dialect,
            metrics: Arc::new(Metrics::new()),
            pattern_cache: new_pattern_cache(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Database-wide metrics (sum over all connections)
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Open a connection sharing this database
    pub fn connect(self: &Arc<Self>) -> Connection {
        Connection::new(Arc::clone(self))
    }

    // Taken regardless of `thread_safe`
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write()
    }

    /// Executor over `catalog` wired to this database's dialect and caches
    pub(crate) fn query_executor<'a>(
        &'a self,
        catalog: &'a Catalog,
        params: &'a Parameters,
        metrics: &'a Metrics,
    ) -> QueryExecutor<'a> {
        QueryExecutor::new(catalog, &self.dialect, params)
            .with_metrics(metrics)
            .with_pattern_cache(self.pattern_cache.clone())
    }

    // ==================== Schema API ====================

    /// Create a table with the given columns
    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<()> {
        let mut catalog = self.write();
        let table = catalog.create_table(name)?;
        for column in columns {
            if let Err(e) = table.add_column(column) {
                catalog.drop_table(name)?;
                return Err(e);
            }
        }
        debug!(table = name, "table created");
        Ok(())
    }

    pub fn add_column(&self, table: &str, column: ColumnDef) -> Result<()> {
        self.write().table_mut(table)?.add_column(column)
    }

    /// Build an index over the table's current rows
    pub fn create_index(&self, table: &str, index: IndexDef) -> Result<()> {
        debug!(table, index = %index.name, unique = index.unique, "index created");
        self.write().table_mut(table)?.add_index(index)
    }

    /// Declare the primary key; a unique `PRIMARY` index enforces it
    pub fn set_primary_key(&self, table: &str, columns: &[&str]) -> Result<()> {
        let mut catalog = self.write();
        let table = catalog.table_mut(table)?;
        set_primary_key(table, columns.iter().map(|c| c.to_string()).collect())
    }

    pub fn create_foreign_key(&self, table: &str, fk: ForeignKeyDef) -> Result<()> {
        let mut catalog = self.write();
        add_foreign_key(&mut catalog, table, fk)
    }

    pub fn add_procedure(&self, name: &str, def: ProcedureDef) -> Result<()> {
        self.write().add_procedure(name, def)
    }

    // ==================== Inspection ====================

    pub fn table_names(&self) -> Vec<String> {
        self.read().table_names()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.read().has_table(name)
    }

    /// Snapshot of a table's live rows in insertion order
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.read().table(table)?.rows())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.read().table(table)?.len())
    }

    /// Run `f` with shared access to the catalog
    pub fn with_catalog<R>(&self, f: impl FnOnce(&Catalog) -> R) -> R {
        f(&self.read())
    }
}

pub(crate) fn set_primary_key(
    table: &mut crate::database::table::Table,
    columns: Vec<String>,
) -> Result<()> {
    let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let index = IndexDef::new(PRIMARY_INDEX, &refs).unique();
    table.set_primary_key(columns)?;
    if table.index(PRIMARY_INDEX).is_none() {
        table.add_index(index)?;
    }
    Ok(())
}

/// Validate the referenced side, then attach `fk` to `table`
pub(crate) fn add_foreign_key(catalog: &mut Catalog, table: &str, fk: ForeignKeyDef) -> Result<()> {
    if fk.columns.len() != fk.ref_columns.len() || fk.columns.is_empty() {
        return Err(SqlError::InvalidArgument(format!(
            "foreign key {} must pair each column with one referenced column",
            fk.name
        )));
    }
    let self_reference = fk.ref_table.eq_ignore_ascii_case(table);
    let parent_columns = if self_reference {
        catalog.table(table)?.column_names()
    } else {
        catalog.table(&fk.ref_table)?.column_names()
    };
    for c in &fk.ref_columns {
        if !parent_columns.iter().any(|p| p.eq_ignore_ascii_case(c)) {
            return Err(SqlError::unknown_column(c.clone()));
        }
    }
    debug!(table, fk = %fk.name, parent = %fk.ref_table, "foreign key added");
    catalog.table_mut(table)?.add_foreign_key(fk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn db() -> Database {
        let db = Database::new(EngineConfig::mysql());
        db.create_table(
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Integer).identity(),
                ColumnDef::new("name", ColumnType::Text).not_null(),
            ],
        )
        .unwrap();
        db
    }

    #[test]
    fn test_schema_api() {
        let db = db();
        db.set_primary_key("users", &["id"]).unwrap();
        db.create_index("users", IndexDef::new("ix_name", &["name"])).unwrap();
        db.with_catalog(|c| {
            let t = c.table("USERS").unwrap();
            assert!(t.primary_key_index().is_some());
            assert_eq!(t.indexes().len(), 2);
        });
        assert_eq!(db.table_names(), vec!["users".to_string()]);
        assert!(db.create_table("Users", vec![]).is_err());
    }

    #[test]
    fn test_foreign_key_validation() {
        let db = db();
        db.create_table("orders", vec![ColumnDef::new("user_id", ColumnType::Integer)])
            .unwrap();
        let err = db
            .create_foreign_key("orders", ForeignKeyDef::new("fk", &["user_id"], "nope", &["id"]))
            .unwrap_err();
        assert_eq!(err.code(), 1146);
        let err = db
            .create_foreign_key("orders", ForeignKeyDef::new("fk", &["user_id"], "users", &["zz"]))
            .unwrap_err();
        assert_eq!(err.code(), 1054);
        db.create_foreign_key("orders", ForeignKeyDef::new("fk", &["user_id"], "users", &["id"]))
            .unwrap();
    }

    #[test]
    fn test_failed_create_leaves_no_table() {
        let db = Database::new(EngineConfig::sqlite());
        let err = db
            .create_table(
                "t",
                vec![
                    ColumnDef::new("a", ColumnType::Integer),
                    ColumnDef::new("A", ColumnType::Text),
                ],
            )
            .unwrap_err();
        assert_eq!(err.code(), 1050);
        assert!(!db.has_table("t"));
        assert_eq!(db.rows("t").unwrap_err().code(), 1146);
    }
}
