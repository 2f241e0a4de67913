//! sqlmem - dialect-aware in-memory SQL engine
//!
//! Executes SQL against in-memory tables while enforcing the syntax and
//! constraint rules of a chosen database product, so data-access code can be
//! tested without a server.
//!
//! ## Dialects
//! MySQL, PostgreSQL, Oracle, DB2, SQLite and SQL Server, each with a version
//! that gates newer constructs (CTEs, OFFSET/FETCH, MERGE, JSON operators...).
//!
//! ## Architecture
//! - SQL layer: dialect-aware lexer + parser, value resolver, evaluator, executor
//! - Schema layer: case-insensitive catalog of tables, frozen views, procedures
//! - Storage: slot arenas with hash indexes (unique and secondary)
//! - Transactions: undo log of row deltas with nested savepoints
//!
//! ```no_run
//! use sqlmem::{Database, EngineConfig, Parameters};
//! use std::sync::Arc;
//!
//! let db = Arc::new(Database::new(EngineConfig::mysql()));
//! let mut conn = db.connect();
//! conn.execute("CREATE TABLE users (id INT PRIMARY KEY AUTO_INCREMENT, name TEXT)", &Parameters::new())?;
//! conn.execute("INSERT INTO users (name) VALUES (@name)", &Parameters::new().add("@name", "Ann"))?;
//! let rows = conn.query("SELECT id, name FROM users", &Parameters::new())?;
//! assert_eq!(rows.len(), 1);
//! # Ok::<(), sqlmem::SqlError>(())
//! ```

pub mod config;
pub mod dialect;
pub mod types;
pub mod catalog;
pub mod sql;
pub mod database;
pub mod connection;

mod error;

pub use config::EngineConfig;
pub use error::{ErrorKind, Result, SqlError};
pub use dialect::{Dialect, DialectKind, Feature};

pub use types::{
    ColumnDef, ColumnType, ForeignKeyDef, IndexDef, Parameter, ParameterDirection, Parameters,
    ProcedureDef, Row, Value,
};
pub use catalog::{Catalog, ViewDef};
pub use database::{
    Database, IsolationLevel, Metrics, MetricsSnapshot, Table, TransactionState, PRIMARY_INDEX,
};
pub use connection::Connection;
pub use sql::{QueryResult, RowSet};
