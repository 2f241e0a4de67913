//! Database Module
//!
//! # Module Structure
//! - `core`: Database struct, construction and the programmatic schema API
//! - `crud`: DML (INSERT/UPDATE/DELETE) and DDL statement execution
//! - `table`: Row storage, secondary indexes and identity counters
//! - `metrics`: Per-connection and database-wide counters
//! - `transaction`: Undo-log transactions and savepoints
//! - `procedure`: Stored procedure contract validation

pub mod core;
pub mod crud;
pub mod table;
pub mod metrics;
pub mod transaction;
pub mod procedure;

// Re-export main types
pub use core::{Database, PRIMARY_INDEX};
pub use metrics::{Metrics, MetricsSnapshot};
pub use procedure::output_default;
pub use table::{Table, TableIndex};
pub use transaction::{DeltaOperation, IsolationLevel, Savepoint, Transaction, TransactionState};
