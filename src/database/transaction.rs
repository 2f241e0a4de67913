//! Transactions and savepoints
//!
//! Writes inside a transaction land in the tables immediately (read-your-writes)
//! and leave a row delta in the transaction's undo log. A savepoint is a
//! position in that log; rolling back replays the deltas after it in reverse.

use super::crud::{check_not_referenced, check_parent_exists};
use crate::catalog::Catalog;
use crate::error::{Result, SqlError};
use crate::types::{Row, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transaction isolation level (recorded, informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Read uncommitted data
    ReadUncommitted,
    /// Read only committed data
    #[default]
    ReadCommitted,
    /// Repeatable reads within transaction
    RepeatableRead,
    /// Full serializable isolation
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    pub fn name(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    NoTransaction,
    Active,
    Committed,
    RolledBack,
}

/// One row change, with what is needed to take it back
///
/// 🚀 Old row images are shared, not deep-copied, when a delta is cloned
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOperation {
    /// A row was placed in an empty slot
    Insert { table_id: u64, slot: usize },
    /// The row in `slot` was replaced (old image kept)
    Update {
        table_id: u64,
        slot: usize,
        old_row: Arc<Row>,
    },
    /// The row in `slot` was removed (old image kept)
    Delete {
        table_id: u64,
        slot: usize,
        old_row: Arc<Row>,
    },
}

impl DeltaOperation {
    pub fn table_id(&self) -> u64 {
        match self {
            DeltaOperation::Insert { table_id, .. }
            | DeltaOperation::Update { table_id, .. }
            | DeltaOperation::Delete { table_id, .. } => *table_id,
        }
    }
}

/// Undo `deltas` newest-first, all or nothing. Deltas of tables dropped since
/// are skipped.
///
/// Other connections may have written since: a restored row image must not
/// collide with a live unique key or lose its parent, and a removed row must
/// not leave children behind. On the first such conflict every slot touched
/// so far is put back and the error is returned.
pub(crate) fn undo(catalog: &mut Catalog, deltas: &[DeltaOperation]) -> Result<usize> {
    let mut touched: Vec<(u64, usize, Option<Row>)> = Vec::new();
    let mut undone = 0;
    for delta in deltas.iter().rev() {
        match undo_one(catalog, delta, &mut touched) {
            Ok(true) => undone += 1,
            Ok(false) => {}
            Err(e) => {
                for (table_id, slot, row) in touched.into_iter().rev() {
                    if let Some(table) = catalog.table_by_id_mut(table_id) {
                        table.restore_slot(slot, row);
                    }
                }
                warn!(error = %e, "undo abandoned");
                return Err(e);
            }
        }
    }
    Ok(undone)
}

fn undo_one(
    catalog: &mut Catalog,
    delta: &DeltaOperation,
    touched: &mut Vec<(u64, usize, Option<Row>)>,
) -> Result<bool> {
    let table_id = delta.table_id();
    let Some(table) = catalog.table_by_id_mut(table_id) else {
        return Ok(false);
    };
    let name = table.name.clone();
    match delta {
        DeltaOperation::Insert { slot, .. } => {
            let current = table.restore_slot(*slot, None);
            touched.push((table_id, *slot, current.clone()));
            if let Some(current) = &current {
                check_not_referenced(catalog, &name, current, None)?;
            }
        }
        DeltaOperation::Update { slot, old_row, .. }
        | DeltaOperation::Delete { slot, old_row, .. } => {
            let mut row = (**old_row).clone();
            // columns added after the change read as null
            row.resize(table.columns().len(), Value::Null);
            table.check_unique(&row, Some(*slot))?;
            let current = table.restore_slot(*slot, Some(row.clone()));
            touched.push((table_id, *slot, current.clone()));
            check_parent_exists(catalog, &name, &row)?;
            if let Some(current) = &current {
                check_not_referenced(catalog, &name, current, Some(&row))?;
            }
        }
    }
    Ok(true)
}

/// Named position in the undo log
#[derive(Debug, Clone, PartialEq)]
pub struct Savepoint {
    pub name: String,
    /// Undo-log length when the savepoint was taken
    pub log_position: usize,
}

#[derive(Debug)]
pub struct Transaction {
    isolation: IsolationLevel,
    state: TransactionState,
    undo_log: Vec<DeltaOperation>,
    savepoints: Vec<Savepoint>,
}

impl Transaction {
    pub fn new(isolation: IsolationLevel) -> Self {
        info!(isolation = isolation.name(), "transaction started");
        Self {
            isolation,
            state: TransactionState::Active,
            undo_log: Vec::new(),
            savepoints: Vec::new(),
        }
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Savepoint names, oldest first
    pub fn savepoint_names(&self) -> Vec<String> {
        self.savepoints.iter().map(|s| s.name.clone()).collect()
    }

    /// Number of row deltas that a full rollback would undo
    pub fn pending_changes(&self) -> usize {
        self.undo_log.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SqlError::Transaction("Transaction is not active".into()))
        }
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SqlError::not_found("SAVEPOINT", name))
    }

    /// Append the deltas of one successful statement
    pub(crate) fn record(&mut self, deltas: Vec<DeltaOperation>) {
        self.undo_log.extend(deltas);
    }

    /// Push a savepoint; an older one with the same name is replaced
    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_active()?;
        self.savepoints.retain(|s| !s.name.eq_ignore_ascii_case(name));
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            log_position: self.undo_log.len(),
        });
        debug!(savepoint = name, position = self.undo_log.len(), "savepoint created");
        Ok(())
    }

    /// Undo everything after `name`; `name` itself stays on the stack
    pub(crate) fn rollback_to(&mut self, name: &str, catalog: &mut Catalog) -> Result<usize> {
        self.ensure_active()?;
        let index = self.position(name)?;
        let position = self.savepoints[index].log_position;
        let undone = undo(catalog, &self.undo_log[position..])?;
        self.undo_log.truncate(position);
        self.savepoints.truncate(index + 1);
        debug!(savepoint = name, undone, "rolled back to savepoint");
        Ok(undone)
    }

    /// Drop `name` and every later savepoint; their changes stay undoable by
    /// a full rollback
    pub fn release(&mut self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let index = self.position(name)?;
        self.savepoints.truncate(index);
        debug!(savepoint = name, "savepoint released");
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let changes = self.undo_log.len();
        self.undo_log.clear();
        self.savepoints.clear();
        self.state = TransactionState::Committed;
        info!(changes, "transaction committed");
        Ok(())
    }

    /// Undo the whole log. If a row image conflicts with what other
    /// connections wrote meanwhile, nothing is undone and the transaction
    /// stays active.
    pub(crate) fn rollback(&mut self, catalog: &mut Catalog) -> Result<usize> {
        self.ensure_active()?;
        let undone = undo(catalog, &self.undo_log)?;
        self.undo_log.clear();
        self.savepoints.clear();
        self.state = TransactionState::RolledBack;
        info!(undone, "transaction rolled back");
        Ok(undone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDef, ColumnType, IndexDef};

    fn catalog() -> (Catalog, u64) {
        let mut catalog = Catalog::new(true);
        let table = catalog.create_table("t").unwrap();
        table.add_column(ColumnDef::new("id", ColumnType::Integer)).unwrap();
        table.add_index(IndexDef::new("ux_id", &["id"]).unique()).unwrap();
        let id = table.id;
        (catalog, id)
    }

    fn insert(catalog: &mut Catalog, txn: &mut Transaction, table_id: u64, v: i64) {
        let slot = catalog
            .table_mut("t")
            .unwrap()
            .insert_row(vec![Value::Integer(v)])
            .unwrap();
        txn.record(vec![DeltaOperation::Insert { table_id, slot }]);
    }

    fn ids(catalog: &Catalog) -> Vec<i64> {
        catalog
            .table("t")
            .unwrap()
            .rows()
            .iter()
            .filter_map(|r| r[0].as_i64())
            .collect()
    }

    #[test]
    fn test_rollback_to_savepoint_round_trip() {
        let (mut catalog, id) = catalog();
        let mut txn = Transaction::new(IsolationLevel::default());
        insert(&mut catalog, &mut txn, id, 1);
        txn.savepoint("s").unwrap();
        insert(&mut catalog, &mut txn, id, 2);
        txn.savepoint("later").unwrap();
        insert(&mut catalog, &mut txn, id, 3);

        assert_eq!(txn.rollback_to("S", &mut catalog).unwrap(), 2);
        assert_eq!(ids(&catalog), vec![1]);
        assert_eq!(txn.savepoint_names(), vec!["s".to_string()]);
        assert!(txn.is_active());

        // index entries were removed with the rows
        insert(&mut catalog, &mut txn, id, 2);
        assert_eq!(ids(&catalog), vec![1, 2]);
    }

    #[test]
    fn test_release_keeps_changes_for_full_rollback() {
        let (mut catalog, id) = catalog();
        let mut txn = Transaction::new(IsolationLevel::Serializable);
        txn.savepoint("a").unwrap();
        insert(&mut catalog, &mut txn, id, 1);
        txn.savepoint("b").unwrap();
        insert(&mut catalog, &mut txn, id, 2);
        txn.release("a").unwrap();
        assert!(txn.savepoint_names().is_empty());
        assert_eq!(txn.rollback_to("b", &mut catalog).unwrap_err().code(), 1305);

        assert_eq!(txn.rollback(&mut catalog).unwrap(), 2);
        assert!(ids(&catalog).is_empty());
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert!(matches!(txn.commit(), Err(SqlError::Transaction(_))));
    }

    #[test]
    fn test_undo_restores_updated_and_deleted_rows() {
        let (mut catalog, id) = catalog();
        let mut txn = Transaction::new(IsolationLevel::default());
        insert(&mut catalog, &mut txn, id, 1);
        txn.commit().unwrap();

        let mut txn = Transaction::new(IsolationLevel::default());
        let table = catalog.table_mut("t").unwrap();
        let old = table.update_row(0, vec![Value::Integer(5)]).unwrap();
        txn.record(vec![DeltaOperation::Update {
            table_id: id,
            slot: 0,
            old_row: Arc::new(old),
        }]);
        let table = catalog.table_mut("t").unwrap();
        let old = table.delete_row(0).unwrap();
        txn.record(vec![DeltaOperation::Delete {
            table_id: id,
            slot: 0,
            old_row: Arc::new(old),
        }]);
        assert!(ids(&catalog).is_empty());

        txn.rollback(&mut catalog).unwrap();
        assert_eq!(ids(&catalog), vec![1]);
    }

    #[test]
    fn test_deltas_of_dropped_table_are_skipped() {
        let (mut catalog, id) = catalog();
        let mut txn = Transaction::new(IsolationLevel::default());
        insert(&mut catalog, &mut txn, id, 1);
        catalog.drop_table("t").unwrap();
        assert_eq!(txn.rollback(&mut catalog).unwrap(), 0);
    }

    #[test]
    fn test_conflicting_rollback_leaves_transaction_active() {
        let (mut catalog, id) = catalog();
        insert(&mut catalog, &mut Transaction::new(IsolationLevel::default()), id, 1);

        let mut txn = Transaction::new(IsolationLevel::default());
        txn.savepoint("s").unwrap();
        let old = catalog.table_mut("t").unwrap().delete_row(0).unwrap();
        txn.record(vec![DeltaOperation::Delete {
            table_id: id,
            slot: 0,
            old_row: Arc::new(old),
        }]);
        insert(&mut catalog, &mut txn, id, 2);
        // someone else takes key 1 while the delete is pending
        catalog
            .table_mut("t")
            .unwrap()
            .insert_row(vec![Value::Integer(1)])
            .unwrap();

        // removing row 2 succeeds first and is put back when row 1 collides
        let err = txn.rollback(&mut catalog).unwrap_err();
        assert_eq!(err.code(), 1062);
        assert!(txn.is_active());
        assert_eq!(txn.pending_changes(), 2);
        let mut now = ids(&catalog);
        now.sort();
        assert_eq!(now, vec![1, 2]);

        assert_eq!(txn.rollback_to("s", &mut catalog).unwrap_err().code(), 1062);
        assert_eq!(txn.pending_changes(), 2);
        txn.commit().unwrap();
    }
}
