//! CRUD Operations Module
//!
//! Executes INSERT / UPDATE / DELETE and DDL statements against the catalog.
//!
//! # Flow
//! Every DML statement runs under the exclusive catalog lock in two phases:
//! 1. Plan: evaluate source rows, SET expressions and WHERE matches with shared
//!    access to the catalog
//! 2. Apply: mutate the table, checking constraints per row and recording a
//!    `DeltaOperation` for each change
//!
//! If the apply phase fails, the statement's own deltas are undone before the
//! error is returned, so no statement is ever half-applied.

use super::core::{add_foreign_key, set_primary_key, Database};
use super::metrics::Metrics;
use super::table::Table;
use super::transaction::{undo, DeltaOperation};
use crate::catalog::{Catalog, ViewDef};
use crate::error::{Result, SqlError};
use crate::sql::ast::{
    ConflictAction, CreateIndexStmt, CreateTableAsStmt, CreateTableStmt, CreateViewStmt,
    DeleteStmt, Expr, InsertSource, InsertStmt, MergeAction, MergeStmt, OnConflict, UpdateStmt,
};
use crate::sql::evaluator::{ColumnBinding, ExprEvaluator, RowScope};
use crate::sql::executor::bindings_for;
use crate::sql::parser::EXCLUDED;
use crate::sql::resolver::coerce;
use crate::types::{ColumnDef, ColumnType, DefaultValue, IndexDef, Parameters, Row, Value};
use ahash::AHashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows affected plus the deltas that would undo the statement
pub(crate) type Applied = (usize, Vec<DeltaOperation>);

/// What an INSERT did, row by row
#[derive(Debug, Default)]
struct InsertOutcome {
    inserted: usize,
    updated: usize,
    /// Client-visible count (a MySQL upsert update counts twice)
    affected: usize,
}

/// One planned MERGE change
enum MergeStep {
    Update(usize, Row),
    Delete(usize),
    Insert(Vec<usize>, Vec<Value>),
}

impl Database {
    // ==================== INSERT ====================

    pub(crate) fn execute_insert(
        &self,
        stmt: &InsertStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<Applied> {
        let mut catalog = self.write();

        // 1. Plan: target columns and fully evaluated source rows
        let (targets, rows) = {
            let catalog = &*catalog;
            let table = catalog.table(&stmt.table)?;
            let targets = target_positions(table, stmt.columns.as_deref())?;

            let exec = self.query_executor(catalog, params, metrics);
            let rows = match &stmt.source {
                InsertSource::Values(value_rows) => {
                    let ev = exec.evaluator();
                    let mut rows = Vec::with_capacity(value_rows.len());
                    for exprs in value_rows {
                        if exprs.len() != targets.len() {
                            return Err(SqlError::ColumnCountMismatch);
                        }
                        let values = exprs
                            .iter()
                            .map(|e| ev.eval(e, &RowScope::empty()))
                            .collect::<Result<Vec<_>>>()
                            .map_err(|e| e.in_clause("field list"))?;
                        rows.push(values);
                    }
                    rows
                }
                InsertSource::Query(query) => {
                    let rs = exec.execute_query(query)?;
                    if rs.columns.len() != targets.len() {
                        return Err(SqlError::ColumnCountMismatch);
                    }
                    rs.rows
                }
            };
            (targets, rows)
        };

        // 2. Apply
        let mut deltas = Vec::with_capacity(rows.len());
        let applied = self.insert_rows(
            &mut catalog,
            stmt,
            &targets,
            rows,
            (params, metrics),
            &mut deltas,
        );
        match applied {
            Ok(outcome) => {
                metrics.record_inserts(outcome.inserted as u64);
                metrics.record_updates(outcome.updated as u64);
                debug!(
                    table = %stmt.table,
                    inserted = outcome.inserted,
                    updated = outcome.updated,
                    "insert"
                );
                Ok((outcome.affected, deltas))
            }
            Err(e) => {
                revert(&mut catalog, &deltas);
                Err(e)
            }
        }
    }

    fn insert_rows(
        &self,
        catalog: &mut Catalog,
        stmt: &InsertStmt,
        targets: &[usize],
        rows: Vec<Row>,
        (params, metrics): (&Parameters, &Metrics),
        deltas: &mut Vec<DeltaOperation>,
    ) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        for values in rows {
            let table = catalog.table_mut(&stmt.table)?;
            let row = self.build_row(table, targets, values)?;

            if let Some(conflict) = &stmt.on_conflict {
                if let Some(slot) = table.conflicting_slot(&row, &conflict.columns)? {
                    if let ConflictAction::Update {
                        assignments,
                        filter,
                    } = &conflict.action
                    {
                        let change = {
                            let catalog = &*catalog;
                            let exec = self.query_executor(catalog, params, metrics);
                            self.upsert_image(
                                catalog.table(&stmt.table)?,
                                slot,
                                &row,
                                conflict,
                                (assignments, filter.as_ref()),
                                &exec.evaluator(),
                            )?
                        };
                        if let Some(new_row) = change {
                            let changed = catalog.table(&stmt.table)?.row(slot) != Some(&new_row);
                            update_rows(catalog, &stmt.table, vec![(slot, new_row)], deltas)?;
                            outcome.updated += 1;
                            outcome.affected +=
                                match (self.dialect.upsert_update_counts_twice, changed) {
                                    (true, true) => 2,
                                    (true, false) => 0,
                                    (false, _) => 1,
                                };
                        }
                    }
                    continue;
                }
            }

            insert_checked(catalog, &stmt.table, row, deltas)?;
            outcome.inserted += 1;
            outcome.affected += 1;
        }
        Ok(outcome)
    }

    /// New image of the row in `slot` after an upsert's SET list, or `None`
    /// when the WHERE filter keeps it as is
    fn upsert_image(
        &self,
        table: &Table,
        slot: usize,
        proposed: &Row,
        conflict: &OnConflict,
        (assignments, filter): (&[(String, Expr)], Option<&Expr>),
        ev: &ExprEvaluator<'_>,
    ) -> Result<Option<Row>> {
        let existing = table
            .row(slot)
            .ok_or_else(|| SqlError::InvalidArgument(format!("slot {} is empty", slot)))?;

        // existing row first, so bare names mean the stored values
        let mut columns = bindings_for(table, &table.name);
        let mut values = existing.clone();
        columns.extend(bindings_for(table, &conflict.row_alias));
        values.extend(proposed.iter().cloned());
        if !conflict.row_alias.eq_ignore_ascii_case(EXCLUDED) {
            columns.extend(bindings_for(table, EXCLUDED));
            values.extend(proposed.iter().cloned());
        }
        let scope = RowScope::new(&columns, &values);

        if let Some(filter) = filter {
            if !ev
                .eval_predicate(filter, &scope)
                .map_err(|e| e.in_clause("where clause"))?
            {
                return Ok(None);
            }
        }
        let mut new_row = existing.clone();
        for (name, expr) in assignments {
            let pos = table
                .column_index(name)
                .ok_or_else(|| SqlError::unknown_column(name.clone()))?;
            let value = ev.eval(expr, &scope).map_err(|e| e.in_clause("field list"))?;
            new_row[pos] = coerce(value, &table.columns()[pos], &self.dialect)?;
        }
        Ok(Some(new_row))
    }

    /// Full row for `table` from the listed values, defaults and identity
    fn build_row(&self, table: &mut Table, targets: &[usize], values: Vec<Value>) -> Result<Row> {
        let width = table.columns().len();
        let mut row = vec![Value::Null; width];
        let mut provided = vec![false; width];
        for (&pos, value) in targets.iter().zip(values) {
            row[pos] = value;
            provided[pos] = true;
        }

        for pos in 0..width {
            let column = table.columns()[pos].clone();
            if !provided[pos] {
                row[pos] = match &column.default {
                    Some(DefaultValue::Literal(v)) => v.clone(),
                    Some(DefaultValue::CurrentTimestamp) => {
                        Value::DateTime(chrono::Local::now().naive_local())
                    }
                    Some(DefaultValue::NewGuid) => Value::Guid(uuid::Uuid::new_v4()),
                    None => Value::Null,
                };
            }
            if column.identity && row[pos].is_null() {
                row[pos] = Value::Integer(table.next_identity());
            }
            let value = std::mem::replace(&mut row[pos], Value::Null);
            row[pos] = coerce(value, &column, &self.dialect)?;
            if column.identity {
                if let Some(v) = row[pos].as_i64() {
                    table.observe_identity(v);
                }
            }
        }
        Ok(row)
    }

    // ==================== UPDATE ====================

    pub(crate) fn execute_update(
        &self,
        stmt: &UpdateStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<Applied> {
        let mut catalog = self.write();

        // 1. Plan: new images of every matched row
        let changes = {
            let catalog = &*catalog;
            let table = catalog.table(&stmt.table)?;
            let assignments = stmt
                .assignments
                .iter()
                .map(|(name, expr)| {
                    table
                        .column_index(name)
                        .map(|pos| (pos, expr))
                        .ok_or_else(|| SqlError::unknown_column(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?;

            let exec = self.query_executor(catalog, params, metrics);
            let alias = stmt.alias.as_deref();
            let filter = stmt.where_clause.as_ref();
            // SET reads each target row, joined with its first match if any
            let (bindings, matched): (Vec<ColumnBinding>, Vec<(usize, Row)>) =
                if stmt.joins.is_empty() {
                    let rows = exec
                        .matching_slots(table, alias, filter)?
                        .into_iter()
                        .filter_map(|slot| table.row(slot).map(|r| (slot, r.clone())))
                        .collect();
                    (bindings_for(table, alias.unwrap_or(&table.name)), rows)
                } else {
                    exec.joined_targets(table, alias, &stmt.joins, filter)?
                };
            let ev = exec.evaluator();

            let mut changes = Vec::with_capacity(matched.len());
            for (slot, visible) in &matched {
                let Some(old) = table.row(*slot) else {
                    continue;
                };
                let scope = RowScope::new(&bindings, visible);
                let mut new_row = old.clone();
                for (pos, expr) in &assignments {
                    let value = ev.eval(expr, &scope).map_err(|e| e.in_clause("field list"))?;
                    new_row[*pos] = coerce(value, &table.columns()[*pos], &self.dialect)?;
                }
                changes.push((*slot, new_row));
            }
            changes
        };

        // 2. Apply
        let mut deltas = Vec::with_capacity(changes.len());
        match update_rows(&mut catalog, &stmt.table, changes, &mut deltas) {
            Ok(updated) => {
                metrics.record_updates(updated as u64);
                debug!(table = %stmt.table, updated, "update");
                Ok((updated, deltas))
            }
            Err(e) => {
                revert(&mut catalog, &deltas);
                Err(e)
            }
        }
    }

    // ==================== DELETE ====================

    pub(crate) fn execute_delete(
        &self,
        stmt: &DeleteStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<Applied> {
        let mut catalog = self.write();

        let slots = {
            let catalog = &*catalog;
            let table = catalog.table(&stmt.table)?;
            let exec = self.query_executor(catalog, params, metrics);
            let alias = stmt.alias.as_deref();
            let filter = stmt.where_clause.as_ref();
            if stmt.joins.is_empty() {
                exec.matching_slots(table, alias, filter)?
            } else {
                let (_, matched) = exec.joined_targets(table, alias, &stmt.joins, filter)?;
                matched.into_iter().map(|(slot, _)| slot).collect()
            }
        };

        let mut deltas = Vec::with_capacity(slots.len());
        match delete_rows(&mut catalog, &stmt.table, slots, &mut deltas) {
            Ok(deleted) => {
                metrics.record_deletes(deleted as u64);
                debug!(table = %stmt.table, deleted, "delete");
                Ok((deleted, deltas))
            }
            Err(e) => {
                revert(&mut catalog, &deltas);
                Err(e)
            }
        }
    }

    // ==================== MERGE ====================

    pub(crate) fn execute_merge(
        &self,
        stmt: &MergeStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<Applied> {
        let mut catalog = self.write();

        // 1. Plan against the target as it was before the statement
        let steps = {
            let catalog = &*catalog;
            let table = catalog.table(&stmt.target)?;
            let exec = self.query_executor(catalog, params, metrics);
            let (bindings, pairs) =
                exec.merge_pairs(table, stmt.alias.as_deref(), &stmt.source, &stmt.on)?;
            let ev = exec.evaluator();

            let mut touched = AHashSet::new();
            let mut steps = Vec::new();
            for (slot, row) in &pairs {
                let scope = RowScope::new(&bindings, row);
                let mut chosen = None;
                for clause in stmt.clauses.iter().filter(|c| c.matched == slot.is_some()) {
                    let hit = match &clause.condition {
                        Some(condition) => ev
                            .eval_predicate(condition, &scope)
                            .map_err(|e| e.in_clause("on clause"))?,
                        None => true,
                    };
                    if hit {
                        chosen = Some(&clause.action);
                        break;
                    }
                }
                let Some(action) = chosen else {
                    continue;
                };

                if let Some(slot) = slot {
                    if !touched.insert(*slot) {
                        return Err(SqlError::InvalidArgument(format!(
                            "MERGE would change the row in '{}' more than once",
                            table.name
                        )));
                    }
                }
                let step = match (action, slot) {
                    (MergeAction::Update(assignments), Some(slot)) => {
                        let Some(old) = table.row(*slot) else {
                            continue;
                        };
                        let mut new_row = old.clone();
                        for (name, expr) in assignments {
                            let pos = table
                                .column_index(name)
                                .ok_or_else(|| SqlError::unknown_column(name.clone()))?;
                            let value =
                                ev.eval(expr, &scope).map_err(|e| e.in_clause("field list"))?;
                            new_row[pos] = coerce(value, &table.columns()[pos], &self.dialect)?;
                        }
                        MergeStep::Update(*slot, new_row)
                    }
                    (MergeAction::Delete, Some(slot)) => MergeStep::Delete(*slot),
                    (MergeAction::Insert { columns, values }, None) => {
                        let targets = target_positions(table, columns.as_deref())?;
                        if values.len() != targets.len() {
                            return Err(SqlError::ColumnCountMismatch);
                        }
                        let values = values
                            .iter()
                            .map(|e| ev.eval(e, &scope))
                            .collect::<Result<Vec<_>>>()
                            .map_err(|e| e.in_clause("field list"))?;
                        MergeStep::Insert(targets, values)
                    }
                    _ => continue,
                };
                steps.push(step);
            }
            steps
        };

        // 2. Apply in source order
        let mut deltas = Vec::with_capacity(steps.len());
        match self.apply_merge(&mut catalog, &stmt.target, steps, &mut deltas) {
            Ok((inserted, updated, deleted)) => {
                metrics.record_inserts(inserted as u64);
                metrics.record_updates(updated as u64);
                metrics.record_deletes(deleted as u64);
                debug!(table = %stmt.target, inserted, updated, deleted, "merge");
                Ok((inserted + updated + deleted, deltas))
            }
            Err(e) => {
                revert(&mut catalog, &deltas);
                Err(e)
            }
        }
    }

    /// Returns (inserted, updated, deleted)
    fn apply_merge(
        &self,
        catalog: &mut Catalog,
        table_name: &str,
        steps: Vec<MergeStep>,
        deltas: &mut Vec<DeltaOperation>,
    ) -> Result<(usize, usize, usize)> {
        let (mut inserted, mut updated, mut deleted) = (0, 0, 0);
        for step in steps {
            match step {
                MergeStep::Update(slot, new_row) => {
                    updated += update_rows(catalog, table_name, vec![(slot, new_row)], deltas)?;
                }
                MergeStep::Delete(slot) => {
                    deleted += delete_rows(catalog, table_name, vec![slot], deltas)?;
                }
                MergeStep::Insert(targets, values) => {
                    let row = self.build_row(catalog.table_mut(table_name)?, &targets, values)?;
                    insert_checked(catalog, table_name, row, deltas)?;
                    inserted += 1;
                }
            }
        }
        Ok((inserted, updated, deleted))
    }

    // ==================== DDL ====================

    pub(crate) fn execute_create_table(&self, stmt: &CreateTableStmt) -> Result<String> {
        let mut catalog = self.write();
        if catalog.has_table(&stmt.name) && stmt.if_not_exists {
            return Ok(format!("Table '{}' already exists", stmt.name));
        }
        catalog.create_table(&stmt.name)?;
        if let Err(e) = build_table(&mut catalog, stmt) {
            warn!(table = %stmt.name, error = %e, "create table failed");
            catalog.drop_table(&stmt.name)?;
            return Err(e);
        }
        debug!(table = %stmt.name, columns = stmt.columns.len(), "table created");
        Ok(format!("Table '{}' created", stmt.name))
    }

    pub(crate) fn execute_create_table_as(
        &self,
        stmt: &CreateTableAsStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<String> {
        let mut catalog = self.write();
        if catalog.has_table(&stmt.name) && stmt.if_not_exists {
            return Ok(format!("Table '{}' already exists", stmt.name));
        }
        let rs = self
            .query_executor(&catalog, params, metrics)
            .execute_query(&stmt.query)?;

        let table = catalog.create_table(&stmt.name)?;
        table.temporary = stmt.temporary;
        for (i, name) in rs.columns.iter().enumerate() {
            let col_type = infer_column_type(rs.rows.iter().map(|r| &r[i]));
            table.add_column(ColumnDef::new(name.clone(), col_type))?;
        }
        let count = rs.rows.len();
        for row in rs.rows {
            table.insert_row(row)?;
        }
        debug!(table = %stmt.name, rows = count, "table created from query");
        Ok(format!("Table '{}' created with {} row(s)", stmt.name, count))
    }

    pub(crate) fn execute_create_index(&self, stmt: &CreateIndexStmt) -> Result<String> {
        let columns: Vec<&str> = stmt.columns.iter().map(String::as_str).collect();
        let mut def = IndexDef::new(stmt.name.clone(), &columns);
        def.unique = stmt.unique;
        self.create_index(&stmt.table, def)?;
        Ok(format!("Index '{}' created", stmt.name))
    }

    pub(crate) fn execute_create_view(
        &self,
        stmt: &CreateViewStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<String> {
        let mut catalog = self.write();
        if catalog.has_view(&stmt.name) && stmt.if_not_exists {
            return Ok(format!("View '{}' already exists", stmt.name));
        }
        // frozen: the query runs once, here
        let mut rs = self
            .query_executor(&catalog, params, metrics)
            .execute_query(&stmt.query)?;
        if !stmt.columns.is_empty() {
            if stmt.columns.len() != rs.columns.len() {
                return Err(SqlError::ColumnCountMismatch);
            }
            rs.columns = stmt.columns.clone();
        }
        catalog.create_view(
            ViewDef {
                name: stmt.name.clone(),
                columns: rs.columns,
                rows: rs.rows,
            },
            stmt.or_replace,
        )?;
        debug!(view = %stmt.name, "view created");
        Ok(format!("View '{}' created", stmt.name))
    }

    pub(crate) fn execute_drop_table(&self, name: &str, if_exists: bool) -> Result<String> {
        let mut catalog = self.write();
        if !catalog.has_table(name) && if_exists {
            return Ok(format!("Table '{}' does not exist", name));
        }
        catalog.drop_table(name)?;
        debug!(table = name, "table dropped");
        Ok(format!("Table '{}' dropped", name))
    }

    pub(crate) fn execute_drop_view(&self, name: &str, if_exists: bool) -> Result<String> {
        let mut catalog = self.write();
        if !catalog.has_view(name) && if_exists {
            return Ok(format!("View '{}' does not exist", name));
        }
        catalog.drop_view(name)?;
        debug!(view = name, "view dropped");
        Ok(format!("View '{}' dropped", name))
    }
}

/// Take back a failed statement's own changes (nothing else ran under the lock)
fn revert(catalog: &mut Catalog, deltas: &[DeltaOperation]) {
    if let Err(e) = undo(catalog, deltas) {
        warn!(error = %e, "statement revert failed");
    }
}

fn build_table(catalog: &mut Catalog, stmt: &CreateTableStmt) -> Result<()> {
    let table = catalog.table_mut(&stmt.name)?;
    table.temporary = stmt.temporary;
    for column in &stmt.columns {
        table.add_column(column.clone())?;
    }
    if !stmt.primary_key.is_empty() {
        set_primary_key(table, stmt.primary_key.clone())?;
    }
    for index in &stmt.indexes {
        table.add_index(index.clone())?;
    }
    for fk in &stmt.foreign_keys {
        add_foreign_key(catalog, &stmt.name, fk.clone())?;
    }
    Ok(())
}

fn update_rows(
    catalog: &mut Catalog,
    table_name: &str,
    changes: Vec<(usize, Row)>,
    deltas: &mut Vec<DeltaOperation>,
) -> Result<usize> {
    let mut updated = 0;
    for (slot, new_row) in changes {
        let old = catalog
            .table(table_name)?
            .row(slot)
            .cloned()
            .ok_or_else(|| SqlError::InvalidArgument(format!("slot {} is empty", slot)))?;
        if old != new_row {
            check_parent_exists(catalog, table_name, &new_row)?;
            check_not_referenced(catalog, table_name, &old, Some(&new_row))?;
        }

        let table = catalog.table_mut(table_name)?;
        let identities: Vec<i64> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.identity)
            .filter_map(|(pos, _)| new_row[pos].as_i64())
            .collect();
        let old = table.update_row(slot, new_row)?;
        for v in identities {
            table.observe_identity(v);
        }
        deltas.push(DeltaOperation::Update {
            table_id: table.id,
            slot,
            old_row: Arc::new(old),
        });
        updated += 1;
    }
    Ok(updated)
}

fn delete_rows(
    catalog: &mut Catalog,
    table_name: &str,
    slots: Vec<usize>,
    deltas: &mut Vec<DeltaOperation>,
) -> Result<usize> {
    let mut deleted = 0;
    for slot in slots {
        let Some(old) = catalog.table(table_name)?.row(slot).cloned() else {
            continue;
        };
        check_not_referenced(catalog, table_name, &old, None)?;
        let table = catalog.table_mut(table_name)?;
        if let Some(old) = table.delete_row(slot) {
            deltas.push(DeltaOperation::Delete {
                table_id: table.id,
                slot,
                old_row: Arc::new(old),
            });
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Column positions an INSERT column list names (all columns when absent)
fn target_positions(table: &Table, columns: Option<&[String]>) -> Result<Vec<usize>> {
    match columns {
        None => Ok((0..table.columns().len()).collect()),
        Some(names) => names
            .iter()
            .map(|n| {
                table
                    .column_index(n)
                    .ok_or_else(|| SqlError::unknown_column(n.clone()))
            })
            .collect(),
    }
}

fn insert_checked(
    catalog: &mut Catalog,
    table_name: &str,
    row: Row,
    deltas: &mut Vec<DeltaOperation>,
) -> Result<()> {
    check_parent_exists(catalog, table_name, &row)?;
    let table = catalog.table_mut(table_name)?;
    let slot = table.insert_row(row)?;
    deltas.push(DeltaOperation::Insert {
        table_id: table.id,
        slot,
    });
    Ok(())
}

/// Child side: every non-null foreign key of `row` must match a parent row
pub(crate) fn check_parent_exists(catalog: &Catalog, table_name: &str, row: &Row) -> Result<()> {
    let table = catalog.table(table_name)?;
    for fk in table.foreign_keys() {
        let values = key_values(table, &fk.columns, row)?;
        if values.iter().any(Value::is_null) {
            continue;
        }
        let parent = catalog.table(&fk.ref_table)?;
        if !parent.contains_key(&fk.ref_columns, &values) {
            return Err(SqlError::ForeignKeyViolation {
                constraint: fk.name.clone(),
            });
        }
    }
    Ok(())
}

/// Parent side: no child row may still point at `old` once it changes to
/// `new` (or is deleted when `new` is `None`)
pub(crate) fn check_not_referenced(
    catalog: &Catalog,
    table_name: &str,
    old: &Row,
    new: Option<&Row>,
) -> Result<()> {
    let parent = catalog.table(table_name)?;
    for child in catalog.tables() {
        for fk in child
            .foreign_keys()
            .iter()
            .filter(|fk| fk.ref_table.eq_ignore_ascii_case(table_name))
        {
            let old_key = key_values(parent, &fk.ref_columns, old)?;
            if old_key.iter().any(Value::is_null) {
                continue;
            }
            if let Some(new) = new {
                let new_key = key_values(parent, &fk.ref_columns, new)?;
                if parent.key_of(&new_key) == parent.key_of(&old_key) {
                    continue;
                }
            }
            if child.contains_key(&fk.columns, &old_key) {
                return Err(SqlError::ReferencedRow {
                    constraint: fk.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn key_values(table: &Table, columns: &[String], row: &Row) -> Result<Vec<Value>> {
    columns
        .iter()
        .map(|c| {
            table
                .column_index(c)
                .map(|pos| row[pos].clone())
                .ok_or_else(|| SqlError::unknown_column(c.clone()))
        })
        .collect()
}

/// Column type for CREATE TABLE AS: the first non-null value decides
fn infer_column_type<'a>(mut values: impl Iterator<Item = &'a Value>) -> ColumnType {
    match values.find(|v| !v.is_null()) {
        Some(Value::Integer(_)) => ColumnType::Integer,
        Some(Value::Decimal(_)) => ColumnType::Decimal,
        Some(Value::Float(_)) => ColumnType::Float,
        Some(Value::Bool(_)) => ColumnType::Boolean,
        Some(Value::DateTime(_)) => ColumnType::DateTime,
        Some(Value::Guid(_)) => ColumnType::Guid,
        Some(Value::Json(_)) => ColumnType::Json,
        _ => ColumnType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::sql::ast::Statement;
    use crate::sql::parse;
    use crate::types::ForeignKeyDef;

    fn setup() -> (Database, Metrics) {
        let db = Database::new(EngineConfig::mysql());
        db.create_table(
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Integer).identity(),
                ColumnDef::new("name", ColumnType::Text).not_null().with_size(10),
                ColumnDef::new("email", ColumnType::Text),
                ColumnDef::new("active", ColumnType::Boolean).with_default(true),
            ],
        )
        .unwrap();
        db.set_primary_key("users", &["id"]).unwrap();
        db.create_index("users", IndexDef::new("ux_email", &["email"]).unique())
            .unwrap();
        db.create_table(
            "orders",
            vec![
                ColumnDef::new("id", ColumnType::Integer).identity(),
                ColumnDef::new("user_id", ColumnType::Integer),
            ],
        )
        .unwrap();
        db.create_foreign_key(
            "orders",
            ForeignKeyDef::new("fk_orders_users", &["user_id"], "users", &["id"]),
        )
        .unwrap();
        (db, Metrics::new())
    }

    fn run(db: &Database, metrics: &Metrics, sql: &str) -> Result<usize> {
        let params = Parameters::new();
        match parse(sql, db.dialect())? {
            Statement::Insert(s) => db.execute_insert(&s, &params, metrics).map(|(n, _)| n),
            Statement::Update(s) => db.execute_update(&s, &params, metrics).map(|(n, _)| n),
            Statement::Delete(s) => db.execute_delete(&s, &params, metrics).map(|(n, _)| n),
            Statement::Merge(s) => db.execute_merge(&s, &params, metrics).map(|(n, _)| n),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_insert_defaults_and_identity() {
        let (db, m) = setup();
        assert_eq!(
            run(&db, &m, "INSERT INTO users (name) VALUES ('a'), ('b')").unwrap(),
            2
        );
        run(&db, &m, "INSERT INTO users (id, name) VALUES (NULL, 'c')").unwrap();
        let rows = db.rows("users").unwrap();
        let ids: Vec<i64> = rows.iter().filter_map(|r| r[0].as_i64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rows[0][3], Value::Bool(true));
        assert_eq!(m.inserts(), 3);
    }

    #[test]
    fn test_insert_is_atomic_on_duplicate() {
        let (db, m) = setup();
        let err = run(
            &db,
            &m,
            "INSERT INTO users (name, email) VALUES ('a', 'x@y'), ('b', 'X@Y')",
        )
        .unwrap_err();
        assert_eq!(err.code(), 1062);
        assert_eq!(err.to_string(), "Duplicate entry 'X@Y' for key 'ux_email'");
        assert_eq!(db.row_count("users").unwrap(), 0);
    }

    #[test]
    fn test_insert_constraint_errors() {
        let (db, m) = setup();
        assert_eq!(
            run(&db, &m, "INSERT INTO users (email) VALUES ('e')").unwrap_err().code(),
            1048
        );
        assert_eq!(
            run(&db, &m, "INSERT INTO users (name) VALUES ('much too long')")
                .unwrap_err()
                .code(),
            1406
        );
        assert_eq!(
            run(&db, &m, "INSERT INTO users (nope) VALUES (1)").unwrap_err().code(),
            1054
        );
        assert_eq!(
            run(&db, &m, "INSERT INTO orders (user_id) VALUES (42)").unwrap_err().code(),
            1452
        );
    }

    #[test]
    fn test_update_uses_current_values() {
        let (db, m) = setup();
        run(&db, &m, "INSERT INTO users (name) VALUES ('a'), ('b')").unwrap();
        let n = run(&db, &m, "UPDATE users SET name = CONCAT(name, '!') WHERE id >= 1").unwrap();
        assert_eq!(n, 2);
        let rows = db.rows("users").unwrap();
        assert_eq!(rows[1][1], Value::from("b!"));
        assert_eq!(m.updates(), 2);
    }

    #[test]
    fn test_delete_of_referenced_parent_fails() {
        let (db, m) = setup();
        run(&db, &m, "INSERT INTO users (name) VALUES ('a'), ('b')").unwrap();
        run(&db, &m, "INSERT INTO orders (user_id) VALUES (1)").unwrap();
        let err = run(&db, &m, "DELETE FROM users").unwrap_err();
        assert_eq!(err.code(), 1451);
        // statement undone as a whole
        assert_eq!(db.row_count("users").unwrap(), 2);
        assert_eq!(run(&db, &m, "DELETE FROM users WHERE id = 2").unwrap(), 1);
        assert_eq!(m.index_hint("PRIMARY"), 1);
    }

    fn user_names(db: &Database) -> Vec<String> {
        db.rows("users")
            .unwrap()
            .iter()
            .map(|r| r[1].to_string())
            .collect()
    }

    #[test]
    fn test_on_duplicate_key_update() {
        let (db, m) = setup();
        run(&db, &m, "INSERT INTO users (name, email) VALUES ('a', 'a@x')").unwrap();
        let n = run(
            &db,
            &m,
            "INSERT INTO users (name, email) VALUES ('b', 'A@X'), ('c', 'c@x') \
             ON DUPLICATE KEY UPDATE name = CONCAT(name, '+', VALUES(name))",
        )
        .unwrap();
        // updated row counts twice, the new row once
        assert_eq!(n, 3);
        assert_eq!(user_names(&db), vec!["a+b", "c"]);

        let n = run(
            &db,
            &m,
            "INSERT INTO users (name, email) VALUES ('z', 'c@x') ON DUPLICATE KEY UPDATE name = name",
        )
        .unwrap();
        assert_eq!(n, 0);

        // a failing update takes the whole statement back
        let err = run(
            &db,
            &m,
            "INSERT INTO users (name, email) VALUES ('d', 'd@x'), ('q', 'c@x') \
             ON DUPLICATE KEY UPDATE email = 'a@x'",
        )
        .unwrap_err();
        assert_eq!(err.code(), 1062);
        assert_eq!(db.row_count("users").unwrap(), 2);
    }

    #[test]
    fn test_update_and_delete_through_joins() {
        let (db, m) = setup();
        run(&db, &m, "INSERT INTO users (name) VALUES ('a'), ('b'), ('c')").unwrap();
        run(&db, &m, "INSERT INTO orders (user_id) VALUES (1), (1), (3)").unwrap();

        let n = run(
            &db,
            &m,
            "UPDATE users u JOIN orders o ON o.user_id = u.id SET u.name = CONCAT(u.name, o.id)",
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(user_names(&db), vec!["a1", "b", "c3"]);

        let n = run(
            &db,
            &m,
            "DELETE u FROM users u LEFT JOIN orders o ON o.user_id = u.id WHERE o.id IS NULL",
        )
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(user_names(&db), vec!["a1", "c3"]);

        let err = run(&db, &m, "DELETE u FROM users u JOIN orders o ON o.user_id = u.id")
            .unwrap_err();
        assert_eq!(err.code(), 1451);
        assert_eq!(db.row_count("users").unwrap(), 2);
    }

    #[test]
    fn test_insert_select_and_create_table_as() {
        let (db, m) = setup();
        run(&db, &m, "INSERT INTO users (name) VALUES ('a'), ('b')").unwrap();
        run(&db, &m, "INSERT INTO orders (user_id) SELECT id FROM users").unwrap();
        assert_eq!(db.row_count("orders").unwrap(), 2);

        let Statement::CreateTableAs(stmt) =
            parse("CREATE TABLE snap AS SELECT id, name FROM users", db.dialect()).unwrap()
        else {
            panic!("expected CREATE TABLE AS");
        };
        db.execute_create_table_as(&stmt, &Parameters::new(), &m).unwrap();
        db.with_catalog(|c| {
            let snap = c.table("snap").unwrap();
            assert_eq!(snap.len(), 2);
            assert_eq!(snap.columns()[0].col_type, ColumnType::Integer);
            assert_eq!(snap.columns()[1].col_type, ColumnType::Text);
        });
    }
}
