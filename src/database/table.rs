//! Table storage: a slot arena of rows plus synchronously maintained indexes
//!
//! Rows live in `slots` and are addressed by a stable slot number. Deleting a
//! row empties its slot; slots are never reused, so undo records that name a
//! slot always refer to the same logical row.

use crate::error::{Result, SqlError};
use crate::types::{row_key, ColumnDef, ForeignKeyDef, IndexDef, Row, Value};
use ahash::AHashMap;
use std::collections::HashMap;

/// Index over a table's slots, keyed by the concatenated key-column values
#[derive(Debug, Clone)]
pub struct TableIndex {
    pub def: IndexDef,
    /// Column ordinals of the key columns
    positions: Vec<usize>,
    entries: AHashMap<String, Vec<usize>>,
}

impl TableIndex {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Slots whose key equals `key` (built with [`Table::key_of`])
    pub fn lookup(&self, key: &str) -> &[usize] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_values<'r>(&'r self, row: &'r Row) -> impl Iterator<Item = &'r Value> + 'r {
        self.positions.iter().map(move |&p| &row[p])
    }

    fn add(&mut self, key: String, slot: usize) {
        self.entries.entry(key).or_default().push(slot);
    }

    fn remove(&mut self, key: &str, slot: usize) {
        if let Some(slots) = self.entries.get_mut(key) {
            slots.retain(|&s| s != slot);
            if slots.is_empty() {
                self.entries.remove(key);
            }
        }
    }
}

/// In-memory table
#[derive(Debug, Clone)]
pub struct Table {
    /// Catalog-unique id; undo records reference tables by id
    pub(crate) id: u64,
    pub name: String,
    pub temporary: bool,
    columns: Vec<ColumnDef>,
    /// lowercase column name -> ordinal
    column_map: HashMap<String, usize>,
    slots: Vec<Option<Row>>,
    live_rows: usize,
    indexes: Vec<TableIndex>,
    foreign_keys: Vec<ForeignKeyDef>,
    primary_key: Vec<String>,
    next_identity: i64,
    /// Fold text case when building index keys
    fold_keys: bool,
}

impl Table {
    pub(crate) fn new(id: u64, name: impl Into<String>, fold_keys: bool) -> Self {
        Self {
            id,
            name: name.into(),
            temporary: false,
            columns: Vec::new(),
            column_map: HashMap::new(),
            slots: Vec::new(),
            live_rows: 0,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            primary_key: Vec::new(),
            next_identity: 1,
            fold_keys,
        }
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_map.get(&name.to_lowercase()).copied()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Append a column; existing rows receive its default (or null)
    pub fn add_column(&mut self, mut column: ColumnDef) -> Result<()> {
        let key = column.name.to_lowercase();
        if self.column_map.contains_key(&key) {
            return Err(SqlError::ObjectExists {
                kind: "COLUMN".into(),
                name: column.name,
            });
        }
        let fill = match &column.default {
            Some(crate::types::DefaultValue::Literal(v)) => v.clone(),
            _ => Value::Null,
        };
        if fill.is_null() && !column.nullable && !column.identity && self.live_rows > 0 {
            return Err(SqlError::ColumnCannotBeNull(column.name));
        }
        column.position = self.columns.len();
        self.column_map.insert(key, column.position);
        for row in self.slots.iter_mut().flatten() {
            row.push(fill.clone());
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn indexes(&self) -> &[TableIndex] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&TableIndex> {
        self.indexes.iter().find(|i| i.def.name.eq_ignore_ascii_case(name))
    }

    /// Build an index over the current rows
    pub fn add_index(&mut self, def: IndexDef) -> Result<()> {
        if self.index(&def.name).is_some() {
            return Err(SqlError::ObjectExists {
                kind: "INDEX".into(),
                name: def.name,
            });
        }
        let positions = def
            .columns
            .iter()
            .map(|c| {
                self.column_index(c)
                    .ok_or_else(|| SqlError::unknown_column(c.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        for c in &def.include {
            if self.column_index(c).is_none() {
                return Err(SqlError::unknown_column(c.clone()));
            }
        }

        let mut index = TableIndex {
            def,
            positions,
            entries: AHashMap::new(),
        };
        for (slot, row) in self.iter_slots() {
            let key = self.index_key(&index, row);
            if index.def.unique && !has_null_key(&index, row) {
                if index.lookup(&key).first().is_some() {
                    return Err(self.duplicate(&index, row));
                }
            }
            index.add(key, slot);
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn foreign_keys(&self) -> &[ForeignKeyDef] {
        &self.foreign_keys
    }

    pub(crate) fn add_foreign_key(&mut self, fk: ForeignKeyDef) -> Result<()> {
        for c in &fk.columns {
            if self.column_index(c).is_none() {
                return Err(SqlError::unknown_column(c.clone()));
            }
        }
        if self.foreign_keys.iter().any(|f| f.name.eq_ignore_ascii_case(&fk.name)) {
            return Err(SqlError::ObjectExists {
                kind: "FOREIGN KEY".into(),
                name: fk.name,
            });
        }
        self.foreign_keys.push(fk);
        Ok(())
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub(crate) fn set_primary_key(&mut self, columns: Vec<String>) -> Result<()> {
        for c in &columns {
            let idx = self
                .column_index(c)
                .ok_or_else(|| SqlError::unknown_column(c.clone()))?;
            self.columns[idx].nullable = false;
        }
        self.primary_key = columns;
        Ok(())
    }

    /// Index whose key columns are exactly the primary key
    pub fn primary_key_index(&self) -> Option<&TableIndex> {
        if self.primary_key.is_empty() {
            return None;
        }
        self.indexes.iter().find(|i| {
            i.def.columns.len() == self.primary_key.len()
                && i.def
                    .columns
                    .iter()
                    .zip(&self.primary_key)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Number of live rows
    pub fn len(&self) -> usize {
        self.live_rows
    }

    pub fn is_empty(&self) -> bool {
        self.live_rows == 0
    }

    pub fn row(&self, slot: usize) -> Option<&Row> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Live rows with their slot numbers, in insertion order
    pub fn iter_slots(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, row)| row.as_ref().map(|r| (slot, r)))
    }

    pub fn rows(&self) -> Vec<Row> {
        self.iter_slots().map(|(_, r)| r.clone()).collect()
    }

    /// Hand out the next identity value
    pub(crate) fn next_identity(&mut self) -> i64 {
        let id = self.next_identity;
        self.next_identity += 1;
        id
    }

    /// Keep the sequence ahead of explicitly supplied identity values
    pub(crate) fn observe_identity(&mut self, value: i64) {
        if value >= self.next_identity {
            self.next_identity = value + 1;
        }
    }

    /// Key of `values` in the shape index entries use
    pub fn key_of(&self, values: &[Value]) -> String {
        row_key(values, self.fold_keys)
    }

    fn index_key(&self, index: &TableIndex, row: &Row) -> String {
        let values: Vec<Value> = index.key_values(row).cloned().collect();
        row_key(&values, self.fold_keys)
    }

    fn duplicate(&self, index: &TableIndex, row: &Row) -> SqlError {
        let value: Vec<String> = index.key_values(row).map(|v| v.to_string()).collect();
        SqlError::DuplicateEntry {
            value: value.join("-"),
            key: index.def.name.clone(),
        }
    }

    /// Unique-index check for `row` landing in `slot` (which may already hold it)
    pub(crate) fn check_unique(&self, row: &Row, slot: Option<usize>) -> Result<()> {
        for index in self.indexes.iter().filter(|i| i.def.unique) {
            if has_null_key(index, row) {
                continue;
            }
            let key = self.index_key(index, row);
            if index.lookup(&key).iter().any(|&s| Some(s) != slot) {
                return Err(self.duplicate(index, row));
            }
        }
        Ok(())
    }

    /// Live slot whose unique key collides with `row`. A non-empty `columns`
    /// restricts the search to the unique index over exactly those columns.
    pub(crate) fn conflicting_slot(&self, row: &Row, columns: &[String]) -> Result<Option<usize>> {
        let mut wanted = columns
            .iter()
            .map(|c| {
                self.column_index(c)
                    .ok_or_else(|| SqlError::unknown_column(c.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        wanted.sort_unstable();

        let mut target_found = wanted.is_empty();
        for index in self.indexes.iter().filter(|i| i.def.unique) {
            if !wanted.is_empty() {
                let mut positions = index.positions.clone();
                positions.sort_unstable();
                if positions != wanted {
                    continue;
                }
                target_found = true;
            }
            if has_null_key(index, row) {
                continue;
            }
            if let Some(&slot) = index.lookup(&self.index_key(index, row)).first() {
                return Ok(Some(slot));
            }
        }
        if !target_found {
            return Err(SqlError::InvalidArgument(format!(
                "no unique index on ({}) matches the ON CONFLICT target",
                columns.join(", ")
            )));
        }
        Ok(None)
    }

    /// Append a row; unique indexes are checked before anything changes
    pub(crate) fn insert_row(&mut self, row: Row) -> Result<usize> {
        if row.len() != self.columns.len() {
            return Err(SqlError::ColumnCountMismatch);
        }
        self.check_unique(&row, None)?;
        let slot = self.slots.len();
        self.index_row(&row, slot);
        self.slots.push(Some(row));
        self.live_rows += 1;
        Ok(slot)
    }

    /// Replace the row in `slot`, returning the previous image
    pub(crate) fn update_row(&mut self, slot: usize, row: Row) -> Result<Row> {
        if self.row(slot).is_none() {
            return Err(SqlError::InvalidArgument(format!("slot {} is empty", slot)));
        }
        self.check_unique(&row, Some(slot))?;
        let old = self.restore_slot(slot, Some(row));
        old.ok_or_else(|| SqlError::InvalidArgument(format!("slot {} is empty", slot)))
    }

    pub(crate) fn delete_row(&mut self, slot: usize) -> Option<Row> {
        self.restore_slot(slot, None)
    }

    /// Put `row` (or nothing) into `slot` and re-key every index; no
    /// constraint checks. Used by update/delete and by transaction undo.
    pub(crate) fn restore_slot(&mut self, slot: usize, row: Option<Row>) -> Option<Row> {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        let old = self.slots[slot].take();
        if let Some(old_row) = &old {
            self.unindex_row(old_row, slot);
            self.live_rows -= 1;
        }
        if let Some(new_row) = row {
            self.index_row(&new_row, slot);
            self.slots[slot] = Some(new_row);
            self.live_rows += 1;
        }
        old
    }

    fn index_row(&mut self, row: &Row, slot: usize) {
        let keys: Vec<String> = self.indexes.iter().map(|i| self.index_key(i, row)).collect();
        for (index, key) in self.indexes.iter_mut().zip(keys) {
            index.add(key, slot);
        }
    }

    fn unindex_row(&mut self, row: &Row, slot: usize) {
        let keys: Vec<String> = self.indexes.iter().map(|i| self.index_key(i, row)).collect();
        for (index, key) in self.indexes.iter_mut().zip(keys) {
            index.remove(&key, slot);
        }
    }

    /// True when some live row carries `values` in `columns` (index-assisted
    /// when an index covers exactly those columns)
    pub fn contains_key(&self, columns: &[String], values: &[Value]) -> bool {
        let positions: Option<Vec<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let Some(positions) = positions else {
            return false;
        };
        let wanted = self.key_of(values);
        if let Some(index) = self.indexes.iter().find(|i| i.positions == positions) {
            return !index.lookup(&wanted).is_empty();
        }
        self.iter_slots().any(|(_, row)| {
            let have: Vec<Value> = positions.iter().map(|&p| row[p].clone()).collect();
            self.key_of(&have) == wanted
        })
    }
}

fn has_null_key(index: &TableIndex, row: &Row) -> bool {
    index.key_values(row).any(Value::is_null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn users() -> Table {
        let mut t = Table::new(1, "users", true);
        t.add_column(ColumnDef::new("id", ColumnType::Integer).identity()).unwrap();
        t.add_column(ColumnDef::new("name", ColumnType::Text).not_null()).unwrap();
        t.add_column(ColumnDef::new("email", ColumnType::Text)).unwrap();
        t
    }

    fn row(id: i64, name: &str, email: Option<&str>) -> Row {
        vec![Value::Integer(id), Value::from(name), Value::from(email)]
    }

    #[test]
    fn test_index_tracks_insert_update_delete() {
        let mut t = users();
        t.add_index(IndexDef::new("ix_name", &["name"])).unwrap();
        let a = t.insert_row(row(1, "John", None)).unwrap();
        let b = t.insert_row(row(2, "Bob", None)).unwrap();

        let key = t.key_of(&[Value::from("john")]);
        assert_eq!(t.index("ix_name").unwrap().lookup(&key), &[a]);

        t.update_row(b, row(2, "John", None)).unwrap();
        assert_eq!(t.index("ix_name").unwrap().lookup(&key), &[a, b]);

        t.delete_row(a);
        assert_eq!(t.index("ix_name").unwrap().lookup(&key), &[b]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_unique_violation_leaves_table_untouched() {
        let mut t = users();
        t.add_index(IndexDef::new("ux_email", &["email"]).unique()).unwrap();
        t.insert_row(row(1, "a", Some("x@y"))).unwrap();
        let err = t.insert_row(row(2, "b", Some("X@Y"))).unwrap_err();
        assert_eq!(err.code(), 1062);
        assert_eq!(t.len(), 1);
        // nulls never collide
        t.insert_row(row(3, "c", None)).unwrap();
        t.insert_row(row(4, "d", None)).unwrap();
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_unique_index_over_existing_duplicates_fails() {
        let mut t = users();
        t.insert_row(row(1, "same", None)).unwrap();
        t.insert_row(row(2, "same", None)).unwrap();
        let err = t.add_index(IndexDef::new("ux", &["name"]).unique()).unwrap_err();
        assert!(matches!(err, SqlError::DuplicateEntry { .. }));
        assert!(t.index("ux").is_none());
    }

    #[test]
    fn test_restore_slot_undoes_delete() {
        let mut t = users();
        t.add_index(IndexDef::new("ix_name", &["name"])).unwrap();
        let slot = t.insert_row(row(1, "John", None)).unwrap();
        let old = t.delete_row(slot).unwrap();
        assert!(t.is_empty());
        t.restore_slot(slot, Some(old));
        assert_eq!(t.len(), 1);
        let key = t.key_of(&[Value::from("John")]);
        assert_eq!(t.index("ix_name").unwrap().lookup(&key), &[slot]);
    }

    #[test]
    fn test_identity_sequence_is_never_reused() {
        let mut t = users();
        assert_eq!(t.next_identity(), 1);
        assert_eq!(t.next_identity(), 2);
        t.observe_identity(10);
        assert_eq!(t.next_identity(), 11);
        t.observe_identity(3);
        assert_eq!(t.next_identity(), 12);
    }

    #[test]
    fn test_contains_key_with_and_without_index() {
        let mut t = users();
        t.insert_row(row(7, "n", None)).unwrap();
        assert!(t.contains_key(&["id".into()], &[Value::Integer(7)]));
        assert!(!t.contains_key(&["id".into()], &[Value::Integer(8)]));
        t.add_index(IndexDef::new("PRIMARY", &["id"]).unique()).unwrap();
        assert!(t.contains_key(&["ID".into()], &[Value::Integer(7)]));
    }
}
