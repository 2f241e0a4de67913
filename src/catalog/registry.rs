/// Catalog registry: tables, frozen views and procedure signatures, all
/// keyed case-insensitively
use crate::database::table::Table;
use crate::error::{Result, SqlError};
use crate::types::{ProcedureDef, Row};
use std::collections::HashMap;

/// A view materialized once at creation time
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDef {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    /// lowercase name -> table
    tables: HashMap<String, Table>,
    views: HashMap<String, ViewDef>,
    procedures: HashMap<String, ProcedureDef>,
    next_table_id: u64,
    /// Fold text case when building index keys of new tables
    fold_keys: bool,
}

impl Catalog {
    pub fn new(fold_keys: bool) -> Self {
        Self {
            fold_keys,
            ..Self::default()
        }
    }

    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Register an empty table and return it for column setup
    pub fn create_table(&mut self, name: &str) -> Result<&mut Table> {
        let key = Self::key(name);
        if self.tables.contains_key(&key) || self.views.contains_key(&key) {
            return Err(SqlError::ObjectExists {
                kind: "TABLE".into(),
                name: name.to_string(),
            });
        }
        self.next_table_id += 1;
        let table = Table::new(self.next_table_id, name, self.fold_keys);
        Ok(self.tables.entry(key).or_insert(table))
    }

    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        let key = Self::key(name);
        let referenced_by = self.tables.values().find(|t| {
            !t.name.eq_ignore_ascii_case(name)
                && t.foreign_keys()
                    .iter()
                    .any(|fk| fk.ref_table.eq_ignore_ascii_case(name))
        });
        if let Some(child) = referenced_by {
            return Err(SqlError::ReferencedRow {
                constraint: format!("{} references {}", child.name, name),
            });
        }
        self.tables
            .remove(&key)
            .ok_or_else(|| SqlError::TableNotFound(name.to_string()))
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(&Self::key(name))
            .ok_or_else(|| SqlError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(&Self::key(name))
            .ok_or_else(|| SqlError::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&Self::key(name))
    }

    pub(crate) fn table_by_id_mut(&mut self, id: u64) -> Option<&mut Table> {
        self.tables.values_mut().find(|t| t.id == id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }


    /// Sorted table names
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.values().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn create_view(&mut self, view: ViewDef, or_replace: bool) -> Result<()> {
        let key = Self::key(&view.name);
        if self.tables.contains_key(&key) || (self.views.contains_key(&key) && !or_replace) {
            return Err(SqlError::ObjectExists {
                kind: "VIEW".into(),
                name: view.name,
            });
        }
        self.views.insert(key, view);
        Ok(())
    }

    pub fn drop_view(&mut self, name: &str) -> Result<ViewDef> {
        self.views
            .remove(&Self::key(name))
            .ok_or_else(|| SqlError::not_found("VIEW", name))
    }

    pub fn view(&self, name: &str) -> Option<&ViewDef> {
        self.views.get(&Self::key(name))
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.views.contains_key(&Self::key(name))
    }

    // ------------------------------------------------------------------
    // Procedures
    // ------------------------------------------------------------------

    pub fn add_procedure(&mut self, name: &str, def: ProcedureDef) -> Result<()> {
        let key = Self::key(name);
        if self.procedures.contains_key(&key) {
            return Err(SqlError::ObjectExists {
                kind: "PROCEDURE".into(),
                name: name.to_string(),
            });
        }
        self.procedures.insert(key, def);
        Ok(())
    }

    pub fn procedure(&self, name: &str) -> Result<&ProcedureDef> {
        self.procedures
            .get(&Self::key(name))
            .ok_or_else(|| SqlError::not_found("PROCEDURE", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDef, ColumnType, ForeignKeyDef};

    #[test]
    fn test_names_are_case_insensitive() {
        let mut catalog = Catalog::new(true);
        catalog.create_table("Users").unwrap();
        assert!(catalog.table("USERS").is_ok());
        assert!(matches!(
            catalog.create_table("users"),
            Err(SqlError::ObjectExists { .. })
        ));
        assert_eq!(catalog.table("nope").unwrap_err().code(), 1146);
    }

    #[test]
    fn test_view_replace_rules() {
        let mut catalog = Catalog::new(true);
        let view = ViewDef {
            name: "v".into(),
            columns: vec!["a".into()],
            rows: vec![],
        };
        catalog.create_view(view.clone(), false).unwrap();
        assert!(catalog.create_view(view.clone(), false).is_err());
        catalog.create_view(view, true).unwrap();
        catalog.drop_view("V").unwrap();
        assert_eq!(catalog.drop_view("v").unwrap_err().code(), 1305);
    }

    #[test]
    fn test_unknown_procedure() {
        let catalog = Catalog::new(true);
        let err = catalog.procedure("sp_missing").unwrap_err();
        assert_eq!(err.code(), 1305);
        assert_eq!(err.to_string(), "PROCEDURE sp_missing does not exist");
    }

    #[test]
    fn test_drop_referenced_table_fails() {
        let mut catalog = Catalog::new(true);
        catalog
            .create_table("parent")
            .unwrap()
            .add_column(ColumnDef::new("id", ColumnType::Integer))
            .unwrap();
        let child = catalog.create_table("child").unwrap();
        child
            .add_column(ColumnDef::new("parent_id", ColumnType::Integer))
            .unwrap();
        child
            .add_foreign_key(ForeignKeyDef::new("fk", &["parent_id"], "parent", &["id"]))
            .unwrap();
        assert!(catalog.drop_table("parent").is_err());
        catalog.drop_table("child").unwrap();
        catalog.drop_table("parent").unwrap();
    }
}
