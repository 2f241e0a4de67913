//! Execution counters
//!
//! A connection owns one `Metrics`; its parent (the database-wide set) sees
//! every increment as well.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    selects: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    elapsed_micros: AtomicU64,
    index_lookups: AtomicU64,
    /// lowercase index name -> lookups served
    index_hints: DashMap<String, u64>,
    /// lowercase table name -> reads
    table_hints: DashMap<String, u64>,
    parent: Option<Arc<Metrics>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub elapsed_micros: u64,
    pub index_lookups: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter set that also forwards to `parent`
    pub fn with_parent(parent: Arc<Metrics>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub(crate) fn record_selects(&self, rows: u64) {
        self.selects.fetch_add(rows, Ordering::Relaxed);
        if let Some(p) = &self.parent {
            p.record_selects(rows);
        }
    }

    pub(crate) fn record_inserts(&self, rows: u64) {
        self.inserts.fetch_add(rows, Ordering::Relaxed);
        if let Some(p) = &self.parent {
            p.record_inserts(rows);
        }
    }

    pub(crate) fn record_updates(&self, rows: u64) {
        self.updates.fetch_add(rows, Ordering::Relaxed);
        if let Some(p) = &self.parent {
            p.record_updates(rows);
        }
    }

    pub(crate) fn record_deletes(&self, rows: u64) {
        self.deletes.fetch_add(rows, Ordering::Relaxed);
        if let Some(p) = &self.parent {
            p.record_deletes(rows);
        }
    }

    pub(crate) fn record_elapsed(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.elapsed_micros.fetch_add(micros, Ordering::Relaxed);
        if let Some(p) = &self.parent {
            p.record_elapsed(elapsed);
        }
    }

    /// One index-assisted lookup through `index`
    pub(crate) fn record_index_lookup(&self, index: &str) {
        self.index_lookups.fetch_add(1, Ordering::Relaxed);
        *self.index_hints.entry(index.to_lowercase()).or_insert(0) += 1;
        if let Some(p) = &self.parent {
            p.record_index_lookup(index);
        }
    }

    /// One read of a physical table
    pub(crate) fn record_table_read(&self, table: &str) {
        *self.table_hints.entry(table.to_lowercase()).or_insert(0) += 1;
        if let Some(p) = &self.parent {
            p.record_table_read(table);
        }
    }

    /// Rows returned by SELECT/UNION statements
    pub fn selects(&self) -> u64 {
        self.selects.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_micros.load(Ordering::Relaxed))
    }

    pub fn index_lookups(&self) -> u64 {
        self.index_lookups.load(Ordering::Relaxed)
    }

    pub fn index_hint(&self, index: &str) -> u64 {
        self.index_hints
            .get(&index.to_lowercase())
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn table_hint(&self, table: &str) -> u64 {
        self.table_hints
            .get(&table.to_lowercase())
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            selects: self.selects(),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            elapsed_micros: self.elapsed_micros.load(Ordering::Relaxed),
            index_lookups: self.index_lookups(),
        }
    }

    /// Zero this counter set (the parent is left alone)
    pub fn reset(&self) {
        for counter in [
            &self.selects,
            &self.inserts,
            &self.updates,
            &self.deletes,
            &self.elapsed_micros,
            &self.index_lookups,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.index_hints.clear();
        self.table_hints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_forward_to_parent() {
        let db = Arc::new(Metrics::new());
        let conn = Metrics::with_parent(db.clone());
        conn.record_selects(3);
        conn.record_index_lookup("IX_Name");
        conn.record_table_read("users");
        assert_eq!(conn.selects(), 3);
        assert_eq!(db.selects(), 3);
        assert_eq!(conn.index_hint("ix_name"), 1);
        assert_eq!(db.index_lookups(), 1);
        assert_eq!(db.table_hint("USERS"), 1);
    }

    #[test]
    fn test_reset_keeps_parent() {
        let db = Arc::new(Metrics::new());
        let conn = Metrics::with_parent(db.clone());
        conn.record_inserts(2);
        conn.reset();
        assert_eq!(conn.inserts(), 0);
        assert_eq!(db.inserts(), 2);
        assert_eq!(conn.snapshot(), MetricsSnapshot::default());
    }
}
