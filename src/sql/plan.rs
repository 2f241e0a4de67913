//! Execution plan report
//!
//! A plain-text summary of how a SELECT/UNION was resolved: the clauses it
//! carried, a static cost estimate, how each physical table was accessed
//! and the runtime figures measured while it ran.

use super::ast::{JoinType, OrderByExpr, Query, SelectStmt, TableRef, UnionStmt};
use super::executor::{AccessPath, ExecStats};
use std::fmt::Write;
use std::time::Duration;

/// Runtime figures of one execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanMetrics {
    pub input_tables: usize,
    pub estimated_rows_read: usize,
    pub actual_rows: usize,
    pub elapsed_ms: u64,
}

impl PlanMetrics {
    pub fn new(stats: &ExecStats, actual_rows: usize, elapsed: Duration) -> Self {
        Self {
            input_tables: stats.access.len(),
            estimated_rows_read: stats.estimated_rows_read,
            actual_rows,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn rows_per_ms(&self) -> f64 {
        if self.elapsed_ms == 0 {
            self.actual_rows as f64
        } else {
            self.actual_rows as f64 / self.elapsed_ms as f64
        }
    }

    pub fn selectivity_pct(&self) -> f64 {
        if self.estimated_rows_read == 0 {
            0.0
        } else {
            self.actual_rows as f64 / self.estimated_rows_read as f64 * 100.0
        }
    }
}

pub fn estimate_select_cost(stmt: &SelectStmt) -> i64 {
    let mut cost = 10;
    cost += 5 * stmt.ctes.len() as i64;
    cost += 25 * stmt.from.as_ref().map_or(0, join_count) as i64;
    if stmt.where_clause.is_some() {
        cost += 8;
    }
    if !stmt.group_by.is_empty() {
        cost += 20;
    }
    if stmt.having.is_some() {
        cost += 10;
    }
    if !stmt.order_by.is_empty() {
        cost += 15;
    }
    if stmt.distinct {
        cost += 10;
    }
    if stmt.limit.is_some() {
        cost -= 3;
    }
    cost.max(1)
}

pub fn estimate_union_cost(stmt: &UnionStmt) -> i64 {
    let mut cost: i64 = stmt.parts.iter().map(estimate_select_cost).sum();
    cost += 12;
    cost += 20 * stmt.all_flags.iter().filter(|all| !**all).count() as i64;
    if !stmt.order_by.is_empty() {
        cost += 15;
    }
    if stmt.limit.is_some() {
        cost -= 2;
    }
    cost.max(1)
}

/// Render the report for an executed query
pub fn render(query: &Query, stats: &ExecStats, metrics: &PlanMetrics) -> String {
    let mut out = String::from("Execution Plan\n");
    match query {
        Query::Select(stmt) => render_select(&mut out, stmt),
        Query::Union(stmt) => render_union(&mut out, stmt),
    }
    for access in &stats.access {
        let _ = match access {
            AccessPath::Index { index, table } => {
                writeln!(out, "- Access: INDEX {} ON {}", index, table)
            }
            AccessPath::FullScan { table } => writeln!(out, "- Access: FULL SCAN {}", table),
        };
    }
    let _ = writeln!(out, "- Input Tables: {}", metrics.input_tables);
    let _ = writeln!(out, "- Estimated Rows Read: {}", metrics.estimated_rows_read);
    let _ = writeln!(out, "- Actual Rows: {}", metrics.actual_rows);
    let _ = writeln!(out, "- Selectivity %: {:.2}", metrics.selectivity_pct());
    let _ = writeln!(out, "- Rows/ms: {:.2}", metrics.rows_per_ms());
    let _ = write!(out, "- Elapsed ms: {}", metrics.elapsed_ms);
    out
}

fn render_select(out: &mut String, stmt: &SelectStmt) {
    let _ = writeln!(out, "- Query Type: SELECT");
    let _ = writeln!(out, "- Estimated Cost: {}", estimate_select_cost(stmt));
    if !stmt.ctes.is_empty() {
        let _ = writeln!(out, "- CTEs: {}", stmt.ctes.len());
        for cte in &stmt.ctes {
            let _ = writeln!(out, "  - Materialize: {}", cte.name);
        }
    }
    let _ = writeln!(out, "- FROM: {}", source_name(stmt));
    if let Some(from) = &stmt.from {
        let mut joins = Vec::new();
        collect_joins(from, &mut joins);
        for join in joins {
            let _ = writeln!(out, "- JOIN: {}", join);
        }
    }
    if let Some(w) = &stmt.where_clause {
        let _ = writeln!(out, "- WHERE: {}", w);
    }
    if !stmt.group_by.is_empty() {
        let keys: Vec<String> = stmt.group_by.iter().map(|g| g.to_string()).collect();
        let _ = writeln!(out, "- GROUP BY: {}", keys.join(", "));
    }
    if let Some(h) = &stmt.having {
        let _ = writeln!(out, "- HAVING: {}", h);
    }
    let _ = writeln!(out, "- Projection: {} item(s)", stmt.columns.len());
    if stmt.distinct {
        let _ = writeln!(out, "- DISTINCT: true");
    }
    write_order_and_limit(out, &stmt.order_by, stmt.limit.as_ref());
}

fn render_union(out: &mut String, stmt: &UnionStmt) {
    let _ = writeln!(out, "- Query Type: UNION");
    let _ = writeln!(out, "- Estimated Cost: {}", estimate_union_cost(stmt));
    let _ = writeln!(out, "- Parts: {}", stmt.parts.len());
    for (i, part) in stmt.parts.iter().enumerate() {
        let _ = writeln!(out, "  - Part[{}]: SELECT from {}", i + 1, source_name(part));
    }
    for (i, all) in stmt.all_flags.iter().enumerate() {
        let combine = if *all { "UNION ALL" } else { "UNION DISTINCT" };
        let _ = writeln!(out, "  - Combine[{}]: {}", i + 1, combine);
    }
    write_order_and_limit(out, &stmt.order_by, stmt.limit.as_ref());
}

fn write_order_and_limit(
    out: &mut String,
    order_by: &[OrderByExpr],
    limit: Option<&super::ast::LimitClause>,
) {
    if !order_by.is_empty() {
        let keys: Vec<String> = order_by
            .iter()
            .map(|o| format!("{} {}", o.expr, if o.asc { "ASC" } else { "DESC" }))
            .collect();
        let _ = writeln!(out, "- ORDER BY: {}", keys.join(", "));
    }
    if let Some(limit) = limit {
        let _ = writeln!(out, "- LIMIT/TOP/FETCH: {}", limit);
    }
}

fn source_name(stmt: &SelectStmt) -> String {
    stmt.from
        .as_ref()
        .map_or_else(|| "DUAL".to_string(), TableRef::describe)
}

fn join_count(from: &TableRef) -> usize {
    match from {
        TableRef::Join { left, right, .. } => 1 + join_count(left) + join_count(right),
        _ => 0,
    }
}

/// Left-deep join list: `TYPE source [ON expr]`
fn collect_joins(from: &TableRef, out: &mut Vec<String>) {
    if let TableRef::Join {
        left,
        right,
        join_type,
        on,
    } = from
    {
        collect_joins(left, out);
        let mut line = format!("{} {}", join_type.name(), right.describe());
        match on {
            Some(on) => {
                let _ = write!(line, " ON {}", on);
            }
            None if *join_type != JoinType::Cross => line.push_str(" ON TRUE"),
            None => {}
        }
        out.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, DialectKind};
    use crate::sql::parse;

    fn query(sql: &str) -> Query {
        parse(sql, &Dialect::latest(DialectKind::MySql))
            .unwrap()
            .into_query()
            .unwrap()
    }

    #[test]
    fn test_select_cost() {
        let Query::Select(stmt) = query("SELECT id FROM users") else {
            panic!("expected select");
        };
        assert_eq!(estimate_select_cost(&stmt), 10);

        let Query::Select(stmt) = query(
            "SELECT DISTINCT u.id FROM users u JOIN orders o ON o.user_id = u.id \
             WHERE u.id > 1 GROUP BY u.id HAVING COUNT(*) > 1 ORDER BY u.id LIMIT 5",
        ) else {
            panic!("expected select");
        };
        assert_eq!(estimate_select_cost(&stmt), 10 + 25 + 8 + 20 + 10 + 15 + 10 - 3);
    }

    #[test]
    fn test_union_cost() {
        let Query::Union(stmt) =
            query("SELECT id FROM a UNION SELECT id FROM b UNION ALL SELECT id FROM c ORDER BY 1")
        else {
            panic!("expected union");
        };
        assert_eq!(estimate_union_cost(&stmt), 30 + 12 + 20 + 15);
    }

    #[test]
    fn test_render_select_labels() {
        let q = query("SELECT id, name FROM users WHERE name = 'John' ORDER BY id DESC LIMIT 2");
        let stats = ExecStats {
            access: vec![AccessPath::Index {
                index: "ix_users_name".into(),
                table: "users".into(),
            }],
            estimated_rows_read: 4,
        };
        let metrics = PlanMetrics::new(&stats, 1, Duration::ZERO);
        let text = render(&q, &stats, &metrics);
        assert!(text.starts_with("Execution Plan\n- Query Type: SELECT\n"));
        assert!(text.contains("- FROM: users"));
        assert!(text.contains("- WHERE: "));
        assert!(text.contains("- Projection: 2 item(s)"));
        assert!(text.contains("- ORDER BY: id DESC"));
        assert!(text.contains("- LIMIT/TOP/FETCH: "));
        assert!(text.contains("- Access: INDEX ix_users_name ON users"));
        assert!(text.contains("- Input Tables: 1"));
        assert!(text.contains("- Selectivity %: 25.00"));
        assert!(text.contains("- Rows/ms: 1.00"));
        assert!(text.ends_with("- Elapsed ms: 0"));
    }

    #[test]
    fn test_render_union_parts() {
        let q = query("SELECT id FROM a UNION ALL SELECT id FROM b");
        let stats = ExecStats::default();
        let text = render(&q, &stats, &PlanMetrics::new(&stats, 0, Duration::ZERO));
        assert!(text.contains("- Query Type: UNION"));
        assert!(text.contains("- Parts: 2"));
        assert!(text.contains("  - Part[2]: SELECT from b"));
        assert!(text.contains("  - Combine[1]: UNION ALL"));
        assert!(text.contains("- Selectivity %: 0.00"));
    }
}
