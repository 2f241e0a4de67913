/// Query executor - walks SELECT / UNION trees against the catalog
use super::ast::*;
use super::evaluator::{
    new_pattern_cache, ColumnBinding, ExprEvaluator, PatternCache, RowScope, SubqueryRunner,
};
use super::resolver::coerce;
use crate::catalog::Catalog;
use crate::database::metrics::Metrics;
use crate::database::table::Table;
use crate::dialect::Dialect;
use crate::error::{Result, SqlError};
use crate::types::{row_key, Parameters, Row, TypeCategory, Value};
use ahash::{AHashMap, AHashSet};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::{debug, trace};

/// Named columns plus rows, as returned to callers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All values of one column, top to bottom
    pub fn column_values(&self, column: &str) -> Vec<Value> {
        match self.column_index(column) {
            Some(col) => self.rows.iter().map(|r| r[col].clone()).collect(),
            None => Vec::new(),
        }
    }
}

/// Query result
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// SELECT / UNION result
    Select(RowSet),

    /// INSERT/UPDATE/DELETE result
    Modification { affected_rows: usize },

    /// CREATE/DROP and transaction-control result
    Definition { message: String },

    /// CALL result with the output parameters after execution
    Call {
        affected_rows: usize,
        outputs: Parameters,
    },
}

impl QueryResult {
    pub fn affected_rows(&self) -> usize {
        match self {
            QueryResult::Modification { affected_rows } | QueryResult::Call { affected_rows, .. } => {
                *affected_rows
            }
            _ => 0,
        }
    }

    pub fn rows(&self) -> Option<&RowSet> {
        match self {
            QueryResult::Select(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<RowSet> {
        match self {
            QueryResult::Select(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows().map_or(0, RowSet::len)
    }
}

/// How a physical table was read
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    Index { index: String, table: String },
    FullScan { table: String },
}

/// Facts gathered while executing one statement, used by the plan report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecStats {
    pub access: Vec<AccessPath>,
    pub estimated_rows_read: usize,
}

/// Row source with named (possibly qualified) columns
#[derive(Debug, Clone, Default)]
struct Relation {
    columns: Vec<ColumnBinding>,
    rows: Vec<Row>,
}

impl Relation {
    fn from_row_set(rs: &RowSet, qualifier: &str) -> Self {
        Self {
            columns: rs
                .columns
                .iter()
                .map(|c| ColumnBinding::new(Some(qualifier), c.clone()))
                .collect(),
            rows: rs.rows.clone(),
        }
    }
}

/// Where a projected value comes from
#[derive(Clone, Copy)]
enum Projected<'s> {
    Column(usize),
    Expr(&'s Expr),
}

struct OutputItem<'s> {
    name: String,
    source: Projected<'s>,
}

/// Resolved ORDER BY key
enum OrderKey<'s> {
    /// Position in the output row
    Output(usize),
    Expr(&'s Expr),
}

pub struct QueryExecutor<'a> {
    catalog: &'a Catalog,
    dialect: &'a Dialect,
    params: &'a Parameters,
    metrics: Option<&'a Metrics>,
    pattern_cache: PatternCache,
    /// Materialized CTEs visible to the statement being executed
    ctes: RefCell<Vec<(String, Rc<RowSet>)>>,
    stats: RefCell<ExecStats>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(catalog: &'a Catalog, dialect: &'a Dialect, params: &'a Parameters) -> Self {
        Self {
            catalog,
            dialect,
            params,
            metrics: None,
            pattern_cache: new_pattern_cache(),
            ctes: RefCell::new(Vec::new()),
            stats: RefCell::new(ExecStats::default()),
        }
    }

    pub fn with_metrics(mut self, metrics: &'a Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_pattern_cache(mut self, cache: PatternCache) -> Self {
        self.pattern_cache = cache;
        self
    }

    pub fn dialect(&self) -> &Dialect {
        self.dialect
    }

    /// Evaluator whose subqueries run through this executor
    pub fn evaluator(&self) -> ExprEvaluator<'_> {
        ExprEvaluator::new(self.dialect, self.params)
            .with_runner(self)
            .with_pattern_cache(self.pattern_cache.clone())
    }

    /// Statistics gathered since the last call
    pub fn take_stats(&self) -> ExecStats {
        std::mem::take(&mut *self.stats.borrow_mut())
    }

    fn ci(&self) -> bool {
        self.dialect.text_comparison_case_insensitive
    }

    /// Execute a SELECT or UNION
    pub fn execute_query(&self, query: &Query) -> Result<RowSet> {
        self.run_query(query, None)
    }

    fn run_query(&self, query: &Query, outer: Option<&RowScope<'_>>) -> Result<RowSet> {
        match query {
            Query::Select(stmt) => self.execute_select(stmt, outer),
            Query::Union(stmt) => self.execute_union(stmt, outer),
        }
    }

    /// Materialize `ctes` in order, run `body`, then drop them again
    fn with_ctes<T>(
        &self,
        ctes: &[Cte],
        outer: Option<&RowScope<'_>>,
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let depth = self.ctes.borrow().len();
        let result = (|| {
            for cte in ctes {
                let mut rs = self.run_query(&cte.query, outer)?;
                if !cte.columns.is_empty() {
                    if cte.columns.len() != rs.columns.len() {
                        return Err(SqlError::ColumnCountMismatch);
                    }
                    rs.columns = cte.columns.clone();
                }
                trace!(cte = %cte.name, rows = rs.len(), "materialized CTE");
                self.ctes.borrow_mut().push((cte.name.clone(), Rc::new(rs)));
            }
            body()
        })();
        self.ctes.borrow_mut().truncate(depth);
        result
    }

    fn lookup_cte(&self, name: &str) -> Option<Rc<RowSet>> {
        self.ctes
            .borrow()
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, rs)| rs.clone())
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    pub(crate) fn execute_select(
        &self,
        stmt: &SelectStmt,
        outer: Option<&RowScope<'_>>,
    ) -> Result<RowSet> {
        self.with_ctes(&stmt.ctes, outer, || self.select_body(stmt, outer))
    }

    fn select_body(&self, stmt: &SelectStmt, outer: Option<&RowScope<'_>>) -> Result<RowSet> {
        let mut found = Vec::new();
        for col in &stmt.columns {
            if let SelectColumn::Expr(e, _) = col {
                e.collect_windows(&mut found);
            }
        }
        for o in &stmt.order_by {
            o.expr.collect_windows(&mut found);
        }
        if found.is_empty() {
            return self.select_rows(stmt, outer, &[]);
        }

        // Window calls become reads of extra per-row columns
        let mut windows: Vec<Expr> = Vec::new();
        for w in found {
            if !windows.contains(w) {
                windows.push(w.clone());
            }
        }
        let mut rewritten = stmt.clone();
        for (i, w) in windows.iter().enumerate() {
            let slot = window_slot(i);
            for col in &mut rewritten.columns {
                if let SelectColumn::Expr(e, alias) = col {
                    let replaced = e.replace(w, &slot);
                    if alias.is_none() && replaced != *e {
                        *alias = Some(e.to_string());
                    }
                    *e = replaced;
                }
            }
            for o in &mut rewritten.order_by {
                o.expr = o.expr.replace(w, &slot);
            }
        }
        self.select_rows(&rewritten, outer, &windows)
    }

    fn select_rows(
        &self,
        stmt: &SelectStmt,
        outer: Option<&RowScope<'_>>,
        windows: &[Expr],
    ) -> Result<RowSet> {
        let ev = self.evaluator();
        let ci = self.ci();

        // 1. Row source (SELECT without FROM reads one empty row)
        let source = match &stmt.from {
            None => Relation {
                columns: Vec::new(),
                rows: vec![Vec::new()],
            },
            Some(from) => self.resolve_source(from, stmt.where_clause.as_ref(), outer)?,
        };
        let mut columns = source.columns;

        // 2. WHERE
        let mut rows = Vec::with_capacity(source.rows.len());
        for row in source.rows {
            if let Some(filter) = &stmt.where_clause {
                let scope = RowScope::new(&columns, &row).with_outer(outer);
                if !ev
                    .eval_predicate(filter, &scope)
                    .map_err(|e| e.in_clause("where clause"))?
                {
                    continue;
                }
            }
            rows.push(row);
        }

        // 3. Projection list
        let items = self.output_items(&stmt.columns, &columns)?;
        let order_keys = self.resolve_order_keys(&stmt.order_by, &items)?;

        let grouped = !stmt.group_by.is_empty()
            || items
                .iter()
                .any(|i| matches!(i.source, Projected::Expr(e) if e.contains_aggregate()))
            || stmt.having.as_ref().map_or(false, Expr::contains_aggregate)
            || stmt.order_by.iter().any(|o| o.expr.contains_aggregate())
            || windows.iter().any(window_contains_aggregate);

        // 4. Units of output: single rows, or groups with a representative row
        let mut units: Vec<(Row, Option<Vec<Row>>)> = if grouped {
            self.group_rows(stmt, &items, &columns, rows, outer)?
                .into_iter()
                .map(|(rep, group)| (rep, Some(group)))
                .collect()
        } else {
            rows.into_iter().map(|r| (r, None)).collect()
        };

        // 4b. Window values, computed over what HAVING keeps
        let mut having = stmt.having.as_ref();
        if !windows.is_empty() {
            let base = columns.len();
            columns.extend((0..windows.len()).map(|i| {
                ColumnBinding::new(Some(WINDOW_QUALIFIER), format!("w{}", i))
            }));
            for (rep, _) in &mut units {
                rep.resize(columns.len(), Value::Null);
            }
            if let Some(filter) = having.take() {
                let mut kept = Vec::with_capacity(units.len());
                for (rep, group) in units {
                    let scope = unit_scope(&columns, &rep, group.as_deref(), outer);
                    let out = self.project(&ev, &items, &scope, &rep)?;
                    let aliases = output_aliases(&items, &out);
                    if ev
                        .eval_predicate(filter, &scope.with_aliases(&aliases))
                        .map_err(|e| e.in_clause("having clause"))?
                    {
                        kept.push((rep, group));
                    }
                }
                units = kept;
            }
            let values = self.compute_windows(windows, &columns, &units, outer)?;
            for ((rep, _), computed) in units.iter_mut().zip(values) {
                rep.truncate(base);
                rep.extend(computed);
            }
        }

        // 5. Project, HAVING, sort keys
        let mut produced: Vec<(Row, Vec<Value>)> = Vec::with_capacity(units.len());
        for (rep, group) in &units {
            let scope = unit_scope(&columns, rep, group.as_deref(), outer);
            let out = self.project(&ev, &items, &scope, rep)?;
            let aliases = output_aliases(&items, &out);
            let aliased = scope.with_aliases(&aliases);

            if let Some(having) = having {
                if !ev
                    .eval_predicate(having, &aliased)
                    .map_err(|e| e.in_clause("having clause"))?
                {
                    continue;
                }
            }

            let mut keys = Vec::with_capacity(order_keys.len());
            for key in &order_keys {
                keys.push(match key {
                    OrderKey::Output(i) => out[*i].clone(),
                    OrderKey::Expr(e) => ev
                        .eval(e, &aliased)
                        .map_err(|e| e.in_clause("order clause"))?,
                });
            }
            produced.push((out, keys));
        }

        // 6. DISTINCT over the output tuple
        if stmt.distinct {
            let mut seen = AHashSet::with_capacity(produced.len());
            produced.retain(|(out, _)| seen.insert(row_key(out, ci)));
        }

        // 7. ORDER BY (stable) then LIMIT
        if !stmt.order_by.is_empty() {
            produced.sort_by(|a, b| self.compare_sort_keys(&a.1, &b.1, &stmt.order_by));
        }
        let produced = self.apply_limit(produced, stmt.limit.as_ref())?;

        Ok(RowSet {
            columns: items.into_iter().map(|i| i.name).collect(),
            rows: produced.into_iter().map(|(out, _)| out).collect(),
        })
    }

    fn project(
        &self,
        ev: &ExprEvaluator<'_>,
        items: &[OutputItem<'_>],
        scope: &RowScope<'_>,
        rep: &Row,
    ) -> Result<Row> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(match item.source {
                Projected::Column(i) => rep.get(i).cloned().unwrap_or(Value::Null),
                Projected::Expr(e) => ev.eval(e, scope).map_err(|e| e.in_clause("field list"))?,
            });
        }
        Ok(out)
    }

    /// Value of every window call for every unit, indexed `[unit][window]`
    fn compute_windows(
        &self,
        windows: &[Expr],
        columns: &[ColumnBinding],
        units: &[(Row, Option<Vec<Row>>)],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Vec<Value>>> {
        let ev = self.evaluator();
        let ci = self.ci();
        let arg_columns = [ColumnBinding::new(Some(WINDOW_QUALIFIER), "arg")];
        let no_row = vec![Value::Null];
        let mut results = vec![Vec::with_capacity(windows.len()); units.len()];

        for window in windows {
            let Expr::Window {
                function,
                partition_by,
                order_by,
                frame,
            } = window
            else {
                continue;
            };
            let Expr::FunctionCall {
                name,
                args,
                distinct,
            } = function.as_ref()
            else {
                return Err(SqlError::InvalidArgument(format!(
                    "'{}' is not a window function",
                    function
                )));
            };
            let upper = name.to_ascii_uppercase();
            let scope_of =
                |u: usize| unit_scope(columns, &units[u].0, units[u].1.as_deref(), outer);

            // Partitions in first-seen order, plus each unit's sort key
            let mut partitions: Vec<Vec<usize>> = Vec::new();
            let mut positions: AHashMap<String, usize> = AHashMap::new();
            let mut sort_keys = Vec::with_capacity(units.len());
            for u in 0..units.len() {
                let scope = scope_of(u);
                let mut key = Vec::with_capacity(partition_by.len());
                for p in partition_by {
                    key.push(ev.eval(p, &scope).map_err(|e| e.in_clause("window partition by"))?);
                }
                let mut order = Vec::with_capacity(order_by.len());
                for o in order_by {
                    order.push(
                        ev.eval(&o.expr, &scope)
                            .map_err(|e| e.in_clause("window order by"))?,
                    );
                }
                sort_keys.push(order);
                let key = row_key(&key, ci);
                match positions.get(&key) {
                    Some(&p) => partitions[p].push(u),
                    None => {
                        positions.insert(key, partitions.len());
                        partitions.push(vec![u]);
                    }
                }
            }

            let arg_values = match args.first() {
                Some(arg) if !matches!(arg, Expr::Wildcard) => {
                    let mut values = Vec::with_capacity(units.len());
                    for u in 0..units.len() {
                        values.push(
                            ev.eval(arg, &scope_of(u))
                                .map_err(|e| e.in_clause("field list"))?,
                        );
                    }
                    values
                }
                _ => vec![Value::Null; units.len()],
            };

            // Aggregates read their argument back from one-column frame rows
            let mut frame_args = args.clone();
            if let Some(first) = frame_args.first_mut() {
                if !matches!(first, Expr::Wildcard) {
                    *first = Expr::Column {
                        table: Some(WINDOW_QUALIFIER.to_string()),
                        name: "arg".to_string(),
                    };
                }
            }
            let frame_call = Expr::FunctionCall {
                name: name.clone(),
                args: frame_args,
                distinct: *distinct,
            };

            for mut members in partitions {
                members.sort_by(|a, b| {
                    self.compare_sort_keys(&sort_keys[*a], &sort_keys[*b], order_by)
                });
                let len = members.len();

                let mut peers = vec![(0, 0); len];
                let mut dense = vec![0i64; len];
                let mut start = 0;
                let mut peer_group = 0;
                while start < len {
                    let mut end = start + 1;
                    while end < len
                        && self.compare_sort_keys(
                            &sort_keys[members[start]],
                            &sort_keys[members[end]],
                            order_by,
                        ) == Ordering::Equal
                    {
                        end += 1;
                    }
                    peer_group += 1;
                    for p in start..end {
                        peers[p] = (start, end);
                        dense[p] = peer_group;
                    }
                    start = end;
                }

                for (pos, &u) in members.iter().enumerate() {
                    let framed =
                        || frame_range(frame.as_ref(), !order_by.is_empty(), pos, peers[pos], len);
                    let value = match upper.as_str() {
                        "ROW_NUMBER" => Value::Integer(pos as i64 + 1),
                        "RANK" => Value::Integer(peers[pos].0 as i64 + 1),
                        "DENSE_RANK" => Value::Integer(dense[pos]),
                        "PERCENT_RANK" if len > 1 => {
                            Value::Float(peers[pos].0 as f64 / (len - 1) as f64)
                        }
                        "PERCENT_RANK" => Value::Float(0.0),
                        "CUME_DIST" => Value::Float(peers[pos].1 as f64 / len as f64),
                        "NTILE" => {
                            let n = arg_values[u]
                                .as_i64()
                                .filter(|n| *n > 0)
                                .ok_or_else(|| {
                                    SqlError::InvalidArgument(
                                        "NTILE() needs a positive bucket count".into(),
                                    )
                                })?;
                            let n = usize::try_from(n).unwrap_or(usize::MAX);
                            Value::Integer(ntile_bucket(pos, len, n) as i64)
                        }
                        "LAG" | "LEAD" => {
                            let scope = scope_of(u);
                            let offset = match args.get(1) {
                                Some(e) => ev.eval(e, &scope)?.as_i64().filter(|n| *n >= 0),
                                None => Some(1),
                            };
                            let offset = offset.ok_or_else(|| {
                                SqlError::InvalidArgument(format!(
                                    "{}() offset must be a non-negative integer",
                                    upper
                                ))
                            })?;
                            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
                            let target = if upper == "LAG" {
                                pos.checked_sub(offset)
                            } else {
                                pos.checked_add(offset).filter(|t| *t < len)
                            };
                            match (target, args.get(2)) {
                                (Some(t), _) => arg_values[members[t]].clone(),
                                (None, Some(default)) => ev.eval(default, &scope)?,
                                (None, None) => Value::Null,
                            }
                        }
                        "FIRST_VALUE" | "LAST_VALUE" => {
                            let (from, to) = framed();
                            if from == to {
                                Value::Null
                            } else if upper == "FIRST_VALUE" {
                                arg_values[members[from]].clone()
                            } else {
                                arg_values[members[to - 1]].clone()
                            }
                        }
                        _ if is_aggregate_function(name) => {
                            let (from, to) = framed();
                            let frame_rows: Vec<Row> = members[from..to]
                                .iter()
                                .map(|&m| vec![arg_values[m].clone()])
                                .collect();
                            let scope =
                                RowScope::new(&arg_columns, &no_row).with_group(&frame_rows);
                            ev.eval(&frame_call, &scope)
                                .map_err(|e| e.in_clause("field list"))?
                        }
                        _ => {
                            return Err(SqlError::InvalidArgument(format!(
                                "{}() is not a window function",
                                upper
                            )))
                        }
                    };
                    results[u].push(value);
                }
            }
            trace!(window = %window, "computed window");
        }
        Ok(results)
    }

    fn output_items<'s>(
        &self,
        select: &'s [SelectColumn],
        columns: &[ColumnBinding],
    ) -> Result<Vec<OutputItem<'s>>> {
        let mut items = Vec::new();
        for col in select {
            match col {
                SelectColumn::Star => {
                    items.extend(columns.iter().enumerate().map(|(i, c)| OutputItem {
                        name: c.name.clone(),
                        source: Projected::Column(i),
                    }));
                }
                SelectColumn::QualifiedStar(q) => {
                    let before = items.len();
                    items.extend(
                        columns
                            .iter()
                            .enumerate()
                            .filter(|(_, c)| {
                                c.qualifier
                                    .as_deref()
                                    .map_or(false, |cq| cq.eq_ignore_ascii_case(q))
                            })
                            .map(|(i, c)| OutputItem {
                                name: c.name.clone(),
                                source: Projected::Column(i),
                            }),
                    );
                    if items.len() == before {
                        return Err(SqlError::unknown_column(format!("{}.*", q)));
                    }
                }
                SelectColumn::Expr(expr, alias) => {
                    let name = match (alias, expr) {
                        (Some(a), _) => a.clone(),
                        (None, Expr::Column { name, .. }) => name.clone(),
                        (None, other) => other.to_string(),
                    };
                    items.push(OutputItem {
                        name,
                        source: Projected::Expr(expr),
                    });
                }
            }
        }
        Ok(items)
    }

    /// ORDER BY keys: 1-based ordinal, output alias/name, or an expression
    fn resolve_order_keys<'s>(
        &self,
        order_by: &'s [OrderByExpr],
        items: &[OutputItem<'_>],
    ) -> Result<Vec<OrderKey<'s>>> {
        order_by
            .iter()
            .map(|o| match &o.expr {
                Expr::Literal(n) if is_ordinal(n) => {
                    ordinal(n, items.len(), "order clause").map(OrderKey::Output)
                }
                Expr::Column { table: None, name } => Ok(items
                    .iter()
                    .position(|i| i.name.eq_ignore_ascii_case(name))
                    .map_or(OrderKey::Expr(&o.expr), OrderKey::Output)),
                other => Ok(OrderKey::Expr(other)),
            })
            .collect()
    }

    fn compare_sort_keys(&self, a: &[Value], b: &[Value], order_by: &[OrderByExpr]) -> Ordering {
        let ci = self.ci();
        for ((x, y), o) in a.iter().zip(b).zip(order_by) {
            let ord = match (x.is_null(), y.is_null(), o.nulls_first) {
                (true, true, _) => Ordering::Equal,
                (true, false, Some(first)) => {
                    if first {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                }
                (false, true, Some(first)) => {
                    if first {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                }
                _ => {
                    let ord = x.sort_cmp(y, ci, self.dialect.nulls_sort_high);
                    if o.asc {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn apply_limit<T>(&self, rows: Vec<T>, limit: Option<&LimitClause>) -> Result<Vec<T>> {
        let Some(limit) = limit else {
            return Ok(rows);
        };
        let ev = self.evaluator();
        let bound = |expr: &Option<Expr>| -> Result<Option<usize>> {
            match expr {
                None => Ok(None),
                Some(e) => {
                    let v = ev.eval(e, &RowScope::empty())?;
                    let n = v.as_i64().ok_or_else(|| {
                        SqlError::TypeError(format!("row limit '{}' is not an integer", v))
                    })?;
                    Ok(Some(n.max(0) as usize))
                }
            }
        };
        let offset = bound(&limit.offset)?.unwrap_or(0);
        let count = bound(&limit.count)?;
        let iter = rows.into_iter().skip(offset);
        Ok(match count {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    /// Group rows by the GROUP BY key tuple, preserving first-seen order
    fn group_rows(
        &self,
        stmt: &SelectStmt,
        items: &[OutputItem<'_>],
        columns: &[ColumnBinding],
        rows: Vec<Row>,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<(Row, Vec<Row>)>> {
        if stmt.group_by.is_empty() {
            // Aggregates without GROUP BY: one group, even when empty
            let rep = rows
                .first()
                .cloned()
                .unwrap_or_else(|| vec![Value::Null; columns.len()]);
            return Ok(vec![(rep, rows)]);
        }

        let keys = stmt
            .group_by
            .iter()
            .map(|g| self.resolve_group_key(g, items, columns))
            .collect::<Result<Vec<_>>>()?;

        let ev = self.evaluator();
        let ci = self.ci();
        let mut positions: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(Row, Vec<Row>)> = Vec::new();
        for row in rows {
            let scope = RowScope::new(columns, &row).with_outer(outer);
            let mut values = Vec::with_capacity(keys.len());
            for key in &keys {
                values.push(match key {
                    Projected::Column(i) => row[*i].clone(),
                    Projected::Expr(e) => ev
                        .eval(e, &scope)
                        .map_err(|e| e.in_clause("group statement"))?,
                });
            }
            let key = row_key(&values, ci);
            match positions.get(&key) {
                Some(&g) => groups[g].1.push(row),
                None => {
                    positions.insert(key, groups.len());
                    groups.push((row.clone(), vec![row]));
                }
            }
        }
        Ok(groups)
    }

    fn resolve_group_key<'s>(
        &self,
        expr: &'s Expr,
        items: &[OutputItem<'s>],
        columns: &[ColumnBinding],
    ) -> Result<Projected<'s>> {
        match expr {
            Expr::Literal(n) if is_ordinal(n) => {
                let i = ordinal(n, items.len(), "group statement")?;
                Ok(items[i].source)
            }
            Expr::Column { table: None, name }
                if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) =>
            {
                items
                    .iter()
                    .find(|i| i.name.eq_ignore_ascii_case(name))
                    .map(|i| i.source)
                    .ok_or_else(|| SqlError::UnknownColumn {
                        column: name.clone(),
                        clause: "group statement".into(),
                    })
            }
            other => Ok(Projected::Expr(other)),
        }
    }

    // ------------------------------------------------------------------
    // Row sources
    // ------------------------------------------------------------------

    fn resolve_source(
        &self,
        from: &TableRef,
        filter: Option<&Expr>,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Relation> {
        match from {
            TableRef::Table { name, alias, hints } => {
                self.table_source(name, alias.as_deref(), hints, filter)
            }
            TableRef::Subquery { query, alias } => {
                let rs = self.run_query(query, outer)?;
                self.stats.borrow_mut().estimated_rows_read += rs.len();
                Ok(Relation::from_row_set(&rs, alias))
            }
            TableRef::Join {
                left,
                right,
                join_type,
                on,
            } => {
                let l = self.resolve_source(left, None, outer)?;
                let r = self.resolve_source(right, None, outer)?;
                self.join(l, r, *join_type, on.as_ref(), outer)
            }
        }
    }

    /// Named source: CTE, then view, then physical table
    fn table_source(
        &self,
        name: &str,
        alias: Option<&str>,
        hints: &[IndexHint],
        filter: Option<&Expr>,
    ) -> Result<Relation> {
        let qualifier = alias.unwrap_or(name);

        if let Some(rs) = self.lookup_cte(name) {
            self.stats.borrow_mut().estimated_rows_read += rs.len();
            return Ok(Relation::from_row_set(&rs, qualifier));
        }
        if let Some(view) = self.catalog.view(name) {
            self.stats.borrow_mut().estimated_rows_read += view.rows.len();
            let rs = RowSet::new(view.columns.clone(), view.rows.clone());
            return Ok(Relation::from_row_set(&rs, qualifier));
        }

        let table = self.catalog.table(name)?;
        if let Some(m) = self.metrics {
            m.record_table_read(&table.name);
        }
        let columns = bindings_for(table, qualifier);

        let lookup = match filter {
            Some(f) => self.index_lookup(table, qualifier, hints, f)?,
            None => None,
        };
        let mut stats = self.stats.borrow_mut();
        let rows = match lookup {
            Some((index, slots)) => {
                debug!(table = %table.name, index = %index, hits = slots.len(), "index lookup");
                if let Some(m) = self.metrics {
                    m.record_index_lookup(&index);
                }
                stats.estimated_rows_read += slots.len();
                stats.access.push(AccessPath::Index {
                    index,
                    table: table.name.clone(),
                });
                slots
                    .iter()
                    .filter_map(|&s| table.row(s).cloned())
                    .collect()
            }
            None => {
                stats.estimated_rows_read += table.len();
                stats.access.push(AccessPath::FullScan {
                    table: table.name.clone(),
                });
                table.rows()
            }
        };
        Ok(Relation { columns, rows })
    }

    /// Find an index whose every key column is pinned by a constant equality
    /// in the AND-conjunction `filter`; returns the index name and its slots.
    fn index_lookup(
        &self,
        table: &Table,
        qualifier: &str,
        hints: &[IndexHint],
        filter: &Expr,
    ) -> Result<Option<(String, Vec<usize>)>> {
        if table.indexes().is_empty() {
            return Ok(None);
        }
        let ev = self.evaluator();
        let mut pinned: Vec<(usize, Value)> = Vec::new();
        for conjunct in filter.conjuncts() {
            let Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } = conjunct
            else {
                continue;
            };
            for (col_side, val_side) in [(left, right), (right, left)] {
                let Expr::Column { table: t, name } = col_side.as_ref() else {
                    continue;
                };
                if t.as_deref().map_or(false, |t| !t.eq_ignore_ascii_case(qualifier)) {
                    continue;
                }
                let Some(pos) = table.column_index(name) else {
                    continue;
                };
                // Only constants (literals, parameters) qualify
                if let Ok(v) = ev.eval(val_side, &RowScope::empty()) {
                    pinned.push((pos, v));
                    break;
                }
            }
        }
        if pinned.is_empty() {
            return Ok(None);
        }

        let allowed = |index: &str| {
            hints
                .iter()
                .filter(|h| matches!(h.scope, HintScope::All | HintScope::Join))
                .all(|h| {
                    let named = h.indexes.iter().any(|n| n.eq_ignore_ascii_case(index));
                    match h.kind {
                        HintKind::Ignore => !named,
                        HintKind::Use | HintKind::Force => named,
                    }
                })
        };

        let mut candidates: Vec<_> = table
            .indexes()
            .iter()
            .filter(|i| allowed(i.name()))
            .collect();
        // unique indexes first
        candidates.sort_by_key(|i| !i.def.unique);

        'indexes: for index in candidates {
            let mut key_values = Vec::with_capacity(index.positions().len());
            for &pos in index.positions() {
                let Some((_, v)) = pinned.iter().find(|(p, _)| *p == pos) else {
                    continue 'indexes;
                };
                if v.is_null() {
                    continue 'indexes;
                }
                match coerce(v.clone(), &table.columns()[pos], self.dialect) {
                    Ok(c) => key_values.push(c),
                    Err(_) => continue 'indexes,
                }
            }
            let slots = index.lookup(&table.key_of(&key_values)).to_vec();
            return Ok(Some((index.name().to_string(), slots)));
        }
        Ok(None)
    }

    fn join(
        &self,
        left: Relation,
        right: Relation,
        join_type: JoinType,
        on: Option<&Expr>,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Relation> {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());

        let combine = |l: &Row, r: &Row| -> Row {
            let mut row = Vec::with_capacity(l.len() + r.len());
            row.extend(l.iter().cloned());
            row.extend(r.iter().cloned());
            row
        };
        let null_left = vec![Value::Null; left.columns.len()];
        let null_right = vec![Value::Null; right.columns.len()];

        // matches[i] = right rows paired with left row i
        let matches = match on {
            None => {
                let all: Vec<usize> = (0..right.rows.len()).collect();
                vec![all; left.rows.len()]
            }
            Some(cond) => self.join_matches(&left, &right, &columns, cond, outer)?,
        };

        let mut rows = Vec::new();
        match join_type {
            JoinType::Inner | JoinType::Cross => {
                for (i, l) in left.rows.iter().enumerate() {
                    for &j in &matches[i] {
                        rows.push(combine(l, &right.rows[j]));
                    }
                }
            }
            JoinType::Left | JoinType::Full => {
                let mut right_matched = vec![false; right.rows.len()];
                for (i, l) in left.rows.iter().enumerate() {
                    if matches[i].is_empty() {
                        rows.push(combine(l, &null_right));
                    }
                    for &j in &matches[i] {
                        right_matched[j] = true;
                        rows.push(combine(l, &right.rows[j]));
                    }
                }
                if join_type == JoinType::Full {
                    for (j, r) in right.rows.iter().enumerate() {
                        if !right_matched[j] {
                            rows.push(combine(&null_left, r));
                        }
                    }
                }
            }
            JoinType::Right => {
                let mut by_right: Vec<Vec<usize>> = vec![Vec::new(); right.rows.len()];
                for (i, js) in matches.iter().enumerate() {
                    for &j in js {
                        by_right[j].push(i);
                    }
                }
                for (j, r) in right.rows.iter().enumerate() {
                    if by_right[j].is_empty() {
                        rows.push(combine(&null_left, r));
                    }
                    for &i in &by_right[j] {
                        rows.push(combine(&left.rows[i], r));
                    }
                }
            }
        }
        Ok(Relation { columns, rows })
    }

    /// Pair rows satisfying `cond`: hash join for `l.col = r.col`, nested loop otherwise
    fn join_matches(
        &self,
        left: &Relation,
        right: &Relation,
        columns: &[ColumnBinding],
        cond: &Expr,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Vec<usize>>> {
        let ci = self.ci();
        if let Some((li, ri)) = equi_join_positions(cond, &left.columns, &right.columns) {
            let mut table: AHashMap<String, Vec<usize>> = AHashMap::with_capacity(right.rows.len());
            for (j, r) in right.rows.iter().enumerate() {
                if !r[ri].is_null() {
                    table.entry(r[ri].key_fragment(ci)).or_default().push(j);
                }
            }
            return Ok(left
                .rows
                .iter()
                .map(|l| {
                    if l[li].is_null() {
                        Vec::new()
                    } else {
                        table.get(&l[li].key_fragment(ci)).cloned().unwrap_or_default()
                    }
                })
                .collect());
        }

        let ev = self.evaluator();
        let mut matches = Vec::with_capacity(left.rows.len());
        let mut combined: Row = Vec::with_capacity(columns.len());
        for l in &left.rows {
            let mut hits = Vec::new();
            for (j, r) in right.rows.iter().enumerate() {
                combined.clear();
                combined.extend(l.iter().cloned());
                combined.extend(r.iter().cloned());
                let scope = RowScope::new(columns, &combined).with_outer(outer);
                if ev
                    .eval_predicate(cond, &scope)
                    .map_err(|e| e.in_clause("on clause"))?
                {
                    hits.push(j);
                }
            }
            matches.push(hits);
        }
        Ok(matches)
    }

    // ------------------------------------------------------------------
    // UNION
    // ------------------------------------------------------------------

    pub(crate) fn execute_union(
        &self,
        stmt: &UnionStmt,
        outer: Option<&RowScope<'_>>,
    ) -> Result<RowSet> {
        self.with_ctes(&stmt.ctes, outer, || self.union_body(stmt, outer))
    }

    fn union_body(&self, stmt: &UnionStmt, outer: Option<&RowScope<'_>>) -> Result<RowSet> {
        let mut parts = Vec::with_capacity(stmt.parts.len());
        for part in &stmt.parts {
            parts.push(self.execute_select(part, outer)?);
        }
        let Some(first) = parts.first() else {
            return Ok(RowSet::default());
        };
        let columns = first.columns.clone();
        let width = columns.len();
        if parts.iter().any(|p| p.columns.len() != width) {
            return Err(SqlError::ColumnCountMismatch);
        }

        check_union_types(&parts, width)?;
        widen_numeric_columns(&mut parts, width);

        // Combine left to right; a non-ALL combine dedupes everything so far
        let ci = self.ci();
        let mut parts = parts.into_iter();
        let mut rows = parts.next().map(|p| p.rows).unwrap_or_default();
        for (i, part) in parts.enumerate() {
            rows.extend(part.rows);
            let all = stmt.all_flags.get(i).copied().unwrap_or(false);
            if !all {
                let mut seen = AHashSet::with_capacity(rows.len());
                rows.retain(|r| seen.insert(row_key(r, ci)));
            }
        }

        // ORDER BY resolves against the first part's output columns
        let bindings: Vec<ColumnBinding> = columns
            .iter()
            .map(|c| ColumnBinding::new(None, c.clone()))
            .collect();
        let mut keyed: Vec<(Row, Vec<Value>)> = Vec::with_capacity(rows.len());
        if stmt.order_by.is_empty() {
            keyed.extend(rows.into_iter().map(|r| (r, Vec::new())));
        } else {
            let ev = self.evaluator();
            for row in rows {
                let scope = RowScope::new(&bindings, &row);
                let mut keys = Vec::with_capacity(stmt.order_by.len());
                for o in &stmt.order_by {
                    keys.push(match &o.expr {
                        Expr::Literal(n) if is_ordinal(n) => {
                            row[ordinal(n, width, "order clause")?].clone()
                        }
                        Expr::Column { name, .. } => {
                            match columns.iter().position(|c| c.eq_ignore_ascii_case(name)) {
                                Some(i) => row[i].clone(),
                                None => {
                                    return Err(SqlError::UnknownColumn {
                                        column: name.clone(),
                                        clause: "order clause".into(),
                                    })
                                }
                            }
                        }
                        other => ev
                            .eval(other, &scope)
                            .map_err(|e| e.in_clause("order clause"))?,
                    });
                }
                keyed.push((row, keys));
            }
            keyed.sort_by(|a, b| self.compare_sort_keys(&a.1, &b.1, &stmt.order_by));
        }
        let keyed = self.apply_limit(keyed, stmt.limit.as_ref())?;

        Ok(RowSet {
            columns,
            rows: keyed.into_iter().map(|(r, _)| r).collect(),
        })
    }

    // ------------------------------------------------------------------
    // Helpers shared with the DML executor
    // ------------------------------------------------------------------

    /// Every live row of `table` under `qualifier`, each followed by its slot
    fn target_relation(&self, table: &Table, qualifier: &str) -> Relation {
        if let Some(m) = self.metrics {
            m.record_table_read(&table.name);
        }
        let mut columns = bindings_for(table, qualifier);
        columns.push(ColumnBinding::new(Some(SLOT_QUALIFIER), "slot"));
        let rows = table
            .iter_slots()
            .map(|(slot, row)| {
                let mut row = row.clone();
                row.push(Value::Integer(slot as i64));
                row
            })
            .collect::<Vec<_>>();
        self.stats.borrow_mut().estimated_rows_read += rows.len();
        Relation { columns, rows }
    }

    /// Slots of `table` that survive `joins` and `filter`, each paired with
    /// its first combined row; the bindings describe those rows
    pub(crate) fn joined_targets(
        &self,
        table: &Table,
        alias: Option<&str>,
        joins: &[DmlJoin],
        filter: Option<&Expr>,
    ) -> Result<(Vec<ColumnBinding>, Vec<(usize, Row)>)> {
        let slot_pos = table.columns().len();
        let mut relation = self.target_relation(table, alias.unwrap_or(&table.name));
        for join in joins {
            let right = self.resolve_source(&join.source, None, None)?;
            relation = self.join(relation, right, join.join_type, join.on.as_ref(), None)?;
        }

        let ev = self.evaluator();
        let mut seen = AHashSet::new();
        let mut targets = Vec::new();
        for row in relation.rows {
            // outer joins can pair a source row with no target row
            let Some(slot) = slot_of(&row[slot_pos]) else {
                continue;
            };
            if seen.contains(&slot) {
                continue;
            }
            if let Some(filter) = filter {
                let scope = RowScope::new(&relation.columns, &row);
                if !ev
                    .eval_predicate(filter, &scope)
                    .map_err(|e| e.in_clause("where clause"))?
                {
                    continue;
                }
            }
            seen.insert(slot);
            targets.push((slot, row));
        }
        trace!(table = %table.name, matched = targets.len(), "joined targets");
        Ok((relation.columns, targets))
    }

    /// Each `source` row with the target slots it meets under `on`: target
    /// columns, slot, then source columns. An unmatched source row comes once
    /// with a NULL target.
    pub(crate) fn merge_pairs(
        &self,
        table: &Table,
        alias: Option<&str>,
        source: &TableRef,
        on: &Expr,
    ) -> Result<(Vec<ColumnBinding>, Vec<(Option<usize>, Row)>)> {
        let slot_pos = table.columns().len();
        let target = self.target_relation(table, alias.unwrap_or(&table.name));
        let source = self.resolve_source(source, None, None)?;
        let relation = self.join(target, source, JoinType::Right, Some(on), None)?;
        let pairs = relation
            .rows
            .into_iter()
            .map(|row| (slot_of(&row[slot_pos]), row))
            .collect();
        Ok((relation.columns, pairs))
    }

    /// Slots of `table` whose rows satisfy `filter` (index-assisted when possible)
    pub(crate) fn matching_slots(
        &self,
        table: &Table,
        alias: Option<&str>,
        filter: Option<&Expr>,
    ) -> Result<Vec<usize>> {
        let qualifier = alias.unwrap_or(&table.name);
        if let Some(m) = self.metrics {
            m.record_table_read(&table.name);
        }
        let Some(filter) = filter else {
            return Ok(table.iter_slots().map(|(s, _)| s).collect());
        };

        let candidates = match self.index_lookup(table, qualifier, &[], filter)? {
            Some((index, slots)) => {
                if let Some(m) = self.metrics {
                    m.record_index_lookup(&index);
                }
                slots
            }
            None => table.iter_slots().map(|(s, _)| s).collect(),
        };

        let columns = bindings_for(table, qualifier);
        let ev = self.evaluator();
        let mut result = Vec::with_capacity(candidates.len());
        for slot in candidates {
            let Some(row) = table.row(slot) else {
                continue;
            };
            let scope = RowScope::new(&columns, row);
            if ev
                .eval_predicate(filter, &scope)
                .map_err(|e| e.in_clause("where clause"))?
            {
                result.push(slot);
            }
        }
        Ok(result)
    }
}

impl SubqueryRunner for QueryExecutor<'_> {
    fn run_subquery(&self, query: &Query, outer: &RowScope<'_>) -> Result<Vec<Row>> {
        self.run_query(query, Some(outer)).map(|rs| rs.rows)
    }
}

/// Column bindings of a physical table under `qualifier`
pub(crate) fn bindings_for(table: &Table, qualifier: &str) -> Vec<ColumnBinding> {
    table
        .columns()
        .iter()
        .map(|c| ColumnBinding::new(Some(qualifier), c.name.clone()))
        .collect()
}

/// Any integral numeric literal in ORDER BY / GROUP BY is a column position
fn is_ordinal(v: &Value) -> bool {
    match v {
        Value::Integer(_) => true,
        Value::Decimal(d) => d.fract().is_zero(),
        Value::Float(f) => f.fract() == 0.0,
        _ => false,
    }
}

/// 1-based ordinal into a list of `len` items
fn ordinal(n: &Value, len: usize, clause: &str) -> Result<usize> {
    match n.as_i64() {
        Some(i) if i >= 1 && (i as usize) <= len => Ok(i as usize - 1),
        _ => Err(SqlError::UnknownColumn {
            column: n.to_string(),
            clause: clause.to_string(),
        }),
    }
}

/// Qualifier of the hidden slot column on DML targets
const SLOT_QUALIFIER: &str = "#target";

fn slot_of(value: &Value) -> Option<usize> {
    value.as_i64().and_then(|s| usize::try_from(s).ok())
}

/// Qualifier of the hidden columns holding window values
const WINDOW_QUALIFIER: &str = "#window";

fn window_slot(i: usize) -> Expr {
    Expr::Column {
        table: Some(WINDOW_QUALIFIER.to_string()),
        name: format!("w{}", i),
    }
}

/// Whether computing `window` needs the rows grouped first
fn window_contains_aggregate(window: &Expr) -> bool {
    match window {
        Expr::Window {
            function,
            partition_by,
            order_by,
            ..
        } => {
            let args_aggregate = match function.as_ref() {
                Expr::FunctionCall { args, .. } => args.iter().any(Expr::contains_aggregate),
                other => other.contains_aggregate(),
            };
            args_aggregate
                || partition_by.iter().any(Expr::contains_aggregate)
                || order_by.iter().any(|o| o.expr.contains_aggregate())
        }
        _ => false,
    }
}

fn unit_scope<'s>(
    columns: &'s [ColumnBinding],
    rep: &'s [Value],
    group: Option<&'s [Row]>,
    outer: Option<&'s RowScope<'s>>,
) -> RowScope<'s> {
    let scope = RowScope::new(columns, rep).with_outer(outer);
    match group {
        Some(g) => scope.with_group(g),
        None => scope,
    }
}

fn output_aliases(items: &[OutputItem<'_>], out: &[Value]) -> Vec<(String, Value)> {
    items
        .iter()
        .zip(out)
        .map(|(i, v)| (i.name.clone(), v.clone()))
        .collect()
}

/// Half-open range of partition positions in the frame of row `pos`
fn frame_range(
    frame: Option<&WindowFrame>,
    ordered: bool,
    pos: usize,
    peers: (usize, usize),
    len: usize,
) -> (usize, usize) {
    let Some(frame) = frame else {
        return if ordered { (0, peers.1) } else { (0, len) };
    };
    let offset = |n: u64| usize::try_from(n).unwrap_or(usize::MAX);
    let start = match frame.start {
        FrameBound::UnboundedPreceding => 0,
        FrameBound::Preceding(n) => pos.saturating_sub(offset(n)),
        FrameBound::CurrentRow if frame.range => peers.0,
        FrameBound::CurrentRow => pos,
        FrameBound::Following(n) => pos.saturating_add(offset(n)),
        FrameBound::UnboundedFollowing => len,
    };
    let end = match frame.end {
        FrameBound::UnboundedPreceding => 0,
        FrameBound::Preceding(n) => (pos + 1).saturating_sub(offset(n)),
        FrameBound::CurrentRow if frame.range => peers.1,
        FrameBound::CurrentRow => pos + 1,
        FrameBound::Following(n) => pos.saturating_add(offset(n)).saturating_add(1),
        FrameBound::UnboundedFollowing => len,
    };
    let end = end.min(len);
    (start.min(end), end)
}

/// Bucket (1-based) of position `pos` when `len` rows are dealt into `n`
/// buckets, larger buckets first
fn ntile_bucket(pos: usize, len: usize, n: usize) -> usize {
    let size = len / n;
    let larger = len % n;
    let boundary = larger * (size + 1);
    if pos < boundary {
        pos / (size + 1) + 1
    } else {
        (pos - boundary) / size.max(1) + larger + 1
    }
}

fn find_binding(columns: &[ColumnBinding], table: Option<&str>, name: &str) -> Option<usize> {
    let mut hits = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.matches(table, name))
        .map(|(i, _)| i);
    let first = hits.next()?;
    // ambiguous references fall back to the nested loop
    hits.next().is_none().then_some(first)
}

/// `l.a = r.b` with one column on each side of the join
fn equi_join_positions(
    cond: &Expr,
    left: &[ColumnBinding],
    right: &[ColumnBinding],
) -> Option<(usize, usize)> {
    let Expr::BinaryOp {
        left: a,
        op: BinaryOperator::Eq,
        right: b,
    } = cond
    else {
        return None;
    };
    let (
        Expr::Column {
            table: ta,
            name: na,
        },
        Expr::Column {
            table: tb,
            name: nb,
        },
    ) = (a.as_ref(), b.as_ref())
    else {
        return None;
    };
    let side = |t: &Option<String>, n: &str| {
        let l = find_binding(left, t.as_deref(), n);
        let r = find_binding(right, t.as_deref(), n);
        match (l, r) {
            (Some(i), None) => Some((true, i)),
            (None, Some(i)) => Some((false, i)),
            _ => None,
        }
    };
    match (side(ta, na)?, side(tb, nb)?) {
        ((true, li), (false, ri)) | ((false, ri), (true, li)) => Some((li, ri)),
        _ => None,
    }
}

/// Every column must hold mutually compatible type families across all parts
fn check_union_types(parts: &[RowSet], width: usize) -> Result<()> {
    for col in 0..width {
        let mut seen: Option<(TypeCategory, &'static str)> = None;
        for value in parts.iter().flat_map(|p| p.rows.iter().map(move |r| &r[col])) {
            if value.is_null() {
                continue;
            }
            match seen {
                None => seen = Some((value.category(), value.type_name())),
                Some((category, name)) if !category.is_compatible_with(value.category()) => {
                    return Err(SqlError::TypeIncompatible {
                        position: col + 1,
                        left: name.to_string(),
                        right: value.type_name().to_string(),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Coerce mixed numeric columns to the widest representation present
fn widen_numeric_columns(parts: &mut [RowSet], width: usize) {
    for col in 0..width {
        let (mut has_int, mut has_dec, mut has_float) = (false, false, false);
        for row in parts.iter().flat_map(|p| p.rows.iter()) {
            match &row[col] {
                Value::Integer(_) => has_int = true,
                Value::Decimal(_) => has_dec = true,
                Value::Float(_) => has_float = true,
                _ => {}
            }
        }
        let mixed = [has_int, has_dec, has_float].iter().filter(|b| **b).count() > 1;
        if !mixed {
            continue;
        }
        for row in parts.iter_mut().flat_map(|p| p.rows.iter_mut()) {
            let widened = match &row[col] {
                Value::Integer(i) if has_float => Some(Value::Float(*i as f64)),
                Value::Decimal(d) if has_float => d.to_f64().map(Value::Float),
                Value::Integer(i) => Some(Value::Decimal(Decimal::from(*i))),
                _ => None,
            };
            if let Some(v) = widened {
                row[col] = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::sql::parse;
    use crate::types::{ColumnDef, ColumnType, IndexDef};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new(true);
        let users = catalog.create_table("users").unwrap();
        users.add_column(ColumnDef::new("id", ColumnType::Integer).not_null()).unwrap();
        users.add_column(ColumnDef::new("name", ColumnType::Text).not_null()).unwrap();
        users.add_column(ColumnDef::new("email", ColumnType::Text)).unwrap();
        users.add_index(IndexDef::new("ix_users_name", &["name"])).unwrap();
        for (id, name, email) in [
            (1, "John", Some("john@x.com")),
            (2, "Bob", None),
            (3, "Jane", Some("jane@x.com")),
        ] {
            users
                .insert_row(vec![Value::Integer(id), Value::from(name), Value::from(email)])
                .unwrap();
        }

        let orders = catalog.create_table("orders").unwrap();
        orders.add_column(ColumnDef::new("id", ColumnType::Integer)).unwrap();
        orders.add_column(ColumnDef::new("user_id", ColumnType::Integer)).unwrap();
        orders.add_column(ColumnDef::new("amount", ColumnType::Decimal)).unwrap();
        for (id, user, amount) in [(10, 1, 5), (11, 1, 7), (12, 3, 2)] {
            orders
                .insert_row(vec![
                    Value::Integer(id),
                    Value::Integer(user),
                    Value::Decimal(Decimal::from(amount)),
                ])
                .unwrap();
        }
        catalog
    }

    fn query_with(catalog: &Catalog, dialect: &Dialect, sql: &str) -> Result<RowSet> {
        let params = Parameters::new().add("@name", "Jane");
        let exec = QueryExecutor::new(catalog, dialect, &params);
        let query = parse(sql, dialect)?
            .into_query()
            .ok_or_else(|| SqlError::syntax("not a query", sql))?;
        exec.execute_query(&query)
    }

    fn query(sql: &str) -> Result<RowSet> {
        query_with(&catalog(), &Dialect::latest(DialectKind::MySql), sql)
    }

    fn ids(rs: &RowSet) -> Vec<i64> {
        rs.rows.iter().filter_map(|r| r[0].as_i64()).collect()
    }

    fn texts(rs: &RowSet, column: &str) -> Vec<String> {
        rs.column_values(column).iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_window_partitions_and_ranking() {
        let rs = query(
            "SELECT id, ROW_NUMBER() OVER (PARTITION BY user_id ORDER BY amount DESC) AS rn, \
             SUM(amount) OVER (PARTITION BY user_id) AS total FROM orders ORDER BY id",
        )
        .unwrap();
        assert_eq!(rs.columns, vec!["id", "rn", "total"]);
        assert_eq!(texts(&rs, "rn"), vec!["2", "1", "1"]);
        assert_eq!(texts(&rs, "total"), vec!["12", "12", "2"]);

        let rs = query(
            "SELECT id, SUM(amount) OVER (ORDER BY id) AS running, LAG(id) OVER (ORDER BY id) AS prev, \
             RANK() OVER (ORDER BY user_id) AS r, DENSE_RANK() OVER (ORDER BY user_id) AS d FROM orders",
        )
        .unwrap();
        assert_eq!(texts(&rs, "running"), vec!["5", "12", "14"]);
        assert_eq!(rs.column_values("prev")[0], Value::Null);
        assert_eq!(rs.column_values("prev")[2], Value::Integer(11));
        assert_eq!(texts(&rs, "r"), vec!["1", "1", "3"]);
        assert_eq!(texts(&rs, "d"), vec!["1", "1", "2"]);

        let rs = query("SELECT ROW_NUMBER() OVER (ORDER BY id DESC) FROM users").unwrap();
        assert_eq!(rs.columns, vec!["ROW_NUMBER() OVER (ORDER BY id DESC)"]);
        assert_eq!(ids(&rs), vec![3, 2, 1]);
    }

    #[test]
    fn test_window_frames_and_placement() {
        let rs = query(
            "SELECT id, SUM(amount) OVER (ORDER BY id ROWS BETWEEN 1 PRECEDING AND 1 FOLLOWING) AS s, \
             LAST_VALUE(id) OVER (ORDER BY id ROWS BETWEEN CURRENT ROW AND UNBOUNDED FOLLOWING) AS l \
             FROM orders",
        )
        .unwrap();
        assert_eq!(texts(&rs, "s"), vec!["12", "14", "9"]);
        assert_eq!(texts(&rs, "l"), vec!["12", "12", "12"]);

        let rs = query("SELECT id FROM orders ORDER BY ROW_NUMBER() OVER (ORDER BY amount)").unwrap();
        assert_eq!(ids(&rs), vec![12, 10, 11]);

        let rs = query(
            "SELECT user_id, SUM(amount) AS s, RANK() OVER (ORDER BY SUM(amount) DESC) AS r \
             FROM orders GROUP BY user_id HAVING COUNT(*) > 0 ORDER BY r DESC",
        )
        .unwrap();
        assert_eq!(ids(&rs), vec![3, 1]);
        assert_eq!(texts(&rs, "r"), vec!["2", "1"]);

        let err = query("SELECT id FROM orders WHERE ROW_NUMBER() OVER (ORDER BY id) = 1").unwrap_err();
        assert_eq!(err.code(), 1210);
        let err = query("SELECT UPPER(name) OVER () FROM users").unwrap_err();
        assert!(matches!(err, SqlError::InvalidArgument(_)));
    }

    #[test]
    fn test_frame_range_and_ntile() {
        let rows = WindowFrame {
            range: false,
            start: FrameBound::Preceding(2),
            end: FrameBound::Following(1),
        };
        assert_eq!(frame_range(Some(&rows), true, 0, (0, 1), 5), (0, 2));
        assert_eq!(frame_range(Some(&rows), true, 4, (4, 5), 5), (2, 5));
        assert_eq!(frame_range(None, true, 1, (1, 3), 5), (0, 3));
        assert_eq!(frame_range(None, false, 1, (0, 5), 5), (0, 5));
        let peers = WindowFrame {
            range: true,
            start: FrameBound::CurrentRow,
            end: FrameBound::UnboundedFollowing,
        };
        assert_eq!(frame_range(Some(&peers), true, 2, (1, 3), 5), (1, 5));

        let buckets: Vec<usize> = (0..5).map(|p| ntile_bucket(p, 5, 3)).collect();
        assert_eq!(buckets, vec![1, 1, 2, 2, 3]);
        let buckets: Vec<usize> = (0..2).map(|p| ntile_bucket(p, 2, 4)).collect();
        assert_eq!(buckets, vec![1, 2]);
    }

    #[test]
    fn test_where_is_null() {
        let rs = query("SELECT id FROM users WHERE email IS NULL").unwrap();
        assert_eq!(ids(&rs), vec![2]);
    }

    #[test]
    fn test_index_lookup_counts_once() {
        let catalog = catalog();
        let dialect = Dialect::latest(DialectKind::MySql);
        let metrics = Metrics::new();
        let params = Parameters::new();
        let exec = QueryExecutor::new(&catalog, &dialect, &params).with_metrics(&metrics);
        let query = parse("SELECT id FROM users WHERE name = 'John'", &dialect)
            .unwrap()
            .into_query()
            .unwrap();
        let rs = exec.execute_query(&query).unwrap();
        assert_eq!(ids(&rs), vec![1]);
        assert_eq!(metrics.index_lookups(), 1);
        assert_eq!(metrics.index_hint("ix_users_name"), 1);
        assert!(matches!(
            exec.take_stats().access.as_slice(),
            [AccessPath::Index { .. }]
        ));
    }

    #[test]
    fn test_ignore_index_hint_forces_scan() {
        let catalog = catalog();
        let dialect = Dialect::latest(DialectKind::MySql);
        let metrics = Metrics::new();
        let params = Parameters::new();
        let exec = QueryExecutor::new(&catalog, &dialect, &params).with_metrics(&metrics);
        let query = parse(
            "SELECT id FROM users IGNORE INDEX (ix_users_name) WHERE name = 'John'",
            &dialect,
        )
        .unwrap()
        .into_query()
        .unwrap();
        assert_eq!(ids(&exec.execute_query(&query).unwrap()), vec![1]);
        assert_eq!(metrics.index_lookups(), 0);
    }

    #[test]
    fn test_limit_comma_form() {
        let rs = query("SELECT id FROM users ORDER BY id LIMIT 1, 2").unwrap();
        assert_eq!(ids(&rs), vec![2, 3]);
        let rs = query("SELECT id FROM users ORDER BY id DESC LIMIT 2 OFFSET 1").unwrap();
        assert_eq!(ids(&rs), vec![2, 1]);
    }

    #[test]
    fn test_order_by_alias_ordinal_and_expression() {
        let rs = query("SELECT id AS k, name FROM users ORDER BY k DESC").unwrap();
        assert_eq!(ids(&rs), vec![3, 2, 1]);
        let rs = query("SELECT id, name FROM users ORDER BY 2").unwrap();
        assert_eq!(ids(&rs), vec![2, 3, 1]);
        let rs = query("SELECT id FROM users ORDER BY LENGTH(name), id").unwrap();
        assert_eq!(ids(&rs), vec![2, 1, 3]);
    }

    #[test]
    fn test_out_of_range_ordinals() {
        let err = query("SELECT id FROM users ORDER BY 3").unwrap_err();
        assert_eq!(err.code(), 1054);
        let err = query("SELECT name, COUNT(*) FROM users GROUP BY 5").unwrap_err();
        assert_eq!(err.code(), 1054);
        let err = query("SELECT 1 ORDER BY 99999999999999999999").unwrap_err();
        assert_eq!(err.code(), 1054);
        let err = query("SELECT 1 GROUP BY 18446744073709551615").unwrap_err();
        assert_eq!(err.code(), 1054);
        let err = query("SELECT id FROM users UNION SELECT id FROM users ORDER BY 2.0").unwrap_err();
        assert_eq!(err.code(), 1054);
        let rs = query("SELECT id, name FROM users ORDER BY 2.0").unwrap();
        assert_eq!(ids(&rs), vec![2, 3, 1]);
    }

    #[test]
    fn test_nulls_sort_per_dialect() {
        let c = catalog();
        let rs = query_with(&c, &Dialect::latest(DialectKind::MySql), "SELECT id FROM users ORDER BY email").unwrap();
        assert_eq!(ids(&rs), vec![2, 3, 1]);
        let rs = query_with(
            &c,
            &Dialect::latest(DialectKind::PostgreSql),
            "SELECT id FROM users ORDER BY email",
        )
        .unwrap();
        assert_eq!(ids(&rs), vec![3, 1, 2]);
    }

    #[test]
    fn test_group_by_having_alias() {
        let rs = query(
            "SELECT user_id, SUM(amount) AS total FROM orders GROUP BY user_id HAVING total > 5 ORDER BY user_id",
        )
        .unwrap();
        assert_eq!(rs.rows, vec![vec![Value::Integer(1), Value::Decimal(Decimal::from(12))]]);
        let err = query("SELECT user_id FROM orders GROUP BY user_id HAVING nope > 1").unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn { ref clause, .. } if clause == "having clause"));
    }

    #[test]
    fn test_count_star_vs_count_column() {
        let rs = query("SELECT COUNT(*), COUNT(email) FROM users").unwrap();
        assert_eq!(rs.rows, vec![vec![Value::Integer(3), Value::Integer(2)]]);
        let rs = query("SELECT COUNT(*) FROM users WHERE id > 100").unwrap();
        assert_eq!(rs.rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn test_joins() {
        let rs = query(
            "SELECT u.id, o.id FROM users u INNER JOIN orders o ON o.user_id = u.id ORDER BY o.id",
        )
        .unwrap();
        assert_eq!(rs.len(), 3);
        let rs = query(
            "SELECT u.id, o.id FROM users u LEFT JOIN orders o ON o.user_id = u.id AND o.amount > 3 ORDER BY u.id",
        )
        .unwrap();
        assert_eq!(rs.len(), 4);
        assert_eq!(rs.rows[2], vec![Value::Integer(2), Value::Null]);
        let rs = query("SELECT u.id FROM users u CROSS JOIN orders o").unwrap();
        assert_eq!(rs.len(), 9);
        let rs = query("SELECT u.id FROM orders o RIGHT JOIN users u ON o.user_id = u.id").unwrap();
        assert_eq!(rs.len(), 4);
    }

    #[test]
    fn test_subqueries() {
        let rs = query(
            "SELECT id FROM users u WHERE EXISTS (SELECT 1 FROM orders o WHERE o.user_id = u.id) ORDER BY id",
        )
        .unwrap();
        assert_eq!(ids(&rs), vec![1, 3]);
        let rs = query("SELECT id FROM users WHERE id IN (SELECT user_id FROM orders WHERE amount < 3)").unwrap();
        assert_eq!(ids(&rs), vec![3]);
        let rs = query("SELECT t.id FROM (SELECT id FROM users WHERE id > 1) AS t ORDER BY t.id").unwrap();
        assert_eq!(ids(&rs), vec![2, 3]);
    }

    #[test]
    fn test_cte_and_parameter() {
        let rs = query("WITH j AS (SELECT id, name FROM users WHERE name = @name) SELECT id FROM j").unwrap();
        assert_eq!(ids(&rs), vec![3]);
    }

    #[test]
    fn test_distinct_and_select_without_from() {
        let rs = query("SELECT DISTINCT user_id FROM orders").unwrap();
        assert_eq!(rs.len(), 2);
        let rs = query("SELECT 1 + 1 AS two").unwrap();
        assert_eq!(rs.columns, vec!["two".to_string()]);
        assert_eq!(rs.rows, vec![vec![Value::Integer(2)]]);
        let rs = query("SELECT 'x' FROM DUAL").unwrap();
        assert_eq!(rs.len(), 1);
    }

    #[test]
    fn test_union_laws() {
        let rs = query("SELECT 1.0 AS v UNION SELECT 1 AS v").unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.columns, vec!["v".to_string()]);
        let rs = query("SELECT id FROM users UNION ALL SELECT id FROM users").unwrap();
        assert_eq!(rs.len(), 6);
        let rs = query("SELECT id FROM users UNION SELECT id FROM users ORDER BY 1 DESC").unwrap();
        assert_eq!(ids(&rs), vec![3, 2, 1]);
        let err = query("SELECT 1 AS v UNION SELECT 'x' AS v").unwrap_err();
        assert_eq!(err.code(), 1267);
        let err = query("SELECT 1, 2 UNION SELECT 1").unwrap_err();
        assert_eq!(err.code(), 1222);
    }

    #[test]
    fn test_unknown_table_and_column() {
        assert_eq!(query("SELECT * FROM nope").unwrap_err().code(), 1146);
        assert_eq!(query("SELECT nope FROM users").unwrap_err().code(), 1054);
    }
}
