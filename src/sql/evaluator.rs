/// Expression evaluator - evaluates expressions against row scopes using
/// three-valued logic
use super::ast::{
    is_aggregate_function, BinaryOperator, Expr, IntervalUnit, Query, UnaryOperator,
};
use super::resolver::{coerce, CompiledPattern};
use crate::dialect::Dialect;
use crate::error::{Result, SqlError};
use crate::types::{ColumnDef, Parameters, Row, Value};
use ahash::AHashSet;
use chrono::{Months, NaiveDateTime};
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::prelude::{FromPrimitive, Signed, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Arc;

const PATTERN_CACHE_SIZE: usize = 256;

/// Shared cache of compiled LIKE patterns
pub type PatternCache = Arc<Mutex<LruCache<String, CompiledPattern>>>;

pub fn new_pattern_cache() -> PatternCache {
    let capacity = NonZeroUsize::new(PATTERN_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
    Arc::new(Mutex::new(LruCache::new(capacity)))
}

/// Name under which a column is visible in a row scope
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    /// Table name or alias the column can be qualified with
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnBinding {
    pub fn new(qualifier: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.map(str::to_string),
            name: name.into(),
        }
    }

    pub(crate) fn matches(&self, table: Option<&str>, name: &str) -> bool {
        if !self.name.eq_ignore_ascii_case(name) {
            return false;
        }
        match (table, &self.qualifier) {
            (None, _) => true,
            (Some(t), Some(q)) => q.eq_ignore_ascii_case(t),
            (Some(_), None) => false,
        }
    }
}

/// The row an expression is evaluated against, plus its enclosing context
#[derive(Clone, Copy)]
pub struct RowScope<'a> {
    pub columns: &'a [ColumnBinding],
    pub values: &'a [Value],
    /// Enclosing query's row (correlated subqueries)
    pub outer: Option<&'a RowScope<'a>>,
    /// Rows of the current group; aggregates are only legal when set
    pub group: Option<&'a [Row]>,
    /// Output aliases visible to HAVING and ORDER BY
    pub aliases: &'a [(String, Value)],
}

impl<'a> RowScope<'a> {
    pub fn new(columns: &'a [ColumnBinding], values: &'a [Value]) -> Self {
        Self {
            columns,
            values,
            outer: None,
            group: None,
            aliases: &[],
        }
    }

    pub fn empty() -> RowScope<'static> {
        RowScope {
            columns: &[],
            values: &[],
            outer: None,
            group: None,
            aliases: &[],
        }
    }

    pub fn with_outer(mut self, outer: Option<&'a RowScope<'a>>) -> Self {
        self.outer = outer;
        self
    }

    pub fn with_group(mut self, group: &'a [Row]) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_aliases(mut self, aliases: &'a [(String, Value)]) -> Self {
        self.aliases = aliases;
        self
    }

    fn lookup(&self, table: Option<&str>, name: &str) -> Option<Value> {
        if let Some(pos) = self.columns.iter().position(|c| c.matches(table, name)) {
            return Some(self.values.get(pos).cloned().unwrap_or(Value::Null));
        }
        if table.is_none() {
            if let Some((_, v)) = self.aliases.iter().find(|(a, _)| a.eq_ignore_ascii_case(name)) {
                return Some(v.clone());
            }
        }
        self.outer.and_then(|o| o.lookup(table, name))
    }
}

/// Executes subqueries on behalf of the evaluator
pub trait SubqueryRunner {
    fn run_subquery(&self, query: &Query, outer: &RowScope<'_>) -> Result<Vec<Row>>;
}

pub struct ExprEvaluator<'a> {
    dialect: &'a Dialect,
    params: &'a Parameters,
    runner: Option<&'a dyn SubqueryRunner>,
    /// ⚡ Pattern cache: pattern string -> compiled pattern
    pattern_cache: PatternCache,
}

impl<'a> ExprEvaluator<'a> {
    pub fn new(dialect: &'a Dialect, params: &'a Parameters) -> Self {
        Self {
            dialect,
            params,
            runner: None,
            pattern_cache: new_pattern_cache(),
        }
    }

    pub fn with_runner(mut self, runner: &'a dyn SubqueryRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_pattern_cache(mut self, cache: PatternCache) -> Self {
        self.pattern_cache = cache;
        self
    }

    pub fn dialect(&self) -> &Dialect {
        self.dialect
    }

    /// Evaluate a predicate; unknown counts as false
    pub fn eval_predicate(&self, expr: &Expr, scope: &RowScope<'_>) -> Result<bool> {
        Ok(self.eval(expr, scope)?.truthiness() == Some(true))
    }

    /// Evaluate an expression against a row scope
    pub fn eval(&self, expr: &Expr, scope: &RowScope<'_>) -> Result<Value> {
        match expr {
            Expr::Column { table, name } => scope.lookup(table.as_deref(), name).ok_or_else(|| {
                SqlError::unknown_column(match table {
                    Some(t) => format!("{}.{}", t, name),
                    None => name.clone(),
                })
            }),

            Expr::Literal(val) => Ok(val.clone()),

            Expr::Parameter(name) => self
                .params
                .value(name)
                .cloned()
                .ok_or_else(|| SqlError::ParameterNotFound(name.clone())),

            Expr::BinaryOp { left, op, right } => self.eval_binary(left, *op, right, scope),

            Expr::UnaryOp { op, expr } => {
                let val = self.eval(expr, scope)?;
                match op {
                    UnaryOperator::Not => Ok(match val.truthiness() {
                        Some(b) => Value::Bool(!b),
                        None => Value::Null,
                    }),
                    UnaryOperator::Minus => negate(val),
                    UnaryOperator::Plus => Ok(val),
                }
            }

            Expr::FunctionCall {
                name,
                args,
                distinct,
            } => {
                if is_aggregate_function(name) {
                    self.eval_aggregate(name, args, *distinct, scope)
                } else {
                    self.eval_function(name, args, scope)
                }
            }

            Expr::Wildcard => Err(SqlError::syntax("'*' is only valid inside COUNT(*)", "*")),

            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                let operand = match operand {
                    Some(o) => Some(self.eval(o, scope)?),
                    None => None,
                };
                for (when, then) in branches {
                    let hit = match &operand {
                        Some(base) => {
                            let candidate = self.eval(when, scope)?;
                            base.sql_eq(&candidate, self.ci()) == Some(true)
                        }
                        None => self.eval_predicate(when, scope)?,
                    };
                    if hit {
                        return self.eval(then, scope);
                    }
                }
                match else_result {
                    Some(e) => self.eval(e, scope),
                    None => Ok(Value::Null),
                }
            }

            Expr::In {
                expr,
                list,
                negated,
            } => {
                let val = self.eval(expr, scope)?;
                let mut candidates = Vec::with_capacity(list.len());
                for item in list {
                    match self.eval(item, scope)? {
                        Value::List(items) => candidates.extend(items),
                        other => candidates.push(other),
                    }
                }
                Ok(self.membership(&val, &candidates, *negated))
            }

            Expr::InSubquery {
                expr,
                query,
                negated,
            } => {
                let val = self.eval(expr, scope)?;
                let rows = self.run_subquery(query, scope)?;
                let candidates: Vec<Value> = rows
                    .into_iter()
                    .map(|r| r.into_iter().next().unwrap_or(Value::Null))
                    .collect();
                Ok(self.membership(&val, &candidates, *negated))
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let val = self.eval(expr, scope)?;
                let low = self.eval(low, scope)?;
                let high = self.eval(high, scope)?;
                let above = val.sql_cmp(&low, self.ci()).map(|o| o != Ordering::Less);
                let below = val.sql_cmp(&high, self.ci()).map(|o| o != Ordering::Greater);
                let in_range = and3(above, below);
                Ok(bool3(in_range.map(|b| b != *negated)))
            }

            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let val = self.eval(expr, scope)?;
                let pattern = self.eval(pattern, scope)?;
                if val.is_null() || pattern.is_null() {
                    return Ok(Value::Null);
                }
                let matched = self.like_match_cached(&val.to_string(), &pattern.to_string());
                Ok(Value::Bool(matched != *negated))
            }

            Expr::IsNull { expr, negated } => {
                let is_null = self.eval(expr, scope)?.is_null();
                Ok(Value::Bool(is_null != *negated))
            }

            Expr::Exists { query, negated } => {
                let rows = self.run_subquery(query, scope)?;
                Ok(Value::Bool(rows.is_empty() == *negated))
            }

            Expr::Subquery(query) => {
                let rows = self.run_subquery(query, scope)?;
                if rows.len() > 1 {
                    return Err(SqlError::TypeError("Subquery returns more than 1 row".into()));
                }
                Ok(rows
                    .into_iter()
                    .next()
                    .and_then(|r| r.into_iter().next())
                    .unwrap_or(Value::Null))
            }

            Expr::JsonExtract {
                expr,
                path,
                unquote,
            } => {
                let doc = self.eval(expr, scope)?;
                let path = self.eval(path, scope)?;
                Ok(json_extract(&doc, &path, *unquote))
            }

            Expr::Cast { expr, col_type } => {
                let val = self.eval(expr, scope)?;
                if val.is_null() {
                    return Ok(Value::Null);
                }
                coerce(val, &ColumnDef::new("CAST", *col_type), self.dialect)
            }

            Expr::Interval { .. } => Err(SqlError::TypeError(
                "INTERVAL is only valid in date arithmetic".into(),
            )),

            // the executor computes window values before projection
            Expr::Window { function, .. } => Err(SqlError::InvalidArgument(format!(
                "You cannot use the window function '{}' in this context",
                function
            ))),
        }
    }

    fn ci(&self) -> bool {
        self.dialect.text_comparison_case_insensitive
    }

    fn run_subquery(&self, query: &Query, scope: &RowScope<'_>) -> Result<Vec<Row>> {
        match self.runner {
            Some(runner) => runner.run_subquery(query, scope),
            None => Err(SqlError::TypeError(
                "subqueries need an executor context".into(),
            )),
        }
    }

    /// `val IN (candidates)` under three-valued logic
    fn membership(&self, val: &Value, candidates: &[Value], negated: bool) -> Value {
        if val.is_null() {
            return Value::Null;
        }
        let mut saw_null = false;
        for candidate in candidates {
            match val.sql_eq(candidate, self.ci()) {
                Some(true) => return Value::Bool(!negated),
                None => saw_null = true,
                Some(false) => {}
            }
        }
        if saw_null {
            Value::Null
        } else {
            Value::Bool(negated)
        }
    }

    /// ⚡ LIKE with compiled-pattern cache; folding follows the dialect
    fn like_match_cached(&self, text: &str, pattern: &str) -> bool {
        let (text, pattern) = if self.dialect.like_case_insensitive {
            (text.to_lowercase(), pattern.to_lowercase())
        } else {
            (text.to_string(), pattern.to_string())
        };
        let mut cache = self.pattern_cache.lock();
        if let Some(compiled) = cache.get(&pattern) {
            return compiled.matches(&text);
        }
        let compiled = CompiledPattern::compile(&pattern);
        let matched = compiled.matches(&text);
        cache.put(pattern, compiled);
        matched
    }

    fn eval_binary(
        &self,
        left: &Expr,
        op: BinaryOperator,
        right: &Expr,
        scope: &RowScope<'_>,
    ) -> Result<Value> {
        match op {
            BinaryOperator::And => {
                let l = self.eval(left, scope)?.truthiness();
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(right, scope)?.truthiness();
                return Ok(bool3(and3(l, r)));
            }
            BinaryOperator::Or => {
                let l = self.eval(left, scope)?.truthiness();
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(right, scope)?.truthiness();
                return Ok(bool3(match (l, r) {
                    (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }));
            }
            _ => {}
        }

        // date +/- INTERVAL n UNIT
        if let Expr::Interval { value, unit } = right {
            if matches!(op, BinaryOperator::Add | BinaryOperator::Sub) {
                let base = self.eval(left, scope)?;
                let amount = self.eval(value, scope)?;
                let sign = if op == BinaryOperator::Sub { -1 } else { 1 };
                return date_add(&base, &amount, *unit, sign);
            }
        }

        let l = self.eval(left, scope)?;
        let r = self.eval(right, scope)?;
        self.apply_binary(op, l, r)
    }

    fn apply_binary(&self, op: BinaryOperator, l: Value, r: Value) -> Result<Value> {
        let ci = self.ci();
        let compare = |test: fn(Ordering) -> bool| bool3(l.sql_cmp(&r, ci).map(test));
        match op {
            BinaryOperator::Eq => Ok(compare(|o| o == Ordering::Equal)),
            BinaryOperator::Ne => Ok(compare(|o| o != Ordering::Equal)),
            BinaryOperator::Lt => Ok(compare(|o| o == Ordering::Less)),
            BinaryOperator::Gt => Ok(compare(|o| o == Ordering::Greater)),
            BinaryOperator::Le => Ok(compare(|o| o != Ordering::Greater)),
            BinaryOperator::Ge => Ok(compare(|o| o != Ordering::Less)),
            BinaryOperator::NullSafeEq => Ok(Value::Bool(match (l.is_null(), r.is_null()) {
                (true, true) => true,
                (true, false) | (false, true) => false,
                _ => l.sql_eq(&r, ci) == Some(true),
            })),
            BinaryOperator::Concat => {
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Text(format!("{}{}", l, r)))
            }
            BinaryOperator::Add
            | BinaryOperator::Sub
            | BinaryOperator::Mul
            | BinaryOperator::Div
            | BinaryOperator::Mod => self.arithmetic(op, l, r),
            BinaryOperator::And | BinaryOperator::Or => unreachable_logic(),
        }
    }

    fn arithmetic(&self, op: BinaryOperator, l: Value, r: Value) -> Result<Value> {
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }

        // Text + Text that is not numeric concatenates
        if op == BinaryOperator::Add {
            if let (Value::Text(a), Value::Text(b)) = (&l, &r) {
                if l.as_decimal().is_none() || r.as_decimal().is_none() {
                    return Ok(Value::Text(format!("{}{}", a, b)));
                }
            }
        }

        let numeric = |v: &Value| -> Result<Value> {
            match v {
                Value::Integer(_) | Value::Float(_) | Value::Decimal(_) => Ok(v.clone()),
                Value::Bool(b) => Ok(Value::Integer(*b as i64)),
                Value::Text(_) => v
                    .as_decimal()
                    .map(Value::Decimal)
                    .ok_or_else(|| SqlError::TypeError(format!("'{}' is not a number", v))),
                other => Err(SqlError::TypeError(format!(
                    "cannot apply {} to {}",
                    op.symbol(),
                    other.type_name()
                ))),
            }
        };
        let l = numeric(&l)?;
        let r = numeric(&r)?;

        let is_zero = match &r {
            Value::Integer(0) => true,
            Value::Float(f) => *f == 0.0,
            Value::Decimal(d) => d.is_zero(),
            _ => false,
        };
        if matches!(op, BinaryOperator::Div | BinaryOperator::Mod) && is_zero {
            if self.dialect.division_by_zero_is_null {
                return Ok(Value::Null);
            }
            return Err(SqlError::DivisionByZero);
        }

        match (&l, &r) {
            (Value::Integer(a), Value::Integer(b)) if op != BinaryOperator::Div => {
                let result = match op {
                    BinaryOperator::Add => a.checked_add(*b),
                    BinaryOperator::Sub => a.checked_sub(*b),
                    BinaryOperator::Mul => a.checked_mul(*b),
                    _ => a.checked_rem(*b),
                };
                match result {
                    Some(v) => Ok(Value::Integer(v)),
                    None => decimal_arith(op, Decimal::from(*a), Decimal::from(*b)),
                }
            }
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                let a = l.as_f64().unwrap_or(0.0);
                let b = r.as_f64().unwrap_or(0.0);
                Ok(Value::Float(match op {
                    BinaryOperator::Add => a + b,
                    BinaryOperator::Sub => a - b,
                    BinaryOperator::Mul => a * b,
                    BinaryOperator::Div => a / b,
                    _ => a % b,
                }))
            }
            _ => {
                let a = l.as_decimal().unwrap_or_default();
                let b = r.as_decimal().unwrap_or_default();
                decimal_arith(op, a, b)
            }
        }
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    fn eval_aggregate(
        &self,
        name: &str,
        args: &[Expr],
        distinct: bool,
        scope: &RowScope<'_>,
    ) -> Result<Value> {
        let rows = scope.group.ok_or(SqlError::InvalidGroupFunction)?;
        let upper = name.to_ascii_uppercase();

        if upper == "COUNT" && matches!(args.first(), Some(Expr::Wildcard) | None) {
            return Ok(Value::Integer(rows.len() as i64));
        }
        let arg = args
            .first()
            .ok_or_else(|| SqlError::InvalidArgument(format!("{}() needs an argument", upper)))?;

        // Collect non-null argument values across the group
        let mut values = Vec::with_capacity(rows.len());
        let mut seen = AHashSet::new();
        for row in rows {
            let row_scope = RowScope {
                columns: scope.columns,
                values: row,
                outer: scope.outer,
                group: None,
                aliases: &[],
            };
            let v = self.eval(arg, &row_scope)?;
            if v.is_null() {
                continue;
            }
            if distinct && !seen.insert(v.key_fragment(self.ci())) {
                continue;
            }
            values.push(v);
        }

        match upper.as_str() {
            "COUNT" => Ok(Value::Integer(values.len() as i64)),
            "SUM" => sum_values(&values),
            "AVG" => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let count = values.len();
                match sum_values(&values)? {
                    Value::Float(f) => Ok(Value::Float(f / count as f64)),
                    other => {
                        let total = other.as_decimal().unwrap_or_default();
                        Ok(Value::Decimal(
                            (total / Decimal::from(count as i64)).round_dp(4),
                        ))
                    }
                }
            }
            "MIN" | "MAX" => {
                let want = if upper == "MIN" {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<Value> = None;
                for v in values {
                    best = match best {
                        Some(b) if v.sql_cmp(&b, self.ci()) != Some(want) => Some(b),
                        _ => Some(v),
                    };
                }
                Ok(best.unwrap_or(Value::Null))
            }
            "GROUP_CONCAT" | "STRING_AGG" | "LISTAGG" => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let separator = match args.get(1) {
                    Some(sep) => self.eval(sep, &RowScope::empty())?.to_string(),
                    None => ",".to_string(),
                };
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                Ok(Value::Text(parts.join(&separator)))
            }
            other => Err(SqlError::InvalidArgument(format!(
                "unknown aggregate {}",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Scalar functions
    // ------------------------------------------------------------------

    fn eval_function(&self, name: &str, args: &[Expr], scope: &RowScope<'_>) -> Result<Value> {
        let upper = name.to_ascii_uppercase();

        // Lazily evaluated forms first
        match upper.as_str() {
            "COALESCE" | "IFNULL" | "NVL" | "VALUE" => return self.coalesce(args, scope),
            "ISNULL" if args.len() == 2 => return self.coalesce(args, scope),
            "IF" | "IIF" => {
                self.expect_args(&upper, args, 3)?;
                return if self.eval_predicate(&args[0], scope)? {
                    self.eval(&args[1], scope)
                } else {
                    self.eval(&args[2], scope)
                };
            }
            "TIMESTAMPADD" | "DATEADD" => {
                self.expect_args(&upper, args, 3)?;
                let unit = self.unit_argument(&args[0], scope)?;
                let amount = self.eval(&args[1], scope)?;
                let base = self.eval(&args[2], scope)?;
                return date_add(&base, &amount, unit, 1);
            }
            "DATE_ADD" | "DATE_SUB" | "ADDDATE" => {
                self.expect_args(&upper, args, 2)?;
                let sign = if upper == "DATE_SUB" { -1 } else { 1 };
                let base = self.eval(&args[0], scope)?;
                return match &args[1] {
                    Expr::Interval { value, unit } => {
                        let amount = self.eval(value, scope)?;
                        date_add(&base, &amount, *unit, sign)
                    }
                    days => {
                        let amount = self.eval(days, scope)?;
                        date_add(&base, &amount, IntervalUnit::Day, sign)
                    }
                };
            }
            _ => {}
        }

        let values = args
            .iter()
            .map(|a| self.eval(a, scope))
            .collect::<Result<Vec<_>>>()?;

        match upper.as_str() {
            "ISNULL" => {
                self.expect_args(&upper, args, 1)?;
                Ok(Value::Bool(values[0].is_null()))
            }
            "NULLIF" => {
                self.expect_args(&upper, args, 2)?;
                if values[0].sql_eq(&values[1], self.ci()) == Some(true) {
                    Ok(Value::Null)
                } else {
                    Ok(values[0].clone())
                }
            }
            "CONCAT" => {
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                Ok(Value::Text(values.iter().map(|v| v.to_string()).collect()))
            }
            "CONCAT_WS" => {
                let (sep, rest) = values
                    .split_first()
                    .ok_or_else(|| SqlError::ArgumentCount(upper.clone()))?;
                if sep.is_null() {
                    return Ok(Value::Null);
                }
                let parts: Vec<String> = rest
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string())
                    .collect();
                Ok(Value::Text(parts.join(&sep.to_string())))
            }
            "UPPER" | "UCASE" => self.map_text(&upper, &values, |s| s.to_uppercase()),
            "LOWER" | "LCASE" => self.map_text(&upper, &values, |s| s.to_lowercase()),
            "TRIM" => self.map_text(&upper, &values, |s| s.trim().to_string()),
            "LTRIM" => self.map_text(&upper, &values, |s| s.trim_start().to_string()),
            "RTRIM" => self.map_text(&upper, &values, |s| s.trim_end().to_string()),
            "LENGTH" | "LEN" | "CHAR_LENGTH" | "CHARACTER_LENGTH" => {
                self.expect_args(&upper, args, 1)?;
                Ok(match &values[0] {
                    Value::Null => Value::Null,
                    v => Value::Integer(v.to_string().chars().count() as i64),
                })
            }
            "SUBSTRING" | "SUBSTR" => {
                if values.len() < 2 || values.len() > 3 {
                    return Err(SqlError::ArgumentCount(upper));
                }
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let chars: Vec<char> = values[0].to_string().chars().collect();
                let pos = values[1].as_i64().unwrap_or(1);
                let start = if pos > 0 {
                    (pos - 1) as usize
                } else if pos < 0 {
                    chars.len().saturating_sub(pos.unsigned_abs() as usize)
                } else {
                    chars.len()
                };
                let len = match values.get(2) {
                    Some(l) => l.as_i64().unwrap_or(0).max(0) as usize,
                    None => chars.len(),
                };
                Ok(Value::Text(chars.iter().skip(start).take(len).collect()))
            }
            "LEFT" | "RIGHT" => {
                self.expect_args(&upper, args, 2)?;
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let chars: Vec<char> = values[0].to_string().chars().collect();
                let n = (values[1].as_i64().unwrap_or(0).max(0) as usize).min(chars.len());
                let slice = if upper == "LEFT" {
                    &chars[..n]
                } else {
                    &chars[chars.len() - n..]
                };
                Ok(Value::Text(slice.iter().collect()))
            }
            "REPLACE" => {
                self.expect_args(&upper, args, 3)?;
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                Ok(Value::Text(
                    values[0]
                        .to_string()
                        .replace(&values[1].to_string(), &values[2].to_string()),
                ))
            }
            "ABS" => {
                self.expect_args(&upper, args, 1)?;
                match &values[0] {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(i) => Ok(i
                        .checked_abs()
                        .map(Value::Integer)
                        .unwrap_or_else(|| Value::Decimal(Decimal::from(*i).abs()))),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Ok(Value::Decimal(self.decimal_arg(&upper, other)?.abs())),
                }
            }
            "ROUND" => {
                if values.is_empty() || values.len() > 2 {
                    return Err(SqlError::ArgumentCount(upper));
                }
                let digits = values.get(1).and_then(Value::as_i64).unwrap_or(0);
                match &values[0] {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(i) if digits >= 0 => Ok(Value::Integer(*i)),
                    Value::Float(f) => {
                        let factor = 10f64.powi(digits as i32);
                        Ok(Value::Float((f * factor).round() / factor))
                    }
                    other => {
                        let d = self.decimal_arg(&upper, other)?;
                        let rounded = round_decimal(d, digits);
                        Ok(if digits <= 0 {
                            rounded.to_i64().map(Value::Integer).unwrap_or(Value::Decimal(rounded))
                        } else {
                            Value::Decimal(rounded)
                        })
                    }
                }
            }
            "FLOOR" | "CEIL" | "CEILING" => {
                self.expect_args(&upper, args, 1)?;
                match &values[0] {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(i) => Ok(Value::Integer(*i)),
                    other => {
                        let d = self.decimal_arg(&upper, other)?;
                        let r = if upper == "FLOOR" { d.floor() } else { d.ceil() };
                        Ok(r.to_i64().map(Value::Integer).unwrap_or(Value::Decimal(r)))
                    }
                }
            }
            "MOD" => {
                self.expect_args(&upper, args, 2)?;
                self.arithmetic(BinaryOperator::Mod, values[0].clone(), values[1].clone())
            }
            "GREATEST" | "LEAST" => {
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let want = if upper == "GREATEST" {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
                Ok(values
                    .into_iter()
                    .reduce(|best, v| {
                        if v.sql_cmp(&best, self.ci()) == Some(want) {
                            v
                        } else {
                            best
                        }
                    })
                    .unwrap_or(Value::Null))
            }
            "NOW" | "CURRENT_TIMESTAMP" | "GETDATE" | "SYSDATE" | "LOCALTIMESTAMP" => {
                Ok(Value::DateTime(now()))
            }
            "CURRENT_DATE" | "CURDATE" => Ok(Value::DateTime(
                now().date().and_hms_opt(0, 0, 0).unwrap_or_else(now),
            )),
            "FIND_IN_SET" => {
                self.expect_args(&upper, args, 2)?;
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                Ok(Value::Integer(csv_position(
                    &values[0].to_string(),
                    &values[1],
                    self.dialect,
                )))
            }
            "JSON_EXTRACT" | "JSON_VALUE" => {
                self.expect_args(&upper, args, 2)?;
                Ok(json_extract(&values[0], &values[1], upper == "JSON_VALUE"))
            }
            "RAND" | "RANDOM" => Ok(Value::Float(rand::random::<f64>())),
            "UUID" | "NEWID" | "GEN_RANDOM_UUID" | "SYS_GUID" => {
                Ok(Value::Guid(uuid::Uuid::new_v4()))
            }
            _ => Err(SqlError::not_found("FUNCTION", name)),
        }
    }

    fn coalesce(&self, args: &[Expr], scope: &RowScope<'_>) -> Result<Value> {
        for arg in args {
            let v = self.eval(arg, scope)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        Ok(Value::Null)
    }

    fn expect_args(&self, name: &str, args: &[Expr], count: usize) -> Result<()> {
        if args.len() != count {
            return Err(SqlError::ArgumentCount(name.to_string()));
        }
        Ok(())
    }

    fn map_text(&self, name: &str, values: &[Value], f: impl Fn(&str) -> String) -> Result<Value> {
        if values.len() != 1 {
            return Err(SqlError::ArgumentCount(name.to_string()));
        }
        Ok(match &values[0] {
            Value::Null => Value::Null,
            v => Value::Text(f(&v.to_string())),
        })
    }

    fn decimal_arg(&self, name: &str, v: &Value) -> Result<Decimal> {
        v.as_decimal()
            .ok_or_else(|| SqlError::TypeError(format!("{}() expects a number, got '{}'", name, v)))
    }

    /// Unit argument of TIMESTAMPADD / DATEADD: a bare word or a string
    fn unit_argument(&self, arg: &Expr, scope: &RowScope<'_>) -> Result<IntervalUnit> {
        let word = match arg {
            Expr::Column { table: None, name } => name.clone(),
            other => self.eval(other, scope)?.to_string(),
        };
        IntervalUnit::parse(&word)
            .ok_or_else(|| SqlError::InvalidArgument(format!("unknown date unit '{}'", word)))
    }
}

fn unreachable_logic() -> Result<Value> {
    Err(SqlError::TypeError("logical operator evaluated as a value operator".into()))
}

fn bool3(v: Option<bool>) -> Value {
    match v {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

fn and3(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn negate(v: Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => Ok(i
            .checked_neg()
            .map(Value::Integer)
            .unwrap_or_else(|| Value::Decimal(-Decimal::from(i)))),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Decimal(d) => Ok(Value::Decimal(-d)),
        other => match other.as_decimal() {
            Some(d) => Ok(Value::Decimal(-d)),
            None => Err(SqlError::TypeError(format!("cannot negate '{}'", other))),
        },
    }
}

fn decimal_arith(op: BinaryOperator, a: Decimal, b: Decimal) -> Result<Value> {
    let result = match op {
        BinaryOperator::Add => a.checked_add(b),
        BinaryOperator::Sub => a.checked_sub(b),
        BinaryOperator::Mul => a.checked_mul(b),
        BinaryOperator::Div => a.checked_div(b),
        _ => a.checked_rem(b),
    };
    match result {
        Some(d) => Ok(Value::Decimal(d.normalize())),
        None => {
            let (x, y) = (a.to_f64().unwrap_or(0.0), b.to_f64().unwrap_or(0.0));
            let f = match op {
                BinaryOperator::Add => x + y,
                BinaryOperator::Sub => x - y,
                BinaryOperator::Mul => x * y,
                BinaryOperator::Div => x / y,
                _ => x % y,
            };
            Ok(Value::Float(f))
        }
    }
}

fn sum_values(values: &[Value]) -> Result<Value> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if values.iter().any(|v| matches!(v, Value::Float(_))) {
        return Ok(Value::Float(values.iter().filter_map(Value::as_f64).sum()));
    }
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        let mut total: i64 = 0;
        let mut overflow = false;
        for v in values {
            if let Value::Integer(i) = v {
                match total.checked_add(*i) {
                    Some(t) => total = t,
                    None => {
                        overflow = true;
                        break;
                    }
                }
            }
        }
        if !overflow {
            return Ok(Value::Integer(total));
        }
    }
    let mut total = Decimal::ZERO;
    for v in values {
        let d = v
            .as_decimal()
            .ok_or_else(|| SqlError::TypeError(format!("cannot sum '{}'", v)))?;
        total = total
            .checked_add(d)
            .ok_or_else(|| SqlError::TypeError("SUM overflow".into()))?;
    }
    Ok(Value::Decimal(total))
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Shift a date/time value by `amount` units; null in, null out
pub(crate) fn date_add(base: &Value, amount: &Value, unit: IntervalUnit, sign: i64) -> Result<Value> {
    if base.is_null() || amount.is_null() {
        return Ok(Value::Null);
    }
    let dt = match base {
        Value::DateTime(dt) => *dt,
        Value::Text(s) => crate::types::parse_datetime(s)
            .ok_or_else(|| SqlError::TypeError(format!("'{}' is not a date", s)))?,
        other => {
            return Err(SqlError::TypeError(format!(
                "'{}' is not a date",
                other
            )))
        }
    };
    let n = amount
        .as_i64()
        .ok_or_else(|| SqlError::TypeError(format!("'{}' is not an integer", amount)))?
        * sign;

    let shifted = match unit {
        IntervalUnit::Month | IntervalUnit::Year => {
            let months = if unit == IntervalUnit::Year { n * 12 } else { n };
            let magnitude = Months::new(months.unsigned_abs().min(u32::MAX as u64) as u32);
            if months >= 0 {
                dt.checked_add_months(magnitude)
            } else {
                dt.checked_sub_months(magnitude)
            }
        }
        _ => {
            let seconds_per = match unit {
                IntervalUnit::Second => 1,
                IntervalUnit::Minute => 60,
                IntervalUnit::Hour => 3_600,
                IntervalUnit::Day => 86_400,
                _ => 7 * 86_400,
            };
            n.checked_mul(seconds_per)
                .and_then(chrono::Duration::try_seconds)
                .and_then(|d| dt.checked_add_signed(d))
        }
    };
    shifted
        .map(Value::DateTime)
        .ok_or_else(|| SqlError::TypeError("date arithmetic out of range".into()))
}

/// 1-based position of `needle` in a comma-separated list, 0 when absent
fn csv_position(needle: &str, haystack: &Value, dialect: &Dialect) -> i64 {
    let members: Vec<String> = match haystack {
        Value::Set(members) => members.clone(),
        other => other.to_string().split(',').map(str::to_string).collect(),
    };
    members
        .iter()
        .position(|m| dialect.fold(m.trim()) == dialect.fold(needle.trim()))
        .map_or(0, |p| p as i64 + 1)
}

/// Best-effort JSON path extraction (`$.a.b[0]`, or a bare key/index);
/// null when the source is null, unparsable or the path is absent.
pub(crate) fn json_extract(doc: &Value, path: &Value, unquote: bool) -> Value {
    let root = match doc {
        Value::Json(j) => j.clone(),
        Value::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(j) => j,
            Err(_) => return Value::Null,
        },
        _ => return Value::Null,
    };

    let mut current = &root;
    let path_text = path.to_string();
    let segments = match path {
        Value::Integer(i) => vec![PathStep::Index(*i as usize)],
        _ => match parse_json_path(&path_text) {
            Some(s) => s,
            None => return Value::Null,
        },
    };
    for step in &segments {
        let next = match step {
            PathStep::Key(k) => current.get(k.as_str()),
            PathStep::Index(i) => current.get(*i),
        };
        match next {
            Some(n) => current = n,
            None => return Value::Null,
        }
    }

    match current {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::String(s) if unquote => Value::Text(s.clone()),
        serde_json::Value::Bool(b) if unquote => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n
                .as_f64()
                .and_then(Decimal::from_f64)
                .map(Value::Decimal)
                .unwrap_or(Value::Null),
        },
        other if unquote => Value::Text(other.to_string()),
        other => Value::Json(other.clone()),
    }
}

enum PathStep {
    Key(String),
    Index(usize),
}

fn parse_json_path(path: &str) -> Option<Vec<PathStep>> {
    let path = path.trim();
    let Some(rest) = path.strip_prefix('$') else {
        // Bare key or array index (PostgreSQL style `doc -> 'key'`)
        return Some(vec![match path.parse::<usize>() {
            Ok(i) => PathStep::Index(i),
            Err(_) => PathStep::Key(path.to_string()),
        }]);
    };

    let mut steps = Vec::new();
    let chars: Vec<char> = rest.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let mut key = String::new();
                if chars.get(i) == Some(&'"') {
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        key.push(chars[i]);
                        i += 1;
                    }
                    i += 1;
                } else {
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        key.push(chars[i]);
                        i += 1;
                    }
                }
                steps.push(PathStep::Key(key));
            }
            '[' => {
                i += 1;
                let mut digits = String::new();
                while i < chars.len() && chars[i] != ']' {
                    digits.push(chars[i]);
                    i += 1;
                }
                i += 1;
                steps.push(PathStep::Index(digits.trim().parse().ok()?));
            }
            _ => return None,
        }
    }
    Some(steps)
}

/// Round half away from zero; negative `digits` round left of the point
fn round_decimal(d: Decimal, digits: i64) -> Decimal {
    if digits >= 0 {
        let dp = digits.min(28) as u32;
        return d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    }
    let factor = Decimal::from_i128_with_scale(10i128.pow((-digits).min(28) as u32), 0);
    let units = (d / factor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    // the next multiple up may not fit; the largest representable one does
    units.checked_mul(factor).unwrap_or_else(|| (units - units.signum()) * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::sql::lexer::Lexer;
    use crate::sql::parser::Parser;
    use crate::sql::ast::{SelectColumn, Statement};

    fn expr(sql: &str, dialect: &Dialect) -> Expr {
        let tokens = Lexer::new(&format!("SELECT {}", sql), dialect).tokenize().unwrap();
        match Parser::new(tokens, dialect).parse().unwrap() {
            Statement::Select(s) => match s.columns.into_iter().next().unwrap() {
                SelectColumn::Expr(e, _) => e,
                other => panic!("unexpected column {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    fn eval_with(sql: &str, dialect: &Dialect) -> Result<Value> {
        let params = Parameters::new().add("@id", 2i64).add("@ids", Value::List(vec![
            Value::Integer(1),
            Value::Integer(3),
        ]));
        let columns = vec![
            ColumnBinding::new(Some("users"), "id"),
            ColumnBinding::new(Some("users"), "email"),
        ];
        let values = vec![Value::Integer(2), Value::Null];
        let scope = RowScope::new(&columns, &values);
        ExprEvaluator::new(dialect, &params).eval(&expr(sql, dialect), &scope)
    }

    fn eval(sql: &str) -> Value {
        eval_with(sql, &Dialect::latest(DialectKind::MySql)).unwrap()
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(eval("email = 'x'"), Value::Null);
        assert_eq!(eval("email = 'x' OR id = 2"), Value::Bool(true));
        assert_eq!(eval("email = 'x' AND id = 3"), Value::Bool(false));
        assert_eq!(eval("NOT (email = 'x')"), Value::Null);
        assert_eq!(eval("email IS NULL"), Value::Bool(true));
        assert_eq!(eval("email <=> NULL"), Value::Bool(true));
    }

    #[test]
    fn test_in_with_nulls_and_list_parameter() {
        assert_eq!(eval("id IN (1, 2)"), Value::Bool(true));
        assert_eq!(eval("id IN (1, NULL)"), Value::Null);
        assert_eq!(eval("id NOT IN (1, 3)"), Value::Bool(true));
        assert_eq!(eval("id IN @ids"), Value::Bool(false));
        assert_eq!(eval("users.id = @id"), Value::Bool(true));
    }

    #[test]
    fn test_unknown_column_and_parameter() {
        let mysql = Dialect::latest(DialectKind::MySql);
        assert!(matches!(
            eval_with("nope + 1", &mysql),
            Err(SqlError::UnknownColumn { .. })
        ));
        assert!(matches!(
            eval_with("@missing", &mysql),
            Err(SqlError::ParameterNotFound(_))
        ));
    }

    #[test]
    fn test_division_by_zero_per_dialect() {
        assert_eq!(eval("id / 0"), Value::Null);
        let pg = Dialect::latest(DialectKind::PostgreSql);
        assert!(matches!(eval_with("id / 0", &pg), Err(SqlError::DivisionByZero)));
    }

    #[test]
    fn test_scalar_functions() {
        assert_eq!(eval("COALESCE(email, 'none')"), Value::from("none"));
        assert_eq!(eval("IFNULL(email, 'n/a')"), Value::from("n/a"));
        assert_eq!(eval("CONCAT('a', id)"), Value::from("a2"));
        assert_eq!(eval("UPPER('abc')"), Value::from("ABC"));
        assert_eq!(eval("SUBSTRING('hello', 2, 3)"), Value::from("ell"));
        assert_eq!(eval("IF(id > 1, 'big', 'small')"), Value::from("big"));
        assert_eq!(eval("CASE WHEN id = 2 THEN 'two' ELSE 'other' END"), Value::from("two"));
        assert_eq!(eval("FIND_IN_SET('b', 'a,b,c')"), Value::Integer(2));
        assert_eq!(eval("ROUND(2.345, 2)"), Value::Decimal(Decimal::new(235, 2)));
        assert_eq!(eval("LENGTH('héllo')"), Value::Integer(5));
    }

    #[test]
    fn test_numeric_edges() {
        assert_eq!(
            eval("ABS(-9223372036854775807 - 1)"),
            Value::Decimal(Decimal::from(i64::MAX) + Decimal::ONE)
        );
        assert_eq!(eval("ABS(-5)"), Value::Integer(5));
        assert_eq!(eval("ROUND(1234, -2)"), Value::Integer(1200));
        assert_eq!(eval("ROUND(1250, -2)"), Value::Integer(1300));
        assert_eq!(eval("ROUND(-1250, -2)"), Value::Integer(-1300));
        assert_eq!(eval("ROUND(1234.5, -2)"), Value::Integer(1200));
        assert_eq!(eval("ROUND(1234, -5)"), Value::Integer(0));

        let err = eval_with("CAST(1e30 AS INT)", &Dialect::latest(DialectKind::MySql)).unwrap_err();
        assert_eq!(err.code(), 1264);
        assert_eq!(eval("CAST(12.6 AS INT)"), Value::Integer(13));
    }

    #[test]
    fn test_json_extract_is_best_effort() {
        assert_eq!(
            eval(r#"JSON_EXTRACT('{"a": {"b": [10, 20]}}', '$.a.b[1]')"#),
            Value::Integer(20)
        );
        assert_eq!(eval(r#"JSON_EXTRACT('{"a": 1}', '$.missing')"#), Value::Null);
        assert_eq!(eval("JSON_EXTRACT(email, '$.a')"), Value::Null);
        assert_eq!(eval("JSON_EXTRACT('not json', '$.a')"), Value::Null);
        assert_eq!(eval(r#"'{"n": "x"}' ->> '$.n'"#), Value::from("x"));
    }

    #[test]
    fn test_date_add() {
        let v = eval("DATE_ADD('2024-01-31', INTERVAL 1 MONTH)");
        assert_eq!(v, Value::DateTime(crate::types::parse_datetime("2024-02-29").unwrap()));
        let v = eval("TIMESTAMPADD(DAY, 2, '2024-01-01')");
        assert_eq!(v, Value::DateTime(crate::types::parse_datetime("2024-01-03").unwrap()));
    }

    #[test]
    fn test_aggregate_outside_group_is_rejected() {
        assert!(matches!(
            eval_with("COUNT(*)", &Dialect::latest(DialectKind::MySql)),
            Err(SqlError::InvalidGroupFunction)
        ));
    }

    #[test]
    fn test_aggregates_over_group() {
        let mysql = Dialect::latest(DialectKind::MySql);
        let params = Parameters::new();
        let columns = vec![ColumnBinding::new(None, "v")];
        let rows: Vec<Row> = vec![
            vec![Value::Integer(1)],
            vec![Value::Null],
            vec![Value::Integer(3)],
            vec![Value::Integer(3)],
        ];
        let scope = RowScope::new(&columns, &rows[0]).with_group(&rows);
        let ev = ExprEvaluator::new(&mysql, &params);
        assert_eq!(ev.eval(&expr("COUNT(*)", &mysql), &scope).unwrap(), Value::Integer(4));
        assert_eq!(ev.eval(&expr("COUNT(v)", &mysql), &scope).unwrap(), Value::Integer(3));
        assert_eq!(
            ev.eval(&expr("COUNT(DISTINCT v)", &mysql), &scope).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(ev.eval(&expr("SUM(v)", &mysql), &scope).unwrap(), Value::Integer(7));
        assert_eq!(ev.eval(&expr("MAX(v)", &mysql), &scope).unwrap(), Value::Integer(3));
        assert_eq!(
            ev.eval(&expr("GROUP_CONCAT(v)", &mysql), &scope).unwrap(),
            Value::from("1,3,3")
        );
    }
}
