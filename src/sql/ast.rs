/// Abstract Syntax Tree for SQL statements
use crate::types::{ColumnDef, ColumnType, ForeignKeyDef, IndexDef, Value};
use std::fmt;

/// Top-level SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Union(UnionStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Merge(MergeStmt),
    CreateTable(CreateTableStmt),
    /// CREATE [TEMPORARY] TABLE name AS SELECT ...
    CreateTableAs(CreateTableAsStmt),
    CreateIndex(CreateIndexStmt),
    CreateView(CreateViewStmt),
    DropTable { name: String, if_exists: bool },
    DropView { name: String, if_exists: bool },
    Call(CallStmt),
    Begin,
    Commit,
    /// ROLLBACK, or ROLLBACK TO [SAVEPOINT] name
    Rollback { savepoint: Option<String> },
    Savepoint(String),
    ReleaseSavepoint(String),
}

impl Statement {
    /// Row-producing statements as a `Query`
    pub fn into_query(self) -> Option<Query> {
        match self {
            Statement::Select(s) => Some(Query::Select(Box::new(s))),
            Statement::Union(u) => Some(Query::Union(Box::new(u))),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Union(_) => "UNION",
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::Merge(_) => "MERGE",
            Statement::CreateTable(_) | Statement::CreateTableAs(_) => "CREATE TABLE",
            Statement::CreateIndex(_) => "CREATE INDEX",
            Statement::CreateView(_) => "CREATE VIEW",
            Statement::DropTable { .. } => "DROP TABLE",
            Statement::DropView { .. } => "DROP VIEW",
            Statement::Call(_) => "CALL",
            Statement::Begin => "BEGIN",
            Statement::Commit => "COMMIT",
            Statement::Rollback { .. } => "ROLLBACK",
            Statement::Savepoint(_) => "SAVEPOINT",
            Statement::ReleaseSavepoint(_) => "RELEASE SAVEPOINT",
        }
    }
}

/// A row-producing statement: plain SELECT or a UNION chain
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<SelectStmt>),
    Union(Box<UnionStmt>),
}

impl Query {
    pub fn ctes(&self) -> &[Cte] {
        match self {
            Query::Select(s) => &s.ctes,
            Query::Union(u) => &u.ctes,
        }
    }
}

/// Common table expression: name [(columns)] AS (query)
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub columns: Vec<String>,
    pub query: Query,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStmt {
    pub ctes: Vec<Cte>,
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    /// `None` for SELECT without FROM (or FROM DUAL)
    pub from: Option<TableRef>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<LimitClause>,
}

/// UNION / UNION ALL chain
#[derive(Debug, Clone, PartialEq)]
pub struct UnionStmt {
    pub ctes: Vec<Cte>,
    pub parts: Vec<SelectStmt>,
    /// `all_flags[i]` is true when parts i and i+1 are combined with UNION ALL
    pub all_flags: Vec<bool>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<LimitClause>,
}

/// Parts of a UNION chain as returned by `parse_union_chain`
#[derive(Debug, Clone, PartialEq)]
pub struct UnionChain {
    pub parts: Vec<SelectStmt>,
    pub all_flags: Vec<bool>,
}

/// Table reference in FROM clause (supports JOINs and subqueries)
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// Single table, view or CTE: name [AS alias] [index hints]
    Table {
        name: String,
        alias: Option<String>,
        hints: Vec<IndexHint>,
    },
    /// JOIN: left JOIN_TYPE right [ON condition]
    Join {
        left: Box<TableRef>,
        right: Box<TableRef>,
        join_type: JoinType,
        on: Option<Expr>,
    },
    /// Subquery in FROM: (SELECT ...) AS alias
    Subquery { query: Box<Query>, alias: String },
}

impl TableRef {
    pub fn describe(&self) -> String {
        match self {
            TableRef::Table { name, alias: Some(a), .. } => format!("{} AS {}", name, a),
            TableRef::Table { name, .. } => name.clone(),
            TableRef::Join { left, .. } => left.describe(),
            TableRef::Subquery { alias, .. } => format!("(subquery) AS {}", alias),
        }
    }
}

/// JOIN types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn name(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
            JoinType::Cross => "CROSS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    Use,
    Force,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintScope {
    All,
    Join,
    OrderBy,
    GroupBy,
}

/// `USE|FORCE|IGNORE INDEX [FOR JOIN|ORDER BY|GROUP BY] (names)`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHint {
    pub kind: HintKind,
    pub scope: HintScope,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Star,                       // *
    QualifiedStar(String),      // table.*
    Expr(Expr, Option<String>), // expression [AS alias]
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub asc: bool, // true = ASC, false = DESC
    /// Explicit NULLS FIRST (true) / NULLS LAST (false)
    pub nulls_first: Option<bool>,
}

/// Syntactic form a row limit was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitForm {
    /// LIMIT n [OFFSET m]
    Limit,
    /// LIMIT m, n
    LimitComma,
    /// OFFSET m ROWS [FETCH NEXT n ROWS ONLY]
    OffsetFetch,
    /// FETCH FIRST n ROWS ONLY
    FetchFirst,
    /// TOP n
    Top,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitClause {
    pub count: Option<Expr>,
    pub offset: Option<Expr>,
    pub form: LimitForm,
}

impl fmt::Display for LimitClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .count
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "ALL".to_string());
        let offset = self
            .offset
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "0".to_string());
        match self.form {
            LimitForm::Limit | LimitForm::LimitComma => {
                write!(f, "LIMIT {} OFFSET {}", count, offset)
            }
            LimitForm::OffsetFetch | LimitForm::FetchFirst => {
                write!(f, "FETCH {} OFFSET {}", count, offset)
            }
            LimitForm::Top => write!(f, "TOP {}", count),
        }
    }
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Option<Vec<String>>, // None means all columns
    pub source: InsertSource,
    /// What to do with a row that hits a unique key
    pub on_conflict: Option<OnConflict>,
}

/// `ON DUPLICATE KEY UPDATE ...` or `ON CONFLICT [(cols)] DO ...`
#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    /// Conflict target columns; empty means any unique key
    pub columns: Vec<String>,
    /// Name the proposed row goes by in the update (`excluded`, or the
    /// MySQL `VALUES (...) AS new` row alias)
    pub row_alias: String,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// Skip the proposed row
    Nothing,
    /// Update the existing row; a false `filter` leaves it untouched
    Update {
        assignments: Vec<(String, Expr)>,
        filter: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(Box<Query>),
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: String,
    pub alias: Option<String>,
    /// Sources joined onto the target (`UPDATE t JOIN s ...`, `UPDATE ... FROM s`)
    pub joins: Vec<DmlJoin>,
    pub assignments: Vec<(String, Expr)>, // column = expr
    pub where_clause: Option<Expr>,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: String,
    pub alias: Option<String>,
    /// Sources joined onto the target (`DELETE t FROM t JOIN s ...`, `USING s`)
    pub joins: Vec<DmlJoin>,
    pub where_clause: Option<Expr>,
}

/// One row source joined onto the target table of an UPDATE or DELETE
#[derive(Debug, Clone, PartialEq)]
pub struct DmlJoin {
    pub source: TableRef,
    pub join_type: JoinType,
    pub on: Option<Expr>,
}

/// MERGE INTO target USING source ON condition WHEN ...
#[derive(Debug, Clone, PartialEq)]
pub struct MergeStmt {
    pub target: String,
    pub alias: Option<String>,
    pub source: TableRef,
    pub on: Expr,
    /// Tried in order; the first whose kind and condition fit a row applies
    pub clauses: Vec<MergeClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub matched: bool,
    pub condition: Option<Expr>,
    pub action: MergeAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeAction {
    Update(Vec<(String, Expr)>),
    Delete,
    Insert {
        columns: Option<Vec<String>>,
        values: Vec<Expr>,
    },
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub name: String,
    pub if_not_exists: bool,
    pub temporary: bool,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    /// UNIQUE constraints and KEY/INDEX entries declared inline
    pub indexes: Vec<IndexDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableAsStmt {
    pub name: String,
    pub temporary: bool,
    pub if_not_exists: bool,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateViewStmt {
    pub name: String,
    pub or_replace: bool,
    pub if_not_exists: bool,
    pub columns: Vec<String>,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStmt {
    pub name: String,
    pub args: Vec<Expr>,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference, optionally qualified: [table.]name
    Column { table: Option<String>, name: String },
    Literal(Value),
    /// Bound parameter reference as written (`@id`, `:id`, `?1`)
    Parameter(String),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOperator, expr: Box<Expr> },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// `*` inside COUNT(*)
    Wildcard,
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        query: Box<Query>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull { expr: Box<Expr>, negated: bool },
    Exists { query: Box<Query>, negated: bool },
    /// Scalar subquery
    Subquery(Box<Query>),
    /// `expr -> path` (JSON) or `expr ->> path` (unquoted text)
    JsonExtract {
        expr: Box<Expr>,
        path: Box<Expr>,
        unquote: bool,
    },
    Cast { expr: Box<Expr>, col_type: ColumnType },
    /// INTERVAL n UNIT (only meaningful as a DATE_ADD argument)
    Interval { value: Box<Expr>, unit: IntervalUnit },
    /// `function OVER (PARTITION BY ... ORDER BY ... [frame])`; `function`
    /// is a `FunctionCall`
    Window {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderByExpr>,
        frame: Option<WindowFrame>,
    },
}

/// `ROWS|RANGE BETWEEN start AND end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFrame {
    /// RANGE frames move by peer groups instead of single rows
    pub range: bool,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

impl fmt::Display for FrameBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameBound::UnboundedPreceding => write!(f, "UNBOUNDED PRECEDING"),
            FrameBound::Preceding(n) => write!(f, "{} PRECEDING", n),
            FrameBound::CurrentRow => write!(f, "CURRENT ROW"),
            FrameBound::Following(n) => write!(f, "{} FOLLOWING", n),
            FrameBound::UnboundedFollowing => write!(f, "UNBOUNDED FOLLOWING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    NullSafeEq,

    // Logical
    And,
    Or,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    /// `||` in dialects where pipes concatenate
    Concat,
}

impl BinaryOperator {
    /// Binding power for the Pratt parser
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And => 2,
            BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Lt
            | BinaryOperator::Gt
            | BinaryOperator::Le
            | BinaryOperator::Ge
            | BinaryOperator::NullSafeEq => 3,
            BinaryOperator::Add | BinaryOperator::Sub | BinaryOperator::Concat => 4,
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 5,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
            BinaryOperator::Le => "<=",
            BinaryOperator::Ge => ">=",
            BinaryOperator::NullSafeEq => "<=>",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().trim_end_matches('S') {
            "SECOND" | "SS" => Some(IntervalUnit::Second),
            "MINUTE" | "MI" => Some(IntervalUnit::Minute),
            "HOUR" | "HH" => Some(IntervalUnit::Hour),
            "DAY" | "DD" | "D" => Some(IntervalUnit::Day),
            "WEEK" | "WK" => Some(IntervalUnit::Week),
            "MONTH" | "MM" => Some(IntervalUnit::Month),
            "YEAR" | "YY" | "YYYY" => Some(IntervalUnit::Year),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IntervalUnit::Second => "SECOND",
            IntervalUnit::Minute => "MINUTE",
            IntervalUnit::Hour => "HOUR",
            IntervalUnit::Day => "DAY",
            IntervalUnit::Week => "WEEK",
            IntervalUnit::Month => "MONTH",
            IntervalUnit::Year => "YEAR",
        }
    }
}

/// Aggregate function names understood by the executor
pub fn is_aggregate_function(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" | "GROUP_CONCAT" | "STRING_AGG" | "LISTAGG"
    )
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// True if an aggregate call appears anywhere outside a nested subquery
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args, .. } => {
                is_aggregate_function(name) || args.iter().any(|a| a.contains_aggregate())
            }
            Expr::BinaryOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::InSubquery { expr, .. } => expr.contains_aggregate(),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_ref().map_or(false, |o| o.contains_aggregate())
                    || branches
                        .iter()
                        .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_result.as_ref().map_or(false, |e| e.contains_aggregate())
            }
            Expr::In { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(|e| e.contains_aggregate())
            }
            Expr::Between {
                expr, low, high, ..
            } => expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate(),
            Expr::Like { expr, pattern, .. } => {
                expr.contains_aggregate() || pattern.contains_aggregate()
            }
            Expr::JsonExtract { expr, path, .. } => {
                expr.contains_aggregate() || path.contains_aggregate()
            }
            Expr::Interval { value, .. } => value.contains_aggregate(),
            _ => false,
        }
    }

    /// Window calls in `self`, outermost first (subqueries are not entered)
    pub fn collect_windows<'e>(&'e self, out: &mut Vec<&'e Expr>) {
        match self {
            Expr::Window { .. } => out.push(self),
            Expr::FunctionCall { args, .. } => args.iter().for_each(|a| a.collect_windows(out)),
            Expr::BinaryOp { left, right, .. }
            | Expr::Like {
                expr: left,
                pattern: right,
                ..
            }
            | Expr::JsonExtract {
                expr: left,
                path: right,
                ..
            } => {
                left.collect_windows(out);
                right.collect_windows(out);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::InSubquery { expr, .. } => expr.collect_windows(out),
            Expr::Interval { value, .. } => value.collect_windows(out),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(o) = operand {
                    o.collect_windows(out);
                }
                for (w, t) in branches {
                    w.collect_windows(out);
                    t.collect_windows(out);
                }
                if let Some(e) = else_result {
                    e.collect_windows(out);
                }
            }
            Expr::In { expr, list, .. } => {
                expr.collect_windows(out);
                list.iter().for_each(|e| e.collect_windows(out));
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_windows(out);
                low.collect_windows(out);
                high.collect_windows(out);
            }
            _ => {}
        }
    }

    /// Copy of `self` with every node equal to `from` replaced by `to`
    pub fn replace(&self, from: &Expr, to: &Expr) -> Expr {
        if self == from {
            return to.clone();
        }
        let r = |e: &Expr| Box::new(e.replace(from, to));
        match self {
            Expr::FunctionCall {
                name,
                args,
                distinct,
            } => Expr::FunctionCall {
                name: name.clone(),
                args: args.iter().map(|a| a.replace(from, to)).collect(),
                distinct: *distinct,
            },
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: r(left),
                op: *op,
                right: r(right),
            },
            Expr::UnaryOp { op, expr } => Expr::UnaryOp { op: *op, expr: r(expr) },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: r(expr),
                negated: *negated,
            },
            Expr::Cast { expr, col_type } => Expr::Cast {
                expr: r(expr),
                col_type: *col_type,
            },
            Expr::Case {
                operand,
                branches,
                else_result,
            } => Expr::Case {
                operand: operand.as_deref().map(r),
                branches: branches
                    .iter()
                    .map(|(w, t)| (w.replace(from, to), t.replace(from, to)))
                    .collect(),
                else_result: else_result.as_deref().map(r),
            },
            Expr::In {
                expr,
                list,
                negated,
            } => Expr::In {
                expr: r(expr),
                list: list.iter().map(|e| e.replace(from, to)).collect(),
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: r(expr),
                low: r(low),
                high: r(high),
                negated: *negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: r(expr),
                pattern: r(pattern),
                negated: *negated,
            },
            Expr::JsonExtract {
                expr,
                path,
                unquote,
            } => Expr::JsonExtract {
                expr: r(expr),
                path: r(path),
                unquote: *unquote,
            },
            other => other.clone(),
        }
    }

    /// Split an AND-conjunction into its conjuncts
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { table: Some(t), name } => write!(f, "{}.{}", t, name),
            Expr::Column { table: None, name } => write!(f, "{}", name),
            Expr::Literal(Value::Text(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Parameter(p) => write!(f, "{}", p),
            Expr::BinaryOp { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => write!(f, "NOT {}", expr),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => write!(f, "-{}", expr),
            Expr::UnaryOp {
                op: UnaryOperator::Plus,
                expr,
            } => write!(f, "+{}", expr),
            Expr::FunctionCall {
                name,
                args,
                distinct,
            } => {
                write!(f, "{}(", name)?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Wildcard => write!(f, "*"),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                write!(f, "CASE")?;
                if let Some(o) = operand {
                    write!(f, " {}", o)?;
                }
                for (when, then) in branches {
                    write!(f, " WHEN {} THEN {}", when, then)?;
                }
                if let Some(e) = else_result {
                    write!(f, " ELSE {}", e)?;
                }
                write!(f, " END")
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                write!(f, "{} {}IN (", expr, if *negated { "NOT " } else { "" })?;
                write_list(f, list)?;
                write!(f, ")")
            }
            Expr::InSubquery { expr, negated, .. } => {
                write!(f, "{} {}IN (subquery)", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "{} {}LIKE {}",
                expr,
                if *negated { "NOT " } else { "" },
                pattern
            ),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Exists { negated, .. } => {
                write!(f, "{}EXISTS (subquery)", if *negated { "NOT " } else { "" })
            }
            Expr::Subquery(_) => write!(f, "(subquery)"),
            Expr::JsonExtract {
                expr,
                path,
                unquote,
            } => write!(f, "{} {} {}", expr, if *unquote { "->>" } else { "->" }, path),
            Expr::Cast { expr, col_type } => write!(f, "CAST({} AS {})", expr, col_type.name()),
            Expr::Interval { value, unit } => write!(f, "INTERVAL {} {}", value, unit.name()),
            Expr::Window {
                function,
                partition_by,
                order_by,
                frame,
            } => {
                write!(f, "{} OVER (", function)?;
                if !partition_by.is_empty() {
                    write!(f, "PARTITION BY ")?;
                    write_list(f, partition_by)?;
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        write!(f, " ")?;
                    }
                    write!(f, "ORDER BY ")?;
                    for (i, o) in order_by.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}{}", o.expr, if o.asc { "" } else { " DESC" })?;
                    }
                }
                if let Some(frame) = frame {
                    write!(
                        f,
                        " {} BETWEEN {} AND {}",
                        if frame.range { "RANGE" } else { "ROWS" },
                        frame.start,
                        frame.end
                    )?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_aggregate() {
        let sum = Expr::FunctionCall {
            name: "sum".into(),
            args: vec![Expr::column("amount")],
            distinct: false,
        };
        let expr = Expr::BinaryOp {
            left: Box::new(sum),
            op: BinaryOperator::Gt,
            right: Box::new(Expr::Literal(Value::Integer(10))),
        };
        assert!(expr.contains_aggregate());
        assert!(!Expr::column("amount").contains_aggregate());
    }

    #[test]
    fn test_display_round_trips_readably() {
        let expr = Expr::Like {
            expr: Box::new(Expr::column("name")),
            pattern: Box::new(Expr::Literal(Value::from("J%"))),
            negated: true,
        };
        assert_eq!(expr.to_string(), "name NOT LIKE 'J%'");
    }

    #[test]
    fn test_windows_are_collected_and_replaced() {
        let window = Expr::Window {
            function: Box::new(Expr::FunctionCall {
                name: "ROW_NUMBER".into(),
                args: vec![],
                distinct: false,
            }),
            partition_by: vec![Expr::column("dept")],
            order_by: vec![OrderByExpr {
                expr: Expr::column("salary"),
                asc: false,
                nulls_first: None,
            }],
            frame: None,
        };
        assert_eq!(
            window.to_string(),
            "ROW_NUMBER() OVER (PARTITION BY dept ORDER BY salary DESC)"
        );

        let expr = Expr::BinaryOp {
            left: Box::new(window.clone()),
            op: BinaryOperator::Mul,
            right: Box::new(Expr::Literal(Value::Integer(10))),
        };
        let mut found = Vec::new();
        expr.collect_windows(&mut found);
        assert_eq!(found, vec![&window]);
        assert!(!expr.contains_aggregate());

        let slot = Expr::column("w0");
        assert_eq!(expr.replace(&window, &slot).to_string(), "w0 * 10");
    }

    #[test]
    fn test_conjuncts_flatten_and_chain() {
        let eq = |c: &str| Expr::BinaryOp {
            left: Box::new(Expr::column(c)),
            op: BinaryOperator::Eq,
            right: Box::new(Expr::Literal(Value::Integer(1))),
        };
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::BinaryOp {
                left: Box::new(eq("a")),
                op: BinaryOperator::And,
                right: Box::new(eq("b")),
            }),
            op: BinaryOperator::And,
            right: Box::new(eq("c")),
        };
        assert_eq!(expr.conjuncts().len(), 3);
    }
}
