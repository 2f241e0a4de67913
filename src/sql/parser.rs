/// SQL Parser - converts tokens into AST, consulting the dialect for every
/// version-gated construct
use super::ast::*;
use super::resolver::parse_number;
use super::token::{Token, TokenType};
use crate::dialect::{Dialect, Feature};
use crate::error::{Result, SqlError};
use crate::types::{ColumnDef, ColumnType, DefaultValue, ForeignKeyDef, IndexDef, Value};

/// Binding power shared by comparisons and the postfix predicates
const COMPARISON: u8 = 3;
const JSON_ARROW: u8 = 7;

/// Words that terminate an expression instead of being read as an implicit alias
const NON_ALIAS_WORDS: &[&str] = &[
    "FETCH", "ROWS", "ROW", "ONLY", "NEXT", "FIRST", "USE", "FORCE", "IGNORE", "FOR", "OVER",
    "WINDOW", "RETURNING", "NATURAL", "USING", "STRAIGHT_JOIN",
];

const DATE_ADD_FAMILY: &[&str] = &["DATE_ADD", "DATE_SUB", "ADDDATE", "TIMESTAMPADD", "DATEADD"];
const NULL_SUBSTITUTES: &[&str] = &["IFNULL", "NVL", "ISNULL", "VALUE"];

pub struct Parser<'d> {
    tokens: Vec<Token>,
    position: usize,
    dialect: &'d Dialect,
    /// Counter used to name bare `?` placeholders (`?1`, `?2`, ...)
    positional: usize,
}

impl<'d> Parser<'d> {
    pub fn new(tokens: Vec<Token>, dialect: &'d Dialect) -> Self {
        Self {
            tokens,
            position: 0,
            dialect,
            positional: 0,
        }
    }

    /// Parse exactly one SQL statement
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;

        // Optionally consume semicolon
        while self.match_token(TokenType::Semicolon) {}

        if !self.at_eof() {
            return Err(self.error("Unexpected input after end of statement"));
        }
        Ok(stmt)
    }

    /// Parse a `;`-separated batch, returning statements in source order
    pub fn parse_statements(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.match_token(TokenType::Semicolon) {}
            if self.at_eof() {
                break;
            }
            statements.push(self.parse_statement()?);
            if !self.at_eof() && !self.check(&TokenType::Semicolon) {
                return Err(self.error("Expected ';' between statements"));
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match &self.current().token_type {
            TokenType::Select | TokenType::With | TokenType::LParen => {
                match self.parse_query()? {
                    Query::Select(s) => Ok(Statement::Select(*s)),
                    Query::Union(u) => Ok(Statement::Union(*u)),
                }
            }
            TokenType::Insert => Ok(Statement::Insert(self.parse_insert()?)),
            TokenType::Update => Ok(Statement::Update(self.parse_update()?)),
            TokenType::Delete => Ok(Statement::Delete(self.parse_delete()?)),
            TokenType::Create => self.parse_create(),
            TokenType::Drop => self.parse_drop(),
            TokenType::Call => Ok(Statement::Call(self.parse_call()?)),
            TokenType::Identifier(word) => {
                let word = word.to_ascii_uppercase();
                match word.as_str() {
                    "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "SAVE" | "RELEASE" => {
                        self.parse_transaction_control()
                    }
                    "MERGE" => Ok(Statement::Merge(self.parse_merge()?)),
                    _ => Err(self.error("Expected a SQL statement")),
                }
            }
            _ => Err(self.error("Expected a SQL statement")),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Parse `[WITH ...] select [UNION [ALL] select ...]`
    pub(crate) fn parse_query(&mut self) -> Result<Query> {
        let ctes = if self.check(&TokenType::With) {
            self.parse_with()?
        } else {
            Vec::new()
        };

        let mut parts = vec![self.parse_union_part()?];
        let mut all_flags = Vec::new();
        while self.match_token(TokenType::Union) {
            let all = self.match_token(TokenType::All);
            if !all {
                self.match_token(TokenType::Distinct);
            }
            all_flags.push(all);
            parts.push(self.parse_union_part()?);
        }

        if parts.len() == 1 {
            let (mut select, parenthesized) = parts.remove(0);
            if parenthesized && select.order_by.is_empty() && select.limit.is_none() {
                select.order_by = self.parse_order_by_clause()?;
                select.limit = self.parse_limit_clause(!select.order_by.is_empty())?;
            }
            if !ctes.is_empty() {
                select.ctes = ctes;
            }
            return Ok(Query::Select(Box::new(select)));
        }

        let last_parenthesized = parts.last().map_or(false, |(_, p)| *p);
        let count = parts.len();
        let mut selects = Vec::with_capacity(count);
        let mut order_by = Vec::new();
        let mut limit = None;
        for (i, (mut select, parenthesized)) in parts.into_iter().enumerate() {
            if !parenthesized {
                if i + 1 < count && (!select.order_by.is_empty() || select.limit.is_some()) {
                    return Err(SqlError::syntax(
                        "ORDER BY and LIMIT may only follow the last SELECT of a UNION",
                        "UNION",
                    ));
                }
                if i + 1 == count {
                    order_by = std::mem::take(&mut select.order_by);
                    limit = select.limit.take();
                }
            }
            selects.push(select);
        }
        if last_parenthesized {
            order_by = self.parse_order_by_clause()?;
            limit = self.parse_limit_clause(!order_by.is_empty())?;
        }

        Ok(Query::Union(Box::new(UnionStmt {
            ctes,
            parts: selects,
            all_flags,
            order_by,
            limit,
        })))
    }

    /// One UNION operand; the flag is true when it was written in parentheses
    fn parse_union_part(&mut self) -> Result<(SelectStmt, bool)> {
        if self.check(&TokenType::LParen) {
            self.advance();
            let query = self.parse_query()?;
            self.expect(TokenType::RParen)?;
            return match query {
                Query::Select(s) => Ok((*s, true)),
                Query::Union(_) => Err(SqlError::syntax(
                    "Nested UNION inside parentheses is not supported",
                    "(",
                )),
            };
        }
        Ok((self.parse_select()?, false))
    }

    fn parse_with(&mut self) -> Result<Vec<Cte>> {
        self.dialect.require(Feature::WithCte)?;
        self.expect(TokenType::With)?;
        if self.match_keyword("RECURSIVE") {
            return Err(SqlError::NotSupported {
                construct: "WITH RECURSIVE".to_string(),
                dialect: self.dialect.name().to_string(),
                version: self.dialect.version,
                min_version: None,
            });
        }

        let mut ctes = Vec::new();
        loop {
            let name = self.parse_identifier()?;
            let columns = if self.check(&TokenType::LParen) {
                self.advance();
                let cols = self.parse_identifier_list()?;
                self.expect(TokenType::RParen)?;
                cols
            } else {
                Vec::new()
            };
            self.expect(TokenType::As)?;
            self.expect(TokenType::LParen)?;
            let query = self.parse_query()?;
            self.expect(TokenType::RParen)?;
            ctes.push(Cte {
                name,
                columns,
                query,
            });
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(ctes)
    }

    /// Parse SELECT statement
    fn parse_select(&mut self) -> Result<SelectStmt> {
        self.expect(TokenType::Select)?;

        // Parse DISTINCT (optional)
        let distinct = self.match_token(TokenType::Distinct);
        if !distinct {
            self.match_token(TokenType::All);
        }

        let top = if self.is_keyword("TOP") {
            self.dialect.require(Feature::Top)?;
            self.advance();
            let count = if self.match_token(TokenType::LParen) {
                let expr = self.parse_expr(0)?;
                self.expect(TokenType::RParen)?;
                expr
            } else {
                self.parse_limit_operand()?
            };
            Some(LimitClause {
                count: Some(count),
                offset: None,
                form: LimitForm::Top,
            })
        } else {
            None
        };

        // Parse columns
        let columns = self.parse_select_columns()?;

        // FROM clause (optional: SELECT 1, SELECT ... FROM DUAL)
        let from = if self.match_token(TokenType::From) {
            if self.is_keyword("DUAL") && !matches!(self.peek(1), TokenType::Dot) {
                self.advance();
                None
            } else {
                Some(self.parse_table_ref()?)
            }
        } else {
            None
        };

        // WHERE clause (optional)
        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        // GROUP BY clause (optional)
        let group_by = if self.match_token(TokenType::Group) {
            self.expect(TokenType::By)?;
            self.parse_expr_list()?
        } else {
            Vec::new()
        };

        // HAVING clause (optional)
        let having = if self.match_token(TokenType::Having) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let order_by = self.parse_order_by_clause()?;
        let limit = self.parse_limit_clause(!order_by.is_empty())?;

        let limit = match (top, limit) {
            (Some(_), Some(_)) => {
                return Err(SqlError::syntax("TOP cannot be combined with another row limit", "TOP"))
            }
            (top, limit) => top.or(limit),
        };

        Ok(SelectStmt {
            ctes: Vec::new(),
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    fn parse_select_columns(&mut self) -> Result<Vec<SelectColumn>> {
        let mut columns = Vec::new();

        loop {
            if self.match_token(TokenType::Star) {
                columns.push(SelectColumn::Star);
            } else if self.is_identifier_token()
                && matches!(self.peek(1), TokenType::Dot)
                && matches!(self.peek(2), TokenType::Star)
            {
                let table = self.parse_identifier()?;
                self.advance(); // .
                self.advance(); // *
                columns.push(SelectColumn::QualifiedStar(table));
            } else {
                let expr = self.parse_expr(0)?;
                let alias = self.parse_optional_alias()?;
                columns.push(SelectColumn::Expr(expr, alias));
            }

            if !self.match_token(TokenType::Comma) {
                break;
            }
        }

        Ok(columns)
    }

    fn parse_optional_alias(&mut self) -> Result<Option<String>> {
        if self.match_token(TokenType::As) {
            return match &self.current().token_type {
                TokenType::Identifier(s) | TokenType::QuotedIdentifier(s) | TokenType::String(s) => {
                    let s = s.clone();
                    self.advance();
                    Ok(Some(s))
                }
                _ => Err(self.error("Expected alias after AS")),
            };
        }
        match &self.current().token_type {
            TokenType::QuotedIdentifier(s) => {
                let s = s.clone();
                self.advance();
                Ok(Some(s))
            }
            TokenType::Identifier(s) if !is_non_alias_word(s) => {
                let s = s.clone();
                self.advance();
                Ok(Some(s))
            }
            _ => Ok(None),
        }
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let first = self.parse_table_factor()?;
        self.parse_join_chain(first)
    }

    fn starts_join(&self) -> bool {
        matches!(
            self.current().token_type,
            TokenType::Comma
                | TokenType::Join
                | TokenType::Inner
                | TokenType::Left
                | TokenType::Right
                | TokenType::Full
                | TokenType::Cross
        )
    }

    /// Fold any joins that follow `left` into a left-deep tree
    fn parse_join_chain(&mut self, mut left: TableRef) -> Result<TableRef> {
        loop {
            let join_type = match &self.current().token_type {
                TokenType::Comma => {
                    self.advance();
                    let right = self.parse_table_factor()?;
                    left = TableRef::Join {
                        left: Box::new(left),
                        right: Box::new(right),
                        join_type: JoinType::Cross,
                        on: None,
                    };
                    continue;
                }
                TokenType::Join => {
                    self.advance();
                    JoinType::Inner
                }
                TokenType::Inner => {
                    self.advance();
                    self.expect(TokenType::Join)?;
                    JoinType::Inner
                }
                TokenType::Left => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    self.expect(TokenType::Join)?;
                    JoinType::Left
                }
                TokenType::Right => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    self.expect(TokenType::Join)?;
                    JoinType::Right
                }
                TokenType::Full => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    self.expect(TokenType::Join)?;
                    JoinType::Full
                }
                TokenType::Cross => {
                    self.advance();
                    self.expect(TokenType::Join)?;
                    JoinType::Cross
                }
                _ => break,
            };

            let right = self.parse_table_factor()?;
            let on = if join_type == JoinType::Cross {
                None
            } else {
                self.expect(TokenType::On)?;
                Some(self.parse_expr(0)?)
            };

            left = TableRef::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                on,
            };
        }

        Ok(left)
    }

    fn parse_table_factor(&mut self) -> Result<TableRef> {
        if self.check(&TokenType::LParen) {
            if matches!(self.peek(1), TokenType::Select | TokenType::With) {
                self.advance();
                let query = self.parse_query()?;
                self.expect(TokenType::RParen)?;
                self.match_token(TokenType::As);
                let alias = self
                    .parse_identifier()
                    .map_err(|_| self.error("Every derived table must have its own alias"))?;
                return Ok(TableRef::Subquery {
                    query: Box::new(query),
                    alias,
                });
            }
            self.advance();
            let inner = self.parse_table_ref()?;
            self.expect(TokenType::RParen)?;
            return Ok(inner);
        }

        let name = self.parse_object_name()?;
        let alias = if self.match_token(TokenType::As) {
            Some(self.parse_identifier()?)
        } else {
            match &self.current().token_type {
                TokenType::QuotedIdentifier(s) => {
                    let s = s.clone();
                    self.advance();
                    Some(s)
                }
                TokenType::Identifier(s) if !is_non_alias_word(s) => {
                    let s = s.clone();
                    self.advance();
                    Some(s)
                }
                _ => None,
            }
        };
        let hints = self.parse_index_hints()?;

        Ok(TableRef::Table { name, alias, hints })
    }

    fn parse_index_hints(&mut self) -> Result<Vec<IndexHint>> {
        let mut hints = Vec::new();
        loop {
            let kind = if self.is_keyword("USE") {
                HintKind::Use
            } else if self.is_keyword("FORCE") {
                HintKind::Force
            } else if self.is_keyword("IGNORE") {
                HintKind::Ignore
            } else {
                break;
            };
            let names_index = matches!(self.peek(1), TokenType::Index)
                || matches!(self.peek(1), TokenType::Identifier(w) if w.eq_ignore_ascii_case("KEY"));
            if !names_index {
                break;
            }
            self.dialect.require(Feature::IndexHints)?;
            self.advance();
            self.advance();

            let scope = if self.match_keyword("FOR") {
                if self.match_token(TokenType::Join) {
                    HintScope::Join
                } else if self.match_token(TokenType::Order) {
                    self.expect(TokenType::By)?;
                    HintScope::OrderBy
                } else if self.match_token(TokenType::Group) {
                    self.expect(TokenType::By)?;
                    HintScope::GroupBy
                } else {
                    return Err(self.error("Expected JOIN, ORDER BY or GROUP BY after FOR"));
                }
            } else {
                HintScope::All
            };

            self.expect(TokenType::LParen)?;
            let mut indexes = Vec::new();
            while !self.check(&TokenType::RParen) {
                if self.match_token(TokenType::Primary) {
                    indexes.push("PRIMARY".to_string());
                } else {
                    indexes.push(self.parse_identifier()?);
                }
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            hints.push(IndexHint {
                kind,
                scope,
                indexes,
            });
        }
        Ok(hints)
    }

    fn parse_order_by_clause(&mut self) -> Result<Vec<OrderByExpr>> {
        if !self.match_token(TokenType::Order) {
            return Ok(Vec::new());
        }
        self.expect(TokenType::By)?;

        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let asc = if self.match_token(TokenType::Desc) {
                false
            } else {
                self.match_token(TokenType::Asc);
                true
            };
            let nulls_first = if self.is_keyword("NULLS") {
                self.dialect.require(Feature::NullsOrdering)?;
                self.advance();
                if self.match_keyword("FIRST") {
                    Some(true)
                } else if self.match_keyword("LAST") {
                    Some(false)
                } else {
                    return Err(self.error("Expected FIRST or LAST after NULLS"));
                }
            } else {
                None
            };
            items.push(OrderByExpr {
                expr,
                asc,
                nulls_first,
            });
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// LIMIT n [OFFSET m] | LIMIT m, n | OFFSET m ROWS [FETCH ...] | FETCH FIRST n ROWS ONLY
    fn parse_limit_clause(&mut self, has_order_by: bool) -> Result<Option<LimitClause>> {
        if self.check(&TokenType::Limit) {
            self.dialect.require(Feature::Limit)?;
            self.advance();
            let first = self.parse_limit_operand()?;
            if self.check(&TokenType::Comma) {
                self.dialect.require(Feature::LimitComma)?;
                self.advance();
                let count = self.parse_limit_operand()?;
                return Ok(Some(LimitClause {
                    count: Some(count),
                    offset: Some(first),
                    form: LimitForm::LimitComma,
                }));
            }
            let offset = if self.match_token(TokenType::Offset) {
                Some(self.parse_limit_operand()?)
            } else {
                None
            };
            return Ok(Some(LimitClause {
                count: Some(first),
                offset,
                form: LimitForm::Limit,
            }));
        }

        if self.check(&TokenType::Offset) {
            self.advance();
            let offset = self.parse_limit_operand()?;
            let rows_keyword = self.match_keyword("ROWS") || self.match_keyword("ROW");

            if self.is_keyword("FETCH") {
                self.dialect.require(Feature::OffsetFetch)?;
                self.advance();
                let count = self.parse_fetch_tail()?;
                if self.dialect.offset_fetch_requires_order_by && !has_order_by {
                    return Err(SqlError::syntax(
                        "OFFSET ... FETCH requires an ORDER BY clause",
                        "OFFSET",
                    ));
                }
                return Ok(Some(LimitClause {
                    count: Some(count),
                    offset: Some(offset),
                    form: LimitForm::OffsetFetch,
                }));
            }

            let form = if !rows_keyword && self.dialect.supports_limit() {
                LimitForm::Limit
            } else {
                self.dialect.require(Feature::OffsetFetch)?;
                if self.dialect.offset_fetch_requires_order_by && !has_order_by {
                    return Err(SqlError::syntax(
                        "OFFSET requires an ORDER BY clause",
                        "OFFSET",
                    ));
                }
                LimitForm::OffsetFetch
            };
            return Ok(Some(LimitClause {
                count: None,
                offset: Some(offset),
                form,
            }));
        }

        if self.is_keyword("FETCH") {
            self.dialect.require(Feature::FetchFirst)?;
            self.advance();
            let count = self.parse_fetch_tail()?;
            return Ok(Some(LimitClause {
                count: Some(count),
                offset: None,
                form: LimitForm::FetchFirst,
            }));
        }

        Ok(None)
    }

    /// `FIRST|NEXT n ROWS|ROW ONLY` after FETCH
    fn parse_fetch_tail(&mut self) -> Result<Expr> {
        if !(self.match_keyword("FIRST") || self.match_keyword("NEXT")) {
            return Err(self.error("Expected FIRST or NEXT after FETCH"));
        }
        let count = self.parse_limit_operand()?;
        if !(self.match_keyword("ROWS") || self.match_keyword("ROW")) {
            return Err(self.error("Expected ROWS after FETCH count"));
        }
        if !self.match_keyword("ONLY") {
            return Err(self.error("Expected ONLY after FETCH ... ROWS"));
        }
        Ok(count)
    }

    fn parse_limit_operand(&mut self) -> Result<Expr> {
        match &self.current().token_type {
            TokenType::Number(n) if n.chars().all(|c| c.is_ascii_digit()) => {
                let value = match n.parse::<i64>() {
                    Ok(v) => v,
                    // up to u64::MAX is accepted and means every row
                    Err(_) if n.parse::<u64>().is_ok() => i64::MAX,
                    Err(_) => return Err(self.error("Row count out of range")),
                };
                self.advance();
                Ok(Expr::Literal(Value::Integer(value)))
            }
            TokenType::Parameter(_) => self.parse_prefix_expr(),
            _ => Err(self.error("Expected non-negative integer")),
        }
    }

    // ------------------------------------------------------------------
    // DML
    // ------------------------------------------------------------------

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect(TokenType::Insert)?;
        self.expect(TokenType::Into)?;
        let table = self.parse_object_name()?;

        let columns = if self.check(&TokenType::LParen)
            && !matches!(self.peek(1), TokenType::Select | TokenType::With)
        {
            self.advance();
            let cols = self.parse_identifier_list()?;
            self.expect(TokenType::RParen)?;
            Some(cols)
        } else {
            None
        };

        let source = if self.match_token(TokenType::Values) {
            let mut rows = Vec::new();
            loop {
                self.expect(TokenType::LParen)?;
                let row = if self.check(&TokenType::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(TokenType::RParen)?;
                rows.push(row);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if matches!(
            self.current().token_type,
            TokenType::Select | TokenType::With | TokenType::LParen
        ) {
            InsertSource::Query(Box::new(self.parse_query()?))
        } else {
            return Err(self.error("Expected VALUES or SELECT"));
        };

        // MySQL 8.0.19+: VALUES (...) AS new
        let mut row_alias = EXCLUDED.to_string();
        if matches!(source, InsertSource::Values(_)) && self.check(&TokenType::As) {
            self.dialect.require(Feature::OnDuplicateKeyUpdate)?;
            self.advance();
            row_alias = self.parse_identifier()?;
        }

        let mut on_conflict = None;
        if self.check(&TokenType::On) {
            let word = match self.peek(1) {
                TokenType::Identifier(w) => w.to_ascii_uppercase(),
                _ => String::new(),
            };
            if word == "DUPLICATE" {
                self.dialect.require(Feature::OnDuplicateKeyUpdate)?;
                self.advance();
                self.advance();
                self.expect_keyword("KEY")?;
                self.expect(TokenType::Update)?;
                let assignments = self.parse_assignments()?;
                on_conflict = Some(OnConflict {
                    columns: Vec::new(),
                    row_alias,
                    action: ConflictAction::Update {
                        assignments: own_assignments(
                            self.dialect,
                            assignments,
                            &table,
                            None,
                            false,
                        )?,
                        filter: None,
                    },
                });
            } else if word == "CONFLICT" {
                self.dialect.require(Feature::OnConflict)?;
                self.advance();
                self.advance();
                let columns = if self.match_token(TokenType::LParen) {
                    let cols = self.parse_identifier_list()?;
                    self.expect(TokenType::RParen)?;
                    cols
                } else {
                    Vec::new()
                };
                if !self.match_keyword("DO") {
                    return Err(self.error("Expected DO after ON CONFLICT"));
                }
                let action = if self.match_keyword("NOTHING") {
                    ConflictAction::Nothing
                } else if self.match_token(TokenType::Update) {
                    self.expect(TokenType::Set)?;
                    let assignments = self.parse_assignments()?;
                    let filter = if self.match_token(TokenType::Where) {
                        Some(self.parse_expr(0)?)
                    } else {
                        None
                    };
                    ConflictAction::Update {
                        assignments: own_assignments(
                            self.dialect,
                            assignments,
                            &table,
                            None,
                            false,
                        )?,
                        filter,
                    }
                } else {
                    return Err(self.error("Expected NOTHING or UPDATE after DO"));
                };
                on_conflict = Some(OnConflict {
                    columns,
                    row_alias,
                    action,
                });
            }
        }

        Ok(InsertStmt {
            table,
            columns,
            source,
            on_conflict,
        })
    }

    /// `col = expr, ...` with each target's optional qualifier
    fn parse_assignments(&mut self) -> Result<Vec<Assignment>> {
        let mut assignments = Vec::new();
        loop {
            let mut qualifier = None;
            let mut column = self.parse_identifier()?;
            if self.match_token(TokenType::Dot) {
                qualifier = Some(column);
                column = self.parse_identifier()?;
            }
            self.expect(TokenType::Eq)?;
            let value = self.parse_expr(0)?;
            assignments.push((qualifier, column, value));

            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(assignments)
    }

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect(TokenType::Update)?;
        let mut table = self.parse_object_name()?;
        let mut alias = self.parse_optional_alias()?;

        let mut joins = Vec::new();
        if self.starts_join() {
            self.dialect.require(Feature::UpdateJoin)?;
            let target = TableRef::Table {
                name: table.clone(),
                alias: alias.clone(),
                hints: Vec::new(),
            };
            joins = flatten_joins(self.parse_join_chain(target)?).1;
        }

        self.expect(TokenType::Set)?;
        let assignments = self.parse_assignments()?;

        if self.match_token(TokenType::From) {
            self.dialect.require(Feature::UpdateFrom)?;
            let (first, rest) = flatten_joins(self.parse_table_ref()?);
            match first {
                // SQL Server: UPDATE a SET ... FROM t a JOIN ...
                TableRef::Table {
                    name, alias: a, ..
                } if alias.is_none()
                    && a.as_deref().unwrap_or(&name).eq_ignore_ascii_case(&table) =>
                {
                    table = name;
                    alias = a;
                }
                other => joins.push(DmlJoin {
                    source: other,
                    join_type: JoinType::Cross,
                    on: None,
                }),
            }
            joins.extend(rest);
        }

        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let joined = !joins.is_empty();
        let assignments =
            own_assignments(self.dialect, assignments, &table, alias.as_deref(), joined)?;
        Ok(UpdateStmt {
            table,
            alias,
            joins,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.expect(TokenType::Delete)?;

        // DELETE a FROM t a JOIN ...
        let named = if self.check(&TokenType::From) {
            None
        } else {
            let target = self.parse_identifier()?;
            if self.match_token(TokenType::Dot) {
                self.expect(TokenType::Star)?;
            }
            Some(target)
        };
        self.expect(TokenType::From)?;

        let (table, alias, joins) = match named {
            Some(target) => {
                self.dialect.require(Feature::DeleteJoin)?;
                self.parse_delete_sources(&target)?
            }
            None => {
                let table = self.parse_object_name()?;
                let alias = self.parse_optional_alias()?;
                if self.check(&TokenType::From) && alias.is_none() {
                    // SQL Server: DELETE FROM a FROM t a JOIN ...
                    self.dialect.require(Feature::DeleteJoin)?;
                    self.advance();
                    self.parse_delete_sources(&table)?
                } else if self.match_keyword("USING") {
                    self.dialect.require(Feature::DeleteUsing)?;
                    let (first, rest) = flatten_joins(self.parse_table_ref()?);
                    let mut joins = vec![DmlJoin {
                        source: first,
                        join_type: JoinType::Cross,
                        on: None,
                    }];
                    joins.extend(rest);
                    (table, alias, joins)
                } else {
                    (table, alias, Vec::new())
                }
            }
        };

        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        Ok(DeleteStmt {
            table,
            alias,
            joins,
            where_clause,
        })
    }

    /// FROM list of a multi-table DELETE; `target` names its first source
    fn parse_delete_sources(
        &mut self,
        target: &str,
    ) -> Result<(String, Option<String>, Vec<DmlJoin>)> {
        let (first, rest) = flatten_joins(self.parse_table_ref()?);
        match first {
            TableRef::Table { name, alias, .. }
                if alias.as_deref().unwrap_or(&name).eq_ignore_ascii_case(target)
                    || name.eq_ignore_ascii_case(target) =>
            {
                Ok((name, alias, rest))
            }
            _ => Err(SqlError::syntax(
                format!("Unknown table '{}' in MULTI DELETE", target),
                target,
            )),
        }
    }

    /// `MERGE INTO target [alias] USING source ON cond WHEN ...`
    fn parse_merge(&mut self) -> Result<MergeStmt> {
        self.dialect.require(Feature::Merge)?;
        self.advance();
        self.match_token(TokenType::Into);
        let target = self.parse_object_name()?;
        let alias = self.parse_optional_alias()?;
        if !self.match_keyword("USING") {
            return Err(self.error("Expected USING after MERGE target"));
        }
        let source = self.parse_table_factor()?;
        self.expect(TokenType::On)?;
        let on = self.parse_expr(0)?;

        let mut clauses = Vec::new();
        while self.match_token(TokenType::When) {
            let matched = !self.match_token(TokenType::Not);
            self.expect_keyword("MATCHED")?;
            if !matched && self.match_token(TokenType::By) {
                if self.is_keyword("SOURCE") {
                    return Err(SqlError::NotSupported {
                        construct: "WHEN NOT MATCHED BY SOURCE".to_string(),
                        dialect: self.dialect.name().to_string(),
                        version: self.dialect.version,
                        min_version: None,
                    });
                }
                self.expect_keyword("TARGET")?;
            }
            let mut condition = if self.match_token(TokenType::And) {
                Some(self.parse_expr(0)?)
            } else {
                None
            };
            self.expect(TokenType::Then)?;

            let action = if matched {
                if self.match_token(TokenType::Update) {
                    self.expect(TokenType::Set)?;
                    let assignments = self.parse_assignments()?;
                    MergeAction::Update(own_assignments(
                        self.dialect,
                        assignments,
                        &target,
                        alias.as_deref(),
                        false,
                    )?)
                } else if self.match_token(TokenType::Delete) {
                    MergeAction::Delete
                } else {
                    return Err(self.error("Expected UPDATE or DELETE after THEN"));
                }
            } else {
                self.expect(TokenType::Insert)?;
                let columns = if self.match_token(TokenType::LParen) {
                    let cols = self.parse_identifier_list()?;
                    self.expect(TokenType::RParen)?;
                    Some(cols)
                } else {
                    None
                };
                self.expect(TokenType::Values)?;
                self.expect(TokenType::LParen)?;
                let values = self.parse_expr_list()?;
                self.expect(TokenType::RParen)?;
                MergeAction::Insert { columns, values }
            };

            // Oracle: ... THEN UPDATE SET ... WHERE cond
            if self.match_token(TokenType::Where) {
                let filter = self.parse_expr(0)?;
                condition = Some(match condition {
                    Some(c) => Expr::BinaryOp {
                        left: Box::new(c),
                        op: BinaryOperator::And,
                        right: Box::new(filter),
                    },
                    None => filter,
                });
            }
            clauses.push(MergeClause {
                matched,
                condition,
                action,
            });
        }
        if clauses.is_empty() {
            return Err(self.error("Expected WHEN after MERGE ... ON"));
        }

        Ok(MergeStmt {
            target,
            alias,
            source,
            on,
            clauses,
        })
    }

    fn parse_call(&mut self) -> Result<CallStmt> {
        self.expect(TokenType::Call)?;
        let name = self.parse_object_name()?;
        let args = if self.match_token(TokenType::LParen) {
            let args = if self.check(&TokenType::RParen) {
                Vec::new()
            } else {
                self.parse_expr_list()?
            };
            self.expect(TokenType::RParen)?;
            args
        } else {
            Vec::new()
        };
        Ok(CallStmt { name, args })
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(TokenType::Create)?;

        let or_replace = if self.match_token(TokenType::Or) {
            if !self.match_keyword("REPLACE") {
                return Err(self.error("Expected REPLACE after OR"));
            }
            true
        } else {
            false
        };
        let temporary = self.match_keyword("TEMPORARY") || self.match_keyword("TEMP");
        let unique = self.match_keyword("UNIQUE");

        if self.match_token(TokenType::Table) {
            let if_not_exists = self.parse_if_not_exists()?;
            let name = self.parse_object_name()?;

            if self.match_token(TokenType::As)
                || matches!(self.current().token_type, TokenType::Select | TokenType::With)
            {
                let query = self.parse_query()?;
                return Ok(Statement::CreateTableAs(CreateTableAsStmt {
                    name,
                    temporary,
                    if_not_exists,
                    query,
                }));
            }
            return self.parse_create_table_body(name, if_not_exists, temporary);
        }

        if self.match_token(TokenType::View) {
            let if_not_exists = self.parse_if_not_exists()?;
            let name = self.parse_object_name()?;
            let columns = if self.match_token(TokenType::LParen) {
                let cols = self.parse_identifier_list()?;
                self.expect(TokenType::RParen)?;
                cols
            } else {
                Vec::new()
            };
            self.expect(TokenType::As)?;
            let query = self.parse_query()?;
            return Ok(Statement::CreateView(CreateViewStmt {
                name,
                or_replace,
                if_not_exists,
                columns,
                query,
            }));
        }

        if self.match_token(TokenType::Index) {
            let name = self.parse_identifier()?;
            self.expect(TokenType::On)?;
            let table = self.parse_object_name()?;
            self.expect(TokenType::LParen)?;
            let columns = self.parse_identifier_list()?;
            self.expect(TokenType::RParen)?;
            return Ok(Statement::CreateIndex(CreateIndexStmt {
                name,
                table,
                columns,
                unique,
            }));
        }

        Err(self.error("Expected TABLE, VIEW or INDEX after CREATE"))
    }

    fn parse_if_not_exists(&mut self) -> Result<bool> {
        if self.match_keyword("IF") {
            self.expect(TokenType::Not)?;
            self.expect(TokenType::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.match_keyword("IF") {
            self.expect(TokenType::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_create_table_body(
        &mut self,
        name: String,
        if_not_exists: bool,
        temporary: bool,
    ) -> Result<Statement> {
        self.expect(TokenType::LParen)?;

        let mut columns: Vec<ColumnDef> = Vec::new();
        let mut primary_key = Vec::new();
        let mut indexes = Vec::new();
        let mut foreign_keys = Vec::new();

        loop {
            let constraint_name = if self.match_keyword("CONSTRAINT") {
                Some(self.parse_identifier()?)
            } else {
                None
            };

            if self.match_token(TokenType::Primary) {
                self.expect_keyword("KEY")?;
                self.expect(TokenType::LParen)?;
                primary_key = self.parse_identifier_list()?;
                self.expect(TokenType::RParen)?;
            } else if self.match_keyword("UNIQUE") {
                if !self.match_keyword("KEY") {
                    self.match_token(TokenType::Index);
                }
                let index_name = if self.is_identifier_token() {
                    Some(self.parse_identifier()?)
                } else {
                    constraint_name
                };
                self.expect(TokenType::LParen)?;
                let cols = self.parse_identifier_list()?;
                self.expect(TokenType::RParen)?;
                let index_name = index_name.unwrap_or_else(|| cols[0].clone());
                let refs: Vec<&str> = cols.iter().map(String::as_str).collect();
                indexes.push(IndexDef::new(index_name, &refs).unique());
            } else if self.match_keyword("FOREIGN") {
                self.expect_keyword("KEY")?;
                self.expect(TokenType::LParen)?;
                let cols = self.parse_identifier_list()?;
                self.expect(TokenType::RParen)?;
                let (ref_table, ref_cols) = self.parse_references()?;
                let fk_name =
                    constraint_name.unwrap_or_else(|| format!("fk_{}_{}", name, cols.join("_")));
                let cols: Vec<&str> = cols.iter().map(String::as_str).collect();
                let ref_cols: Vec<&str> = ref_cols.iter().map(String::as_str).collect();
                foreign_keys.push(ForeignKeyDef::new(fk_name, &cols, ref_table, &ref_cols));
            } else if self.is_keyword("KEY") || self.check(&TokenType::Index) {
                self.advance();
                let index_name = self.parse_identifier()?;
                self.expect(TokenType::LParen)?;
                let cols = self.parse_identifier_list()?;
                self.expect(TokenType::RParen)?;
                let refs: Vec<&str> = cols.iter().map(String::as_str).collect();
                indexes.push(IndexDef::new(index_name, &refs));
            } else {
                let (column, is_primary, is_unique, reference) = self.parse_column_def(&name)?;
                if is_primary {
                    primary_key = vec![column.name.clone()];
                }
                if is_unique {
                    indexes.push(IndexDef::new(column.name.clone(), &[column.name.as_str()]).unique());
                }
                if let Some((ref_table, ref_cols)) = reference {
                    let fk_name = format!("fk_{}_{}", name, column.name);
                    let ref_cols: Vec<&str> = ref_cols.iter().map(String::as_str).collect();
                    foreign_keys.push(ForeignKeyDef::new(
                        fk_name,
                        &[column.name.as_str()],
                        ref_table,
                        &ref_cols,
                    ));
                }
                columns.push(column);
            }

            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;

        // Primary-key columns are implicitly NOT NULL
        for col in columns.iter_mut() {
            if primary_key.iter().any(|pk| pk.eq_ignore_ascii_case(&col.name)) {
                col.nullable = false;
            }
        }

        Ok(Statement::CreateTable(CreateTableStmt {
            name,
            if_not_exists,
            temporary,
            columns,
            primary_key,
            indexes,
            foreign_keys,
        }))
    }

    fn parse_references(&mut self) -> Result<(String, Vec<String>)> {
        self.expect_keyword("REFERENCES")?;
        let ref_table = self.parse_object_name()?;
        self.expect(TokenType::LParen)?;
        let ref_cols = self.parse_identifier_list()?;
        self.expect(TokenType::RParen)?;
        Ok((ref_table, ref_cols))
    }

    /// Column definition with its inline constraints
    #[allow(clippy::type_complexity)]
    fn parse_column_def(
        &mut self,
        table: &str,
    ) -> Result<(ColumnDef, bool, bool, Option<(String, Vec<String>)>)> {
        let name = self.parse_identifier()?;
        let mut column = self.parse_column_type(name)?;
        let mut primary = false;
        let mut unique = false;
        let mut reference = None;

        loop {
            if self.match_token(TokenType::Not) {
                self.expect(TokenType::Null)?;
                column.nullable = false;
            } else if self.match_token(TokenType::Null) {
                column.nullable = true;
            } else if self.match_token(TokenType::Primary) {
                self.expect_keyword("KEY")?;
                primary = true;
                column.nullable = false;
            } else if self.match_keyword("UNIQUE") {
                self.match_keyword("KEY");
                unique = true;
            } else if self.match_keyword("AUTO_INCREMENT")
                || self.match_keyword("AUTOINCREMENT")
            {
                column = column.identity();
            } else if self.match_keyword("IDENTITY") {
                if self.match_token(TokenType::LParen) {
                    self.parse_expr_list()?;
                    self.expect(TokenType::RParen)?;
                }
                column = column.identity();
            } else if self.match_keyword("GENERATED") {
                // GENERATED ALWAYS|BY DEFAULT AS IDENTITY
                if !self.match_token(TokenType::All) && !self.match_keyword("ALWAYS") {
                    self.expect(TokenType::By)?;
                    self.expect_keyword("DEFAULT")?;
                }
                self.expect(TokenType::As)?;
                self.expect_keyword("IDENTITY")?;
                column = column.identity();
            } else if self.match_keyword("DEFAULT") {
                column.default = Some(self.parse_default_value()?);
            } else if self.is_keyword("REFERENCES") {
                reference = Some(self.parse_references()?);
            } else if self.match_keyword("COMMENT") {
                self.parse_prefix_expr()?;
            } else if self.match_keyword("UNSIGNED") || self.match_keyword("SIGNED") {
                continue;
            } else {
                break;
            }
        }

        if column.identity && primary {
            tracing::trace!(table, column = %column.name, "identity primary key");
        }
        Ok((column, primary, unique, reference))
    }

    fn parse_column_type(&mut self, name: String) -> Result<ColumnDef> {
        let type_name = match &self.current().token_type {
            TokenType::Identifier(t) => t.to_ascii_uppercase(),
            TokenType::Set => "SET".to_string(),
            _ => return Err(self.error("Expected column type")),
        };
        self.advance();

        let column = match type_name.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "INT2" | "INT4"
            | "INT8" | "SIGNED" | "UNSIGNED" => {
                self.match_keyword("INTEGER");
                self.skip_type_arguments()?;
                ColumnDef::new(name, ColumnType::Integer)
            }
            "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" => {
                ColumnDef::new(name, ColumnType::Integer).identity()
            }
            "VARCHAR" | "CHAR" | "NVARCHAR" | "NCHAR" | "VARCHAR2" | "NVARCHAR2" | "CHARACTER"
            | "VARYING" => {
                // CHARACTER VARYING(n)
                self.match_keyword("VARYING");
                let mut column = ColumnDef::new(name, ColumnType::Text);
                if let Some(args) = self.parse_type_arguments()? {
                    if let Some(Some(size)) = args.first() {
                        column = column.with_size(*size as usize);
                    }
                }
                column
            }
            "TEXT" | "CLOB" | "STRING" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "NTEXT" => {
                self.skip_type_arguments()?;
                ColumnDef::new(name, ColumnType::Text)
            }
            "DECIMAL" | "NUMERIC" | "NUMBER" | "DEC" | "MONEY" => {
                let mut column = ColumnDef::new(name, ColumnType::Decimal);
                if let Some(args) = self.parse_type_arguments()? {
                    let scale = args.get(1).copied().flatten().unwrap_or(0);
                    column = column.with_scale(scale as u32);
                }
                column
            }
            "FLOAT" | "DOUBLE" | "REAL" | "FLOAT4" | "FLOAT8" => {
                self.match_keyword("PRECISION");
                self.skip_type_arguments()?;
                ColumnDef::new(name, ColumnType::Float)
            }
            "BOOLEAN" | "BOOL" | "BIT" => {
                self.skip_type_arguments()?;
                ColumnDef::new(name, ColumnType::Boolean)
            }
            "DATE" | "DATETIME" | "DATETIME2" | "TIMESTAMP" | "SMALLDATETIME" | "TIME" => {
                self.skip_type_arguments()?;
                ColumnDef::new(name, ColumnType::DateTime)
            }
            "UUID" | "UNIQUEIDENTIFIER" | "GUID" => ColumnDef::new(name, ColumnType::Guid),
            "JSON" | "JSONB" => ColumnDef::new(name, ColumnType::Json),
            "ENUM" | "SET" => {
                self.expect(TokenType::LParen)?;
                let mut members = Vec::new();
                loop {
                    match &self.current().token_type {
                        TokenType::String(s) => {
                            members.push(s.clone());
                            self.advance();
                        }
                        _ => return Err(self.error("Expected quoted member")),
                    }
                    if !self.match_token(TokenType::Comma) {
                        break;
                    }
                }
                self.expect(TokenType::RParen)?;
                let refs: Vec<&str> = members.iter().map(String::as_str).collect();
                let column = ColumnDef::new(name, ColumnType::Text);
                if type_name == "ENUM" {
                    column.with_enum(&refs)
                } else {
                    column.with_set(&refs)
                }
            }
            other => {
                return Err(SqlError::syntax(
                    format!("Unknown column type {}", other),
                    other.to_string(),
                ))
            }
        };
        Ok(column)
    }

    /// `(a[, b])` after a type name; `MAX` reads as an unbounded size
    fn parse_type_arguments(&mut self) -> Result<Option<Vec<Option<u64>>>> {
        if !self.match_token(TokenType::LParen) {
            return Ok(None);
        }
        let mut args = Vec::new();
        loop {
            match &self.current().token_type {
                TokenType::Number(n) => {
                    let value = n
                        .parse::<u64>()
                        .map_err(|_| self.error("Expected integer type argument"))?;
                    args.push(Some(value));
                    self.advance();
                }
                TokenType::Identifier(w) if w.eq_ignore_ascii_case("MAX") => {
                    args.push(None);
                    self.advance();
                }
                _ => return Err(self.error("Expected integer type argument")),
            }
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;
        Ok(Some(args))
    }

    fn skip_type_arguments(&mut self) -> Result<()> {
        self.parse_type_arguments().map(|_| ())
    }

    fn parse_default_value(&mut self) -> Result<DefaultValue> {
        let expr = self.parse_prefix_expr()?;
        match expr {
            Expr::Literal(value) => Ok(DefaultValue::Literal(value)),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match *expr {
                Expr::Literal(Value::Integer(i)) => Ok(DefaultValue::Literal(Value::Integer(-i))),
                Expr::Literal(Value::Decimal(d)) => Ok(DefaultValue::Literal(Value::Decimal(-d))),
                Expr::Literal(Value::Float(f)) => Ok(DefaultValue::Literal(Value::Float(-f))),
                _ => Err(self.error("Unsupported DEFAULT expression")),
            },
            Expr::FunctionCall { name, .. } => match name.to_ascii_uppercase().as_str() {
                "NOW" | "CURRENT_TIMESTAMP" | "GETDATE" | "SYSDATE" | "CURRENT_DATE"
                | "LOCALTIMESTAMP" => Ok(DefaultValue::CurrentTimestamp),
                "UUID" | "NEWID" | "GEN_RANDOM_UUID" | "SYS_GUID" => Ok(DefaultValue::NewGuid),
                _ => Err(self.error("Unsupported DEFAULT expression")),
            },
            _ => Err(self.error("Unsupported DEFAULT expression")),
        }
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(TokenType::Drop)?;
        if self.match_token(TokenType::View) {
            let if_exists = self.parse_if_exists()?;
            let name = self.parse_object_name()?;
            return Ok(Statement::DropView { name, if_exists });
        }
        self.match_keyword("TEMPORARY");
        if self.match_token(TokenType::Table) {
            let if_exists = self.parse_if_exists()?;
            let name = self.parse_object_name()?;
            return Ok(Statement::DropTable { name, if_exists });
        }
        Err(self.error("Expected VIEW or TABLE after DROP"))
    }

    // ------------------------------------------------------------------
    // Transaction control
    // ------------------------------------------------------------------

    fn parse_transaction_control(&mut self) -> Result<Statement> {
        let word = match &self.current().token_type {
            TokenType::Identifier(w) => w.to_ascii_uppercase(),
            _ => return Err(self.error("Expected transaction statement")),
        };
        self.advance();

        match word.as_str() {
            "BEGIN" => {
                let _ = self.match_keyword("TRANSACTION")
                    || self.match_keyword("TRAN")
                    || self.match_keyword("WORK");
                Ok(Statement::Begin)
            }
            "START" => {
                self.expect_keyword("TRANSACTION")?;
                Ok(Statement::Begin)
            }
            "COMMIT" => {
                let _ = self.match_keyword("TRANSACTION")
                    || self.match_keyword("TRAN")
                    || self.match_keyword("WORK");
                Ok(Statement::Commit)
            }
            "ROLLBACK" => {
                let transaction_word =
                    self.match_keyword("TRANSACTION") || self.match_keyword("TRAN");
                if !transaction_word {
                    self.match_keyword("WORK");
                }
                if self.match_keyword("TO") {
                    self.match_keyword("SAVEPOINT");
                    let name = self.parse_identifier()?;
                    return Ok(Statement::Rollback {
                        savepoint: Some(name),
                    });
                }
                // SQL Server: ROLLBACK TRANSACTION savepoint_name
                if transaction_word && self.is_identifier_token() {
                    let name = self.parse_identifier()?;
                    return Ok(Statement::Rollback {
                        savepoint: Some(name),
                    });
                }
                Ok(Statement::Rollback { savepoint: None })
            }
            "SAVEPOINT" => Ok(Statement::Savepoint(self.parse_identifier()?)),
            "SAVE" => {
                if !(self.match_keyword("TRANSACTION") || self.match_keyword("TRAN")) {
                    return Err(self.error("Expected TRANSACTION after SAVE"));
                }
                Ok(Statement::Savepoint(self.parse_identifier()?))
            }
            "RELEASE" => {
                self.match_keyword("SAVEPOINT");
                Ok(Statement::ReleaseSavepoint(self.parse_identifier()?))
            }
            _ => Err(self.error("Expected transaction statement")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Parse expression using Pratt parsing (handles operator precedence elegantly)
    pub(crate) fn parse_expr(&mut self, min_precedence: u8) -> Result<Expr> {
        // Parse prefix (unary operators, literals, identifiers, etc.)
        let mut left = self.parse_prefix_expr()?;

        loop {
            // IS / IN / LIKE / BETWEEN bind like comparisons
            if min_precedence <= COMPARISON && self.at_postfix_predicate() {
                left = self.parse_postfix_predicate(left)?;
                continue;
            }

            if matches!(
                self.current().token_type,
                TokenType::Arrow | TokenType::LongArrow
            ) {
                if JSON_ARROW < min_precedence {
                    break;
                }
                self.dialect.require(Feature::JsonArrows)?;
                let unquote = matches!(self.current().token_type, TokenType::LongArrow);
                self.advance();
                let path = self.parse_prefix_expr()?;
                left = Expr::JsonExtract {
                    expr: Box::new(left),
                    path: Box::new(path),
                    unquote,
                };
                continue;
            }

            let op = match self.try_parse_binary_op() {
                Some(op) => op,
                None => break,
            };
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            if op == BinaryOperator::NullSafeEq {
                self.dialect.require(Feature::NullSafeEq)?;
            }

            self.advance(); // consume operator
            let right = self.parse_expr(precedence + 1)?;

            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn at_postfix_predicate(&self) -> bool {
        match &self.current().token_type {
            TokenType::Is | TokenType::In | TokenType::Like | TokenType::Between => true,
            TokenType::Not => matches!(
                self.peek(1),
                TokenType::In | TokenType::Like | TokenType::Between
            ),
            _ => false,
        }
    }

    fn parse_postfix_predicate(&mut self, expr: Expr) -> Result<Expr> {
        if self.match_token(TokenType::Is) {
            let negated = self.match_token(TokenType::Not);
            self.expect(TokenType::Null)?;
            return Ok(Expr::IsNull {
                expr: Box::new(expr),
                negated,
            });
        }

        let negated = self.match_token(TokenType::Not);

        if self.match_token(TokenType::In) {
            if let TokenType::Parameter(_) = self.current().token_type {
                // IN @list: the bound value is expected to be a list
                let param = self.parse_prefix_expr()?;
                return Ok(Expr::In {
                    expr: Box::new(expr),
                    list: vec![param],
                    negated,
                });
            }
            self.expect(TokenType::LParen)?;

            // Check if this is a subquery: IN (SELECT ...)
            if matches!(self.current().token_type, TokenType::Select | TokenType::With) {
                let query = self.parse_query()?;
                self.expect(TokenType::RParen)?;
                return Ok(Expr::InSubquery {
                    expr: Box::new(expr),
                    query: Box::new(query),
                    negated,
                });
            }

            // Parse expression list: IN (1, 2, 3)
            let list = self.parse_expr_list()?;
            self.expect(TokenType::RParen)?;
            return Ok(Expr::In {
                expr: Box::new(expr),
                list,
                negated,
            });
        }

        if self.match_token(TokenType::Like) {
            let pattern = self.parse_expr(COMPARISON + 1)?;
            return Ok(Expr::Like {
                expr: Box::new(expr),
                pattern: Box::new(pattern),
                negated,
            });
        }

        if self.match_token(TokenType::Between) {
            let low = self.parse_expr(COMPARISON + 1)?;
            self.expect(TokenType::And)?;
            let high = self.parse_expr(COMPARISON + 1)?;
            return Ok(Expr::Between {
                expr: Box::new(expr),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        Err(self.error("Expected IN, LIKE, or BETWEEN after NOT"))
    }

    fn parse_prefix_expr(&mut self) -> Result<Expr> {
        match self.current().token_type.clone() {
            // Unary operators
            TokenType::Not => {
                self.advance();
                if self.check(&TokenType::Exists) {
                    return self.parse_exists(true);
                }
                let expr = self.parse_expr(COMPARISON)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOperator::Not,
                    expr: Box::new(expr),
                })
            }
            TokenType::Minus => {
                self.advance();
                if let TokenType::Number(n) = &self.current().token_type {
                    let value = parse_number(&format!("-{}", n))
                        .ok_or_else(|| self.error("Invalid number"))?;
                    self.advance();
                    return Ok(Expr::Literal(value));
                }
                let expr = self.parse_expr(6)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(expr),
                })
            }
            TokenType::Plus => {
                self.advance();
                let expr = self.parse_expr(6)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOperator::Plus,
                    expr: Box::new(expr),
                })
            }

            // Parenthesized expression OR subquery
            TokenType::LParen => {
                self.advance();

                if matches!(self.current().token_type, TokenType::Select | TokenType::With) {
                    let query = self.parse_query()?;
                    self.expect(TokenType::RParen)?;
                    return Ok(Expr::Subquery(Box::new(query)));
                }

                let expr = self.parse_expr(0)?;
                self.expect(TokenType::RParen)?;
                Ok(expr)
            }

            // Literals
            TokenType::Number(n) => {
                let value = parse_number(&n).ok_or_else(|| self.error("Invalid number"))?;
                self.advance();
                Ok(Expr::Literal(value))
            }
            TokenType::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(s)))
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenType::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenType::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenType::Parameter(p) => {
                self.advance();
                if p == "?" {
                    self.positional += 1;
                    return Ok(Expr::Parameter(format!("?{}", self.positional)));
                }
                Ok(Expr::Parameter(p))
            }

            TokenType::Exists => self.parse_exists(false),
            TokenType::Case => self.parse_case(),

            // MySQL upsert: VALUES(col) is the value the row proposed
            TokenType::Values if matches!(self.peek(1), TokenType::LParen) => {
                self.dialect.require(Feature::OnDuplicateKeyUpdate)?;
                self.advance();
                self.advance();
                let name = self.parse_identifier()?;
                self.expect(TokenType::RParen)?;
                Ok(Expr::Column {
                    table: Some(EXCLUDED.to_string()),
                    name,
                })
            }

            // LEFT(...) / RIGHT(...) share their keyword with joins
            TokenType::Left | TokenType::Right if matches!(self.peek(1), TokenType::LParen) => {
                let name = if matches!(self.current().token_type, TokenType::Left) {
                    "LEFT"
                } else {
                    "RIGHT"
                };
                self.advance();
                self.parse_function_call(name.to_string())
            }

            TokenType::Identifier(name) => {
                let upper = name.to_ascii_uppercase();
                let next = self.peek(1).clone();

                if matches!(next, TokenType::LParen) {
                    self.advance();
                    if upper == "CAST" {
                        return self.parse_cast();
                    }
                    return self.parse_function_call(name);
                }

                if upper == "INTERVAL" && !matches!(next, TokenType::Dot) {
                    self.advance();
                    let value = self.parse_expr(COMPARISON + 1)?;
                    let unit_word = self.parse_identifier()?;
                    let unit = IntervalUnit::parse(&unit_word).ok_or_else(|| {
                        SqlError::syntax("Unknown INTERVAL unit", unit_word.clone())
                    })?;
                    return Ok(Expr::Interval {
                        value: Box::new(value),
                        unit,
                    });
                }

                if matches!(
                    upper.as_str(),
                    "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "SYSDATE" | "LOCALTIMESTAMP"
                ) && !matches!(next, TokenType::Dot)
                {
                    self.advance();
                    return Ok(Expr::FunctionCall {
                        name: upper,
                        args: Vec::new(),
                        distinct: false,
                    });
                }

                self.parse_column_ref()
            }
            TokenType::QuotedIdentifier(_) => self.parse_column_ref(),

            _ => Err(self.error("Expected expression")),
        }
    }

    fn parse_column_ref(&mut self) -> Result<Expr> {
        let first = self.parse_identifier()?;
        if self.match_token(TokenType::Dot) {
            let second = self.parse_identifier()?;
            // schema.table.column keeps the last two parts
            if self.match_token(TokenType::Dot) {
                let third = self.parse_identifier()?;
                return Ok(Expr::Column {
                    table: Some(second),
                    name: third,
                });
            }
            return Ok(Expr::Column {
                table: Some(first),
                name: second,
            });
        }
        Ok(Expr::Column {
            table: None,
            name: first,
        })
    }

    fn parse_exists(&mut self, negated: bool) -> Result<Expr> {
        self.expect(TokenType::Exists)?;
        self.expect(TokenType::LParen)?;
        let query = self.parse_query()?;
        self.expect(TokenType::RParen)?;
        Ok(Expr::Exists {
            query: Box::new(query),
            negated,
        })
    }

    fn parse_case(&mut self) -> Result<Expr> {
        self.expect(TokenType::Case)?;
        let operand = if self.check(&TokenType::When) {
            None
        } else {
            Some(Box::new(self.parse_expr(0)?))
        };

        let mut branches = Vec::new();
        while self.match_token(TokenType::When) {
            let condition = self.parse_expr(0)?;
            self.expect(TokenType::Then)?;
            let result = self.parse_expr(0)?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.error("CASE requires at least one WHEN"));
        }

        let else_result = if self.match_token(TokenType::Else) {
            Some(Box::new(self.parse_expr(0)?))
        } else {
            None
        };
        self.expect(TokenType::End)?;

        Ok(Expr::Case {
            operand,
            branches,
            else_result,
        })
    }

    fn parse_cast(&mut self) -> Result<Expr> {
        self.expect(TokenType::LParen)?;
        let expr = self.parse_expr(0)?;
        self.expect(TokenType::As)?;
        let target = self.parse_column_type("cast".to_string())?;
        self.expect(TokenType::RParen)?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            col_type: target.col_type,
        })
    }

    /// Parse the argument list of `name(` (the name is already consumed)
    fn parse_function_call(&mut self, name: String) -> Result<Expr> {
        let upper = name.to_ascii_uppercase();
        self.expect(TokenType::LParen)?;

        if DATE_ADD_FAMILY.contains(&upper.as_str()) {
            let canonical = match upper.as_str() {
                "DATE_SUB" | "ADDDATE" => "DATE_ADD",
                other => other,
            };
            if !self.dialect.is_date_add_function(canonical) {
                return Err(SqlError::NotSupported {
                    construct: format!("{}()", upper),
                    dialect: self.dialect.name().to_string(),
                    version: self.dialect.version,
                    min_version: None,
                });
            }
        }

        let distinct = self.match_token(TokenType::Distinct);
        let args = if self.match_token(TokenType::Star) {
            vec![Expr::Wildcard]
        } else if self.check(&TokenType::RParen) {
            Vec::new()
        } else {
            let mut args = self.parse_expr_list()?;
            // GROUP_CONCAT(x SEPARATOR ',')
            if upper == "GROUP_CONCAT" && self.match_keyword("SEPARATOR") {
                args.push(self.parse_prefix_expr()?);
            }
            args
        };
        self.expect(TokenType::RParen)?;

        if NULL_SUBSTITUTES.contains(&upper.as_str())
            && args.len() == 2
            && !self.dialect.is_null_substitute(&upper)
        {
            return Err(SqlError::NotSupported {
                construct: format!("{}()", upper),
                dialect: self.dialect.name().to_string(),
                version: self.dialect.version,
                min_version: None,
            });
        }

        let function = Expr::FunctionCall {
            name,
            args,
            distinct,
        };
        if self.match_keyword("OVER") {
            self.dialect.require(Feature::WindowFunctions)?;
            return self.parse_window(function);
        }
        Ok(function)
    }

    /// `( [PARTITION BY exprs] [ORDER BY items] [frame] )` after OVER
    fn parse_window(&mut self, function: Expr) -> Result<Expr> {
        self.expect(TokenType::LParen)?;
        let partition_by = if self.match_keyword("PARTITION") {
            self.expect(TokenType::By)?;
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        let order_by = self.parse_order_by_clause()?;

        let frame = if self.is_keyword("ROWS") || self.is_keyword("RANGE") {
            let range = self.is_keyword("RANGE");
            self.advance();
            let (start, end) = if self.match_token(TokenType::Between) {
                let start = self.parse_frame_bound()?;
                self.expect(TokenType::And)?;
                (start, self.parse_frame_bound()?)
            } else {
                (self.parse_frame_bound()?, FrameBound::CurrentRow)
            };
            let offset = |b: FrameBound| {
                matches!(b, FrameBound::Preceding(_) | FrameBound::Following(_))
            };
            if range && (offset(start) || offset(end)) {
                return Err(self.error("RANGE frames take UNBOUNDED or CURRENT ROW bounds"));
            }
            if start == FrameBound::UnboundedFollowing || end == FrameBound::UnboundedPreceding {
                return Err(self.error("Invalid window frame bounds"));
            }
            Some(WindowFrame { range, start, end })
        } else {
            None
        };
        self.expect(TokenType::RParen)?;

        Ok(Expr::Window {
            function: Box::new(function),
            partition_by,
            order_by,
            frame,
        })
    }

    fn parse_frame_bound(&mut self) -> Result<FrameBound> {
        if self.match_keyword("UNBOUNDED") {
            if self.match_keyword("PRECEDING") {
                return Ok(FrameBound::UnboundedPreceding);
            }
            self.expect_keyword("FOLLOWING")?;
            return Ok(FrameBound::UnboundedFollowing);
        }
        if self.match_keyword("CURRENT") {
            self.expect_keyword("ROW")?;
            return Ok(FrameBound::CurrentRow);
        }
        let n = match &self.current().token_type {
            TokenType::Number(n) => n
                .parse::<u64>()
                .map_err(|_| self.error("Expected a row count in window frame"))?,
            _ => return Err(self.error("Expected a window frame bound")),
        };
        self.advance();
        if self.match_keyword("PRECEDING") {
            return Ok(FrameBound::Preceding(n));
        }
        self.expect_keyword("FOLLOWING")?;
        Ok(FrameBound::Following(n))
    }

    fn try_parse_binary_op(&self) -> Option<BinaryOperator> {
        match &self.current().token_type {
            TokenType::Eq => Some(BinaryOperator::Eq),
            TokenType::Ne => Some(BinaryOperator::Ne),
            TokenType::Lt => Some(BinaryOperator::Lt),
            TokenType::Gt => Some(BinaryOperator::Gt),
            TokenType::Le => Some(BinaryOperator::Le),
            TokenType::Ge => Some(BinaryOperator::Ge),
            TokenType::NullSafeEq => Some(BinaryOperator::NullSafeEq),
            TokenType::And => Some(BinaryOperator::And),
            TokenType::Or => Some(BinaryOperator::Or),
            TokenType::Plus => Some(BinaryOperator::Add),
            TokenType::Minus => Some(BinaryOperator::Sub),
            TokenType::Star => Some(BinaryOperator::Mul),
            TokenType::Slash => Some(BinaryOperator::Div),
            TokenType::Percent => Some(BinaryOperator::Mod),
            TokenType::Concat if self.dialect.pipes_as_concat => Some(BinaryOperator::Concat),
            TokenType::Concat => Some(BinaryOperator::Or),
            _ => None,
        }
    }

    // Helper methods

    fn parse_identifier(&mut self) -> Result<String> {
        match &self.current().token_type {
            TokenType::Identifier(name) | TokenType::QuotedIdentifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    /// `[schema.]name`; only the last part names the object
    fn parse_object_name(&mut self) -> Result<String> {
        let mut name = self.parse_identifier()?;
        while self.match_token(TokenType::Dot) {
            name = self.parse_identifier()?;
        }
        Ok(name)
    }

    fn is_identifier_token(&self) -> bool {
        match &self.current().token_type {
            TokenType::QuotedIdentifier(_) => true,
            TokenType::Identifier(s) => !is_non_alias_word(s),
            _ => false,
        }
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>> {
        let mut list = Vec::new();
        loop {
            list.push(self.parse_identifier()?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(list)
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut list = Vec::new();
        loop {
            list.push(self.parse_expr(0)?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(list)
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn peek(&self, n: usize) -> &TokenType {
        static EOF: TokenType = TokenType::Eof;
        self.tokens
            .get(self.position + n)
            .map(|t| &t.token_type)
            .unwrap_or(&EOF)
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().token_type, TokenType::Eof)
    }

    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    fn check(&self, token_type: &TokenType) -> bool {
        std::mem::discriminant(&self.current().token_type) == std::mem::discriminant(token_type)
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if self.check(&token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current().token_type, TokenType::Identifier(id) if id.eq_ignore_ascii_case(keyword))
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.match_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {}", keyword)))
        }
    }

    fn expect(&mut self, token_type: TokenType) -> Result<()> {
        if self.check(&token_type) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("Expected {:?}", token_type)))
        }
    }

    fn error(&self, msg: &str) -> SqlError {
        let token = self.current();
        SqlError::syntax(
            format!("{} at line {} column {}", msg, token.line, token.column),
            token_text(&token.token_type),
        )
    }
}

/// Name the proposed row goes by in an upsert's update clause
pub(crate) const EXCLUDED: &str = "excluded";

/// `(qualifier, column, value)` as written in a SET list
type Assignment = (Option<String>, String, Expr);

/// Check that every SET target belongs to `table`, dropping the qualifier
fn own_assignments(
    dialect: &Dialect,
    assignments: Vec<Assignment>,
    table: &str,
    alias: Option<&str>,
    joined: bool,
) -> Result<Vec<(String, Expr)>> {
    assignments
        .into_iter()
        .map(|(qualifier, column, value)| match qualifier {
            Some(q)
                if !q.eq_ignore_ascii_case(table)
                    && !alias.is_some_and(|a| a.eq_ignore_ascii_case(&q)) =>
            {
                if joined {
                    Err(SqlError::NotSupported {
                        construct: "UPDATE of a joined table".to_string(),
                        dialect: dialect.name().to_string(),
                        version: dialect.version,
                        min_version: None,
                    })
                } else {
                    Err(SqlError::unknown_column(format!("{}.{}", q, column)))
                }
            }
            _ => Ok((column, value)),
        })
        .collect()
}

/// Split a join tree into its leftmost source and the joins hanging off it
fn flatten_joins(from: TableRef) -> (TableRef, Vec<DmlJoin>) {
    match from {
        TableRef::Join {
            left,
            right,
            join_type,
            on,
        } => {
            let (first, mut joins) = flatten_joins(*left);
            joins.push(DmlJoin {
                source: *right,
                join_type,
                on,
            });
            (first, joins)
        }
        other => (other, Vec::new()),
    }
}

fn is_non_alias_word(word: &str) -> bool {
    NON_ALIAS_WORDS.iter().any(|w| w.eq_ignore_ascii_case(word))
}

/// Source-like rendering of a token for syntax error fragments
fn token_text(token: &TokenType) -> String {
    match token {
        TokenType::Number(s) | TokenType::Identifier(s) | TokenType::Parameter(s) => s.clone(),
        TokenType::String(s) => format!("'{}'", s),
        TokenType::QuotedIdentifier(s) => s.clone(),
        TokenType::Eof => String::new(),
        TokenType::Eq => "=".to_string(),
        TokenType::Ne => "<>".to_string(),
        TokenType::Lt => "<".to_string(),
        TokenType::Gt => ">".to_string(),
        TokenType::Le => "<=".to_string(),
        TokenType::Ge => ">=".to_string(),
        TokenType::NullSafeEq => "<=>".to_string(),
        TokenType::Plus => "+".to_string(),
        TokenType::Minus => "-".to_string(),
        TokenType::Star => "*".to_string(),
        TokenType::Slash => "/".to_string(),
        TokenType::Percent => "%".to_string(),
        TokenType::Concat => "||".to_string(),
        TokenType::Arrow => "->".to_string(),
        TokenType::LongArrow => "->>".to_string(),
        TokenType::LParen => "(".to_string(),
        TokenType::RParen => ")".to_string(),
        TokenType::Comma => ",".to_string(),
        TokenType::Semicolon => ";".to_string(),
        TokenType::Dot => ".".to_string(),
        keyword => format!("{:?}", keyword).to_ascii_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::sql::lexer::Lexer;

    fn parse_with(sql: &str, dialect: &Dialect) -> Result<Statement> {
        let mut lexer = Lexer::new(sql, dialect);
        let tokens = lexer.tokenize()?;
        let mut parser = Parser::new(tokens, dialect);
        parser.parse()
    }

    fn parse_sql(sql: &str) -> Result<Statement> {
        parse_with(sql, &Dialect::latest(DialectKind::MySql))
    }

    fn select(stmt: Statement) -> SelectStmt {
        match stmt {
            Statement::Select(s) => s,
            other => panic!("Expected SELECT statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let s = select(parse_sql("SELECT * FROM users").unwrap());
        match &s.from {
            Some(TableRef::Table { name, .. }) => assert_eq!(name, "users"),
            _ => panic!("Expected simple table reference"),
        }
        assert!(matches!(s.columns[0], SelectColumn::Star));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let s = select(parse_sql("SELECT id FROM t WHERE a = 1 OR b = 2 AND c = 3").unwrap());
        match s.where_clause.unwrap() {
            Expr::BinaryOp {
                op: BinaryOperator::Or,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::BinaryOp {
                    op: BinaryOperator::And,
                    ..
                }
            )),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_postfix_predicates_inside_conjunction() {
        let s = select(
            parse_sql("SELECT id FROM t WHERE name LIKE 'J%' AND id IN (1, 2) AND email IS NULL")
                .unwrap(),
        );
        let where_clause = s.where_clause.unwrap();
        let parts = where_clause.conjuncts();
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], Expr::Like { .. }));
        assert!(matches!(parts[1], Expr::In { .. }));
        assert!(matches!(parts[2], Expr::IsNull { negated: false, .. }));
    }

    #[test]
    fn test_not_between_with_and() {
        let s = select(parse_sql("SELECT id FROM t WHERE id NOT BETWEEN 1 AND 3 AND x = 1").unwrap());
        let where_clause = s.where_clause.unwrap();
        let parts = where_clause.conjuncts();
        assert!(matches!(parts[0], Expr::Between { negated: true, .. }));
    }

    #[test]
    fn test_limit_forms() {
        let s = select(parse_sql("SELECT id FROM t ORDER BY id LIMIT 1, 2").unwrap());
        let limit = s.limit.unwrap();
        assert_eq!(limit.form, LimitForm::LimitComma);
        assert_eq!(limit.offset, Some(Expr::Literal(Value::Integer(1))));
        assert_eq!(limit.count, Some(Expr::Literal(Value::Integer(2))));

        let s = select(parse_sql("SELECT id FROM t LIMIT 2 OFFSET 1").unwrap());
        assert_eq!(s.limit.unwrap().form, LimitForm::Limit);

        let pg = Dialect::latest(DialectKind::PostgreSql);
        let s = select(
            parse_with("SELECT id FROM t ORDER BY id OFFSET 1 ROWS FETCH NEXT 2 ROWS ONLY", &pg)
                .unwrap(),
        );
        assert_eq!(s.limit.unwrap().form, LimitForm::OffsetFetch);

        let s = select(parse_sql("SELECT id FROM t LIMIT 5, 18446744073709551615").unwrap());
        assert_eq!(s.limit.unwrap().count, Some(Expr::Literal(Value::Integer(i64::MAX))));
        let err = parse_sql("SELECT id FROM t LIMIT 18446744073709551616").unwrap_err();
        assert_eq!(err.code(), 1064);
    }

    #[test]
    fn test_limit_rejected_where_unsupported() {
        let oracle = Dialect::latest(DialectKind::Oracle);
        let err = parse_with("SELECT id FROM t LIMIT 1", &oracle).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { .. }));

        let old_oracle = Dialect::new(DialectKind::Oracle, 11);
        let err =
            parse_with("SELECT id FROM t FETCH FIRST 1 ROWS ONLY", &old_oracle).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { min_version: Some(12), .. }));
    }

    #[test]
    fn test_cte_gated_by_version() {
        let sql = "WITH x AS (SELECT 1 AS a) SELECT a FROM x";
        assert!(parse_with(sql, &Dialect::new(DialectKind::MySql, 8)).is_ok());
        let err = parse_with(sql, &Dialect::new(DialectKind::MySql, 5)).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { min_version: Some(8), .. }));
    }

    #[test]
    fn test_union_hoists_trailing_order_and_limit() {
        let stmt = parse_sql("SELECT a FROM t UNION ALL SELECT a FROM u ORDER BY a LIMIT 3").unwrap();
        match stmt {
            Statement::Union(u) => {
                assert_eq!(u.parts.len(), 2);
                assert_eq!(u.all_flags, vec![true]);
                assert_eq!(u.order_by.len(), 1);
                assert!(u.limit.is_some());
                assert!(u.parts[1].order_by.is_empty());
            }
            other => panic!("Expected UNION, got {:?}", other),
        }
    }

    #[test]
    fn test_index_hints() {
        let s = select(
            parse_sql("SELECT id FROM users USE INDEX (ix_name) WHERE name = 'John'").unwrap(),
        );
        match s.from {
            Some(TableRef::Table { hints, alias, .. }) => {
                assert!(alias.is_none());
                assert_eq!(hints.len(), 1);
                assert_eq!(hints[0].kind, HintKind::Use);
                assert_eq!(hints[0].indexes, vec!["ix_name".to_string()]);
            }
            other => panic!("unexpected FROM: {:?}", other),
        }

        let pg = Dialect::latest(DialectKind::PostgreSql);
        assert!(parse_with("SELECT id FROM users FORCE INDEX (ix) WHERE id = 1", &pg).is_err());
    }

    #[test]
    fn test_parse_joins() {
        let s = select(
            parse_sql("SELECT u.id, o.total FROM users u LEFT JOIN orders o ON o.user_id = u.id AND o.total > 5")
                .unwrap(),
        );
        match s.from {
            Some(TableRef::Join { join_type, on, .. }) => {
                assert_eq!(join_type, JoinType::Left);
                assert!(on.is_some());
            }
            other => panic!("unexpected FROM: {:?}", other),
        }
    }

    #[test]
    fn test_parse_insert() {
        let stmt = parse_sql("INSERT INTO users (id, name) VALUES (1, 'John'), (2, 'Bob')").unwrap();
        match stmt {
            Statement::Insert(i) => {
                assert_eq!(i.table, "users");
                assert_eq!(i.columns.as_ref().unwrap().len(), 2);
                assert!(matches!(i.source, InsertSource::Values(ref rows) if rows.len() == 2));
            }
            _ => panic!("Expected INSERT statement"),
        }
    }

    #[test]
    fn test_parse_update_self_reference() {
        let stmt = parse_sql("UPDATE counters SET hits = hits + 1 WHERE id = @id").unwrap();
        match stmt {
            Statement::Update(u) => {
                assert_eq!(u.table, "counters");
                assert_eq!(u.assignments.len(), 1);
                assert!(u.where_clause.is_some());
            }
            _ => panic!("Expected UPDATE statement"),
        }
    }

    #[test]
    fn test_parse_upserts() {
        let stmt = parse_sql(
            "INSERT INTO t (id, hits) VALUES (1, 1) ON DUPLICATE KEY UPDATE hits = hits + VALUES(hits)",
        )
        .unwrap();
        let Statement::Insert(i) = stmt else { panic!("Expected INSERT") };
        let conflict = i.on_conflict.unwrap();
        assert!(conflict.columns.is_empty());
        assert_eq!(conflict.row_alias, EXCLUDED);
        match conflict.action {
            ConflictAction::Update { assignments, filter } => {
                assert_eq!(assignments[0].0, "hits");
                assert_eq!(assignments[0].1.to_string(), "hits + excluded.hits");
                assert!(filter.is_none());
            }
            other => panic!("unexpected action: {:?}", other),
        }

        let stmt = parse_sql(
            "INSERT INTO t (id, hits) VALUES (1, 1) AS new ON DUPLICATE KEY UPDATE hits = new.hits",
        )
        .unwrap();
        let Statement::Insert(i) = stmt else { panic!("Expected INSERT") };
        assert_eq!(i.on_conflict.unwrap().row_alias, "new");

        let pg = Dialect::latest(DialectKind::PostgreSql);
        let stmt = parse_with(
            "INSERT INTO t (id, hits) VALUES (1, 1) ON CONFLICT (id) DO UPDATE SET hits = excluded.hits WHERE t.hits < 10",
            &pg,
        )
        .unwrap();
        let Statement::Insert(i) = stmt else { panic!("Expected INSERT") };
        let conflict = i.on_conflict.unwrap();
        assert_eq!(conflict.columns, vec!["id".to_string()]);
        assert!(matches!(conflict.action, ConflictAction::Update { filter: Some(_), .. }));

        let stmt = parse_with("INSERT INTO t (id) VALUES (1) ON CONFLICT DO NOTHING", &pg).unwrap();
        let Statement::Insert(i) = stmt else { panic!("Expected INSERT") };
        assert_eq!(i.on_conflict.unwrap().action, ConflictAction::Nothing);

        let err = parse_with(
            "INSERT INTO t (id) VALUES (1) ON DUPLICATE KEY UPDATE id = 2",
            &pg,
        )
        .unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { .. }));
        let err = parse_sql("INSERT INTO t (id) VALUES (1) ON CONFLICT DO NOTHING").unwrap_err();
        assert_eq!(err.code(), 1235);
    }

    #[test]
    fn test_parse_multi_table_update_and_delete() {
        let stmt = parse_sql(
            "UPDATE users u JOIN orders o ON o.user_id = u.id SET u.total = o.amount WHERE o.id = 1",
        )
        .unwrap();
        let Statement::Update(u) = stmt else { panic!("Expected UPDATE") };
        assert_eq!(u.alias.as_deref(), Some("u"));
        assert_eq!(u.joins.len(), 1);
        assert_eq!(u.joins[0].join_type, JoinType::Inner);
        assert_eq!(u.assignments[0].0, "total");

        let err = parse_sql("UPDATE users u JOIN orders o ON o.user_id = u.id SET o.amount = 0")
            .unwrap_err();
        assert_eq!(err.code(), 1235);
        let err = parse_sql("UPDATE users SET x.name = 'a'").unwrap_err();
        assert_eq!(err.code(), 1054);

        let pg = Dialect::latest(DialectKind::PostgreSql);
        let stmt = parse_with(
            "UPDATE users SET total = o.amount FROM orders o WHERE o.user_id = users.id",
            &pg,
        )
        .unwrap();
        let Statement::Update(u) = stmt else { panic!("Expected UPDATE") };
        assert_eq!(u.table, "users");
        assert_eq!(u.joins[0].join_type, JoinType::Cross);

        let mssql = Dialect::latest(DialectKind::SqlServer);
        let stmt = parse_with(
            "UPDATE u SET total = o.amount FROM users u INNER JOIN orders o ON o.user_id = u.id",
            &mssql,
        )
        .unwrap();
        let Statement::Update(u) = stmt else { panic!("Expected UPDATE") };
        assert_eq!(u.table, "users");
        assert_eq!(u.alias.as_deref(), Some("u"));
        assert_eq!(u.joins.len(), 1);

        let stmt = parse_sql("DELETE o FROM orders o LEFT JOIN users u ON u.id = o.user_id WHERE u.id IS NULL")
            .unwrap();
        let Statement::Delete(d) = stmt else { panic!("Expected DELETE") };
        assert_eq!(d.table, "orders");
        assert_eq!(d.joins[0].join_type, JoinType::Left);

        let stmt = parse_with("DELETE FROM orders USING users WHERE users.id = orders.user_id", &pg)
            .unwrap();
        let Statement::Delete(d) = stmt else { panic!("Expected DELETE") };
        assert_eq!(d.joins.len(), 1);

        let err = parse_sql("DELETE x FROM orders o JOIN users u ON u.id = o.user_id").unwrap_err();
        assert_eq!(err.code(), 1064);
        let err = parse_with("UPDATE users u JOIN orders o ON o.user_id = u.id SET total = 1", &pg)
            .unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { .. }));
    }

    #[test]
    fn test_parse_merge() {
        let sql = "MERGE INTO stock t USING deliveries d ON t.sku = d.sku \
                   WHEN MATCHED AND d.qty = 0 THEN DELETE \
                   WHEN MATCHED THEN UPDATE SET t.qty = t.qty + d.qty \
                   WHEN NOT MATCHED THEN INSERT (sku, qty) VALUES (d.sku, d.qty)";
        let pg = Dialect::latest(DialectKind::PostgreSql);
        let Statement::Merge(m) = parse_with(sql, &pg).unwrap() else { panic!("Expected MERGE") };
        assert_eq!(m.target, "stock");
        assert_eq!(m.alias.as_deref(), Some("t"));
        assert_eq!(m.clauses.len(), 3);
        assert!(m.clauses[0].matched && m.clauses[0].condition.is_some());
        assert_eq!(m.clauses[0].action, MergeAction::Delete);
        assert!(matches!(&m.clauses[1].action, MergeAction::Update(a) if a[0].0 == "qty"));
        assert!(!m.clauses[2].matched);

        let oracle = Dialect::latest(DialectKind::Oracle);
        let Statement::Merge(m) = parse_with(
            "MERGE INTO stock t USING deliveries d ON (t.sku = d.sku) \
             WHEN MATCHED THEN UPDATE SET t.qty = d.qty WHERE d.qty > 0",
            &oracle,
        )
        .unwrap() else {
            panic!("Expected MERGE")
        };
        assert!(m.clauses[0].condition.is_some());

        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { min_version: None, .. }));
        let err = parse_with(sql, &Dialect::new(DialectKind::PostgreSql, 14)).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { min_version: Some(15), .. }));
        let err = parse_with("MERGE INTO stock USING d ON 1 = 1", &pg).unwrap_err();
        assert_eq!(err.code(), 1064);
    }

    #[test]
    fn test_parse_window_functions() {
        let s = select(
            parse_sql(
                "SELECT ROW_NUMBER() OVER (PARTITION BY dept ORDER BY salary DESC) AS rn, \
                 SUM(salary) OVER (ORDER BY id ROWS BETWEEN 1 PRECEDING AND CURRENT ROW) FROM emp",
            )
            .unwrap(),
        );
        match &s.columns[0] {
            SelectColumn::Expr(Expr::Window { partition_by, order_by, frame, .. }, alias) => {
                assert_eq!(alias.as_deref(), Some("rn"));
                assert_eq!(partition_by.len(), 1);
                assert!(!order_by[0].asc);
                assert!(frame.is_none());
            }
            other => panic!("unexpected column: {:?}", other),
        }
        match &s.columns[1] {
            SelectColumn::Expr(Expr::Window { frame: Some(frame), .. }, _) => {
                assert!(!frame.range);
                assert_eq!(frame.start, FrameBound::Preceding(1));
                assert_eq!(frame.end, FrameBound::CurrentRow);
            }
            other => panic!("unexpected column: {:?}", other),
        }

        let sql = "SELECT RANK() OVER (ORDER BY id) FROM emp";
        let err = parse_with(sql, &Dialect::new(DialectKind::MySql, 5)).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { min_version: Some(8), .. }));
        let err = parse_sql("SELECT SUM(x) OVER (ORDER BY id RANGE 2 PRECEDING) FROM emp").unwrap_err();
        assert_eq!(err.code(), 1064);
    }

    #[test]
    fn test_parse_create_table() {
        let stmt = parse_sql(
            "CREATE TABLE users (id INT NOT NULL AUTO_INCREMENT PRIMARY KEY, \
             name VARCHAR(20) NOT NULL, price DECIMAL(10, 2), kind ENUM('a', 'b') DEFAULT 'a', \
             UNIQUE KEY ux_name (name))",
        )
        .unwrap();
        match stmt {
            Statement::CreateTable(c) => {
                assert_eq!(c.name, "users");
                assert_eq!(c.columns.len(), 4);
                assert!(c.columns[0].identity);
                assert_eq!(c.columns[1].size, Some(20));
                assert_eq!(c.columns[2].scale, Some(2));
                assert!(c.columns[3].domain.is_some());
                assert_eq!(c.primary_key, vec!["id".to_string()]);
                assert!(c.indexes[0].unique);
            }
            _ => panic!("Expected CREATE TABLE statement"),
        }
    }

    #[test]
    fn test_parse_transaction_statements() {
        assert_eq!(parse_sql("START TRANSACTION").unwrap(), Statement::Begin);
        assert_eq!(
            parse_sql("ROLLBACK TO SAVEPOINT s1").unwrap(),
            Statement::Rollback {
                savepoint: Some("s1".into())
            }
        );
        let mssql = Dialect::latest(DialectKind::SqlServer);
        assert_eq!(
            parse_with("SAVE TRANSACTION s1", &mssql).unwrap(),
            Statement::Savepoint("s1".into())
        );
    }

    #[test]
    fn test_syntax_error_carries_fragment() {
        let err = parse_sql("SELECT id FROM WHERE").unwrap_err();
        match err {
            SqlError::Syntax { fragment, .. } => assert_eq!(fragment, "WHERE"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_positional_placeholders_are_numbered() {
        let s = select(parse_sql("SELECT id FROM t WHERE a = ? AND b = ?").unwrap());
        let where_clause = s.where_clause.unwrap();
        let parts = where_clause.conjuncts();
        assert!(matches!(parts[1], Expr::BinaryOp { right, .. } if **right == Expr::Parameter("?2".into())));
    }

    #[test]
    fn test_pipes_follow_dialect() {
        let s = select(parse_sql("SELECT a || b FROM t").unwrap());
        assert!(matches!(
            &s.columns[0],
            SelectColumn::Expr(Expr::BinaryOp { op: BinaryOperator::Or, .. }, _)
        ));
        let pg = Dialect::latest(DialectKind::PostgreSql);
        let s = select(parse_with("SELECT a || b FROM t", &pg).unwrap());
        assert!(matches!(
            &s.columns[0],
            SelectColumn::Expr(Expr::BinaryOp { op: BinaryOperator::Concat, .. }, _)
        ));
    }
}
