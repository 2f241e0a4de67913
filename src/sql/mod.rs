/// Dialect-aware SQL engine front end
///
/// Architecture:
/// - Lexer: Tokenizes SQL strings under a dialect
/// - Parser: Builds AST from tokens, rejecting constructs the dialect lacks
/// - Resolver: Coerces values to column types
/// - Evaluator: Three-valued expression evaluation and functions
/// - Executor: Runs SELECT / UNION trees against the catalog
/// - Plan: Execution plan report

pub mod token;
pub mod lexer;
pub mod ast;
pub mod parser;
pub mod resolver;
pub mod evaluator;
pub mod executor;
pub mod plan;

pub use token::{Token, TokenType};
pub use lexer::Lexer;
pub use ast::{
    BinaryOperator, CreateTableStmt, Expr, InsertStmt, Query, SelectStmt, Statement, UnionChain,
    UnionStmt,
};
pub use parser::Parser;
pub use executor::{AccessPath, ExecStats, QueryExecutor, QueryResult, RowSet};
pub use evaluator::ExprEvaluator;
pub use resolver::{coerce, like};

use crate::dialect::Dialect;
use crate::error::{Result, SqlError};

/// Parse exactly one statement
pub fn parse(sql: &str, dialect: &Dialect) -> Result<Statement> {
    let tokens = Lexer::new(sql, dialect).tokenize()?;
    Parser::new(tokens, dialect).parse()
}

/// Parse a `;`-separated batch
pub fn parse_multi(sql: &str, dialect: &Dialect) -> Result<Vec<Statement>> {
    let tokens = Lexer::new(sql, dialect).tokenize()?;
    Parser::new(tokens, dialect).parse_statements()
}

/// Parse a query into its UNION parts; a plain SELECT is a chain of one
pub fn parse_union_chain(sql: &str, dialect: &Dialect) -> Result<UnionChain> {
    match parse(sql, dialect)? {
        Statement::Select(select) => Ok(UnionChain {
            parts: vec![select],
            all_flags: Vec::new(),
        }),
        Statement::Union(union) => Ok(UnionChain {
            parts: union.parts,
            all_flags: union.all_flags,
        }),
        other => Err(SqlError::syntax(
            "Expected a SELECT or UNION query",
            other.kind_name(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;

    #[test]
    fn test_union_chain() {
        let dialect = Dialect::latest(DialectKind::MySql);
        let chain = parse_union_chain(
            "SELECT 1 UNION SELECT 2 UNION ALL SELECT 3",
            &dialect,
        )
        .unwrap();
        assert_eq!(chain.parts.len(), 3);
        assert_eq!(chain.all_flags, vec![false, true]);

        let single = parse_union_chain("SELECT 1", &dialect).unwrap();
        assert_eq!(single.parts.len(), 1);
        assert!(single.all_flags.is_empty());

        assert!(parse_union_chain("DELETE FROM t", &dialect).is_err());
    }

    #[test]
    fn test_parse_multi() {
        let dialect = Dialect::latest(DialectKind::Sqlite);
        let stmts = parse_multi("SELECT 1; SELECT 2;", &dialect).unwrap();
        assert_eq!(stmts.len(), 2);
    }
}
