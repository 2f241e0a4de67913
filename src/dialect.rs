//! Dialect descriptor
//!
//! A `Dialect` is a plain capability table built from an engine identity and a
//! version number. Parser and executor consult its fields; nothing ever
//! branches on the concrete engine kind outside this module.

use crate::error::{Result, SqlError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Emulated engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Db2,
    MySql,
    PostgreSql,
    Oracle,
    Sqlite,
    SqlServer,
}

impl DialectKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            DialectKind::Db2 => "DB2",
            DialectKind::MySql => "MySQL",
            DialectKind::PostgreSql => "PostgreSQL",
            DialectKind::Oracle => "Oracle",
            DialectKind::Sqlite => "SQLite",
            DialectKind::SqlServer => "SQL Server",
        }
    }

    /// Version used when a configuration does not name one
    pub fn default_version(&self) -> u32 {
        match self {
            DialectKind::Db2 => 11,
            DialectKind::MySql => 8,
            DialectKind::PostgreSql => 16,
            DialectKind::Oracle => 19,
            DialectKind::Sqlite => 3,
            DialectKind::SqlServer => 2022,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Version-gated syntax features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    WithCte,
    Merge,
    WindowFunctions,
    Limit,
    LimitComma,
    OffsetFetch,
    FetchFirst,
    Top,
    OnConflict,
    OnDuplicateKeyUpdate,
    UpdateJoin,
    UpdateFrom,
    DeleteJoin,
    DeleteUsing,
    Returning,
    NullsOrdering,
    NullSafeEq,
    JsonArrows,
    IndexHints,
    ReleaseSavepoint,
}

impl Feature {
    pub fn construct(&self) -> &'static str {
        match self {
            Feature::WithCte => "WITH (common table expressions)",
            Feature::Merge => "MERGE",
            Feature::WindowFunctions => "window functions (OVER)",
            Feature::Limit => "LIMIT",
            Feature::LimitComma => "LIMIT offset, count",
            Feature::OffsetFetch => "OFFSET ... FETCH",
            Feature::FetchFirst => "FETCH FIRST",
            Feature::Top => "TOP",
            Feature::OnConflict => "ON CONFLICT",
            Feature::OnDuplicateKeyUpdate => "ON DUPLICATE KEY UPDATE",
            Feature::UpdateJoin => "UPDATE ... JOIN",
            Feature::UpdateFrom => "UPDATE ... FROM",
            Feature::DeleteJoin => "DELETE ... FROM ... JOIN",
            Feature::DeleteUsing => "DELETE ... USING",
            Feature::Returning => "RETURNING",
            Feature::NullsOrdering => "NULLS FIRST/LAST",
            Feature::NullSafeEq => "<=>",
            Feature::JsonArrows => "JSON operators -> and ->>",
            Feature::IndexHints => "index hints",
            Feature::ReleaseSavepoint => "RELEASE SAVEPOINT",
        }
    }
}

/// Minimum version supporting `feature`, or `None` when the family never does.
fn feature_floor(kind: DialectKind, feature: Feature) -> Option<u32> {
    use DialectKind::*;
    use Feature::*;

    match (kind, feature) {
        (MySql, WithCte) | (MySql, WindowFunctions) => Some(8),
        (MySql, Limit) | (MySql, LimitComma) | (MySql, OffsetFetch) => Some(0),
        (MySql, NullSafeEq) | (MySql, IndexHints) | (MySql, ReleaseSavepoint) => Some(0),
        (MySql, JsonArrows) => Some(5),
        (MySql, OnDuplicateKeyUpdate) | (MySql, UpdateJoin) | (MySql, DeleteJoin) => Some(0),
        (MySql, _) => None,

        (PostgreSql, WithCte) => Some(6),
        (PostgreSql, WindowFunctions) => Some(8),
        (PostgreSql, Merge) => Some(15),
        (PostgreSql, OnConflict) | (PostgreSql, JsonArrows) => Some(9),
        (PostgreSql, UpdateFrom) | (PostgreSql, DeleteUsing) => Some(0),
        (PostgreSql, Limit) | (PostgreSql, OffsetFetch) | (PostgreSql, FetchFirst) => Some(0),
        (PostgreSql, Returning) | (PostgreSql, NullsOrdering) | (PostgreSql, ReleaseSavepoint) => {
            Some(0)
        }
        (PostgreSql, _) => None,

        (Oracle, WithCte) | (Oracle, Merge) => Some(9),
        (Oracle, WindowFunctions) => Some(8),
        (Oracle, OffsetFetch) | (Oracle, FetchFirst) => Some(12),
        (Oracle, NullsOrdering) | (Oracle, ReleaseSavepoint) => Some(0),
        (Oracle, _) => None,

        (Db2, WithCte) | (Db2, WindowFunctions) => Some(8),
        (Db2, Merge) => Some(9),
        (Db2, OffsetFetch) => Some(11),
        (Db2, FetchFirst) | (Db2, NullSafeEq) | (Db2, NullsOrdering) | (Db2, ReleaseSavepoint) => {
            Some(0)
        }
        (Db2, _) => None,

        (Sqlite, WithCte) | (Sqlite, WindowFunctions) => Some(3),
        (Sqlite, Limit) | (Sqlite, LimitComma) | (Sqlite, OffsetFetch) => Some(0),
        (Sqlite, OnConflict) | (Sqlite, NullsOrdering) | (Sqlite, Returning) => Some(3),
        (Sqlite, JsonArrows) | (Sqlite, ReleaseSavepoint) | (Sqlite, UpdateFrom) => Some(3),
        (Sqlite, _) => None,

        (SqlServer, WithCte) | (SqlServer, WindowFunctions) => Some(2005),
        (SqlServer, Merge) => Some(2008),
        (SqlServer, OffsetFetch) => Some(2012),
        (SqlServer, Top) | (SqlServer, UpdateFrom) | (SqlServer, DeleteJoin) => Some(0),
        (SqlServer, _) => None,
    }
}

/// How a quote character inside a string literal is escaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEscapeStyle {
    /// `\'` (doubled quotes are accepted too)
    Backslash,
    /// `''`
    Doubled,
}

/// Capability table for one (engine, version) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Dialect {
    pub kind: DialectKind,
    pub version: u32,
    pub allows_backtick_identifiers: bool,
    pub allows_double_quote_identifiers: bool,
    pub allows_bracket_identifiers: bool,
    pub string_quotes: &'static [char],
    pub string_escape: StringEscapeStyle,
    pub allows_hash_comments: bool,
    pub parameter_prefixes: &'static [char],
    pub text_comparison_case_insensitive: bool,
    pub like_case_insensitive: bool,
    /// `||` concatenates instead of meaning OR
    pub pipes_as_concat: bool,
    /// NULL sorts after every value in ascending order
    pub nulls_sort_high: bool,
    pub division_by_zero_is_null: bool,
    pub offset_fetch_requires_order_by: bool,
    /// An upsert that updates reports two affected rows instead of one
    pub upsert_update_counts_twice: bool,
    pub null_substitute_functions: &'static [&'static str],
    pub date_add_functions: &'static [&'static str],
}

impl Dialect {
    pub fn new(kind: DialectKind, version: u32) -> Self {
        use DialectKind::*;

        let (backtick, double_quote, bracket) = match kind {
            MySql | Sqlite => (true, false, false),
            PostgreSql | Db2 => (false, true, false),
            Oracle | SqlServer => (false, true, true),
        };
        let string_quotes: &'static [char] = match kind {
            MySql | Sqlite => &['\'', '"'],
            _ => &['\''],
        };
        let null_substitute_functions: &'static [&'static str] = match kind {
            MySql | Sqlite => &["IFNULL"],
            Oracle => &["NVL"],
            Db2 => &["NVL", "VALUE"],
            SqlServer => &["ISNULL"],
            PostgreSql => &[],
        };
        let date_add_functions: &'static [&'static str] = match kind {
            MySql => &["DATE_ADD", "TIMESTAMPADD"],
            Sqlite => &["DATE_ADD"],
            SqlServer => &["DATEADD"],
            _ => &[],
        };

        Self {
            kind,
            version,
            allows_backtick_identifiers: backtick,
            allows_double_quote_identifiers: double_quote,
            allows_bracket_identifiers: bracket,
            string_quotes,
            string_escape: if kind == MySql {
                StringEscapeStyle::Backslash
            } else {
                StringEscapeStyle::Doubled
            },
            allows_hash_comments: matches!(kind, MySql | Sqlite),
            parameter_prefixes: &['@', ':', '?'],
            text_comparison_case_insensitive: true,
            like_case_insensitive: true,
            pipes_as_concat: !matches!(kind, MySql | SqlServer),
            nulls_sort_high: matches!(kind, PostgreSql | Oracle | Db2),
            division_by_zero_is_null: matches!(kind, MySql | Sqlite),
            offset_fetch_requires_order_by: kind == SqlServer,
            upsert_update_counts_twice: kind == MySql,
            null_substitute_functions,
            date_add_functions,
        }
    }

    /// Dialect at its family's default version
    pub fn latest(kind: DialectKind) -> Self {
        Self::new(kind, kind.default_version())
    }

    pub fn name(&self) -> &'static str {
        self.kind.display_name()
    }

    pub fn supports(&self, feature: Feature) -> bool {
        feature_floor(self.kind, feature).map_or(false, |floor| self.version >= floor)
    }

    /// Fail with a dialect-capability error unless `feature` is available.
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            return Ok(());
        }
        Err(SqlError::NotSupported {
            construct: feature.construct().to_string(),
            dialect: self.name().to_string(),
            version: self.version,
            min_version: feature_floor(self.kind, feature),
        })
    }

    pub fn supports_with_cte(&self) -> bool {
        self.supports(Feature::WithCte)
    }

    pub fn supports_merge(&self) -> bool {
        self.supports(Feature::Merge)
    }

    pub fn supports_offset_fetch(&self) -> bool {
        self.supports(Feature::OffsetFetch)
    }

    pub fn supports_fetch_first(&self) -> bool {
        self.supports(Feature::FetchFirst)
    }

    pub fn supports_window_functions(&self) -> bool {
        self.supports(Feature::WindowFunctions)
    }

    pub fn supports_on_conflict_clause(&self) -> bool {
        self.supports(Feature::OnConflict)
    }

    pub fn supports_on_duplicate_key_update(&self) -> bool {
        self.supports(Feature::OnDuplicateKeyUpdate)
    }

    pub fn supports_update_join(&self) -> bool {
        self.supports(Feature::UpdateJoin)
    }

    pub fn supports_update_from(&self) -> bool {
        self.supports(Feature::UpdateFrom)
    }

    pub fn supports_release_savepoint(&self) -> bool {
        self.supports(Feature::ReleaseSavepoint)
    }

    pub fn supports_top(&self) -> bool {
        self.supports(Feature::Top)
    }

    pub fn supports_limit(&self) -> bool {
        self.supports(Feature::Limit)
    }

    pub fn supports_limit_comma(&self) -> bool {
        self.supports(Feature::LimitComma)
    }

    pub fn supports_nulls_ordering(&self) -> bool {
        self.supports(Feature::NullsOrdering)
    }

    pub fn supports_returning(&self) -> bool {
        self.supports(Feature::Returning)
    }

    pub fn supports_null_safe_eq(&self) -> bool {
        self.supports(Feature::NullSafeEq)
    }

    pub fn supports_json_arrows(&self) -> bool {
        self.supports(Feature::JsonArrows)
    }

    pub fn supports_index_hints(&self) -> bool {
        self.supports(Feature::IndexHints)
    }

    pub fn is_string_quote(&self, ch: char) -> bool {
        self.string_quotes.contains(&ch)
    }

    pub fn is_parameter_prefix(&self, ch: char) -> bool {
        self.parameter_prefixes.contains(&ch)
    }

    /// Closing delimiter for a quoted identifier opened with `open`
    pub fn identifier_quote(&self, open: char) -> Option<char> {
        match open {
            '`' if self.allows_backtick_identifiers => Some('`'),
            '"' if self.allows_double_quote_identifiers && !self.is_string_quote('"') => Some('"'),
            '[' if self.allows_bracket_identifiers => Some(']'),
            _ => None,
        }
    }

    pub fn is_null_substitute(&self, function: &str) -> bool {
        self.null_substitute_functions
            .iter()
            .any(|f| f.eq_ignore_ascii_case(function))
    }

    pub fn is_date_add_function(&self, function: &str) -> bool {
        self.date_add_functions
            .iter()
            .any(|f| f.eq_ignore_ascii_case(function))
    }

    /// Fold a text value for comparison under this dialect's collation
    pub fn fold<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        if self.text_comparison_case_insensitive {
            std::borrow::Cow::Owned(text.to_lowercase())
        } else {
            std::borrow::Cow::Borrowed(text)
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::latest(DialectKind::MySql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cte_gated_by_version() {
        assert!(!Dialect::new(DialectKind::MySql, 5).supports_with_cte());
        assert!(Dialect::new(DialectKind::MySql, 8).supports_with_cte());
        assert!(Dialect::new(DialectKind::Oracle, 9).supports_with_cte());
        assert!(!Dialect::new(DialectKind::SqlServer, 2000).supports_with_cte());
    }

    #[test]
    fn test_merge_support() {
        assert!(!Dialect::latest(DialectKind::MySql).supports_merge());
        assert!(!Dialect::new(DialectKind::PostgreSql, 14).supports_merge());
        assert!(Dialect::new(DialectKind::PostgreSql, 15).supports_merge());
        assert!(Dialect::new(DialectKind::SqlServer, 2008).supports_merge());
    }

    #[test]
    fn test_multi_table_dml_support() {
        let mysql = Dialect::latest(DialectKind::MySql);
        assert!(mysql.supports_update_join() && !mysql.supports_update_from());
        assert!(mysql.supports_on_duplicate_key_update());
        assert!(!mysql.supports_on_conflict_clause());

        let pg = Dialect::latest(DialectKind::PostgreSql);
        assert!(pg.supports_update_from() && !pg.supports_update_join());
        assert!(pg.supports(Feature::DeleteUsing) && !pg.supports(Feature::DeleteJoin));
        assert!(!pg.upsert_update_counts_twice);

        let oracle = Dialect::latest(DialectKind::Oracle);
        assert!(!oracle.supports_update_from() && !oracle.supports_update_join());
        assert!(Dialect::latest(DialectKind::SqlServer).supports(Feature::DeleteJoin));
    }

    #[test]
    fn test_require_reports_min_version() {
        let err = Dialect::new(DialectKind::Oracle, 11)
            .require(Feature::OffsetFetch)
            .unwrap_err();
        match err {
            SqlError::NotSupported { min_version, version, .. } => {
                assert_eq!(min_version, Some(12));
                assert_eq!(version, 11);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_identifier_quotes() {
        let mysql = Dialect::latest(DialectKind::MySql);
        assert_eq!(mysql.identifier_quote('`'), Some('`'));
        assert_eq!(mysql.identifier_quote('"'), None);

        let pg = Dialect::latest(DialectKind::PostgreSql);
        assert_eq!(pg.identifier_quote('"'), Some('"'));
        assert_eq!(pg.identifier_quote('['), None);

        let mssql = Dialect::latest(DialectKind::SqlServer);
        assert_eq!(mssql.identifier_quote('['), Some(']'));
    }

    #[test]
    fn test_null_substitutes_and_date_add() {
        assert!(Dialect::latest(DialectKind::MySql).is_null_substitute("ifnull"));
        assert!(Dialect::latest(DialectKind::Oracle).is_null_substitute("NVL"));
        assert!(!Dialect::latest(DialectKind::PostgreSql).is_null_substitute("IFNULL"));
        assert!(Dialect::latest(DialectKind::MySql).is_date_add_function("date_add"));
        assert!(!Dialect::latest(DialectKind::Oracle).is_date_add_function("DATE_ADD"));
    }

    #[test]
    fn test_release_savepoint_unsupported_on_sql_server() {
        assert!(!Dialect::latest(DialectKind::SqlServer).supports_release_savepoint());
        assert!(Dialect::latest(DialectKind::Sqlite).supports_release_savepoint());
    }
}
