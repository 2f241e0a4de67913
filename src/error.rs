//! Error types for the sqlmem engine
//!
//! Every variant maps to a MySQL-family numeric code so that callers can
//! assert on exact codes regardless of the emulated dialect.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SqlError>;

/// Error taxonomy bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    DialectCapability,
    Constraint,
    Binding,
    TypeIncompatibility,
    Runtime,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SqlError {
    #[error("You have an error in your SQL syntax near '{fragment}': {message}")]
    Syntax { message: String, fragment: String },

    #[error("{construct} is not supported by {dialect} {version}{}", min_version_suffix(.min_version))]
    NotSupported {
        construct: String,
        dialect: String,
        version: u32,
        min_version: Option<u32>,
    },

    // Constraint errors
    #[error("Column '{0}' cannot be null")]
    ColumnCannotBeNull(String),

    #[error("Data too long for column '{column}'")]
    DataTooLong { column: String },

    #[error("Data truncated for column '{column}'")]
    DataTruncated { column: String },

    #[error("Data truncated for column '{column}': '{value}' is not a member of the domain")]
    InvalidDomainValue { column: String, value: String },

    #[error("Out of range value '{value}' for column '{column}'")]
    OutOfRange { column: String, value: String },

    #[error("Duplicate entry '{value}' for key '{key}'")]
    DuplicateEntry { value: String, key: String },

    #[error("Cannot add or update a child row: a foreign key constraint fails ({constraint})")]
    ForeignKeyViolation { constraint: String },

    #[error("Cannot delete or update a parent row: a foreign key constraint fails ({constraint})")]
    ReferencedRow { constraint: String },

    // Binding errors
    #[error("Unknown column '{column}' in '{clause}'")]
    UnknownColumn { column: String, clause: String },

    #[error("Parameter '{0}' was not bound")]
    ParameterNotFound(String),

    #[error("Invalid use of group function")]
    InvalidGroupFunction,

    // Schema lookups
    #[error("Table '{0}' doesn't exist")]
    TableNotFound(String),

    #[error("{kind} '{name}' already exists")]
    ObjectExists { kind: String, name: String },

    #[error("{kind} {name} does not exist")]
    ObjectNotFound { kind: String, name: String },

    // Procedures
    #[error("Incorrect number of arguments for PROCEDURE {0}")]
    ArgumentCount(String),

    #[error("Parameter '{0}' cannot be null")]
    ParameterCannotBeNull(String),

    #[error("OUT parameter '{0}' must be Output")]
    ParameterDirection(String),

    #[error("IN parameter '{0}' must be Input")]
    InputDirection(String),

    // Type incompatibility
    #[error("The used SELECT statements have a different number of columns")]
    ColumnCountMismatch,

    #[error("Illegal mix of types in UNION column {position}: {left} and {right}")]
    TypeIncompatible {
        position: usize,
        left: String,
        right: String,
    },

    #[error("Type error: {0}")]
    TypeError(String),

    // Runtime
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn min_version_suffix(min_version: &Option<u32>) -> String {
    match min_version {
        Some(v) => format!(" (requires version {} or later)", v),
        None => String::new(),
    }
}

impl SqlError {
    pub(crate) fn syntax(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        SqlError::Syntax {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    pub(crate) fn unknown_column(column: impl Into<String>) -> Self {
        SqlError::UnknownColumn {
            column: column.into(),
            clause: "field list".to_string(),
        }
    }

    /// Re-tag an unknown-column error with the clause it was raised from.
    pub(crate) fn in_clause(self, clause: &str) -> Self {
        match self {
            SqlError::UnknownColumn { column, .. } => SqlError::UnknownColumn {
                column,
                clause: clause.to_string(),
            },
            other => other,
        }
    }

    pub(crate) fn not_found(kind: &str, name: impl Into<String>) -> Self {
        SqlError::ObjectNotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    /// Numeric error code in the MySQL family convention
    pub fn code(&self) -> u32 {
        match self {
            SqlError::Syntax { .. } => 1064,
            SqlError::NotSupported { .. } => 1235,
            SqlError::ColumnCannotBeNull(_) => 1048,
            SqlError::DataTooLong { .. } => 1406,
            SqlError::DataTruncated { .. } => 1265,
            SqlError::InvalidDomainValue { .. } => 1265,
            SqlError::OutOfRange { .. } => 1264,
            SqlError::DuplicateEntry { .. } => 1062,
            SqlError::ForeignKeyViolation { .. } => 1452,
            SqlError::ReferencedRow { .. } => 1451,
            SqlError::UnknownColumn { .. } => 1054,
            SqlError::ParameterNotFound(_) => 1210,
            SqlError::InvalidGroupFunction => 1111,
            SqlError::TableNotFound(_) => 1146,
            SqlError::ObjectExists { .. } => 1050,
            SqlError::ObjectNotFound { .. } => 1305,
            SqlError::ArgumentCount(_) => 1318,
            SqlError::ParameterCannotBeNull(_) => 1048,
            SqlError::ParameterDirection(_) | SqlError::InputDirection(_) => 1414,
            SqlError::ColumnCountMismatch => 1222,
            SqlError::TypeIncompatible { .. } => 1267,
            SqlError::TypeError(_) => 1105,
            SqlError::DivisionByZero => 1365,
            SqlError::Transaction(_) => 1399,
            SqlError::InvalidArgument(_) => 1210,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlError::Syntax { .. } => ErrorKind::Syntax,
            SqlError::NotSupported { .. } => ErrorKind::DialectCapability,
            SqlError::ColumnCannotBeNull(_)
            | SqlError::DataTooLong { .. }
            | SqlError::DataTruncated { .. }
            | SqlError::InvalidDomainValue { .. }
            | SqlError::OutOfRange { .. }
            | SqlError::DuplicateEntry { .. }
            | SqlError::ForeignKeyViolation { .. }
            | SqlError::ReferencedRow { .. } => ErrorKind::Constraint,
            SqlError::UnknownColumn { .. }
            | SqlError::ParameterNotFound(_)
            | SqlError::InvalidGroupFunction
            | SqlError::TableNotFound(_)
            | SqlError::ObjectNotFound { .. }
            | SqlError::ArgumentCount(_)
            | SqlError::ParameterCannotBeNull(_)
            | SqlError::ParameterDirection(_)
            | SqlError::InputDirection(_) => ErrorKind::Binding,
            SqlError::ColumnCountMismatch | SqlError::TypeIncompatible { .. } => {
                ErrorKind::TypeIncompatibility
            }
            SqlError::ObjectExists { .. }
            | SqlError::TypeError(_)
            | SqlError::DivisionByZero
            | SqlError::Transaction(_)
            | SqlError::InvalidArgument(_) => ErrorKind::Runtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SqlError::ColumnCannotBeNull("email".into()).code(), 1048);
        assert_eq!(SqlError::ArgumentCount("sp".into()).code(), 1318);
        assert_eq!(SqlError::ParameterDirection("p".into()).code(), 1414);
        assert_eq!(SqlError::DataTooLong { column: "c".into() }.code(), 1406);
        assert_eq!(SqlError::DataTruncated { column: "c".into() }.code(), 1265);
    }

    #[test]
    fn test_not_supported_message_names_min_version() {
        let err = SqlError::NotSupported {
            construct: "WITH".into(),
            dialect: "MySQL".into(),
            version: 5,
            min_version: Some(8),
        };
        assert_eq!(
            err.to_string(),
            "WITH is not supported by MySQL 5 (requires version 8 or later)"
        );
        assert_eq!(err.kind(), ErrorKind::DialectCapability);
    }

    #[test]
    fn test_in_clause_retags_unknown_column() {
        let err = SqlError::unknown_column("total").in_clause("having clause");
        assert_eq!(err.to_string(), "Unknown column 'total' in 'having clause'");
    }
}
