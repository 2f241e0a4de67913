/// Column, index and foreign-key definitions for in-memory tables
use super::Value;

/// Canonical value-type tag of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Decimal,
    Float,
    Text,
    Boolean,
    DateTime,
    Guid,
    /// Structured JSON ("object") column
    Json,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::Float => "FLOAT",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Guid => "GUID",
            ColumnType::Json => "JSON",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Decimal | ColumnType::Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    /// Exactly one member
    Enum,
    /// Comma-separated subset of the members
    Set,
}

/// Allowed values of an ENUM or SET column
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDomain {
    pub kind: DomainKind,
    pub members: Vec<String>,
}

/// Default applied when an INSERT omits the column
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Literal(Value),
    CurrentTimestamp,
    NewGuid,
}

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    /// Position in the row (0-indexed), assigned when added to a table
    pub position: usize,
    pub nullable: bool,
    /// Auto-increment column; values start at 1 per table and are never reused
    pub identity: bool,
    /// Maximum string length in characters
    pub size: Option<usize>,
    /// Maximum number of fractional digits
    pub scale: Option<u32>,
    pub domain: Option<ValueDomain>,
    pub default: Option<DefaultValue>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            position: 0,
            nullable: true,
            identity: false,
            size: None,
            scale: None,
            domain: None,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Identity columns are implicitly NOT NULL
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.nullable = false;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_enum(mut self, members: &[&str]) -> Self {
        self.domain = Some(ValueDomain {
            kind: DomainKind::Enum,
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn with_set(mut self, members: &[&str]) -> Self {
        self.domain = Some(ValueDomain {
            kind: DomainKind::Set,
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    pub fn with_generator(mut self, generator: DefaultValue) -> Self {
        self.default = Some(generator);
        self
    }
}

/// Index definition; the key is the concatenation of the key-column values
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    /// Covering columns stored alongside the key
    pub include: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            include: Vec::new(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn include(mut self, columns: &[&str]) -> Self {
        self.include = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Foreign key from this table's `columns` to `ref_table(ref_columns)`; no cascade
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDef {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

impl ForeignKeyDef {
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        ref_table: impl Into<String>,
        ref_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}
