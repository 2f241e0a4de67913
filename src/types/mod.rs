//! Runtime values and schema types for the SQL engine

mod table;
mod procedure;

pub use table::{ColumnDef, ColumnType, DefaultValue, DomainKind, ForeignKeyDef, IndexDef, ValueDomain};
pub use procedure::{
    normalize_param_name, ParamDef, Parameter, ParameterDirection, Parameters, ProcedureDef,
};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unified runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Text(String),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    /// Structured JSON document (object-typed columns)
    Json(serde_json::Value),
    /// Members of a SET-constrained column, in domain order
    Set(Vec<String>),
    /// Ordered list produced by `(a, b, c)` tokens and list parameters
    List(Vec<Value>),
}

/// A row of values addressed by column ordinal
pub type Row = Vec<Value>;

/// Coarse type family, used for UNION compatibility and sort fallbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeCategory {
    Null,
    Boolean,
    Numeric,
    Text,
    Temporal,
    Guid,
    Json,
    Collection,
}

impl TypeCategory {
    pub fn is_compatible_with(&self, other: TypeCategory) -> bool {
        use TypeCategory::*;
        match (self, other) {
            (Null, _) | (_, Null) => true,
            (Boolean, Numeric) | (Numeric, Boolean) => true,
            (Collection, Text) | (Text, Collection) => true,
            (a, b) => *a == b,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_) | Value::Decimal(_))
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            Value::Null => TypeCategory::Null,
            Value::Bool(_) => TypeCategory::Boolean,
            Value::Integer(_) | Value::Float(_) | Value::Decimal(_) => TypeCategory::Numeric,
            Value::Text(_) => TypeCategory::Text,
            Value::DateTime(_) => TypeCategory::Temporal,
            Value::Guid(_) => TypeCategory::Guid,
            Value::Json(_) => TypeCategory::Json,
            Value::Set(_) | Value::List(_) => TypeCategory::Collection,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Decimal(_) => "DECIMAL",
            Value::Bool(_) => "BOOLEAN",
            Value::Text(_) => "TEXT",
            Value::DateTime(_) => "DATETIME",
            Value::Guid(_) => "GUID",
            Value::Json(_) => "JSON",
            Value::Set(_) => "SET",
            Value::List(_) => "LIST",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Decimal(d) => d.round().to_i64(),
            Value::Float(f) => {
                let r = f.round();
                // i64::MAX as f64 rounds up to 2^63
                (r >= i64::MIN as f64 && r < i64::MAX as f64).then_some(r as i64)
            }
            Value::Text(s) => s.trim().parse::<i64>().ok().or_else(|| {
                Decimal::from_str(s.trim()).ok().and_then(|d| d.round().to_i64())
            }),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            Value::Float(f) => Decimal::from_f64(*f),
            Value::Bool(b) => Some(Decimal::from(*b as i64)),
            Value::Text(s) => Decimal::from_str(s.trim())
                .ok()
                .or_else(|| Decimal::from_scientific(s.trim()).ok()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQL truthiness; `None` means unknown
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::Decimal(d) => Some(!d.is_zero()),
            Value::Text(s) => Some(s.trim().parse::<f64>().map(|f| f != 0.0).unwrap_or(false)),
            _ => Some(true),
        }
    }

    /// Three-valued comparison: `None` when either side is null or the pair is incomparable
    pub fn sql_cmp(&self, other: &Value, case_insensitive: bool) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Float(_), _) | (_, Float(_)) if self.is_numeric() && other.is_numeric() => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Some(a.as_decimal()?.cmp(&b.as_decimal()?)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Bool(_), n) | (n, Bool(_)) if n.is_numeric() => {
                Some(self.as_decimal()?.cmp(&other.as_decimal()?))
            }
            (Text(a), Text(b)) => Some(compare_text(a, b, case_insensitive)),
            (Text(t), n) if n.is_numeric() => match Value::Text(t.clone()).as_decimal() {
                Some(d) => Some(d.cmp(&n.as_decimal()?)),
                None => Some(compare_text(t, &n.to_string(), case_insensitive)),
            },
            (n, Text(t)) if n.is_numeric() => match Value::Text(t.clone()).as_decimal() {
                Some(d) => Some(n.as_decimal()?.cmp(&d)),
                None => Some(compare_text(&n.to_string(), t, case_insensitive)),
            },
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (DateTime(a), Text(t)) => Some(a.cmp(&parse_datetime(t)?)),
            (Text(t), DateTime(b)) => Some(parse_datetime(t)?.cmp(b)),
            (Guid(a), Guid(b)) => Some(a.cmp(b)),
            (Guid(a), Text(t)) => Some(a.cmp(&Uuid::parse_str(t.trim()).ok()?)),
            (Text(t), Guid(b)) => Some(Uuid::parse_str(t.trim()).ok()?.cmp(b)),
            (Json(a), Json(b)) => (a == b).then_some(Ordering::Equal),
            (Set(_), _) | (_, Set(_)) | (Json(_), _) | (_, Json(_)) => {
                Some(compare_text(&self.to_string(), &other.to_string(), case_insensitive))
            }
            _ => None,
        }
    }

    pub fn sql_eq(&self, other: &Value, case_insensitive: bool) -> Option<bool> {
        self.sql_cmp(other, case_insensitive)
            .map(|ord| ord == Ordering::Equal)
    }

    /// Total order used by ORDER BY; null placement is the caller's choice
    pub fn sort_cmp(&self, other: &Value, case_insensitive: bool, nulls_high: bool) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return if nulls_high { Ordering::Greater } else { Ordering::Less },
            (false, true) => return if nulls_high { Ordering::Less } else { Ordering::Greater },
            _ => {}
        }
        self.sql_cmp(other, case_insensitive).unwrap_or_else(|| {
            self.category()
                .cmp(&other.category())
                .then_with(|| self.to_string().cmp(&other.to_string()))
        })
    }

    /// Hashable identity of a value: numerically equal values of different
    /// representations produce the same fragment.
    pub fn key_fragment(&self, fold_text: bool) -> String {
        match self {
            Value::Null => "\u{0}N".to_string(),
            Value::Integer(_) | Value::Decimal(_) | Value::Float(_) => match self.as_decimal() {
                Some(d) => format!("n:{}", d.normalize()),
                None => format!("f:{}", self),
            },
            Value::Bool(b) => format!("n:{}", *b as i64),
            Value::Text(s) if fold_text => format!("s:{}", s.to_lowercase()),
            Value::Text(s) => format!("s:{}", s),
            Value::DateTime(dt) => format!("d:{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Guid(g) => format!("g:{}", g.hyphenated()),
            Value::Json(j) => format!("j:{}", j),
            Value::Set(members) if fold_text => format!("s:{}", members.join(",").to_lowercase()),
            Value::Set(members) => format!("s:{}", members.join(",")),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.key_fragment(fold_text)).collect();
                format!("l:[{}]", parts.join("\u{1f}"))
            }
        }
    }
}

/// Concatenated key of several values (index keys, grouping, dedupe)
pub fn row_key(values: &[Value], fold_text: bool) -> String {
    let mut key = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            key.push('\u{1e}');
        }
        key.push_str(&v.key_fragment(fold_text));
    }
    key
}

fn compare_text(a: &str, b: &str, case_insensitive: bool) -> Ordering {
    if case_insensitive {
        a.to_lowercase().cmp(&b.to_lowercase())
    } else {
        a.cmp(b)
    }
}

/// Parse the date/time literal shapes accepted by the emulated engines
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Guid(g) => write!(f, "{}", g.hyphenated()),
            Value::Json(j) => write!(f, "{}", j),
            Value::Set(members) => write!(f, "{}", members.join(",")),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_comparison() {
        let one = Value::Integer(1);
        let one_dec = Value::Decimal(Decimal::from_str("1.0").unwrap());
        assert_eq!(one.sql_cmp(&one_dec, true), Some(Ordering::Equal));
        assert_eq!(Value::Float(2.5).sql_cmp(&one, true), Some(Ordering::Greater));
        assert_eq!(one.key_fragment(true), one_dec.key_fragment(true));
    }

    #[test]
    fn test_null_is_unknown() {
        assert_eq!(Value::Null.sql_eq(&Value::Null, true), None);
        assert_eq!(Value::Integer(1).sql_cmp(&Value::Null, true), None);
    }

    #[test]
    fn test_text_collation() {
        let a = Value::from("John");
        let b = Value::from("john");
        assert_eq!(a.sql_eq(&b, true), Some(true));
        assert_eq!(a.sql_eq(&b, false), Some(false));
        assert_eq!(a.key_fragment(true), b.key_fragment(true));
    }

    #[test]
    fn test_sort_places_nulls() {
        let v = Value::Integer(5);
        assert_eq!(Value::Null.sort_cmp(&v, true, false), Ordering::Less);
        assert_eq!(Value::Null.sort_cmp(&v, true, true), Ordering::Greater);
    }

    #[test]
    fn test_parse_datetime_shapes() {
        assert!(parse_datetime("2024-01-02").is_some());
        assert!(parse_datetime("2024-01-02 10:11:12").is_some());
        assert!(parse_datetime("2024-01-02T10:11:12.5").is_some());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_text_compares_numerically_with_numbers() {
        assert_eq!(
            Value::from("10").sql_cmp(&Value::Integer(9), true),
            Some(Ordering::Greater)
        );
    }
}
