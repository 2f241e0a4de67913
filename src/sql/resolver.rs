/// Value resolver - turns literal/parameter tokens into typed values and
/// applies column constraints (nullability, size, scale, enum/set domains)
use crate::dialect::Dialect;
use crate::error::{Result, SqlError};
use crate::types::{
    parse_datetime, ColumnDef, ColumnType, DomainKind, Parameters, Value,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

/// ⚡ Compiled LIKE pattern for fast matching
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    /// Exact match: "abc" (no wildcards)
    Exact(String),
    /// Prefix match: "abc%"
    Prefix(String),
    /// Suffix match: "%abc"
    Suffix(String),
    /// Contains match: "%abc%"
    Contains(String),
    /// Complex pattern with multiple wildcards
    Complex(Vec<PatternSegment>),
}

#[derive(Debug, Clone)]
pub enum PatternSegment {
    Literal(Vec<char>),
    AnyChar,  // _
    AnyChars, // %
}

impl CompiledPattern {
    /// Compile a LIKE pattern; `\%` and `\_` match the literal character
    pub fn compile(pattern: &str) -> Self {
        let escaped = pattern.contains('\\');
        let has_wild = |s: &str| s.contains('%') || s.contains('_');

        if !escaped {
            // Fast path: no wildcards
            if !has_wild(pattern) {
                return CompiledPattern::Exact(pattern.to_string());
            }
            let inner = pattern.trim_matches('%');
            if !has_wild(inner) {
                let leading = pattern.starts_with('%');
                let trailing = pattern.ends_with('%') && pattern.len() > 1;
                let leading_run = pattern.len() - pattern.trim_start_matches('%').len();
                let trailing_run = pattern.len() - pattern.trim_end_matches('%').len();
                if leading_run <= 1 && trailing_run <= 1 {
                    match (leading, trailing) {
                        (false, true) => return CompiledPattern::Prefix(inner.to_string()),
                        (true, false) => return CompiledPattern::Suffix(inner.to_string()),
                        (true, true) if !inner.is_empty() => {
                            return CompiledPattern::Contains(inner.to_string())
                        }
                        _ => {}
                    }
                }
            }
        }

        // Complex pattern: parse into segments
        let mut segments = Vec::new();
        let mut current_literal = Vec::new();
        let mut chars = pattern.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(next) => current_literal.push(next),
                    None => current_literal.push('\\'),
                },
                '%' | '_' => {
                    if !current_literal.is_empty() {
                        segments.push(PatternSegment::Literal(std::mem::take(&mut current_literal)));
                    }
                    segments.push(if ch == '%' {
                        PatternSegment::AnyChars
                    } else {
                        PatternSegment::AnyChar
                    });
                }
                c => current_literal.push(c),
            }
        }

        if !current_literal.is_empty() {
            segments.push(PatternSegment::Literal(current_literal));
        }

        CompiledPattern::Complex(segments)
    }

    /// Match against a compiled pattern (both sides already folded by the caller)
    #[inline]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            CompiledPattern::Exact(pattern) => text == pattern,
            CompiledPattern::Prefix(prefix) => text.starts_with(prefix.as_str()),
            CompiledPattern::Suffix(suffix) => text.ends_with(suffix.as_str()),
            CompiledPattern::Contains(substring) => text.contains(substring.as_str()),
            CompiledPattern::Complex(segments) => {
                let text_chars: Vec<char> = text.chars().collect();
                Self::match_segments(&text_chars, segments, 0, 0)
            }
        }
    }

    fn match_segments(text: &[char], segments: &[PatternSegment], ti: usize, si: usize) -> bool {
        // All segments matched
        if si >= segments.len() {
            return ti >= text.len();
        }

        match &segments[si] {
            PatternSegment::AnyChars => {
                // Try matching 0 or more characters
                (ti..=text.len()).any(|start| Self::match_segments(text, segments, start, si + 1))
            }
            PatternSegment::AnyChar => {
                ti < text.len() && Self::match_segments(text, segments, ti + 1, si + 1)
            }
            PatternSegment::Literal(literal) => {
                if ti + literal.len() > text.len() {
                    return false;
                }
                text[ti..ti + literal.len()] == literal[..]
                    && Self::match_segments(text, segments, ti + literal.len(), si + 1)
            }
        }
    }
}

/// Standalone LIKE predicate: `%` matches any run, `_` exactly one character
pub fn like(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        CompiledPattern::compile(&pattern.to_lowercase()).matches(&text.to_lowercase())
    } else {
        CompiledPattern::compile(pattern).matches(text)
    }
}

/// Numeric literal text: integers stay exact, fractions become decimals,
/// exponents become floats.
pub(crate) fn parse_number(text: &str) -> Option<Value> {
    if text.contains(['e', 'E']) {
        return text.parse::<f64>().ok().map(Value::Float);
    }
    if text.contains('.') {
        return Decimal::from_str(text)
            .ok()
            .map(Value::Decimal)
            .or_else(|| text.parse::<f64>().ok().map(Value::Float));
    }
    text.parse::<i64>()
        .ok()
        .map(Value::Integer)
        .or_else(|| Decimal::from_str(text).ok().map(Value::Decimal))
        .or_else(|| text.parse::<f64>().ok().map(Value::Float))
}

/// Resolve a raw token (`@p`, `'text'`, `12.5`, `null`, `(1, 2)`) against a
/// declared type.
///
/// `column` carries the constraints of the column the value is bound for.
/// Without one, only the declared type and nullability apply.
pub fn resolve(
    token: &str,
    declared: ColumnType,
    nullable: bool,
    params: &Parameters,
    column: Option<&ColumnDef>,
    dialect: &Dialect,
) -> Result<Value> {
    let token = token.trim();

    // (a, b, c) resolves element-wise
    if token.starts_with('(') && token.ends_with(')') && token.len() >= 2 {
        let items = split_list(&token[1..token.len() - 1]);
        let values = items
            .iter()
            .filter(|item| !item.trim().is_empty())
            .map(|item| resolve(item, declared, true, params, None, dialect))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::List(values));
    }

    let raw = if token.starts_with(|c: char| dialect.is_parameter_prefix(c)) {
        params
            .value(token)
            .cloned()
            .ok_or_else(|| SqlError::ParameterNotFound(token.to_string()))?
    } else if token.eq_ignore_ascii_case("null") {
        Value::Null
    } else if token.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if token.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else if let Some(text) = unquote(token, dialect) {
        Value::Text(text)
    } else if let Some(number) = parse_number(token) {
        number
    } else {
        Value::Text(token.to_string())
    };

    let fallback;
    let column = match column {
        Some(c) => c,
        None => {
            let mut def = ColumnDef::new("value", declared);
            def.nullable = nullable;
            fallback = def;
            &fallback
        }
    };
    if raw.is_null() && !nullable {
        return Err(SqlError::ColumnCannotBeNull(column.name.clone()));
    }
    coerce(raw, column, dialect)
}

/// Convert `value` to the column's type and enforce its constraints
pub fn coerce(value: Value, column: &ColumnDef, dialect: &Dialect) -> Result<Value> {
    if value.is_null() {
        if !column.nullable {
            return Err(SqlError::ColumnCannotBeNull(column.name.clone()));
        }
        return Ok(Value::Null);
    }

    let mismatch = |v: &Value| {
        SqlError::TypeError(format!(
            "cannot store {} value '{}' in {} column '{}'",
            v.type_name(),
            v,
            column.col_type.name(),
            column.name
        ))
    };

    let converted = match column.col_type {
        ColumnType::Integer => match &value {
            Value::Integer(_) => value,
            Value::Bool(b) => Value::Integer(*b as i64),
            Value::Text(s) if s.trim().is_empty() => return Err(mismatch(&value)),
            other if other.is_numeric() => {
                Value::Integer(other.as_i64().ok_or_else(|| SqlError::OutOfRange {
                    column: column.name.clone(),
                    value: other.to_string(),
                })?)
            }
            other => Value::Integer(other.as_i64().ok_or_else(|| mismatch(other))?),
        },
        ColumnType::Decimal => {
            let d = match &value {
                Value::Decimal(d) => *d,
                Value::Float(f) => Decimal::from_f64(*f).ok_or_else(|| mismatch(&value))?,
                other => other.as_decimal().ok_or_else(|| mismatch(other))?,
            };
            if let Some(scale) = column.scale {
                if d.normalize().scale() > scale {
                    return Err(SqlError::DataTruncated {
                        column: column.name.clone(),
                    });
                }
            }
            Value::Decimal(d)
        }
        ColumnType::Float => match &value {
            Value::Float(_) => value,
            other => Value::Float(other.as_f64().ok_or_else(|| mismatch(other))?),
        },
        ColumnType::Boolean => match &value {
            Value::Bool(_) => value,
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "t" => Value::Bool(true),
                "false" | "0" | "no" | "n" | "f" => Value::Bool(false),
                _ => return Err(mismatch(&value)),
            },
            other if other.is_numeric() => Value::Bool(other.truthiness() == Some(true)),
            other => return Err(mismatch(other)),
        },
        ColumnType::DateTime => match &value {
            Value::DateTime(_) => value,
            Value::Text(s) => Value::DateTime(parse_datetime(s).ok_or_else(|| mismatch(&value))?),
            other => return Err(mismatch(other)),
        },
        ColumnType::Guid => match &value {
            Value::Guid(_) => value,
            Value::Text(s) => {
                Value::Guid(Uuid::parse_str(s.trim()).map_err(|_| mismatch(&value))?)
            }
            other => return Err(mismatch(other)),
        },
        // Best effort: malformed JSON stays a plain string
        ColumnType::Json => match value {
            Value::Text(s) => match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json) if json.is_object() || json.is_array() => Value::Json(json),
                _ => Value::Text(s),
            },
            other => other,
        },
        ColumnType::Text => match &column.domain {
            Some(domain) => {
                let requested: Vec<String> = match &value {
                    Value::Set(members) => members.clone(),
                    Value::List(items) => items.iter().map(|v| v.to_string()).collect(),
                    other if domain.kind == DomainKind::Set => other
                        .to_string()
                        .split(',')
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect(),
                    other => vec![other.to_string()],
                };
                let find = |member: &str| {
                    domain
                        .members
                        .iter()
                        .position(|m| dialect.fold(m) == dialect.fold(member))
                        .ok_or_else(|| SqlError::InvalidDomainValue {
                            column: column.name.clone(),
                            value: member.to_string(),
                        })
                };
                match domain.kind {
                    DomainKind::Enum => {
                        if requested.len() != 1 {
                            return Err(SqlError::InvalidDomainValue {
                                column: column.name.clone(),
                                value: value.to_string(),
                            });
                        }
                        Value::Text(domain.members[find(&requested[0])?].clone())
                    }
                    DomainKind::Set => {
                        let mut positions = requested
                            .iter()
                            .map(|m| find(m))
                            .collect::<Result<Vec<_>>>()?;
                        positions.sort_unstable();
                        positions.dedup();
                        Value::Set(positions.into_iter().map(|i| domain.members[i].clone()).collect())
                    }
                }
            }
            None => match value {
                Value::Text(_) => value,
                other => Value::Text(other.to_string()),
            },
        },
    };

    if let (Some(size), Value::Text(s)) = (column.size, &converted) {
        if s.chars().count() > size {
            return Err(SqlError::DataTooLong {
                column: column.name.clone(),
            });
        }
    }

    Ok(converted)
}

/// Strip dialect string quotes, undoing doubled-quote and backslash escapes
fn unquote(token: &str, dialect: &Dialect) -> Option<String> {
    let first = token.chars().next()?;
    if !dialect.is_string_quote(first) || token.len() < 2 || !token.ends_with(first) {
        return None;
    }
    let inner = &token[1..token.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == first && chars.peek() == Some(&first) {
            chars.next();
            out.push(first);
        } else if c == '\\' && dialect.string_escape == crate::dialect::StringEscapeStyle::Backslash
        {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Split `a, 'b,c', d` on top-level commas
fn split_list(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in text.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                ',' if depth == 0 => items.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }
    items.push(current);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;

    fn mysql() -> Dialect {
        Dialect::latest(DialectKind::MySql)
    }

    #[test]
    fn test_like_patterns() {
        assert!(like("John", "J%", true));
        assert!(like("john", "J%", true));
        assert!(!like("john", "J%", false));
        assert!(like("abc", "a_c", true));
        assert!(like("abc", "%b%", true));
        assert!(like("a%c", "a\\%c", true));
        assert!(!like("abc", "a\\%c", true));
        assert!(like("banana", "b%n%a", true));
        assert!(!like("ab", "a_c", true));
    }

    #[test]
    fn test_resolve_parameter() {
        let params = Parameters::new().add("@id", 7i64);
        let v = resolve("@id", ColumnType::Integer, false, &params, None, &mysql()).unwrap();
        assert_eq!(v, Value::Integer(7));

        let err = resolve("@missing", ColumnType::Integer, true, &params, None, &mysql()).unwrap_err();
        assert!(matches!(err, SqlError::ParameterNotFound(_)));
    }

    #[test]
    fn test_resolve_null_against_not_null() {
        let column = ColumnDef::new("email", ColumnType::Text).not_null();
        let err = resolve("null", ColumnType::Text, false, &Parameters::new(), Some(&column), &mysql())
            .unwrap_err();
        assert_eq!(err.code(), 1048);
        assert_eq!(
            resolve("NULL", ColumnType::Text, true, &Parameters::new(), None, &mysql()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_resolve_list() {
        let v = resolve("(1, 'a,b', 3)", ColumnType::Text, true, &Parameters::new(), None, &mysql())
            .unwrap();
        match v {
            Value::List(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[1], Value::from("a,b"));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_size_and_scale_limits() {
        let name = ColumnDef::new("name", ColumnType::Text).with_size(3);
        let err = coerce(Value::from("abcd"), &name, &mysql()).unwrap_err();
        assert_eq!(err.code(), 1406);

        let price = ColumnDef::new("price", ColumnType::Decimal).with_scale(2);
        assert!(coerce(Value::from("1.25"), &price, &mysql()).is_ok());
        let err = coerce(Value::from("1.255"), &price, &mysql()).unwrap_err();
        assert_eq!(err.code(), 1265);
    }

    #[test]
    fn test_enum_and_set_domains() {
        let kind = ColumnDef::new("kind", ColumnType::Text).with_enum(&["Small", "Large"]);
        assert_eq!(coerce(Value::from("small"), &kind, &mysql()).unwrap(), Value::from("Small"));
        let err = coerce(Value::from("medium"), &kind, &mysql()).unwrap_err();
        assert_eq!(err.code(), 1265);

        let tags = ColumnDef::new("tags", ColumnType::Text).with_set(&["a", "b", "c"]);
        assert_eq!(
            coerce(Value::from("c,a"), &tags, &mysql()).unwrap(),
            Value::Set(vec!["a".into(), "c".into()])
        );
        assert!(coerce(Value::from("a,z"), &tags, &mysql()).is_err());
    }

    #[test]
    fn test_json_is_best_effort() {
        let doc = ColumnDef::new("doc", ColumnType::Json);
        assert!(matches!(
            coerce(Value::from(r#"{"a": 1}"#), &doc, &mysql()).unwrap(),
            Value::Json(_)
        ));
        assert_eq!(
            coerce(Value::from("{not json"), &doc, &mysql()).unwrap(),
            Value::from("{not json")
        );
    }

    #[test]
    fn test_quoted_tokens_follow_dialect_escapes() {
        let v = resolve("'it''s'", ColumnType::Text, true, &Parameters::new(), None, &mysql()).unwrap();
        assert_eq!(v, Value::from("it's"));
        let v = resolve("'a\\'b'", ColumnType::Text, true, &Parameters::new(), None, &mysql()).unwrap();
        assert_eq!(v, Value::from("a'b"));
    }
}
