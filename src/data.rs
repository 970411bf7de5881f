use std::{cmp::Ordering, fmt, sync::OnceLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::table::ColumnType;

/// A single non-missing cell. Missing cells are `None` wherever a cell is
/// held as `Option<Value>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    String(String),
}

impl Eq for Value {}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::String(_) => ColumnType::String,
            Value::Integer(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Date(_) => ColumnType::Date,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Integer(_) | Value::Float(_) => 0,
            Value::Date(_) => 1,
            Value::String(_) => 2,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Total ordering over optional cells; Missing sorts before any value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparableValue(pub Option<Value>);

impl Ord for ComparableValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => left.cmp(right),
        }
    }
}

impl PartialOrd for ComparableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y年%m月%d日",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

/// Parses a date permissively, accepting datetime inputs truncated to
/// their calendar date.
pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed.date());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.date_naive())
}

fn thousands_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("thousands pattern is valid")
    })
}

/// Parses an integer or finite float, tolerating surrounding whitespace and
/// comma thousands separators.
pub fn parse_number(value: &str) -> Option<Value> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = if trimmed.contains(',') && thousands_pattern().is_match(trimmed) {
        trimmed.replace(',', "")
    } else {
        trimmed.to_string()
    };
    if let Ok(parsed) = cleaned.parse::<i64>() {
        return Some(Value::Integer(parsed));
    }
    match cleaned.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(Value::Float(parsed)),
        _ => None,
    }
}

/// Converts `value` to the requested semantic type. Returns `None` when the
/// conversion is not possible; callers treat that as a Missing cell.
pub fn coerce_value(value: &Value, target: &ColumnType) -> Option<Value> {
    match (value, target) {
        (_, ColumnType::Null) => None,
        (_, ColumnType::String) => Some(Value::String(value.as_display())),
        (Value::Integer(_), ColumnType::Integer) => Some(value.clone()),
        (Value::Float(f), ColumnType::Integer) => float_to_integer(*f).map(Value::Integer),
        (Value::Integer(i), ColumnType::Float) => Some(Value::Float(*i as f64)),
        (Value::Float(_), ColumnType::Float) => Some(value.clone()),
        (Value::Date(_), ColumnType::Date) => Some(value.clone()),
        (Value::Date(_), ColumnType::Integer | ColumnType::Float) => None,
        (Value::Integer(_) | Value::Float(_), ColumnType::Date) => None,
        (Value::String(s), ColumnType::Date) => parse_naive_date(s).map(Value::Date),
        (Value::String(s), ColumnType::Integer) => match parse_number(s)? {
            Value::Integer(i) => Some(Value::Integer(i)),
            Value::Float(f) => float_to_integer(f).map(Value::Integer),
            _ => None,
        },
        (Value::String(s), ColumnType::Float) => parse_number(s)?.as_f64().map(Value::Float),
    }
}

pub(crate) fn float_to_integer(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Renders a cell as a trimmed key string. Missing and blank cells produce
/// no key and therefore never match.
pub fn normalize_key(value: Option<&Value>) -> Option<String> {
    let rendered = value?.as_display();
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Canonical identifier form used to bind columns inside filter expressions.
pub fn normalize_column_name(name: &str) -> String {
    let mut normalized = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase();
    if normalized.is_empty() {
        return "column".to_string();
    }
    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        normalized.insert(0, '_');
    }
    normalized
}

pub fn value_to_evalexpr(value: &Value) -> evalexpr::Value {
    match value {
        Value::String(s) => evalexpr::Value::String(s.clone()),
        Value::Integer(i) => evalexpr::Value::Int(*i),
        Value::Float(f) => evalexpr::Value::Float(*f),
        Value::Date(d) => evalexpr::Value::String(d.format("%Y-%m-%d").to_string()),
    }
}
