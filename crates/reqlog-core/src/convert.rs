//! Conversion of raw capture text into typed values.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::value::Value;

static SQL_STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^'\\]|\\.)*'").unwrap());
static SQL_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap());

/// Digits in a sortable timestamp: `YYYYMMDDHHMMSS`.
const TIMESTAMP_DIGITS: usize = 14;

/// Semantic type declared for a capture group.
///
/// Unknown type names are kept as [`CaptureType::Other`] and pass the raw
/// text through.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptureType {
    #[default]
    String,
    Integer,
    Float,
    Duration,
    Timestamp,
    Traffic,
    Nested,
    Sql,
    Path,
    Other(String),
}

impl fmt::Display for CaptureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Duration => "duration",
            Self::Timestamp => "timestamp",
            Self::Traffic => "traffic",
            Self::Nested => "nested",
            Self::Sql => "sql",
            Self::Path => "path",
            Self::Other(name) => name,
        };
        f.write_str(s)
    }
}

impl FromStr for CaptureType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "string" => Self::String,
            "integer" | "int" => Self::Integer,
            "float" | "decimal" => Self::Float,
            "duration" => Self::Duration,
            "timestamp" => Self::Timestamp,
            "traffic" => Self::Traffic,
            "nested" | "hash" | "eval" => Self::Nested,
            "sql" => Self::Sql,
            "path" => Self::Path,
            other => Self::Other(other.to_string()),
        })
    }
}

impl Serialize for CaptureType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CaptureType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.parse::<Self>() {
            Ok(t) => t,
            Err(never) => match never {},
        })
    }
}

/// A capture type with its unit and format options resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Raw,
    Integer,
    Float,
    /// Divisor from the source unit to seconds.
    Duration(f64),
    /// Optional chrono format string.
    Timestamp(Option<String>),
    /// Multiplier from the source unit to bytes.
    Traffic(f64),
    Nested,
    Sql,
    Path,
}

impl Conversion {
    /// Resolves a declared type and unit. Invalid units are fatal.
    pub fn resolve(
        capture: &str,
        capture_type: &CaptureType,
        unit: Option<&str>,
        format: Option<&str>,
    ) -> Result<Self, FormatError> {
        let invalid_unit = |unit: &str| FormatError::InvalidUnit {
            capture: capture.to_string(),
            unit: unit.to_string(),
        };
        Ok(match capture_type {
            CaptureType::String | CaptureType::Other(_) => Self::Raw,
            CaptureType::Integer => Self::Integer,
            CaptureType::Float => Self::Float,
            CaptureType::Duration => {
                let divisor = match unit.map(str::to_ascii_lowercase).as_deref() {
                    None | Some("s" | "sec" | "second" | "seconds") => 1.0,
                    Some("ms" | "msec" | "millisecond" | "milliseconds") => 1e3,
                    Some("us" | "musec" | "microsec" | "microsecond" | "microseconds") => 1e6,
                    Some(_) => return Err(invalid_unit(unit.unwrap_or_default())),
                };
                Self::Duration(divisor)
            }
            CaptureType::Traffic => {
                let multiplier = match unit.map(str::to_ascii_lowercase).as_deref() {
                    None | Some("b" | "byte" | "bytes") => 1.0,
                    Some("kb" | "k") => 1e3,
                    Some("mb" | "m") => 1e6,
                    Some("gb" | "g") => 1e9,
                    Some("kib") => 1024.0,
                    Some("mib") => 1024.0 * 1024.0,
                    Some("gib") => 1024.0 * 1024.0 * 1024.0,
                    Some(_) => return Err(invalid_unit(unit.unwrap_or_default())),
                };
                Self::Traffic(multiplier)
            }
            CaptureType::Timestamp => Self::Timestamp(format.map(str::to_string)),
            CaptureType::Nested => Self::Nested,
            CaptureType::Sql => Self::Sql,
            CaptureType::Path => Self::Path,
        })
    }

    /// Converts captured text. Unparseable numbers become `Null`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply(&self, raw: &str) -> Value {
        match self {
            Self::Raw => Value::String(raw.to_string()),
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map_or(Value::Null, Value::Integer),
            Self::Float => parse_finite(raw).map_or(Value::Null, Value::Float),
            Self::Duration(divisor) => {
                parse_finite(raw).map_or(Value::Null, |v| Value::Float(v / divisor))
            }
            Self::Traffic(multiplier) => parse_finite(raw)
                .map_or(Value::Null, |v| Value::Integer((v * multiplier).round() as i64)),
            Self::Timestamp(format) => {
                sortable_timestamp(raw, format.as_deref()).map_or(Value::Null, Value::Integer)
            }
            Self::Nested => parse_nested(raw).map_or(Value::Null, Value::Map),
            Self::Sql => Value::String(normalize_sql(raw)),
            Self::Path => Value::String(strip_query(raw).to_string()),
        }
    }
}

/// Parses a float, rejecting NaN and infinities.
fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Converts a timestamp to a sortable `YYYYMMDDHHMMSS` integer.
///
/// With a chrono `format`, the text is parsed as a calendar value first.
/// Otherwise (or when parsing fails) the first 14 digits are used, padded
/// on the right with zeros.
pub fn sortable_timestamp(raw: &str, format: Option<&str>) -> Option<i64> {
    let raw = raw.trim();
    if let Some(format) = format {
        let parsed = NaiveDateTime::parse_from_str(raw, format).or_else(|_| {
            NaiveDate::parse_from_str(raw, format).map(|d| d.and_time(NaiveTime::default()))
        });
        match parsed {
            Ok(dt) => return dt.format("%Y%m%d%H%M%S").to_string().parse().ok(),
            Err(err) => {
                tracing::trace!(raw, format, error = %err, "timestamp format did not parse");
            }
        }
    }

    let mut digits: String = raw
        .chars()
        .filter(char::is_ascii_digit)
        .take(TIMESTAMP_DIGITS)
        .collect();
    if digits.is_empty() {
        return None;
    }
    while digits.len() < TIMESTAMP_DIGITS {
        digits.push('0');
    }
    digits.parse().ok()
}

/// Inverse of [`sortable_timestamp`]: `20240102133005` becomes 2024-01-02 13:30:05.
pub fn timestamp_to_datetime(timestamp: i64) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{timestamp:014}"), "%Y%m%d%H%M%S").ok()
}

/// Replaces literals in a SQL statement so similar queries group together.
pub fn normalize_sql(sql: &str) -> String {
    let without_strings = SQL_STRING_RE.replace_all(sql, ":string");
    let without_ticks = without_strings.replace('`', "");
    let normalized = SQL_NUMBER_RE.replace_all(&without_ticks, ":int");
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

/// Parses a nested hash: a JSON object, or a `{"key"=>"value"}` style hash
/// as printed by Rails parameter logging.
pub fn parse_nested(raw: &str) -> Option<BTreeMap<String, Value>> {
    let raw = raw.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) {
        return Some(
            map.into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect(),
        );
    }
    let mut parser = HashParser::new(raw);
    let map = parser.hash(0)?;
    parser.skip_ws();
    parser.at_end().then_some(map)
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::String(
            serde_json::to_string(&items).unwrap_or_default(),
        ),
        serde_json::Value::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Deepest hash nesting accepted, the same limit `serde_json` applies.
const MAX_NESTING: usize = 128;

/// Recursive-descent parser for hash-rocket literals.
struct HashParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> HashParser<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn hash(&mut self, depth: usize) -> Option<BTreeMap<String, Value>> {
        if depth >= MAX_NESTING || !self.eat("{") {
            return None;
        }
        let mut map = BTreeMap::new();
        if self.eat("}") {
            return Some(map);
        }
        loop {
            let key = self.key()?;
            let value = self.value(depth)?;
            map.insert(key, value);
            if self.eat(",") {
                continue;
            }
            if self.eat("}") {
                return Some(map);
            }
            return None;
        }
    }

    /// `"key" =>`, `:key =>` or `key:`.
    fn key(&mut self) -> Option<String> {
        self.skip_ws();
        let key = match self.peek()? {
            '"' | '\'' => self.quoted()?,
            ':' => {
                self.pos += 1;
                self.bare_word()?
            }
            _ => {
                let word = self.bare_word()?;
                if self.rest().starts_with(':') {
                    self.pos += 1;
                    return Some(word);
                }
                word
            }
        };
        self.eat("=>").then_some(key)
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '"' | '\'' => self.quoted().map(Value::String),
            '{' => self.hash(depth + 1).map(Value::Map),
            ':' => {
                self.pos += 1;
                self.bare_word().map(Value::String)
            }
            _ => {
                let word = self.bare_word()?;
                Some(match word.as_str() {
                    "nil" | "null" => Value::Null,
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => word
                        .parse::<i64>()
                        .map(Value::Integer)
                        .ok()
                        .or_else(|| parse_finite(&word).map(Value::Float))
                        .unwrap_or(Value::String(word)),
                })
            }
        }
    }

    fn bare_word(&mut self) -> Option<String> {
        let len = self
            .rest()
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '?' | '!')))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return None;
        }
        let word = self.rest()[..len].to_string();
        self.pos += len;
        Some(word)
    }

    fn quoted(&mut self) -> Option<String> {
        let quote = self.peek()?;
        self.pos += quote.len_utf8();
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                }
                c if c == quote => {
                    self.pos += i + c.len_utf8();
                    return Some(out);
                }
                c => out.push(c),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(capture_type: &str, unit: Option<&str>, raw: &str) -> Value {
        let t: CaptureType = capture_type.parse().unwrap();
        Conversion::resolve("test", &t, unit, None).unwrap().apply(raw)
    }

    #[test]
    fn durations_normalize_to_seconds() {
        assert_eq!(convert("duration", None, "1.5"), Value::Float(1.5));
        assert_eq!(convert("duration", Some("msec"), "250"), Value::Float(0.25));
        let micro = convert("duration", Some("musec"), "1500").as_f64().unwrap();
        assert!((micro - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn traffic_normalizes_to_bytes() {
        assert_eq!(convert("traffic", None, "512"), Value::Integer(512));
        assert_eq!(convert("traffic", Some("kb"), "2"), Value::Integer(2000));
        assert_eq!(convert("traffic", Some("KiB"), "2"), Value::Integer(2048));
        assert_eq!(convert("traffic", None, "-"), Value::Null);
    }

    #[test]
    fn invalid_unit_is_fatal() {
        let err = Conversion::resolve("d", &CaptureType::Duration, Some("fortnight"), None)
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidUnit { .. }));
    }

    #[test]
    fn timestamps_become_sortable_digits() {
        assert_eq!(
            sortable_timestamp("2008-08-14 21:16:30", None),
            Some(20_080_814_211_630)
        );
        assert_eq!(sortable_timestamp("2024-01-15", None), Some(20_240_115_000_000));
        assert_eq!(sortable_timestamp("no digits", None), None);
        assert_eq!(
            timestamp_to_datetime(20_080_814_211_630).map(|dt| dt.to_string()),
            Some("2008-08-14 21:16:30".to_string())
        );
        assert_eq!(timestamp_to_datetime(20_081_399_000_000), None);
    }

    #[test]
    fn timestamps_with_month_names_use_format() {
        assert_eq!(
            sortable_timestamp("10/Oct/2000:13:55:36", Some("%d/%b/%Y:%H:%M:%S")),
            Some(20_001_010_135_536)
        );
    }

    #[test]
    fn sql_literals_are_normalized() {
        assert_eq!(
            normalize_sql("SELECT * FROM `users`  WHERE id = 42 AND name = 'bob'"),
            "SELECT * FROM users WHERE id = :int AND name = :string"
        );
        assert_eq!(normalize_sql("SELECT * FROM table1"), "SELECT * FROM table1");
    }

    #[test]
    fn path_drops_query_string() {
        assert_eq!(convert("path", None, "/users?page=2"), Value::from("/users"));
    }

    #[test]
    fn unknown_type_passes_raw_text() {
        assert_eq!(
            "geo".parse::<CaptureType>().unwrap(),
            CaptureType::Other("geo".into())
        );
        assert_eq!(convert("geo", None, "52.1,4.3"), Value::from("52.1,4.3"));
    }

    #[test]
    fn nested_parses_hash_rockets() {
        let map =
            parse_nested(r#"{"controller"=>"users", "id"=>"12", :page=>2, "x"=>{"y"=>nil}}"#)
                .unwrap();
        assert_eq!(map["controller"], Value::from("users"));
        assert_eq!(map["id"], Value::from("12"));
        assert_eq!(map["page"], Value::Integer(2));
        let Value::Map(inner) = &map["x"] else {
            panic!("expected nested map");
        };
        assert_eq!(inner["y"], Value::Null);
    }

    #[test]
    fn nested_parses_json_objects() {
        let map = parse_nested(r#"{"a": 1, "b": "two"}"#).unwrap();
        assert_eq!(map["a"], Value::Integer(1));
        assert_eq!(map["b"], Value::from("two"));
        assert!(parse_nested("not a hash").is_none());
        assert!(parse_nested(r#"{"a"=>1"#).is_none());
    }

    #[test]
    fn nested_hash_depth_is_bounded() {
        let nest = |depth: usize| format!("{}1{}", r#"{"a"=>"#.repeat(depth), "}".repeat(depth));
        assert!(parse_nested(&nest(100)).is_some());
        assert!(parse_nested(&nest(128)).is_some());
        assert!(parse_nested(&nest(129)).is_none());
        assert!(parse_nested(&nest(10_000)).is_none());

        let conversion = Conversion::resolve("params", &CaptureType::Nested, None, None).unwrap();
        assert_eq!(conversion.apply(&nest(10_000)), Value::Null);
    }

    #[test]
    fn non_finite_numbers_become_null() {
        assert_eq!(convert("float", None, "NaN"), Value::Null);
        assert_eq!(convert("duration", Some("msec"), "inf"), Value::Null);
        assert_eq!(convert("traffic", None, "infinity"), Value::Null);
        assert_eq!(convert("float", None, "1.5"), Value::Float(1.5));
        let map = parse_nested(r#"{"n"=>NaN}"#).unwrap();
        assert_eq!(map["n"], Value::from("NaN"));
    }
}
