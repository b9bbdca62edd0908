// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-guess typing of raw strings extracted from log lines.
//!
//! A raw value is tried, in order, as a timestamp (configured layouts first,
//! then the built-in layouts), a signed 64-bit integer, a boolean and a float.
//! Anything else is kept as the original string, so inference never fails.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Weekday};
use serde::ser::{Error as _, Serialize, Serializer};
use std::fmt;

/// Layouts tried after the configured ones, in this order.
///
/// A `%Z` token stands for a zone abbreviation such as `UTC` or `PST`; it must
/// be a whitespace separated token of its own.
const BUILTIN_LAYOUTS: &[&str] = &[
    // web server access log
    "%d/%b/%Y:%H:%M:%S %z",
    // ANSI C
    "%a %b %e %H:%M:%S %Y",
    // Unix date
    "%a %b %e %H:%M:%S %Z %Y",
    // Ruby date
    "%a %b %d %H:%M:%S %z %Y",
    // RFC 822
    "%d %b %y %H:%M %Z",
    "%d %b %y %H:%M %z",
    // RFC 850
    "%A, %d-%b-%y %H:%M:%S %Z",
    // RFC 1123
    "%a, %d %b %Y %H:%M:%S %Z",
    "%a, %d %b %Y %H:%M:%S %z",
];

const ZONE_ABBREVIATION_TOKEN: &str = "%Z";

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Timestamp(DateTime<FixedOffset>),
    Integer(i64),
    Boolean(bool),
    Float(f64),
    String(String),
}

impl Value {
    #[must_use]
    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            // JSON has no representation for infinities
            Value::Float(v) if !v.is_finite() => {
                Err(S::Error::custom(format!("unsupported float value: {v}")))
            }
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Converts raw strings into typed values.
#[derive(Debug, Clone, Default)]
pub struct TypeInference {
    time_patterns: Vec<String>,
}

impl TypeInference {
    /// `time_patterns` are chrono format strings tried before the built-in layouts.
    #[must_use]
    pub fn new(time_patterns: Vec<String>) -> Self {
        Self { time_patterns }
    }

    #[must_use]
    pub fn time_patterns(&self) -> &[String] {
        &self.time_patterns
    }

    /// Returns the most specific value `raw` parses as.
    #[must_use]
    pub fn infer(&self, raw: &str) -> Value {
        let configured = self.time_patterns.iter().map(String::as_str);
        if let Some(ts) = configured
            .chain(BUILTIN_LAYOUTS.iter().copied())
            .find_map(|layout| parse_timestamp(raw, layout))
        {
            return Value::Timestamp(ts);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Value::Timestamp(ts);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Integer(i);
        }
        if raw.eq_ignore_ascii_case("true") {
            return Value::Boolean(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Value::Boolean(false);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Value::Float(if v.is_nan() { 0.0 } else { v });
        }
        Value::String(raw.to_string())
    }
}

/// Infers a value using only the built-in timestamp layouts.
#[must_use]
pub fn infer(raw: &str) -> Value {
    TypeInference::default().infer(raw)
}

/// Parses `raw` with a chrono format string.
///
/// Formats without an offset are read as UTC, and date-only formats as
/// midnight UTC. A leading weekday must be a weekday name but is not checked
/// against the date.
fn parse_timestamp(raw: &str, layout: &str) -> Option<DateTime<FixedOffset>> {
    match strip_weekday(raw, layout) {
        Some((raw, layout)) => parse_dated(raw, layout),
        None if leading_weekday(layout).is_some() => None,
        None => parse_dated(raw, layout),
    }
}

/// The layout's leading weekday token and the rest of the layout.
fn leading_weekday(layout: &str) -> Option<(&str, &str)> {
    let (token, rest) = layout.split_once(' ')?;
    matches!(token, "%a" | "%a," | "%A" | "%A,").then_some((token, rest.trim_start()))
}

fn strip_weekday<'a>(raw: &'a str, layout: &'a str) -> Option<(&'a str, &'a str)> {
    let (token, layout_rest) = leading_weekday(layout)?;
    let (day, raw_rest) = raw.split_once(' ')?;
    let day = if token.ends_with(',') {
        day.strip_suffix(',')?
    } else {
        day
    };
    day.parse::<Weekday>().ok()?;
    Some((raw_rest.trim_start(), layout_rest))
}

fn parse_dated(raw: &str, layout: &str) -> Option<DateTime<FixedOffset>> {
    if layout.contains(ZONE_ABBREVIATION_TOKEN) {
        return parse_with_zone_abbreviation(raw, layout);
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, layout) {
        return Some(ts);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(raw, layout)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn parse_with_zone_abbreviation(raw: &str, layout: &str) -> Option<DateTime<FixedOffset>> {
    let layout_tokens: Vec<&str> = layout.split_whitespace().collect();
    let raw_tokens: Vec<&str> = raw.split_whitespace().collect();
    if layout_tokens.len() != raw_tokens.len() {
        return None;
    }
    let zone_index = layout_tokens
        .iter()
        .position(|token| *token == ZONE_ABBREVIATION_TOKEN)?;
    let offset = zone_offset(raw_tokens[zone_index])?;

    let without_zone = |tokens: &[&str]| {
        tokens
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != zone_index)
            .map(|(_, token)| *token)
            .collect::<Vec<&str>>()
            .join(" ")
    };
    let naive =
        NaiveDateTime::parse_from_str(&without_zone(&raw_tokens), &without_zone(&layout_tokens))
            .ok()?;
    naive.and_local_timezone(offset).single()
}

/// Resolves a zone abbreviation to a fixed offset.
///
/// Unknown abbreviations that still look like one (three to five upper case
/// letters) resolve to UTC.
fn zone_offset(abbreviation: &str) -> Option<FixedOffset> {
    let hours = match abbreviation {
        "UTC" | "GMT" | "UT" | "Z" => 0,
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        other
            if (3..=5).contains(&other.len())
                && other.chars().all(|c| c.is_ascii_uppercase()) =>
        {
            0
        }
        _ => return None,
    };
    FixedOffset::east_opt(hours * 3600)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use duplicate::duplicate_item;
    use proptest::prelude::*;

    fn july_26_2011() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2011, 7, 26, 0, 0, 0).unwrap()
    }

    #[duplicate_item(
        test_name                           input;
        [test_web_server_timestamp]         ["26/Jul/2011:00:00:00 +0000"];
        [test_ansic_timestamp]              ["Tue Jul 26 00:00:00 2011"];
        [test_unix_date_timestamp]          ["Tue Jul 26 00:00:00 UTC 2011"];
        [test_ruby_date_timestamp]          ["Tue Jul 26 00:00:00 +0000 2011"];
        [test_rfc822_timestamp]             ["26 Jul 11 00:00 UTC"];
        [test_rfc822z_timestamp]            ["26 Jul 11 00:00 +0000"];
        [test_rfc850_timestamp]             ["Tuesday, 26-Jul-11 00:00:00 UTC"];
        [test_rfc1123_timestamp]            ["Tue, 26 Jul 2011 00:00:00 UTC"];
        [test_rfc1123z_timestamp]           ["Tue, 26 Jul 2011 00:00:00 +0000"];
        [test_rfc3339_timestamp]            ["2011-07-26T00:00:00Z"];
        [test_rfc3339_fractional_timestamp] ["2011-07-26T00:00:00.0Z"];
    )]
    #[test]
    fn test_name() {
        let value = infer(input);
        let ts = value.as_timestamp().expect("expected a timestamp");
        assert_eq!(*ts, july_26_2011());
    }

    #[test]
    fn test_weekday_not_checked_against_date() {
        let value = infer("Mon, 26 Jul 2011 00:00:00 UTC");
        assert_eq!(*value.as_timestamp().unwrap(), july_26_2011());
        let value = infer("Fri Jul 26 00:00:00 2011");
        assert_eq!(*value.as_timestamp().unwrap(), july_26_2011());
    }

    #[test]
    fn test_weekday_must_be_a_weekday_name() {
        let raw = "Xyz, 26 Jul 2011 00:00:00 UTC";
        assert_eq!(infer(raw), Value::String(raw.to_string()));
    }

    #[test]
    fn test_zone_abbreviation_offset_applied() {
        let value = infer("Mon Jul 25 17:00:00 PDT 2011");
        assert_eq!(*value.as_timestamp().unwrap(), july_26_2011());
    }

    #[test]
    fn test_configured_layout_tried_first() {
        let inference = TypeInference::new(vec!["%Y%m%d".to_string()]);
        // Without the configured layout this would be an integer
        assert_eq!(
            *inference.infer("20110726").as_timestamp().unwrap(),
            july_26_2011()
        );
        assert_eq!(infer("20110726"), Value::Integer(20_110_726));
    }

    #[test]
    fn test_configured_naive_layout_is_utc() {
        let inference = TypeInference::new(vec!["%Y-%m-%d %H:%M:%S".to_string()]);
        assert_eq!(
            *inference
                .infer("2011-07-26 00:00:00")
                .as_timestamp()
                .unwrap(),
            july_26_2011()
        );
    }

    #[test]
    fn test_parse_int_strings() {
        for (input, expected) in [
            ("0", 0),
            ("1", 1),
            ("-1", -1),
            ("12123", 12123),
            ("+12123", 12123),
            ("-12123", -12123),
        ] {
            assert_eq!(infer(input), Value::Integer(expected), "input {input}");
        }
    }

    #[test]
    fn test_parse_double_strings() {
        for (input, expected) in [
            ("0.0", 0.0),
            ("1.0", 1.0),
            ("-1.0", -1.0),
            ("+12123.0", 12123.0),
            ("2.71828182845904523536028747", std::f64::consts::E),
            ("5.4", 5.4),
        ] {
            match infer(input) {
                Value::Float(actual) => assert!((actual - expected).abs() < 1e-4, "input {input}"),
                other => panic!("expected float for {input}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_bool_strings() {
        for (input, expected) in [
            ("true", true),
            ("false", false),
            ("TRUE", true),
            ("FALSE", false),
            ("True", true),
            ("fAlSe", false),
        ] {
            assert_eq!(infer(input), Value::Boolean(expected), "input {input}");
        }
    }

    #[test]
    fn test_nan_becomes_zero() {
        assert_eq!(infer("NaN"), Value::Float(0.0));
        assert_eq!(infer("nan"), Value::Float(0.0));
    }

    #[test]
    fn test_string_fallback_is_unmodified() {
        assert_eq!(infer("giant"), Value::from("giant"));
        assert_eq!(infer(""), Value::from(""));
        assert_eq!(infer(" 7"), Value::from(" 7"));
        assert_eq!(infer("-"), Value::from("-"));
    }

    #[test]
    fn test_serialize_values() {
        let ts = Value::Timestamp(july_26_2011().fixed_offset());
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"2011-07-26T00:00:00Z\"");
        assert_eq!(serde_json::to_string(&Value::Integer(-4)).unwrap(), "-4");
        assert_eq!(serde_json::to_string(&Value::Float(6.4)).unwrap(), "6.4");
        assert_eq!(serde_json::to_string(&Value::from("a\"b")).unwrap(), "\"a\\\"b\"");
    }

    #[test]
    fn test_serialize_infinite_float_fails() {
        assert!(serde_json::to_string(&infer("inf")).is_err());
    }

    proptest! {
        #[test]
        fn test_inference_is_total(raw in "\\PC*") {
            match infer(&raw) {
                Value::Float(v) => prop_assert!(!v.is_nan()),
                Value::String(s) => prop_assert_eq!(s, raw),
                _ => {}
            }
        }
    }
}
