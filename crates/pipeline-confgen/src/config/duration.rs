// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Duration strings in the `1h2m3.5s` / `500ms` format used throughout the document.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Unit suffixes and their length in nanoseconds.
const UNITS: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
];

/// Parses a duration such as `60s`, `1m30s` or `1.5h`.
///
/// # Errors
///
/// Returns a description of the problem when `input` is not a valid duration.
#[allow(clippy::cast_precision_loss)]
pub fn parse(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = input;
    let mut nanos = 0.0_f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if number_len == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unknown unit {unit:?} in duration {input:?}"))?;
        nanos += value * scale;
        rest = &rest[unit_len..];
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(format!("duration {input:?} is out of range"));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Formats a duration the way [`parse`] reads it, e.g. `1m30s` or `500ms`.
#[must_use]
pub fn format(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    if duration.subsec_nanos() != 0 && duration.as_secs() == 0 {
        let nanos = duration.subsec_nanos();
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let total = duration.as_secs();
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if secs > 0 || duration.subsec_nanos() != 0 {
        if duration.subsec_nanos() == 0 {
            out.push_str(&format!("{secs}s"));
        } else {
            let fractional = f64::from(duration.subsec_nanos()) / 1e9;
            #[allow(clippy::cast_precision_loss)]
            let value = secs as f64 + fractional;
            out.push_str(&format!("{value}s"));
        }
    }
    out
}

/// Deserializes an optional duration string. An absent value is `None` and takes the
/// field's default; a present but malformed value is a decode error.
///
/// # Errors
///
/// Fails when the value is not a string or not a valid duration.
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|s| parse(&s).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse("60s"), Ok(Duration::from_secs(60)));
        assert_eq!(parse("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse("0"), Ok(Duration::ZERO));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("10").is_err());
        assert!(parse("10 parsecs").is_err());
        assert!(parse("s").is_err());
        assert!(parse("1x").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format(Duration::from_secs(60)), "1m");
        assert_eq!(format(Duration::from_secs(90)), "1m30s");
        assert_eq!(format(Duration::from_secs(3661)), "1h1m1s");
        assert_eq!(format(Duration::from_millis(500)), "500ms");
        assert_eq!(format(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format(Duration::ZERO), "0s");
    }

    #[test]
    fn test_deserialize_optional() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default, deserialize_with = "deserialize_optional")]
            interval: Option<Duration>,
        }
        let holder: Holder = serde_yaml::from_str("interval: 2m").expect("valid");
        assert_eq!(holder.interval, Some(Duration::from_secs(120)));
        let holder: Holder = serde_yaml::from_str("{}").expect("valid");
        assert_eq!(holder.interval, None);
        assert!(serde_yaml::from_str::<Holder>("interval: soon").is_err());
    }
}
