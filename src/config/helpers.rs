//! Env var readers shared by the config sections.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Read an env var, treating "unset" and "empty" the same way.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        }),
    }
}

/// Parse an env var with `FromStr`, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    optional_env(key)?
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be 'true' or 'false': {e}"),
        })
        .map(|v| v.unwrap_or(default))
}

pub(crate) fn parse_duration_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    optional_env(key)?
        .map(|s| {
            parse_duration(&s).map_err(|message| ConfigError::InvalidValue {
                key: key.to_string(),
                message,
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse a Go-style duration string such as `8s`, `10m`, `1m30s` or `250ms`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in '{input}'"))?;
        if digits_end == 0 {
            return Err(format!("expected a number in '{input}'"));
        }
        let value: f64 = rest[..digits_end]
            .parse()
            .map_err(|e| format!("bad number in '{input}': {e}"))?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            other => return Err(format!("unknown unit '{other}' in '{input}'")),
        };
        rest = &rest[unit_end..];
        let part = Duration::try_from_secs_f64(value * scale)
            .map_err(|e| format!("duration out of range in '{input}': {e}"))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration out of range in '{input}'"))?;
    }
    Ok(total)
}
