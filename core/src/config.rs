//! Environment-variable parsing shared by the service configurations.
//!
//! Every helper takes a lookup function instead of reading `std::env`
//! directly, so configurations can be loaded from a plain map in tests.

use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// A variable is set but its value is not usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {name}: {value:?} ({reason})")]
pub struct InvalidValue {
    /// Variable name
    pub name: &'static str,
    /// Raw value
    pub value: String,
    /// Why it was rejected
    pub reason: String,
}

impl InvalidValue {
    /// Build an error for `name` holding `value`.
    #[must_use]
    pub fn new(name: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Parse `name` through `lookup`, or return `default` when it is unset.
///
/// # Errors
///
/// Returns [`InvalidValue`] if the variable is set but does not parse as `T`.
pub fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, InvalidValue>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(name).map_or(Ok(default), |raw| parse_value(name, &raw))
}

/// Parse a raw value read for `name`, ignoring surrounding whitespace.
///
/// # Errors
///
/// Returns [`InvalidValue`] if `raw` does not parse as `T`.
pub fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, InvalidValue>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| InvalidValue::new(name, raw, e.to_string()))
}

/// Read `name` and require it to be one of `allowed`, or return `default`
/// when it is unset.
///
/// # Errors
///
/// Returns [`InvalidValue`] if the variable is set to anything else.
pub fn parse_choice<F>(
    lookup: &F,
    name: &'static str,
    default: &str,
    allowed: &[&str],
) -> Result<String, InvalidValue>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default.to_string());
    };
    let value = raw.trim();
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(InvalidValue::new(
            name,
            raw.as_str(),
            format!("expected one of {}", allowed.join(", ")),
        ))
    }
}
