//! Wire-value parsing for device observation fields
//!
//! Live-data fields arrive as loosely typed strings that may carry an inline
//! unit token (`"4.20 km/h"`), lean on a sibling `"unit"` field (`"26.5"`
//! next to `"unit": "C"`), or carry no unit at all. [`parse_obs_value`]
//! resolves all three shapes into a `(value, unit, group)` triple without
//! converting the magnitude; unit conversion belongs to the consumer.

use crate::error::{GatewayError, Result};
use crate::units::{lookup_unit_token, UnitGroup, UnitSystem};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// One decoded observation value.
///
/// The unit is the token-preserving canonical name from the lexicon; the
/// numeric magnitude is exactly what the device sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObsValue {
    pub value: f64,
    pub unit: &'static str,
    pub group: UnitGroup,
}

/// Numeric prefix plus optional trailing unit token.
///
/// The numeric class is deliberately loose so that digit-bearing garbage
/// (`",.,"`) reaches the float conversion and fails there, distinct from
/// strings with no numeric portion at all.
static OBS_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9,.+-]+)\s*(\S*)\s*$").expect("obs value regex"));

/// Parse one observation field out of a device response object.
///
/// `obj[key]` must exist. Unit resolution precedence: inline token, sibling
/// `"unit"` field, then the group default from `units`. A `%` suffix forces
/// the percent group regardless of `group`; humidity-like fields carry their
/// unit inline without a lexicon entry of their own.
pub fn parse_obs_value(
    key: &str,
    obj: &Value,
    group: UnitGroup,
    units: Option<UnitSystem>,
) -> Result<ObsValue> {
    let raw = obj
        .get(key)
        .ok_or_else(|| GatewayError::missing_field(key.to_string()))?;

    // Some firmware revisions emit bare JSON numbers for fields that are
    // strings elsewhere; treat them as a value with no inline token.
    let (value, token) = match raw {
        Value::Number(n) => {
            let value = n
                .as_f64()
                .ok_or_else(|| GatewayError::parse(format!("non-finite number in '{key}'")))?;
            (value, String::new())
        }
        Value::String(s) => {
            let caps = OBS_VALUE_RE
                .captures(s)
                .ok_or_else(|| GatewayError::parse(format!("no numeric value in '{key}': {s:?}")))?;
            let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value: f64 = number.parse().map_err(|_| {
                GatewayError::parse(format!("unconvertible numeric value in '{key}': {number:?}"))
            })?;
            let token = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            (value, token.to_string())
        }
        other => {
            return Err(GatewayError::parse(format!(
                "unsupported value type in '{key}': {other}"
            )))
        }
    };

    if !token.is_empty() {
        if token == "%" {
            return Ok(ObsValue {
                value,
                unit: "%",
                group: UnitGroup::Percent,
            });
        }
        let (unit, token_group) = lookup_unit_token(&token).ok_or_else(|| {
            GatewayError::parse(format!("unknown unit token in '{key}': {token:?}"))
        })?;
        return Ok(ObsValue {
            value,
            unit,
            group: token_group,
        });
    }

    if let Some(unit_field) = obj.get("unit").and_then(|v| v.as_str()) {
        let (unit, token_group) = lookup_unit_token(unit_field).ok_or_else(|| {
            GatewayError::parse(format!("unknown unit field for '{key}': {unit_field:?}"))
        })?;
        return Ok(ObsValue {
            value,
            unit,
            group: token_group,
        });
    }

    let system = units
        .ok_or_else(|| GatewayError::parse(format!("no unit system to resolve '{key}'")))?;
    let unit = system.default_unit(group).ok_or_else(|| {
        GatewayError::parse(format!("no default unit for group '{group}' ('{key}')"))
    })?;
    Ok(ObsValue { value, unit, group })
}
