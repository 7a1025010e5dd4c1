//! Decoder for the `get_ws_settings` endpoint

use crate::decoder::{FieldOutcome, Record};
use crate::error::{GatewayError, Result};
use serde_json::Value;

/// Legacy device field name → normalized dotted key.
///
/// The upload-service settings use flat, inconsistently prefixed names on
/// the wire; they normalize into per-service sub-keys.
const RENAMES: &[(&str, &str)] = &[
    ("ecowitt_ip", "upload.ecowitt.server"),
    ("ecowitt_path", "upload.ecowitt.path"),
    ("ecowitt_port", "upload.ecowitt.port"),
    ("ecowitt_upload", "upload.ecowitt.interval"),
    ("wu_ip", "upload.wunderground.server"),
    ("wu_path", "upload.wunderground.path"),
    ("wu_port", "upload.wunderground.port"),
    ("wow_ip", "upload.wow.server"),
    ("wow_path", "upload.wow.path"),
    ("wcl_ip", "upload.weathercloud.server"),
    ("wcl_path", "upload.weathercloud.path"),
];

/// Normalized keys coerced to integers
const INT_FIELDS: &[&str] = &[
    "upload.ecowitt.port",
    "upload.ecowitt.interval",
    "upload.wunderground.port",
    "interval",
    "rf_freq",
    "sensor_type",
];

/// Normalized keys coerced to booleans
const BOOL_FIELDS: &[&str] = &["radcompensation", "rain_priority", "ost_en"];

/// Decode a `get_ws_settings` response.
///
/// Applies the fixed rename table, coerces designated fields to integers or
/// booleans with the null-on-failure degrade rule, and passes every other
/// field through unchanged. Absent source keys produce absent result keys.
pub fn parse_get_ws_settings(response: &Value) -> Result<Record> {
    let obj = response
        .as_object()
        .ok_or_else(|| GatewayError::parse("get_ws_settings response is not a mapping"))?;

    let mut record = Record::new();
    for (key, value) in obj {
        let name = RENAMES
            .iter()
            .find(|(from, _)| *from == key.as_str())
            .map(|(_, to)| *to)
            .unwrap_or(key.as_str());

        if INT_FIELDS.contains(&name) {
            FieldOutcome::coerce_int(value).store(&mut record, name)?;
        } else if BOOL_FIELDS.contains(&name) {
            FieldOutcome::coerce_bool(value).store(&mut record, name)?;
        } else {
            record.insert(name.to_string(), value.clone());
        }
    }
    Ok(record)
}
