//! Decoder for the `get_version` endpoint

use crate::decoder::{FieldOutcome, Record};
use crate::error::{GatewayError, Result};
use serde_json::Value;

/// Decode a `get_version` response.
///
/// The device reports `"version"` as `"<model>_<firmware>"`; the firmware
/// part lands in `firmware_version`. A missing `"version"` omits both keys;
/// an unexpected shape passes through stringified with a null
/// `firmware_version`. `"newVersion"` coerces to an integer, degrading to
/// null on failure.
pub fn parse_get_version(response: &Value) -> Result<Record> {
    let obj = response
        .as_object()
        .ok_or_else(|| GatewayError::parse("get_version response is not a mapping"))?;

    let mut record = Record::new();
    for (key, value) in obj {
        match key.as_str() {
            "version" => match value.as_str().map(|s| (s, s.split_once('_'))) {
                Some((full, Some((_, firmware)))) => {
                    record.insert("version".to_string(), Value::from(full));
                    record.insert("firmware_version".to_string(), Value::from(firmware));
                }
                Some((full, None)) => {
                    record.insert("version".to_string(), Value::from(full));
                    record.insert("firmware_version".to_string(), Value::Null);
                }
                None => {
                    record.insert("version".to_string(), Value::from(value.to_string()));
                    record.insert("firmware_version".to_string(), Value::Null);
                }
            },
            "newVersion" => {
                FieldOutcome::coerce_int(value).store(&mut record, "newVersion")?;
            }
            _ => {
                record.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(record)
}
