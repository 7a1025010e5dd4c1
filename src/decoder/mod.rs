//! Response decoding for the gateway's HTTP endpoints
//!
//! One transformation per endpoint, all sharing the same shape: walk the
//! nested response, normalize field names and values, and flatten the result
//! into a single-level map keyed by dotted paths. Field-level conversion
//! failures degrade that field to null; only a structurally wrong response
//! fails the whole call.

pub mod livedata;
pub mod settings;
pub mod version;

pub use livedata::parse_livedata;
pub use settings::parse_get_ws_settings;
pub use version::parse_get_version;

use crate::error::{GatewayError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Flattened record for one poll cycle or one catchup row.
///
/// Keys are dotted paths; values are canonical-unit numerics/booleans plus
/// `datetime` (epoch seconds) and `interval` (seconds). Deterministic
/// iteration order keeps logs and tests stable.
pub type Record = BTreeMap<String, Value>;

/// Outcome of decoding a single field.
///
/// `Degraded` nulls the field and keeps the rest of the response alive;
/// `Fatal` aborts the whole decode and is reserved for structural failures.
#[derive(Debug)]
pub enum FieldOutcome {
    Ok(Value),
    Degraded,
    Fatal(GatewayError),
}

impl FieldOutcome {
    /// Coerce to integer, degrading on anything non-numeric
    pub fn coerce_int(raw: &Value) -> FieldOutcome {
        match raw {
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldOutcome::Ok(Value::from(i)),
                None => FieldOutcome::Degraded,
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => FieldOutcome::Ok(Value::from(i)),
                Err(_) => FieldOutcome::Degraded,
            },
            _ => FieldOutcome::Degraded,
        }
    }

    /// Coerce to boolean, accepting 0/1 and their string forms
    pub fn coerce_bool(raw: &Value) -> FieldOutcome {
        match raw {
            Value::Bool(b) => FieldOutcome::Ok(Value::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => FieldOutcome::Ok(Value::from(false)),
                Some(1) => FieldOutcome::Ok(Value::from(true)),
                _ => FieldOutcome::Degraded,
            },
            Value::String(s) => match s.trim() {
                "0" | "false" => FieldOutcome::Ok(Value::from(false)),
                "1" | "true" => FieldOutcome::Ok(Value::from(true)),
                _ => FieldOutcome::Degraded,
            },
            _ => FieldOutcome::Degraded,
        }
    }

    /// Apply the outcome to `record` under `key`
    pub fn store(self, record: &mut Record, key: &str) -> Result<()> {
        match self {
            FieldOutcome::Ok(value) => {
                record.insert(key.to_string(), value);
                Ok(())
            }
            FieldOutcome::Degraded => {
                warn!("field '{key}' degraded to null");
                record.insert(key.to_string(), Value::Null);
                Ok(())
            }
            FieldOutcome::Fatal(err) => Err(err),
        }
    }
}

/// Apply a configured field-name remapping to a decoded record.
///
/// Unmatched map entries are ignored; unmapped record fields keep their
/// driver-native names.
pub fn apply_field_map(record: &mut Record, map: &std::collections::HashMap<String, String>) {
    for (from, to) in map {
        if let Some(value) = record.remove(from) {
            record.insert(to.clone(), value);
        }
    }
}

/// Flatten a nested mapping into dotted paths.
///
/// List-valued nodes whose elements each carry a `channel` or `id` key are
/// re-keyed by that value before descent (channels normalize to `chN`, ids
/// keep their raw form); other leaves are emitted directly under the
/// accumulated path.
pub fn flatten(value: &Value, sep: &str) -> Record {
    let mut record = Record::new();
    descend(value, sep, "", &mut record);
    record
}

fn descend(value: &Value, sep: &str, prefix: &str, record: &mut Record) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                descend(child, sep, &join(prefix, key, sep), record);
            }
        }
        Value::Array(items) if is_keyed_list(items) => {
            for item in items {
                if let Some((key_field, key)) = element_key(item) {
                    let mut pruned = item.as_object().cloned().unwrap_or_default();
                    pruned.remove(&key_field);
                    descend(&Value::Object(pruned), sep, &join(prefix, &key, sep), record);
                }
            }
        }
        other => {
            record.insert(prefix.to_string(), other.clone());
        }
    }
}

fn is_keyed_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| element_key(item).is_some())
}

/// Re-key field and derived key for a channelized/id-keyed list element
fn element_key(item: &Value) -> Option<(String, String)> {
    let obj = item.as_object()?;
    if let Some(channel) = obj.get("channel") {
        let ch = match channel {
            Value::Number(n) => n.as_u64()?.to_string(),
            Value::String(s) => s.trim_start_matches("ch").to_string(),
            _ => return None,
        };
        return Some(("channel".to_string(), format!("ch{ch}")));
    }
    if let Some(id) = obj.get("id") {
        let id = match id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        return Some(("id".to_string(), id));
    }
    None
}

fn join(prefix: &str, key: &str, sep: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{sep}{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_default_separator() {
        let nested = json!({"temp": {"ch1": {"val": 13}}});
        let flat = flatten(&nested, ".");
        assert_eq!(flat.get("temp.ch1.val"), Some(&json!(13)));
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn test_flatten_custom_separator() {
        let nested = json!({"temp": {"ch1": {"val": 13}}});
        let flat = flatten(&nested, ":");
        assert_eq!(flat.get("temp:ch1:val"), Some(&json!(13)));
    }

    #[test]
    fn test_flatten_rekeys_channel_lists() {
        let nested = json!({"soil": [
            {"channel": "1", "moisture": 40},
            {"channel": "2", "moisture": 55}
        ]});
        let flat = flatten(&nested, ".");
        assert_eq!(flat.get("soil.ch1.moisture"), Some(&json!(40)));
        assert_eq!(flat.get("soil.ch2.moisture"), Some(&json!(55)));
        // The re-key field itself is consumed, not emitted.
        assert!(!flat.contains_key("soil.ch1.channel"));
    }

    #[test]
    fn test_flatten_rekeys_id_lists() {
        let nested = json!({"common": [
            {"id": "0x02", "val": "26.5"},
            {"id": "0x07", "val": "56%"}
        ]});
        let flat = flatten(&nested, ".");
        assert_eq!(flat.get("common.0x02.val"), Some(&json!("26.5")));
        assert_eq!(flat.get("common.0x07.val"), Some(&json!("56%")));
    }

    #[test]
    fn test_flatten_plain_list_is_a_leaf() {
        let nested = json!({"raw": [1, 2, 3]});
        let flat = flatten(&nested, ".");
        assert_eq!(flat.get("raw"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_apply_field_map() {
        let mut record = Record::new();
        record.insert("outtemp.val".to_string(), json!(26.5));
        record.insert("outhumid.val".to_string(), json!(56.0));

        let map = std::collections::HashMap::from([
            ("outtemp.val".to_string(), "outTemp".to_string()),
            ("no.such.field".to_string(), "ignored".to_string()),
        ]);
        apply_field_map(&mut record, &map);

        assert_eq!(record.get("outTemp"), Some(&json!(26.5)));
        assert!(!record.contains_key("outtemp.val"));
        assert_eq!(record.get("outhumid.val"), Some(&json!(56.0)));
        assert!(!record.contains_key("ignored"));
    }

    #[test]
    fn test_coerce_int() {
        let mut record = Record::new();
        FieldOutcome::coerce_int(&json!("1"))
            .store(&mut record, "newVersion")
            .unwrap();
        assert_eq!(record.get("newVersion"), Some(&json!(1)));

        FieldOutcome::coerce_int(&json!("2.3a"))
            .store(&mut record, "bad")
            .unwrap();
        assert_eq!(record.get("bad"), Some(&Value::Null));
    }

    #[test]
    fn test_coerce_bool() {
        let mut record = Record::new();
        FieldOutcome::coerce_bool(&json!("1"))
            .store(&mut record, "flag")
            .unwrap();
        assert_eq!(record.get("flag"), Some(&json!(true)));

        FieldOutcome::coerce_bool(&json!("maybe"))
            .store(&mut record, "odd")
            .unwrap();
        assert_eq!(record.get("odd"), Some(&Value::Null));
    }
}
