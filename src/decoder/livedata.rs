//! Decoder for the `get_livedata_info` endpoint
//!
//! The live-data response is a bundle of loosely typed sections: the id-keyed
//! `common_list`, the two rain gauges, per-channel sensor arrays and a few
//! singleton blocks. Every leaf becomes one or more flattened dotted-path
//! fields; a field that fails to decode is nulled, never fatal. Only a
//! response that is not a mapping at all fails the call.

use crate::decoder::{flatten, FieldOutcome, Record};
use crate::error::{GatewayError, Result};
use crate::units::{UnitGroup, UnitSystem};
use crate::value::parse_obs_value;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Closed set of per-id value processors.
///
/// Dispatch is by id class, not by name lookup; new device ids fall through
/// to raw passthrough instead of failing the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdProcessor {
    Temperature,
    Humidity,
    Pressure,
    Direction,
    Speed,
    Rain,
    RainRate,
    Light,
    UvIndex,
    Distance,
    Count,
    Boolean,
}

impl IdProcessor {
    fn group(self) -> UnitGroup {
        match self {
            IdProcessor::Temperature => UnitGroup::Temperature,
            IdProcessor::Humidity => UnitGroup::Percent,
            IdProcessor::Pressure => UnitGroup::Pressure,
            IdProcessor::Direction => UnitGroup::Direction,
            IdProcessor::Speed => UnitGroup::Speed,
            IdProcessor::Rain => UnitGroup::Rain,
            IdProcessor::RainRate => UnitGroup::RainRate,
            IdProcessor::Light => UnitGroup::Illuminance,
            IdProcessor::UvIndex => UnitGroup::Uv,
            IdProcessor::Distance => UnitGroup::Distance,
            IdProcessor::Count => UnitGroup::Count,
            IdProcessor::Boolean => UnitGroup::Boolean,
        }
    }
}

/// `common_list` id → (field name, processor).
///
/// Id `3` is undocumented in vendor materials; treating it as feels-like
/// temperature is a convention of this driver, inferred from observed
/// values, and could change with firmware.
const COMMON_IDS: &[(&str, &str, IdProcessor)] = &[
    ("0x02", "outtemp", IdProcessor::Temperature),
    ("0x03", "dewpoint", IdProcessor::Temperature),
    ("3", "feelslike", IdProcessor::Temperature),
    ("0x04", "windchill", IdProcessor::Temperature),
    ("0x05", "heatindex", IdProcessor::Temperature),
    ("0x07", "outhumid", IdProcessor::Humidity),
    ("0x0A", "winddir", IdProcessor::Direction),
    ("0x0B", "windspeed", IdProcessor::Speed),
    ("0x0C", "gustspeed", IdProcessor::Speed),
    ("0x15", "solarradiation", IdProcessor::Light),
    ("0x17", "uvi", IdProcessor::UvIndex),
    ("0x19", "daymaxwind", IdProcessor::Speed),
];

/// Rain section id → (field name, processor), shared by both gauges
const RAIN_IDS: &[(&str, &str, IdProcessor)] = &[
    ("0x0D", "event", IdProcessor::Rain),
    ("0x0E", "rate", IdProcessor::RainRate),
    ("0x10", "day", IdProcessor::Rain),
    ("0x11", "week", IdProcessor::Rain),
    ("0x12", "month", IdProcessor::Rain),
    ("0x13", "year", IdProcessor::Rain),
    ("srain_piezo", "state", IdProcessor::Boolean),
];

/// What one source field inside a channelized/singleton block decodes to
enum BlockField {
    Obs(UnitGroup),
    Battery,
    Leak,
    Raw,
}

/// Decode a `get_livedata_info` response into a flattened record.
pub fn parse_livedata(response: &Value, units: Option<UnitSystem>) -> Result<Record> {
    let obj = response
        .as_object()
        .ok_or_else(|| GatewayError::parse("livedata response is not a mapping"))?;

    let mut nested = Map::new();

    if let Some(items) = obj.get("common_list").and_then(|v| v.as_array()) {
        decode_id_list(items, COMMON_IDS, units, &mut nested);
    }
    if let Some(items) = obj.get("rain").and_then(|v| v.as_array()) {
        let mut section = Map::new();
        decode_id_list(items, RAIN_IDS, units, &mut section);
        nested.insert("rain".to_string(), Value::Object(section));
    }
    if let Some(items) = obj.get("piezoRain").and_then(|v| v.as_array()) {
        let mut section = Map::new();
        decode_id_list(items, RAIN_IDS, units, &mut section);
        nested.insert("piezo_rain".to_string(), Value::Object(section));
    }

    if let Some(block) = singleton(obj.get("wh25")) {
        decode_block(
            &block,
            &[
                ("intemp", "intemp", BlockField::Obs(UnitGroup::Temperature)),
                ("inhum", "inhumid", BlockField::Obs(UnitGroup::Percent)),
                ("abs", "absbarometer", BlockField::Obs(UnitGroup::Pressure)),
                ("rel", "relbarometer", BlockField::Obs(UnitGroup::Pressure)),
            ],
            units,
            &mut nested,
        );
    }
    if let Some(block) = singleton(obj.get("lightning")) {
        let mut section = Map::new();
        decode_block(
            &block,
            &[
                ("distance", "distance", BlockField::Obs(UnitGroup::Distance)),
                ("count", "count", BlockField::Obs(UnitGroup::Count)),
                ("timestamp", "timestamp", BlockField::Raw),
            ],
            units,
            &mut section,
        );
        nested.insert("lightning".to_string(), Value::Object(section));
    }
    if let Some(block) = singleton(obj.get("co2")) {
        let mut section = Map::new();
        decode_block(
            &block,
            &[
                ("temp", "temperature", BlockField::Obs(UnitGroup::Temperature)),
                ("humidity", "humidity", BlockField::Obs(UnitGroup::Percent)),
                ("PM25", "pm25", BlockField::Obs(UnitGroup::Concentration)),
                ("PM25_24H", "pm25_24h", BlockField::Obs(UnitGroup::Concentration)),
                ("PM10", "pm10", BlockField::Obs(UnitGroup::Concentration)),
                ("PM10_24H", "pm10_24h", BlockField::Obs(UnitGroup::Concentration)),
                ("CO2", "co2", BlockField::Obs(UnitGroup::Ppm)),
                ("CO2_24H", "co2_24h", BlockField::Obs(UnitGroup::Ppm)),
                ("battery", "battery", BlockField::Battery),
            ],
            units,
            &mut section,
        );
        nested.insert("co2".to_string(), Value::Object(section));
    }

    let channel_sections: &[(&str, &str, &[(&str, &str, BlockField)])] = &[
        (
            "ch_aisle",
            "temp_hum",
            &[
                ("temp", "temp", BlockField::Obs(UnitGroup::Temperature)),
                ("humidity", "humidity", BlockField::Obs(UnitGroup::Percent)),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
        (
            "ch_temp",
            "temp",
            &[
                ("temp", "temp", BlockField::Obs(UnitGroup::Temperature)),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
        (
            "ch_soil",
            "soil",
            &[
                ("humidity", "moisture", BlockField::Obs(UnitGroup::Percent)),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
        (
            "ch_leaf",
            "leaf",
            &[
                ("humidity", "wetness", BlockField::Obs(UnitGroup::Percent)),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
        (
            "ch_pm25",
            "pm25",
            &[
                ("PM25", "pm25", BlockField::Obs(UnitGroup::Concentration)),
                ("PM25_24H", "pm25_24h", BlockField::Obs(UnitGroup::Concentration)),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
        (
            "ch_leak",
            "leak",
            &[
                ("status", "status", BlockField::Leak),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
        (
            "ch_lds",
            "lds",
            &[
                ("air", "air", BlockField::Obs(UnitGroup::Distance)),
                ("depth", "depth", BlockField::Obs(UnitGroup::Distance)),
                ("battery", "battery", BlockField::Battery),
            ],
        ),
    ];
    for (source, target, fields) in channel_sections {
        if let Some(items) = obj.get(*source).and_then(|v| v.as_array()) {
            let section = decode_channels(items, fields, units, target);
            if !section.is_empty() {
                nested.insert((*target).to_string(), Value::Object(section));
            }
        }
    }

    if let Some(block) = singleton(obj.get("debug")) {
        let mut section = Map::new();
        for (key, kind) in [
            ("heap", "int"),
            ("runtime", "int"),
            ("usr_interval", "int"),
            ("is_cnip", "bool"),
        ] {
            if let Some(raw) = block.get(key) {
                let outcome = match kind {
                    "bool" => FieldOutcome::coerce_bool(raw),
                    _ => FieldOutcome::coerce_int(raw),
                };
                store_nested(&mut section, key, outcome);
            }
        }
        nested.insert("debug".to_string(), Value::Object(section));
    }

    Ok(flatten(&Value::Object(nested), "."))
}

/// Decode an id-keyed list through a processor table into `out`.
///
/// Known ids land under their mapped names as `{name: {"val": ...}}`;
/// unknown ids pass through raw under the id itself.
fn decode_id_list(
    items: &[Value],
    table: &[(&str, &str, IdProcessor)],
    units: Option<UnitSystem>,
    out: &mut Map<String, Value>,
) {
    for item in items {
        let Some(id) = item_id(item) else {
            warn!("skipping livedata list element with no id");
            continue;
        };
        match table.iter().find(|(tid, _, _)| *tid == id) {
            Some((_, name, IdProcessor::Boolean)) => {
                let outcome = match item.get("val") {
                    Some(raw) => FieldOutcome::coerce_bool(raw),
                    None => FieldOutcome::Degraded,
                };
                store_nested(out, name, outcome);
            }
            Some((_, name, processor)) => {
                let mut entry = Map::new();
                match parse_obs_value("val", item, processor.group(), units) {
                    Ok(obs) => {
                        entry.insert("val".to_string(), Value::from(obs.value));
                    }
                    Err(e) => {
                        warn!("livedata field '{name}' (id {id}) degraded: {e}");
                        entry.insert("val".to_string(), Value::Null);
                    }
                }
                out.insert((*name).to_string(), Value::Object(entry));
            }
            None => {
                // Forward compatibility: new ids never hard-fail the decode.
                debug!("passing through unknown livedata id {id}");
                out.insert(id, item.get("val").cloned().unwrap_or(Value::Null));
            }
        }
    }
}

/// Decode a channelized section into a `chN`-keyed object
fn decode_channels(
    items: &[Value],
    fields: &[(&str, &str, BlockField)],
    units: Option<UnitSystem>,
    section_name: &str,
) -> Map<String, Value> {
    let mut section = Map::new();
    for item in items {
        let Some(channel) = item_channel(item) else {
            warn!("skipping {section_name} element with no channel");
            continue;
        };
        let mut entry = Map::new();
        decode_block(item, fields, units, &mut entry);
        section.insert(format!("ch{channel}"), Value::Object(entry));
    }
    section
}

/// Decode the configured fields of one block into `out`.
///
/// Absent source fields stay absent; present-but-bad fields degrade to null.
fn decode_block(
    block: &Value,
    fields: &[(&str, &str, BlockField)],
    units: Option<UnitSystem>,
    out: &mut Map<String, Value>,
) {
    for (src, dst, kind) in fields {
        let Some(raw) = block.get(*src) else {
            continue;
        };
        match kind {
            BlockField::Obs(group) => {
                let mut entry = Map::new();
                match parse_obs_value(src, block, *group, units) {
                    Ok(obs) => {
                        entry.insert("val".to_string(), Value::from(obs.value));
                    }
                    Err(e) => {
                        warn!("field '{dst}' degraded: {e}");
                        entry.insert("val".to_string(), Value::Null);
                    }
                }
                out.insert((*dst).to_string(), Value::Object(entry));
            }
            BlockField::Battery => {
                let (battery, volts) = parse_battery(raw);
                out.insert((*dst).to_string(), battery);
                if let Some(volts) = volts {
                    out.insert("voltage".to_string(), Value::from(volts));
                }
            }
            BlockField::Leak => {
                store_nested(out, dst, coerce_leak(raw));
            }
            BlockField::Raw => {
                out.insert((*dst).to_string(), raw.clone());
            }
        }
    }
}

/// Battery fields arrive as bare scale values (`"0"`, `"4"`) or voltage
/// strings (`"1.40V"`). Returns the numeric battery value plus the parsed
/// volts when the voltage form was used.
fn parse_battery(raw: &Value) -> (Value, Option<f64>) {
    let text = match raw {
        Value::Number(n) => return (Value::from(n.as_f64().unwrap_or(0.0)), None),
        Value::String(s) => s.trim(),
        _ => return (Value::Null, None),
    };
    if let Some(stripped) = text.strip_suffix(['V', 'v']) {
        match stripped.trim().parse::<f64>() {
            Ok(volts) => return (Value::from(volts), Some(volts)),
            Err(_) => return (Value::Null, None),
        }
    }
    match text.parse::<f64>() {
        Ok(v) => (Value::from(v), None),
        Err(_) => (Value::Null, None),
    }
}

/// Leak sensors report `"0"`/`"1"` on some firmware and `"Normal"`/
/// `"Leaking"` on others.
fn coerce_leak(raw: &Value) -> FieldOutcome {
    if let Some(s) = raw.as_str() {
        match s.trim().to_lowercase().as_str() {
            "normal" => return FieldOutcome::Ok(Value::from(false)),
            "leaking" | "leak" => return FieldOutcome::Ok(Value::from(true)),
            _ => {}
        }
    }
    FieldOutcome::coerce_bool(raw)
}

fn store_nested(out: &mut Map<String, Value>, key: &str, outcome: FieldOutcome) {
    match outcome {
        FieldOutcome::Ok(value) => {
            out.insert(key.to_string(), value);
        }
        FieldOutcome::Degraded => {
            warn!("field '{key}' degraded to null");
            out.insert(key.to_string(), Value::Null);
        }
        FieldOutcome::Fatal(err) => {
            // Block decoding has no fatal path; keep the field visible.
            warn!("field '{key}' degraded to null: {err}");
            out.insert(key.to_string(), Value::Null);
        }
    }
}

fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn item_channel(item: &Value) -> Option<String> {
    match item.get("channel")? {
        Value::String(s) => Some(s.trim_start_matches("ch").to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Singleton sections appear as a one-element array on most firmware and as
/// a bare object on some revisions.
fn singleton(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Array(items) => items.first().filter(|v| v.is_object()).cloned(),
        obj @ Value::Object(_) => Some(obj.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_livedata() -> Value {
        json!({
            "common_list": [
                {"id": "0x02", "val": "26.5", "unit": "C"},
                {"id": "0x07", "val": "56%"},
                {"id": "3", "val": "28.1", "unit": "C"},
                {"id": "0x0A", "val": "270"},
                {"id": "0x0B", "val": "4.20 km/h"},
                {"id": "0x0C", "val": "7.60 km/h"},
                {"id": "0x15", "val": "632.50 W/m2"},
                {"id": "0x17", "val": "3"},
                {"id": "0xAB", "val": "whatever"}
            ],
            "rain": [
                {"id": "0x0D", "val": "0.0 mm"},
                {"id": "0x0E", "val": "0.0 mm/Hr"},
                {"id": "0x13", "val": "432.2 mm"}
            ],
            "piezoRain": [
                {"id": "0x0D", "val": "1.2 mm"},
                {"id": "srain_piezo", "val": "1"}
            ],
            "wh25": [
                {"intemp": "23.9", "unit": "C", "inhum": "48%", "abs": "1003.4 hPa", "rel": "1009.0 hPa"}
            ],
            "lightning": [
                {"distance": "16 km", "timestamp": "07/22/2026 11:12:30", "count": "3"}
            ],
            "co2": [
                {"temp": "24.1", "unit": "C", "humidity": "51%", "PM25": "6.0 ug/m3",
                 "CO2": "511 ppm", "battery": "5"}
            ],
            "ch_aisle": [
                {"channel": "1", "name": "", "battery": "0", "temp": "24.2", "unit": "C", "humidity": "55%"},
                {"channel": "3", "name": "", "battery": "1", "temp": "19.9", "unit": "C", "humidity": "61%"}
            ],
            "ch_soil": [
                {"channel": "1", "battery": "1.40V", "humidity": "40%"}
            ],
            "ch_leak": [
                {"channel": "2", "battery": "4", "status": "Normal"}
            ],
            "ch_lds": [
                {"channel": "1", "battery": "1.60V", "air": "50 mm", "depth": "950 mm"}
            ],
            "debug": [
                {"heap": "115092", "runtime": "356", "usr_interval": "60", "is_cnip": true}
            ]
        })
    }

    #[test]
    fn test_common_list_decoding() {
        let record = parse_livedata(&sample_livedata(), Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("outtemp.val"), Some(&json!(26.5)));
        assert_eq!(record.get("outhumid.val"), Some(&json!(56.0)));
        assert_eq!(record.get("feelslike.val"), Some(&json!(28.1)));
        assert_eq!(record.get("winddir.val"), Some(&json!(270.0)));
        assert_eq!(record.get("windspeed.val"), Some(&json!(4.2)));
        assert_eq!(record.get("uvi.val"), Some(&json!(3.0)));
    }

    #[test]
    fn test_unknown_id_passes_through_raw() {
        let record = parse_livedata(&sample_livedata(), Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("0xAB"), Some(&json!("whatever")));
    }

    #[test]
    fn test_rain_sections() {
        let record = parse_livedata(&sample_livedata(), Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("rain.event.val"), Some(&json!(0.0)));
        assert_eq!(record.get("rain.rate.val"), Some(&json!(0.0)));
        assert_eq!(record.get("rain.year.val"), Some(&json!(432.2)));
        assert_eq!(record.get("piezo_rain.event.val"), Some(&json!(1.2)));
        assert_eq!(record.get("piezo_rain.state"), Some(&json!(true)));
    }

    #[test]
    fn test_indoor_block() {
        let record = parse_livedata(&sample_livedata(), Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("intemp.val"), Some(&json!(23.9)));
        assert_eq!(record.get("inhumid.val"), Some(&json!(48.0)));
        assert_eq!(record.get("absbarometer.val"), Some(&json!(1003.4)));
        assert_eq!(record.get("relbarometer.val"), Some(&json!(1009.0)));
    }

    #[test]
    fn test_channel_sections() {
        let record = parse_livedata(&sample_livedata(), Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("temp_hum.ch1.temp.val"), Some(&json!(24.2)));
        assert_eq!(record.get("temp_hum.ch1.humidity.val"), Some(&json!(55.0)));
        assert_eq!(record.get("temp_hum.ch1.battery"), Some(&json!(0.0)));
        assert_eq!(record.get("temp_hum.ch3.temp.val"), Some(&json!(19.9)));
        assert_eq!(record.get("soil.ch1.moisture.val"), Some(&json!(40.0)));
        assert_eq!(record.get("soil.ch1.battery"), Some(&json!(1.4)));
        assert_eq!(record.get("soil.ch1.voltage"), Some(&json!(1.4)));
        assert_eq!(record.get("leak.ch2.status"), Some(&json!(false)));
        assert_eq!(record.get("lds.ch1.air.val"), Some(&json!(50.0)));
        assert_eq!(record.get("lds.ch1.depth.val"), Some(&json!(950.0)));
    }

    #[test]
    fn test_singleton_blocks() {
        let record = parse_livedata(&sample_livedata(), Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("lightning.distance.val"), Some(&json!(16.0)));
        assert_eq!(record.get("lightning.count.val"), Some(&json!(3.0)));
        assert_eq!(
            record.get("lightning.timestamp"),
            Some(&json!("07/22/2026 11:12:30"))
        );
        assert_eq!(record.get("co2.co2.val"), Some(&json!(511.0)));
        assert_eq!(record.get("co2.pm25.val"), Some(&json!(6.0)));
        assert_eq!(record.get("debug.heap"), Some(&json!(115092)));
        assert_eq!(record.get("debug.is_cnip"), Some(&json!(true)));
    }

    #[test]
    fn test_bad_field_degrades_but_decode_continues() {
        let raw = json!({
            "common_list": [
                {"id": "0x02", "val": "garbage", "unit": "C"},
                {"id": "0x0B", "val": "4.20 km/h"}
            ]
        });
        let record = parse_livedata(&raw, Some(UnitSystem::MetricWx)).unwrap();
        assert_eq!(record.get("outtemp.val"), Some(&Value::Null));
        assert_eq!(record.get("windspeed.val"), Some(&json!(4.2)));
    }

    #[test]
    fn test_structurally_wrong_response_fails() {
        let err = parse_livedata(&json!(["not", "a", "mapping"]), None).unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
    }

    #[test]
    fn test_empty_response_yields_empty_record() {
        let record = parse_livedata(&json!({}), Some(UnitSystem::Metric)).unwrap();
        assert!(record.is_empty());
    }
}
