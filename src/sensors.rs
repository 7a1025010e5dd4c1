//! Sensor registry and live sensor classification
//!
//! The gateway reports every sensor slot it knows about, whether or not a
//! physical sensor is paired. This module owns the static address→name table,
//! the per-model battery semantics, and the per-poll classification of the
//! live sensor list into connected/enabled/learning/disabled sets.

use crate::error::{GatewayError, Result};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

/// Sensor ids the gateway uses for slots with no registered sensor.
///
/// Observed device behavior, not vendor documentation: `fffffffe` shows up
/// while the gateway is searching for a sensor, `ffffffff` when the slot is
/// switched off. Subject to revision with firmware updates.
pub const NOT_REGISTERED: [&str; 2] = ["fffffffe", "ffffffff"];

/// Models whose battery field is informational only and never maps to a
/// low-battery condition (externally powered or super-capacitor buffered).
/// Hand-curated from observed device behavior.
pub const NO_LOW_MODELS: &[&str] = &["ws80", "ws85", "ws90"];

/// Sensor address → (model, channel) for the known address space (0..=69).
static SENSOR_ADDRESSES: Lazy<HashMap<u8, (&'static str, Option<u8>)>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let singles: [(u8, &'static str); 10] = [
        (0, "wh65"),
        (1, "wh68"),
        (2, "ws80"),
        (3, "wh40"),
        (4, "wh25"),
        (5, "wh26"),
        (26, "wh57"),
        (39, "wh45"),
        (48, "ws90"),
        (49, "ws85"),
    ];
    for (addr, model) in singles {
        map.insert(addr, (model, None));
    }
    // Channelized banks: (first address, model, first channel, last channel)
    let banks: [(u8, &'static str, u8, u8); 9] = [
        (6, "wn31", 1, 8),
        (14, "wn51", 1, 8),
        (22, "wh41", 1, 4),
        (27, "wh55", 1, 4),
        (31, "wn34", 1, 8),
        (40, "wn35", 1, 8),
        (50, "wn51", 9, 16),
        (58, "wh54", 1, 4),
        (62, "wn31", 9, 16),
    ];
    for (base, model, first, last) in banks {
        for ch in first..=last {
            map.insert(base + (ch - first), (model, Some(ch)));
        }
    }
    map
});

/// Logical name for a sensor address.
///
/// Addresses outside the known table pass through as a descriptive string
/// instead of failing the caller's decode.
pub fn sensor_name(address: u8) -> String {
    match SENSOR_ADDRESSES.get(&address) {
        Some((model, Some(ch))) => format!("{model}_ch{ch}"),
        Some((model, None)) => (*model).to_string(),
        None => format!("unknown sensor: address {address}"),
    }
}

/// Registry address for a (model, channel) pair, if the pair is known
pub fn sensor_address(model: &str, channel: Option<u8>) -> Option<u8> {
    SENSOR_ADDRESSES
        .iter()
        .find(|(_, (m, ch))| *m == model && *ch == channel)
        .map(|(addr, _)| *addr)
}

/// How a model encodes its battery field in the sensor list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryClass {
    /// 0 = ok, 1 = low
    Binary,
    /// 0..=5 severity scale, low at 1 or below
    IntegerScale,
    /// Raw value × 0.02 ≈ volts, low below 1.2 V
    Voltage,
}

/// Battery semantics for a model
pub fn battery_class(model: &str) -> Option<BatteryClass> {
    match model {
        "wh65" | "wh25" | "wh26" | "wh40" | "wn31" => Some(BatteryClass::Binary),
        "wh41" | "wh45" | "wh55" | "wh57" => Some(BatteryClass::IntegerScale),
        "wh68" | "ws80" | "ws85" | "ws90" | "wn34" | "wn35" | "wn51" | "wh54" => {
            Some(BatteryClass::Voltage)
        }
        _ => None,
    }
}

/// Interpreted battery condition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatteryState {
    Ok,
    Low,
    /// Voltage-class reading in volts; low-battery judgment included
    Voltage { volts: f64, low: bool },
    /// Unknown model or out-of-range raw value
    Unknown,
}

/// Interpret a raw sensor-list battery value for `model`.
///
/// Models in [`NO_LOW_MODELS`] never report `Low`; their reading is
/// informational only.
pub fn battery_state(model: &str, raw: f64) -> BatteryState {
    let no_low = NO_LOW_MODELS.contains(&model);
    match battery_class(model) {
        Some(BatteryClass::Binary) => match raw as i64 {
            0 => BatteryState::Ok,
            1 if no_low => BatteryState::Ok,
            1 => BatteryState::Low,
            _ => BatteryState::Unknown,
        },
        Some(BatteryClass::IntegerScale) => {
            if !(0.0..=6.0).contains(&raw) {
                BatteryState::Unknown
            } else if raw <= 1.0 && !no_low {
                BatteryState::Low
            } else {
                BatteryState::Ok
            }
        }
        Some(BatteryClass::Voltage) => {
            let volts = raw * 0.02;
            BatteryState::Voltage {
                volts,
                low: volts < 1.2 && !no_low,
            }
        }
        None => BatteryState::Unknown,
    }
}

/// Human-readable battery description for diagnostics
pub fn battery_desc(model: &str, raw: f64) -> String {
    match battery_state(model, raw) {
        BatteryState::Ok => "OK".to_string(),
        BatteryState::Low => "low".to_string(),
        BatteryState::Voltage { volts, low } => {
            if low {
                format!("{volts:.2}V (low)")
            } else {
                format!("{volts:.2}V")
            }
        }
        BatteryState::Unknown => format!("unknown battery value {raw}"),
    }
}

/// Identity record for one physical sensor slot, rebuilt on every poll
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    pub address: Option<u8>,
    pub model: String,
    pub channel: Option<u8>,
    /// 8-hex-char sensor id, lowercased; sentinel values mark unpaired slots
    pub id: String,
    pub battery_raw: Option<f64>,
    pub signal: Option<i64>,
    pub enabled: bool,
    pub version: Option<String>,
}

impl SensorDescriptor {
    /// Composite name: model plus channel suffix (`wn31_ch3`)
    pub fn composite_name(&self) -> String {
        match self.channel {
            Some(ch) => format!("{}_ch{ch}", self.model),
            None => self.model.clone(),
        }
    }

    /// True when the id is one of the not-registered sentinels
    pub fn is_registered(&self) -> bool {
        !NOT_REGISTERED.contains(&self.id.as_str())
    }
}

/// Poll-scoped view of the gateway's sensor list.
///
/// `update` replaces the held state wholesale; there is a single writer per
/// poll cycle and no merging across polls.
#[derive(Debug, Clone)]
pub struct GatewaySensors {
    only_registered: bool,
    sensors: Vec<SensorDescriptor>,
}

impl GatewaySensors {
    /// Create an empty registry view.
    ///
    /// `only_registered` requires the device-side enable flag before a
    /// sensor counts as enabled.
    pub fn new(only_registered: bool) -> Self {
        Self {
            only_registered,
            sensors: Vec::new(),
        }
    }

    /// Replace the held sensor data from a raw sensor-list response.
    ///
    /// The response is a nested per-model mapping whose values are either a
    /// single sensor entry, a per-channel mapping, or a list of entries
    /// carrying a `channel` key. A top-level non-mapping fails the call.
    pub fn update(&mut self, raw: &Value) -> Result<()> {
        let obj = raw
            .as_object()
            .ok_or_else(|| GatewayError::parse("sensor list response is not a mapping"))?;

        let mut sensors = Vec::new();
        for (model, entry) in obj {
            match entry {
                Value::Object(map) if map.contains_key("id") => {
                    sensors.push(parse_entry(model, None, entry));
                }
                Value::Object(map) => {
                    for (ch_key, ch_entry) in map {
                        if !ch_entry.is_object() {
                            warn!("skipping malformed sensor entry {model}.{ch_key}");
                            continue;
                        }
                        sensors.push(parse_entry(model, parse_channel(ch_key), ch_entry));
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if !item.is_object() {
                            warn!("skipping malformed sensor entry under {model}");
                            continue;
                        }
                        let channel = item
                            .get("channel")
                            .and_then(value_as_u8)
                            .or_else(|| item.get("channel").and_then(|v| v.as_str()).and_then(parse_channel));
                        sensors.push(parse_entry(model, channel, item));
                    }
                }
                _ => warn!("skipping malformed sensor section {model}"),
            }
        }

        self.sensors = sensors;
        Ok(())
    }

    /// Distinct model names present, natural sorted
    pub fn all_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.sensors.iter().map(|s| s.model.clone()).collect();
        models.sort_by(|a, b| natural_cmp(a, b));
        models.dedup();
        models
    }

    /// Every composite sensor name present, natural sorted
    pub fn all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sensors.iter().map(|s| s.composite_name()).collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    /// Composite names with a registered id satisfying the registration policy
    pub fn enabled(&self) -> Vec<String> {
        self.filtered(|s| self.is_enabled(s))
    }

    /// Composite names present but failing the enabled test
    pub fn disabled(&self) -> Vec<String> {
        self.filtered(|s| !self.is_enabled(s))
    }

    /// Slots the gateway is seeing but has not paired yet
    pub fn learning(&self) -> Vec<String> {
        self.filtered(|s| is_learning(s))
    }

    /// Enabled and not learning
    pub fn connected(&self) -> Vec<String> {
        self.filtered(|s| self.is_enabled(s) && !is_learning(s))
    }

    /// The raw descriptors from the current poll
    pub fn descriptors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    fn is_enabled(&self, s: &SensorDescriptor) -> bool {
        s.is_registered() && (!self.only_registered || s.enabled)
    }

    fn filtered<F: Fn(&SensorDescriptor) -> bool>(&self, pred: F) -> Vec<String> {
        let mut names: Vec<String> = self
            .sensors
            .iter()
            .filter(|s| pred(s))
            .map(|s| s.composite_name())
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }
}

fn is_learning(s: &SensorDescriptor) -> bool {
    !s.is_registered()
        && (s.signal.map_or(false, |sig| sig > 0) || s.battery_raw.map_or(false, |b| b > 0.0))
}

fn parse_entry(model: &str, channel: Option<u8>, entry: &Value) -> SensorDescriptor {
    let id = entry
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("ffffffff")
        .to_lowercase();
    let address = entry
        .get("address")
        .and_then(value_as_u8)
        .or_else(|| sensor_address(model, channel));
    let battery_raw = entry
        .get("batt")
        .or_else(|| entry.get("battery"))
        .and_then(value_as_f64);
    let signal = entry.get("signal").and_then(value_as_i64);
    let enabled = entry
        .get("idst")
        .or_else(|| entry.get("enabled"))
        .and_then(value_as_bool)
        .unwrap_or(true);
    let version = entry
        .get("version")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    SensorDescriptor {
        address,
        model: model.to_string(),
        channel,
        id,
        battery_raw,
        signal,
        enabled,
        version,
    }
}

fn parse_channel(key: &str) -> Option<u8> {
    key.trim_start_matches("ch").parse().ok()
}

fn value_as_u8(v: &Value) -> Option<u8> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Alphanumeric-aware ordering: digit runs compare numerically, so
/// `wn31_ch2` sorts before `wn31_ch10`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_chunks = chunk(a);
    let b_chunks = chunk(b);
    for (ca, cb) in a_chunks.iter().zip(b_chunks.iter()) {
        let ord = match (ca.parse::<u64>(), cb.parse::<u64>()) {
            (Ok(na), Ok(nb)) => na.cmp(&nb),
            _ => ca.cmp(cb),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_chunks.len().cmp(&b_chunks.len())
}

fn chunk(s: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = None;
    for c in s.chars() {
        let is_digit = c.is_ascii_digit();
        if current_is_digit != Some(is_digit) && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current_is_digit = Some(is_digit);
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
