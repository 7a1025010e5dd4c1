//! Unit lexicon for device-native value strings
//!
//! The gateway embeds unit tokens inline with numeric values (`"4.20 km/h"`,
//! `"1003.4 hPa"`). This module maps those tokens to canonical unit names and
//! dimension groups, and supplies per-group default units for the three
//! supported output unit systems.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dimension of an observation value.
///
/// Every known observation path belongs to exactly one group; unknown paths
/// are passed through opaque with no group at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitGroup {
    Temperature,
    Speed,
    Rain,
    RainRate,
    Pressure,
    Illuminance,
    Uv,
    Direction,
    Percent,
    Count,
    Volt,
    Boolean,
    Distance,
    Concentration,
    Ppm,
    Seconds,
    Bytes,
}

impl UnitGroup {
    /// Stable lowercase tag used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitGroup::Temperature => "temperature",
            UnitGroup::Speed => "speed",
            UnitGroup::Rain => "rain",
            UnitGroup::RainRate => "rainrate",
            UnitGroup::Pressure => "pressure",
            UnitGroup::Illuminance => "illuminance",
            UnitGroup::Uv => "uv",
            UnitGroup::Direction => "direction",
            UnitGroup::Percent => "percent",
            UnitGroup::Count => "count",
            UnitGroup::Volt => "volt",
            UnitGroup::Boolean => "boolean",
            UnitGroup::Distance => "distance",
            UnitGroup::Concentration => "concentration",
            UnitGroup::Ppm => "ppm",
            UnitGroup::Seconds => "seconds",
            UnitGroup::Bytes => "bytes",
        }
    }
}

impl std::fmt::Display for UnitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output unit profile selected once from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    /// US customary (°F, mph, inHg, in)
    Us,
    /// Classic metric (°C, km/h, hPa, cm)
    Metric,
    /// Metric with weather conventions (°C, m/s, hPa, mm)
    #[default]
    MetricWx,
}

impl UnitSystem {
    /// Canonical unit the driver emits for `group` under this profile.
    ///
    /// Groups with a single representation are system-invariant. `Boolean`
    /// has no unit and returns `None`.
    pub fn default_unit(&self, group: UnitGroup) -> Option<&'static str> {
        let unit = match (group, self) {
            (UnitGroup::Temperature, UnitSystem::Us) => "F",
            (UnitGroup::Temperature, _) => "C",
            (UnitGroup::Speed, UnitSystem::Us) => "mph",
            (UnitGroup::Speed, UnitSystem::Metric) => "km/h",
            (UnitGroup::Speed, UnitSystem::MetricWx) => "m/s",
            (UnitGroup::Rain, UnitSystem::Us) => "in",
            (UnitGroup::Rain, UnitSystem::Metric) => "cm",
            (UnitGroup::Rain, UnitSystem::MetricWx) => "mm",
            (UnitGroup::RainRate, UnitSystem::Us) => "in/h",
            (UnitGroup::RainRate, UnitSystem::Metric) => "cm/h",
            (UnitGroup::RainRate, UnitSystem::MetricWx) => "mm/h",
            (UnitGroup::Pressure, UnitSystem::Us) => "inHg",
            (UnitGroup::Pressure, _) => "hPa",
            (UnitGroup::Distance, UnitSystem::Us) => "mi",
            (UnitGroup::Distance, _) => "km",
            (UnitGroup::Illuminance, _) => "lux",
            (UnitGroup::Uv, _) => "index",
            (UnitGroup::Direction, _) => "degree",
            (UnitGroup::Percent, _) => "%",
            (UnitGroup::Count, _) => "count",
            (UnitGroup::Volt, _) => "V",
            (UnitGroup::Concentration, _) => "ug/m3",
            (UnitGroup::Ppm, _) => "ppm",
            (UnitGroup::Seconds, _) => "s",
            (UnitGroup::Bytes, _) => "B",
            (UnitGroup::Boolean, _) => return None,
        };
        Some(unit)
    }
}

/// Device token → (canonical unit, dimension group).
///
/// Keys are lowercase; lookup goes through [`lookup_unit_token`] which folds
/// case. Firmware localizes the temperature glyphs in log files, hence the
/// `℃`/`℉` entries.
static UNIT_TOKENS: Lazy<HashMap<&'static str, (&'static str, UnitGroup)>> = Lazy::new(|| {
    HashMap::from([
        // Temperature
        ("c", ("C", UnitGroup::Temperature)),
        ("f", ("F", UnitGroup::Temperature)),
        ("℃", ("C", UnitGroup::Temperature)),
        ("℉", ("F", UnitGroup::Temperature)),
        // Speed
        ("km/h", ("km/h", UnitGroup::Speed)),
        ("m/s", ("m/s", UnitGroup::Speed)),
        ("mph", ("mph", UnitGroup::Speed)),
        ("knots", ("knots", UnitGroup::Speed)),
        // Rain accumulation
        ("mm", ("mm", UnitGroup::Rain)),
        ("cm", ("cm", UnitGroup::Rain)),
        ("in", ("in", UnitGroup::Rain)),
        // Rain rate
        ("mm/hr", ("mm/h", UnitGroup::RainRate)),
        ("mm/h", ("mm/h", UnitGroup::RainRate)),
        ("cm/hr", ("cm/h", UnitGroup::RainRate)),
        ("cm/h", ("cm/h", UnitGroup::RainRate)),
        ("in/hr", ("in/h", UnitGroup::RainRate)),
        ("in/h", ("in/h", UnitGroup::RainRate)),
        // Pressure
        ("hpa", ("hPa", UnitGroup::Pressure)),
        ("inhg", ("inHg", UnitGroup::Pressure)),
        ("mmhg", ("mmHg", UnitGroup::Pressure)),
        ("kpa", ("kPa", UnitGroup::Pressure)),
        // Solar / light
        ("w/m2", ("W/m2", UnitGroup::Illuminance)),
        ("lux", ("lux", UnitGroup::Illuminance)),
        ("klux", ("klux", UnitGroup::Illuminance)),
        ("kfc", ("kfc", UnitGroup::Illuminance)),
        ("fc", ("fc", UnitGroup::Illuminance)),
        // Distance (lightning range, laser depth)
        ("km", ("km", UnitGroup::Distance)),
        ("mi", ("mi", UnitGroup::Distance)),
        ("m", ("m", UnitGroup::Distance)),
        ("ft", ("ft", UnitGroup::Distance)),
        // Scalar tags
        ("%", ("%", UnitGroup::Percent)),
        ("v", ("V", UnitGroup::Volt)),
        ("ug/m3", ("ug/m3", UnitGroup::Concentration)),
        ("ppm", ("ppm", UnitGroup::Ppm)),
    ])
});

/// Resolve a device unit token case-insensitively.
///
/// Returns the canonical unit name and its group, or `None` for tokens the
/// lexicon does not know.
pub fn lookup_unit_token(token: &str) -> Option<(&'static str, UnitGroup)> {
    UNIT_TOKENS.get(token.to_lowercase().as_str()).copied()
}
