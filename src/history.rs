//! History catchup from device-resident SD log files
//!
//! The gateway archives observations to monthly CSV files on its SD card in
//! a wire format of its own: a header row of field codes, data rows, and —
//! on partially corrupted flash — embedded NUL padding and blank lines.
//! This module turns those files into the same normalized records the live
//! decoder produces, so catchup and live streams are interchangeable to the
//! caller.

use crate::client::GatewayHttpClient;
use crate::decoder::{apply_field_map, Record};
use crate::error::{GatewayError, Result};
use crate::units::{lookup_unit_token, UnitGroup, UnitSystem};
use crate::value::parse_obs_value;
use async_stream::stream;
use chrono::{Datelike, NaiveDateTime, TimeZone, Utc};
use futures::Stream;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Archive cadence assumed for the first row of a file; later rows derive
/// their interval from the row spacing.
const DEFAULT_LOG_INTERVAL: i64 = 300;

/// Log file names: `<YYYYMM><A-Z>.csv` or `<YYYYMM>Allsensors_<A-Z>.csv`
static LOG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(Allsensors_)?([A-Z])\.csv$").expect("log name regex"));

/// Header cells: `<field code>(<unit>)`, unit optional
static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\s*\(([^()]*)\)\s*$").expect("header regex"));

/// Channel-prefixed field codes: `CH<n> <field>`
static CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[Cc][Hh](\d+)\s+(.*)$").expect("channel header regex"));

/// Scalar header field code → (record path, unit group)
const SCALAR_FIELDS: &[(&str, &str, UnitGroup)] = &[
    ("Indoor Temperature", "intemp.val", UnitGroup::Temperature),
    ("Indoor Humidity", "inhumid.val", UnitGroup::Percent),
    ("Outdoor Temperature", "outtemp.val", UnitGroup::Temperature),
    ("Outdoor Humidity", "outhumid.val", UnitGroup::Percent),
    ("Dew Point", "dewpoint.val", UnitGroup::Temperature),
    ("Feels Like", "feelslike.val", UnitGroup::Temperature),
    ("Wind", "windspeed.val", UnitGroup::Speed),
    ("Gust", "gustspeed.val", UnitGroup::Speed),
    ("Wind Direction", "winddir.val", UnitGroup::Direction),
    ("ABS Pressure", "absbarometer.val", UnitGroup::Pressure),
    ("REL Pressure", "relbarometer.val", UnitGroup::Pressure),
    ("Solar Rad", "solarradiation.val", UnitGroup::Illuminance),
    ("UV-Index", "uvi.val", UnitGroup::Uv),
    ("Rain Rate", "rain.rate.val", UnitGroup::RainRate),
    ("Event Rain", "rain.event.val", UnitGroup::Rain),
    ("Hourly Rain", "rain.hour.val", UnitGroup::Rain),
    ("Daily Rain", "rain.day.val", UnitGroup::Rain),
    ("Weekly Rain", "rain.week.val", UnitGroup::Rain),
    ("Monthly Rain", "rain.month.val", UnitGroup::Rain),
    ("Yearly Rain", "rain.year.val", UnitGroup::Rain),
];

/// Channel header field code → (path template, unit group)
const CHANNEL_FIELDS: &[(&str, &str, &str, UnitGroup)] = &[
    ("Temperature", "temp_hum", "temp.val", UnitGroup::Temperature),
    ("Humidity", "temp_hum", "humidity.val", UnitGroup::Percent),
    ("Soil Moisture", "soil", "moisture.val", UnitGroup::Percent),
    ("PM2.5", "pm25", "pm25.val", UnitGroup::Concentration),
    ("Leaf Wetness", "leaf", "wetness.val", UnitGroup::Percent),
];

/// Strip embedded NUL bytes and drop blank lines, preserving order.
///
/// Partially corrupted flash interleaves NUL padding with real content;
/// the surviving characters still form valid lines once the padding goes.
pub fn clean_data<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let cleaned: String = line.chars().filter(|c| *c != '\0').collect();
            let cleaned = cleaned.trim_end_matches(['\r', '\n']).to_string();
            if cleaned.trim().is_empty() {
                None
            } else {
                Some(cleaned)
            }
        })
        .collect()
}

/// One selectable device log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub name: String,
    pub year: i32,
    pub month: u32,
    pub allsensors: bool,
    pub revision: char,
}

/// Parse a device log file name, if it matches the known patterns
pub fn parse_log_name(name: &str) -> Option<LogFile> {
    let caps = LOG_NAME_RE.captures(name)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    let revision = caps.get(4)?.as_str().chars().next()?;
    Some(LogFile {
        name: name.to_string(),
        year,
        month,
        allsensors: caps.get(3).is_some(),
        revision,
    })
}

/// What one CSV column decodes to
enum ColumnKind {
    Time,
    Obs { path: String, group: UnitGroup },
    Skip,
}

fn map_header_field(cell: &str) -> ColumnKind {
    let cell = cell.trim();
    if cell.eq_ignore_ascii_case("time") {
        return ColumnKind::Time;
    }

    let (name, unit_token) = match HEADER_RE.captures(cell) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str()).unwrap_or_default().trim(),
            Some(caps.get(2).map(|m| m.as_str()).unwrap_or_default()),
        ),
        None => (cell, None),
    };
    if let Some(token) = unit_token {
        if !token.is_empty() && lookup_unit_token(token).is_none() {
            debug!("unrecognized unit token {token:?} in log header {cell:?}");
        }
    }

    if let Some(caps) = CHANNEL_RE.captures(name) {
        let channel = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let field = caps.get(2).map(|m| m.as_str()).unwrap_or_default().trim();
        if let Some((_, section, suffix, group)) =
            CHANNEL_FIELDS.iter().find(|(code, _, _, _)| *code == field)
        {
            return ColumnKind::Obs {
                path: format!("{section}.ch{channel}.{suffix}"),
                group: *group,
            };
        }
        warn!("skipping unknown channel field code {name:?} in log header");
        return ColumnKind::Skip;
    }

    if let Some((_, path, group)) = SCALAR_FIELDS.iter().find(|(code, _, _)| *code == name) {
        return ColumnKind::Obs {
            path: (*path).to_string(),
            group: *group,
        };
    }
    warn!("skipping unknown field code {name:?} in log header");
    ColumnKind::Skip
}

/// Parse a row timestamp. The device writes wall-clock local time; it is
/// taken at face value as UTC and the catchup grace period absorbs the
/// small misalignments that matter.
fn parse_timestamp(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cell, format) {
            return Some(naive.and_utc().timestamp());
        }
    }
    None
}

/// Parse one downloaded log file into normalized records.
///
/// Rows at or before `last_good_ts - grace` are suppressed; rows that fail
/// to parse are skipped with a diagnostic, never fatal.
pub fn parse_log_text(
    text: &str,
    units: UnitSystem,
    last_good_ts: i64,
    grace: i64,
) -> Vec<Record> {
    let lines = clean_data(text.lines());
    let Some((header, rows)) = lines.split_first() else {
        return Vec::new();
    };
    let columns: Vec<ColumnKind> = header.split(',').map(map_header_field).collect();
    let threshold = last_good_ts - grace;

    let mut records = Vec::new();
    let mut previous_ts: Option<i64> = None;
    for row in rows {
        let cells: Vec<&str> = row.split(',').collect();
        if cells.len() != columns.len() {
            warn!(
                "skipping malformed log row ({} cells, {} columns)",
                cells.len(),
                columns.len()
            );
            continue;
        }

        let Some(ts) = columns
            .iter()
            .zip(&cells)
            .find_map(|(kind, cell)| match kind {
                ColumnKind::Time => parse_timestamp(cell),
                _ => None,
            })
        else {
            warn!("skipping log row with unparseable timestamp");
            continue;
        };

        // The cadence is real even for suppressed rows; keep deriving it.
        let interval = match previous_ts {
            Some(prev) if ts > prev => ts - prev,
            _ => DEFAULT_LOG_INTERVAL,
        };
        previous_ts = Some(ts);

        if ts <= threshold {
            continue;
        }

        let mut record = Record::new();
        record.insert("datetime".to_string(), Value::from(ts));
        record.insert("interval".to_string(), Value::from(interval));
        for (kind, cell) in columns.iter().zip(&cells) {
            let ColumnKind::Obs { path, group } = kind else {
                continue;
            };
            let cell = cell.trim();
            if cell.is_empty() || cell == "--" {
                continue;
            }
            match parse_obs_value("val", &json!({ "val": cell }), *group, Some(units)) {
                Ok(obs) => {
                    record.insert(path.clone(), Value::from(obs.value));
                }
                Err(e) => {
                    debug!("dropping log cell for '{path}': {e}");
                }
            }
        }
        records.push(record);
    }
    records
}

/// Lazy, finite, non-restartable reader for device-resident history.
///
/// Sequencing is strictly ordered across files and rows; blocking network
/// I/O happens per file, so run it from a worker context when live polling
/// must not stall.
pub struct HistoryCatchup {
    client: GatewayHttpClient,
    units: UnitSystem,
    last_good_ts: i64,
    grace: i64,
    max_tries: u32,
    retry_wait: Duration,
}

impl HistoryCatchup {
    /// Create a catchup reader resuming after `last_good_ts`
    pub fn new(client: GatewayHttpClient, last_good_ts: i64) -> Self {
        let units = client.config().unit_system;
        let grace = client.config().catchup_grace.as_secs() as i64;
        let max_tries = client.config().catchup_retries;
        let retry_wait = client.config().retry_wait;
        Self {
            client,
            units,
            last_good_ts,
            grace,
            max_tries,
            retry_wait,
        }
    }

    /// Enumerate log files covering the requested window, oldest first
    async fn select_files(&self) -> Result<Vec<LogFile>> {
        let info = self
            .client
            .get_sdmmc_info()
            .await
            .map_err(|e| GatewayError::catchup(format!("storage info unavailable: {e}")))?;
        let list = info
            .get("file_list")
            .and_then(|v| v.as_array())
            .ok_or_else(|| GatewayError::catchup("storage info has no file list"))?;

        let cutoff = Utc
            .timestamp_opt(self.last_good_ts - self.grace, 0)
            .single()
            .map(|dt| (dt.year(), dt.month()));

        let mut files: Vec<LogFile> = list
            .iter()
            .filter_map(|item| item.get("name").and_then(|v| v.as_str()))
            .filter_map(parse_log_name)
            .filter(|file| cutoff.map_or(true, |c| (file.year, file.month) >= c))
            .collect();
        files.sort_by_key(|f| (f.year, f.month, f.allsensors, f.revision));
        Ok(files)
    }

    /// Download one log file within the catchup retry budget
    async fn download(&self, name: &str) -> Result<String> {
        let mut last_error = None;
        for attempt in 1..=self.max_tries {
            match self.client.fetch_logfile(name).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("log file {name} download attempt {attempt} failed: {e}");
                    last_error = Some(e);
                }
            }
            if attempt < self.max_tries {
                tokio::time::sleep(self.retry_wait).await;
            }
        }
        Err(GatewayError::catchup(format!(
            "log file {name} unavailable: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Produce the catchup records, oldest first.
    ///
    /// A file that exhausts its retry budget yields one `Err` and the
    /// stream moves on; whether to keep consuming is the caller's policy.
    /// The stream terminates after the last qualifying row of the last
    /// selected file.
    pub fn records(self) -> impl Stream<Item = Result<Record>> {
        stream! {
            let files = match self.select_files().await {
                Ok(files) => files,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if files.is_empty() {
                info!("no device log files cover the catchup window");
                return;
            }

            for file in files {
                let text = match self.download(&file.name).await {
                    Ok(text) => text,
                    Err(e) => {
                        yield Err(e);
                        continue;
                    }
                };
                let records =
                    parse_log_text(&text, self.units, self.last_good_ts, self.grace);
                debug!("log file {} yielded {} records", file.name, records.len());
                for mut record in records {
                    apply_field_map(&mut record, &self.client.config().field_map);
                    yield Ok(record);
                }
            }
        }
    }
}
