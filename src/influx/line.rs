use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;

/// Timestamp resolution on the wire.
///
/// `Auto` is only valid as a transmission parameter (the server picks);
/// encoding always requires an explicit precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Precision {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "ns")]
    Nanoseconds,
    #[serde(rename = "u")]
    Microseconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
}

impl Precision {
    /// Value of the `precision` query parameter.
    pub fn query_value(self) -> &'static str {
        match self {
            Self::Auto => "",
            Self::Nanoseconds => "ns",
            Self::Microseconds => "u",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
        }
    }

    /// Nanoseconds per tick at this precision; `None` for `Auto`.
    pub fn tick_nanos(self) -> Option<i64> {
        match self {
            Self::Auto => None,
            Self::Nanoseconds => Some(1),
            Self::Microseconds => Some(1_000),
            Self::Milliseconds => Some(1_000_000),
            Self::Seconds => Some(1_000_000_000),
        }
    }
}

/// A field payload value. Tags are always strings; fields carry the
/// numeric/string data.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// One sparse output record: a tagged, timestamped point.
///
/// `ns_part` carries the sub-microsecond remainder the timestamp type
/// cannot, and must lie in `0..=999`.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp: NaiveDateTime,
    pub ns_part: u32,
}

/// Escapes a measurement name: backslash, comma and whitespace.
pub fn escape_measurement(s: &str) -> String {
    escape_chars(s, false)
}

/// Escapes a tag key, tag value or field key: backslash, comma,
/// whitespace and equals sign.
pub fn escape_name(s: &str) -> String {
    escape_chars(s, true)
}

fn escape_chars(s: &str, escape_equals: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == ',' || c.is_whitespace() || (escape_equals && c == '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn encode_field_value(out: &mut Vec<u8>, value: &FieldValue) {
    match value {
        FieldValue::Boolean(v) => out.extend_from_slice(if *v { b"true" } else { b"false" }),
        FieldValue::Integer(v) => {
            out.extend_from_slice(v.to_string().as_bytes());
            out.push(b'i');
        }
        FieldValue::Float(v) => out.extend_from_slice(v.to_string().as_bytes()),
        FieldValue::String(v) => {
            out.push(b'"');
            for c in v.chars() {
                if c == '\\' || c == '"' {
                    out.push(b'\\');
                }
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            out.push(b'"');
        }
    }
}

fn div_round_half_up(value: i64, divisor: i64) -> i64 {
    if divisor == 1 {
        return value;
    }
    let quotient = value.div_euclid(divisor);
    let remainder = value.rem_euclid(divisor);
    if remainder >= divisor / 2 {
        quotient + 1
    } else {
        quotient
    }
}

/// Converts a timestamp plus sub-microsecond remainder to an integer
/// tick count at the given precision, rounding half up.
pub fn encode_timestamp(
    timestamp: NaiveDateTime,
    ns_part: u32,
    precision: Precision,
) -> Result<i64> {
    let Some(tick) = precision.tick_nanos() else {
        bail!("auto precision not supported for encoding");
    };
    if ns_part > 999 {
        bail!("nanosecond part must be in 0..999, got {ns_part}");
    }

    let utc = timestamp.and_utc();
    let micros = utc.timestamp_subsec_micros() as i64;
    let nanos = (utc.timestamp() * 1_000_000 + micros) * 1_000 + ns_part as i64;

    Ok(div_round_half_up(nanos, tick))
}

const PREFIX_CACHE_CAP: usize = 4096;
const TIMESTAMP_CACHE_CAP: usize = 256;

/// Line protocol encoder with instance-owned memoization.
///
/// Tag sets and day-granular timestamps repeat across the whole output
/// stream, so the measurement+tagset prefix and the rendered timestamp
/// are cached. The caches are bounded (dropped wholesale when full) and
/// owned by the codec instance, never process-global.
pub struct LineCodec {
    precision: Precision,
    prefix_cache: HashMap<(String, Vec<(String, String)>), Vec<u8>>,
    timestamp_cache: HashMap<(NaiveDateTime, u32), Vec<u8>>,
}

impl LineCodec {
    /// Creates a codec for one explicit precision. `Auto` is a
    /// configuration error at encode time.
    pub fn new(precision: Precision) -> Result<Self> {
        if precision == Precision::Auto {
            bail!("auto precision not supported for encoding");
        }
        Ok(Self {
            precision,
            prefix_cache: HashMap::new(),
            timestamp_cache: HashMap::new(),
        })
    }

    /// Appends one encoded, newline-terminated record to `out`.
    pub fn encode(&mut self, point: &Point, out: &mut Vec<u8>) -> Result<()> {
        // Segment 1: measurement plus tag set, memoized.
        let prefix_key = (point.measurement.clone(), point.tags.clone());
        if let Some(prefix) = self.prefix_cache.get(&prefix_key) {
            out.extend_from_slice(prefix);
        } else {
            let mut prefix = Vec::with_capacity(64);
            prefix.extend_from_slice(escape_measurement(&point.measurement).as_bytes());
            for (key, value) in &point.tags {
                prefix.push(b',');
                prefix.extend_from_slice(escape_name(key).as_bytes());
                prefix.push(b'=');
                prefix.extend_from_slice(escape_name(value).as_bytes());
            }
            out.extend_from_slice(&prefix);
            if self.prefix_cache.len() >= PREFIX_CACHE_CAP {
                self.prefix_cache.clear();
            }
            self.prefix_cache.insert(prefix_key, prefix);
        }

        // Segment 2: field pairs.
        out.push(b' ');
        for (i, (key, value)) in point.fields.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(escape_name(key).as_bytes());
            out.push(b'=');
            encode_field_value(out, value);
        }

        // Segment 3: timestamp at the destination precision, memoized.
        out.push(b' ');
        let ts_key = (point.timestamp, point.ns_part);
        if let Some(rendered) = self.timestamp_cache.get(&ts_key) {
            out.extend_from_slice(rendered);
        } else {
            let ticks = encode_timestamp(point.timestamp, point.ns_part, self.precision)?;
            let rendered = ticks.to_string().into_bytes();
            out.extend_from_slice(&rendered);
            if self.timestamp_cache.len() >= TIMESTAMP_CACHE_CAP {
                self.timestamp_cache.clear();
            }
            self.timestamp_cache.insert(ts_key, rendered);
        }

        out.push(b'\n');
        Ok(())
    }
}
