//! Duration parsing and formatting for config values

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const MICROS_PER_MILLI: u64 = 1000;
const MICROS_PER_SECOND: u64 = 1000 * MICROS_PER_MILLI;
const MICROS_PER_MINUTE: u64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: u64 = 60 * MICROS_PER_MINUTE;

/// Parse duration string (e.g., "10us", "100ms", "2s", "5m", "1h")
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".to_string());
    }

    // Find where the number ends and the unit begins
    let (num_str, unit) = s
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| s.split_at(i))
        .unwrap_or((s, "s")); // Default to seconds if no unit

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    let multiplier = match unit.to_lowercase().as_str() {
        "us" => 1,
        "ms" => MICROS_PER_MILLI,
        "s" | "" => MICROS_PER_SECOND,
        "m" => MICROS_PER_MINUTE,
        "h" => MICROS_PER_HOUR,
        _ => return Err(format!("Unknown duration unit: {}", unit)),
    };

    let micros = num
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration value too large: {}", s))?;
    Ok(Duration::from_micros(micros))
}

/// Format duration as string, using the largest unit that divides evenly
pub fn format_duration(duration: &Duration) -> String {
    let micros = duration.as_micros() as u64;

    if micros == 0 {
        return "0s".to_string();
    }

    if micros.is_multiple_of(MICROS_PER_HOUR) {
        format!("{}h", micros / MICROS_PER_HOUR)
    } else if micros.is_multiple_of(MICROS_PER_MINUTE) {
        format!("{}m", micros / MICROS_PER_MINUTE)
    } else if micros.is_multiple_of(MICROS_PER_SECOND) {
        format!("{}s", micros / MICROS_PER_SECOND)
    } else if micros.is_multiple_of(MICROS_PER_MILLI) {
        format!("{}ms", micros / MICROS_PER_MILLI)
    } else {
        format!("{}us", micros)
    }
}

/// Deserialize duration from string like "100ms", "2s"
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serialize duration to string like "100ms", "2s"
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}
