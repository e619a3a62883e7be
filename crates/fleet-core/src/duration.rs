//! Duration strings and wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ConfigError;

/// Parse a duration string like "500ms", "30s", "15m", "2h", "7d".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let bad = || ConfigError::Duration(s.to_string());

    let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
        let n = ms.trim().parse::<u64>().map_err(|_| bad())?;
        return Ok(Duration::from_millis(n));
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3600)
    } else if let Some(v) = s.strip_suffix('d') {
        (v, 86_400)
    } else {
        (s, 1)
    };

    let n = digits.trim().parse::<u64>().map_err(|_| bad())?;
    n.checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(bad)
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
