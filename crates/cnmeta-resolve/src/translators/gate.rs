//! Hourly gate on manifest checks.

use chrono::Utc;
use cnmeta_core::{PrefKey, PrefValue, PreferenceStore};

use crate::error::Result;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// True when at least one full clock hour starts in `(last_ms, now_ms]`.
pub fn crosses_hour_boundary(last_ms: i64, now_ms: i64) -> bool {
    now_ms.div_euclid(HOUR_MS) - last_ms.div_euclid(HOUR_MS) >= 1
}

/// Whether a remote manifest check is due. Every call stores the current
/// time as the new last-check, whatever the answer.
pub fn check_should_sync(prefs: &dyn PreferenceStore) -> Result<bool> {
    check_at(prefs, Utc::now().timestamp_millis())
}

pub fn check_at(prefs: &dyn PreferenceStore, now_ms: i64) -> Result<bool> {
    let last = prefs.get_i64(PrefKey::LastCheck).unwrap_or(0);
    prefs.set(PrefKey::LastCheck, PrefValue::Int(now_ms))?;
    Ok(crosses_hour_boundary(last, now_ms))
}
