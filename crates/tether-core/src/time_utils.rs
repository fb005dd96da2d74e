use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch.
pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds since the unix epoch as a signed value, matching the
/// `expires_at_ms` representation stored in credential records.
pub fn current_unix_timestamp_ms() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// True when `expires_at_ms` is present and at or before `now_ms`.
pub fn is_expired_ms(expires_at_ms: Option<i64>, now_ms: i64) -> bool {
    expires_at_ms.map(|value| value <= now_ms).unwrap_or(false)
}
