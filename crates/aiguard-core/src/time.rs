//! Wall-clock helpers.
//!
//! All timestamps in the system are Unix milliseconds (`i64`). Components
//! expose `*_at(now_ms)` variants so tests can drive time explicitly.

/// Current wall-clock time in Unix milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
