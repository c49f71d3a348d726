pub mod api;
pub mod events;
pub mod models;

/// Current wall-clock time in epoch milliseconds, the unit used for every
/// timestamp on the wire and in storage.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
