pub(super) fn default_name() -> String {
    "woltbot".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.woltbot".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_wolt_base_url() -> String {
    "https://restaurant-api.wolt.com".to_string()
}
// Dizengoff Center, Tel Aviv.
pub(super) fn default_wolt_lat() -> f64 {
    32.075409
}
pub(super) fn default_wolt_lon() -> f64 {
    34.775134
}
pub(super) fn default_request_timeout() -> u64 {
    15
}
pub(super) fn default_storage_backend() -> String {
    "sqlite".to_string()
}
pub(super) fn default_db_path() -> String {
    "~/.woltbot/data/woltbot.db".to_string()
}
pub(super) fn default_max_connections() -> u32 {
    4
}
pub(super) fn default_poll_interval() -> u64 {
    10
}
pub(super) fn default_poll_concurrency() -> usize {
    4
}
pub(super) fn default_orphan_grace() -> u64 {
    600
}
pub(super) fn default_event_retention() -> u64 {
    24
}
pub(super) fn default_dispatch_interval() -> u64 {
    2
}
pub(super) fn default_dispatch_concurrency() -> usize {
    8
}
pub(super) fn default_max_attempts() -> u32 {
    5
}
pub(super) fn default_backoff_base() -> u64 {
    2
}
pub(super) fn default_backoff_max() -> u64 {
    300
}
pub(super) fn default_send_timeout() -> u64 {
    10
}
pub(super) fn default_storage_failure_threshold() -> u32 {
    5
}
