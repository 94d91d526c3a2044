//! Path filter for structured-log emission.

/// Internal endpoints never written to the event sink:
/// dashboard assets, the dashboard itself, and API docs.
pub const EXCLUDED_PATH_PREFIXES: [&str; 3] = ["/rk/v1/assets", "/rk/v1/tv", "/sw/"];

/// Whether a request to `path` should produce an event.
///
/// Gates logging only. Metrics and the downstream handler are unaffected.
pub fn should_log(path: &str) -> bool {
    !EXCLUDED_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}
