use uuid::Uuid;

/// Current time in milliseconds since the UNIX epoch.
pub fn get_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// New opaque id for jobs, transitions and artifacts.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Read an environment variable with a fallback default.
pub fn read_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable as a number with a fallback default.
pub fn read_env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
