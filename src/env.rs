//! Configuration read from environment variables.

/// Environment variable which enables a summary of the changes made by
/// [`PrePostProcessor::build`](crate::PrePostProcessor::build).
pub const VERBOSE_ENV: &str = "PREPOST_VERBOSE";

/// Interpret a string value such as "1" or "no" as a boolean.
///
/// Returns `None` if the value is not recognized.
pub fn str_as_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
///
/// Unrecognized values are logged and treated as `default`.
pub fn env_flag(name: &str, default: bool) -> bool {
    let Ok(value) = std::env::var(name) else {
        return default;
    };
    str_as_bool(&value).unwrap_or_else(|| {
        tracing::warn!(var = name, value = %value, "unrecognized boolean value");
        default
    })
}
