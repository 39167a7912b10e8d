//! Utility helpers shared by the Tessera engine, transports and CLI.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod env_template;
pub mod json_path;
pub mod merge;
pub mod url_join;

pub use env_template::{expand_env_template, has_env_template, is_env_key};
pub use json_path::{format_json_value, get_path, remove_path, select_path, set_path};
pub use merge::deep_merge;
pub use url_join::{build_path, join_url, to_socket_url};

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)(x-api-key: )([^\s]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACTION_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Header names whose values should never reach logs.
pub fn is_sensitive_header(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered == "authorization" || lowered == "cookie" || lowered.contains("api-key") || lowered.contains("token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_authorization_and_keys() {
        assert_eq!(redact_sensitive("Authorization: Bearer abc.def"), "Authorization: <redacted>");
        assert_eq!(redact_sensitive("API_TOKEN=secret rest"), "API_TOKEN=<redacted> rest");
        assert_eq!(redact_sensitive("x-api-key: k123"), "x-api-key: <redacted>");
    }

    #[test]
    fn sensitive_header_names() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("X-API-Key"));
        assert!(!is_sensitive_header("Accept"));
    }
}
