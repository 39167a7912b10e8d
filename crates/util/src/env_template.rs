//! `${NAME}` / `${env:NAME}` expansion.

use once_cell::sync::Lazy;
use regex::Regex;

static ENV_TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(?:env:)?([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env template pattern"));
static ENV_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid env key pattern"));

/// Whether `value` contains at least one environment placeholder.
pub fn has_env_template(value: &str) -> bool {
    ENV_TEMPLATE.is_match(value)
}

/// Whether `value` looks like an environment variable name (all caps identifier).
pub fn is_env_key(value: &str) -> bool {
    ENV_KEY.is_match(value)
}

/// Replaces every `${NAME}` or `${env:NAME}` with `lookup(NAME)`.
///
/// Unknown variables are left untouched.
pub fn expand_env_template<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_TEMPLATE
        .replace_all(value, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}
