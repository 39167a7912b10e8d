//! # Binding resolution
//!
//! Turns declarative bindings into concrete values against the current state.
//! A binding is a literal, a tagged reference (`{"binding": "user.name"}`) or a
//! string. Strings are tried, in order, as:
//!
//! 1. a `t('key')` translation call;
//! 2. `i18n.<key>` or `translations.<locale>.<key>`;
//! 3. a single `{{expr}}` / `{expr}` placeholder, first as a scope path and then
//!    as a sandboxed [`Expression`];
//! 4. a template with several `{{ }}` placeholders, rendered piecewise and then
//!    resolved again;
//! 5. a bare all-caps environment key, or a string with `${NAME}` templates;
//! 6. a dotted string, as a translation key and then as a scope path.
//!
//! Anything else is returned unchanged. Resolution never fails: the worst case
//! is the original literal.
//!
//! Recursion is bounded by [`RuntimeConfig::max_resolve_depth`] and a cycle
//! guard keyed by the hash of each string currently being resolved, so
//! self-referential bindings terminate.
//!
//! ```rust
//! use serde_json::json;
//! use tessera_engine::{BindingResolver, Environment, NullTranslator};
//! use tessera_types::RuntimeConfig;
//!
//! let config = RuntimeConfig::default();
//! let environment = Environment::default();
//! let resolver = BindingResolver::new(&NullTranslator, &environment, &config);
//! let state = json!({ "user": { "name": "Ada" }, "items": [1, 2, 3] });
//!
//! assert_eq!(resolver.resolve(&json!("Hello {{user.name}}"), &state), json!("Hello Ada"));
//! assert_eq!(resolver.resolve(&json!("{{items.length * 2}}"), &state), json!(6));
//! ```

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tessera_types::RuntimeConfig;
use tessera_util::{expand_env_template, format_json_value, get_path, has_env_template, is_env_key};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::{capability::Translator, environment::Environment, expr::Expression, scope::Scope};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("valid placeholder pattern"));
static SINGLE_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\{\s*([^{}]+?)\s*\}$").expect("valid single brace pattern"));
static TRANSLATE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^t\(\s*['"]([^'"]+)['"]\s*\)$"#).expect("valid translate call pattern"));
static EMBEDDED_TRANSLATE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bt\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid embedded translate pattern"));
static SCOPE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][\w$]*(?:\.[\w$]+|\[\d+\])*$").expect("valid scope path pattern"));

/// Memoized resolution results keyed by `xxh3_64` of the source string.
///
/// There is no eviction; owners call [`ResolveCache::clear`] when the schema
/// changes.
#[derive(Debug, Default)]
pub struct ResolveCache {
    entries: Mutex<HashMap<u64, Value>>,
}

impl ResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(&xxh3_64(key.as_bytes())).cloned()
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.entries.lock().insert(xxh3_64(key.as_bytes()), value);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Whether a string still carries `{{ }}` placeholders.
pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

fn value_has_placeholders(value: &Value) -> bool {
    match value {
        Value::String(text) => has_placeholders(text),
        Value::Array(items) => items.iter().any(value_has_placeholders),
        Value::Object(map) => map.values().any(value_has_placeholders),
        _ => false,
    }
}

/// Returns the inner expression when `text` is exactly one placeholder.
fn single_placeholder(text: &str) -> Option<&str> {
    if let Some(inner) = text.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
        let inner = inner.trim();
        if !inner.is_empty() && !inner.contains("{{") && !inner.contains("}}") {
            return Some(inner);
        }
        return None;
    }
    SINGLE_BRACE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|inner| inner.as_str())
}

fn tagged_binding(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get("binding").and_then(Value::as_str)
}

/// Per-call resolution state.
struct Pass {
    scope: Scope,
    seen: HashSet<u64>,
    /// Set when a depth or cycle guard cut the current resolution short.
    truncated: bool,
}

/// Resolves bindings against a state snapshot.
///
/// Borrowed collaborators keep the resolver cheap to construct per call.
pub struct BindingResolver<'a> {
    translator: &'a dyn Translator,
    environment: &'a Environment,
    cache: Option<&'a ResolveCache>,
    max_depth: usize,
    dynamic_prefixes: &'a [String],
    locale: Option<&'a str>,
}

impl<'a> BindingResolver<'a> {
    pub fn new(translator: &'a dyn Translator, environment: &'a Environment, config: &'a RuntimeConfig) -> Self {
        Self {
            translator,
            environment,
            cache: None,
            max_depth: config.max_resolve_depth.max(1),
            dynamic_prefixes: &config.dynamic_prefixes,
            locale: None,
        }
    }

    /// Memoizes results for keys that reference no dynamic prefix.
    pub fn with_cache(mut self, cache: &'a ResolveCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_locale(mut self, locale: &'a str) -> Self {
        self.locale = Some(locale);
        self
    }

    /// Resolves `value` once against `state`.
    pub fn resolve(&self, value: &Value, state: &Value) -> Value {
        let mut pass = Pass {
            scope: Scope::build(state),
            seen: HashSet::new(),
            truncated: false,
        };
        self.resolve_value(value, &mut pass, 0)
    }

    /// Resolves every string leaf, repeating until no placeholders remain, the
    /// value stops changing, or the depth bound is reached.
    pub fn deep_resolve(&self, value: &Value, state: &Value) -> Value {
        let mut pass = Pass {
            scope: Scope::build(state),
            seen: HashSet::new(),
            truncated: false,
        };
        let mut current = self.resolve_value(value, &mut pass, 0);
        for _ in 1..self.max_depth {
            if !value_has_placeholders(&current) {
                break;
            }
            let next = self.resolve_value(&current, &mut pass, 0);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn resolve_value(&self, value: &Value, pass: &mut Pass, depth: usize) -> Value {
        match value {
            Value::String(text) => self.resolve_string(text, pass, depth),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.resolve_value(item, pass, depth)).collect()),
            Value::Object(map) => {
                if let Some(key) = tagged_binding(map) {
                    return self.resolve_tagged(key, pass);
                }
                Value::Object(
                    map.iter()
                        .map(|(key, item)| (key.clone(), self.resolve_value(item, pass, depth)))
                        .collect(),
                )
            }
            other => other.clone(),
        }
    }

    fn resolve_string(&self, text: &str, pass: &mut Pass, depth: usize) -> Value {
        if depth >= self.max_depth {
            warn!(binding = %text, depth, "binding resolution depth exceeded");
            pass.truncated = true;
            return Value::String(text.to_string());
        }
        let key = xxh3_64(text.as_bytes());
        if pass.seen.contains(&key) {
            debug!(binding = %text, "binding cycle detected");
            pass.truncated = true;
            return Value::String(text.to_string());
        }

        let cache = self.cache.filter(|_| !self.is_dynamic(text));
        if let Some(cached) = cache.and_then(|cache| cache.get(text)) {
            return cached;
        }

        // Guarded results depend on this call's depth and seen set.
        let outer_truncated = std::mem::take(&mut pass.truncated);
        pass.seen.insert(key);
        let resolved = self.resolve_string_uncached(text, pass, depth);
        pass.seen.remove(&key);

        if let Some(cache) = cache
            && !pass.truncated
        {
            cache.insert(text, resolved.clone());
        }
        pass.truncated |= outer_truncated;
        resolved
    }

    fn resolve_string_uncached(&self, text: &str, pass: &mut Pass, depth: usize) -> Value {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Value::String(text.to_string());
        }

        if let Some(caps) = TRANSLATE_CALL.captures(trimmed) {
            return Value::String(self.translate(&caps[1], None));
        }
        if let Some(key) = trimmed.strip_prefix("i18n.") {
            return Value::String(self.translate(key, None));
        }
        if let Some(rest) = trimmed.strip_prefix("translations.")
            && let Some((locale, key)) = rest.split_once('.')
        {
            return Value::String(self.translate(key, Some(locale)));
        }

        if let Some(inner) = single_placeholder(trimmed) {
            return self
                .resolve_placeholder(inner, pass, depth)
                .unwrap_or_else(|| Value::String(text.to_string()));
        }
        if has_placeholders(text) {
            return self.resolve_template(text, pass, depth);
        }

        if EMBEDDED_TRANSLATE_CALL.is_match(text) {
            let rendered = EMBEDDED_TRANSLATE_CALL.replace_all(text, |caps: &regex::Captures| self.translate(&caps[1], None));
            return Value::String(rendered.into_owned());
        }
        if is_env_key(trimmed)
            && let Some(value) = self.environment.get(trimmed)
        {
            return Value::String(value.to_string());
        }
        if has_env_template(text) {
            return Value::String(self.expand_env(text));
        }

        if trimmed.contains('.') && SCOPE_PATH.is_match(trimmed) {
            if let Some(translated) = self.translator.translate(trimmed, self.locale) {
                return Value::String(translated);
            }
            if let Some(found) = pass.scope.lookup(trimmed).cloned() {
                return self.follow(found, pass, depth);
            }
        }

        Value::String(text.to_string())
    }

    /// Resolves the inside of one `{{ }}` placeholder; `None` means unresolved.
    fn resolve_placeholder(&self, inner: &str, pass: &mut Pass, depth: usize) -> Option<Value> {
        if let Some(caps) = TRANSLATE_CALL.captures(inner) {
            return Some(Value::String(self.translate(&caps[1], None)));
        }
        if let Some(name) = inner.strip_prefix("env.") {
            return self.environment.get(name).map(|value| Value::String(value.to_string()));
        }
        if SCOPE_PATH.is_match(inner)
            && let Some(found) = pass.scope.lookup(inner).cloned()
        {
            return Some(self.follow(found, pass, depth));
        }
        if is_env_key(inner)
            && let Some(value) = self.environment.get(inner)
        {
            return Some(Value::String(value.to_string()));
        }

        match Expression::parse(inner).and_then(|expression| expression.evaluate(&pass.scope)) {
            Ok(value) => value,
            Err(error) => {
                debug!(expression = %inner, %error, "binding expression not evaluated");
                None
            }
        }
    }

    fn resolve_template(&self, text: &str, pass: &mut Pass, depth: usize) -> Value {
        let rendered = PLACEHOLDER
            .replace_all(text, |caps: &regex::Captures| match self.resolve_placeholder(&caps[1], pass, depth) {
                Some(value) => format_json_value(&value),
                None => caps[0].to_string(),
            })
            .into_owned();
        if rendered != text && has_placeholders(&rendered) {
            return self.resolve_string(&rendered, pass, depth + 1);
        }
        Value::String(rendered)
    }

    /// Scope strings that themselves contain placeholders are resolved again.
    fn follow(&self, found: Value, pass: &mut Pass, depth: usize) -> Value {
        match found {
            Value::String(text) if has_placeholders(&text) || single_placeholder(text.trim()).is_some() => {
                self.resolve_string(&text, pass, depth + 1)
            }
            other => other,
        }
    }

    fn resolve_tagged(&self, key: &str, pass: &mut Pass) -> Value {
        let key = key.trim();
        if let Some(translation_key) = key.strip_prefix("i18n.") {
            return Value::String(self.translate(translation_key, None));
        }
        if let Some(rest) = key.strip_prefix("translations.")
            && let Some((locale, translation_key)) = rest.split_once('.')
        {
            return Value::String(self.translate(translation_key, Some(locale)));
        }
        if let Some(path) = key.strip_prefix("state.") {
            return get_path(pass.scope.as_value(), path).cloned().unwrap_or(Value::Null);
        }
        if let Some(name) = key.strip_prefix("env.") {
            return self.environment.get(name).map(|value| Value::String(value.to_string())).unwrap_or(Value::Null);
        }
        if is_env_key(key) {
            return self.environment.get(key).map(|value| Value::String(value.to_string())).unwrap_or(Value::Null);
        }
        match pass.scope.lookup(key) {
            Some(Value::String(text)) => Value::String(self.expand_env(text)),
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }

    fn translate(&self, key: &str, locale: Option<&str>) -> String {
        self.translator
            .translate(key, locale.or(self.locale))
            .unwrap_or_else(|| key.to_string())
    }

    fn expand_env(&self, text: &str) -> String {
        expand_env_template(text, |name| self.environment.get(name).map(str::to_string))
    }

    fn is_dynamic(&self, text: &str) -> bool {
        self.dynamic_prefixes.iter().any(|prefix| text.contains(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MapTranslator, NullTranslator};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state() -> Value {
        json!({
            "user": { "name": "Ada", "id": 7 },
            "form": { "email": "ada@example.com" },
            "items": [{ "id": 1 }, { "id": 2 }],
            "greeting": "Hi {{user.name}}",
            "ds_orders": { "count": 3 }
        })
    }

    fn resolve_with(translator: &dyn Translator, value: Value) -> Value {
        let config = RuntimeConfig::default();
        let environment = Environment::default().with("API_URL", "https://api.example.com");
        BindingResolver::new(translator, &environment, &config).resolve(&value, &state())
    }

    fn resolve(value: Value) -> Value {
        resolve_with(&NullTranslator, value)
    }

    #[test]
    fn literals_pass_through_unchanged() {
        for literal in [json!(42), json!(true), json!(null), json!("plain text"), json!({ "a": [1, "b"] })] {
            assert_eq!(resolve(literal.clone()), literal);
            assert_eq!(resolve(resolve(literal.clone())), literal);
        }
    }

    #[test]
    fn single_placeholder_keeps_type() {
        assert_eq!(resolve(json!("{{items}}")), json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(resolve(json!("{user.id}")), json!(7));
        assert_eq!(resolve(json!("{{ ds_orders.count + 1 }}")), json!(4));
    }

    #[test]
    fn unresolved_placeholder_returns_original() {
        assert_eq!(resolve(json!("{{missing.thing}}")), json!("{{missing.thing}}"));
        assert_eq!(resolve(json!("{{ nope( }}")), json!("{{ nope( }}"));
    }

    #[test]
    fn templates_render_each_placeholder() {
        assert_eq!(resolve(json!("/users/{{user.id}}/items/{{items[1].id}}")), json!("/users/7/items/2"));
        assert_eq!(resolve(json!("{{greeting}}!")), json!("Hi Ada!"));
    }

    #[test]
    fn tagged_bindings() {
        assert_eq!(resolve(json!({ "binding": "state.items" })), json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(resolve(json!({ "binding": "state.nope" })), json!(null));
        assert_eq!(resolve(json!({ "binding": "env.API_URL" })), json!("https://api.example.com"));
        assert_eq!(resolve(json!({ "binding": "API_URL" })), json!("https://api.example.com"));
        assert_eq!(resolve(json!({ "binding": "form.email" })), json!("ada@example.com"));
    }

    #[test]
    fn translations() {
        let translator = MapTranslator::new("en").with("en", "nav.home", "Home").with("de", "nav.home", "Startseite");
        assert_eq!(resolve_with(&translator, json!("t('nav.home')")), json!("Home"));
        assert_eq!(resolve_with(&translator, json!("i18n.nav.home")), json!("Home"));
        assert_eq!(resolve_with(&translator, json!("translations.de.nav.home")), json!("Startseite"));
        assert_eq!(resolve_with(&translator, json!("nav.home")), json!("Home"));
        assert_eq!(resolve_with(&translator, json!("Go t('nav.home')")), json!("Go Home"));
        assert_eq!(resolve_with(&translator, json!("t('missing.key')")), json!("missing.key"));
    }

    #[test]
    fn environment_keys_and_templates() {
        assert_eq!(resolve(json!("API_URL")), json!("https://api.example.com"));
        assert_eq!(resolve(json!("${API_URL}/v1")), json!("https://api.example.com/v1"));
        assert_eq!(resolve(json!("UNKNOWN_KEY")), json!("UNKNOWN_KEY"));
    }

    #[test]
    fn dotted_strings_resolve_as_paths() {
        assert_eq!(resolve(json!("user.name")), json!("Ada"));
        assert_eq!(resolve(json!("example.com")), json!("example.com"));
    }

    #[test]
    fn self_referential_bindings_terminate() {
        let config = RuntimeConfig::default();
        let environment = Environment::default();
        let resolver = BindingResolver::new(&NullTranslator, &environment, &config);
        let state = json!({ "a": "{{b}}", "b": "{{a}}", "c": "{{c}}" });
        assert_eq!(resolver.resolve(&json!("{{a}}"), &state), json!("{{a}}"));
        assert_eq!(resolver.resolve(&json!("{{c}}"), &state), json!("{{c}}"));
        assert_eq!(resolver.deep_resolve(&json!({ "x": "{{a}}" }), &state), json!({ "x": "{{a}}" }));
    }

    #[test]
    fn depth_guard_stops_long_chains() {
        let mut chain = Map::new();
        for index in 0..30 {
            chain.insert(format!("k{index}"), json!(format!("{{{{k{}}}}}", index + 1)));
        }
        chain.insert("k30".into(), json!("end"));
        let config = RuntimeConfig {
            max_resolve_depth: 5,
            ..Default::default()
        };
        let environment = Environment::default();
        let resolver = BindingResolver::new(&NullTranslator, &environment, &config);
        let resolved = resolver.resolve(&json!("{{k0}}"), &Value::Object(chain));
        assert!(resolved.as_str().is_some_and(|text| text.starts_with("{{k")));
    }

    #[test]
    fn deep_resolve_handles_nested_structures() {
        let config = RuntimeConfig::default();
        let environment = Environment::default();
        let resolver = BindingResolver::new(&NullTranslator, &environment, &config);
        let value = json!({ "headers": { "X-User": "{{user.id}}" }, "list": ["{{greeting}}", 1] });
        assert_eq!(
            resolver.deep_resolve(&value, &state()),
            json!({ "headers": { "X-User": 7 }, "list": ["Hi Ada", 1] })
        );
    }

    #[test]
    fn cache_skips_dynamic_prefixes() {
        let config = RuntimeConfig::default();
        let environment = Environment::default();
        let cache = ResolveCache::new();
        let resolver = BindingResolver::new(&NullTranslator, &environment, &config).with_cache(&cache);

        assert_eq!(resolver.resolve(&json!("{{user.name}}"), &state()), json!("Ada"));
        assert_eq!(resolver.resolve(&json!("{{state.user.name}}"), &state()), json!("Ada"));
        assert_eq!(cache.len(), 1);

        let changed = json!({ "user": { "name": "Grace" } });
        assert_eq!(resolver.resolve(&json!("{{user.name}}"), &changed), json!("Ada"));
        assert_eq!(resolver.resolve(&json!("{{state.user.name}}"), &changed), json!("Grace"));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(resolver.resolve(&json!("{{user.name}}"), &changed), json!("Grace"));
    }

    #[test]
    fn depth_limited_results_are_not_cached() {
        let config = RuntimeConfig {
            max_resolve_depth: 3,
            ..RuntimeConfig::default()
        };
        let environment = Environment::default();
        let cache = ResolveCache::new();
        let resolver = BindingResolver::new(&NullTranslator, &environment, &config).with_cache(&cache);
        let chain = json!({ "k0": "{{k1}}", "k1": "{{k2}}", "k2": "{{k3}}", "k3": "end" });

        assert_eq!(resolver.resolve(&json!("{{k0}}"), &chain), json!("{{k3}}"));
        assert!(cache.is_empty());
        assert_eq!(resolver.resolve(&json!("{{k2}}"), &chain), json!("end"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cycle_results_do_not_depend_on_resolution_order() {
        let config = RuntimeConfig::default();
        let environment = Environment::default();
        let cache = ResolveCache::new();
        let resolver = BindingResolver::new(&NullTranslator, &environment, &config).with_cache(&cache);
        let cyclic = json!({ "a": "{{b}}", "b": "{{a}}" });

        let from_a = resolver.resolve(&json!("{{a}}"), &cyclic);
        assert!(cache.is_empty());
        let from_b = resolver.resolve(&json!("{{b}}"), &cyclic);
        let uncached = BindingResolver::new(&NullTranslator, &environment, &config).resolve(&json!("{{b}}"), &cyclic);
        assert_eq!(from_b, uncached);
        assert_eq!(from_a, json!("{{a}}"));
    }
}
