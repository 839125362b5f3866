//! Redaction of secrets in persisted payloads and error text.
//!
//! Everything the relay writes back (step input/output, step error,
//! `last_error`, dead letters) goes through here first.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Replacement marker for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// JSON keys whose values are always replaced (compared lowercase).
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "access_token",
    "authorization",
    "private_key",
    "client_secret",
];

static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9._~+/=\-]+").expect("bearer pattern"));

// `token=abc`, `password: hunter2`, `"api_key": "abc"`
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    let keys = SENSITIVE_KEYS.join("|");
    Regex::new(&format!(
        r#"(?i)(?P<key>"?\b(?:{keys})\b"?\s*[:=]\s*"?)(?:Bearer\s+)?[^\s",;&}}]+"#
    ))
    .expect("key/value pattern")
});

static SK_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsk-[A-Za-z0-9\-]{20,}").expect("sk pattern"));

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&lower.as_str())
}

/// Deep copy of `value` with sensitive keys replaced and strings scrubbed.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s)),
        other => other.clone(),
    }
}

/// Scrubs free text (error messages, string leaves).
pub fn redact_text(text: &str) -> String {
    let text = BEARER.replace_all(text, format!("Bearer {REDACTED}").as_str());
    let text = KEY_VALUE.replace_all(&text, format!("${{key}}{REDACTED}").as_str());
    SK_KEY
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            let key = &caps[0];
            format!("sk-...{}", &key[key.len() - 4..])
        })
        .into_owned()
}
