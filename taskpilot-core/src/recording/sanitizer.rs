use serde_json::Value;
use std::collections::HashMap;

/// Headers whose values are credentials and must never reach the recording log.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-github-token",
    "openai-api-key",
];

/// JSON keys whose values are redacted wherever they appear.
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "private_key",
    "secret",
    "password",
    "api_key",
    "answer_token",
];

const REDACTED: &str = "[REDACTED]";

pub struct Sanitizer;

impl Sanitizer {
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(key, value)| {
                let value = if Self::is_sensitive_header(key) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }

    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sanitized = serde_json::Map::new();
                for (key, val) in map {
                    let sanitized_val = if SENSITIVE_KEYS.contains(&key.as_str()) {
                        Value::String(REDACTED.to_string())
                    } else {
                        Self::sanitize_json(val)
                    };
                    sanitized.insert(key.clone(), sanitized_val);
                }
                Value::Object(sanitized)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }

    /// Redact credentials embedded in a URL path.
    ///
    /// The Telegram Bot API carries the bot token as a `bot<token>` path
    /// segment, so that segment is replaced wholesale.
    pub fn sanitize_url(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(mut parsed) => {
                let redacted: Option<Vec<String>> = parsed.path_segments().map(|segments| {
                    segments
                        .map(|segment| {
                            if segment.len() > 3 && segment.starts_with("bot") {
                                format!("bot{}", REDACTED)
                            } else {
                                segment.to_string()
                            }
                        })
                        .collect()
                });
                if let Some(segments) = redacted {
                    parsed.set_path(&segments.join("/"));
                }
                parsed.to_string()
            }
            Err(_) => url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_headers_are_redacted_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());

        let sanitized = Sanitizer::sanitize_headers(&headers);
        assert_eq!(sanitized["Authorization"], "[REDACTED]");
        assert_eq!(sanitized["Accept"], "application/json");
    }

    #[test]
    fn test_nested_json_secrets_are_redacted() {
        let value = serde_json::json!({
            "outer": {"token": "t0k3n", "keep": 1},
            "list": [{"api_key": "k"}]
        });
        let sanitized = Sanitizer::sanitize_json(&value);
        assert_eq!(sanitized["outer"]["token"], "[REDACTED]");
        assert_eq!(sanitized["outer"]["keep"], 1);
        assert_eq!(sanitized["list"][0]["api_key"], "[REDACTED]");
    }

    #[test]
    fn test_telegram_bot_token_is_removed_from_url() {
        let url = "https://api.telegram.org/bot123456:ABC-def/sendMessage";
        let sanitized = Sanitizer::sanitize_url(url);
        assert!(!sanitized.contains("123456"));
        assert!(sanitized.ends_with("/sendMessage"));
    }

    #[test]
    fn test_plain_urls_are_unchanged() {
        let url = "https://api.github.com/repos/o/r/pulls/3";
        assert_eq!(Sanitizer::sanitize_url(url), url);
    }
}
