//! Masking of sensitive text in approval requests.
//!
//! The gate hands the audit sink a redacted copy of each request, and the
//! CLI prints a redacted copy to the terminal. The decision source itself
//! still receives the original request.

use serde_json::Value;

use steward_contracts::{approval::ApprovalRequest, config::RedactConfig};

pub const REDACTED_PATH: &str = "***REDACTED_PATH***";
pub const REDACTED_ENV: &str = "***REDACTED_ENV***";

/// Literal replacements built from a `[security.redact]` section.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// `(needle, mask)`, longest needle first so nested prefixes mask fully.
    replacements: Vec<(String, &'static str)>,
}

impl Redactor {
    /// Environment variable values are read once, here.
    pub fn from_config(config: &RedactConfig) -> Self {
        let mut replacements = Vec::new();
        for path in &config.paths {
            replacements.push((path.clone(), REDACTED_PATH));
        }
        for name in &config.envs {
            if let Ok(value) = std::env::var(name) {
                replacements.push((value, REDACTED_ENV));
            }
            replacements.push((name.clone(), REDACTED_ENV));
        }
        replacements.retain(|(needle, _)| !needle.trim().is_empty());
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { replacements }
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub fn redact_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (needle, mask) in &self.replacements {
            if out.contains(needle.as_str()) {
                out = out.replace(needle.as_str(), mask);
            }
        }
        out
    }

    /// Redact every string in `value`, object keys included.
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.redact_text(k), self.redact_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Copy of `request` with its free-text fields redacted. The id, tool and
    /// risk are kept so the audit trail still identifies the call.
    pub fn redact_request(&self, request: &ApprovalRequest) -> ApprovalRequest {
        if self.is_empty() {
            return request.clone();
        }
        let mut redacted = request.clone();
        redacted.params = self.redact_value(&request.params);
        redacted.description = self.redact_text(&request.description);
        redacted.source = self.redact_text(&request.source);
        redacted
    }
}
