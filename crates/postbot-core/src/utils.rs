use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

/// Truncate to `max_len` chars, marking the cut with `...`.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_image: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl AuditEvent {
    fn base(event: &str, user_id: i64, username: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id: Some(user_id),
            username: Some(username.to_string()),
            prompt: None,
            response: None,
            with_image: None,
            error: None,
            retry_after: None,
        }
    }

    pub fn post(user_id: i64, username: &str, prompt: &str, response: &str, with_image: bool) -> Self {
        Self {
            prompt: Some(prompt.to_string()),
            response: Some(response.to_string()),
            with_image: Some(with_image),
            ..Self::base("post", user_id, username)
        }
    }

    pub fn error(user_id: i64, username: &str, prompt: &str, error: &str) -> Self {
        Self {
            prompt: Some(prompt.to_string()),
            error: Some(error.to_string()),
            ..Self::base("error", user_id, username)
        }
    }

    pub fn rate_limit(user_id: i64, username: &str, retry_after: f64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", user_id, username)
        }
    }

    pub fn unauthorized(user_id: i64, username: &str) -> Self {
        Self::base("unauthorized", user_id, username)
    }
}

/// Append-only audit trail, one record per request outcome.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        event.prompt = event.prompt.map(|s| truncate_text(&s, AUDIT_MAX_TEXT));
        event.response = event.response.map(|s| truncate_text(&s, AUDIT_MAX_TEXT));
        event.error = event.error.map(|s| truncate_text(&s, AUDIT_MAX_TEXT));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            writeln!(file, "{}", serde_json::to_string(&event)?)?;
            return Ok(());
        }

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };

        let mut out = format!("\n{}", "=".repeat(60));
        for (k, v) in obj {
            let shown = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("\n{k}: {shown}"));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write, logging instead of failing. Audit problems never block a reply.
    pub fn record(&self, event: AuditEvent) {
        let kind = event.event.clone();
        if let Err(e) = self.write(event) {
            tracing::error!("failed to write {kind} audit event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_counts_chars() {
        assert_eq!(truncate_text("привет", 10), "привет");
        assert_eq!(truncate_text("привет", 3), "при...");
    }

    #[test]
    fn audit_json_lines_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);
        let prompt = "x".repeat(AUDIT_MAX_TEXT + 1);

        log.write(AuditEvent::post(1, "u", &prompt, "resp", true))
            .unwrap();
        log.write(AuditEvent::rate_limit(1, "u", 2.5)).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "post");
        assert_eq!(lines[0]["with_image"], true);
        assert!(lines[0]["prompt"].as_str().unwrap().ends_with("..."));
        assert_eq!(lines[1]["retry_after"], 2.5);
        assert!(lines[1].get("prompt").is_none());
    }

    #[test]
    fn audit_plain_text_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), false);
        log.write(AuditEvent::error(7, "bob", "sunset", "boom"))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: error"));
        assert!(written.contains("user_id: 7"));
        assert!(written.contains("error: boom"));
    }
}
