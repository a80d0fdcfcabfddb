use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{domain::MessageId, errors::Error, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

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

/// One line of the per-run audit trail.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

impl AuditEvent {
    fn base(event: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            channel: None,
            message_id: None,
            outcome: None,
            key: None,
            stage: None,
            error: None,
            summary: None,
        }
    }

    pub fn run_started(channel: &str) -> Self {
        Self {
            channel: Some(channel.to_string()),
            ..Self::base("run_started")
        }
    }

    pub fn uploaded(id: MessageId, key: &str) -> Self {
        Self {
            message_id: Some(id.0),
            outcome: Some("uploaded".to_string()),
            key: Some(key.to_string()),
            ..Self::base("message")
        }
    }

    pub fn failed(id: MessageId, stage: &str, error: &str) -> Self {
        Self {
            message_id: Some(id.0),
            outcome: Some("failed".to_string()),
            stage: Some(stage.to_string()),
            error: Some(error.to_string()),
            ..Self::base("message")
        }
    }

    pub fn run_finished(channel: &str, summary: serde_json::Value) -> Self {
        Self {
            channel: Some(channel.to_string()),
            summary: Some(summary),
            ..Self::base("run_finished")
        }
    }
}

/// Append-only audit file, JSON lines or a plain readable block per event.
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
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), AUDIT_MAX_TEXT + 3);
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn truncate_text_counts_chars_not_bytes() {
        let s = "é".repeat(8);
        assert_eq!(truncate_text(&s, 10), s);
        assert_eq!(truncate_text(&s, 4), "éééé...");
    }

    #[test]
    fn json_audit_truncates_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);
        let error = "e".repeat(AUDIT_MAX_TEXT + 50);

        log.write(AuditEvent::failed(MessageId(7), "convert", &error))
            .unwrap();
        log.write(AuditEvent::uploaded(MessageId(8), "trip/8.jpg"))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message_id"], 7);
        assert_eq!(first["stage"], "convert");
        assert!(first["error"].as_str().unwrap().ends_with("..."));
        assert!(lines[1].contains("\"key\":\"trip/8.jpg\""));
        assert!(!lines[1].contains("\"error\""));
    }

    #[test]
    fn plain_audit_is_key_value_block() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.txt"), false);
        log.write(AuditEvent::run_started("@mychannel")).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains(&"=".repeat(60)));
        assert!(written.contains("event: run_started"));
        assert!(written.contains("channel: @mychannel"));
    }
}
