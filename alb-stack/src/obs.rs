use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Access JSONL sink for the preview listener.
///
/// Active file: <log_dir>/access.jsonl, hourly rolling.
#[derive(Clone)]
pub struct ObsSink {
    access: NonBlocking,
}

// Keep the guard alive for process lifetime, otherwise lines may drop.
static ACCESS_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// One request as the listener saw and answered it.
#[derive(Debug, Clone)]
pub struct AccessLog {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub listener: &'static str,
    pub rule_id: String,
    pub priority: String,
    pub action: &'static str,
    pub method: String,
    pub host: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub target: Option<String>,
    pub subject: Option<String>,
    pub client_ip: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct AccessLine<'a> {
    #[serde(rename = "@timestamp")]
    ts: &'a DateTime<Utc>,
    dataset: &'static str,
    request_id: &'a str,
    listener: &'static str,
    rule_id: &'a str,
    priority: &'a str,
    action: &'static str,
    method: &'a str,
    host: &'a str,
    path: &'a str,
    status: u16,
    latency_ms: u64,
    target: &'a Option<String>,
    subject: &'a Option<String>,
    client_ip: &'a Option<String>,
    error: &'a Option<String>,
}

impl<'a> From<&'a AccessLog> for AccessLine<'a> {
    fn from(rec: &'a AccessLog) -> Self {
        Self {
            ts: &rec.ts,
            dataset: "access",
            request_id: &rec.request_id,
            listener: rec.listener,
            rule_id: &rec.rule_id,
            priority: &rec.priority,
            action: rec.action,
            method: &rec.method,
            host: &rec.host,
            path: &rec.path,
            status: rec.status,
            latency_ms: rec.latency_ms,
            target: &rec.target,
            subject: &rec.subject,
            client_ip: &rec.client_ip,
            error: &rec.error,
        }
    }
}

impl ObsSink {
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log_dir failed: {}", log_dir.display()))?;

        let appender = tracing_appender::rolling::hourly(log_dir, "access.jsonl");
        let (access, guard) = tracing_appender::non_blocking(appender);
        let _ = ACCESS_GUARD.set(guard);

        Ok(Self { access })
    }

    /// Write one access line. The dataset field is added here.
    pub fn write_access(&self, rec: &AccessLog) {
        if let Ok(json) = render(rec) {
            let mut w = self.access.make_writer();
            let _ = w.write_all(json.as_bytes());
            let _ = w.write_all(b"\n");
        }
    }
}

fn render(rec: &AccessLog) -> serde_json::Result<String> {
    serde_json::to_string(&AccessLine::from(rec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn access_line_shape() {
        let rec = AccessLog {
            ts: Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
            request_id: "req-1".into(),
            listener: "http",
            rule_id: "routes".into(),
            priority: "1".into(),
            action: "forward",
            method: "GET".into(),
            host: "example.com".into(),
            path: "/routes".into(),
            status: 200,
            latency_ms: 3,
            target: Some("function".into()),
            subject: None,
            client_ip: None,
            error: None,
        };
        let v: serde_json::Value = serde_json::from_str(&render(&rec).unwrap()).unwrap();
        assert_eq!(v["dataset"], "access");
        assert_eq!(v["@timestamp"], "2026-10-19T12:00:00Z");
        assert_eq!(v["rule_id"], "routes");
        assert_eq!(v["target"], "function");
        assert!(v["subject"].is_null());
    }
}
