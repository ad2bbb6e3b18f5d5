//! JSONL request log.
//!
//! Every request and every response that reaches the logger becomes one JSON
//! object on its own line in `requests_YYYYMMDD_HHMMSS.jsonl`. The file name
//! is fixed when the logger is created, so one process run writes one file.
//!
//! ## Record Format
//!
//! ```text
//! {"timestamp":"2026-01-02T03:04:05.123+01:00","type":"request","method":"GET",
//!  "url":"https://a.test/","headers":{"accept":"*/*"},"content_length":0}
//! ```
//!
//! Response records additionally carry `status_code`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::LoggerError;
use crate::flow::{Flow, Headers};
use crate::interceptor::{Decision, Interceptor, InterceptorToggle};

/// Default directory for request logs.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Which phase a record was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Request,
    Response,
}

/// One line of the request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Local time the record was written, RFC 3339.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub method: String,
    pub url: String,
    /// Present on response records only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub headers: Headers,
    pub content_length: usize,
}

impl LogRecord {
    /// Builds the request-phase record for a flow.
    pub fn request(flow: &Flow) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            kind: RecordKind::Request,
            method: flow.request.method.clone(),
            url: flow.request.url.clone(),
            status_code: None,
            headers: flow.request.headers.clone(),
            content_length: flow.request.body.len(),
        }
    }

    /// Builds the response-phase record, or `None` if the flow has no response.
    pub fn response(flow: &Flow) -> Option<Self> {
        let response = flow.response.as_ref()?;
        Some(Self {
            timestamp: Local::now().to_rfc3339(),
            kind: RecordKind::Response,
            method: flow.request.method.clone(),
            url: flow.request.url.clone(),
            status_code: Some(response.status),
            headers: response.headers.clone(),
            content_length: response.content_length(),
        })
    }
}

/// Interceptor appending a [`LogRecord`] per phase to a JSONL file.
pub struct RequestLogger {
    toggle: InterceptorToggle,
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RequestLogger {
    /// Interceptor name.
    pub const NAME: &'static str = "RequestLogger";

    /// Creates the log directory if needed and opens a new log file in it.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, LoggerError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let file_name = format!("requests_{}.jsonl", Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::info!("Request log file: {}", path.display());

        Ok(Self {
            toggle: InterceptorToggle::new(),
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and flushes.
    pub fn write_record(&self, record: &LogRecord) -> Result<(), LoggerError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for RequestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLogger")
            .field("path", &self.path)
            .field("enabled", &self.toggle.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Interceptor for RequestLogger {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.toggle.set(Self::NAME, enabled);
    }

    fn on_request(&self, flow: &mut Flow) -> Decision {
        if let Err(e) = self.write_record(&LogRecord::request(flow)) {
            tracing::error!("Failed to log request: {}", e);
        }
        Decision::Continue
    }

    fn on_response(&self, flow: &mut Flow) -> Decision {
        let Some(record) = LogRecord::response(flow) else {
            return Decision::Continue;
        };
        if let Err(e) = self.write_record(&record) {
            tracing::error!("Failed to log response: {}", e);
        }
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowRequest, FlowResponse};
    use tempfile::TempDir;

    fn read_records(logger: &RequestLogger) -> Vec<serde_json::Value> {
        fs::read_to_string(logger.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn creates_directory_and_named_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("logs");
        let logger = RequestLogger::new(&dir).unwrap();

        assert!(dir.is_dir());
        let name = logger.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("requests_"));
        assert!(name.ends_with(".jsonl"));
        // requests_ + YYYYMMDD_HHMMSS + .jsonl
        assert_eq!(name.len(), 9 + 15 + 6);
    }

    #[test]
    fn request_record_fields() {
        let tmp = TempDir::new().unwrap();
        let logger = RequestLogger::new(tmp.path()).unwrap();
        let mut flow = Flow::new(
            FlowRequest::new("POST", "https://api.test/v1")
                .with_header("Content-Type", "application/json")
                .with_body("{\"a\":1}"),
        );

        assert_eq!(logger.on_request(&mut flow), Decision::Continue);

        let records = read_records(&logger);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r["type"], "request");
        assert_eq!(r["method"], "POST");
        assert_eq!(r["url"], "https://api.test/v1");
        assert_eq!(r["headers"]["content-type"], "application/json");
        assert_eq!(r["content_length"], 7);
        assert!(r.get("status_code").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(r["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn response_record_fields() {
        let tmp = TempDir::new().unwrap();
        let logger = RequestLogger::new(tmp.path()).unwrap();
        let mut flow = Flow::new(FlowRequest::new("GET", "https://a.test/x"));
        flow.response = Some(
            FlowResponse::new(404)
                .with_header("Server", "test")
                .with_body("missing"),
        );

        logger.on_response(&mut flow);

        let records = read_records(&logger);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r["type"], "response");
        assert_eq!(r["status_code"], 404);
        assert_eq!(r["headers"]["server"], "test");
        assert_eq!(r["content_length"], 7);
    }

    #[test]
    fn response_without_response_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let logger = RequestLogger::new(tmp.path()).unwrap();
        let mut flow = Flow::new(FlowRequest::new("GET", "https://a.test/"));

        assert_eq!(logger.on_response(&mut flow), Decision::Continue);
        assert!(read_records(&logger).is_empty());
    }

    #[test]
    fn streaming_response_uses_declared_length() {
        let tmp = TempDir::new().unwrap();
        let logger = RequestLogger::new(tmp.path()).unwrap();
        let mut flow = Flow::new(FlowRequest::new("GET", "https://a.test/stream"));
        let mut res = FlowResponse::new(200).streaming();
        res.declared_length = Some(2048);
        flow.response = Some(res);

        logger.on_response(&mut flow);
        assert_eq!(read_records(&logger)[0]["content_length"], 2048);
    }

    #[test]
    fn one_line_per_phase() {
        let tmp = TempDir::new().unwrap();
        let logger = RequestLogger::new(tmp.path()).unwrap();
        for i in 0..3 {
            let mut flow = Flow::new(FlowRequest::new("GET", format!("https://a.test/{i}")));
            logger.on_request(&mut flow);
            flow.response = Some(FlowResponse::new(200));
            logger.on_response(&mut flow);
        }

        let records = read_records(&logger);
        assert_eq!(records.len(), 6);
        assert_eq!(records[4]["url"], "https://a.test/2");
    }

    #[test]
    fn record_round_trips_through_serde() {
        let flow = Flow::new(FlowRequest::new("GET", "https://a.test/"));
        let record = LogRecord::request(&flow);
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"type\":\"request\""));
        let parsed: LogRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }
}
