//! Append-only structured event recorder.
//!
//! An [`AuditSink`] is the durable record of every significant orchestration
//! step; `tracing` output is the operator-facing stream, this is the one
//! other code (and tests) can replay. `FileAuditSink` is used whenever
//! `--audit-log-file` is set, `NoopAuditSink` otherwise.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuditStatus {
    InProgress,
    Success,
    Failure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_counts: Option<TokenCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditErrorDetail>,
    pub message: String,
}

impl AuditEntry {
    pub fn new(operation: impl Into<String>, status: AuditStatus, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            status,
            duration_ms: None,
            inputs: None,
            outputs: None,
            token_counts: None,
            error: None,
            message: message.into(),
        }
    }

    pub fn with_duration_ms(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_outputs(mut self, outputs: Map<String, Value>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_token_counts(mut self, counts: TokenCounts) -> Self {
        self.token_counts = Some(counts);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.error = Some(AuditErrorDetail {
            message: message.into(),
            error_type: error_type.into(),
        });
        self
    }
}

/// Append-only event recorder, file-backed or no-op.
pub trait AuditSink: Send + Sync {
    fn log(&self, entry: AuditEntry);
    fn close(&self) -> std::io::Result<()>;
}

/// Writes one JSON object per line to a file opened in append mode with
/// mode `0640`, flushing after every entry so the trail survives a crash.
pub struct FileAuditSink {
    writer: Mutex<BufWriter<File>>,
    closed: AtomicBool,
}

impl FileAuditSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o640);
        }
        let file = options.open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            closed: AtomicBool::new(false),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn log(&self, entry: AuditEntry) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        if serde_json::to_writer(&mut *writer, &entry).is_ok() {
            let _ = writer.write_all(b"\n");
            let _ = writer.flush();
        }
    }

    fn close(&self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut writer) = self.writer.lock() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Used when `audit_log_file` is empty.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn log(&self, _entry: AuditEntry) {}
    fn close(&self) -> std::io::Result<()> {
        Ok(())
    }
}
