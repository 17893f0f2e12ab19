// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit sink.
//!
//! Producers never block: events go through a bounded channel into a single
//! writer task that appends JSONL to a daily-rotated file. When the channel
//! is full the event is dropped, a counter increments, and the writer emits
//! one meta-event per flush interval recording how many were lost.
//! Severity >= warning is mirrored to stderr via `tracing`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};

const CHANNEL_CAPACITY: usize = 1024;

/// Cloneable producer handle. Dropping all handles shuts the writer down.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditHandle {
    /// Enqueue an event without waiting. Saturation drops the event.
    pub fn emit(&self, event: AuditEvent) {
        if event.severity >= AuditSeverity::Warning {
            tracing::warn!(
                event_type = ?event.event_type,
                user = event.user_id.as_deref().unwrap_or("-"),
                ip = event.ip_address.as_deref().unwrap_or("-"),
                "security event: {}",
                serde_json::to_string(&event.details).unwrap_or_default()
            );
        }
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("datagate_audit_events_dropped").increment(1);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A handle wired to nothing; useful in unit tests.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// The audit sink: owns the writer task for one log directory.
pub struct AuditSink {
    directory: PathBuf,
    retention_days: u32,
}

impl AuditSink {
    pub fn new(directory: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            directory: directory.into(),
            retention_days,
        }
    }

    /// Spawn the writer task, returning the producer handle.
    pub fn spawn(self) -> (AuditHandle, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = AuditHandle {
            tx,
            dropped: Arc::clone(&dropped),
        };

        let writer = tokio::task::spawn_blocking(move || {
            let mut last_drop_report = 0u64;
            while let Some(event) = rx.blocking_recv() {
                if let Err(e) = self.append(&event) {
                    tracing::error!(error = %e, "audit write failed");
                }
                // One meta-event per batch of observed drops.
                let dropped_now = dropped.load(Ordering::Relaxed);
                if dropped_now > last_drop_report {
                    let meta =
                        AuditEvent::new(AuditEventType::SecurityAlert, AuditSeverity::Warning)
                            .failure()
                            .detail("action", Value::String("audit_events_dropped".into()))
                            .detail(
                                "dropped_since_last_report",
                                Value::from(dropped_now - last_drop_report),
                            );
                    last_drop_report = dropped_now;
                    let _ = self.append(&meta);
                }
            }
        });

        (handle, writer)
    }

    fn log_path_for(&self, date: DateTime<Utc>) -> PathBuf {
        self.directory
            .join(format!("audit_{}.jsonl", date.format("%Y%m%d")))
    }

    fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.log_path_for(event.timestamp);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")
    }

    /// Delete rotated files older than the retention window.
    pub fn enforce_retention(&self) -> std::io::Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.retention_days as i64);
        let cutoff_name = format!("audit_{}.jsonl", cutoff.format("%Y%m%d"));
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("audit_") && name.ends_with(".jsonl") && name < cutoff_name {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Filters for the read-only admin query helper.
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub severity: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// Read recent audit events, newest file first. Only used by
/// administrative surfaces, never on the request hot path.
pub fn query_logs(
    directory: &Path,
    query: &AuditQuery,
    limit: usize,
) -> std::io::Result<Vec<Value>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    n.starts_with("audit_") && n.ends_with(".jsonl")
                })
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files.reverse();

    let mut out = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        for line in content.lines().rev() {
            let Ok(entry) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if let Some(event_type) = &query.event_type {
                if entry.get("event_type").and_then(Value::as_str) != Some(event_type) {
                    continue;
                }
            }
            if let Some(user_id) = &query.user_id {
                if entry.get("user_id").and_then(Value::as_str) != Some(user_id) {
                    continue;
                }
            }
            if let Some(severity) = &query.severity {
                if entry.get("severity").and_then(Value::as_str) != Some(severity) {
                    continue;
                }
            }
            if let Some(since) = query.since {
                let in_window = entry
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(|t| t.parse::<DateTime<Utc>>().ok())
                    .map(|t| t >= since)
                    .unwrap_or(false);
                if !in_window {
                    continue;
                }
            }
            out.push(entry);
            if out.len() >= limit {
                return Ok(out);
            }
        }
    }
    Ok(out)
}
