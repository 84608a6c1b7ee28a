/// Per-address, per-scanner record of everything that went wrong in a run
///
/// Events are kept in memory for the run summary and, when a path is
/// given, appended to a JSON lines file as they happen.
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::ScanError;

/// Kinds of recoverable trouble recorded during a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanEventKind {
    /// A container member or signature hit could not be decoded
    DecodeError,
    /// A scanner returned an error
    ScannerFailure,
    /// A scanner panicked
    ScannerPanic,
    /// A file was too large or too fragmented to scan
    ResourceBound,
    /// Expansion stopped at the configured depth
    DepthLimited,
    /// Content or entry of an address could not be found
    MissingContent,
}

impl ScanEventKind {
    /// Event kind matching a non-fatal error
    pub fn for_error(error: &ScanError) -> Self {
        match error {
            ScanError::Decode { .. } | ScanError::MalformedAddress(_) => ScanEventKind::DecodeError,
            ScanError::ScannerPanic { .. } => ScanEventKind::ScannerPanic,
            ScanError::ResourceBound { .. } => ScanEventKind::ResourceBound,
            ScanError::Io(e) if e.kind() == io::ErrorKind::NotFound => ScanEventKind::MissingContent,
            _ => ScanEventKind::ScannerFailure,
        }
    }
}

/// Single run log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub kind: ScanEventKind,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner: Option<String>,
    pub message: String,
}

struct LogState {
    next_id: u64,
    events: Vec<ScanEvent>,
    sink: Option<File>,
}

pub struct ScanLog {
    run_id: String,
    log_path: Option<PathBuf>,
    state: Mutex<LogState>,
}

impl ScanLog {
    /// Log kept in memory only
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            log_path: None,
            state: Mutex::new(LogState {
                next_id: 1,
                events: Vec::new(),
                sink: None,
            }),
        }
    }

    /// Log that is also appended to `path` as JSON lines
    pub fn with_file(run_id: impl Into<String>, path: impl AsRef<Path>) -> io::Result<Self> {
        let log_path = path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let log = Self::new(run_id);
        log.state.lock().sink = Some(file);
        Ok(Self {
            log_path: Some(log_path),
            ..log
        })
    }

    pub fn record(
        &self,
        kind: ScanEventKind,
        address: impl ToString,
        scanner: Option<&str>,
        message: impl Into<String>,
    ) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let event = ScanEvent {
            id,
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            kind,
            address: address.to_string(),
            scanner: scanner.map(str::to_string),
            message: message.into(),
        };
        tracing::warn!(
            address = %event.address,
            scanner = event.scanner.as_deref().unwrap_or("-"),
            "{:?}: {}",
            kind,
            event.message
        );

        if let Some(file) = state.sink.as_mut() {
            let written = serde_json::to_string(&event)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
                .and_then(|json| {
                    writeln!(file, "{}", json)?;
                    file.flush()
                });
            if let Err(e) = written {
                tracing::warn!("Failed to append to run log: {}", e);
            }
        }

        state.events.push(event);
        id
    }

    /// Record a non-fatal error under the matching event kind
    pub fn record_error(&self, error: &ScanError, address: impl ToString, scanner: Option<&str>) -> u64 {
        self.record(ScanEventKind::for_error(error), address, scanner, error.to_string())
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.state.lock().events.clone()
    }

    pub fn events_of(&self, kind: ScanEventKind) -> Vec<ScanEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> BTreeMap<ScanEventKind, usize> {
        let mut counts = BTreeMap::new();
        for event in self.state.lock().events.iter() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Write every event as one pretty JSON array
    pub fn export_json(&self, output_path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.events())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(output_path, json)
    }
}
