//! Append-only session log surfaced to the caller

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One timestamped event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "status")]
    pub severity: Severity,
}

/// Receiver side for callers that want entries as they are appended
pub struct LogChannel {
    receiver: mpsc::UnboundedReceiver<LogEntry>,
}

impl LogChannel {
    /// Receive the next log entry
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.receiver.recv().await
    }

    /// Receive a log entry without waiting
    pub fn try_recv(&mut self) -> Option<LogEntry> {
        self.receiver.try_recv().ok()
    }

    /// Close the channel
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Ordered event log.
///
/// Entries are stored in the order they were appended. Newest-first is only
/// a presentation order, see [`StatusLog::newest_first`]. Every entry is also
/// emitted as a `tracing` event.
#[derive(Debug, Default)]
pub struct StatusLog {
    entries: Vec<LogEntry>,
    sender: Option<mpsc::UnboundedSender<LogEntry>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that also forwards every entry to a channel
    pub fn with_channel() -> (Self, LogChannel) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let log = Self {
            entries: Vec::new(),
            sender: Some(sender),
        };
        (log, LogChannel { receiver })
    }

    pub fn info(&mut self, message: impl Into<String>) -> &LogEntry {
        self.append(message.into(), Severity::Info)
    }

    pub fn success(&mut self, message: impl Into<String>) -> &LogEntry {
        self.append(message.into(), Severity::Success)
    }

    pub fn error(&mut self, message: impl Into<String>) -> &LogEntry {
        self.append(message.into(), Severity::Error)
    }

    fn append(&mut self, message: String, severity: Severity) -> &LogEntry {
        match severity {
            Severity::Info => tracing::info!("{}", message),
            Severity::Success => tracing::info!(outcome = "success", "{}", message),
            Severity::Error => tracing::error!("{}", message),
        }

        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message,
            severity,
        };

        if let Some(sender) = &self.sender {
            if sender.send(entry.clone()).is_err() {
                // Receiver dropped; keep logging locally only.
                self.sender = None;
            }
        }

        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Entries in chronological order
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries in presentation order
    pub fn newest_first(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
