//! Run logger implementations.

use std::{collections::VecDeque, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stepflow_registry::{LogLevel, RunLogger};
use stepflow_types::CommandId;
use tracing::{debug, error, info, warn};

/// Forwards run log lines to `tracing` with the command id as a field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunLogger;

impl RunLogger for TracingRunLogger {
    fn log(&self, level: LogLevel, command: Option<CommandId>, message: &str) {
        let command_id = command.map(|id| id.get());
        match level {
            LogLevel::Debug => debug!(target: "stepflow::run", command_id, "{message}"),
            LogLevel::Info => info!(target: "stepflow::run", command_id, "{message}"),
            LogLevel::Warn => warn!(target: "stepflow::run", command_id, "{message}"),
            LogLevel::Error => error!(target: "stepflow::run", command_id, "{message}"),
        }
    }
}

/// One captured run log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub command: Option<CommandId>,
    pub message: String,
}

/// Keeps the most recent run log lines in memory, dropping the oldest when full.
#[derive(Debug)]
pub struct RingBufferLogger {
    buffer: Mutex<VecDeque<LogEntry>>,
    max_size: usize,
}

impl RingBufferLogger {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    /// The most recent `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let Ok(buffer) = self.buffer.lock() else {
            return Vec::new();
        };
        let start = buffer.len().saturating_sub(count);
        buffer.iter().skip(start).cloned().collect()
    }

    pub fn all(&self) -> Vec<LogEntry> {
        self.recent(self.max_size)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buffer| buffer.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

impl RunLogger for RingBufferLogger {
    fn log(&self, level: LogLevel, command: Option<CommandId>, message: &str) {
        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() >= self.max_size {
                buffer.pop_front();
            }
            buffer.push_back(LogEntry {
                at: Utc::now(),
                level,
                command,
                message: message.to_string(),
            });
        }
    }
}
