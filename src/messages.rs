//! Incoming short messages
//!
//! Messages arrive from the host's receiver glue one batch at a time. The
//! CLI reads them as JSON lines: `{"sender": "...", "body": "..."}` with an
//! optional RFC 3339 `received_at`.

use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// An observed SMS, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub sender: String,
    pub body: String,
    #[serde(default = "Local::now")]
    pub received_at: DateTime<Local>,
}

impl IncomingMessage {
    pub fn new(
        sender: impl Into<String>,
        body: impl Into<String>,
        received_at: DateTime<Local>,
    ) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            received_at,
        }
    }

    /// First 50 characters of the body, for log lines
    pub fn preview(&self) -> String {
        self.body.chars().take(50).collect()
    }
}

/// Parse one message per non-blank line
pub fn read_messages<R: BufRead>(reader: R) -> Result<Vec<IncomingMessage>> {
    let mut messages = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let msg: IncomingMessage = serde_json::from_str(&line)
            .map_err(|e| Error::Parse(format!("line {}: {}", idx + 1, e)))?;
        messages.push(msg);
    }
    Ok(messages)
}
