//! Metrics tracking for the stream server

use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Stream,
    Admin,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Stream => "STREAM",
            LogLevel::Admin => "ADMIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerStatus {
    Starting,
    Running,
    Error,
}

/// Server metrics
pub struct Metrics {
    /// Server start time
    pub start_time: DateTime<Local>,

    /// Address the listener is bound to
    pub bind_address: Option<String>,

    /// Whether admin endpoints accept any caller
    pub admin_enabled: bool,

    /// Streams in the store
    pub stream_count: usize,

    /// Assets in the catalog
    pub asset_count: usize,

    /// Clock endpoint hits
    pub clock_requests: u64,

    /// Stream lookups (list + get)
    pub stream_lookups: u64,

    /// Lookups for missing or inactive streams
    pub stream_misses: u64,

    /// Playback tokens issued
    pub tokens_issued: u64,

    /// Token requests refused or failed
    pub token_failures: u64,

    /// Successful admin create/update/delete
    pub admin_mutations: u64,

    /// Admin requests without valid authorization
    pub rejected_requests: u64,

    /// Log entries
    pub logs: VecDeque<LogEntry>,

    /// Server status
    pub status: ServerStatus,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            bind_address: None,
            admin_enabled: false,
            stream_count: 0,
            asset_count: 0,
            clock_requests: 0,
            stream_lookups: 0,
            stream_misses: 0,
            tokens_issued: 0,
            token_failures: 0,
            admin_mutations: 0,
            rejected_requests: 0,
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: ServerStatus::Starting,
        }
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    pub fn clock_request(&mut self) {
        self.clock_requests += 1;
    }

    /// Record a stream lookup; misses are logged
    pub fn stream_lookup(&mut self, id: &str, found: bool) {
        self.stream_lookups += 1;
        if !found {
            self.stream_misses += 1;
            self.log(LogLevel::Warning, format!("Stream not found: {}", id));
        }
    }

    pub fn token_issued(&mut self, playback_id: &str) {
        self.tokens_issued += 1;
        self.log(
            LogLevel::Stream,
            format!("Tokens issued: {}", truncate_id(playback_id)),
        );
    }

    pub fn token_failed(&mut self, playback_id: &str, reason: &str) {
        self.token_failures += 1;
        self.log(
            LogLevel::Warning,
            format!("Token refused for {}: {}", truncate_id(playback_id), reason),
        );
    }

    /// Record a successful admin mutation and the new store size
    pub fn admin_mutation(&mut self, action: &str, id: &str, stream_count: usize) {
        self.admin_mutations += 1;
        self.stream_count = stream_count;
        self.log(LogLevel::Admin, format!("{} {}", action, id));
    }

    pub fn request_rejected(&mut self, path: &str) {
        self.rejected_requests += 1;
        self.log(LogLevel::Warning, format!("Unauthorized: {}", path));
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}

/// Truncate an id for display (show first and last few chars)
pub fn truncate_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() > 16 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        id.to_string()
    }
}
