//! Session state management.

use std::time::Instant;

/// Encapsulation session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Transport accepted, no RegisterSession yet.
    #[default]
    Unregistered,
    /// Session handle assigned.
    Registered,
    /// At least one Forward Open connection is live.
    Connected,
    /// Session ended; the transport is being torn down.
    Closed,
}

impl SessionState {
    /// Check if SendRRData / SendUnitData are accepted.
    pub fn is_registered(&self) -> bool {
        matches!(self, SessionState::Registered | SessionState::Connected)
    }

    /// Check if a Forward Open connection is live.
    pub fn is_connected(&self) -> bool {
        *self == SessionState::Connected
    }

    /// Check if the session has ended.
    pub fn is_closed(&self) -> bool {
        *self == SessionState::Closed
    }
}

/// Per-session statistics.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Time the transport was accepted.
    pub started: Instant,
    /// Number of Forward Open requests granted.
    pub forward_opens: u64,
    /// Number of Forward Close requests handled.
    pub forward_closes: u64,
    /// Number of requests received.
    pub requests: u64,
    /// Number of replies sent.
    pub replies: u64,
    /// Total bytes received.
    pub bytes_received: u64,
    /// Total bytes sent.
    pub bytes_sent: u64,
    /// Number of requests answered with a non-zero status.
    pub errors: u64,
    /// Time of the last request.
    pub last_request: Option<Instant>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            forward_opens: 0,
            forward_closes: 0,
            requests: 0,
            replies: 0,
            bytes_received: 0,
            bytes_sent: 0,
            errors: 0,
            last_request: None,
        }
    }
}

impl SessionStats {
    /// Record a received request.
    pub fn record_request(&mut self, bytes: usize) {
        self.requests += 1;
        self.bytes_received += bytes as u64;
        self.last_request = Some(Instant::now());
    }

    /// Record a sent reply.
    pub fn record_reply(&mut self, bytes: usize, status: u32) {
        self.replies += 1;
        self.bytes_sent += bytes as u64;
        if status != 0 {
            self.errors += 1;
        }
    }

    /// Record a granted Forward Open.
    pub fn record_forward_open(&mut self) {
        self.forward_opens += 1;
    }

    /// Record a Forward Close.
    pub fn record_forward_close(&mut self) {
        self.forward_closes += 1;
    }

    /// Time since the transport was accepted.
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}
