//! Controller link state machine.
//!
//! Tracks the lifecycle of the connection to the hardware controller (or the
//! script standing in for it) and decides how long to wait before reopening
//! it after a fault. Pure state, no I/O: the server's controller subsystem
//! drives the transitions and does the actual opening and reading.
//!
//! ```text
//!  Disconnected ──open()──▶ Opening ──opened()──▶ Active
//!       ▲                      │                    │
//!       │                      └──────fault()───────┤
//!       │                                           ▼
//!       └───────────────retry()────────────────── Error
//!
//!  shutdown() from any state ─▶ ShuttingDown (terminal)
//! ```

use serde::{Deserialize, Serialize};

/// Base delay before the first reopen attempt
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound on the reopen delay
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Lifecycle of the controller input link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No device open, no attempt in progress
    #[default]
    Disconnected,
    /// Opening the device
    Opening,
    /// Device open, events are read as they arrive
    Active,
    /// Device failed, waiting out the backoff
    Error,
    /// No further attempts
    ShuttingDown,
}

impl LinkState {
    /// Whether events from the device are expected
    pub fn is_open(&self) -> bool {
        *self == LinkState::Active
    }

    /// Whether the supervisor should try to (re)open the device
    pub fn should_reopen(&self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Error)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Opening => write!(f, "Opening"),
            LinkState::Active => write!(f, "Active"),
            LinkState::Error => write!(f, "Error"),
            LinkState::ShuttingDown => write!(f, "Shutting Down"),
        }
    }
}

/// State and retry bookkeeping for one controller link.
#[derive(Debug, Clone, Default)]
pub struct LinkMonitor {
    state: LinkState,
    failure_count: u32,
    events_seen: u64,
    last_fault: Option<String>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        LinkMonitor::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Consecutive faults since the device last opened.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Events delivered over the lifetime of the monitor.
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Description of the most recent fault, cleared once events flow again.
    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    /// Delay before the next reopen attempt.
    ///
    /// Doubles per consecutive fault: 1s, 2s, 4s, 8s, 16s, then 30s.
    pub fn backoff_ms(&self) -> u64 {
        let doublings = self.failure_count.saturating_sub(1).min(5);
        let delay = BACKOFF_BASE_MS * (1u64 << doublings);
        delay.min(BACKOFF_MAX_MS)
    }

    pub fn open(&mut self) {
        if self.state.should_reopen() {
            self.state = LinkState::Opening;
        }
    }

    pub fn opened(&mut self) {
        if self.state == LinkState::Opening {
            self.state = LinkState::Active;
            self.failure_count = 0;
        }
    }

    /// Record an event read from the device.
    pub fn event(&mut self) {
        if self.state.is_open() {
            self.events_seen += 1;
            self.last_fault = None;
        }
    }

    /// Record a failure to open or read the device.
    pub fn fault(&mut self, reason: impl Into<String>) {
        if self.state != LinkState::ShuttingDown {
            self.state = LinkState::Error;
            self.failure_count = self.failure_count.saturating_add(1);
            self.last_fault = Some(reason.into());
        }
    }

    /// Backoff elapsed; ready for another attempt.
    pub fn retry(&mut self) {
        if self.state == LinkState::Error {
            self.state = LinkState::Disconnected;
        }
    }

    /// Input ended cleanly (end of script).
    pub fn closed(&mut self) {
        if self.state != LinkState::ShuttingDown {
            self.state = LinkState::Disconnected;
        }
    }

    pub fn shutdown(&mut self) {
        self.state = LinkState::ShuttingDown;
    }
}
