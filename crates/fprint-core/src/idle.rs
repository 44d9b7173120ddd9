//! Idle-shutdown coordination.
//!
//! A single deadline is armed whenever no registered device is in use. Every
//! re-evaluation cancels the pending deadline first, so any in-use
//! notification restarts the countdown from the full timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

/// Idle time after which the service shuts itself down.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    /// Shutdown is turned off for the life of the process
    Disabled,
    /// A shutdown deadline is pending
    Armed,
    /// At least one device is in use
    Active,
    /// The deadline passed and shutdown was requested
    Expired,
}

/// Returned when the idle deadline passes; the owner must shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// How long the service had been idle
    pub idle_for: Duration,
}

/// The idle-shutdown timer.
#[derive(Debug)]
pub struct IdleCoordinator {
    enabled: bool,
    timeout: Duration,
    deadline: Option<Instant>,
    expired: bool,
}

impl IdleCoordinator {
    /// Create a coordinator. When enabled it starts armed, since no device
    /// can be in use before any has been registered.
    #[must_use]
    pub fn new(timeout: Duration, no_timeout: bool) -> Self {
        let mut coordinator = Self { enabled: !no_timeout, timeout, deadline: None, expired: false };
        coordinator.reevaluate(0);
        coordinator
    }

    /// Cancel any pending deadline and re-arm it when `in_use_count` is zero.
    pub fn reevaluate(&mut self, in_use_count: usize) -> IdleState {
        if self.deadline.take().is_some() {
            debug!("Idle timer cancelled");
        }
        self.expired = false;

        if !self.enabled {
            return IdleState::Disabled;
        }

        if in_use_count == 0 {
            let deadline = Instant::now() + self.timeout;
            self.deadline = Some(deadline);
            debug!(timeout_secs = self.timeout.as_secs(), "Idle timer armed");
            IdleState::Armed
        } else {
            debug!(in_use_count, "Devices in use, idle timer not armed");
            IdleState::Active
        }
    }

    #[must_use]
    pub fn state(&self) -> IdleState {
        match (self.enabled, self.deadline) {
            (false, _) => IdleState::Disabled,
            (true, Some(_)) => IdleState::Armed,
            (true, None) if self.expired => IdleState::Expired,
            (true, None) => IdleState::Active,
        }
    }

    /// The pending deadline, if armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Consume the deadline if it has passed.
    pub fn poll_expired(&mut self, now: Instant) -> Option<ShutdownRequest> {
        let deadline = self.deadline.filter(|d| *d <= now)?;
        self.deadline = None;
        self.expired = true;
        let idle_for = now.saturating_duration_since(deadline) + self.timeout;
        info!(idle_secs = idle_for.as_secs(), "Idle timeout reached, requesting shutdown");
        Some(ShutdownRequest { idle_for })
    }
}

/// Sleep until `deadline`, or forever when it is `None`.
///
/// Intended as a `tokio::select!` branch; the future owns its deadline so it
/// does not borrow the coordinator.
pub async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
