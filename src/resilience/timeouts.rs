//! Timeout enforcement.
//!
//! # Responsibilities
//! - Track the total lifetime budget of a client request
//! - Bound each wait on the upstream (response head, every body read)
//! - Report which budget ran out
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - `None` budgets never expire
//! - Timed-out requests return 504 Gateway Timeout before headers are sent,
//!   and abort the stream after

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Which budget expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeoutKind {
    #[error("upstream did not answer within {0:?}")]
    Upstream(Duration),

    #[error("request exceeded its {0:?} lifetime")]
    Client(Duration),
}

/// Absolute end of a request's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<(Instant, Duration)>,
}

impl Deadline {
    /// A deadline `budget` from now, or none.
    pub fn after(budget: Option<Duration>) -> Self {
        Self {
            at: budget.map(|b| (Instant::now() + b, b)),
        }
    }

    pub fn unbounded() -> Self {
        Self { at: None }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|(at, _)| Instant::now() >= at)
    }

    /// Run `fut` until the deadline.
    pub async fn run<F: Future>(self, fut: F) -> Result<F::Output, TimeoutKind> {
        guarded(fut, None, self).await
    }
}

/// Run `fut` bounded by an idle budget starting now and by the request
/// deadline, whichever ends first.
pub async fn guarded<F: Future>(
    fut: F,
    idle: Option<Duration>,
    deadline: Deadline,
) -> Result<F::Output, TimeoutKind> {
    let idle = idle.map(|d| (Instant::now() + d, TimeoutKind::Upstream(d)));
    let total = deadline.at.map(|(at, b)| (at, TimeoutKind::Client(b)));

    let earliest = match (idle, total) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match earliest {
        Some((at, kind)) => tokio::time::timeout_at(at, fut).await.map_err(|_| kind),
        None => Ok(fut.await),
    }
}
