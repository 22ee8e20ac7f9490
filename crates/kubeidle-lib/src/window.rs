//! Day-cyclic active/stale window scheduling
//!
//! Each boundary is resolved independently from the current UTC wall clock,
//! so windows crossing midnight need no special casing and a restarted
//! process picks up the schedule without persisted state.

use crate::error::{KubeIdleError, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Receiver of active-state flips driven by the schedule
pub trait ActiveStateSink: Send + Sync {
    fn set_active(&self, active: bool);
}

/// Active/stale boundaries as UTC times of day, truncated to the minute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    active_start: NaiveTime,
    stale_start: NaiveTime,
}

impl TimeWindow {
    pub fn new(active_start: NaiveTime, stale_start: NaiveTime) -> Self {
        Self {
            active_start: truncate_to_minute(active_start),
            stale_start: truncate_to_minute(stale_start),
        }
    }

    /// Parse both boundaries, failing on the first malformed value
    pub fn parse(active_start: &str, stale_start: &str) -> Result<Self> {
        let active = parse_time_of_day("active start", active_start)?;
        let stale = parse_time_of_day("stale start", stale_start)?;
        Ok(Self::new(active, stale))
    }

    pub fn active_start(&self) -> NaiveTime {
        self.active_start
    }

    pub fn stale_start(&self) -> NaiveTime {
        self.stale_start
    }

    /// Whether `now` falls in `[active_start, stale_start)` on the cyclic day
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let t = truncate_to_minute(now.time());
        if self.active_start <= self.stale_start {
            t >= self.active_start && t < self.stale_start
        } else {
            t >= self.active_start || t < self.stale_start
        }
    }

    pub fn next_active(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_occurrence(now, self.active_start)
    }

    pub fn next_stale(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_occurrence(now, self.stale_start)
    }

    /// When the phase entered at or before `now` ends
    ///
    /// With equal boundaries the active phase lasts only the boundary minute,
    /// so the cycle keeps a 24h period instead of alternating whole days.
    pub fn phase_end(&self, active: bool, now: DateTime<Utc>) -> DateTime<Utc> {
        if !active {
            return self.next_active(now);
        }
        if self.active_start != self.stale_start {
            return self.next_stale(now);
        }

        let entered = next_occurrence(now, self.active_start) - ChronoDuration::hours(24);
        (entered + ChronoDuration::minutes(1)).max(now)
    }

    /// Suspend until the next active boundary
    pub async fn wait_for_active(&self, cancel: &CancellationToken) -> Result<()> {
        let target = self.next_active(Utc::now());
        info!(next_active = %target, "Waiting for next active period");
        wait_until(target, cancel).await
    }

    /// Suspend until the next stale boundary
    pub async fn wait_for_stale(&self, cancel: &CancellationToken) -> Result<()> {
        let target = self.next_stale(Utc::now());
        info!(next_stale = %target, "Waiting for next stale period");
        wait_until(target, cancel).await
    }
}

/// Parse `HH:MM` or `HHMM` into a time of day
pub fn parse_time_of_day(field: &'static str, value: &str) -> Result<NaiveTime> {
    let trimmed = value.trim();
    let compact = trimmed.len() == 4 && trimmed.bytes().all(|b| b.is_ascii_digit());

    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .ok()
        .or_else(|| {
            compact
                .then(|| NaiveTime::parse_from_str(trimmed, "%H%M").ok())
                .flatten()
        })
        .ok_or_else(|| KubeIdleError::InvalidTimeFormat {
            field,
            value: value.to_string(),
        })
}

/// First instant strictly after `now` whose time of day is `at`
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let at = truncate_to_minute(at);
    let candidate = now.date_naive().and_time(at).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::hours(24)
    }
}

/// Sleep until the wall-clock instant `target`, or until cancelled
pub async fn wait_until(target: DateTime<Utc>, cancel: &CancellationToken) -> Result<()> {
    let remaining = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);

    tokio::select! {
        _ = tokio::time::sleep(remaining) => Ok(()),
        _ = cancel.cancelled() => Err(KubeIdleError::Cancelled),
    }
}

/// Drive `sink` through the window forever, alternating strictly between phases
pub async fn run_schedule<S>(window: TimeWindow, sink: &S, cancel: CancellationToken)
where
    S: ActiveStateSink + ?Sized,
{
    let mut active = window.is_active_at(Utc::now());
    info!(
        active_start = %window.active_start,
        stale_start = %window.stale_start,
        starting_active = active,
        "Starting window scheduler"
    );

    loop {
        sink.set_active(active);

        let waited = if !active {
            window.wait_for_active(&cancel).await
        } else if window.active_start == window.stale_start {
            wait_until(window.phase_end(true, Utc::now()), &cancel).await
        } else {
            window.wait_for_stale(&cancel).await
        };

        if waited.is_err() {
            info!("Shutting down window scheduler");
            break;
        }

        active = !active;
        if active {
            info!("Entering active state for scaling");
        } else {
            info!("Entering stale state");
        }
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
