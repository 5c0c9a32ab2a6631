use std::time::Duration;

use derive_builder::Builder;
use tokio::time::Instant;

use super::device::LightState;

#[derive(Builder, Clone, Copy, Debug, PartialEq, Eq)]
#[builder(default)]
pub struct Timings {
    /// How often a device's throttle timer checks for pending work.
    pub poll_interval: Duration,

    /// Minimum time between two writes to the same device.
    pub min_spacing: Duration,

    /// Period of the shared batch that flushes sync-propagated devices.
    pub sync_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            poll_interval: Duration::from_millis(50),
            min_spacing: Duration::from_millis(100),
            sync_interval: Duration::from_millis(300),
        }
    }
}

/// Rate limiter for writes to one device.
///
/// Only the latest scheduled state is kept, so a burst of slider input
/// collapses into a single write. A write goes out on a timer tick once
/// `min_spacing` has passed both since the previous write and since the
/// current burst began.
#[derive(Debug)]
pub struct UpdateThrottle {
    poll_interval: Duration,
    min_spacing: Duration,
    pending: Option<LightState>,
    burst_started: Option<Instant>,
    next_tick: Option<Instant>,
    last_push: Option<Instant>,
}

impl UpdateThrottle {
    pub fn new(timings: &Timings) -> Self {
        UpdateThrottle {
            poll_interval: timings.poll_interval,
            min_spacing: timings.min_spacing,
            pending: None,
            burst_started: None,
            next_tick: None,
            last_push: None,
        }
    }

    pub fn schedule(&mut self, state: LightState, now: Instant) {
        self.pending = Some(state);

        if self.next_tick.is_none() {
            self.burst_started = Some(now);
            self.next_tick = Some(now + self.poll_interval);
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<LightState> {
        self.pending
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Run the timer if it is due. Returns the state to write, if any.
    pub fn tick(&mut self, now: Instant) -> Option<LightState> {
        let due = self.next_tick.filter(|tick| *tick <= now)?;

        let Some(state) = self.pending else {
            self.stop();
            return None;
        };

        let spaced = [self.last_push, self.burst_started]
            .into_iter()
            .flatten()
            .all(|since| now.saturating_duration_since(since) >= self.min_spacing);

        if spaced {
            self.mark_pushed(now);
            return Some(state);
        }

        let next = due + self.poll_interval;
        self.next_tick = Some(if next > now { next } else { now + self.poll_interval });

        None
    }

    /// Record a write made on this device's behalf by someone else (the sync
    /// batch). It carries the latest state, so anything pending is dropped.
    pub fn mark_pushed(&mut self, now: Instant) {
        self.last_push = Some(now);
        self.stop();
    }

    fn stop(&mut self) {
        self.pending = None;
        self.burst_started = None;
        self.next_tick = None;
    }
}
