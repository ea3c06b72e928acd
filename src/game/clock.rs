//! Host-authoritative countdown and the shared session clock
//!
//! The countdown lives in two room properties, `countdown_start` and
//! `countdown_duration`. Only the master writes a running pair; anyone may
//! write the `(0, 0)` cancellation pair. Every peer derives the remaining time
//! locally from the last pair it saw and its estimate of the shared clock.

use tracing::debug;

use crate::ws::protocol::{keys, PropValue, Properties};

/// Countdown derived from the shared `(start, duration)` pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionClock {
    start: f64,
    duration: f32,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or extend) the countdown. Only the session authority may do
    /// this; for anyone else the call is ignored and `None` is returned.
    ///
    /// The returned update carries both keys so it is written atomically.
    pub fn start(&mut self, is_authority: bool, now: f64, duration: f32) -> Option<Properties> {
        if !is_authority {
            debug!("countdown start ignored: not the session authority");
            return None;
        }
        if duration <= 0.0 {
            return None;
        }
        self.start = now;
        self.duration = duration;
        Some(Self::pair(now, duration))
    }

    /// Clear the countdown locally and return the `(0, 0)` update
    pub fn cancel(&mut self) -> Properties {
        self.start = 0.0;
        self.duration = 0.0;
        Self::pair(0.0, 0.0)
    }

    /// Refresh from a room property change (keys not present are kept)
    pub fn observe(&mut self, props: &Properties) {
        if let Some(start) = props.get(keys::COUNTDOWN_START).and_then(PropValue::as_f64) {
            self.start = start;
        }
        if let Some(duration) = props.get(keys::COUNTDOWN_DURATION).and_then(PropValue::as_f64) {
            self.duration = duration as f32;
        }
    }

    /// Seconds left at shared time `now`, never negative
    pub fn remaining(&self, now: f64) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        (self.start + self.duration as f64 - now).max(0.0)
    }

    /// A nonzero countdown is set
    pub fn is_running(&self) -> bool {
        self.duration > 0.0
    }

    /// A nonzero countdown has elapsed
    pub fn is_complete(&self, now: f64) -> bool {
        self.is_running() && self.remaining(now) <= 0.0
    }

    /// Whole seconds to show, rounded up; `None` hides the display
    pub fn display_seconds(&self, now: f64) -> Option<u32> {
        let remaining = self.remaining(now);
        (remaining > 0.0).then(|| remaining.ceil() as u32)
    }

    pub fn start_time(&self) -> f64 {
        self.start
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    fn pair(start: f64, duration: f32) -> Properties {
        let mut props = Properties::new();
        props.insert(keys::COUNTDOWN_START.to_string(), PropValue::Float(start));
        props.insert(
            keys::COUNTDOWN_DURATION.to_string(),
            PropValue::Float(duration as f64),
        );
        props
    }
}

/// Local estimate of the relay's shared clock.
///
/// Offsets come from ping/pong samples (`server_time + rtt / 2 - local`),
/// smoothed with an exponential moving average. Readings never go backwards,
/// even when a new sample lowers the offset.
#[derive(Debug, Clone)]
pub struct SharedClock {
    offset: Option<f64>,
    ewma_rtt: f64,
    alpha: f64,
    last_reading: f64,
}

impl Default for SharedClock {
    fn default() -> Self {
        Self {
            offset: None,
            ewma_rtt: 0.0,
            alpha: 0.125,
            last_reading: 0.0,
        }
    }
}

impl SharedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the offset from a join confirmation (no RTT known yet)
    pub fn seed(&mut self, server_time: f64, local_now: f64) {
        if self.offset.is_none() {
            self.offset = Some(server_time - local_now);
        }
    }

    /// Fold in a pong answer to a ping sent at `local_sent`
    pub fn on_pong(&mut self, local_sent: f64, server_time: f64, local_now: f64) {
        let rtt = (local_now - local_sent).max(0.0);
        self.ewma_rtt = if self.ewma_rtt == 0.0 {
            rtt
        } else {
            self.alpha * rtt + (1.0 - self.alpha) * self.ewma_rtt
        };

        let sample = server_time + rtt / 2.0 - local_now;
        self.offset = Some(match self.offset {
            Some(current) => self.alpha * sample + (1.0 - self.alpha) * current,
            None => sample,
        });
    }

    /// Whether at least one sample has been taken
    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    /// Smoothed round trip time in seconds
    pub fn rtt(&self) -> f64 {
        self.ewma_rtt
    }

    /// Shared clock reading for local time `local_now`
    pub fn now(&mut self, local_now: f64) -> f64 {
        let reading = local_now + self.offset.unwrap_or(0.0);
        if reading > self.last_reading {
            self.last_reading = reading;
        }
        self.last_reading
    }

    /// Forget the estimate (after leaving a relay)
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
