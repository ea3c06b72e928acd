//! Movement snapshot cadence and stream stats

/// Decides on which frames the owner emits a movement snapshot
#[derive(Debug, Clone)]
pub struct SnapshotCadence {
    /// Frames since the last emitted snapshot
    frames_since_send: u32,
    /// Emission interval in frames
    send_interval: u32,
}

impl SnapshotCadence {
    pub fn new(send_interval: u32) -> Self {
        let send_interval = send_interval.max(1);
        Self {
            // First call sends immediately so remotes can snap
            frames_since_send: send_interval - 1,
            send_interval,
        }
    }

    /// Cadence for a frame rate and a send rate (both per second)
    pub fn from_rates(frame_rate: u32, send_rate: u32) -> Self {
        Self::new(frame_rate / send_rate.max(1))
    }

    /// Check if this frame should send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.frames_since_send += 1;
        if self.frames_since_send >= self.send_interval {
            self.frames_since_send = 0;
            true
        } else {
            false
        }
    }

    /// Force a snapshot on the next check (spawn, teleport)
    pub fn force_next(&mut self) {
        self.frames_since_send = self.send_interval;
    }

    pub fn interval(&self) -> u32 {
        self.send_interval
    }
}

/// Movement stream stats for debugging
#[derive(Debug, Default, Clone)]
pub struct StreamStats {
    pub sent: u64,
    pub received: u64,
    pub dropped_stale: u64,
}

impl StreamStats {
    pub fn record_received(&mut self, accepted: bool) {
        self.received += 1;
        if !accepted {
            self.dropped_stale += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_every_third_frame_at_sixty_over_twenty() {
        let mut cadence = SnapshotCadence::from_rates(60, 20);
        let sent: Vec<bool> = (0..7).map(|_| cadence.should_send()).collect();
        assert_eq!(sent, [true, false, false, true, false, false, true]);
    }

    #[test]
    fn force_next_sends_immediately() {
        let mut cadence = SnapshotCadence::new(3);
        cadence.should_send();
        cadence.force_next();
        assert!(cadence.should_send());
        assert!(!cadence.should_send());
    }

    #[test]
    fn zero_rates_are_clamped() {
        let cadence = SnapshotCadence::from_rates(60, 0);
        assert_eq!(cadence.interval(), 60);
        let mut every = SnapshotCadence::new(0);
        assert!(every.should_send());
        assert!(every.should_send());
    }

    #[test]
    fn stats_count_stale_drops() {
        let mut stats = StreamStats::default();
        stats.record_received(true);
        stats.record_received(false);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dropped_stale, 1);
    }
}
