//! [QUEUE] Token-bucket egress bandwidth scheduler (spec §4.7/§8).
//!
//! Egress byte budget rides on `governor`, the same token-bucket crate the
//! teacher already depends on for handshake rate limiting
//! (`lib-network::handshake::rate_limiter`); the per-second
//! messages/packet-loss metrics spec calls out aren't something `governor`
//! exposes, so those are tracked alongside it with a small rolling window.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota};

pub struct BandwidthScheduler {
    limiter: DefaultDirectRateLimiter,
    max_bytes_per_second: u32,
    window_start: Instant,
    bytes_this_window: u64,
    messages_this_window: u64,
    messages_per_second: f64,
    bytes_per_second_observed: f64,
    dropped_count: u64,
    attempted_count: u64,
}

impl BandwidthScheduler {
    pub fn new(max_bytes_per_second: u64) -> Self {
        let capacity = NonZeroU32::new(max_bytes_per_second.clamp(1, u32::MAX as u64) as u32).unwrap();
        let quota = Quota::per_second(capacity).allow_burst(capacity);
        Self {
            limiter: DefaultDirectRateLimiter::direct(quota),
            max_bytes_per_second: capacity.get(),
            window_start: Instant::now(),
            bytes_this_window: 0,
            messages_this_window: 0,
            messages_per_second: 0.0,
            bytes_per_second_observed: 0.0,
            dropped_count: 0,
            attempted_count: 0,
        }
    }

    /// Attempts to consume `size_bytes` worth of egress tokens. Returns
    /// `true` if the send may proceed now; `false` means the caller should
    /// hold the message and retry (spec: "the dequeue waits or yields back
    /// to the queue").
    pub fn try_consume(&mut self, size_bytes: usize) -> bool {
        self.roll_window();
        self.attempted_count += 1;

        let n = NonZeroU32::new(size_bytes.clamp(1, self.max_bytes_per_second as usize) as u32).unwrap();
        match self.limiter.check_n(n) {
            Ok(Ok(())) => {
                self.bytes_this_window += size_bytes as u64;
                self.messages_this_window += 1;
                true
            }
            _ => {
                self.dropped_count += 1;
                false
            }
        }
    }

    fn roll_window(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let secs = elapsed.as_secs_f64();
            self.messages_per_second = self.messages_this_window as f64 / secs;
            self.bytes_per_second_observed = self.bytes_this_window as f64 / secs;
            self.bytes_this_window = 0;
            self.messages_this_window = 0;
            self.window_start = Instant::now();
        }
    }

    pub fn messages_per_second(&self) -> f64 {
        self.messages_per_second
    }

    pub fn bytes_per_second_observed(&self) -> f64 {
        self.bytes_per_second_observed
    }

    pub fn packet_loss(&self) -> f64 {
        if self.attempted_count == 0 {
            0.0
        } else {
            self.dropped_count as f64 / self.attempted_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_exceeding_bucket_is_rejected() {
        let mut sched = BandwidthScheduler::new(100);
        assert!(sched.try_consume(50));
        assert!(sched.try_consume(50));
        assert!(!sched.try_consume(50));
    }

    #[test]
    fn packet_loss_tracks_rejected_fraction() {
        let mut sched = BandwidthScheduler::new(10);
        sched.try_consume(5);
        sched.try_consume(5);
        sched.try_consume(5);
        assert!(sched.packet_loss() > 0.0);
    }
}
