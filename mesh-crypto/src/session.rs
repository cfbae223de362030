//! Per-peer session key rotation (spec §4 "Session key rotation").
//!
//! The source comments this is lifted from never coded concrete triggers;
//! spec §4 pins them down as N=10,000 messages or T=1h, whichever first,
//! with an out-of-order tolerance window of 64 sequence numbers. This is
//! the resolution of that Open Question (see DESIGN.md).

use std::time::{Duration, Instant};

pub const ROTATE_AFTER_MESSAGES: u64 = 10_000;
pub const ROTATE_AFTER: Duration = Duration::from_secs(3600);
pub const OUT_OF_ORDER_WINDOW: u64 = 64;

pub struct SessionKeyState {
    pub key: [u8; 32],
    sequence: u64,
    created_at: Instant,
    highest_seen: u64,
}

impl SessionKeyState {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key,
            sequence: 0,
            created_at: Instant::now(),
            highest_seen: 0,
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    pub fn should_rotate(&self) -> bool {
        self.sequence >= ROTATE_AFTER_MESSAGES || self.created_at.elapsed() >= ROTATE_AFTER
    }

    pub fn rotate(&mut self, new_key: [u8; 32]) {
        self.key = new_key;
        self.sequence = 0;
        self.created_at = Instant::now();
        self.highest_seen = 0;
    }

    /// Accepts an inbound sequence number unless it falls outside the
    /// tolerated out-of-order window behind the highest seen so far.
    pub fn accept_inbound_sequence(&mut self, seq: u64) -> bool {
        if seq > self.highest_seen {
            self.highest_seen = seq;
            return true;
        }
        self.highest_seen.saturating_sub(seq) <= OUT_OF_ORDER_WINDOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_after_message_count() {
        let mut state = SessionKeyState::new([0u8; 32]);
        for _ in 0..ROTATE_AFTER_MESSAGES {
            state.next_sequence();
        }
        assert!(state.should_rotate());
    }

    #[test]
    fn out_of_order_within_window_accepted() {
        let mut state = SessionKeyState::new([0u8; 32]);
        assert!(state.accept_inbound_sequence(100));
        assert!(state.accept_inbound_sequence(100 - OUT_OF_ORDER_WINDOW));
        assert!(!state.accept_inbound_sequence(100 - OUT_OF_ORDER_WINDOW - 1));
    }
}
