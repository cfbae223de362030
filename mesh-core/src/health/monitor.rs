//! [HEALTH] Adaptive peer health monitor (spec §4.5).
//!
//! Generalized from `lib-network::monitoring::health_monitoring::HealthMonitor`'s
//! interval-loop shape, stripped of its UBI/coverage-area telemetry (no
//! spec counterpart) down to heartbeat RTT/health-score bookkeeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::config::HeartbeatConfig;
use crate::routing::PeerState;

const EWMA_ALPHA: f64 = 0.2;
const HEALTHY_CYCLES_TO_RESTORE: u32 = 2;
const HEALTHY_RTT_THRESHOLD_MS: f64 = 200.0;

#[derive(Debug, Clone)]
pub enum HealthEvent {
    StateChanged { peer_id: String, from: PeerState, to: PeerState },
}

#[derive(Debug, Clone)]
struct PeerHealth {
    interval: Duration,
    rtt_ewma_ms: f64,
    loss_ratio: f64,
    missed: u32,
    healthy_cycles: u32,
    state: PeerState,
    pending_ping_sent_at: Option<Instant>,
}

impl PeerHealth {
    fn new(base_interval: Duration) -> Self {
        Self {
            interval: base_interval,
            rtt_ewma_ms: 0.0,
            loss_ratio: 0.0,
            missed: 0,
            healthy_cycles: 0,
            state: PeerState::Connecting,
            pending_ping_sent_at: None,
        }
    }

    fn health_score(&self) -> f64 {
        let rtt_penalty = (self.rtt_ewma_ms / 20.0).clamp(0.0, 50.0);
        (100.0 - rtt_penalty - 10.0 * self.loss_ratio).clamp(0.0, 100.0)
    }
}

pub struct HealthMonitor {
    config: HeartbeatConfig,
    peers: HashMap<String, PeerHealth>,
    events: Option<UnboundedSender<HealthEvent>>,
}

impl HealthMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config, peers: HashMap::new(), events: None }
    }

    pub fn with_event_sink(mut self, sink: UnboundedSender<HealthEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn track(&mut self, peer_id: &str) {
        self.peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerHealth::new(Duration::from_millis(self.config.interval_ms)));
    }

    pub fn untrack(&mut self, peer_id: &str) {
        self.peers.remove(peer_id);
    }

    pub fn heartbeat_interval(&self, peer_id: &str) -> Duration {
        self.peers
            .get(peer_id)
            .map(|p| p.interval)
            .unwrap_or_else(|| Duration::from_millis(self.config.interval_ms))
    }

    pub fn on_ping_sent(&mut self, peer_id: &str) {
        self.track(peer_id);
        if let Some(p) = self.peers.get_mut(peer_id) {
            p.pending_ping_sent_at = Some(Instant::now());
        }
    }

    /// Records a matching CONTROL_PONG, updating RTT EWMA and health score,
    /// and attempts a DEGRADED→CONNECTED restore after enough healthy cycles.
    pub fn on_pong_received(&mut self, peer_id: &str) {
        let Some(p) = self.peers.get_mut(peer_id) else { return };
        let rtt_ms = p
            .pending_ping_sent_at
            .take()
            .map(|sent| sent.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(p.rtt_ewma_ms);

        p.rtt_ewma_ms = if p.rtt_ewma_ms == 0.0 {
            rtt_ms
        } else {
            EWMA_ALPHA * rtt_ms + (1.0 - EWMA_ALPHA) * p.rtt_ewma_ms
        };
        p.missed = 0;

        let healthy = p.rtt_ewma_ms < HEALTHY_RTT_THRESHOLD_MS;
        if healthy {
            p.healthy_cycles += 1;
        } else {
            p.healthy_cycles = 0;
        }

        self.apply_adaptive_interval(peer_id);

        let restore = {
            let p = self.peers.get(peer_id).unwrap();
            p.state == PeerState::Degraded
                && p.healthy_cycles >= HEALTHY_CYCLES_TO_RESTORE
                && p.health_score() >= 70.0
        };
        if restore {
            self.transition(peer_id, PeerState::Connected);
        }
    }

    /// Records a missed CONTROL_PONG response, applying the
    /// missed-threshold state transitions (spec §4.5).
    pub fn on_missed(&mut self, peer_id: &str) {
        self.track(peer_id);
        let max_missed = self.config.max_missed;
        let Some(p) = self.peers.get_mut(peer_id) else { return };
        p.missed += 1;
        p.healthy_cycles = 0;
        p.loss_ratio = (p.loss_ratio * 0.8 + 0.2).min(1.0);

        let missed = p.missed;
        self.apply_adaptive_interval(peer_id);

        if missed >= max_missed * 2 {
            self.transition(peer_id, PeerState::Disconnected);
        } else if missed >= max_missed {
            self.transition(peer_id, PeerState::Degraded);
        }
    }

    fn apply_adaptive_interval(&mut self, peer_id: &str) {
        if !self.config.adaptive {
            return;
        }
        let min = Duration::from_millis(self.config.min_interval_ms);
        let max = Duration::from_millis(self.config.max_interval_ms);
        let Some(p) = self.peers.get_mut(peer_id) else { return };

        if p.missed > 0 {
            p.interval = (p.interval / 2).max(min);
        } else if p.healthy_cycles >= HEALTHY_CYCLES_TO_RESTORE {
            let grown = p.interval.mul_f64(1.5);
            p.interval = grown.min(max);
        }
    }

    fn transition(&mut self, peer_id: &str, to: PeerState) {
        let Some(p) = self.peers.get_mut(peer_id) else { return };
        if p.state == to {
            return;
        }
        let from = p.state;
        p.state = to;
        debug!(peer_id, ?from, ?to, "peer health state transition");
        if let Some(sink) = &self.events {
            let _ = sink.send(HealthEvent::StateChanged { peer_id: peer_id.to_string(), from, to });
        }
    }

    pub fn state_of(&self, peer_id: &str) -> Option<PeerState> {
        self.peers.get(peer_id).map(|p| p.state)
    }

    pub fn health_score_of(&self, peer_id: &str) -> Option<f64> {
        self.peers.get(peer_id).map(|p| p.health_score())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missed_heartbeats_degrade_then_disconnect() {
        let mut hm = HealthMonitor::new(HeartbeatConfig { max_missed: 3, ..HeartbeatConfig::default() });
        hm.track("peer1");
        hm.transition("peer1", PeerState::Connected);
        for _ in 0..3 {
            hm.on_missed("peer1");
        }
        assert_eq!(hm.state_of("peer1"), Some(PeerState::Degraded));
        for _ in 0..3 {
            hm.on_missed("peer1");
        }
        assert_eq!(hm.state_of("peer1"), Some(PeerState::Disconnected));
    }

    #[test]
    fn healthy_pongs_restore_from_degraded() {
        let mut hm = HealthMonitor::new(HeartbeatConfig::default());
        hm.track("peer1");
        hm.transition("peer1", PeerState::Degraded);
        hm.on_ping_sent("peer1");
        hm.on_pong_received("peer1");
        hm.on_ping_sent("peer1");
        hm.on_pong_received("peer1");
        assert_eq!(hm.state_of("peer1"), Some(PeerState::Connected));
    }

    #[test]
    fn adaptive_interval_shrinks_on_miss_and_grows_when_healthy() {
        let mut hm = HealthMonitor::new(HeartbeatConfig::default());
        hm.track("peer1");
        let base = hm.heartbeat_interval("peer1");
        hm.on_missed("peer1");
        assert!(hm.heartbeat_interval("peer1") < base);
    }
}
