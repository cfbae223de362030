//! Routes: destination → next hop (spec §3 "Route").

use std::time::{Duration, Instant};

pub const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default)]
pub struct RouteMetrics {
    pub rtt_ewma_ms: f64,
    pub loss_ratio: f64,
    pub last_used: Option<Instant>,
}

/// `next_hop` preserves the caller's casing; lookups key on the
/// lowercase-normalized destination id (spec §4.4).
#[derive(Debug, Clone)]
pub struct Route {
    pub destination: String,
    pub next_hop: String,
    pub hop_count: u8,
    pub metrics: RouteMetrics,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Route {
    pub fn new(destination: impl Into<String>, next_hop: impl Into<String>, hop_count: u8, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            destination: destination.into(),
            next_hop: next_hop.into(),
            hop_count,
            metrics: RouteMetrics::default(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
