use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::DispatcherConfig;

/// Chooses the lease TTL handed to a node on register and heartbeat.
///
/// `live_nodes` is the number of currently registered nodes, so a policy can
/// stretch the TTL as the cluster grows without touching call sites.
pub trait TtlPolicy: Send + Sync + std::fmt::Debug {
    fn elect_ttl(&self, live_nodes: usize) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedTtl(pub Duration);

impl TtlPolicy for FixedTtl {
    fn elect_ttl(&self, _live_nodes: usize) -> Duration {
        self.0
    }
}

/// Base TTL plus a uniform random extension in `[0, jitter]`.
///
/// Spreads the re-heartbeat deadlines of nodes that registered together.
#[derive(Debug, Clone, Copy)]
pub struct JitteredTtl {
    pub base: Duration,
    pub jitter: Duration,
}

impl TtlPolicy for JitteredTtl {
    fn elect_ttl(&self, _live_nodes: usize) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return self.base;
        }
        let mut rng = rand::thread_rng();
        self.base + Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Build the policy described by the config.
pub fn policy_from_config(config: &DispatcherConfig) -> Arc<dyn TtlPolicy> {
    if config.heartbeat_jitter.is_zero() {
        Arc::new(FixedTtl(config.heartbeat_ttl))
    } else {
        Arc::new(JitteredTtl {
            base: config.heartbeat_ttl,
            jitter: config.heartbeat_jitter,
        })
    }
}
