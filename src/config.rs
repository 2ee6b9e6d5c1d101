use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default lease TTL handed to nodes on register and heartbeat.
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(5);

const DEFAULT_PORT: u16 = 4242;
const DEFAULT_WATCH_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub listen_addr: SocketAddr,
    pub dashboard_addr: Option<SocketAddr>,
    /// Lease TTL. A node that does not heartbeat within it is marked down.
    pub heartbeat_ttl: Duration,
    /// Upper bound of the random extension added to each elected TTL.
    /// Zero disables jitter.
    pub heartbeat_jitter: Duration,
    /// Snapshots buffered per watch stream before the sender waits.
    pub watch_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            dashboard_addr: None,
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            heartbeat_jitter: Duration::ZERO,
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl DispatcherConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    pub fn with_heartbeat_jitter(mut self, jitter: Duration) -> Self {
        self.heartbeat_jitter = jitter;
        self
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_watch_buffer(mut self, size: usize) -> Self {
        self.watch_buffer = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_config_default() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:4242");
        assert!(cfg.dashboard_addr.is_none());
        assert_eq!(cfg.heartbeat_ttl, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_jitter, Duration::ZERO);
        assert_eq!(cfg.watch_buffer, 16);
    }

    #[test]
    fn dispatcher_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = DispatcherConfig::new(addr);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.heartbeat_ttl, DEFAULT_HEARTBEAT_TTL);
    }

    #[test]
    fn dispatcher_config_builders() {
        let dashboard: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let cfg = DispatcherConfig::default()
            .with_heartbeat_ttl(Duration::from_millis(500))
            .with_heartbeat_jitter(Duration::from_millis(50))
            .with_dashboard(dashboard)
            .with_watch_buffer(4);
        assert_eq!(cfg.heartbeat_ttl, Duration::from_millis(500));
        assert_eq!(cfg.heartbeat_jitter, Duration::from_millis(50));
        assert_eq!(cfg.dashboard_addr, Some(dashboard));
        assert_eq!(cfg.watch_buffer, 4);
    }

    #[test]
    fn watch_buffer_is_never_zero() {
        let cfg = DispatcherConfig::default().with_watch_buffer(0);
        assert_eq!(cfg.watch_buffer, 1);
    }
}
