use std::net::SocketAddr;
use std::time::Duration;

use shellnet::SyncConfig;

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub server: SocketAddr,
    pub player_name: String,
    pub blueprint: String,
    pub sync: SyncConfig,
    pub connection_timeout: Duration,
    pub request_interval: Duration,
    pub ping_interval: Duration,
    pub report_interval: Duration,
    /// Degrees in the XY plane.
    pub heading: Option<f32>,
}

impl ObserverConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            player_name: "observer".to_string(),
            blueprint: "Scout".to_string(),
            sync: SyncConfig::default(),
            connection_timeout: Duration::from_secs(10),
            request_interval: Duration::from_secs(1),
            ping_interval: Duration::from_millis(500),
            report_interval: Duration::from_secs(5),
            heading: None,
        }
    }
}
