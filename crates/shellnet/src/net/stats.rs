const RTT_SMOOTHING: f32 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_rejected: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_rejected(&mut self) {
        self.packets_rejected += 1;
    }

    pub fn record_rtt(&mut self, sample_ms: f32) {
        if self.rtt_ms == 0.0 {
            self.rtt_ms = sample_ms;
            return;
        }
        let delta = sample_ms - self.rtt_ms;
        self.rtt_ms += delta * RTT_SMOOTHING;
        self.rtt_variance += (delta.abs() - self.rtt_variance) * RTT_SMOOTHING;
    }
}
