use kvb_protocol::Platform;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_url: String,
    /// Overrides the platform the broker would otherwise detect from headers.
    pub platform: Option<Platform>,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            platform: None,
            reconnect_interval_ms: 5_000,
            max_reconnect_attempts: 10,
        }
    }

    /// Backoff delay for the given 1-based attempt number: `base * 1.5^(attempt-1)`.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1.5f64.powi(attempt.saturating_sub(1) as i32);
        (self.reconnect_interval_ms as f64 * factor) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_match_the_documented_sequence() {
        let config = ClientConfig::new("ws://localhost:8081/ws");
        assert_eq!(config.backoff_delay_ms(1), 5000);
        assert_eq!(config.backoff_delay_ms(2), 7500);
        assert_eq!(config.backoff_delay_ms(3), 11250);
    }
}
