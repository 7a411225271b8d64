use std::time::Duration;

/// Tuning knobs for [`EventAwaiter`](crate::EventAwaiter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwaiterConfig {
    /// Timeout applied when a caller passes `Duration::ZERO`.
    pub default_timeout: Duration,
    /// How often the background sweep looks for orphaned waiters.
    pub sweep_interval: Duration,
    /// Extra age beyond a waiter's own timeout before it counts as orphaned.
    pub orphan_grace: Duration,
}

impl AwaiterConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }
}

impl Default for AwaiterConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            orphan_grace: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = AwaiterConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.orphan_grace, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_overrides() {
        let config = AwaiterConfig::default()
            .with_default_timeout(Duration::from_millis(100))
            .with_sweep_interval(Duration::from_millis(10))
            .with_orphan_grace(Duration::ZERO);
        assert_eq!(config.default_timeout, Duration::from_millis(100));
        assert_eq!(config.sweep_interval, Duration::from_millis(10));
        assert_eq!(config.orphan_grace, Duration::ZERO);
    }
}
