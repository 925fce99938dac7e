use crate::config::FeatureConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Licensing / feature switch lookup consulted before authentication
pub trait FeatureFlags: Send + Sync {
    /// Whether feature information could be determined
    fn is_available(&self) -> bool;

    /// Whether the security feature is enabled. Only meaningful when available.
    fn is_security_enabled(&self) -> bool;
}

/// Feature switches that can be changed while the server runs
#[derive(Debug)]
pub struct FeatureState {
    available: AtomicBool,
    security_enabled: AtomicBool,
}

impl FeatureState {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            available: AtomicBool::new(config.available),
            security_enabled: AtomicBool::new(config.security_enabled),
        }
    }

    /// Replace the current switches
    pub fn apply(&self, config: &FeatureConfig) {
        let was_available = self.available.swap(config.available, Ordering::SeqCst);
        let was_enabled = self
            .security_enabled
            .swap(config.security_enabled, Ordering::SeqCst);

        if was_available != config.available || was_enabled != config.security_enabled {
            info!(
                available = config.available,
                security_enabled = config.security_enabled,
                "Feature switches changed"
            );
        }
    }

    pub fn snapshot(&self) -> FeatureConfig {
        FeatureConfig {
            available: self.available.load(Ordering::SeqCst),
            security_enabled: self.security_enabled.load(Ordering::SeqCst),
        }
    }
}

impl Default for FeatureState {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

impl FeatureFlags for FeatureState {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_security_enabled(&self) -> bool {
        self.security_enabled.load(Ordering::SeqCst)
    }
}
