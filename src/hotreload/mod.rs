use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::flags::FeatureState;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

/// Hot reload configuration
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct HotReloadConfig {
    /// Enable hot reload
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Debounce delay in milliseconds (to avoid reloading multiple times for rapid changes)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_enabled() -> bool {
    false
}

fn default_debounce_ms() -> u64 {
    1000
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Watches the configuration file and re-applies the `features` section.
///
/// Everything else in the file is only read at startup.
pub struct HotReloadService {
    config_path: PathBuf,
    features: Arc<FeatureState>,
    debounce_duration: Duration,
}

impl HotReloadService {
    pub fn new(config_path: PathBuf, features: Arc<FeatureState>, debounce_ms: u64) -> Self {
        Self {
            config_path,
            features,
            debounce_duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Start watching the configuration file for changes
    pub async fn start(self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher: RecommendedWatcher = Watcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    ) {
                        let _ = tx.blocking_send(event);
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| GateError::Internal(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(&self.config_path, RecursiveMode::NonRecursive)
            .map_err(|e| GateError::Internal(format!("Failed to watch config file: {}", e)))?;

        info!(
            path = %self.config_path.display(),
            debounce_ms = self.debounce_duration.as_millis(),
            "Feature switch watcher started"
        );

        tokio::spawn(async move {
            // Dropping the watcher stops the events
            let _watcher = watcher;
            self.run(rx).await;
        });

        Ok(())
    }

    /// Reload once the file has been quiet for the debounce duration.
    ///
    /// Every event pushes the deadline back, so the last write in a burst is
    /// the one that gets applied.
    async fn run(&self, mut rx: mpsc::Receiver<Event>) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        debug!("File change event detected: {:?}", event);
                        deadline = Some(Instant::now() + self.debounce_duration);
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.reload_logged();
                }
            }
        }

        if deadline.is_some() {
            self.reload_logged();
        }
    }

    fn reload_logged(&self) {
        if let Err(e) = self.reload() {
            error!("Failed to reload feature switches: {}", e);
        }
    }

    /// Read the file again and apply its feature switches.
    ///
    /// An invalid file leaves the current switches untouched.
    pub fn reload(&self) -> Result<()> {
        info!("Reloading feature switches from {:?}", self.config_path);

        let config = GateConfig::from_file(&self.config_path)?;
        config.validate()?;

        self.features.apply(&config.features);
        Ok(())
    }
}

/// Watch a configuration file and re-apply feature switches on changes
pub async fn watch_config_file<P: AsRef<Path>>(
    config_path: P,
    features: Arc<FeatureState>,
    debounce_ms: u64,
) -> Result<()> {
    HotReloadService::new(config_path.as_ref().to_path_buf(), features, debounce_ms)
        .start()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FeatureFlags;
    use std::fs;
    use tempfile::NamedTempFile;

    fn config_yaml(security_enabled: bool) -> String {
        format!(
            r#"
server: {{}}
upstream:
  url: "http://localhost:3000"
features:
  available: true
  security_enabled: {}
auth:
  provider: static
"#,
            security_enabled
        )
    }

    #[test]
    fn test_hot_reload_config_defaults() {
        let config = HotReloadConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.debounce_ms, 1000);
    }

    #[test]
    fn test_reload_applies_feature_switches() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), config_yaml(true)).unwrap();

        let features = Arc::new(FeatureState::default());
        let service =
            HotReloadService::new(temp_file.path().to_path_buf(), features.clone(), 0);

        service.reload().unwrap();
        assert!(features.is_security_enabled());

        fs::write(temp_file.path(), config_yaml(false)).unwrap();
        service.reload().unwrap();
        assert!(!features.is_security_enabled());
    }

    #[test]
    fn test_invalid_file_keeps_current_switches() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "features: [not, a, map").unwrap();

        let features = Arc::new(FeatureState::default());
        let service =
            HotReloadService::new(temp_file.path().to_path_buf(), features.clone(), 0);

        assert!(service.reload().is_err());
        assert!(features.is_available());
        assert!(features.is_security_enabled());
    }

    fn modified() -> Event {
        Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
    }

    #[tokio::test]
    async fn test_last_write_in_burst_is_applied() {
        let temp_file = NamedTempFile::new().unwrap();
        let features = Arc::new(FeatureState::default());
        let service =
            HotReloadService::new(temp_file.path().to_path_buf(), features.clone(), 200);

        let (tx, rx) = mpsc::channel(8);
        let watcher = tokio::spawn(async move { service.run(rx).await });

        fs::write(temp_file.path(), config_yaml(false)).unwrap();
        tx.send(modified()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        fs::write(temp_file.path(), config_yaml(true)).unwrap();
        tx.send(modified()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(features.is_security_enabled());

        fs::write(temp_file.path(), config_yaml(false)).unwrap();
        tx.send(modified()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(!features.is_security_enabled());

        drop(tx);
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_broken_write_does_not_hide_the_next_one() {
        let temp_file = NamedTempFile::new().unwrap();
        let features = Arc::new(FeatureState::default());
        let service =
            HotReloadService::new(temp_file.path().to_path_buf(), features.clone(), 200);

        let (tx, rx) = mpsc::channel(8);
        let watcher = tokio::spawn(async move { service.run(rx).await });

        fs::write(temp_file.path(), "features: [half, written").unwrap();
        tx.send(modified()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        fs::write(temp_file.path(), config_yaml(false)).unwrap();
        tx.send(modified()).await.unwrap();

        drop(tx);
        watcher.await.unwrap();

        assert!(!features.is_security_enabled());
    }
}
