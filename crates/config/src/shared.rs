//! Atomically swappable configuration snapshot.

use std::{path::PathBuf, sync::Arc};

use tokio::sync::watch;

use crate::Config;

/// Shared handle to the current configuration snapshot.
///
/// Requests call [`SharedConfig::snapshot`] once at entry and keep the
/// returned [`Arc`] for their whole lifetime; a concurrent [`reload`] swaps
/// the pointer without affecting them. No request ever spans two
/// configurations.
///
/// [`reload`]: SharedConfig::reload
#[derive(Clone)]
pub struct SharedConfig {
    sender: Arc<watch::Sender<Arc<Config>>>,
    path: Option<PathBuf>,
}

/// A point-in-time configuration snapshot.
pub type ConfigHandle = Arc<Config>;

impl SharedConfig {
    /// Wraps an already-loaded configuration. Used by tests and by callers
    /// that manage the file themselves.
    pub fn new(config: Config) -> Self {
        let (sender, _) = watch::channel(Arc::new(config));

        Self {
            sender: Arc::new(sender),
            path: None,
        }
    }

    /// Loads the configuration from `path` and remembers it for reloads.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let config = Config::load(&path)?;
        let (sender, _) = watch::channel(Arc::new(config));

        Ok(Self {
            sender: Arc::new(sender),
            path: Some(path),
        })
    }

    /// The current snapshot. Cheap; clones an `Arc`.
    pub fn snapshot(&self) -> ConfigHandle {
        self.sender.borrow().clone()
    }

    /// Re-reads the configuration file and swaps the snapshot atomically.
    /// In-flight requests keep the snapshot they started with.
    pub fn reload(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            anyhow::bail!("configuration was not loaded from a file, nothing to reload");
        };

        let config = Config::load(path)?;
        self.sender.send_replace(Arc::new(config));

        log::info!("configuration reloaded from {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_stable_across_swap() {
        let shared = SharedConfig::new(Config::default());
        let before = shared.snapshot();

        shared.sender.send_replace(Arc::new(Config {
            server: crate::ServerConfig {
                port: 1234,
                ..Default::default()
            },
            ..Default::default()
        }));

        // The earlier snapshot still sees the old value; new callers the new one.
        assert_eq!(before.server.port, 8000);
        assert_eq!(shared.snapshot().server.port, 1234);
    }

    #[test]
    fn reload_without_path_fails() {
        let shared = SharedConfig::new(Config::default());
        assert!(shared.reload().is_err());
    }
}
