//! Hot reload of the configuration file.
//!
//! # Responsibilities
//! - Notice edits to the file, including editors that save by renaming a
//!   temporary file over it (the parent directory is watched, filtered by
//!   file name)
//! - Coalesce a burst of events into one reload after [`SETTLE_DELAY`]
//! - Apply the caller's adjustments (command-line overrides) and validate
//! - Forward only configurations that differ from the running one

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::RelayConfig;
use crate::config::validation::validate_config;

/// Quiet period after the first event before the file is read.
pub const SETTLE_DELAY: Duration = Duration::from_millis(250);

type Adjust = Box<dyn Fn(&mut RelayConfig) + Send>;

/// Reloads one configuration file and tracks the last accepted version.
pub struct ConfigWatcher {
    path: PathBuf,
    current: RelayConfig,
    adjust: Adjust,
}

impl ConfigWatcher {
    /// `current` is the configuration the relay is already running with.
    pub fn new(path: &Path, current: RelayConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            current,
            adjust: Box::new(|_| {}),
        }
    }

    /// Run `adjust` on every reloaded file before it is validated.
    pub fn with_adjust(mut self, adjust: impl Fn(&mut RelayConfig) + Send + 'static) -> Self {
        self.adjust = Box::new(adjust);
        self
    }

    pub fn current(&self) -> &RelayConfig {
        &self.current
    }

    /// Read the file again.
    ///
    /// Returns `None` if it fails to load or validate, or if nothing changed.
    pub fn reload(&mut self) -> Option<RelayConfig> {
        let mut config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to reload config, keeping current configuration");
                return None;
            }
        };

        (self.adjust)(&mut config);
        if let Err(errors) = validate_config(&config) {
            tracing::error!(
                path = ?self.path,
                error = %ConfigError::Validation(errors),
                "Reloaded configuration rejected"
            );
            return None;
        }

        if config == self.current {
            tracing::debug!(path = ?self.path, "Config file touched, contents unchanged");
            return None;
        }

        self.current = config.clone();
        Some(config)
    }

    /// Start watching.
    ///
    /// The returned watcher must be kept alive for as long as updates are
    /// wanted; dropping it ends the reload task.
    pub fn spawn(
        mut self,
    ) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<RelayConfig>), notify::Error> {
        let (event_tx, mut events) = mpsc::unbounded_channel::<()>();
        let (update_tx, updates) = mpsc::unbounded_channel();

        let file_name = self.path.file_name().map(OsStr::to_os_string);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if touches(&event, file_name.as_deref()) {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");

        tokio::spawn(async move {
            while events.recv().await.is_some() {
                tokio::time::sleep(SETTLE_DELAY).await;
                while events.try_recv().is_ok() {}

                tracing::info!(path = ?self.path, "Config file change detected, reloading");
                if let Some(config) = self.reload() {
                    if update_tx.send(config).is_err() {
                        break;
                    }
                }
            }
            tracing::debug!("Config watcher stopped");
        });

        Ok((watcher, updates))
    }
}

/// Whether `event` wrote to or created the watched file.
fn touches(event: &Event, file_name: Option<&OsStr>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| path.file_name() == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, EventKind, ModifyKind};

    fn write(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn only_changed_contents_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        write(&path, "[session]\npersistent = false\n");

        let mut watcher = ConfigWatcher::new(&path, load_config(&path).unwrap());
        assert!(watcher.reload().is_none());

        write(&path, "[session]\npersistent = true\n");
        let reloaded = watcher.reload().unwrap();
        assert!(reloaded.session.persistent);
        assert!(watcher.current().session.persistent);

        assert!(watcher.reload().is_none());
    }

    #[test]
    fn broken_file_keeps_current_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        write(&path, "[backend]\nhost = \"10.0.0.1\"\nport = 3333\n");
        let mut watcher = ConfigWatcher::new(&path, load_config(&path).unwrap());

        write(&path, "[backend\nhost = ");
        assert!(watcher.reload().is_none());

        write(&path, "[framing]\nmax_frame_bytes = 0\n");
        assert!(watcher.reload().is_none());

        assert_eq!(watcher.current().backend.host, "10.0.0.1");
    }

    #[test]
    fn adjustments_apply_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        write(&path, "[backend]\nhost = \"10.0.0.1\"\nport = 3333\n");

        let mut watcher = ConfigWatcher::new(&path, RelayConfig::default())
            .with_adjust(|config| config.backend.port = 0);
        assert!(watcher.reload().is_none());

        let mut watcher = ConfigWatcher::new(&path, RelayConfig::default())
            .with_adjust(|config| config.backend.port = 4444);
        assert_eq!(watcher.reload().unwrap().backend.port, 4444);
    }

    #[test]
    fn events_are_filtered_by_file_name() {
        let dir = PathBuf::from("/etc/pool-relay");
        let name = Some(OsStr::new("relay.toml"));

        let modified = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(dir.join("relay.toml"));
        assert!(touches(&modified, name));

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(dir.join("relay.toml"));
        assert!(touches(&created, name));

        let sibling = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(dir.join("other.toml"));
        assert!(!touches(&sibling, name));

        let read = Event::new(EventKind::Access(AccessKind::Any)).add_path(dir.join("relay.toml"));
        assert!(!touches(&read, name));
    }
}
