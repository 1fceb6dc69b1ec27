use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use dm_core::config::{DmConfig, load_config};
use notify::{Event, EventKind, RecursiveMode, Watcher};

/// Re-read `path` into `config`. On failure the previous config stays.
///
/// Returns whether a new config was stored.
pub fn reload(path: &Path, config: &ArcSwap<DmConfig>) -> bool {
    match load_config(path) {
        Ok(new_config) => {
            config.store(Arc::new(new_config));
            log::info!("config reloaded from {}", path.display());
            true
        }
        Err(e) => {
            log::warn!("config reload failed, keeping the previous one: {e:#}");
            false
        }
    }
}

/// Watch the config file and swap in every valid new version.
///
/// The returned watcher must stay alive for as long as reloading is wanted.
///
/// # Errors
/// Returns an error if the watcher cannot be created or the path cannot be watched.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use arc_swap::ArcSwap;
/// use dm_core::config::DmConfig;
/// use std::path::Path;
///
/// let config = Arc::new(ArcSwap::from_pointee(DmConfig::default()));
/// let _watcher = dm_app::hotreload::spawn_config_watcher(Path::new("config/default.toml"), &config);
/// ```
pub fn spawn_config_watcher(config_path: &Path, config: &Arc<ArcSwap<DmConfig>>) -> Result<impl Watcher + use<>> {
    let config = Arc::clone(config);
    let path = config_path.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Modify(_)) => {
            reload(&path, &config);
        }
        Ok(_) => {}
        Err(e) => log::warn!("config watcher error: {e}"),
    })?;

    watcher.watch(config_path, RecursiveMode::NonRecursive)?;
    log::debug!("watching {} for changes", config_path.display());
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_edit_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dm.toml");
        std::fs::write(&path, "[vis]\nn_rows = 8\n").unwrap();
        let config = ArcSwap::from_pointee(DmConfig::default());

        assert!(reload(&path, &config));
        assert_eq!(config.load().vis.n_rows, 8);
    }

    #[test]
    fn invalid_edit_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dm.toml");
        std::fs::write(&path, "[vis]\nn_cols = 2\n").unwrap();
        let config = ArcSwap::from_pointee(DmConfig::default());
        assert!(reload(&path, &config));

        std::fs::write(&path, "[vis\nn_cols = ").unwrap();
        assert!(!reload(&path, &config));
        assert_eq!(config.load().vis.n_cols, 2);
    }

    #[test]
    fn watcher_needs_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ArcSwap::from_pointee(DmConfig::default()));
        assert!(spawn_config_watcher(&dir.path().join("none.toml"), &config).is_err());
        std::fs::write(dir.path().join("dm.toml"), "").unwrap();
        assert!(spawn_config_watcher(&dir.path().join("dm.toml"), &config).is_ok());
    }
}
