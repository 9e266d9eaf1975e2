use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::DEFAULT_SEARCH_LIMIT;
use crate::writer::WriterConfig;

/// Contents of `campusgraph.toml`; missing keys take their defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: Option<String>,
    pub debounce_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub search_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let writer = WriterConfig::default();
        Self {
            database: None,
            debounce_ms: writer.debounce.as_millis() as u64,
            max_retries: writer.max_retries,
            retry_backoff_ms: writer.retry_backoff.as_millis() as u64,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl StoreConfig {
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Configured database path, or the default one
    pub fn database_path(&self) -> PathBuf {
        self.database
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("campusgraph.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from(".campusgraph").join("campusgraph.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campusgraph.toml");
        std::fs::write(&path, "database = \"world.db\"\ndebounce_ms = 250\n").unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.database_path(), PathBuf::from("world.db"));
        assert_eq!(config.writer_config().debounce, Duration::from_millis(250));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.search_limit, 100);
    }

    #[test]
    fn test_write_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campusgraph.toml");

        write_config(&path, &StoreConfig::default(), false).unwrap();
        assert!(write_config(&path, &StoreConfig::default(), false).is_err());
        write_config(&path, &StoreConfig::default(), true).unwrap();

        let reloaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(reloaded, StoreConfig::default());
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("graph.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }
}
