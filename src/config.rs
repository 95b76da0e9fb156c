//! Engine configuration and persisted user preferences.
//!
//! Values are layered: built-in defaults, then `config.toml` from the XDG config
//! directory (or an explicit path), then `PICGRID_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::layout::ColumnPolicy;

const CONFIG_FILE: &str = "config.toml";
const PREFERENCES_FILE: &str = "preferences.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub api_url: String,
    pub page_size: u32,
    /// Distance from the end of content, in pixels, that arms a fetch.
    pub proximity_threshold: f64,
    pub fetch_debounce_ms: u64,
    pub resize_debounce_ms: u64,
    pub compact_breakpoint: f64,
    pub compact_columns: usize,
    pub wide_columns: usize,
    pub overscan_touch: usize,
    pub overscan_desktop: usize,
    pub fallback_item_height: f64,
    pub http_timeout_secs: u64,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api/".to_string(),
            page_size: 15,
            proximity_threshold: 300.0,
            fetch_debounce_ms: 200,
            resize_debounce_ms: 150,
            compact_breakpoint: 768.0,
            compact_columns: 1,
            wide_columns: 4,
            overscan_touch: 2,
            overscan_desktop: 5,
            fallback_item_height: 300.0,
            http_timeout_secs: 30,
        }
    }
}

impl GalleryConfig {
    /// Loads the default config file (if present) and applies env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            debug!(?path, "No config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `path` and applies env overrides. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("Failed to parse config: {:?}", path))?;
        info!(?path, "Loaded config");
        Ok(config)
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(CONFIG_FILE))
    }

    /// Applies `PICGRID_*` overrides. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PICGRID_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("PICGRID_PAGE_SIZE") {
            match raw.trim().parse::<u32>() {
                Ok(size) if size > 0 => self.page_size = size,
                _ => warn!(value = %raw, "Ignoring invalid PICGRID_PAGE_SIZE"),
            }
        }
        if let Some(raw) = lookup("PICGRID_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.http_timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid PICGRID_TIMEOUT_SECS"),
            }
        }
    }

    pub fn column_policy(&self) -> ColumnPolicy {
        ColumnPolicy {
            compact_below: self.compact_breakpoint,
            compact_columns: self.compact_columns,
            wide_columns: self.wide_columns,
            overscan_touch: self.overscan_touch,
            overscan_desktop: self.overscan_desktop,
            fallback_height: self.fallback_item_height,
        }
    }

    pub fn fetch_debounce(&self) -> Duration {
        Duration::from_millis(self.fetch_debounce_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Choices the user asked to have remembered across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub skip_delete_confirmation: bool,
    pub dark_mode: bool,
}

impl Preferences {
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(PREFERENCES_FILE))
    }

    /// Reads preferences, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preferences: {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse preferences: {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let text = toml::to_string(self).context("Failed to serialize preferences")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write preferences: {:?}", path))?;
        debug!(?path, "Saved preferences");
        Ok(())
    }
}

fn config_dir() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "picgrid").context("Failed to determine project directories")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_url = \"http://gallery.lan/api/\"\npage_size = 30\n").unwrap();

        let config = GalleryConfig::from_file(&path).unwrap();
        assert_eq!(config.api_url, "http://gallery.lan/api/");
        assert_eq!(config.page_size, 30);
        assert_eq!(config.fetch_debounce(), Duration::from_millis(200));
        assert_eq!(config.column_policy(), ColumnPolicy::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "page_size = \"many\"").unwrap();
        assert!(GalleryConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PICGRID_API_URL", "http://other/api/"),
            ("PICGRID_PAGE_SIZE", "0"),
            ("PICGRID_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();
        let mut config = GalleryConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_url, "http://other/api/");
        assert_eq!(config.page_size, 15, "zero page size is rejected");
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_preferences_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("preferences.toml");
        assert_eq!(Preferences::load(&path).unwrap(), Preferences::default());

        let prefs = Preferences {
            skip_delete_confirmation: true,
            dark_mode: false,
        };
        prefs.save(&path).unwrap();
        assert_eq!(Preferences::load(&path).unwrap(), prefs);
    }
}
