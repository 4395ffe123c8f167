//! `replink.toml`: sync defaults and the transport command.
//!
//! ```toml
//! [sync]
//! keep = ["boot.py", "secrets.json"]
//! ignore = ["*.pyc", "tests"]
//! hash = "viper"
//!
//! [transport]
//! command = ["replink-serial", "/dev/ttyUSB0"]
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sync::{HashStrategy, IgnoreSpec, KeepSpec, SyncOptions};

pub const CONFIG_FILE_NAME: &str = "replink.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sync: SyncConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub keep: Option<KeepSpec>,
    pub ignore: Option<IgnoreSpec>,
    pub hash: HashStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Program and arguments whose stdio speaks the raw REPL.
    pub command: Vec<String>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Configuration(format!("invalid config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&text).map_err(|e| {
            Error::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load from `explicit`, else `./replink.toml`, else the user config
    /// file. No file at all means defaults; an explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match locate(explicit)? {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => {
                debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            keep: self.sync.keep.clone(),
            ignore: self.sync.ignore.clone(),
            dry_run: false,
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("replink").join("config.toml"))
}

pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = expand_tilde(path);
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(Some(local));
    }
    Ok(user_config_path().filter(|p| p.is_file()))
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" {
        dirs::home_dir().unwrap_or_else(|| path.to_path_buf())
    } else if let Some(rest) = text.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}
