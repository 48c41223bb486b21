//! Profile-based configuration, read once at startup.
//!
//! ```toml
//! active = "local"
//! [profiles.local]
//! runtime_root = "/opt/cmme"
//! io_dir = "/tmp/cmme"
//! auto_stop_secs = 60
//! ppm_command = ["cmme", "serve", "--backend", "ppm"]
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::paths::read_to_string;

/// Names the configuration file.
pub const CONFIG_ENV: &str = "CMME_CONFIG";
/// Auxiliary runtime installation root; overrides the profile and is passed to children.
pub const RUNTIME_ROOT_ENV: &str = "CMME_RUNTIME_ROOT";
pub const DEFAULT_AUTO_STOP_SECS: u64 = 60;

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub runtime_root: Option<PathBuf>,
    pub io_dir: Option<PathBuf>,
    pub auto_stop_secs: Option<u64>,
    pub ppm_command: Option<Vec<String>>,
    pub drex_command: Option<Vec<String>>,
    pub idyom_command: Option<Vec<String>>,
    pub idyom_root: Option<PathBuf>,
    pub idyom_database: Option<PathBuf>,
}

/// Resolved settings for the active profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub profile: String,
    pub runtime_root: Option<PathBuf>,
    pub io_dir: PathBuf,
    pub auto_stop: Duration,
    /// Child command lines; `None` runs the native runtime of the current executable.
    pub ppm_command: Option<Vec<String>>,
    pub drex_command: Option<Vec<String>>,
    pub idyom_command: Option<Vec<String>>,
    pub idyom_root: Option<PathBuf>,
    pub idyom_database: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            runtime_root: None,
            io_dir: default_io_dir(),
            auto_stop: Duration::from_secs(DEFAULT_AUTO_STOP_SECS),
            ppm_command: None,
            drex_command: None,
            idyom_command: None,
            idyom_root: None,
            idyom_database: None,
        }
    }
}

fn default_io_dir() -> PathBuf {
    env::temp_dir().join("cmme")
}

fn default_config_path() -> PathBuf {
    dirs_home().join(".cmme").join("config.toml")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

impl Config {
    /// Load from `$CMME_CONFIG` or `~/.cmme/config.toml`; a missing file gives
    /// defaults. `$CMME_RUNTIME_ROOT` wins over the profile's runtime root.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());
        let config = if path.exists() {
            Self::from_path(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Self::default()
        };
        Ok(config.with_runtime_root_override(env::var(RUNTIME_ROOT_ENV).ok()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config = Self::from_toml_str(&read_to_string(path)?, path)?;
        tracing::info!(path = %path.display(), profile = %config.profile, "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Self::from_file(file, path)
    }

    fn from_file(mut file: ConfigFile, path: &Path) -> Result<Self> {
        let name = match file.active.clone() {
            Some(name) => name,
            // a lone profile is active without being named
            None if file.profiles.len() == 1 => match file.profiles.keys().next() {
                Some(k) => k.clone(),
                None => return Ok(Self::default()),
            },
            None => return Ok(Self::default()),
        };
        let profile = file.profiles.remove(&name).ok_or_else(|| {
            StoreError::parse(path, "active", format!("no [profiles.{name}] section"))
        })?;
        Ok(Self::from_profile(name, profile))
    }

    fn from_profile(name: String, p: Profile) -> Self {
        let defaults = Self::default();
        Self {
            profile: name,
            runtime_root: p.runtime_root,
            io_dir: p.io_dir.unwrap_or(defaults.io_dir),
            auto_stop: p.auto_stop_secs.map_or(defaults.auto_stop, Duration::from_secs),
            ppm_command: p.ppm_command,
            drex_command: p.drex_command,
            idyom_command: p.idyom_command,
            idyom_root: p.idyom_root,
            idyom_database: p.idyom_database,
        }
    }

    pub fn with_runtime_root_override(mut self, root: Option<String>) -> Self {
        if let Some(root) = root
            && !root.is_empty()
        {
            self.runtime_root = Some(PathBuf::from(root));
        }
        self
    }

    /// Configured child command line for a backend name (`ppm`, `drex`, `idyom`).
    pub fn command_for(&self, backend: &str) -> Option<&[String]> {
        match backend {
            "ppm" => self.ppm_command.as_deref(),
            "drex" => self.drex_command.as_deref(),
            "idyom" => self.idyom_command.as_deref(),
            _ => None,
        }
    }
}
