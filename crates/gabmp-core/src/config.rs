//! # Configuration System
//!
//! YAML configuration for programs that run a pursuit:
//!
//! - Pursuit tunables (algorithm, stopping rules, kernel truncation, solver)
//! - The dictionaries of the union (window shape, length, hop, channels)
//! - Logging
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via `GABMP_CONFIG` environment variable
//! 2. `./gabmp.yaml` (current directory)
//! 3. `~/.config/gabmp/config.yaml` (user config)
//! 4. `/etc/gabmp/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! pursuit:
//!   algorithm: cyclic_mp
//!   err_tol_db: -60.0
//!   max_atoms: 2000
//!   cycles: 2
//!
//! dictionaries:
//!   - window: blackman
//!     window_len: 256
//!     hop: 64
//!     channels: 256
//!   - window: blackman
//!     window_len: 1024
//!     hop: 256
//!     channels: 1024
//!
//! logging:
//!   level: debug
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dgt::dgt_length;
use crate::dictionary::WindowSpec;
use crate::observe::LogConfig;
use crate::params::PursuitParams;
use crate::pursuit::Pursuit;
use crate::types::{MpError, MpResult};
use crate::windows::FirWindow;

/// Error type for configuration operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {0}")]
    NotFound(String),
    #[error("failed to read config: {0}")]
    ReadError(String),
    #[error("failed to parse config: {0}")]
    ParseError(String),
    #[error("invalid config: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for MpError {
    fn from(e: ConfigError) -> Self {
        MpError::Config(e.to_string())
    }
}

/// One dictionary of the union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryConfig {
    /// Window shape
    pub window: FirWindow,
    /// Window length in samples
    pub window_len: usize,
    /// Hop size `a`
    pub hop: usize,
    /// Channel count `M`
    pub channels: usize,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            window: FirWindow::Blackman,
            window_len: 512,
            hop: 128,
            channels: 512,
        }
    }
}

impl DictionaryConfig {
    pub fn new(window: FirWindow, window_len: usize, hop: usize, channels: usize) -> Self {
        Self { window, window_len, hop, channels }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::fir(self.window, self.window_len, self.hop, self.channels)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GabmpConfig {
    /// Configuration format version
    pub version: String,
    /// Pursuit parameters
    pub pursuit: PursuitParams,
    /// Dictionaries, in selection-priority order
    pub dictionaries: Vec<DictionaryConfig>,
    /// Logging configuration
    pub logging: LogConfig,
}

impl Default for GabmpConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            pursuit: PursuitParams::default(),
            dictionaries: vec![DictionaryConfig::default()],
            logging: LogConfig::default(),
        }
    }
}

impl GabmpConfig {
    /// Load configuration from the default search path.
    ///
    /// Search order:
    /// 1. `GABMP_CONFIG` environment variable
    /// 2. `./gabmp.yaml`
    /// 3. `~/.config/gabmp/config.yaml`
    /// 4. `/etc/gabmp/config.yaml`
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("GABMP_CONFIG") {
            if Path::new(&path).exists() {
                return Self::load_from(Path::new(&path));
            }
        }

        for path in &Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
    }

    /// Get configuration search paths.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./gabmp.yaml")];

        if let Some(dirs) = directories::ProjectDirs::from("", "", "gabmp") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/gabmp/config.yaml"));
        paths
    }

    /// Validate the configuration.
    ///
    /// Only checks what does not depend on the signal length; the
    /// dictionaries are fully validated when the pursuit is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dictionaries.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one dictionary is required".to_string(),
            ));
        }

        for (i, d) in self.dictionaries.iter().enumerate() {
            if d.window_len == 0 || d.hop == 0 || d.channels == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "dictionary {}: window_len, hop and channels must be > 0",
                    i
                )));
            }
            if d.hop > d.channels {
                return Err(ConfigError::ValidationError(format!(
                    "dictionary {}: hop {} exceeds channels {}",
                    i, d.hop, d.channels
                )));
            }
            if d.window_len < d.hop {
                return Err(ConfigError::ValidationError(format!(
                    "dictionary {}: window_len {} is shorter than hop {}",
                    i, d.window_len, d.hop
                )));
            }
        }

        self.pursuit
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Window descriptors of all dictionaries.
    pub fn window_specs(&self) -> Vec<WindowSpec> {
        self.dictionaries.iter().map(DictionaryConfig::window_spec).collect()
    }

    /// Smallest signal length `>= ls` every dictionary accepts.
    pub fn signal_len_for(&self, ls: usize) -> usize {
        let geometry: Vec<(usize, usize)> =
            self.dictionaries.iter().map(|d| (d.hop, d.channels)).collect();
        dgt_length(ls, &geometry)
    }

    /// Validate and build a pursuit for signals of length `signal_len`.
    pub fn build_pursuit(&self, signal_len: usize) -> MpResult<Pursuit> {
        self.validate()?;
        Pursuit::new(&self.window_specs(), signal_len, self.pursuit.clone())
    }

    /// Generate example configuration YAML.
    pub fn example_yaml() -> String {
        let config = Self {
            pursuit: PursuitParams {
                max_atoms: Some(2000),
                ..Default::default()
            },
            dictionaries: vec![
                DictionaryConfig::new(FirWindow::Blackman, 256, 64, 256),
                DictionaryConfig::new(FirWindow::Blackman, 1024, 256, 1024),
            ],
            ..Default::default()
        };

        serde_yaml::to_string(&config).unwrap_or_default()
    }
}
