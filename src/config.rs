//! Configuration management for the import resolver
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (landscaper.toml)
//! - Environment variables (LANDSCAPER__*)
//!
//! ## Example config file (landscaper.toml):
//! ```toml
//! [resolution]
//! fail_fast = false
//! allow_file_refs = true
//!
//! [template]
//! timeout_secs = 10
//! sensitive_keys = ["imports", "values", "state"]
//! pretty_input = false
//!
//! [state]
//! path = "./state"
//! blueprints = "./blueprints"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::imports::ConstructorOptions;
use crate::schema::{Blueprint, FileLoader, LoaderConfig, ReferenceLoader};
use crate::template::{GoTemplater, TemplateInputFormatter, Templating};

/// Main configuration for the import resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Import resolution settings
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Template execution settings
    #[serde(default)]
    pub template: TemplateConfig,

    /// State snapshot settings
    #[serde(default)]
    pub state: StateConfig,
}

/// Import resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Return the first failing import instead of all of them
    #[serde(default)]
    pub fail_fast: bool,

    /// Resolve `file://` schema refs from the local filesystem
    #[serde(default)]
    pub allow_file_refs: bool,
}

/// Template configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Maximum execution time of one template
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Top-level input keys redacted from template errors
    #[serde(default = "default_sensitive_keys")]
    pub sensitive_keys: Vec<String>,

    /// Pretty-print template input in errors
    #[serde(default)]
    pub pretty_input: bool,
}

/// State snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding installation state documents
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    /// Directory holding one subdirectory per blueprint
    #[serde(default)]
    pub blueprints: Option<PathBuf>,
}

// Default value functions
fn default_timeout_secs() -> u64 {
    10
}

fn default_sensitive_keys() -> Vec<String> {
    vec!["imports".to_string(), "values".to_string(), "state".to_string()]
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./state")
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            sensitive_keys: default_sensitive_keys(),
            pretty_input: false,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            blueprints: None,
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

impl ResolverConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a required file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["landscaper.toml", ".landscaper.toml", "config/landscaper.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("io", "gardener", "landscaper") {
            let xdg_config = config_dir.config_dir().join("landscaper.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Load from environment variables (LANDSCAPER__RESOLUTION__FAIL_FAST=true)
        builder = builder.add_source(
            Environment::with_prefix("LANDSCAPER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn constructor_options(&self) -> ConstructorOptions {
        ConstructorOptions {
            fail_fast: self.resolution.fail_fast,
        }
    }

    /// Schema loader for a blueprint, with the file fallback if enabled
    pub fn reference_loader(&self, blueprint: &Blueprint) -> ReferenceLoader {
        let mut loader_config = LoaderConfig::from_blueprint(blueprint);
        if self.resolution.allow_file_refs {
            loader_config = loader_config.with_default_loader(FileLoader);
        }
        ReferenceLoader::new(loader_config)
    }

    pub fn template_timeout(&self) -> Duration {
        Duration::from_secs(self.template.timeout_secs)
    }

    /// Template registry with the configured engines, deadline and redaction
    pub fn templating(&self) -> Templating {
        let formatter =
            TemplateInputFormatter::new(self.template.pretty_input, self.template.sensitive_keys.clone());
        Templating::new()
            .with_templater(GoTemplater::new(formatter))
            .with_timeout(self.template_timeout())
    }

    /// Get the state path (resolves relative paths)
    pub fn state_path(&self) -> PathBuf {
        absolute(&self.state.path)
    }

    /// Get the blueprint directory, if configured
    pub fn blueprints_path(&self) -> Option<PathBuf> {
        self.state.blueprints.as_deref().map(absolute)
    }
}
