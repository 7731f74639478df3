//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order,
//! later layers overriding earlier ones:
//!
//! 1. Built-in defaults (`ResilienceConfig::default()`)
//! 2. The base TOML file, e.g. `config/resilience.toml`
//! 3. An optional environment overlay next to it, e.g. `config/resilience.production.toml`
//! 4. Environment variables such as `RESILIENCE_RETRY__MAX_ATTEMPTS=5`

use super::error::{ConfigResult, ConfigurationError};
use super::ResilienceConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Default location of the base configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/resilience.toml";

/// Loaded, validated configuration together with where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: ResilienceConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// Uses `config/resilience.toml` when present, otherwise defaults plus
    /// environment variables.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let path = default_path.exists().then_some(default_path);
        Self::load_layered(path.as_deref(), &environment, ENV_PREFIX)
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_file_with_env(path, &environment)
    }

    /// Load configuration from a specific file with explicit environment.
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_file_with_env<P: AsRef<Path>>(
        path: P,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::file_not_found(path));
        }
        Self::load_layered(Some(path), environment, ENV_PREFIX)
    }

    /// Full layered load with a custom environment variable prefix
    pub fn load_with_prefix(
        path: Option<&Path>,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::file_not_found(path));
            }
        }
        Self::load_layered(path, environment, env_prefix)
    }

    /// Parse configuration from a TOML string on top of the defaults.
    ///
    /// Environment variables are not consulted.
    pub fn from_toml_str(contents: &str) -> ConfigResult<ResilienceConfig> {
        let config = Config::builder()
            .add_source(Self::defaults_source()?)
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .map_err(|e| ConfigurationError::parse_error("inline TOML", e))?;

        let config: ResilienceConfig = config
            .try_deserialize()
            .map_err(|e| ConfigurationError::parse_error("inline TOML", e))?;
        config.validate()?;
        Ok(config)
    }

    fn load_layered(
        path: Option<&Path>,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());

        debug!(
            environment = %environment,
            source = %source_name,
            "Loading resilience configuration"
        );

        let mut builder = Config::builder().add_source(Self::defaults_source()?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));

            let overlay = Self::environment_overlay_path(path, environment);
            if overlay.exists() {
                debug!(overlay = %overlay.display(), "Applying environment overlay");
                builder = builder.add_source(File::from(overlay.as_path()).format(FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ResilienceConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::parse_error(source_name.as_str(), e))?;

        config.validate()?;

        info!(
            environment = %environment,
            source = %source_name,
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            configured_components = config.circuit_breakers.component_configs.len(),
            queue = %config.queue.name,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source_path: path.map(Path::to_path_buf),
        }))
    }

    fn defaults_source() -> ConfigResult<File<config::FileSourceString, FileFormat>> {
        let defaults_json = serde_json::to_string(&ResilienceConfig::default())
            .map_err(|e| ConfigurationError::parse_error("defaults", e))?;
        Ok(File::from_str(&defaults_json, FileFormat::Json))
    }

    /// `config/resilience.toml` + `production` -> `config/resilience.production.toml`
    fn environment_overlay_path(path: &Path, environment: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("resilience");
        path.with_file_name(format!("{stem}.{environment}.toml"))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Base file the configuration was loaded from, if any
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    fn detect_environment() -> String {
        crate::logging::get_environment()
    }
}
