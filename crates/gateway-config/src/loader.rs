//! Configuration loading.
//!
//! Order of precedence, lowest first: built-in defaults, the config file,
//! `GATEWAY_*` environment overrides. `${VAR}` placeholders in provider and
//! auth keys are expanded last, and the result is validated.

use crate::error::{ConfigError, ConfigResult};
use crate::settings::GatewayConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[allow(clippy::expect_used)]
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern"));

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builder for loading a [`GatewayConfig`]
#[derive(Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_overrides: bool,
    env: EnvLookup,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: None,
            env_overrides: true,
            env: Arc::new(|name: &str| std::env::var(name).ok()),
        }
    }
}

impl ConfigLoader {
    /// Loader reading the process environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from this file
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Skip `GATEWAY_*` overrides
    #[must_use]
    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    /// Resolve environment variables through `lookup` instead of the process
    #[must_use]
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Load, override, expand and validate
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, a placeholder
    /// names an unset variable, or validation fails
    pub async fn load(&self) -> ConfigResult<GatewayConfig> {
        let mut config = match &self.file {
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                let config = parse(path, &content)?;
                info!(path = %path.display(), "Configuration file loaded");
                config
            }
            None => {
                debug!("No configuration file, using defaults");
                GatewayConfig::default()
            }
        };

        if self.env_overrides {
            self.apply_env_overrides(&mut config)?;
        }
        self.expand_secrets(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut GatewayConfig) -> ConfigResult<()> {
        let env = &self.env;

        if let Some(host) = env("GATEWAY_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env("GATEWAY_PORT") {
            config.server.port = port.parse().map_err(|e| ConfigError::InvalidEnv {
                var: "GATEWAY_PORT".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Some(url) = env("GATEWAY_DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(level) = env("GATEWAY_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env("GATEWAY_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(())
    }

    fn expand_secrets(&self, config: &mut GatewayConfig) -> ConfigResult<()> {
        for seed in &mut config.providers {
            if let Some(key) = &seed.api_key {
                seed.api_key = Some(SecretString::new(self.expand(key.expose_secret())?));
            }
        }
        for entry in &mut config.auth.keys {
            entry.key = SecretString::new(self.expand(entry.key.expose_secret())?);
        }
        Ok(())
    }

    fn expand(&self, value: &str) -> ConfigResult<String> {
        let mut out = String::with_capacity(value.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(value) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let resolved = (self.env)(name.as_str())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.as_str().to_string()))?;
            out.push_str(&value[last..whole.start()]);
            out.push_str(&resolved);
            last = whole.end();
        }
        out.push_str(&value[last..]);

        Ok(out)
    }
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("file", &self.file)
            .field("env_overrides", &self.env_overrides)
            .finish_non_exhaustive()
    }
}

fn parse(path: &Path, content: &str) -> ConfigResult<GatewayConfig> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "YAML",
            message: e.to_string(),
        }),
        "toml" => toml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        }),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}
