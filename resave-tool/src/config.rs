use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use resave_core::LoadOptions;
use resave_nls::Encoding;
use serde::{Deserialize, Serialize};

/// Logger configuration. `app_level_filter` applies to the resave crates,
/// `level_filter` to everything else.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub app_level_filter: LevelFilter,
    pub level_filter: LevelFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { app_level_filter: LevelFilter::Info, level_filter: LevelFilter::Warn }
    }
}

impl LoggerConfig {
    /// Install `env_logger` with these filters. `RUST_LOG` still overrides them.
    pub fn init(&self) {
        env_logger::Builder::new()
            .filter_level(self.level_filter)
            .filter_module("resave_core", self.app_level_filter)
            .filter_module("resave", self.app_level_filter)
            .parse_default_env()
            .init();
    }
}

/// Contents of `resave.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub logger: LoggerConfig,
    pub load: LoadOptions,
}

impl ToolConfig {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// `path` if given, else `resave.toml` in the working directory if it
    /// exists, else the defaults.
    pub fn read_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let local = Path::new("resave.toml");
                if local.exists() {
                    Self::read(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Applies command-line overrides on top of a [`ToolConfig`].
pub struct ToolConfigBuilder {
    config: ToolConfig,
}

impl ToolConfigBuilder {
    pub fn from_config(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.config.load.encoding = encoding;
        self
    }

    pub fn with_decode_papyrus(mut self, decode: bool) -> Self {
        self.config.load.decode_papyrus = decode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.config.logger.app_level_filter = LevelFilter::Debug;
        }
        self
    }

    /// Retrieves the configuration built
    pub fn get(self) -> ToolConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ToolConfig = toml::from_str(
            r#"
            [logger]
            app_level_filter = "TRACE"
            level_filter = "ERROR"

            [load]
            encoding = "windows1251"
            "#,
        )
        .unwrap();
        assert_eq!(config.logger.app_level_filter, LevelFilter::Trace);
        assert_eq!(config.load.encoding, Encoding::Windows1251);
        assert!(config.load.decode_papyrus);
        assert_eq!(config.load.parallel_threshold, LoadOptions::default().parallel_threshold);
    }

    #[test]
    fn builder_overrides() {
        let config = ToolConfigBuilder::from_config(ToolConfig::default())
            .with_encoding(Encoding::Utf8)
            .with_decode_papyrus(false)
            .with_verbose(true)
            .get();
        assert_eq!(config.load.encoding, Encoding::Utf8);
        assert!(!config.load.decode_papyrus);
        assert_eq!(config.logger.app_level_filter, LevelFilter::Debug);
    }
}
