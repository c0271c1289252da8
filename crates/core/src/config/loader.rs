//! Configuration file loading

use super::schema::ConfigSchema;
use crate::error::{Error, Result, ResultExt};
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV_VAR: &str = "STOREFRONT_SEARCH_CONFIG";

/// Configuration wrapper
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed and validated settings
    pub schema: ConfigSchema,
    /// File the settings came from, if any
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an explicit path, the environment, a standard
    /// location, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::config_not_found(p));
            }
            return Self::load_from(p);
        }

        if let Some(p) = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from) {
            if !p.exists() {
                return Err(Error::config_not_found(&p)
                    .with_context(format!("named by {CONFIG_ENV_VAR}")));
            }
            return Self::load_from(&p);
        }

        match find_config_file() {
            Some(p) => Self::load_from(&p),
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(Error::from)
            .context(format!("reading {}", path.display()))?;
        let schema = Self::parse(&content).context(format!("loading {}", path.display()))?;
        Ok(Self {
            schema,
            path: Some(path.to_path_buf()),
        })
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<ConfigSchema> {
        let schema: ConfigSchema = toml::from_str(content)?;
        schema.validate()?;
        Ok(schema)
    }
}

/// Find configuration file in standard locations
fn find_config_file() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("storefront-search.toml"),
        PathBuf::from(".storefront-search.toml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("storefront-search").join("config.toml"));
    }

    candidates.into_iter().find(|candidate| candidate.exists())
}
