use crate::error::BrandscopeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "brandscope";

/// Engine configuration, read from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding ingested responses and metric sets
    pub db_path: PathBuf,
    /// Rows per response read
    pub batch_size: usize,
    /// Extra query parameters stripped during canonicalization
    pub tracking_params: Vec<String>,
    /// user id -> owner brand's primary domain
    pub primary_domains: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: data_dir().join(APP_DIR).join("brandscope.db"),
            batch_size: 500,
            tracking_params: Vec::new(),
            primary_domains: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, BrandscopeError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, BrandscopeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrandscopeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Explicit path if given, else the default config file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, BrandscopeError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), BrandscopeError> {
        if self.batch_size == 0 {
            return Err(BrandscopeError::Validation("batch_size must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn primary_domain(&self, user_id: &str) -> Option<&str> {
        self.primary_domains.get(user_id).map(String::as_str)
    }
}

/// `<config_dir>/brandscope/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(home_or_cwd)
        .join(APP_DIR)
        .join("config.toml")
}

fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(home_or_cwd)
}

fn home_or_cwd() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
