//! Declarative configuration loading, grounded on the pattern used by the authenticator
//! service (`serde_json::from_reader(fs::File::open(path))`) generalized to also accept TOML,
//! since `flux::logging` already pulls in `serdeconv` for that format.

use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(serdeconv::Error),
    Json(serdeconv::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "error reading config file: {}", err),
            ConfigError::Toml(err) => write!(f, "error parsing toml config: {}", err),
            ConfigError::Json(err) => write!(f, "error parsing json config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

/// Loads and deserializes a TOML configuration file.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path)?;
    serdeconv::from_toml_str(&contents).map_err(ConfigError::Toml)
}

/// Loads and deserializes a JSON configuration file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path)?;
    serdeconv::from_json_str(&contents).map_err(ConfigError::Json)
}
