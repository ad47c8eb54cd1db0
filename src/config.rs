//! Configuration file handling.
use std::fs::File;
use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::DatabaseParameters;

/// Environment variable that overrides the configured HTTP port.
pub const PORT_VARIABLE: &str = "PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot open the configuration file '{path}': {source}")]
    Open { path: String, source: std::io::Error },
    #[error("Cannot read the configuration from file '{path}': {source}")]
    Read { path: String, source: std::io::Error },
    #[error("Cannot deserialize the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value '{0}' for the PORT environment variable")]
    Port(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    pub database_connection_parameters: DatabaseParameters,
    #[serde(default)]
    pub http_server_parameters: HttpParameters,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for the HTTP listener.
pub struct HttpParameters {
    /// The ip address the server should listen on.
    #[serde(default = "default_address")]
    pub address: String,
    /// The port the server should listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads, defaults to the number of cpus.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_address() -> String {
    String::from("0.0.0.0")
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    100 * 1024
}

impl Default for HttpParameters {
    fn default() -> Self {
        HttpParameters {
            address: default_address(),
            port: default_port(),
            workers: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Configuration {
    /// Loads the configuration from a yaml file and applies the `PORT` environment override.
    pub fn load(path: &str) -> Result<Configuration, ConfigError> {
        let mut configuration_file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_string(),
            source,
        })?;

        let mut configuration_string = String::new();
        configuration_file
            .read_to_string(&mut configuration_string)
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;

        let mut configuration = Configuration::from_yaml(configuration_string.as_str())?;
        configuration.apply_port_override(std::env::var(PORT_VARIABLE).ok().as_deref())?;
        Ok(configuration)
    }

    pub fn from_yaml(yaml: &str) -> Result<Configuration, ConfigError> {
        Ok(serde_yaml::from_str::<Configuration>(yaml)?)
    }

    /// Replaces the configured HTTP port with `value`, if one was given.
    pub fn apply_port_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        if let Some(value) = value {
            let port = value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Port(value.to_string()))?;
            log::debug!(target: "weatherd::config", "Using port {} from the environment", port);
            self.http_server_parameters.port = port;
        }
        Ok(())
    }
}
