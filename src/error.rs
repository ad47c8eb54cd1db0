//! Errors that end the daemon.
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("TLS enabled but no TLS parameters specified!")]
    MissingTlsParameters,
    #[error("Could not set up the tls connector: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
    #[error("Could not establish database connection: {0}")]
    Connect(#[source] postgres::Error),
    #[error("Could not create the weather data table: {0}")]
    Schema(#[source] postgres::Error),
    #[error("Could not bind the http server: {0}")]
    Bind(#[source] std::io::Error),
    #[error("Could not install the termination signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl StartupError {
    /// Process exit status for the failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Config(_) => 101,
            StartupError::MissingTlsParameters | StartupError::Tls(_) => 201,
            StartupError::Connect(_) => 202,
            StartupError::Schema(_) => 203,
            StartupError::Bind(_) => 301,
            StartupError::Signal(_) => 302,
        }
    }
}

#[derive(Debug, Error)]
/// Errors that end the daemon, either before or while it serves requests.
pub enum DaemonError {
    #[error("{0}")]
    Startup(#[from] StartupError),
    #[error("Http server stopped with an error: {0}")]
    Server(#[source] std::io::Error),
}

impl DaemonError {
    /// Process exit status for the failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Startup(err) => err.exit_code(),
            DaemonError::Server(_) => 401,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_failure_is_not_a_startup_failure() {
        let err = DaemonError::Server(std::io::Error::new(std::io::ErrorKind::Other, "worker died"));

        assert_eq!(err.exit_code(), 401);
        assert_eq!(err.to_string(), "Http server stopped with an error: worker died");
    }

    #[test]
    fn startup_failures_keep_their_exit_codes() {
        let err = DaemonError::from(StartupError::MissingTlsParameters);

        assert_eq!(err.exit_code(), 201);
        assert_eq!(err.to_string(), "TLS enabled but no TLS parameters specified!");
    }
}
