extern crate postgres;
extern crate chrono;
extern crate serde_json;
extern crate log;
extern crate log4rs;
extern crate ctrlc;
extern crate clap;

use std::process::exit;
use std::sync::Arc;

use clap::App;

mod config;
mod database;
mod error;
mod record;
mod validation;
mod web;

use crate::config::{Configuration, HttpParameters};
use crate::database::PostgresStore;
use crate::error::{DaemonError, StartupError};

const DEFAULT_CONFIG_PATH: &str = "resources/weatherd.yml";
const DEFAULT_LOG_CONFIG_PATH: &str = "resources/log.yml";

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();

    let log_config_path = matches.value_of("log-config").unwrap_or(DEFAULT_LOG_CONFIG_PATH);
    match log4rs::init_file(log_config_path, Default::default()) {
        Ok(_) => {},
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration: {}", err);
            exit(100);
        }
    };

    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    match run(config_path) {
        Ok(_) => {
            log::info!(target: "weatherd", "Exiting");
            exit(0);
        },
        Err(err) => {
            log::error!(target: "weatherd", "{}", err);
            exit(err.exit_code());
        }
    }
}

/// Connects the store, serves requests until a termination signal arrives and closes the store.
fn run(config_path: &str) -> Result<(), DaemonError> {
    let configuration = Configuration::load(config_path).map_err(StartupError::from)?;
    log::debug!(target: "weatherd", "Loaded configuration from \'{}\'", config_path);

    let store = Arc::new(PostgresStore::connect(&configuration.database_connection_parameters)?);

    actix_web::rt::System::new().block_on(serve(Arc::clone(&store), configuration.http_server_parameters))?;

    log::info!(target: "weatherd", "Closing database connection...");
    match Arc::try_unwrap(store) {
        Ok(store) => {
            if let Err(err) = store.close() {
                log::error!(target: "weatherd::db", "Could not close the database connection: \'{}\'", err);
            }
        },
        Err(_) => log::warn!(target: "weatherd::db", "Database connection still in use, dropping it!"),
    };

    Ok(())
}

/// Runs the http server until it is stopped by a termination signal.
async fn serve(store: Arc<PostgresStore>, http_parameters: HttpParameters) -> Result<(), DaemonError> {
    let server = web::bind_server(store, &http_parameters)?;
    let server_handle = server.handle();

    ctrlc::set_handler(move || {
        log::info!(target: "weatherd", "Termination signal received!");
        actix_web::rt::System::new().block_on(server_handle.stop(true));
    }).map_err(StartupError::from)?;

    server.await.map_err(DaemonError::Server)
}
