//! Module for connecting to a postgres database, storing validated weather readings in it and
//! reading them back.
use std::sync::{Mutex, MutexGuard};

use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres::{Client, Row};
use postgres_openssl::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StartupError;
use crate::record::{NormalizedReading, Reading, ReadingId};

static SQL_CREATE_WEATHER_DATA: &'static str = include_str!("sql/create_weather_data.sql");

static SQL_INSERT_READING: &'static str = include_str!("sql/insert_reading.sql");
static SQL_SELECT_READINGS: &'static str = include_str!("sql/select_readings.sql");

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for a database connection.
///
/// This includes SSL/TLS encryption.
pub struct DatabaseParameters
{
    /// The hostname of the database server.
    pub hostname: String,
    /// The port for the database server.
    pub port: u32,
    /// The username to connect as.
    pub username: String,
    /// The password to connect with.
    pub password: String,
    /// The database to open on the server.
    pub database: String,
    /// Complete connection string, used instead of the fields above when set.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Flag to enable tls for the database server connection.
    pub tls_enable: bool,
    /// Parameters for the tls connection to the database server.
    pub tls_params: Option<DatabaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct for the parameters required for a tls connection to the database.
pub struct DatabaseTlsParameters {
    /// The path to the server certificate for TLS encryption.
    pub server_ca_path: String,
    /// The path to the client certificate for TLS encryption.
    pub client_cert_path: String,
    /// The path to the client key for TLS encryption.
    pub client_key_path: String,
}

impl DatabaseParameters {
    /// Builds the key/value connection string for the postgres client.
    pub fn connection_string(&self) -> String {
        if let Some(connection_string) = &self.connection_string {
            return connection_string.clone();
        }

        format!("user={} password={} host={} port={} dbname={} application_name=weatherd",
                quote(&self.username),
                quote(&self.password),
                quote(&self.hostname),
                self.port,
                quote(&self.database))
    }
}

/// Quotes a connection string value so spaces and quotes survive parsing.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[derive(Debug, Error)]
/// Failure of a single store operation.
pub enum PersistenceError {
    #[error("Database connection unavailable: {0}")]
    Unavailable(String),
    #[error("Could not insert weather data: {0}")]
    Insert(#[source] postgres::Error),
    #[error("Could not fetch weather data: {0}")]
    Query(#[source] postgres::Error),
    #[error("Malformed weather data row: {0}")]
    Row(#[source] postgres::Error),
}

/// Gateway for all reads and writes of weather readings.
///
/// Implementations are shared by every request worker and must be usable concurrently.
pub trait ReadingStore: Send + Sync {
    /// Persists a reading as a new record and returns the identifier the store assigned.
    fn insert_reading(&self, reading: &NormalizedReading) -> Result<ReadingId, PersistenceError>;

    /// Returns every stored reading, most recent first.
    ///
    /// An empty store yields an empty vector.
    fn list_readings_descending(&self) -> Result<Vec<Reading>, PersistenceError>;
}

/// Reading store backed by a single long lived postgres connection.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Establishes the database connection and makes sure the weather data table exists.
    ///
    /// # Arguments
    ///
    /// * `connection_parameters` - Parameters for the database connection.
    ///
    /// # Errors
    ///
    /// Errors occur when one of the following conditions is met:
    ///
    /// * TLS is enabled but the files for the TLS connection are missing or unusable.
    ///
    /// * The connection cannot be established or the user is not authorized for the database.
    ///
    /// * The weather data table cannot be created.
    ///
    pub fn connect(connection_parameters: &DatabaseParameters) -> Result<PostgresStore, StartupError> {
        let postgres_connection_string = connection_parameters.connection_string();

        let mut database_connection = match connection_parameters.tls_enable {
            true => {
                let tls_connector = make_tls_connector(connection_parameters)?;
                Client::connect(postgres_connection_string.as_str(), tls_connector)
            },
            false => Client::connect(postgres_connection_string.as_str(), postgres::NoTls),
        }.map_err(StartupError::Connect)?;

        log::info!(target: "weatherd::db", "Database connection established!");

        database_connection
            .batch_execute(SQL_CREATE_WEATHER_DATA)
            .map_err(StartupError::Schema)?;

        Ok(PostgresStore { client: Mutex::new(database_connection) })
    }

    /// Locks the shared connection for a single operation.
    fn connection(&self) -> Result<MutexGuard<'_, Client>, PersistenceError> {
        let client = lock_recovering(&self.client);
        if client.is_closed() {
            return Err(PersistenceError::Unavailable(String::from("connection closed")));
        }
        Ok(client)
    }

    /// Closes the database connection.
    pub fn close(self) -> Result<(), postgres::Error> {
        let client = self.client
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        client.close()?;
        log::info!(target: "weatherd::db", "Database connection closed!");
        Ok(())
    }
}

impl ReadingStore for PostgresStore {
    fn insert_reading(&self, reading: &NormalizedReading) -> Result<ReadingId, PersistenceError> {
        let mut client = self.connection()?;

        let row = client.query_one(SQL_INSERT_READING,
                                   &[&reading.time,
                                     &reading.temperature,
                                     &reading.pressure_bar,
                                     &reading.wind_speed_mph,
                                     &reading.light,
                                     &reading.soil_moisture,
                                     &reading.humidity,
                                     &reading.wind_direction,
                                     &reading.precipitation])
            .map_err(PersistenceError::Insert)?;

        let id = ReadingId(row.try_get("id").map_err(PersistenceError::Row)?);
        log::info!(target: "weatherd::db", "Inserted new weather data: \'{}\'", id);
        Ok(id)
    }

    fn list_readings_descending(&self) -> Result<Vec<Reading>, PersistenceError> {
        let mut client = self.connection()?;

        let rows = client.query(SQL_SELECT_READINGS, &[]).map_err(PersistenceError::Query)?;
        log::debug!(target: "weatherd::db", "Fetched \'{}\' weather data rows", rows.len());

        rows.iter().map(reading_from_row).collect()
    }
}

/// Locks `mutex`, taking over the guard if a previous holder panicked.
///
/// A panic while holding the connection leaves the client usable, so later requests keep
/// working instead of failing until a restart.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!(target: "weatherd::db", "Recovering database connection lock after a panic");
        poisoned.into_inner()
    })
}

fn reading_from_row(row: &Row) -> Result<Reading, PersistenceError> {
    let column = |name: &str| row.try_get::<_, f64>(name).map_err(PersistenceError::Row);

    Ok(Reading {
        id: ReadingId(row.try_get("id").map_err(PersistenceError::Row)?),
        data: NormalizedReading {
            temperature: column("temperature")?,
            pressure_bar: column("pressure_bar")?,
            wind_speed_mph: column("wind_speed_mph")?,
            light: column("light")?,
            soil_moisture: column("soil_moisture")?,
            humidity: column("humidity")?,
            wind_direction: column("wind_direction")?,
            precipitation: column("precipitation")?,
            time: row.try_get("time").map_err(PersistenceError::Row)?,
        },
    })
}

/// Builds the openssl connector from the tls parameters of the connection.
fn make_tls_connector(connection_parameters: &DatabaseParameters) -> Result<MakeTlsConnector, StartupError> {
    let tls_params = match &connection_parameters.tls_params {
        Some(tls_params) => tls_params,
        None => return Err(StartupError::MissingTlsParameters),
    };

    let mut ssl_connection_builder = SslConnector::builder(SslMethod::tls())?;

    ssl_connection_builder.set_verify(SslVerifyMode::NONE);
    ssl_connection_builder.set_ca_file(&tls_params.server_ca_path)?;
    ssl_connection_builder.set_certificate_file(&tls_params.client_cert_path, SslFiletype::PEM)?;
    ssl_connection_builder.set_private_key_file(&tls_params.client_key_path, SslFiletype::PEM)?;

    Ok(MakeTlsConnector::new(ssl_connection_builder.build()))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn parameters() -> DatabaseParameters {
        DatabaseParameters {
            hostname: String::from("db.example.org"),
            port: 5432,
            username: String::from("weather"),
            password: String::from("dry weather"),
            database: String::from("weatherDB"),
            connection_string: None,
            tls_enable: false,
            tls_params: None,
        }
    }

    #[test]
    fn connection_string_from_fields() {
        assert_eq!(
            parameters().connection_string(),
            "user='weather' password='dry weather' host='db.example.org' port=5432 dbname='weatherDB' application_name=weatherd"
        );
    }

    #[test]
    fn connection_string_escapes_quotes() {
        let mut params = parameters();
        params.password = String::from("it's\\here");

        assert!(params.connection_string().contains("password='it\\'s\\\\here'"));
    }

    #[test]
    fn explicit_connection_string_wins() {
        let mut params = parameters();
        params.connection_string = Some(String::from("postgresql://weather@localhost/weatherDB"));

        assert_eq!(params.connection_string(), "postgresql://weather@localhost/weatherDB");
    }

    #[test]
    fn tls_without_parameters_is_rejected() {
        let mut params = parameters();
        params.tls_enable = true;

        assert!(matches!(make_tls_connector(&params), Err(StartupError::MissingTlsParameters)));
        assert!(matches!(PostgresStore::connect(&params), Err(StartupError::MissingTlsParameters)));
    }

    #[test]
    fn tls_with_missing_files_is_rejected() {
        let mut params = parameters();
        params.tls_enable = true;
        params.tls_params = Some(DatabaseTlsParameters {
            server_ca_path: String::from("/nonexistent/ca.pem"),
            client_cert_path: String::from("/nonexistent/client.pem"),
            client_key_path: String::from("/nonexistent/client.key"),
        });

        assert!(matches!(make_tls_connector(&params), Err(StartupError::Tls(_))));
    }

    #[test]
    fn memory_store_lists_most_recent_first() {
        use chrono::{TimeZone, Utc};
        use memory::MemoryStore;

        let store = MemoryStore::default();
        assert!(store.list_readings_descending().unwrap().is_empty());

        let sample = |hour| NormalizedReading {
            temperature: 20.0,
            pressure_bar: 1000.0,
            wind_speed_mph: 1.0,
            light: 10.0,
            soil_moisture: 10.0,
            humidity: 10.0,
            wind_direction: 10.0,
            precipitation: 0.0,
            time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        };
        for hour in &[1, 3, 2] {
            store.insert_reading(&sample(*hour)).unwrap();
        }

        let hours: Vec<_> = store
            .list_readings_descending()
            .unwrap()
            .iter()
            .map(|reading| reading.data.time)
            .collect();
        assert_eq!(hours, vec![sample(3).time, sample(2).time, sample(1).time]);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        use std::sync::Arc;

        let shared = Arc::new(Mutex::new(vec![1]));
        let poisoner = Arc::clone(&shared);
        let result = std::thread::spawn(move || {
            let mut guard = poisoner.lock().unwrap();
            guard.push(2);
            panic!("worker failed while holding the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.is_poisoned());

        lock_recovering(&shared).push(3);
        assert_eq!(*lock_recovering(&shared), vec![1, 2, 3]);
    }

    /// Runs against a live database named by `WEATHERD_TEST_DATABASE_URL`.
    ///
    /// The `weather_data` table of that database is truncated.
    #[test]
    #[ignore]
    fn postgres_store_round_trip() {
        use chrono::{TimeZone, Utc};

        let connection_string = match std::env::var("WEATHERD_TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return,
        };
        let mut params = parameters();
        params.connection_string = Some(connection_string);

        let store = PostgresStore::connect(&params).unwrap();
        store.connection().unwrap().batch_execute("TRUNCATE weather_data RESTART IDENTITY").unwrap();

        assert_eq!(store.list_readings_descending().unwrap(), vec![]);

        let sample = |minute: u32, offset: f64| NormalizedReading {
            temperature: -12.5 + offset,
            pressure_bar: 1013.25 + offset,
            wind_speed_mph: 4.5 + offset,
            light: 52_000.0 + offset,
            soil_moisture: 33.3 + offset,
            humidity: 61.0 + offset,
            wind_direction: 270.0 + offset,
            precipitation: 1.2 + offset,
            time: Utc.with_ymd_and_hms(2024, 5, 1, 6, minute, 30).unwrap(),
        };
        let first = sample(1, 0.0);
        let second = sample(2, 1.0);
        let third = sample(3, 2.0);

        let second_id = store.insert_reading(&second).unwrap();
        let third_id = store.insert_reading(&third).unwrap();
        let first_id = store.insert_reading(&first).unwrap();
        assert_ne!(first_id, second_id);
        assert_ne!(second_id, third_id);

        let readings = store.list_readings_descending().unwrap();
        assert_eq!(
            readings,
            vec![
                Reading { id: third_id, data: third },
                Reading { id: second_id, data: second },
                Reading { id: first_id, data: first },
            ]
        );

        store.close().unwrap();
    }
}
