//! Module that contains the record types stored and served by this application.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Identifier the store assigns to a reading on insert.
///
/// Clients only ever see it as an opaque string.
pub struct ReadingId(pub i64);

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ReadingId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
/// Weather data that passed validation, stamped with the instant it was received.
pub struct NormalizedReading
{
    /// Temperature value.
    pub temperature: f64,
    /// Barometric pressure in hPa.
    pub pressure_bar: f64,
    /// Wind speed in mph.
    pub wind_speed_mph: f64,
    /// Illuminance value in lx.
    pub light: f64,
    /// Soil moisture in percent.
    pub soil_moisture: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Wind direction in degrees.
    pub wind_direction: f64,
    /// Precipitation in mm.
    pub precipitation: f64,
    /// Timestamp the reading was received by the server.
    pub time: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
/// A persisted reading together with its store identifier.
pub struct Reading
{
    #[serde(rename = "_id")]
    pub id: ReadingId,
    #[serde(flatten)]
    pub data: NormalizedReading,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reading_serializes_with_string_id_and_utc_time() {
        let reading = Reading {
            id: ReadingId(42),
            data: NormalizedReading {
                temperature: 72.0,
                pressure_bar: 1013.0,
                wind_speed_mph: 5.0,
                light: 500.0,
                soil_moisture: 40.0,
                humidity: 55.0,
                wind_direction: 180.0,
                precipitation: 0.0,
                time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            },
        };

        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["_id"], "42");
        assert_eq!(json["temperature"], 72.0);
        assert_eq!(json["wind_direction"], 180.0);
        assert_eq!(json["time"], "2024-03-01T12:30:00Z");
        assert!(json.get("data").is_none());
    }
}
