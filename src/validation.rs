//! Validation of raw weather station payloads.
//!
//! A payload is checked field by field in a fixed order and the first field outside of its
//! physically plausible range rejects the whole reading. Only a payload that passes every check
//! becomes a [`NormalizedReading`].
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::record::NormalizedReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The numeric fields of a weather reading.
pub enum Field {
    Temperature,
    PressureBar,
    WindSpeedMph,
    Light,
    SoilMoisture,
    Humidity,
    WindDirection,
    Precipitation,
}

impl Field {
    /// The key of the field in a submitted payload.
    pub fn key(self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::PressureBar => "pressure_bar",
            Field::WindSpeedMph => "wind_speed_mph",
            Field::Light => "light",
            Field::SoilMoisture => "soil_moisture",
            Field::Humidity => "humidity",
            Field::WindDirection => "wind_direction",
            Field::Precipitation => "precipitation",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Field::Temperature => "Temperature",
            Field::PressureBar => "Pressure",
            Field::WindSpeedMph => "Wind Speed",
            Field::Light => "Light level",
            Field::SoilMoisture => "Soil Moisture",
            Field::Humidity => "Humidity",
            Field::WindDirection => "Wind Direction",
            Field::Precipitation => "Precipitation",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
/// Rejection of a payload, naming the first field that failed its check.
pub struct ValidationError {
    field: Field,
    message: String,
}

impl ValidationError {
    pub fn field(&self) -> Field {
        self.field
    }

    /// Human readable rejection text returned to the client.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A single entry of the ordered check list.
struct FieldRule {
    field: Field,
    min: f64,
    max: Option<f64>,
    /// Whether the offending value is appended to the rejection message.
    echo_value: bool,
}

impl FieldRule {
    const fn new(field: Field, min: f64, max: Option<f64>, echo_value: bool) -> FieldRule {
        FieldRule { field, min, max, echo_value }
    }

    fn check(&self, raw: &Value) -> Result<f64, ValidationError> {
        let value = raw.get(self.field.key());

        match value.and_then(Value::as_f64) {
            Some(number) if number.is_finite()
                && number >= self.min
                && self.max.map_or(true, |max| number <= max) => Ok(number),
            _ => Err(self.reject(value)),
        }
    }

    fn reject(&self, value: Option<&Value>) -> ValidationError {
        let mut message = format!("{} is out of expected range", self.field.label());
        if self.echo_value {
            message.push(' ');
            message.push_str(&render_value(value));
        }

        ValidationError { field: self.field, message }
    }
}

/// Checks in evaluation order. The first failing rule decides the rejection.
static RULES: [FieldRule; 8] = [
    FieldRule::new(Field::Temperature, -50.0, Some(150.0), false),
    FieldRule::new(Field::PressureBar, 800.0, Some(1100.0), true),
    FieldRule::new(Field::WindSpeedMph, 0.0, Some(150.0), true),
    FieldRule::new(Field::Light, 0.0, Some(100_000.0), false),
    FieldRule::new(Field::SoilMoisture, 0.0, Some(100.0), false),
    FieldRule::new(Field::Humidity, 0.0, Some(100.0), false),
    FieldRule::new(Field::WindDirection, 0.0, Some(360.0), false),
    FieldRule::new(Field::Precipitation, 0.0, None, false),
];

/// Validates a raw payload and stamps it with the current instant.
pub fn validate(raw: &Value) -> Result<NormalizedReading, ValidationError> {
    validate_at(raw, Utc::now())
}

/// Validates a raw payload and stamps it with `received_at`.
///
/// # Arguments
///
/// * `raw` - The payload as submitted by the station. Anything but a JSON object is treated as
///     a payload with all fields missing.
///
/// * `received_at` - The instant the payload was received. Any `time` key in the payload is
///     ignored.
///
/// # Returns
///
/// * `Ok(NormalizedReading)` - If every field is a finite number inside of its bounds.
///
/// * `Err(ValidationError)` - For the first field that is missing, not a number or out of range.
///     The remaining fields are not checked.
///
pub fn validate_at(raw: &Value, received_at: DateTime<Utc>) -> Result<NormalizedReading, ValidationError> {
    let mut values = [0.0_f64; 8];
    for (slot, rule) in values.iter_mut().zip(RULES.iter()) {
        *slot = rule.check(raw)?;
    }

    let [temperature, pressure_bar, wind_speed_mph, light, soil_moisture, humidity, wind_direction, precipitation] = values;

    Ok(NormalizedReading {
        temperature,
        pressure_bar,
        wind_speed_mph,
        light,
        soil_moisture,
        humidity,
        wind_direction,
        precipitation,
        time: received_at,
    })
}

/// Renders an offending value the way stations have always seen it in rejection messages.
fn render_value(value: Option<&Value>) -> String {
    match value {
        None => String::from("undefined"),
        Some(value) => render_present(value),
    }
}

fn render_present(value: &Value) -> String {
    match value {
        Value::Null => String::from("null"),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => match number.as_f64() {
            Some(float) => render_number(float),
            None => number.to_string(),
        },
        Value::String(text) => text.clone(),
        // Array elements are joined with commas and null elements render empty.
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => render_present(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => String::from("[object Object]"),
    }
}

/// Shortest round-trip form, switching to exponent notation outside of `[1e-6, 1e21)`.
fn render_number(float: f64) -> String {
    if float == 0.0 {
        return String::from("0");
    }

    let magnitude = float.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let exponential = format!("{:e}", float);
        match exponential.find('e') {
            Some(index) if !exponential[index + 1..].starts_with('-') => {
                format!("{}e+{}", &exponential[..index], &exponential[index + 1..])
            }
            _ => exponential,
        }
    } else {
        float.to_string()
    }
}
