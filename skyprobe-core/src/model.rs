use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordinateError;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::OutOfRange {
                field: "latitude",
                value: latitude,
            });
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::OutOfRange {
                field: "longitude",
                value: longitude,
            });
        }

        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Parse manually entered text. Values are kept exactly as parsed.
    pub fn parse(latitude: &str, longitude: &str) -> Result<Self, CoordinateError> {
        let lat = parse_component("latitude", latitude)?;
        let lon = parse_component("longitude", longitude)?;
        Self::new(lat, lon)
    }
}

fn parse_component(field: &'static str, text: &str) -> Result<f64, CoordinateError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CoordinateError::Blank { field });
    }

    trimmed
        .parse::<f64>()
        .map_err(|_| CoordinateError::NotANumber {
            field,
            text: trimmed.to_string(),
        })
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// Human-readable place resolved from coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub locality: Option<String>,
    pub country: Option<String>,
}

/// Current conditions at a location, merged with its place name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// Degrees Celsius, as returned upstream.
    pub temperature: f64,
    /// km/h, as returned upstream.
    pub wind_speed: f64,
    /// Degrees.
    pub wind_direction: i32,
    pub locality: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub ram_usage_mb: u64,
    /// Fully qualified names of this app's running background units.
    pub running_services: Vec<String>,
}

/// A process of the current user, as listed by the recent-processes screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentProcess {
    pub pid: u32,
    /// Command name from `/proc/<pid>/stat`.
    pub name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMemory {
    pub total_mb: u64,
    pub available_mb: u64,
}

/// Everything the UI renders. Replaced field by field as triggers run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentationState {
    pub latitude_text: String,
    pub longitude_text: String,
    pub weather: Option<WeatherReading>,
    pub error: Option<String>,
    pub loading: bool,
    pub ram_usage_mb: Option<u64>,
    pub running_services: Option<Vec<String>>,
    pub last_api_endpoint: Option<String>,
    pub acquisition_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_values_verbatim() {
        let c = Coordinates::parse(" 37.7749 ", "-122.4194").unwrap();
        assert_eq!(c.latitude, 37.7749);
        assert_eq!(c.longitude, -122.4194);
    }

    #[test]
    fn parse_blank_is_reported_as_blank() {
        let err = Coordinates::parse("   ", "10").unwrap_err();
        assert_eq!(err, CoordinateError::Blank { field: "latitude" });
    }

    #[test]
    fn parse_rejects_non_numeric_text() {
        let err = Coordinates::parse("12", "east").unwrap_err();
        assert!(matches!(err, CoordinateError::NotANumber { field: "longitude", .. }));
        assert!(err.to_string().contains("east"));
    }

    #[test]
    fn parse_rejects_out_of_range_and_nan() {
        assert!(matches!(
            Coordinates::parse("91", "0"),
            Err(CoordinateError::OutOfRange { field: "latitude", .. })
        ));
        assert!(matches!(
            Coordinates::parse("0", "-180.5"),
            Err(CoordinateError::OutOfRange { field: "longitude", .. })
        ));
        assert!(Coordinates::parse("NaN", "0").is_err());
    }

    #[test]
    fn display_uses_plain_float_formatting() {
        let c = Coordinates::new(37.7749, -122.4194).unwrap();
        assert_eq!(c.to_string(), "37.7749, -122.4194");
    }
}
