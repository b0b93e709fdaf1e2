//! Error types for the core library.
//!
//! Every variant renders as free text meant for direct display; there are no
//! structured error codes.

use thiserror::Error;

/// Manual coordinate input that cannot be used for a lookup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("{field} is empty")]
    Blank { field: &'static str },

    #[error("{field} '{text}' is not a number")]
    NotANumber { field: &'static str, text: String },

    #[error("{field} {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("request to weather API failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("weather API returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse weather API response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reverse geocoding failure. Never fatal to a weather fetch.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("geocoder returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to parse geocoder response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission not granted")]
    PermissionDenied,

    #[error("location request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("location unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("field {0} not found")]
    Missing(&'static str),

    #[error("unexpected stat line: {0}")]
    Malformed(String),

    #[error("usage access not granted")]
    UsageAccessDenied,
}

/// Shorten an upstream body so error messages stay readable.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_keeps_short_bodies() {
        assert_eq!(truncate_body("oops"), "oops");
    }

    #[test]
    fn truncate_body_cuts_long_bodies_on_char_boundary() {
        let body = "é".repeat(300);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 203);
    }

    #[test]
    fn coordinate_error_messages_name_the_field() {
        let err = CoordinateError::NotANumber {
            field: "latitude",
            text: "abc".into(),
        };
        assert_eq!(err.to_string(), "latitude 'abc' is not a number");
    }
}
