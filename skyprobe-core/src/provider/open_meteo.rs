use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::DEFAULT_WEATHER_BASE_URL,
    error::{WeatherError, truncate_body},
    model::Coordinates,
};

use super::WeatherApi;

/// Client for the Open-Meteo forecast endpoint. No API key required.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    base_url: String,
    http: Client,
}

impl Default for OpenMeteoClient {
    fn default() -> Self {
        Self::new(DEFAULT_WEATHER_BASE_URL)
    }
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }
}

/// `current_weather` block of the forecast response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentWeather {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub interval: Option<i32>,
    pub temperature: f64,
    pub windspeed: f64,
    pub winddirection: i32,
    #[serde(default)]
    pub is_day: Option<i32>,
    #[serde(default)]
    pub weathercode: Option<i32>,
}

/// Forecast response. Only `current_weather` is consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub generationtime_ms: Option<f64>,
    #[serde(default)]
    pub utc_offset_seconds: Option<i32>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub timezone_abbreviation: Option<String>,
    #[serde(default)]
    pub elevation: Option<f64>,
    pub current_weather: CurrentWeather,
}

#[async_trait]
impl WeatherApi for OpenMeteoClient {
    fn endpoint(&self, coordinates: Coordinates) -> String {
        format!(
            "/v1/forecast?latitude={}&longitude={}&current_weather=true",
            coordinates.latitude, coordinates.longitude
        )
    }

    async fn current_weather(
        &self,
        coordinates: Coordinates,
    ) -> Result<CurrentWeather, WeatherError> {
        let url = format!("{}{}", self.base_url, self.endpoint(coordinates));
        tracing::debug!(%url, "requesting current weather");

        let res = self.http.get(&url).send().await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(WeatherError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        let parsed: ForecastResponse = serde_json::from_str(&body)?;

        Ok(parsed.current_weather)
    }
}
