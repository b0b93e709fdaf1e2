use async_trait::async_trait;
use reqwest::Client;
use std::fmt::Debug;

use crate::{
    config::ApiConfig,
    error::WeatherError,
    model::Coordinates,
    provider::open_meteo::{CurrentWeather, OpenMeteoClient},
};

pub mod open_meteo;

/// Upstream source of current conditions.
#[async_trait]
pub trait WeatherApi: Send + Sync + Debug {
    /// Path and query of the request for `coordinates`, without scheme or host.
    fn endpoint(&self, coordinates: Coordinates) -> String;

    async fn current_weather(
        &self,
        coordinates: Coordinates,
    ) -> Result<CurrentWeather, WeatherError>;
}

/// Shared HTTP client honouring the configured user agent and optional timeout.
pub fn http_client(api: &ApiConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(api.user_agent.clone());
    if let Some(timeout) = api.timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Construct the weather client from config.
pub fn weather_api_from_config(api: &ApiConfig) -> Result<Box<dyn WeatherApi>, reqwest::Error> {
    let http = http_client(api)?;
    Ok(Box::new(OpenMeteoClient::with_client(api.weather_base_url.clone(), http)))
}
