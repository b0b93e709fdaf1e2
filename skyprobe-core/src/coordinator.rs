use std::sync::Arc;

use crate::{
    config::ApiConfig,
    error::WeatherError,
    geocode::{Geocoder, NominatimGeocoder},
    model::{Coordinates, Place, WeatherReading},
    provider::{WeatherApi, http_client, weather_api_from_config},
};

/// Fetches current conditions and the place name for a pair of coordinates.
#[derive(Debug, Clone)]
pub struct WeatherService {
    api: Arc<dyn WeatherApi>,
    geocoder: Arc<dyn Geocoder>,
}

impl WeatherService {
    pub fn new(api: Arc<dyn WeatherApi>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { api, geocoder }
    }

    pub fn from_config(api: &ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            Arc::from(weather_api_from_config(api)?),
            Arc::new(NominatimGeocoder::with_client(
                api.geocoder_base_url.clone(),
                http_client(api)?,
            )),
        ))
    }

    /// Endpoint that `fetch_weather` calls, for diagnostics display.
    pub fn endpoint(&self, coordinates: Coordinates) -> String {
        self.api.endpoint(coordinates)
    }

    /// Weather numbers are passed through unmodified. A failed place lookup
    /// leaves `locality` and `country` empty and never fails the fetch.
    pub async fn fetch_weather(
        &self,
        coordinates: Coordinates,
    ) -> Result<WeatherReading, WeatherError> {
        let current = self.api.current_weather(coordinates).await?;

        let place = match self.geocoder.reverse(coordinates).await {
            Ok(place) => place,
            Err(e) => {
                tracing::debug!(error = %e, %coordinates, "place lookup failed, continuing");
                Place::default()
            }
        };

        Ok(WeatherReading {
            temperature: current.temperature,
            wind_speed: current.windspeed,
            wind_direction: current.winddirection,
            locality: place.locality,
            country: place.country,
        })
    }
}
