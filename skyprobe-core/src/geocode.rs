//! Reverse geocoding: coordinates to a locality and country name.
//! Uses Nominatim (OpenStreetMap), no API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt::Debug;

use crate::{
    config::DEFAULT_GEOCODER_BASE_URL,
    error::GeocodeError,
    model::{Coordinates, Place},
};

#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    async fn reverse(&self, coordinates: Coordinates) -> Result<Place, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    http: Client,
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new(DEFAULT_GEOCODER_BASE_URL)
    }
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    country: Option<String>,
}

impl From<NominatimAddress> for Place {
    fn from(addr: NominatimAddress) -> Self {
        // Prefer city > town > village > municipality
        let locality = addr.city.or(addr.town).or(addr.village).or(addr.municipality);
        Place {
            locality,
            country: addr.country,
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, coordinates: Coordinates) -> Result<Place, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", coordinates.latitude.to_string()),
                ("lon", coordinates.longitude.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(GeocodeError::Status(res.status()));
        }

        let body = res.text().await?;
        let parsed: NominatimResponse = serde_json::from_str(&body)?;

        let place = parsed.address.map(Place::from).unwrap_or_default();
        tracing::debug!(?place, "reverse geocoded");
        Ok(place)
    }
}
