//! Core library for the `skyprobe` CLI.
//!
//! This crate defines:
//! - Configuration handling
//! - The Open-Meteo weather client and the Nominatim reverse geocoder
//! - One-shot background location acquisition and its broadcast channel
//! - Process and device diagnostics
//! - The observable presentation state the CLI renders
//!
//! It is used by `skyprobe-cli`, but can also be reused by other front ends.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod geocode;
pub mod location;
pub mod model;
pub mod provider;
pub mod registry;
pub mod state;
pub mod status;

pub use config::{Config, LocationSourceKind};
pub use coordinator::WeatherService;
pub use error::{CoordinateError, GeocodeError, LocationError, ProbeError, WeatherError};
pub use geocode::{Geocoder, NominatimGeocoder};
pub use location::{
    ForegroundIndicator, LocationAcquisition, LocationPublisher, LocationSource,
    LocationSubscription, LogIndicator,
};
pub use model::{
    AppStatus, Coordinates, DeviceMemory, Place, PresentationState, RecentProcess, WeatherReading,
};
pub use provider::WeatherApi;
pub use registry::ServiceRegistry;
pub use state::{Confirmation, FetchOutcome, StateHolder, TerminateDecision};
pub use status::{ProcessTable, StatusProber};

/// Everything a front end needs, wired from one config.
#[derive(Debug, Clone)]
pub struct App {
    pub holder: StateHolder,
    pub publisher: LocationPublisher,
    pub registry: ServiceRegistry,
}

impl App {
    /// Composition root: builds the collaborators and injects the shared
    /// publisher and registry into both the background unit and the holder.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = ServiceRegistry::new();
        let publisher = LocationPublisher::new();

        let weather = WeatherService::from_config(&config.api)?;
        let prober = StatusProber::new(registry.clone(), config.package.clone())
            .with_usage_access(config.status.usage_stats_granted);
        let acquisition = LocationAcquisition::new(
            location::source_from_config(config)?,
            std::sync::Arc::new(LogIndicator),
            publisher.clone(),
            registry.clone(),
            config.package.clone(),
        );

        let holder = StateHolder::new(weather, prober, acquisition);
        Ok(Self {
            holder,
            publisher,
            registry,
        })
    }
}
