//! One-shot location acquisition and the channel that carries its result.
//!
//! The publisher is created by the composition root and handed to both the
//! background unit and whoever listens for fixes.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{fmt::Debug, sync::Arc};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};

use crate::{
    config::{Config, LocationSourceKind},
    error::LocationError,
    model::Coordinates,
    provider::http_client,
    registry::{ServiceGuard, ServiceRegistry},
};

/// Registry name of the background acquisition unit.
pub const ACQUISITION_SERVICE: &str = "skyprobe::location::LocationAcquisition";

const INDICATOR_TITLE: &str = "skyprobe";
const INDICATOR_TEXT: &str = "Fetching location...";

/// Broadcast channel holding at most one pending fix.
#[derive(Debug, Clone)]
pub struct LocationPublisher {
    tx: broadcast::Sender<Coordinates>,
}

impl Default for LocationPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Best-effort, never blocks. Returns `false` when nobody is listening
    /// and the fix was dropped.
    pub fn publish(&self, coordinates: Coordinates) -> bool {
        match self.tx.send(coordinates) {
            Ok(receivers) => {
                tracing::debug!(%coordinates, receivers, "location published");
                true
            }
            Err(_) => {
                tracing::debug!(%coordinates, "no location subscribers, fix dropped");
                false
            }
        }
    }

    pub fn subscribe(&self) -> LocationSubscription {
        LocationSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct LocationSubscription {
    rx: broadcast::Receiver<Coordinates>,
}

impl LocationSubscription {
    /// Next fix. Fixes overwritten while this subscriber was busy are skipped
    /// in favour of the latest. `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<Coordinates> {
        loop {
            match self.rx.recv().await {
                Ok(coordinates) => return Some(coordinates),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "location subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Something that can produce a single location fix.
#[async_trait]
pub trait LocationSource: Send + Sync + Debug {
    fn has_permission(&self) -> bool;

    /// `Ok(None)` means the source answered but had no fix to give.
    async fn current_location(&self) -> Result<Option<Coordinates>, LocationError>;
}

/// Approximate location from the public IP address.
#[derive(Debug, Clone)]
pub struct IpLocationSource {
    url: String,
    http: Client,
    permission_granted: bool,
}

impl IpLocationSource {
    pub fn new(url: impl Into<String>, http: Client, permission_granted: bool) -> Self {
        Self {
            url: url.into(),
            http,
            permission_granted,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpLocatorResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

#[async_trait]
impl LocationSource for IpLocationSource {
    fn has_permission(&self) -> bool {
        self.permission_granted
    }

    async fn current_location(&self) -> Result<Option<Coordinates>, LocationError> {
        let res = self.http.get(&self.url).send().await?;
        if !res.status().is_success() {
            return Err(LocationError::Unavailable(format!(
                "locator returned status {}",
                res.status()
            )));
        }

        let body: IpLocatorResponse = res.json().await?;
        if body.status != "success" {
            tracing::debug!(message = ?body.message, "locator could not resolve this address");
            return Ok(None);
        }

        match (body.lat, body.lon) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon)
                .map(Some)
                .map_err(|e| LocationError::Unavailable(e.to_string())),
            _ => Ok(None),
        }
    }
}

/// Always reports the same coordinates.
#[derive(Debug, Clone)]
pub struct FixedLocationSource {
    coordinates: Coordinates,
    permission_granted: bool,
}

impl FixedLocationSource {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            permission_granted: true,
        }
    }

    pub fn with_permission(mut self, granted: bool) -> Self {
        self.permission_granted = granted;
        self
    }
}

#[async_trait]
impl LocationSource for FixedLocationSource {
    fn has_permission(&self) -> bool {
        self.permission_granted
    }

    async fn current_location(&self) -> Result<Option<Coordinates>, LocationError> {
        Ok(Some(self.coordinates))
    }
}

/// Build the configured location source.
pub fn source_from_config(config: &Config) -> anyhow::Result<Arc<dyn LocationSource>> {
    let location = &config.location;
    let source: Arc<dyn LocationSource> = match location.source {
        LocationSourceKind::Ip => Arc::new(IpLocationSource::new(
            location.ip_locator_url.clone(),
            http_client(&config.api)?,
            location.permission_granted,
        )),
        LocationSourceKind::Fixed => Arc::new(
            FixedLocationSource::new(location.fixed_coordinates()?)
                .with_permission(location.permission_granted),
        ),
    };
    Ok(source)
}

/// User-visible marker shown while a background unit is working.
pub trait ForegroundIndicator: Send + Sync + Debug {
    fn show(&self, title: &str, text: &str);
    fn clear(&self);
}

/// Indicator that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl ForegroundIndicator for LogIndicator {
    fn show(&self, title: &str, text: &str) {
        tracing::info!(title, "{text}");
    }

    fn clear(&self) {
        tracing::debug!("indicator cleared");
    }
}

struct ShownIndicator(Arc<dyn ForegroundIndicator>);

impl ShownIndicator {
    fn show(indicator: Arc<dyn ForegroundIndicator>) -> Self {
        indicator.show(INDICATOR_TITLE, INDICATOR_TEXT);
        Self(indicator)
    }
}

impl Drop for ShownIndicator {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Background unit that acquires one fix and publishes it.
#[derive(Debug, Clone)]
pub struct LocationAcquisition {
    source: Arc<dyn LocationSource>,
    indicator: Arc<dyn ForegroundIndicator>,
    publisher: LocationPublisher,
    registry: ServiceRegistry,
    package: String,
}

impl LocationAcquisition {
    pub fn new(
        source: Arc<dyn LocationSource>,
        indicator: Arc<dyn ForegroundIndicator>,
        publisher: LocationPublisher,
        registry: ServiceRegistry,
        package: impl Into<String>,
    ) -> Self {
        Self {
            source,
            indicator,
            publisher,
            registry,
            package: package.into(),
        }
    }

    pub fn source(&self) -> &Arc<dyn LocationSource> {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.registry.is_running(&self.package, ACQUISITION_SERVICE)
    }

    /// Spawn the unit. It keeps running if the handle is dropped.
    pub fn start(&self) -> AcquisitionHandle {
        tracing::info!("starting location acquisition");
        let guard = self.registry.register(self.package.clone(), ACQUISITION_SERVICE);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        let task = tokio::spawn(acquire_once(
            self.source.clone(),
            self.indicator.clone(),
            self.publisher.clone(),
            Finished {
                _done: done.clone().drop_guard(),
                _service: guard,
            },
            cancel.clone(),
        ));

        AcquisitionHandle { cancel, done, task }
    }
}

/// Dropped when the unit ends: clears the registry entry, then signals
/// `AcquisitionHandle::stopped`.
struct Finished {
    _service: ServiceGuard,
    _done: DropGuard,
}

async fn acquire_once(
    source: Arc<dyn LocationSource>,
    indicator: Arc<dyn ForegroundIndicator>,
    publisher: LocationPublisher,
    _finished: Finished,
    cancel: CancellationToken,
) {
    let _shown = ShownIndicator::show(indicator);

    if !source.has_permission() {
        tracing::info!("Location permission not granted. Stopping service.");
        return;
    }

    let fix = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("location acquisition stopped before a fix arrived");
            return;
        }
        fix = source.current_location() => fix,
    };

    match fix {
        Ok(Some(coordinates)) => {
            tracing::info!(%coordinates, "location retrieved, publishing");
            publisher.publish(coordinates);
        }
        Ok(None) => tracing::info!("could not get location"),
        Err(e) => tracing::error!(error = %e, "failed to get location"),
    }
}

#[derive(Debug)]
pub struct AcquisitionHandle {
    cancel: CancellationToken,
    done: CancellationToken,
    task: JoinHandle<()>,
}

impl AcquisitionHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the unit has ended, however it ended. Unlike
    /// [`finished`](Self::finished) it does not consume the handle.
    pub fn stopped(&self) -> WaitForCancellationFutureOwned {
        self.done.clone().cancelled_owned()
    }

    /// Cancel the unit and wait until it has cleaned up.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.finished().await;
    }

    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "location acquisition task failed");
        }
    }
}
