//! Observable presentation state and the triggers the UI binds to.
//!
//! Each trigger updates one or more fields of [`PresentationState`]; every
//! field update is a single `send_modify`, so readers may briefly see a new
//! reading next to a stale loading flag. Fetches carry a ticket from a
//! monotonic counter and a completion older than the newest applied one is
//! discarded, so the most recently issued fetch wins.

use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::{
    coordinator::WeatherService,
    error::{CoordinateError, ProbeError},
    location::{AcquisitionHandle, LocationAcquisition, LocationSubscription},
    model::{Coordinates, DeviceMemory, PresentationState, RecentProcess, WeatherReading},
    status::StatusProber,
};

/// Outcome of one fetch as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Updated(WeatherReading),
    Failed(String),
    /// A newer fetch had already been applied; nothing was written.
    Superseded,
}

/// Answer to the "free memory" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateDecision {
    /// The caller should end the process now.
    Exit,
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    state: watch::Sender<PresentationState>,
    weather: WeatherService,
    prober: StatusProber,
    acquisition: LocationAcquisition,
    handle: Mutex<Option<AcquisitionHandle>>,
    next_ticket: AtomicU64,
    applied_ticket: AtomicU64,
    in_flight: AtomicUsize,
}

/// Owns [`PresentationState`]. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct StateHolder {
    shared: Arc<Shared>,
}

/// Holds `loading` up while alive. Dropping it is the last write of every
/// fetch, including one that was cancelled mid-flight.
struct LoadingGuard<'a> {
    shared: &'a Shared,
}

impl<'a> LoadingGuard<'a> {
    fn begin(shared: &'a Shared) -> Self {
        shared.state.send_modify(|s| {
            shared.in_flight.fetch_add(1, Ordering::SeqCst);
            s.loading = true;
        });
        Self { shared }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let shared = self.shared;
        shared.state.send_modify(|s| {
            let remaining = shared.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            if remaining == 0 {
                s.last_api_endpoint = None;
            }
            s.loading = remaining > 0;
        });
    }
}

impl StateHolder {
    pub fn new(
        weather: WeatherService,
        prober: StatusProber,
        acquisition: LocationAcquisition,
    ) -> Self {
        let (state, _) = watch::channel(PresentationState::default());
        Self {
            shared: Arc::new(Shared {
                state,
                weather,
                prober,
                acquisition,
                handle: Mutex::new(None),
                next_ticket: AtomicU64::new(1),
                applied_ticket: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PresentationState> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> PresentationState {
        self.shared.state.borrow().clone()
    }

    pub fn set_latitude_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.shared.state.send_modify(|s| s.latitude_text = text);
    }

    pub fn set_longitude_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.shared.state.send_modify(|s| s.longitude_text = text);
    }

    /// Fetch for the entered text. Blank input leaves state alone; other
    /// validation failures are shown as the error.
    pub async fn fetch_from_input(&self) -> Result<FetchOutcome, CoordinateError> {
        let (lat, lon) = {
            let state = self.shared.state.borrow();
            (state.latitude_text.clone(), state.longitude_text.clone())
        };

        match Coordinates::parse(&lat, &lon) {
            Ok(coordinates) => Ok(self.fetch(coordinates).await),
            Err(e @ CoordinateError::Blank { .. }) => Err(e),
            Err(e) => {
                let message = format!("Invalid coordinates: {e}");
                self.shared.state.send_modify(|s| s.error = Some(message));
                Err(e)
            }
        }
    }

    /// Fetch weather for `coordinates` and publish the result.
    ///
    /// On success the reading replaces the previous one and the error is
    /// cleared. On failure the error is set and the previous reading stays.
    pub async fn fetch(&self, coordinates: Coordinates) -> FetchOutcome {
        let shared = &*self.shared;
        let ticket = shared.next_ticket.fetch_add(1, Ordering::SeqCst);
        let endpoint = shared.weather.endpoint(coordinates);
        shared.state.send_modify(|s| s.last_api_endpoint = Some(endpoint));

        let _loading = LoadingGuard::begin(shared);
        let result = shared.weather.fetch_weather(coordinates).await;

        let mut outcome = FetchOutcome::Superseded;
        shared.state.send_modify(|s| {
            let newest = shared.applied_ticket.fetch_max(ticket, Ordering::SeqCst);
            if newest > ticket {
                tracing::debug!(ticket, newest, "discarding stale weather result");
                return;
            }
            outcome = match result {
                Ok(reading) => {
                    s.weather = Some(reading.clone());
                    s.error = None;
                    FetchOutcome::Updated(reading)
                }
                Err(e) => {
                    tracing::warn!(error = %e, %coordinates, "weather fetch failed");
                    let message = format!("Error fetching weather: {e}");
                    s.error = Some(message.clone());
                    FetchOutcome::Failed(message)
                }
            };
        });

        self.refresh_status();
        outcome
    }

    /// Request one fix directly and fetch for it. Unlike the background unit
    /// this path reports every failure to the user.
    pub async fn locate_now(&self) -> Option<FetchOutcome> {
        let source = self.shared.acquisition.source().clone();
        if !source.has_permission() {
            self.set_error("Location permission not granted. Please enter coordinates manually.");
            return None;
        }

        let fix = {
            let _loading = LoadingGuard::begin(&self.shared);
            source.current_location().await
        };

        match fix {
            Ok(Some(coordinates)) => Some(self.fetch_for_fix(coordinates).await),
            Ok(None) => {
                self.set_error(
                    "Could not get current location. Please check GPS and enter manually.",
                );
                None
            }
            Err(e) => {
                self.set_error(format!("Failed to get location: {e}. Please enter manually."));
                None
            }
        }
    }

    async fn fetch_for_fix(&self, coordinates: Coordinates) -> FetchOutcome {
        self.shared.state.send_modify(|s| {
            s.latitude_text = coordinates.latitude.to_string();
            s.longitude_text = coordinates.longitude.to_string();
        });
        self.fetch(coordinates).await
    }

    fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.shared.state.send_modify(|s| s.error = Some(message));
    }

    /// Start the background unit unless one is already running.
    pub fn start_acquisition(&self) {
        {
            let mut handle = self.shared.handle.lock();
            if handle.as_ref().is_some_and(|h| !h.is_finished()) {
                tracing::debug!("location acquisition already running");
            } else {
                *handle = Some(self.shared.acquisition.start());
            }
        }
        self.refresh_status();
    }

    /// Resolves when the most recently started background unit has ended.
    /// `None` if none was started.
    pub fn acquisition_stopped(&self) -> Option<WaitForCancellationFutureOwned> {
        self.shared.handle.lock().as_ref().map(AcquisitionHandle::stopped)
    }

    /// Stop the background unit if it is still working.
    pub async fn stop_acquisition(&self) {
        let handle = self.shared.handle.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.refresh_status();
    }

    pub fn refresh_status(&self) {
        let status = self.shared.prober.probe();
        let running = self.shared.acquisition.is_running();
        self.shared.state.send_modify(|s| {
            s.ram_usage_mb = Some(status.ram_usage_mb);
            s.running_services = Some(status.running_services);
            s.acquisition_running = running;
        });
    }

    pub fn device_memory(&self) -> Result<DeviceMemory, ProbeError> {
        self.shared.prober.device_memory()
    }

    pub fn recent_processes(&self) -> Result<Vec<RecentProcess>, ProbeError> {
        self.shared.prober.recent_processes()
    }

    /// "Free memory": only an explicit confirmation lets the process end.
    pub fn terminate(&self, confirmation: Confirmation) -> TerminateDecision {
        match confirmation {
            Confirmation::Confirmed => {
                tracing::warn!("terminating process on user request");
                TerminateDecision::Exit
            }
            Confirmation::Declined => TerminateDecision::Cancelled,
        }
    }

    /// Fetch once for every fix the background unit publishes.
    pub fn spawn_location_listener(
        &self,
        mut subscription: LocationSubscription,
    ) -> JoinHandle<()> {
        let holder = self.clone();
        tokio::spawn(async move {
            while let Some(coordinates) = subscription.next().await {
                tracing::info!(%coordinates, "location received from background unit");
                holder.fetch_for_fix(coordinates).await;
            }
            tracing::debug!("location listener finished");
        })
    }

    /// Refresh the status every `interval` until `cancel` fires.
    pub fn spawn_status_poller(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let holder = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => holder.refresh_status(),
                }
            }
            tracing::debug!("status poller stopped");
        })
    }
}
