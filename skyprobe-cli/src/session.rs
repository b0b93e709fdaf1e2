//! Interactive session: a menu of the actions the screen offers, with the
//! current state printed after each one.

use std::fmt;

use anyhow::Context;
use inquire::{InquireError, Select, Text};
use skyprobe_core::{App, Config, CoordinateError, TerminateDecision};
use tokio_util::sync::CancellationToken;

use crate::{
    cli::{confirm_termination, recent},
    render,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    EnterLatitude,
    EnterLongitude,
    GetWeather,
    UseMyLocation,
    StartBackground,
    StopBackground,
    RefreshStatus,
    DeviceMemory,
    RecentProcesses,
    FreeMemory,
    Quit,
}

impl Action {
    const ALL: [Action; 11] = [
        Action::EnterLatitude,
        Action::EnterLongitude,
        Action::GetWeather,
        Action::UseMyLocation,
        Action::StartBackground,
        Action::StopBackground,
        Action::RefreshStatus,
        Action::DeviceMemory,
        Action::RecentProcesses,
        Action::FreeMemory,
        Action::Quit,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::EnterLatitude => "Enter latitude",
            Action::EnterLongitude => "Enter longitude",
            Action::GetWeather => "Get weather",
            Action::UseMyLocation => "Use my location",
            Action::StartBackground => "Start background location",
            Action::StopBackground => "Stop background location",
            Action::RefreshStatus => "Refresh app status",
            Action::DeviceMemory => "Device memory",
            Action::RecentProcesses => "Recently started processes",
            Action::FreeMemory => "Free memory (terminate)",
            Action::Quit => "Quit",
        })
    }
}

/// Run a blocking prompt without stalling the runtime's other tasks.
fn prompt<T>(f: impl FnOnce() -> Result<T, InquireError>) -> anyhow::Result<Option<T>> {
    match tokio::task::block_in_place(f) {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e).context("Prompt failed"),
    }
}

pub async fn run(app: &App, config: &Config) -> anyhow::Result<()> {
    let holder = &app.holder;
    let listener = holder.spawn_location_listener(app.publisher.subscribe());
    let cancel = CancellationToken::new();
    let poller = holder.spawn_status_poller(config.status.poll_interval(), cancel.clone());

    let result = session_loop(app).await;

    cancel.cancel();
    listener.abort();
    if let Err(e) = poller.await {
        tracing::warn!(error = %e, "status poller ended abnormally");
    }
    result
}

async fn session_loop(app: &App) -> anyhow::Result<()> {
    let holder = &app.holder;

    loop {
        println!("\n{}", render::screen(&holder.snapshot()));

        let Some(action) = prompt(|| Select::new("Action:", Action::ALL.to_vec()).prompt())? else {
            return Ok(());
        };

        match action {
            Action::EnterLatitude => {
                let current = holder.snapshot().latitude_text;
                if let Some(text) =
                    prompt(|| Text::new("Latitude:").with_initial_value(&current).prompt())?
                {
                    holder.set_latitude_text(text);
                }
            }
            Action::EnterLongitude => {
                let current = holder.snapshot().longitude_text;
                if let Some(text) =
                    prompt(|| Text::new("Longitude:").with_initial_value(&current).prompt())?
                {
                    holder.set_longitude_text(text);
                }
            }
            Action::GetWeather => match holder.fetch_from_input().await {
                Ok(_) => {}
                Err(CoordinateError::Blank { .. }) => {
                    println!("Enter both latitude and longitude first.");
                }
                // Already shown as the screen's error.
                Err(_) => {}
            },
            Action::UseMyLocation => {
                holder.locate_now().await;
            }
            Action::StartBackground => holder.start_acquisition(),
            Action::StopBackground => holder.stop_acquisition().await,
            Action::RefreshStatus => holder.refresh_status(),
            Action::DeviceMemory => match holder.device_memory() {
                Ok(memory) => println!("{}", render::device_memory(&memory)),
                Err(e) => println!("Could not read device memory: {e}"),
            },
            Action::RecentProcesses => {
                if let Err(e) = recent(app) {
                    println!("{e:#}");
                }
            }
            Action::FreeMemory => {
                let confirmation = tokio::task::block_in_place(confirm_termination)?;
                if holder.terminate(confirmation) == TerminateDecision::Exit {
                    std::process::exit(0);
                }
            }
            Action::Quit => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_lists_every_action_once() {
        let labels: Vec<String> = Action::ALL.iter().map(ToString::to_string).collect();
        let mut unique = labels.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len());
        assert_eq!(labels.last().map(String::as_str), Some("Quit"));
    }
}
