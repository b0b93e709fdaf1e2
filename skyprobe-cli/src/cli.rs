use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use inquire::{Confirm, InquireError, Select, Text};
use skyprobe_core::{
    App, Config, Confirmation, CoordinateError, Coordinates, FetchOutcome, LocationSourceKind,
    ProbeError, TerminateDecision,
};
use tokio_util::sync::CancellationToken;

use crate::{render, session};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "skyprobe", version, about = "Current weather and app diagnostics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the location source and endpoints.
    Configure,

    /// Show current weather for coordinates or for this device's location.
    Weather {
        /// Latitude in decimal degrees.
        #[arg(long, allow_hyphen_values = true, required_unless_present = "locate")]
        lat: Option<String>,

        /// Longitude in decimal degrees.
        #[arg(long, allow_hyphen_values = true, required_unless_present = "locate")]
        lon: Option<String>,

        /// Acquire a location fix in the background instead.
        #[arg(long, conflicts_with_all = ["lat", "lon"])]
        locate: bool,
    },

    /// Show RAM usage and running background units.
    Status {
        /// Refresh at the configured interval until Ctrl-C.
        #[arg(long)]
        watch: bool,
    },

    /// Show this process's and the device's memory.
    Memory,

    /// List your processes started within the last hour, newest first.
    Recent,

    /// Interactive session.
    Session,

    /// Terminate the process to release its memory.
    FreeMemory {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Weather { lat, lon, locate } => {
                let (_, app) = load()?;
                if locate {
                    weather_from_location(&app).await
                } else {
                    weather_from_input(&app, lat, lon).await
                }
            }
            Command::Status { watch } => {
                let (config, app) = load()?;
                status(&app, &config, watch).await
            }
            Command::Memory => {
                let (_, app) = load()?;
                memory(&app)
            }
            Command::Recent => {
                let (_, app) = load()?;
                recent(&app)
            }
            Command::Session => {
                let (config, app) = load()?;
                session::run(&app, &config).await
            }
            Command::FreeMemory { yes } => {
                let (_, app) = load()?;
                free_memory(&app, yes)
            }
        }
    }
}

fn load() -> anyhow::Result<(Config, App)> {
    let config = Config::load()?;
    let app = App::from_config(&config)?;
    Ok((config, app))
}

async fn weather_from_input(
    app: &App,
    lat: Option<String>,
    lon: Option<String>,
) -> anyhow::Result<()> {
    app.holder.set_latitude_text(lat.unwrap_or_default());
    app.holder.set_longitude_text(lon.unwrap_or_default());

    match app.holder.fetch_from_input().await {
        Ok(outcome) => print_outcome(outcome),
        Err(e @ CoordinateError::Blank { .. }) => {
            Err(anyhow!("{e}; both --lat and --lon are required"))
        }
        Err(e) => Err(anyhow!("Invalid coordinates: {e}")),
    }
}

fn print_outcome(outcome: FetchOutcome) -> anyhow::Result<()> {
    match outcome {
        FetchOutcome::Updated(reading) => {
            println!("{}", render::weather_info(&reading));
            Ok(())
        }
        FetchOutcome::Failed(message) => bail!(message),
        FetchOutcome::Superseded => Ok(()),
    }
}

/// Start the background unit and report the weather for the fix it publishes.
async fn weather_from_location(app: &App) -> anyhow::Result<()> {
    let mut fixes = app.publisher.subscribe();
    let listener = app.holder.spawn_location_listener(app.publisher.subscribe());
    let mut state = app.holder.subscribe();

    app.holder.start_acquisition();
    let stopped = app
        .holder
        .acquisition_stopped()
        .context("location acquisition did not start")?;

    // A fix published just before the unit ended is still buffered.
    let fix = tokio::select! {
        biased;
        fix = fixes.next() => fix,
        _ = stopped => None,
    };

    let Some(coordinates) = fix else {
        listener.abort();
        bail!(
            "No location fix was received. Check `location` in {} or pass --lat/--lon.",
            Config::config_file_path()?.display()
        );
    };
    println!("Location: {coordinates}");

    let done = state
        .wait_for(|s| !s.loading && (s.weather.is_some() || s.error.is_some()))
        .await
        .context("state holder went away")?
        .clone();
    listener.abort();

    match (done.error, done.weather) {
        (Some(error), _) => bail!(error),
        (None, Some(weather)) => {
            println!("{}", render::weather_info(&weather));
            Ok(())
        }
        (None, None) => Ok(()),
    }
}

async fn status(app: &App, config: &Config, watch: bool) -> anyhow::Result<()> {
    if !watch {
        app.holder.refresh_status();
        print!("{}", render::status_card(&app.holder.snapshot()));
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let poller = app.holder.spawn_status_poller(config.status.poll_interval(), cancel.clone());
    let mut state = app.holder.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                print!("{}", render::status_card(&snapshot));
                println!();
            }
        }
    }

    cancel.cancel();
    poller.await.context("status poller panicked")?;
    Ok(())
}

fn memory(app: &App) -> anyhow::Result<()> {
    app.holder.refresh_status();
    if let Some(ram) = app.holder.snapshot().ram_usage_mb {
        println!("{}", render::app_ram(ram));
    }
    let device = app.holder.device_memory().context("Failed to read device memory")?;
    println!("{}", render::device_memory(&device));
    Ok(())
}

/// Recently started processes, or how to grant access to them.
pub fn recent(app: &App) -> anyhow::Result<()> {
    match app.holder.recent_processes() {
        Ok(processes) => print!("{}", render::recent_processes(&processes)),
        Err(ProbeError::UsageAccessDenied) => {
            let path = Config::config_file_path()?;
            println!("{}", render::usage_access_required(&path));
        }
        Err(e) => return Err(e).context("Failed to list recent processes"),
    }
    Ok(())
}

fn free_memory(app: &App, yes: bool) -> anyhow::Result<()> {
    let confirmation = if yes {
        Confirmation::Confirmed
    } else {
        confirm_termination()?
    };

    match app.holder.terminate(confirmation) {
        TerminateDecision::Exit => std::process::exit(0),
        TerminateDecision::Cancelled => {
            println!("Cancelled.");
            Ok(())
        }
    }
}

pub fn confirm_termination() -> anyhow::Result<Confirmation> {
    confirmation_from(
        Confirm::new("Terminate skyprobe now? Any work in progress is lost.")
            .with_default(false)
            .prompt(),
    )
}

/// Escape and Ctrl-C at the prompt count as "no".
fn confirmation_from(answer: Result<bool, InquireError>) -> anyhow::Result<Confirmation> {
    match answer {
        Ok(true) => Ok(Confirmation::Confirmed),
        Ok(false) | Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
            Ok(Confirmation::Declined)
        }
        Err(e) => Err(e).context("Failed to read confirmation"),
    }
}

/// Interactive configuration, saved to the config file.
fn configure() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    let source = Select::new("Location source:", LocationSourceKind::all().to_vec())
        .prompt()
        .context("Failed to read location source")?;

    match source {
        LocationSourceKind::Fixed => {
            let lat = Text::new("Latitude:").prompt().context("Failed to read latitude")?;
            let lon = Text::new("Longitude:").prompt().context("Failed to read longitude")?;
            let coordinates = Coordinates::parse(&lat, &lon).context("Invalid coordinates")?;
            config.set_fixed_location(coordinates);
        }
        LocationSourceKind::Ip => config.location.source = LocationSourceKind::Ip,
    }

    config.location.permission_granted = Confirm::new("Allow skyprobe to use your location?")
        .with_default(config.location.permission_granted)
        .prompt()
        .context("Failed to read permission")?;

    config.status.usage_stats_granted =
        Confirm::new("Allow skyprobe to list your recently started processes?")
            .with_default(config.status.usage_stats_granted)
            .prompt()
            .context("Failed to read usage access")?;

    let current_url = config.api.weather_base_url.clone();
    config.api.weather_base_url = Text::new("Weather API base URL:")
        .with_default(&current_url)
        .prompt()
        .context("Failed to read weather API URL")?;

    let path = config.save()?;
    println!("Saved configuration to {}", path.display());
    Ok(())
}
