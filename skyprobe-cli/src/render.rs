//! Plain-text rendering of presentation state.

use std::{fmt::Write, path::Path};

use chrono::Local;
use skyprobe_core::{DeviceMemory, PresentationState, RecentProcess, WeatherReading};

pub fn weather_info(weather: &WeatherReading) -> String {
    format!(
        "Location: {}, {}\nTemperature: {}°C\nWind Speed: {} km/h\nWind Direction: {}°",
        weather.locality.as_deref().unwrap_or("Unknown"),
        weather.country.as_deref().unwrap_or("Unknown"),
        weather.temperature,
        weather.wind_speed,
        weather.wind_direction,
    )
}

/// Last path segment of a fully qualified unit name.
fn short_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

fn services(out: &mut String, services: &[String]) {
    out.push_str("Running Services:\n");
    if services.is_empty() {
        out.push_str("- None\n");
    }
    for name in services {
        let _ = writeln!(out, "- {}", short_name(name));
    }
}

pub fn status_card(state: &PresentationState) -> String {
    let mut out = String::from("App Status\n");
    if let Some(ram) = state.ram_usage_mb {
        let _ = writeln!(out, "Current RAM Usage: {ram} MB");
    }
    if let Some(endpoint) = &state.last_api_endpoint {
        let _ = writeln!(out, "Last API Call: {endpoint}");
    }
    if let Some(list) = &state.running_services {
        services(&mut out, list);
    }
    out
}

pub fn app_ram(ram_usage_mb: u64) -> String {
    format!("This app is using approximately {ram_usage_mb} MB of RAM.")
}

pub fn device_memory(memory: &DeviceMemory) -> String {
    format!(
        "Device RAM: {} MB available of {} MB total.",
        memory.available_mb, memory.total_mb
    )
}

pub fn recent_processes(processes: &[RecentProcess]) -> String {
    if processes.is_empty() {
        return "No recently used apps found.\n".to_string();
    }

    let mut out = String::new();
    for process in processes {
        let started = process.started_at.with_timezone(&Local);
        let _ = writeln!(out, "Process: {} (pid {})", process.name, process.pid);
        let _ = writeln!(out, "Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    out
}

pub fn usage_access_required(config_path: &Path) -> String {
    format!(
        "Permission Required\n\
         skyprobe needs usage access to list recently started processes.\n\
         Run `skyprobe configure` or set `usage_stats_granted = true` under [status] in {}.",
        config_path.display()
    )
}

/// The whole screen: inputs, result area, status card.
pub fn screen(state: &PresentationState) -> String {
    let mut out = format!(
        "Latitude: {}    Longitude: {}\n",
        blank_as_dash(&state.latitude_text),
        blank_as_dash(&state.longitude_text),
    );
    if state.acquisition_running {
        out.push_str("Background location: running\n");
    }
    out.push('\n');

    if state.loading {
        out.push_str("Loading...\n");
    } else if let Some(error) = &state.error {
        let _ = writeln!(out, "{error}");
    } else if let Some(weather) = &state.weather {
        let _ = writeln!(out, "{}", weather_info(weather));
    }

    out.push('\n');
    out.push_str(&status_card(state));
    out
}

fn blank_as_dash(text: &str) -> &str {
    if text.trim().is_empty() { "-" } else { text }
}
