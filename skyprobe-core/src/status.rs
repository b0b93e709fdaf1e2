//! Process and device diagnostics.

use chrono::{DateTime, TimeDelta, Utc};
use std::{fmt::Debug, fs, os::unix::fs::MetadataExt, sync::Arc};

use crate::{
    error::ProbeError,
    model::{AppStatus, DeviceMemory, RecentProcess},
    registry::ServiceRegistry,
};

const SMAPS_ROLLUP: &str = "/proc/self/smaps_rollup";
const PROC_STATUS: &str = "/proc/self/status";
const MEMINFO: &str = "/proc/meminfo";
const KERNEL_STAT: &str = "/proc/stat";
const PROC_ROOT: &str = "/proc";
const PROC_SELF: &str = "/proc/self";

/// Clock ticks per second as exposed to user space in `/proc`.
const USER_HZ: u64 = 100;
const RECENT_WINDOW_HOURS: i64 = 1;

/// Raw text of the memory accounting files.
pub trait MemorySource: Send + Sync + Debug {
    fn smaps_rollup(&self) -> Result<String, ProbeError>;
    fn process_status(&self) -> Result<String, ProbeError>;
    fn meminfo(&self) -> Result<String, ProbeError>;
}

/// Reads the real `/proc` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFs;

fn read(path: &'static str) -> Result<String, ProbeError> {
    fs::read_to_string(path).map_err(|source| ProbeError::Io { path, source })
}

impl MemorySource for ProcFs {
    fn smaps_rollup(&self) -> Result<String, ProbeError> {
        read(SMAPS_ROLLUP)
    }

    fn process_status(&self) -> Result<String, ProbeError> {
        read(PROC_STATUS)
    }

    fn meminfo(&self) -> Result<String, ProbeError> {
        read(MEMINFO)
    }
}

/// Per-process accounting for the current user.
pub trait ProcessTable: Send + Sync + Debug {
    /// Contents of `/proc/stat`.
    fn kernel_stat(&self) -> Result<String, ProbeError>;

    /// Contents of `/proc/<pid>/stat` for each process the current user owns.
    fn own_process_stats(&self) -> Result<Vec<String>, ProbeError>;
}

impl ProcessTable for ProcFs {
    fn kernel_stat(&self) -> Result<String, ProbeError> {
        read(KERNEL_STAT)
    }

    fn own_process_stats(&self) -> Result<Vec<String>, ProbeError> {
        let uid = fs::metadata(PROC_SELF)
            .map_err(|source| ProbeError::Io {
                path: PROC_SELF,
                source,
            })?
            .uid();
        let entries = fs::read_dir(PROC_ROOT).map_err(|source| ProbeError::Io {
            path: PROC_ROOT,
            source,
        })?;

        let mut stats = Vec::new();
        for entry in entries.flatten() {
            let is_pid = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
            if !is_pid || !entry.metadata().is_ok_and(|m| m.uid() == uid) {
                continue;
            }
            // The process may have exited since the directory was listed.
            if let Ok(stat) = fs::read_to_string(entry.path().join("stat")) {
                stats.push(stat);
            }
        }
        Ok(stats)
    }
}

/// Value in kB of a `Name:   1234 kB` line.
fn field_kb(content: &str, name: &'static str) -> Result<u64, ProbeError> {
    content
        .lines()
        .find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
        .ok_or(ProbeError::Missing(name))
}

/// `btime` from `/proc/stat`: boot time in seconds since the epoch.
fn boot_time(kernel_stat: &str) -> Result<i64, ProbeError> {
    kernel_stat
        .lines()
        .find_map(|line| line.strip_prefix("btime ")?.trim().parse().ok())
        .ok_or(ProbeError::Missing("btime"))
}

/// Pid, command name and start time in clock ticks after boot.
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_process_stat(stat: &str) -> Result<(u32, String, u64), ProbeError> {
    let malformed = || ProbeError::Malformed(stat.trim().chars().take(80).collect());

    let open = stat.find('(').ok_or_else(malformed)?;
    let close = stat.rfind(')').filter(|&close| close > open).ok_or_else(malformed)?;
    let pid = stat[..open].trim().parse().map_err(|_| malformed())?;
    let name = stat[open + 1..close].to_string();

    // Field 3 (state) is the first after the name; starttime is field 22.
    let start_ticks = stat[close + 1..]
        .split_whitespace()
        .nth(19)
        .and_then(|field| field.parse().ok())
        .ok_or_else(malformed)?;

    Ok((pid, name, start_ticks))
}

#[derive(Debug, Clone)]
pub struct StatusProber {
    memory: Arc<dyn MemorySource>,
    processes: Arc<dyn ProcessTable>,
    usage_access: bool,
    registry: ServiceRegistry,
    package: String,
}

impl StatusProber {
    pub fn new(registry: ServiceRegistry, package: impl Into<String>) -> Self {
        Self::with_source(Arc::new(ProcFs), registry, package)
    }

    pub fn with_source(
        memory: Arc<dyn MemorySource>,
        registry: ServiceRegistry,
        package: impl Into<String>,
    ) -> Self {
        Self {
            memory,
            processes: Arc::new(ProcFs),
            usage_access: false,
            registry,
            package: package.into(),
        }
    }

    pub fn with_process_table(mut self, processes: Arc<dyn ProcessTable>) -> Self {
        self.processes = processes;
        self
    }

    /// Whether the user allowed listing their processes.
    pub fn with_usage_access(mut self, granted: bool) -> Self {
        self.usage_access = granted;
        self
    }

    /// Snapshot of this process. Reads are idempotent, so concurrent probes
    /// are harmless.
    pub fn probe(&self) -> AppStatus {
        AppStatus {
            ram_usage_mb: self.process_pss_kb() / 1024,
            running_services: self.registry.running_in(&self.package),
        }
    }

    /// PSS in kB, falling back to RSS, then to 0.
    fn process_pss_kb(&self) -> u64 {
        let pss = self.memory.smaps_rollup().and_then(|s| field_kb(&s, "Pss"));
        match pss {
            Ok(kb) => kb,
            Err(e) => {
                tracing::debug!(error = %e, "PSS unavailable, falling back to RSS");
                self.memory
                    .process_status()
                    .and_then(|s| field_kb(&s, "VmRSS"))
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "process memory unavailable");
                        0
                    })
            }
        }
    }

    pub fn device_memory(&self) -> Result<DeviceMemory, ProbeError> {
        let meminfo = self.memory.meminfo()?;
        Ok(DeviceMemory {
            total_mb: field_kb(&meminfo, "MemTotal")? / 1024,
            available_mb: field_kb(&meminfo, "MemAvailable")? / 1024,
        })
    }

    /// The user's processes started within the last hour, newest first.
    pub fn recent_processes(&self) -> Result<Vec<RecentProcess>, ProbeError> {
        self.recent_processes_at(Utc::now())
    }

    fn recent_processes_at(&self, now: DateTime<Utc>) -> Result<Vec<RecentProcess>, ProbeError> {
        if !self.usage_access {
            return Err(ProbeError::UsageAccessDenied);
        }

        let boot = boot_time(&self.processes.kernel_stat()?)?;
        let since = now - TimeDelta::hours(RECENT_WINDOW_HOURS);

        let mut recent = Vec::new();
        for stat in self.processes.own_process_stats()? {
            let (pid, name, start_ticks) = match parse_process_stat(&stat) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable process");
                    continue;
                }
            };
            let started = boot.saturating_add_unsigned(start_ticks / USER_HZ);
            let Some(started_at) = DateTime::from_timestamp(started, 0) else {
                continue;
            };
            if started_at >= since {
                recent.push(RecentProcess {
                    pid,
                    name,
                    started_at,
                });
            }
        }

        recent.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.pid.cmp(&a.pid)));
        Ok(recent)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FixtureMemory, FixtureProcesses, stat_line};
    use super::*;

    const ROLLUP: &str = "\
55d0c0a4e000-7ffd1b5f1000 ---p 00000000 00:00 0                          [rollup]
Rss:                2100 kB
Pss:                2047 kB
Pss_Anon:           1200 kB
";

    fn prober(memory: FixtureMemory, registry: ServiceRegistry) -> StatusProber {
        StatusProber::with_source(Arc::new(memory), registry, "skyprobe")
    }

    #[test]
    fn pss_is_truncated_to_whole_megabytes() {
        let memory = FixtureMemory {
            smaps_rollup: Some(ROLLUP.into()),
            ..Default::default()
        };
        let status = prober(memory, ServiceRegistry::new()).probe();
        assert_eq!(status.ram_usage_mb, 1);
    }

    #[test]
    fn pss_prefix_does_not_match_pss_anon() {
        let only_anon = "Pss_Anon:  9999 kB\n";
        assert!(matches!(field_kb(only_anon, "Pss"), Err(ProbeError::Missing("Pss"))));
    }

    #[test]
    fn falls_back_to_rss_then_zero() {
        let memory = FixtureMemory {
            status: Some("Name:\tskyprobe\nVmRSS:\t   10240 kB\n".into()),
            ..Default::default()
        };
        assert_eq!(prober(memory, ServiceRegistry::new()).probe().ram_usage_mb, 10);

        let nothing = prober(FixtureMemory::default(), ServiceRegistry::new()).probe();
        assert_eq!(nothing.ram_usage_mb, 0);
    }

    #[test]
    fn running_services_exclude_other_packages() {
        let registry = ServiceRegistry::new();
        let _ours = registry.register("skyprobe", "skyprobe::location::LocationAcquisition");
        let _theirs = registry.register("com.example.maps", "com.example.maps::Tracker");

        let status = prober(FixtureMemory::default(), registry).probe();
        assert_eq!(status.running_services, vec!["skyprobe::location::LocationAcquisition"]);
    }

    #[test]
    fn device_memory_reads_meminfo() {
        let memory = FixtureMemory {
            meminfo: Some(
                "MemTotal:       16318480 kB\nMemFree:         1000000 kB\nMemAvailable:    8159240 kB\n"
                    .into(),
            ),
            ..Default::default()
        };
        let device = prober(memory, ServiceRegistry::new()).device_memory().unwrap();
        assert_eq!(device, DeviceMemory {
            total_mb: 15936,
            available_mb: 7968,
        });
    }

    #[test]
    fn device_memory_reports_missing_fields() {
        let memory =
            FixtureMemory { meminfo: Some("MemTotal: 1024 kB\n".into()), ..Default::default() };
        let err = prober(memory, ServiceRegistry::new()).device_memory().unwrap_err();
        assert!(matches!(err, ProbeError::Missing("MemAvailable")));
    }

    const BOOT: i64 = 1_700_000_000;

    fn process_prober(stats: Vec<String>, granted: bool) -> StatusProber {
        let processes = FixtureProcesses {
            kernel_stat: Some(format!("cpu  1 2 3 4\nbtime {BOOT}\nprocesses 999\n")),
            stats,
        };
        prober(FixtureMemory::default(), ServiceRegistry::new())
            .with_process_table(Arc::new(processes))
            .with_usage_access(granted)
    }

    fn at(secs_after_boot: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(BOOT + secs_after_boot, 0).unwrap()
    }

    #[test]
    fn recent_processes_are_newest_first_within_the_hour() {
        let prober = process_prober(
            vec![
                stat_line(300, "bash", 7_000 * USER_HZ),
                stat_line(100, "systemd", 3_000 * USER_HZ),
                stat_line(412, "Web (Content)", 7_100 * USER_HZ + 42),
            ],
            true,
        );

        let recent = prober.recent_processes_at(at(7_200)).unwrap();
        let names: Vec<&str> = recent.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Web (Content)", "bash"]);
        assert_eq!(recent[0].pid, 412);
        assert_eq!(recent[0].started_at, at(7_100));
    }

    #[test]
    fn recent_processes_skip_malformed_lines() {
        let prober = process_prober(
            vec!["garbage".into(), stat_line(7, "sh", 7_150 * USER_HZ)],
            true,
        );
        let recent = prober.recent_processes_at(at(7_200)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "sh");
    }

    #[test]
    fn recent_processes_need_usage_access() {
        let prober = process_prober(vec![stat_line(7, "sh", 0)], false);
        assert!(matches!(prober.recent_processes(), Err(ProbeError::UsageAccessDenied)));
    }

    #[test]
    fn recent_processes_need_boot_time() {
        let prober = prober(FixtureMemory::default(), ServiceRegistry::new())
            .with_process_table(Arc::new(FixtureProcesses {
                kernel_stat: Some("cpu  1 2 3 4\n".into()),
                stats: vec![],
            }))
            .with_usage_access(true);
        assert!(matches!(prober.recent_processes(), Err(ProbeError::Missing("btime"))));
    }

    #[test]
    fn stat_line_name_may_contain_parentheses() {
        let (pid, name, ticks) = parse_process_stat(&stat_line(9, "a) (b", 55)).unwrap();
        assert_eq!((pid, name.as_str(), ticks), (9, "a) (b", 55));
        assert!(parse_process_stat("9 (x) S 1").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn real_proc_lists_this_process() {
        let prober = StatusProber::new(ServiceRegistry::new(), "skyprobe").with_usage_access(true);
        let recent = prober.recent_processes().unwrap();
        assert!(recent.iter().any(|p| p.pid == std::process::id()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn real_proc_probe_works() {
        let status = StatusProber::new(ServiceRegistry::new(), "skyprobe").probe();
        assert!(status.running_services.is_empty());
        assert!(StatusProber::new(ServiceRegistry::new(), "skyprobe").device_memory().is_ok());
    }
}
