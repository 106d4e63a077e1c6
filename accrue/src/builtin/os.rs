//! Built-in producer exposing process and host resource usage.
//!
//! Values are read from `/proc` on Linux. Elsewhere only the processor
//! count is filled in and a warning is logged the first time a refresh
//! finds `/proc` missing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::Result;
use crate::producer::Producer;
use crate::stats::{GenericStats, Statistic, ValueKind};
use crate::task::PeriodicTask;

use super::BUILTIN_SUBSYSTEM;

/// Id of the OS producer, also the name of its single statistic.
pub const OS_PRODUCER_ID: &str = "OS";

/// Value names of the `OS` statistic.
pub const OS_VALUES: [&str; 6] = [
    "OpenFiles",
    "MaxOpenFiles",
    "FreeMemory",
    "TotalMemory",
    "CPUTime",
    "Processors",
];

/// Kernel clock ticks per second as reported in `/proc/<pid>/stat`.
const CLOCK_TICKS_PER_SEC: u64 = 100;
const NANOS_PER_TICK: u64 = 1_000_000_000 / CLOCK_TICKS_PER_SEC;

/// Eager producer `OS` with one statistic `OS`.
#[derive(Debug)]
pub struct OsProducer {
    stats: Arc<GenericStats>,
    warned: AtomicBool,
}

impl OsProducer {
    /// Creates the producer with every value at zero.
    pub fn new() -> Self {
        let kinds = [
            ValueKind::Gauge,
            ValueKind::Gauge,
            ValueKind::Gauge,
            ValueKind::Gauge,
            ValueKind::Duration,
            ValueKind::Gauge,
        ];
        Self {
            stats: Arc::new(GenericStats::new(OS_PRODUCER_ID, OS_VALUES.into_iter().zip(kinds))),
            warned: AtomicBool::new(false),
        }
    }

    /// The `OS` statistic.
    pub fn stats(&self) -> &Arc<GenericStats> {
        &self.stats
    }

    /// Re-reads every value. Returns `false` if `/proc` was unavailable.
    #[allow(clippy::cast_precision_loss)] // counts fit f64 for reporting
    pub fn refresh(&self) -> bool {
        if let Ok(n) = std::thread::available_parallelism() {
            self.stats.set("Processors", n.get() as f64);
        }

        let Ok(fds) = std::fs::read_dir("/proc/self/fd") else {
            if !self.warned.swap(true, Ordering::Relaxed) {
                tracing::warn!("/proc is not available, OS statistics stay at zero");
            }
            return false;
        };
        self.stats.set("OpenFiles", fds.count() as f64);

        if let Some(max) = read("/proc/self/limits").and_then(|s| parse_max_open_files(&s)) {
            self.stats.set("MaxOpenFiles", max as f64);
        }
        if let Some(meminfo) = read("/proc/meminfo") {
            if let Some(free) = parse_meminfo_bytes(&meminfo, "MemFree") {
                self.stats.set("FreeMemory", free as f64);
            }
            if let Some(total) = parse_meminfo_bytes(&meminfo, "MemTotal") {
                self.stats.set("TotalMemory", total as f64);
            }
        }
        if let Some(ticks) = read("/proc/self/stat").and_then(|s| parse_cpu_ticks(&s)) {
            self.stats.set("CPUTime", (ticks * NANOS_PER_TICK) as f64);
        }
        true
    }

    /// Starts a background task calling [`refresh`](Self::refresh) every `period`.
    ///
    /// The task holds a weak reference and does nothing once the producer
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AccrueError::Spawn`](crate::error::AccrueError::Spawn) if
    /// the thread cannot be created.
    pub fn spawn_updater(self: &Arc<Self>, period: Duration) -> Result<PeriodicTask> {
        let producer: Weak<Self> = Arc::downgrade(self);
        PeriodicTask::spawn("accrue-builtin-updater", period, move || {
            if let Some(producer) = producer.upgrade() {
                producer.refresh();
            }
        })
    }
}

impl Default for OsProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer for OsProducer {
    fn id(&self) -> &str {
        OS_PRODUCER_ID
    }

    fn category(&self) -> &str {
        "os"
    }

    fn subsystem(&self) -> &str {
        BUILTIN_SUBSYSTEM
    }

    fn statistics(&self) -> Vec<Arc<dyn Statistic>> {
        vec![Arc::clone(&self.stats) as Arc<dyn Statistic>]
    }
}

fn read(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Soft limit from the `Max open files` line of `/proc/<pid>/limits`.
fn parse_max_open_files(limits: &str) -> Option<u64> {
    limits
        .lines()
        .find_map(|l| l.strip_prefix("Max open files"))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// A `/proc/meminfo` entry converted from kB to bytes.
fn parse_meminfo_bytes(meminfo: &str, key: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kb * 1024)
    })
}

/// `utime + stime` in clock ticks from `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let (_, after_comm) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}
