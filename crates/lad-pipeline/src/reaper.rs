use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use lad_store::{MasterContainer, ReapReport, ReapSettings};
use lad_types::{wall_clock_ms, TimeType};

use crate::error::{PipelineError, PipelineResult};

/// Depth ratio applied when the container holds more records than allowed.
const PRESSURE_DEPTH_RATIO: f64 = 0.5;

/// Reaper schedule and mode.
#[derive(Clone, Debug)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub settings: ReapSettings,
    /// Escalate a tick to a depth reduction above this many records.
    pub record_threshold: Option<usize>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            settings: ReapSettings::Normal,
            record_threshold: None,
        }
    }
}

struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
    passes: AtomicU64,
}

/// Background thread that periodically reaps the container.
pub struct Reaper {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn the reaper thread. Fails for a container that ages records by
    /// spacecraft clock, which has no wall-clock equivalent.
    pub fn start(container: Arc<MasterContainer>, config: ReaperConfig) -> PipelineResult<Self> {
        let time_type = container.policy().reap_time_type;
        if time_type == TimeType::Sclk {
            return Err(PipelineError::UnsupportedReapTimeType(time_type));
        }
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            passes: AtomicU64::new(0),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("lad-reaper".into())
            .spawn(move || run(container, config, thread_shared))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// One reap pass at `now_ms`, escalating under record pressure.
    pub fn run_once(container: &MasterContainer, config: &ReaperConfig, now_ms: i64) -> ReapReport {
        let mut settings = config.settings;
        if let Some(threshold) = config.record_threshold {
            let records = container.record_count();
            if records > threshold {
                warn!(records, threshold, "record threshold exceeded; reducing leaf depths");
                settings = ReapSettings::ReduceDepth(PRESSURE_DEPTH_RATIO);
            }
        }
        container.reap(&settings, now_ms)
    }

    /// Completed reap passes.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut stopped = self.shared.stopped.lock();
            *stopped = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(container: Arc<MasterContainer>, config: ReaperConfig, shared: Arc<Shared>) {
    info!(interval_ms = config.interval.as_millis() as u64, "reaper started");
    loop {
        {
            let mut stopped = shared.stopped.lock();
            if !*stopped {
                shared.wake.wait_for(&mut stopped, config.interval);
            }
            if *stopped {
                break;
            }
        }
        let report = Reaper::run_once(&container, &config, wall_clock_ms() as i64);
        shared.passes.fetch_add(1, Ordering::Relaxed);
        if !report.is_empty() {
            debug!(
                leaves = report.leaves_removed,
                evicted = report.records_evicted,
                "reaper tick"
            );
        }
    }
    info!("reaper stopped");
}
