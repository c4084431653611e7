use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use lad_backup::{write_snapshot, BackupRotation, SnapshotInfo};
use lad_store::MasterContainer;

use crate::error::ServiceResult;

struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
    snapshots: AtomicU64,
}

/// Background thread writing the container to rotated snapshot files.
pub struct Persister {
    container: Arc<MasterContainer>,
    rotation: BackupRotation,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Persister {
    pub fn start(
        container: Arc<MasterContainer>,
        rotation: BackupRotation,
        interval: Duration,
    ) -> ServiceResult<Self> {
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            snapshots: AtomicU64::new(0),
        });
        let handle = {
            let container = Arc::clone(&container);
            let rotation = rotation.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("lad-persister".into())
                .spawn(move || run(container, rotation, interval, shared))?
        };
        info!(
            directory = %rotation.directory.display(),
            interval_secs = interval.as_secs(),
            "persister started"
        );
        Ok(Self {
            container,
            rotation,
            shared,
            handle: Some(handle),
        })
    }

    /// Snapshots written by this persister, the final one included.
    pub fn snapshots(&self) -> u64 {
        self.shared.snapshots.load(Ordering::Relaxed)
    }

    /// Stop the timer thread and write one last snapshot.
    pub fn stop(mut self) -> Option<SnapshotInfo> {
        self.halt();
        persist_once(&self.container, &self.rotation, &self.shared)
    }

    fn halt(&mut self) {
        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("persister thread panicked");
            }
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.halt();
    }
}

fn persist_once(
    container: &MasterContainer,
    rotation: &BackupRotation,
    shared: &Shared,
) -> Option<SnapshotInfo> {
    let written = rotation
        .next_path()
        .and_then(|path| write_snapshot(&path, &container.entries()));
    match written {
        Ok(info) => {
            shared.snapshots.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = rotation.prune() {
                warn!(error = %e, "failed to prune old backups");
            }
            Some(info)
        }
        Err(e) => {
            warn!(error = %e, "snapshot failed");
            None
        }
    }
}

fn run(container: Arc<MasterContainer>, rotation: BackupRotation, interval: Duration, shared: Arc<Shared>) {
    loop {
        {
            let mut stopped = shared.stopped.lock();
            if !*stopped {
                shared.wake.wait_for(&mut stopped, interval);
            }
            if *stopped {
                break;
            }
        }
        persist_once(&container, &rotation, &shared);
    }
    info!("persister stopped");
}
