//! Live pool rotation.
//!
//! [`PoolRotator`] replaces a handle's backend at runtime: the replacement is
//! fully started (including the worker handshake) before the swap, the swap
//! happens under the handle's dispatch guard, and the old backend is stopped
//! afterwards. A replacement that fails to start leaves the old backend in
//! place.
//!
//! [`DailyRotationScheduler`] drives the daily refresh of the live epoch from a
//! background thread.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Datelike, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::engine::EngineHandle;
use crate::epoch::Epoch;
use crate::error::{BioSimResult, InitError};
use crate::registry::EngineRegistry;

/// Swaps engine backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolRotator;

impl PoolRotator {
    /// Rotates `handle` onto a backend initialized with `init`; returns the
    /// handle's new generation.
    ///
    /// # Errors
    ///
    /// Returns `InitError` if the replacement fails to start; the current
    /// backend keeps serving in that case.
    pub fn rotate(handle: &EngineHandle, init: impl Into<String>) -> BioSimResult<u64> {
        let prepared = handle
            .prepare(init)
            .inspect_err(|e| warn!(handle = handle.id(), error = %e, "rotation abandoned, keeping current pool"))?;
        let previous = handle.swap(prepared)?;
        previous.terminate();
        let generation = handle.generation()?;
        info!(handle = handle.id(), generation, "engine pool rotated");
        Ok(generation)
    }
}

/// Refreshes the daily database in a live folder before rotation.
pub trait DataRefresher: Send + Sync {
    /// Fills `folder` with fresh data.
    ///
    /// # Errors
    ///
    /// Any error abandons this rotation attempt.
    fn refresh(&self, folder: &Path) -> BioSimResult<()>;
}

/// Refresher that leaves the folder as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefresher;

impl DataRefresher for NoopRefresher {
    fn refresh(&self, _folder: &Path) -> BioSimResult<()> {
        Ok(())
    }
}

/// Source of the current UTC day of year.
pub type DayOfYear = Arc<dyn Fn() -> u32 + Send + Sync>;

/// The UTC day of year from the system clock.
#[must_use]
pub fn utc_day_of_year() -> u32 {
    Utc::now().ordinal()
}

/// One check of the daily rotation: on a new day, refresh the alternate
/// folder, rotate the live handle onto it and make it authoritative.
pub struct DailyRotation {
    registry: Arc<EngineRegistry>,
    live: Arc<Epoch>,
    refresher: Arc<dyn DataRefresher>,
    current_day: u32,
}

impl DailyRotation {
    /// Creates the rotation for `live`, considering `today` already current.
    #[must_use]
    pub fn new(registry: Arc<EngineRegistry>, live: Arc<Epoch>, refresher: Arc<dyn DataRefresher>, today: u32) -> Self {
        Self {
            registry,
            live,
            refresher,
            current_day: today,
        }
    }

    /// Day considered current.
    #[must_use]
    pub const fn current_day(&self) -> u32 {
        self.current_day
    }

    /// Runs the rotation if `today` differs from the current day. Returns
    /// whether a rotation happened.
    ///
    /// # Errors
    ///
    /// Returns the refresh or rotation failure; the current day is unchanged
    /// so the next check retries.
    pub fn check(&mut self, today: u32) -> BioSimResult<bool> {
        if today == self.current_day {
            return Ok(false);
        }
        let next = self.registry.live_slot()?.toggled();
        let folder = self.registry.layout().weather().join(next.folder());
        debug!(folder = %folder.display(), "refreshing live daily data");
        self.refresher.refresh(&folder)?;

        self.registry.switch_live_slot(&self.live, next)?;
        self.current_day = today;
        info!(slot = next.folder(), day = today, "live daily data switched");
        Ok(true)
    }
}

impl fmt::Debug for DailyRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DailyRotation")
            .field("live", self.live.id())
            .field("current_day", &self.current_day)
            .finish_non_exhaustive()
    }
}

/// Background thread running [`DailyRotation::check`] every interval.
pub struct DailyRotationScheduler {
    shutdown_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl DailyRotationScheduler {
    /// Spawns the scheduler thread.
    ///
    /// # Errors
    ///
    /// Returns `InitError::WorkerSpawn` if the thread cannot be spawned.
    pub fn start(mut rotation: DailyRotation, interval: Duration, today: DayOfYear) -> Result<Self, InitError> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let join = thread::Builder::new()
            .name("biosim-rotation".to_string())
            .spawn(move || scheduler_loop(&mut rotation, interval, &today, &shutdown_rx))
            .map_err(|e| InitError::WorkerSpawn {
                target: "rotation".to_string(),
                worker: 0,
                message: e.to_string(),
            })?;
        info!(interval_secs = interval.as_secs(), "daily rotation scheduler started");
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Stops the thread and waits for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the thread.
        drop(self.shutdown_tx.take());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("daily rotation scheduler panicked");
            }
        }
    }
}

impl Drop for DailyRotationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DailyRotationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DailyRotationScheduler")
            .field("running", &self.join.is_some())
            .finish()
    }
}

fn scheduler_loop(rotation: &mut DailyRotation, interval: Duration, today: &DayOfYear, shutdown_rx: &Receiver<()>) {
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            default(interval) => {
                let day = today();
                if let Err(e) = rotation.check(day) {
                    error!(error = %e, day, "daily rotation failed, retrying next tick");
                }
            }
        }
    }
    debug!("daily rotation scheduler stopped");
}
