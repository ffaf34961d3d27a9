//! Engine handles for every epoch and model.
//!
//! Handles start eagerly at construction, or on first use when lazy start is
//! configured. The registry also tracks which live daily folder is current.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::catalog::EpochCatalog;
use crate::config::WorkerSettings;
use crate::engine::{EngineFactory, EngineHandle};
use crate::epoch::{DailySlot, DataLayout, Epoch, EpochId};
use crate::error::{lock_err, BioSimResult, ExecutionError};
use crate::models::{ModelSpec, MODELS};
use crate::rotation::PoolRotator;

type Slot = Mutex<Option<Arc<EngineHandle>>>;

/// Owns the engine handles of one service.
pub struct EngineRegistry {
    layout: DataLayout,
    factory: Arc<dyn EngineFactory>,
    workers: WorkerSettings,
    epochs: HashMap<EpochId, (Arc<Epoch>, Slot)>,
    models: HashMap<&'static str, Slot>,
    live_slot: Mutex<DailySlot>,
}

impl EngineRegistry {
    /// Registers every epoch of `catalog` and every known model without
    /// starting anything.
    #[must_use]
    pub fn new(catalog: &EpochCatalog, layout: DataLayout, factory: Arc<dyn EngineFactory>, workers: WorkerSettings) -> Self {
        let epochs = catalog
            .iter()
            .map(|epoch| (epoch.id().clone(), (Arc::clone(epoch), Mutex::new(None))))
            .collect();
        let models = MODELS.iter().map(|m| (m.name, Mutex::new(None))).collect();
        Self {
            layout,
            factory,
            workers,
            epochs,
            models,
            live_slot: Mutex::new(DailySlot::default()),
        }
    }

    /// Starts every registered handle.
    ///
    /// # Errors
    ///
    /// Returns the first initialization failure; handles started before it
    /// stay up.
    pub fn start_all(&self) -> BioSimResult<()> {
        for (epoch, _) in self.epochs.values() {
            self.epoch_handle(epoch)?;
        }
        for spec in MODELS {
            self.model_handle(spec)?;
        }
        info!(epochs = self.epochs.len(), models = self.models.len(), "engine registry started");
        Ok(())
    }

    /// Number of handles currently running.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if a slot lock is poisoned.
    pub fn started(&self) -> BioSimResult<usize> {
        let mut count = 0;
        for slot in self.epochs.values().map(|(_, s)| s).chain(self.models.values()) {
            if slot.lock().map_err(|_| lock_err("registry slot"))?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Currently authoritative live daily folder.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the slot lock is poisoned.
    pub fn live_slot(&self) -> BioSimResult<DailySlot> {
        Ok(*self.live_slot.lock().map_err(|_| lock_err("live slot"))?)
    }

    /// Records the authoritative live daily folder.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the slot lock is poisoned.
    pub fn set_live_slot(&self, slot: DailySlot) -> BioSimResult<()> {
        *self.live_slot.lock().map_err(|_| lock_err("live slot"))? = slot;
        Ok(())
    }

    /// Makes `slot` the authoritative live folder, rotating the handle of
    /// `epoch` onto it if that handle is running.
    ///
    /// The epoch's registry slot stays locked throughout, so a lazy start of
    /// `epoch` sees either the old folder and gets rotated, or the new one.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownTarget` for an epoch outside the
    /// catalog and `InitError` if the rotation fails; the live folder is
    /// unchanged in both cases.
    pub fn switch_live_slot(&self, epoch: &Epoch, slot: DailySlot) -> BioSimResult<()> {
        let (_, handle_slot) = self.epochs.get(epoch.id()).ok_or_else(|| ExecutionError::UnknownTarget {
            target: epoch.id().to_string(),
        })?;
        let guard = handle_slot.lock().map_err(|_| lock_err("registry slot"))?;
        if let Some(handle) = guard.as_ref() {
            PoolRotator::rotate(handle, epoch.init_command(&self.layout, slot))?;
        }
        self.set_live_slot(slot)
    }

    /// Initialization command for `epoch` with the current live folder.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the slot lock is poisoned.
    pub fn epoch_init_command(&self, epoch: &Epoch) -> BioSimResult<String> {
        Ok(epoch.init_command(&self.layout, self.live_slot()?))
    }

    /// Handle serving `epoch`, started on first use.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownTarget` for an epoch outside the
    /// catalog and `InitError` if the handle fails to start.
    pub fn epoch_handle(&self, epoch: &Epoch) -> BioSimResult<Arc<EngineHandle>> {
        let (_, slot) = self.epochs.get(epoch.id()).ok_or_else(|| ExecutionError::UnknownTarget {
            target: epoch.id().to_string(),
        })?;
        let mut guard = slot.lock().map_err(|_| lock_err("registry slot"))?;
        if let Some(handle) = guard.as_ref() {
            return Ok(Arc::clone(handle));
        }
        let init = self.epoch_init_command(epoch)?;
        let handle = EngineHandle::start(epoch.id().as_str(), epoch.workers(), Arc::clone(&self.factory), init)
            .inspect_err(|e| warn!(epoch = %epoch.id(), error = %e, "epoch engine failed to start"))?;
        let handle = Arc::new(handle);
        *guard = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Layout the init commands point into.
    #[must_use]
    pub const fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Handle running `spec`, started on first use.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownTarget` for an unregistered model and
    /// `InitError` if the handle fails to start.
    pub fn model_handle(&self, spec: &ModelSpec) -> BioSimResult<Arc<EngineHandle>> {
        let slot = self.models.get(spec.name).ok_or_else(|| ExecutionError::UnknownTarget {
            target: spec.name.to_string(),
        })?;
        let mut guard = slot.lock().map_err(|_| lock_err("registry slot"))?;
        if let Some(handle) = guard.as_ref() {
            return Ok(Arc::clone(handle));
        }
        let workers = self.workers.model_workers(spec.nominal_processes);
        let handle = EngineHandle::start(
            format!("model:{}", spec.name),
            workers,
            Arc::clone(&self.factory),
            spec.init_command(&self.layout),
        )
        .inspect_err(|e| warn!(model = spec.name, error = %e, "model engine failed to start"))?;
        let handle = Arc::new(handle);
        *guard = Some(Arc::clone(&handle));
        Ok(handle)
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("layout", &self.layout)
            .field("epochs", &self.epochs.len())
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}
