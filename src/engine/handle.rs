//! Engine handles: one synchronous instance or a pool of workers behind a guard.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::error::{lock_err, BioSimResult, InitError};

use super::pool::WorkerPool;
use super::{call_guarded, initialize_guarded, Engine, EngineCall, EngineFactory, EngineMetadata, TeleIo, SUCCESS};

enum Backend {
    Single(Box<dyn Engine>),
    Pooled(WorkerPool),
}

impl Backend {
    fn spawn(
        target: &str,
        workers: usize,
        factory: &Arc<dyn EngineFactory>,
        init: &str,
    ) -> Result<(Self, EngineMetadata), InitError> {
        if workers <= 1 {
            let mut engine = factory.create(target);
            let status = initialize_guarded(engine.as_mut(), init);
            if status != SUCCESS {
                return Err(InitError::EngineInit {
                    target: target.to_string(),
                    message: status,
                });
            }
            let metadata = EngineMetadata::collect(engine.as_ref());
            Ok((Self::Single(engine), metadata))
        } else {
            let (pool, metadata) = WorkerPool::start(target, workers, factory, init)?;
            Ok((Self::Pooled(pool), metadata))
        }
    }

    fn run(&mut self, calls: Vec<EngineCall>) -> BioSimResult<Vec<TeleIo>> {
        match self {
            Self::Single(engine) => Ok(calls.iter().map(|call| call_guarded(engine.as_mut(), call)).collect()),
            Self::Pooled(pool) => pool.run_batch(calls),
        }
    }

    fn workers(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Pooled(pool) => pool.len(),
        }
    }

    fn terminate(self) {
        match self {
            Self::Single(engine) => drop(engine),
            Self::Pooled(pool) => pool.shutdown(),
        }
    }
}

struct HandleState {
    backend: Backend,
    init: String,
    generation: u64,
}

/// A fully initialized backend, ready to be swapped into a handle.
pub struct PreparedBackend {
    backend: Backend,
    init: String,
    metadata: EngineMetadata,
}

impl PreparedBackend {
    /// Initialization command the backend was started with.
    #[must_use]
    pub fn init_command(&self) -> &str {
        &self.init
    }

    /// Stops the backend's workers and joins them.
    pub fn terminate(self) {
        self.backend.terminate();
    }
}

impl fmt::Debug for PreparedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedBackend")
            .field("init", &self.init)
            .field("workers", &self.backend.workers())
            .finish_non_exhaustive()
    }
}

/// Counters for one handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    /// Batches dispatched.
    pub batches: u64,
    /// Single-location calls dispatched.
    pub calls: u64,
    /// Successful backend swaps.
    pub rotations: u64,
}

/// Owns the engine instance(s) for one epoch or model.
///
/// Batches on one handle are strictly serialized: the guard is held while all
/// calls are enqueued and all replies drained.
pub struct EngineHandle {
    id: String,
    workers: usize,
    factory: Arc<dyn EngineFactory>,
    state: Mutex<HandleState>,
    metadata: RwLock<Arc<EngineMetadata>>,
    batches: AtomicU64,
    calls: AtomicU64,
    rotations: AtomicU64,
}

impl EngineHandle {
    /// Starts a handle with `workers` engine instances (1 means synchronous).
    ///
    /// # Errors
    ///
    /// Returns `InitError` if any instance fails to initialize.
    pub fn start(
        id: impl Into<String>,
        workers: usize,
        factory: Arc<dyn EngineFactory>,
        init: impl Into<String>,
    ) -> Result<Self, InitError> {
        let id = id.into();
        let init = init.into();
        let workers = workers.max(1);
        let (backend, metadata) = Backend::spawn(&id, workers, &factory, &init)?;
        info!(handle = %id, workers, "engine handle started");
        Ok(Self {
            id,
            workers,
            factory,
            state: Mutex::new(HandleState {
                backend,
                init,
                generation: 0,
            }),
            metadata: RwLock::new(Arc::new(metadata)),
            batches: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
        })
    }

    /// Handle identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Runs one batch and returns the replies in input order.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the guard is poisoned or the pool is
    /// disconnected. Per-location engine failures are error replies, not errors.
    pub fn submit_batch(&self, calls: Vec<EngineCall>) -> BioSimResult<Vec<TeleIo>> {
        let n = calls.len() as u64;
        let mut state = self.state.lock().map_err(|_| lock_err("engine handle"))?;
        let replies = state.backend.run(calls)?;
        drop(state);
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.calls.fetch_add(n, Ordering::Relaxed);
        Ok(replies)
    }

    /// Engine metadata reported by the current backend.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the metadata lock is poisoned.
    pub fn metadata(&self) -> BioSimResult<Arc<EngineMetadata>> {
        let guard = self.metadata.read().map_err(|_| lock_err("engine metadata"))?;
        Ok(Arc::clone(&guard))
    }

    /// Initialization command of the current backend.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the guard is poisoned.
    pub fn init_command(&self) -> BioSimResult<String> {
        let state = self.state.lock().map_err(|_| lock_err("engine handle"))?;
        Ok(state.init.clone())
    }

    /// Number of backend swaps so far.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the guard is poisoned.
    pub fn generation(&self) -> BioSimResult<u64> {
        let state = self.state.lock().map_err(|_| lock_err("engine handle"))?;
        Ok(state.generation)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HandleStats {
        HandleStats {
            batches: self.batches.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }

    /// Starts a complete replacement backend without touching the current one.
    ///
    /// # Errors
    ///
    /// Returns `InitError` if the replacement fails to initialize; nothing is
    /// left running in that case.
    pub fn prepare(&self, init: impl Into<String>) -> Result<PreparedBackend, InitError> {
        let init = init.into();
        let (backend, metadata) = Backend::spawn(&self.id, self.workers, &self.factory, &init)?;
        Ok(PreparedBackend { backend, init, metadata })
    }

    /// Swaps `prepared` in under the guard and returns the previous backend.
    ///
    /// The swap waits for an in-flight batch to finish; batches submitted after
    /// it are served by the new backend. The caller terminates the returned one.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the state lock is poisoned;
    /// `prepared` is terminated in that case. A poisoned metadata lock is
    /// recovered since the swap replaces its whole value.
    pub fn swap(&self, prepared: PreparedBackend) -> BioSimResult<PreparedBackend> {
        let PreparedBackend { backend, init, metadata } = prepared;
        let Ok(mut state) = self.state.lock() else {
            backend.terminate();
            return Err(lock_err("engine handle"));
        };
        let mut metadata_guard = self.metadata.write().unwrap_or_else(|poisoned| {
            warn!(handle = %self.id, "recovering poisoned engine metadata lock");
            poisoned.into_inner()
        });
        let previous_backend = std::mem::replace(&mut state.backend, backend);
        let previous_init = std::mem::replace(&mut state.init, init);
        state.generation += 1;
        let generation = state.generation;
        let previous_metadata = std::mem::replace(&mut *metadata_guard, Arc::new(metadata));
        drop(metadata_guard);
        self.metadata.clear_poison();
        drop(state);

        self.rotations.fetch_add(1, Ordering::Relaxed);
        debug!(handle = %self.id, generation, "engine backend swapped");
        Ok(PreparedBackend {
            backend: previous_backend,
            init: previous_init,
            metadata: Arc::unwrap_or_clone(previous_metadata),
        })
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("workers", &self.workers)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::ScriptedFactory;

    fn factory() -> Arc<dyn EngineFactory> {
        Arc::new(ScriptedFactory::new().with_failing_latitude(0.0))
    }

    fn generate(lat: f64) -> EngineCall {
        EngineCall::Generate {
            command: format!("Latitude={lat}&Longitude=-70&nb_years=2"),
        }
    }

    #[test]
    fn single_instance_isolates_failures() {
        let handle = EngineHandle::start("wg", 1, factory(), "Normals=a").unwrap();
        let replies = handle.submit_batch(vec![generate(45.0), generate(0.0), generate(46.0)]).unwrap();
        assert!(replies[0].is_success());
        assert_eq!(replies[1].msg, "Error: station not found");
        assert!(replies[2].is_success());
        assert_eq!(handle.stats().batches, 1);
        assert_eq!(handle.stats().calls, 3);
    }

    #[test]
    fn swap_replaces_backend_and_metadata() {
        let handle = EngineHandle::start("wg", 2, factory(), "Normals=a").unwrap();
        let prepared = handle.prepare("Normals=b").unwrap();
        assert_eq!(prepared.init_command(), "Normals=b");

        let old = handle.swap(prepared).unwrap();
        assert_eq!(old.init_command(), "Normals=a");
        old.terminate();

        assert_eq!(handle.init_command().unwrap(), "Normals=b");
        assert_eq!(handle.generation().unwrap(), 1);
        let replies = handle.submit_batch(vec![generate(45.0)]).unwrap();
        assert_eq!(replies[0].comment, "Normals=b");
    }

    #[test]
    fn swap_recovers_poisoned_metadata() {
        let handle = EngineHandle::start("wg", 1, factory(), "Normals=a").unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = handle.metadata.write().unwrap();
            panic!("poison the metadata lock");
        }));
        assert!(handle.metadata().is_err());

        let old = handle.swap(handle.prepare("Normals=b").unwrap()).unwrap();
        assert_eq!(old.init_command(), "Normals=a");
        old.terminate();
        assert_eq!(handle.stats().rotations, 1);
        assert_eq!(handle.metadata().unwrap().default_parameters, "Threshold=5");
    }

    #[test]
    fn failed_prepare_leaves_handle_untouched() {
        let handle = EngineHandle::start("wg", 2, factory(), "Normals=a").unwrap();
        assert!(handle.prepare("Normals=FAIL").is_err());
        assert_eq!(handle.init_command().unwrap(), "Normals=a");
        assert_eq!(handle.stats().rotations, 0);
    }

    #[test]
    fn start_failure_is_init_error() {
        let err = EngineHandle::start("wg", 1, factory(), "Normals=FAIL").unwrap_err();
        assert!(matches!(err, InitError::EngineInit { .. }));
    }
}
