//! Thread-based worker pool.
//!
//! Each worker owns a private engine instance and loops pulling tagged tasks
//! from the shared submit channel, pushing tagged replies on the shared
//! complete channel. Callers serialize batches; see [`WorkerPool::run_batch`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::{BioSimError, BioSimResult, ExecutionError, InitError};

use super::{call_guarded, create_guarded, initialize_guarded, EngineCall, EngineFactory, EngineMetadata, TeleIo, SUCCESS};

struct Task {
    batch: u64,
    tag: usize,
    call: EngineCall,
}

struct Completion {
    batch: u64,
    tag: usize,
    reply: TeleIo,
}

type Handshake = (usize, Result<Option<EngineMetadata>, String>);

pub(crate) struct WorkerPool {
    target: String,
    submit_tx: Option<Sender<Task>>,
    complete_rx: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    next_batch: u64,
}

impl WorkerPool {
    /// Spawns `workers` threads and waits for every one to initialize.
    ///
    /// Worker #0 reports the engine metadata before taking tasks. If any worker
    /// fails, the partially started pool is shut down.
    pub(crate) fn start(
        target: &str,
        workers: usize,
        factory: &Arc<dyn EngineFactory>,
        init: &str,
    ) -> Result<(Self, EngineMetadata), InitError> {
        let workers = workers.max(1);
        let (submit_tx, submit_rx) = unbounded::<Task>();
        let (complete_tx, complete_rx) = unbounded::<Completion>();
        let (ready_tx, ready_rx) = bounded::<Handshake>(workers);

        let mut pool = Self {
            target: target.to_string(),
            submit_tx: Some(submit_tx),
            complete_rx,
            workers: Vec::with_capacity(workers),
            next_batch: 0,
        };

        for idx in 0..workers {
            let submit_rx = submit_rx.clone();
            let complete_tx = complete_tx.clone();
            let ready_tx = ready_tx.clone();
            let factory = Arc::clone(factory);
            let init = init.to_string();
            let worker_target = target.to_string();

            let spawned = thread::Builder::new()
                .name(format!("biosim-{target}-{idx}"))
                .spawn(move || worker_loop(idx, &worker_target, factory.as_ref(), &init, ready_tx, &submit_rx, &complete_tx));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.close();
                    return Err(InitError::WorkerSpawn {
                        target: target.to_string(),
                        worker: idx,
                        message: e.to_string(),
                    });
                }
            }
        }
        drop(ready_tx);

        let mut metadata = None;
        let mut failure = None;
        for _ in 0..workers {
            match ready_rx.recv() {
                Ok((_, Ok(Some(meta)))) => metadata = Some(meta),
                Ok((_, Ok(None))) => {}
                Ok((idx, Err(status))) => {
                    warn!(target = %target, worker = idx, %status, "worker failed to initialize");
                    failure.get_or_insert(InitError::EngineInit {
                        target: target.to_string(),
                        message: status,
                    });
                }
                Err(_) => {
                    failure.get_or_insert(InitError::Handshake {
                        target: target.to_string(),
                        message: "a worker exited before reporting".to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(err) = failure {
            pool.close();
            return Err(err);
        }
        let Some(metadata) = metadata else {
            pool.close();
            return Err(InitError::Handshake {
                target: target.to_string(),
                message: "worker 0 did not report engine metadata".to_string(),
            });
        };

        info!(target = %target, workers, "worker pool started");
        Ok((pool, metadata))
    }

    /// Number of workers.
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Submits every call, then drains exactly as many replies and restores
    /// submission order by tag.
    ///
    /// Callers hold the owning handle's guard for the whole call, so at most one
    /// batch is in flight per pool.
    pub(crate) fn run_batch(&mut self, calls: Vec<EngineCall>) -> BioSimResult<Vec<TeleIo>> {
        let batch = self.next_batch;
        self.next_batch = self.next_batch.wrapping_add(1);
        let n = calls.len();

        let Some(submit_tx) = self.submit_tx.as_ref() else {
            return Err(self.disconnected());
        };
        for (tag, call) in calls.into_iter().enumerate() {
            submit_tx
                .send(Task { batch, tag, call })
                .map_err(|_| self.disconnected())?;
        }
        debug!(target = %self.target, batch, n, "batch submitted");

        let mut slots: Vec<Option<TeleIo>> = vec![None; n];
        let mut received = 0;
        while received < n {
            let completion = self.complete_rx.recv().map_err(|_| self.disconnected())?;
            if completion.batch != batch {
                warn!(target = %self.target, stale = completion.batch, batch, "discarding reply from an earlier batch");
                continue;
            }
            match slots.get_mut(completion.tag) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(completion.reply);
                    received += 1;
                }
                _ => {
                    return Err(BioSimError::Execution(ExecutionError::TagViolation {
                        target: self.target.clone(),
                        tag: completion.tag,
                        batch_size: n,
                    }));
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn disconnected(&self) -> BioSimError {
        BioSimError::Execution(ExecutionError::Disconnected {
            target: self.target.clone(),
        })
    }

    /// Closes the submit channel and joins every worker.
    pub(crate) fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        // Workers drain queued tasks, then exit on disconnect.
        drop(self.submit_tx.take());
        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        for handle in workers {
            let _ = handle.join();
        }
        if count > 0 {
            debug!(target = %self.target, workers = count, "worker pool stopped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(
    idx: usize,
    target: &str,
    factory: &dyn EngineFactory,
    init: &str,
    ready_tx: Sender<Handshake>,
    submit_rx: &Receiver<Task>,
    complete_tx: &Sender<Completion>,
) {
    // `ready_tx` must not outlive the handshake.
    let mut engine = match create_guarded(factory, target) {
        Ok(engine) => engine,
        Err(status) => {
            let _ = ready_tx.send((idx, Err(status)));
            return;
        }
    };
    let status = initialize_guarded(engine.as_mut(), init);
    if status != SUCCESS {
        let _ = ready_tx.send((idx, Err(status)));
        return;
    }

    let report = if idx == 0 {
        Some(EngineMetadata::collect(engine.as_ref()))
    } else {
        None
    };
    let sent = ready_tx.send((idx, Ok(report)));
    drop(ready_tx);
    if sent.is_err() {
        return;
    }

    while let Ok(Task { batch, tag, call }) = submit_rx.recv() {
        let reply = call_guarded(engine.as_mut(), &call);
        if complete_tx.send(Completion { batch, tag, reply }).is_err() {
            break;
        }
    }
}
