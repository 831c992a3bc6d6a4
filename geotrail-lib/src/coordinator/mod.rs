//! Single-flight owner of timeline loads.
//!
//! At most one run is live at a time. Each accepted request bumps the run
//! generation; a run may only publish while its generation is current, and the
//! check happens under the same lock `submit` holds while it resets the state.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use serde::Serialize;
use slog::{debug, error, info, o, Logger};
use tokio::sync::watch;

use crate::{
    catalog::MediaCatalog,
    config::PipelineConfig,
    location_log::LogSource,
    pipeline::{LoadRequest, Pipeline},
    progress::CancellationToken,
    timeline::{self, Timeline},
};

#[cfg(test)]
mod tests;

/// Observable state of the current load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadState {
    pub progress: u8,
    pub result: Option<Arc<Timeline>>,
    pub completed: bool,
}

pub struct LoadCoordinator {
    shared: Arc<Shared>,
    log_source: Arc<dyn LogSource>,
    catalog: Arc<dyn MediaCatalog>,
    config: PipelineConfig,
    logger: Logger,
}

struct Shared {
    run: Mutex<ActiveRun>,
    state: watch::Sender<LoadState>,
}

#[derive(Default)]
struct ActiveRun {
    generation: u64,
    request: Option<LoadRequest>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    /// Superseded workers that may still be winding down.
    retired: Vec<JoinHandle<()>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ActiveRun> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `update` if `generation` is still the current run. `update` returns
    /// whether it changed the state.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut LoadState) -> bool) -> bool {
        let run = self.lock();
        if run.generation != generation {
            return false;
        }
        self.state.send_if_modified(update);
        true
    }
}

impl LoadCoordinator {
    pub fn new(log_source: Arc<dyn LogSource>, catalog: Arc<dyn MediaCatalog>) -> Self {
        let (state, _) = watch::channel(LoadState::default());
        Self {
            shared: Arc::new(Shared {
                run: Mutex::new(ActiveRun::default()),
                state,
            }),
            log_source,
            catalog,
            config: PipelineConfig::default(),
            logger: Logger::root(slog::Discard, o!()),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start loading `request`, superseding any run in flight.
    ///
    /// Submitting the request that is already loading or loaded does nothing.
    pub fn submit(&self, request: LoadRequest) {
        let mut run = self.shared.lock();
        if run.request.as_ref() == Some(&request) {
            debug!(self.logger, "ignoring duplicate request");
            return;
        }

        run.cancel.cancel();
        run.retired.retain(|worker| !worker.is_finished());
        if let Some(previous) = run.worker.take() {
            run.retired.push(previous);
        }
        run.generation += 1;
        run.cancel = CancellationToken::new();
        run.request = Some(request.clone());
        self.shared.state.send_replace(LoadState::default());

        let generation = run.generation;
        let logger = self.logger.new(o!("run" => generation));
        info!(logger, "starting load";
            "start" => request.start_time,
            "end" => request.end_time,
            "folders" => request.selected_folders.len(),
        );
        let worker = Worker {
            generation,
            request,
            cancel: run.cancel.clone(),
            shared: Arc::clone(&self.shared),
            log_source: Arc::clone(&self.log_source),
            catalog: Arc::clone(&self.catalog),
            config: self.config.clone(),
            logger: logger.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("timeline-load-{generation}"))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => run.worker = Some(handle),
            Err(e) => {
                error!(logger, "failed to start load"; "error" => e.to_string());
                // leave the request unset so the same request can be retried
                run.request = None;
            }
        }
    }

    pub fn current_state(&self) -> LoadState {
        self.shared.state.borrow().clone()
    }

    /// Watch the load state. Receivers can be dropped at any time.
    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.shared.state.subscribe()
    }

    /// Block until every started run has finished.
    pub fn wait_idle(&self) -> thread::Result<()> {
        let workers: Vec<JoinHandle<()>> = {
            let mut run = self.shared.lock();
            let mut workers = std::mem::take(&mut run.retired);
            workers.extend(run.worker.take());
            workers
        };
        let mut result = Ok(());
        for worker in workers {
            if let Err(panic) = worker.join() {
                error!(self.logger, "load worker panicked");
                result = Err(panic);
            }
        }
        result
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        self.shared.lock().cancel.cancel();
    }
}

struct Worker {
    generation: u64,
    request: LoadRequest,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    log_source: Arc<dyn LogSource>,
    catalog: Arc<dyn MediaCatalog>,
    config: PipelineConfig,
    logger: Logger,
}

impl Worker {
    fn run(self) {
        let on_progress = |value: u8| {
            // completion is published together with the result
            if value >= timeline::PROGRESS_END {
                return;
            }
            self.shared.publish(self.generation, |state| {
                let advanced = value > state.progress;
                if advanced {
                    state.progress = value;
                }
                advanced
            });
        };
        let pipeline = Pipeline::new(
            self.log_source.as_ref(),
            self.catalog.as_ref(),
            &self.config,
            &self.logger,
        );
        let Ok(timeline) = pipeline.run(&self.request, &self.cancel, &on_progress) else {
            debug!(self.logger, "load cancelled");
            return;
        };

        let result = Arc::new(timeline);
        let published = self.shared.publish(self.generation, |state| {
            *state = LoadState {
                progress: timeline::PROGRESS_END,
                result: Some(result),
                completed: true,
            };
            true
        });
        if published {
            info!(self.logger, "load complete");
        } else {
            debug!(self.logger, "discarding result of superseded load");
        }
    }
}
