// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Entry point for running a location: validates the request, resolves the
//! velocity model once, and dispatches to the grid and/or genetic engine.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{CancelToken, Lattice, ObservationSet, ProgressCallback, SearchSpace};
use crate::error::{LocateError, Result};
use crate::genetic::{GeneticParams, GeneticSearchEngine};
use crate::grid::GridSearchEngine;
use crate::misfit::MisfitOptions;
use crate::registry::{normalize, ModelRegistry, ModelResolution, SIMPLE_MODEL};
use crate::result::{ResultField, SearchResult};

fn default_model() -> String {
    SIMPLE_MODEL.to_string()
}

/// Which engine(s) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Exhaustive lattice search.
    Grid,
    /// Genetic search.
    #[default]
    Genetic,
    /// Both, with a cross-check of their answers.
    Both,
}

impl Algorithm {
    fn runs_grid(self) -> bool {
        matches!(self, Algorithm::Grid | Algorithm::Both)
    }

    fn runs_genetic(self) -> bool {
        matches!(self, Algorithm::Genetic | Algorithm::Both)
    }
}

/// Everything needed to run one location besides the observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Velocity model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Fail instead of falling back when the model is unavailable.
    #[serde(default)]
    pub strict_model: bool,
    /// Search volume and grid step.
    pub space: SearchSpace,
    /// Engine selection.
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Genetic search parameters.
    #[serde(default)]
    pub genetic: GeneticParams,
    /// Misfit norm and penalty.
    #[serde(default)]
    pub misfit: MisfitOptions,
}

impl SearchConfig {
    /// A configuration with defaults for everything but the search space.
    pub fn new(space: SearchSpace) -> Self {
        SearchConfig {
            model: default_model(),
            strict_model: false,
            space,
            algorithm: Algorithm::default(),
            genetic: GeneticParams::default(),
            misfit: MisfitOptions::default(),
        }
    }

    /// Check every part of the configuration the selected engines will use.
    ///
    /// # Errors
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if normalize(&self.model).is_empty() {
            return Err(LocateError::config("model name is empty"));
        }
        self.space.validate()?;
        self.misfit.validate()?;
        if self.algorithm.runs_grid() {
            Lattice::new(&self.space)?;
        }
        if self.algorithm.runs_genetic() {
            self.genetic.validate()?;
            if self.genetic.heatmap_slice {
                let mut plane = self.space;
                plane.max.z = plane.min.z;
                Lattice::new(&plane)?;
            }
        }
        Ok(())
    }
}

/// Agreement between grid and genetic answers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossCheck {
    /// Distance between the two best positions, metres.
    pub distance: f64,
    /// Genetic misfit minus grid misfit.
    pub misfit_delta: f64,
    /// True if the positions are within one grid-cell diagonal.
    pub agrees: bool,
}

/// Results of one location request.
#[derive(Debug, Clone)]
pub struct LocationOutcome {
    /// Grid search result, if run.
    pub grid: Option<SearchResult>,
    /// Genetic search result, if run.
    pub genetic: Option<SearchResult>,
    /// Comparison of the two, if both ran.
    pub cross_check: Option<CrossCheck>,
}

impl LocationOutcome {
    /// The lowest-misfit result; the grid result wins ties.
    pub fn best(&self) -> Option<&SearchResult> {
        match (&self.grid, &self.genetic) {
            (Some(g), Some(ga)) if ga.best.misfit < g.best.misfit => Some(ga),
            (Some(g), _) => Some(g),
            (None, ga) => ga.as_ref(),
        }
    }
}

/// Runs location requests against a shared model registry.
#[derive(Clone)]
pub struct SearchCoordinator {
    registry: Arc<ModelRegistry>,
    num_threads: Option<usize>,
    progress_callback: Option<ProgressCallback>,
    progress_interval: Option<Duration>,
}

impl SearchCoordinator {
    /// Create a coordinator.
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        SearchCoordinator {
            registry,
            num_threads: None,
            progress_callback: None,
            progress_interval: None,
        }
    }

    /// Set the number of worker threads per search (builder method).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set a progress callback forwarded to the engines (builder method).
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Minimum time between grid progress reports (builder method).
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    /// The registry models are resolved from.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn resolve(&self, config: &SearchConfig) -> Result<ModelResolution> {
        if config.strict_model {
            let model = self.registry.get_model_strict(&config.model)?;
            let name = normalize(&config.model);
            Ok(ModelResolution {
                model,
                requested: name.clone(),
                resolved: name,
                substitution: None,
            })
        } else {
            Ok(self.registry.get_model(&config.model))
        }
    }

    fn grid_engine(&self, options: MisfitOptions) -> GridSearchEngine {
        let mut engine = GridSearchEngine::new(options);
        if let Some(threads) = self.num_threads {
            engine = engine.with_threads(threads);
        }
        if let Some(cb) = &self.progress_callback {
            engine = engine.with_progress(Arc::clone(cb));
        }
        if let Some(interval) = self.progress_interval {
            engine = engine.with_progress_interval(interval);
        }
        engine
    }

    fn genetic_engine(&self, params: GeneticParams, options: MisfitOptions) -> GeneticSearchEngine {
        let mut engine = GeneticSearchEngine::new(params, options);
        if let Some(threads) = self.num_threads {
            engine = engine.with_threads(threads);
        }
        if let Some(cb) = &self.progress_callback {
            engine = engine.with_progress(Arc::clone(cb));
        }
        engine
    }

    /// Locate one event.
    ///
    /// # Errors
    /// Returns a configuration error before any computation if the config is
    /// invalid, and a model error when `strict_model` is set and the model is
    /// unavailable. Cancellation is reported through the results'
    /// termination, not as an error.
    pub fn locate(
        &self,
        config: &SearchConfig,
        observations: &ObservationSet,
        cancel: &CancelToken,
    ) -> Result<LocationOutcome> {
        config.validate()?;
        let resolution = self.resolve(config)?;
        let usage = resolution.usage();
        let model = resolution.model.as_ref();

        if observations.is_under_determined() {
            warn!(
                "only {} usable pick(s): location is under-determined",
                observations.picks().len()
            );
        }

        let grid = if config.algorithm.runs_grid() {
            let mut result = self
                .grid_engine(config.misfit)
                .search(&config.space, observations, model, cancel)?;
            result.model = usage.clone();
            Some(result)
        } else {
            None
        };

        let genetic = if config.algorithm.runs_genetic() {
            let mut result = self
                .genetic_engine(config.genetic.clone(), config.misfit)
                .search(&config.space, observations, model, cancel)?;
            result.model = usage.clone();
            if config.genetic.heatmap_slice && result.is_complete() {
                let slice = self.grid_engine(config.misfit).slice_at_depth(
                    &config.space,
                    result.best.position.z,
                    observations,
                    model,
                    cancel,
                )?;
                if slice.is_complete() {
                    if let ResultField::Grid(field) = slice.field {
                        result.slice = Some(field);
                    }
                }
            }
            Some(result)
        } else {
            None
        };

        let cross_check = match (&grid, &genetic) {
            (Some(g), Some(ga)) => {
                let distance = g.best.position.distance(&ga.best.position);
                Some(CrossCheck {
                    distance,
                    misfit_delta: ga.best.misfit - g.best.misfit,
                    agrees: distance <= config.space.cell_diagonal(),
                })
            }
            _ => None,
        };

        let outcome = LocationOutcome {
            grid,
            genetic,
            cross_check,
        };
        if let Some(best) = outcome.best() {
            info!(
                "located with '{}' ({:?}): ({:.1}, {:.1}, {:.1}) t0 {:.4} s, misfit {:.6e}",
                usage.resolved,
                best.stage,
                best.best.position.x,
                best.best.position.y,
                best.best.position.z,
                best.best.origin_time,
                best.best.misfit
            );
        }
        if let Some(check) = &outcome.cross_check {
            if !check.agrees {
                warn!(
                    "grid and genetic answers are {:.1} m apart (more than one grid cell)",
                    check.distance
                );
            }
        }
        Ok(outcome)
    }

    /// Run a location on a dedicated worker thread.
    ///
    /// # Errors
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn(&self, config: SearchConfig, observations: ObservationSet) -> Result<SearchHandle> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let coordinator = self.clone();
        let thread = std::thread::Builder::new()
            .name("hypolocate-search".to_string())
            .spawn(move || coordinator.locate(&config, &observations, &token))?;
        Ok(SearchHandle { cancel, thread })
    }

    /// Locate several independent events concurrently.
    ///
    /// Each event runs single-threaded; events are spread over the worker
    /// threads. Results are returned in input order.
    pub fn locate_batch(
        &self,
        config: &SearchConfig,
        batch: &[ObservationSet],
        cancel: &CancelToken,
    ) -> Vec<Result<LocationOutcome>> {
        if let Err(e) = config.validate() {
            let msg = e.to_string();
            return batch
                .iter()
                .map(|_| Err(LocateError::Configuration(msg.clone())))
                .collect();
        }
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = self.num_threads {
            builder = builder.num_threads(threads);
        }
        let pool = match builder.build() {
            Ok(pool) => pool,
            Err(e) => {
                let msg = e.to_string();
                return batch
                    .iter()
                    .map(|_| Err(LocateError::ThreadPool(msg.clone())))
                    .collect();
            }
        };

        let single = SearchCoordinator {
            num_threads: Some(1),
            ..self.clone()
        };
        info!("batch location of {} event(s)", batch.len());
        pool.install(|| {
            batch
                .par_iter()
                .map(|observations| single.locate(config, observations, cancel))
                .collect()
        })
    }
}

/// Handle to a location running on a worker thread.
#[derive(Debug)]
pub struct SearchHandle {
    cancel: CancelToken,
    thread: JoinHandle<Result<LocationOutcome>>,
}

impl SearchHandle {
    /// Ask the search to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this search.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// True once the worker has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the search to finish.
    ///
    /// # Errors
    /// Returns the search's own error, or [`LocateError::WorkerPanicked`].
    pub fn join(self) -> Result<LocationOutcome> {
        self.thread
            .join()
            .map_err(|_| LocateError::WorkerPanicked)?
    }
}
