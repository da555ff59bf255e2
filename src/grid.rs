// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info};
use ndarray::{s, Array3, ArrayView2};
use rayon::prelude::*;

use crate::core::{
    CancelToken, Candidate, Lattice, ObservationSet, ProgressCallback, ProgressInfo, SearchSpace,
    SearchStage,
};
use crate::error::{LocateError, Result};
use crate::misfit::{MisfitEvaluator, MisfitOptions};
use crate::registry::ModelUsage;
use crate::result::{ResultField, SearchResult, Termination};
use crate::velocity::VelocityModel;

/// Default minimum interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Misfit at every point of a search lattice.
///
/// Cells that were never evaluated (cancelled search) hold `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct MisfitField {
    /// Sample positions along x.
    pub x: Vec<f64>,
    /// Sample positions along y.
    pub y: Vec<f64>,
    /// Sample positions along z.
    pub z: Vec<f64>,
    /// Misfit per cell, indexed `[ix, iy, iz]`.
    pub values: Array3<f64>,
    /// Best origin time per cell.
    pub origin_times: Array3<f64>,
    /// Number of cells computed.
    pub evaluated: usize,
}

impl MisfitField {
    /// Number of samples along x, y, z.
    pub fn shape(&self) -> [usize; 3] {
        [self.x.len(), self.y.len(), self.z.len()]
    }

    /// True if the cell was computed.
    pub fn is_evaluated(&self, ix: usize, iy: usize, iz: usize) -> bool {
        self.values
            .get((ix, iy, iz))
            .map(|v| !v.is_nan())
            .unwrap_or(false)
    }

    /// Misfit of a computed cell.
    pub fn value(&self, ix: usize, iy: usize, iz: usize) -> Option<f64> {
        self.values
            .get((ix, iy, iz))
            .copied()
            .filter(|v| !v.is_nan())
    }

    /// Horizontal plane at depth index `iz`, indexed `[ix, iy]`.
    ///
    /// # Panics
    /// Panics if `iz` is out of bounds.
    pub fn slice_xy(&self, iz: usize) -> ArrayView2<'_, f64> {
        self.values.slice(s![.., .., iz])
    }

    /// Index and value of the lowest computed cell, first in enumeration
    /// order on ties.
    pub fn min_cell(&self) -> Option<([usize; 3], f64)> {
        let mut best: Option<([usize; 3], f64)> = None;
        for ((ix, iy, iz), &v) in self.values.indexed_iter() {
            if v.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, b)| v < b) {
                best = Some(([ix, iy, iz], v));
            }
        }
        best
    }
}

/// Exhaustive search over a regular lattice.
///
/// Work is split into (x, y) rows, each a full column in z. Rows are
/// independent and every cell is a pure function of its coordinates, so the
/// field is bit-identical for any thread count.
#[derive(Clone)]
pub struct GridSearchEngine {
    evaluator: MisfitEvaluator,
    num_threads: Option<usize>,
    progress_callback: Option<ProgressCallback>,
    progress_interval: Duration,
}

impl GridSearchEngine {
    /// Create an engine with the given misfit options.
    pub fn new(options: MisfitOptions) -> Self {
        GridSearchEngine {
            evaluator: MisfitEvaluator::new(options),
            num_threads: None,
            progress_callback: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the number of worker threads (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set a progress callback (builder method).
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Set the minimum interval between progress reports (builder method).
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    fn get_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Evaluate every lattice point of `space` and return the best one.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid space or misfit options,
    /// and a thread-pool error if workers cannot be started. A cancelled
    /// search is not an error.
    pub fn search(
        &self,
        space: &SearchSpace,
        observations: &ObservationSet,
        model: &dyn VelocityModel,
        cancel: &CancelToken,
    ) -> Result<SearchResult> {
        self.evaluator.options().validate()?;
        let lattice = Lattice::new(space)?;
        let [nx, ny, nz] = lattice.shape();
        let num_points = lattice.num_points();
        let num_rows = nx * ny;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.get_num_threads())
            .build()
            .map_err(|e| LocateError::ThreadPool(e.to_string()))?;

        debug!(
            "grid search: {}x{}x{} lattice ({} points) with model '{}'",
            nx,
            ny,
            nz,
            num_points,
            model.name()
        );

        let mut values = vec![f64::NAN; num_points];
        let mut origin_times = vec![f64::NAN; num_points];
        let rows_done = AtomicU64::new(0);
        // Misfits are non-negative, so their bit patterns order like the values.
        let best_bits = AtomicU64::new(f64::INFINITY.to_bits());
        let start_time = Instant::now();
        let last_progress = AtomicU64::new(0);
        let interval_ms = self.progress_interval.as_millis() as u64;

        pool.install(|| {
            values
                .par_chunks_mut(nz)
                .zip(origin_times.par_chunks_mut(nz))
                .enumerate()
                .for_each(|(row, (vals, times))| {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let ix = row / ny;
                    let iy = row % ny;
                    let mut row_best = f64::INFINITY;
                    for iz in 0..nz {
                        let position = lattice.point([ix, iy, iz]);
                        let eval = self.evaluator.evaluate(position, observations, model);
                        vals[iz] = eval.misfit;
                        times[iz] = eval.origin_time;
                        row_best = row_best.min(eval.misfit);
                    }
                    best_bits.fetch_min(row_best.to_bits(), Ordering::Relaxed);
                    let done = rows_done.fetch_add(1, Ordering::Relaxed) + 1;

                    if let Some(cb) = &self.progress_callback {
                        let elapsed_ms = start_time.elapsed().as_millis() as u64;
                        let last = last_progress.load(Ordering::Relaxed);
                        if elapsed_ms >= last + interval_ms
                            && last_progress
                                .compare_exchange(
                                    last,
                                    elapsed_ms,
                                    Ordering::Relaxed,
                                    Ordering::Relaxed,
                                )
                                .is_ok()
                        {
                            cb(ProgressInfo {
                                stage: SearchStage::Grid,
                                completed: done,
                                total: num_rows as u64,
                                best_misfit: f64::from_bits(best_bits.load(Ordering::Relaxed)),
                                elapsed: start_time.elapsed(),
                            });
                        }
                    }
                });
        });

        let rows_done = rows_done.load(Ordering::Relaxed);
        let termination = if rows_done < num_rows as u64 {
            Termination::Cancelled
        } else {
            Termination::Exhausted
        };

        let shape = (nx, ny, nz);
        let values = Array3::from_shape_vec(shape, values)
            .map_err(|e| LocateError::config(format!("misfit field shape: {}", e)))?;
        let origin_times = Array3::from_shape_vec(shape, origin_times)
            .map_err(|e| LocateError::config(format!("misfit field shape: {}", e)))?;
        let field = MisfitField {
            x: lattice.axis(0).to_vec(),
            y: lattice.axis(1).to_vec(),
            z: lattice.axis(2).to_vec(),
            values,
            origin_times,
            evaluated: rows_done as usize * nz,
        };

        let best = match field.min_cell() {
            Some((idx, misfit)) => Candidate {
                position: lattice.point(idx),
                origin_time: field.origin_times[(idx[0], idx[1], idx[2])],
                misfit,
            },
            None => Candidate::unevaluated(lattice.point([0, 0, 0])),
        };

        let elapsed = start_time.elapsed();
        if let Some(cb) = &self.progress_callback {
            cb(ProgressInfo {
                stage: SearchStage::Grid,
                completed: rows_done,
                total: num_rows as u64,
                best_misfit: best.misfit,
                elapsed,
            });
        }

        info!(
            "grid search {:?} after {} of {} points in {:.3?}: best ({:.1}, {:.1}, {:.1}) misfit {:.6e}",
            termination,
            field.evaluated,
            num_points,
            elapsed,
            best.position.x,
            best.position.y,
            best.position.z,
            best.misfit
        );

        Ok(SearchResult {
            stage: SearchStage::Grid,
            best,
            evaluations: field.evaluated as u64,
            field: ResultField::Grid(field),
            model: ModelUsage::direct(model.name()),
            elapsed,
            termination,
            under_determined: observations.is_under_determined(),
            slice: None,
        })
    }

    /// Evaluate a single horizontal plane at `depth` over the x-y extent of
    /// `space`, for plotting a misfit map through a chosen hypocenter.
    ///
    /// # Errors
    /// Same as [`GridSearchEngine::search`].
    pub fn slice_at_depth(
        &self,
        space: &SearchSpace,
        depth: f64,
        observations: &ObservationSet,
        model: &dyn VelocityModel,
        cancel: &CancelToken,
    ) -> Result<SearchResult> {
        let mut plane = *space;
        plane.min.z = depth;
        plane.max.z = depth;
        self.search(&plane, observations, model, cancel)
    }
}
