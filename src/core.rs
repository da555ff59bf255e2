// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LocateError, Result};

/// Upper bound on the number of lattice points a single grid search may visit.
pub const MAX_LATTICE_POINTS: usize = 50_000_000;

/// A point in the common Cartesian frame, in metres. `z` is depth, positive down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
    /// Depth below the surface.
    pub z: f64,
}

impl Point3 {
    /// Create a point from its coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Point3 { x, y, z }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Horizontal (x-y) distance to another point.
    pub fn horizontal_distance(&self, other: &Point3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// True when every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Coordinates as an array in x, y, z order.
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Build a point from an x, y, z array.
    pub fn from_array(a: [f64; 3]) -> Self {
        Point3::new(a[0], a[1], a[2])
    }
}

/// Seismic wave phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Compressional wave.
    P,
    /// Shear wave.
    S,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::P => write!(f, "P"),
            Phase::S => write!(f, "S"),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

/// Arrival times picked at one receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverObservation {
    /// Receiver identifier, unique within an observation set.
    pub id: String,
    /// Receiver position.
    pub position: Point3,
    /// Observed P arrival in seconds.
    #[serde(default)]
    pub p_arrival: Option<f64>,
    /// Observed S arrival in seconds.
    #[serde(default)]
    pub s_arrival: Option<f64>,
    /// Relative weight of this receiver's picks.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl ReceiverObservation {
    /// Observation with a P pick and unit weight.
    pub fn p(id: impl Into<String>, position: Point3, arrival: f64) -> Self {
        ReceiverObservation {
            id: id.into(),
            position,
            p_arrival: Some(arrival),
            s_arrival: None,
            weight: 1.0,
        }
    }

    /// Set the S pick (builder method).
    pub fn with_s(mut self, arrival: f64) -> Self {
        self.s_arrival = Some(arrival);
        self
    }

    /// Set the weight (builder method).
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Observed arrival for a phase, if picked.
    pub fn arrival(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::P => self.p_arrival,
            Phase::S => self.s_arrival,
        }
    }
}

/// One usable arrival: a receiver, a phase, and its observed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pick {
    /// Receiver position.
    pub receiver: Point3,
    /// Phase of the arrival.
    pub phase: Phase,
    /// Observed arrival time in seconds.
    pub observed: f64,
    /// Weight of the residual.
    pub weight: f64,
}

#[derive(Deserialize)]
struct RawObservationSet {
    observations: Vec<ReceiverObservation>,
}

/// A validated set of receiver observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawObservationSet")]
pub struct ObservationSet {
    observations: Vec<ReceiverObservation>,
    #[serde(skip)]
    picks: Vec<Pick>,
}

impl TryFrom<RawObservationSet> for ObservationSet {
    type Error = LocateError;

    fn try_from(raw: RawObservationSet) -> Result<Self> {
        ObservationSet::new(raw.observations)
    }
}

impl ObservationSet {
    /// Validate and build an observation set.
    ///
    /// # Errors
    /// Returns a configuration error if the list is empty, an id repeats, a
    /// position or weight is invalid, or no usable pick remains.
    pub fn new(observations: Vec<ReceiverObservation>) -> Result<Self> {
        if observations.is_empty() {
            return Err(LocateError::config("at least one observation is required"));
        }

        let mut seen = HashSet::new();
        for obs in &observations {
            if !seen.insert(obs.id.as_str()) {
                return Err(LocateError::config(format!(
                    "duplicate receiver id '{}'",
                    obs.id
                )));
            }
            if !obs.position.is_finite() {
                return Err(LocateError::config(format!(
                    "receiver '{}' has a non-finite position",
                    obs.id
                )));
            }
            if !obs.weight.is_finite() || obs.weight < 0.0 {
                return Err(LocateError::config(format!(
                    "receiver '{}' has invalid weight {} (must be finite and >= 0)",
                    obs.id, obs.weight
                )));
            }
        }

        let mut picks = Vec::new();
        for obs in &observations {
            if obs.weight <= 0.0 {
                continue;
            }
            for phase in [Phase::P, Phase::S] {
                if let Some(t) = obs.arrival(phase) {
                    if t.is_finite() {
                        picks.push(Pick {
                            receiver: obs.position,
                            phase,
                            observed: t,
                            weight: obs.weight,
                        });
                    }
                }
            }
        }

        if picks.is_empty() {
            return Err(LocateError::config(
                "no usable arrival: every pick is missing, non-finite, or zero-weight",
            ));
        }

        Ok(ObservationSet {
            observations,
            picks,
        })
    }

    /// The receiver observations, in input order.
    pub fn observations(&self) -> &[ReceiverObservation] {
        &self.observations
    }

    /// Usable picks, in receiver order with P before S.
    pub fn picks(&self) -> &[Pick] {
        &self.picks
    }

    /// Fewer than four usable picks cannot constrain x, y, z and t0.
    pub fn is_under_determined(&self) -> bool {
        self.picks.len() < 4
    }
}

/// Axis-aligned search volume plus grid step per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Lower corner.
    pub min: Point3,
    /// Upper corner.
    pub max: Point3,
    /// Grid step along x, y, z.
    pub step: [f64; 3],
}

impl SearchSpace {
    /// Create a search space.
    pub fn new(min: Point3, max: Point3, step: [f64; 3]) -> Self {
        SearchSpace { min, max, step }
    }

    /// Check bounds and steps.
    ///
    /// # Errors
    /// Returns a configuration error for non-finite values, an empty box, or a
    /// non-positive step.
    pub fn validate(&self) -> Result<()> {
        let lo = self.min.to_array();
        let hi = self.max.to_array();
        for axis in 0..3 {
            if !lo[axis].is_finite() || !hi[axis].is_finite() {
                return Err(LocateError::config(format!(
                    "search bounds on axis {} are not finite",
                    axis
                )));
            }
            if lo[axis] > hi[axis] {
                return Err(LocateError::config(format!(
                    "empty bounding box: axis {} min {} > max {}",
                    axis, lo[axis], hi[axis]
                )));
            }
            let step = self.step[axis];
            if !step.is_finite() || step <= 0.0 {
                return Err(LocateError::config(format!(
                    "grid step on axis {} is {} (must be positive and finite)",
                    axis, step
                )));
            }
        }
        Ok(())
    }

    /// Extent along each axis.
    pub fn span(&self) -> [f64; 3] {
        [
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z,
        ]
    }

    /// True if the point lies inside the box (inclusive).
    pub fn contains(&self, p: &Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Clamp a point into the box.
    pub fn clamp(&self, p: Point3) -> Point3 {
        Point3::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
            p.z.clamp(self.min.z, self.max.z),
        )
    }

    /// Length of one grid cell's diagonal.
    pub fn cell_diagonal(&self) -> f64 {
        self.step.iter().map(|s| s * s).sum::<f64>().sqrt()
    }
}

/// A trial hypocenter with its origin time and misfit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Trial position.
    pub position: Point3,
    /// Trial origin time in seconds.
    pub origin_time: f64,
    /// Misfit against the observations; lower is better.
    pub misfit: f64,
}

impl Candidate {
    /// A candidate that has not been evaluated yet.
    pub fn unevaluated(position: Point3) -> Self {
        Candidate {
            position,
            origin_time: 0.0,
            misfit: f64::INFINITY,
        }
    }
}

/// Lattice of sample points covering a search space.
///
/// Points are enumerated in ascending x, then y, then z: the flat index is
/// `ix * ny * nz + iy * nz + iz`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
    axes: [Vec<f64>; 3],
    shape: [usize; 3],
    strides: [usize; 3],
}

impl Lattice {
    /// Build the lattice for a search space.
    ///
    /// # Errors
    /// Returns a configuration error if the space is invalid or the lattice
    /// exceeds [`MAX_LATTICE_POINTS`].
    pub fn new(space: &SearchSpace) -> Result<Self> {
        space.validate()?;
        let lo = space.min.to_array();
        let hi = space.max.to_array();
        let counts = [
            Lattice::axis_len(lo[0], hi[0], space.step[0]),
            Lattice::axis_len(lo[1], hi[1], space.step[1]),
            Lattice::axis_len(lo[2], hi[2], space.step[2]),
        ];
        let limit = MAX_LATTICE_POINTS as f64;
        if counts.iter().any(|&n| n > limit) || counts.iter().product::<f64>() > limit {
            return Err(LocateError::config(format!(
                "lattice of about {:.0} x {:.0} x {:.0} points exceeds {} points",
                counts[0], counts[1], counts[2], MAX_LATTICE_POINTS
            )));
        }

        let axes = [
            Lattice::axis_values(lo[0], hi[0], space.step[0]),
            Lattice::axis_values(lo[1], hi[1], space.step[1]),
            Lattice::axis_values(lo[2], hi[2], space.step[2]),
        ];
        let shape = [axes[0].len(), axes[1].len(), axes[2].len()];

        let mut strides = [0usize; 3];
        strides[2] = 1;
        for d in (0..2).rev() {
            strides[d] = strides[d + 1] * shape[d + 1];
        }

        Ok(Lattice {
            axes,
            shape,
            strides,
        })
    }

    /// Number of values [`Lattice::axis_values`] yields, computed without
    /// allocating them.
    pub fn axis_len(min: f64, max: f64, step: f64) -> f64 {
        let span = max - min;
        if span <= 0.0 {
            return 1.0;
        }
        let full_steps = (span / step).floor();
        if full_steps + 1.0 > MAX_LATTICE_POINTS as f64 {
            return full_steps + 2.0;
        }
        let last = min + full_steps * step;
        if max - last > 1e-9 * step {
            full_steps + 2.0
        } else {
            full_steps + 1.0
        }
    }

    /// Sample positions along one axis.
    ///
    /// Starts at `min` and advances by `step`. If the step divides the span
    /// exactly the last value is `max`; otherwise `max` is appended as a final
    /// partial step so the whole interval is covered.
    pub fn axis_values(min: f64, max: f64, step: f64) -> Vec<f64> {
        let span = max - min;
        if span <= 0.0 {
            return vec![min];
        }
        let full_steps = (span / step).floor() as usize;
        let mut values: Vec<f64> = (0..=full_steps)
            .map(|i| min + i as f64 * step)
            .collect();
        let tol = 1e-9 * step;
        let last = values[values.len() - 1];
        if max - last > tol {
            values.push(max);
        } else {
            let n = values.len();
            values[n - 1] = max;
        }
        values
    }

    /// Number of points along each axis.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Row-major strides.
    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }

    /// Sample positions along an axis (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> &[f64] {
        &self.axes[axis]
    }

    /// Total number of lattice points.
    pub fn num_points(&self) -> usize {
        self.shape.iter().product()
    }

    /// Convert a flat index to a 3-D index.
    pub fn flat_to_nd(&self, flat: usize) -> [usize; 3] {
        let mut idx = [0usize; 3];
        let mut remainder = flat;
        for d in 0..3 {
            idx[d] = remainder / self.strides[d];
            remainder %= self.strides[d];
        }
        idx
    }

    /// Convert a 3-D index to a flat index.
    pub fn nd_to_flat(&self, idx: [usize; 3]) -> usize {
        idx.iter().zip(self.strides.iter()).map(|(i, s)| i * s).sum()
    }

    /// Position of a lattice point.
    pub fn point(&self, idx: [usize; 3]) -> Point3 {
        Point3::new(
            self.axes[0][idx[0]],
            self.axes[1][idx[1]],
            self.axes[2][idx[2]],
        )
    }
}

/// Cooperative cancellation flag shared between a caller and a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation. Engines observe it at their next loop boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Progress information passed to the optional callback.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    /// Which engine is reporting.
    pub stage: SearchStage,
    /// Units of work done (lattice rows or generations).
    pub completed: u64,
    /// Total units of work.
    pub total: u64,
    /// Best misfit seen so far.
    pub best_misfit: f64,
    /// Elapsed time since the search started.
    pub elapsed: Duration,
}

impl ProgressInfo {
    /// Completion fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Engine reporting a [`ProgressInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStage {
    /// Exhaustive lattice search.
    Grid,
    /// Genetic-algorithm search.
    Genetic,
}

/// Progress callback shared with engines.
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;
