// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Seismic hypocenter location by parallel grid and genetic search.
//!
//! Given arrival times of P and S waves at a set of receivers, this library
//! finds the source position and origin time that best explain them. Travel
//! times come from a named velocity model: a homogeneous model, or a 1-D
//! layered earth profile such as iasp91, ak135 or prem. Two search engines
//! minimize the residual misfit: an exhaustive lattice search that also
//! returns the full misfit field, and a seeded genetic search. Both run on a
//! rayon thread pool and give identical answers for any thread count.

#![warn(missing_docs)]

/// Geometry, observations, search spaces, cancellation and progress.
pub mod core;
/// Error types for the library.
pub mod error;
/// Genetic-algorithm search engine.
pub mod genetic;
/// Exhaustive lattice search and the misfit field.
pub mod grid;
/// Velocity models that compute travel times.
pub mod velocity;
/// JSON and .npy file I/O.
pub mod io;
/// Residual misfit between observed and predicted arrivals.
pub mod misfit;
/// Named velocity model registry with fallback.
pub mod registry;
/// Search results.
pub mod result;
/// Runs the engines for a search configuration.
pub mod coordinator;

pub use crate::coordinator::{Algorithm, LocationOutcome, SearchConfig, SearchCoordinator};
pub use crate::core::{
    CancelToken, Candidate, ObservationSet, Phase, Point3, ProgressInfo, ReceiverObservation,
    SearchSpace,
};
pub use crate::error::{CalculationError, LocateError, Result};
pub use crate::genetic::{GeneticParams, GeneticSearchEngine};
pub use crate::grid::{GridSearchEngine, MisfitField};
pub use crate::misfit::{MisfitEvaluator, MisfitNorm, MisfitOptions};
pub use crate::registry::ModelRegistry;
pub use crate::result::{SearchResult, Termination};
pub use crate::velocity::{LayeredModel, SimpleModel, VelocityModel};
