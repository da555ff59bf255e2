// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use thiserror::Error;

use crate::core::Phase;

/// A single travel-time evaluation that cannot be computed.
///
/// These never abort a search: the misfit evaluator converts them into a
/// finite penalty for the offending term.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    /// A source or receiver coordinate is NaN or infinite.
    #[error("non-finite position {coord:?}")]
    NonFinitePosition {
        /// The offending coordinate triple.
        coord: [f64; 3],
    },
    /// The phase velocity is not positive and finite.
    #[error("invalid {phase} velocity: {value} (must be positive and finite)")]
    InvalidVelocity {
        /// The phase requested.
        phase: Phase,
        /// The velocity that was found.
        value: f64,
    },
    /// A depth lies outside `[0, earth_radius]`.
    #[error("depth {depth_km} km outside model range [0, {max_km}] km")]
    DepthOutOfRange {
        /// The requested depth in km.
        depth_km: f64,
        /// The model's earth radius in km.
        max_km: f64,
    },
    /// The ray must cross a region where the phase does not propagate.
    #[error("{phase} phase cannot cross fluid region between {top_km} and {bottom_km} km")]
    OpaqueToPhase {
        /// The phase requested.
        phase: Phase,
        /// Top of the opaque slab in km.
        top_km: f64,
        /// Bottom of the opaque slab in km.
        bottom_km: f64,
    },
    /// The ray-parameter search did not bracket a solution.
    #[error("no ray found for offset {offset_km} km")]
    RayNotFound {
        /// Horizontal offset in km.
        offset_km: f64,
    },
}

/// Errors raised by model loading, configuration, and I/O.
#[derive(Debug, Error)]
pub enum LocateError {
    /// A velocity profile is malformed.
    #[error("model '{model}' failed to initialize: {reason}")]
    ModelInitialization {
        /// The model name.
        model: String,
        /// Why validation failed.
        reason: String,
    },
    /// The registry has no model of that name.
    #[error("unknown velocity model '{0}'")]
    UnknownModel(String),
    /// A search configuration or observation set is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A travel-time calculation failed outside of a search.
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialisation failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing a .npy file failed.
    #[error("npy write error: {0}")]
    Npy(String),
    /// The rayon thread pool could not be built.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
    /// A background search thread panicked.
    #[error("search worker panicked")]
    WorkerPanicked,
}

impl LocateError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LocateError::Configuration(msg.into())
    }

    pub(crate) fn model_init(model: &str, reason: impl Into<String>) -> Self {
        LocateError::ModelInitialization {
            model: model.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for Results with LocateError.
pub type Result<T> = std::result::Result<T, LocateError>;
