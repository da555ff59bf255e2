// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Candidate, SearchStage};
use crate::genetic::GenerationRecord;
use crate::grid::MisfitField;
use crate::registry::ModelUsage;

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// Stopped after failing to improve for the configured number of rounds.
    Converged,
    /// Visited the whole lattice or ran every generation.
    Exhausted,
    /// Stopped early by a cancel request.
    Cancelled,
}

/// Uncertainty information attached to a result.
#[derive(Debug, Clone)]
pub enum ResultField {
    /// Misfit at every lattice point (grid search).
    Grid(MisfitField),
    /// Per-generation statistics (genetic search).
    History(Vec<GenerationRecord>),
}

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Engine that produced the result.
    pub stage: SearchStage,
    /// Lowest-misfit candidate found.
    pub best: Candidate,
    /// Misfit field or convergence history.
    pub field: ResultField,
    /// Velocity model used.
    pub model: ModelUsage,
    /// Wall-clock duration of the search.
    pub elapsed: Duration,
    /// Why the search stopped.
    pub termination: Termination,
    /// Fewer than four usable picks were available.
    pub under_determined: bool,
    /// Number of misfit evaluations performed.
    pub evaluations: u64,
    /// Horizontal misfit map through the best depth, attached to genetic
    /// results by the coordinator.
    pub slice: Option<MisfitField>,
}

impl SearchResult {
    /// The misfit field, for grid results.
    pub fn misfit_field(&self) -> Option<&MisfitField> {
        match &self.field {
            ResultField::Grid(field) => Some(field),
            ResultField::History(_) => None,
        }
    }

    /// Generation history, for genetic results.
    pub fn history(&self) -> Option<&[GenerationRecord]> {
        match &self.field {
            ResultField::History(history) => Some(history),
            ResultField::Grid(_) => None,
        }
    }

    /// True if the search ran to its natural end.
    pub fn is_complete(&self) -> bool {
        self.termination != Termination::Cancelled
    }
}
