// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use crate::core::{Candidate, ObservationSet, Point3};
use crate::error::{LocateError, Result};
use crate::velocity::VelocityModel;

/// Penalty per unit weight for a pick whose travel time cannot be computed.
pub const DEFAULT_FAILED_TERM_PENALTY: f64 = 1e30;

fn default_penalty() -> f64 {
    DEFAULT_FAILED_TERM_PENALTY
}

/// How residuals are combined into one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisfitNorm {
    /// Weighted sum of squared residuals.
    #[default]
    L2,
    /// Weighted sum of absolute residuals.
    L1,
}

/// Residual norm and failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MisfitOptions {
    /// Residual norm.
    #[serde(default)]
    pub norm: MisfitNorm,
    /// Contribution of a failed term per unit weight.
    #[serde(default = "default_penalty")]
    pub failed_term_penalty: f64,
}

impl Default for MisfitOptions {
    fn default() -> Self {
        MisfitOptions {
            norm: MisfitNorm::L2,
            failed_term_penalty: DEFAULT_FAILED_TERM_PENALTY,
        }
    }
}

impl MisfitOptions {
    /// Check the penalty.
    ///
    /// # Errors
    /// Returns a configuration error if the penalty is not positive and
    /// finite. A zero penalty would let a position where every travel time
    /// fails score a perfect fit.
    pub fn validate(&self) -> Result<()> {
        if !self.failed_term_penalty.is_finite() || self.failed_term_penalty <= 0.0 {
            return Err(LocateError::config(format!(
                "failed_term_penalty {} must be finite and > 0",
                self.failed_term_penalty
            )));
        }
        Ok(())
    }
}

/// Misfit of one trial position with its best origin time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Origin time minimising the misfit at this position.
    pub origin_time: f64,
    /// Misfit at that origin time.
    pub misfit: f64,
    /// Number of picks whose travel time could not be computed.
    pub failed_terms: usize,
}

impl Evaluation {
    /// Attach the evaluation to its position.
    pub fn into_candidate(self, position: Point3) -> Candidate {
        Candidate {
            position,
            origin_time: self.origin_time,
            misfit: self.misfit,
        }
    }
}

/// Scores trial hypocenters against an observation set.
///
/// Every call is a pure function of its inputs, so evaluations can run on
/// any thread in any order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MisfitEvaluator {
    options: MisfitOptions,
}

impl MisfitEvaluator {
    /// Create an evaluator.
    pub fn new(options: MisfitOptions) -> Self {
        MisfitEvaluator { options }
    }

    /// The options in use.
    pub fn options(&self) -> &MisfitOptions {
        &self.options
    }

    #[inline]
    fn term(&self, weight: f64, residual: f64) -> f64 {
        match self.options.norm {
            MisfitNorm::L2 => weight * residual * residual,
            MisfitNorm::L1 => weight * residual.abs(),
        }
    }

    #[inline]
    fn failed(&self, weight: f64) -> f64 {
        weight * self.options.failed_term_penalty
    }

    /// Misfit of a candidate using its own origin time.
    pub fn misfit(
        &self,
        candidate: &Candidate,
        observations: &ObservationSet,
        model: &dyn VelocityModel,
    ) -> f64 {
        let mut total = 0.0;
        for pick in observations.picks() {
            match model.travel_time(candidate.position, pick.receiver, pick.phase) {
                Ok(t) if t.is_finite() => {
                    let residual = candidate.origin_time + t - pick.observed;
                    total += self.term(pick.weight, residual);
                }
                _ => total += self.failed(pick.weight),
            }
        }
        clamp_total(total)
    }

    /// Misfit at a position with the origin time solved analytically.
    ///
    /// Under L2 the origin time is the weighted mean of `observed - travel
    /// time`; under L1 it is the weighted lower median. Failed picks do not
    /// take part in the solve; if all picks fail the origin time is zero.
    pub fn evaluate(
        &self,
        position: Point3,
        observations: &ObservationSet,
        model: &dyn VelocityModel,
    ) -> Evaluation {
        let picks = observations.picks();
        // (observed - travel time, weight) of every pick that traced
        let mut offsets: Vec<(f64, f64)> = Vec::with_capacity(picks.len());
        let mut failed_weight = Vec::new();
        for pick in picks {
            match model.travel_time(position, pick.receiver, pick.phase) {
                Ok(t) if t.is_finite() => offsets.push((pick.observed - t, pick.weight)),
                _ => failed_weight.push(pick.weight),
            }
        }

        let origin_time = match self.options.norm {
            MisfitNorm::L2 => weighted_mean(&offsets),
            MisfitNorm::L1 => weighted_lower_median(&offsets),
        };

        let mut total = 0.0;
        for &(offset, weight) in &offsets {
            total += self.term(weight, origin_time - offset);
        }
        for &weight in &failed_weight {
            total += self.failed(weight);
        }

        Evaluation {
            origin_time,
            misfit: clamp_total(total),
            failed_terms: failed_weight.len(),
        }
    }
}

#[inline]
pub(crate) fn clamp_total(total: f64) -> f64 {
    if total.is_nan() || total > f64::MAX {
        f64::MAX
    } else {
        total
    }
}

fn weighted_mean(values: &[(f64, f64)]) -> f64 {
    let (sum, weight) = values
        .iter()
        .fold((0.0, 0.0), |(s, w), &(v, wt)| (s + v * wt, w + wt));
    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

fn weighted_lower_median(values: &[(f64, f64)]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let half = 0.5 * sorted.iter().map(|&(_, w)| w).sum::<f64>();
    let mut cumulative = 0.0;
    for &(v, w) in &sorted {
        cumulative += w;
        if cumulative >= half {
            return v;
        }
    }
    sorted[sorted.len() - 1].0
}
