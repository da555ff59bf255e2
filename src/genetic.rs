// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::time::Instant;

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{
    CancelToken, Candidate, ObservationSet, Point3, ProgressCallback, ProgressInfo, SearchSpace,
    SearchStage,
};
use crate::error::{LocateError, Result};
use crate::misfit::{clamp_total, MisfitEvaluator, MisfitOptions};
use crate::registry::ModelUsage;
use crate::result::{ResultField, SearchResult, Termination};
use crate::velocity::VelocityModel;

/// Samples per axis of the coarse lattice used to seed part of the population.
pub const SEED_LATTICE_SIZE: usize = 10;

/// Consecutive stagnant generations after which adaptive mutation kicks in.
const ADAPTIVE_MUTATION_AFTER: usize = 5;
const ADAPTIVE_MUTATION_FACTOR: f64 = 0.8;
const ADAPTIVE_MUTATION_FLOOR: f64 = 0.05;

fn default_population_size() -> usize {
    300
}
fn default_max_generations() -> usize {
    50
}
fn default_mutation_rate() -> f64 {
    0.2
}
fn default_crossover_rate() -> f64 {
    0.8
}
fn default_stagnation_limit() -> usize {
    10
}
fn default_stagnation_epsilon() -> f64 {
    1e-9
}
fn default_tournament_size() -> usize {
    3
}
fn default_elitism() -> usize {
    1
}
fn default_mutation_scale() -> f64 {
    0.1
}
fn default_lattice_seed_fraction() -> f64 {
    0.3
}
fn default_true() -> bool {
    true
}

/// Parent selection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    /// Best of `tournament_size` random draws.
    #[default]
    Tournament,
    /// Fitness-proportionate with fitness `1 / (1 + misfit)`.
    Roulette,
}

/// How two parents are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossoverMethod {
    /// Random convex combination of the parents.
    #[default]
    Blend,
    /// Each coordinate taken from either parent with equal probability.
    Uniform,
}

/// Genetic search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticParams {
    /// Individuals per generation.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Generations to evaluate, counting the initial population.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Per-coordinate mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Probability that a child is produced by crossover.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Stop after this many generations without improvement.
    #[serde(default = "default_stagnation_limit")]
    pub stagnation_limit: usize,
    /// Minimum misfit decrease that counts as improvement.
    #[serde(default = "default_stagnation_epsilon")]
    pub stagnation_epsilon: f64,
    /// Draws per tournament.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Best individuals copied unchanged into the next generation.
    #[serde(default = "default_elitism")]
    pub elitism: usize,
    /// Parent selection method.
    #[serde(default)]
    pub selection: SelectionMethod,
    /// Crossover method.
    #[serde(default)]
    pub crossover: CrossoverMethod,
    /// Maximum mutation step as a fraction of the axis span.
    #[serde(default = "default_mutation_scale")]
    pub mutation_scale: f64,
    /// Fraction of the initial population drawn from a coarse lattice.
    #[serde(default = "default_lattice_seed_fraction")]
    pub lattice_seed_fraction: f64,
    /// Shrink the mutation rate while the search stagnates.
    #[serde(default = "default_true")]
    pub adaptive_mutation: bool,
    /// After a completed search, map the misfit over the x-y plane at the
    /// best depth.
    #[serde(default = "default_true")]
    pub heatmap_slice: bool,
    /// RNG seed; equal seeds give identical searches.
    #[serde(default)]
    pub seed: u64,
}

impl Default for GeneticParams {
    fn default() -> Self {
        GeneticParams {
            population_size: default_population_size(),
            max_generations: default_max_generations(),
            mutation_rate: default_mutation_rate(),
            crossover_rate: default_crossover_rate(),
            stagnation_limit: default_stagnation_limit(),
            stagnation_epsilon: default_stagnation_epsilon(),
            tournament_size: default_tournament_size(),
            elitism: default_elitism(),
            selection: SelectionMethod::default(),
            crossover: CrossoverMethod::default(),
            mutation_scale: default_mutation_scale(),
            lattice_seed_fraction: default_lattice_seed_fraction(),
            adaptive_mutation: true,
            heatmap_slice: true,
            seed: 0,
        }
    }
}

fn check_probability(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(LocateError::config(format!(
            "{} {} must lie in [0, 1]",
            name, value
        )));
    }
    Ok(())
}

impl GeneticParams {
    /// Check the parameters.
    ///
    /// # Errors
    /// Returns a configuration error naming the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(LocateError::config(format!(
                "population_size {} must be at least 2",
                self.population_size
            )));
        }
        if self.max_generations == 0 {
            return Err(LocateError::config("max_generations must be at least 1"));
        }
        if self.stagnation_limit == 0 {
            return Err(LocateError::config("stagnation_limit must be at least 1"));
        }
        if self.tournament_size == 0 {
            return Err(LocateError::config("tournament_size must be at least 1"));
        }
        if self.elitism == 0 || self.elitism >= self.population_size {
            return Err(LocateError::config(format!(
                "elitism {} must be in [1, population_size)",
                self.elitism
            )));
        }
        check_probability("mutation_rate", self.mutation_rate)?;
        check_probability("crossover_rate", self.crossover_rate)?;
        check_probability("lattice_seed_fraction", self.lattice_seed_fraction)?;
        if !self.mutation_scale.is_finite() || self.mutation_scale < 0.0 {
            return Err(LocateError::config(format!(
                "mutation_scale {} must be finite and >= 0",
                self.mutation_scale
            )));
        }
        if !self.stagnation_epsilon.is_finite() || self.stagnation_epsilon < 0.0 {
            return Err(LocateError::config(format!(
                "stagnation_epsilon {} must be finite and >= 0",
                self.stagnation_epsilon
            )));
        }
        Ok(())
    }
}

/// Statistics of one evaluated generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Generation number, 0 for the initial population.
    pub generation: usize,
    /// Lowest misfit in the generation.
    pub best_misfit: f64,
    /// Mean misfit of the generation.
    pub mean_misfit: f64,
    /// Mutation rate used to breed the generation.
    pub mutation_rate: f64,
}

/// Seeded genetic search over hypocenter positions.
///
/// Chromosomes are positions inside the search box. The origin time of every
/// individual is solved analytically by the misfit evaluator. All random draws
/// come from one generator on the calling thread; only evaluation runs in
/// parallel, so a seed reproduces the search exactly for any thread count.
#[derive(Clone)]
pub struct GeneticSearchEngine {
    params: GeneticParams,
    evaluator: MisfitEvaluator,
    num_threads: Option<usize>,
    progress_callback: Option<ProgressCallback>,
}

impl GeneticSearchEngine {
    /// Create an engine.
    pub fn new(params: GeneticParams, options: MisfitOptions) -> Self {
        GeneticSearchEngine {
            params,
            evaluator: MisfitEvaluator::new(options),
            num_threads: None,
            progress_callback: None,
        }
    }

    /// Set the number of worker threads (builder method).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set a progress callback, called once per generation (builder method).
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// The parameters in use.
    pub fn params(&self) -> &GeneticParams {
        &self.params
    }

    fn get_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Run the genetic search inside `space`.
    ///
    /// # Errors
    /// Returns a configuration error for invalid parameters, space or misfit
    /// options, and a thread-pool error if workers cannot be started.
    pub fn search(
        &self,
        space: &SearchSpace,
        observations: &ObservationSet,
        model: &dyn VelocityModel,
        cancel: &CancelToken,
    ) -> Result<SearchResult> {
        self.params.validate()?;
        self.evaluator.options().validate()?;
        space.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.get_num_threads())
            .build()
            .map_err(|e| LocateError::ThreadPool(e.to_string()))?;

        let start_time = Instant::now();
        let params = &self.params;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        let mut history = Vec::with_capacity(params.max_generations);
        let mut best = Candidate::unevaluated(space.min);
        let mut evaluations = 0u64;
        let mut stagnation_count = 0usize;
        let mut mutation_rate = params.mutation_rate;

        debug!(
            "genetic search: population {} x {} generations, seed {}, model '{}'",
            params.population_size,
            params.max_generations,
            params.seed,
            model.name()
        );

        let termination = if cancel.is_cancelled() {
            Termination::Cancelled
        } else {
            let mut population = initial_population(space, params, &mut rng);
            self.evaluate(&pool, &mut population, observations, model);
            evaluations += population.len() as u64;

            let mut generation = 0usize;
            loop {
                let gen_best = fittest(&population);
                let n = population.len() as f64;
                let mean_misfit =
                    clamp_total(population.iter().map(|c| c.misfit / n).sum::<f64>());
                history.push(GenerationRecord {
                    generation,
                    best_misfit: gen_best.misfit,
                    mean_misfit,
                    mutation_rate,
                });

                if gen_best.misfit < best.misfit - params.stagnation_epsilon {
                    stagnation_count = 0;
                } else {
                    stagnation_count += 1;
                }
                if gen_best.misfit < best.misfit {
                    best = gen_best;
                }

                if let Some(cb) = &self.progress_callback {
                    cb(ProgressInfo {
                        stage: SearchStage::Genetic,
                        completed: generation as u64 + 1,
                        total: params.max_generations as u64,
                        best_misfit: best.misfit,
                        elapsed: start_time.elapsed(),
                    });
                }

                if stagnation_count >= params.stagnation_limit {
                    break Termination::Converged;
                }
                if generation + 1 >= params.max_generations {
                    break Termination::Exhausted;
                }
                if cancel.is_cancelled() {
                    break Termination::Cancelled;
                }

                if params.adaptive_mutation && stagnation_count > ADAPTIVE_MUTATION_AFTER {
                    mutation_rate =
                        (mutation_rate * ADAPTIVE_MUTATION_FACTOR).max(ADAPTIVE_MUTATION_FLOOR);
                }

                let elites = params.elitism.min(population.len());
                let mut next = self.breed(&population, space, generation, mutation_rate, &mut rng);
                self.evaluate(&pool, &mut next[elites..], observations, model);
                evaluations += (next.len() - elites) as u64;
                population = next;
                generation += 1;
            }
        };

        let elapsed = start_time.elapsed();
        info!(
            "genetic search {:?} after {} generations in {:.3?}: best ({:.1}, {:.1}, {:.1}) misfit {:.6e}",
            termination,
            history.len(),
            elapsed,
            best.position.x,
            best.position.y,
            best.position.z,
            best.misfit
        );

        Ok(SearchResult {
            stage: SearchStage::Genetic,
            best,
            field: ResultField::History(history),
            model: ModelUsage::direct(model.name()),
            elapsed,
            termination,
            under_determined: observations.is_under_determined(),
            evaluations,
            slice: None,
        })
    }

    fn evaluate(
        &self,
        pool: &rayon::ThreadPool,
        population: &mut [Candidate],
        observations: &ObservationSet,
        model: &dyn VelocityModel,
    ) {
        let evaluator = &self.evaluator;
        pool.install(|| {
            population.par_iter_mut().for_each(|candidate| {
                let eval = evaluator.evaluate(candidate.position, observations, model);
                candidate.origin_time = eval.origin_time;
                candidate.misfit = eval.misfit;
            });
        });
    }

    /// Build the next generation: elites first, then offspring.
    fn breed(
        &self,
        population: &[Candidate],
        space: &SearchSpace,
        generation: usize,
        mutation_rate: f64,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Vec<Candidate> {
        let params = &self.params;
        let mut order: Vec<usize> = (0..population.len()).collect();
        order.sort_by(|&a, &b| population[a].misfit.total_cmp(&population[b].misfit));

        let mut next = Vec::with_capacity(params.population_size);
        for &i in order.iter().take(params.elitism) {
            next.push(population[i]);
        }

        let span = space.span();
        let shrink = 1.0 - 0.5 * generation as f64 / params.max_generations as f64;
        let step = span.map(|s| params.mutation_scale * s * shrink);

        while next.len() < params.population_size {
            let a = population[self.select_index(population, rng)].position;
            let b = population[self.select_index(population, rng)].position;

            let parent = if rng.gen::<f64>() < params.crossover_rate {
                crossover(params.crossover, a, b, rng)
            } else {
                a
            };
            let mut child = parent.to_array();

            for (axis, value) in child.iter_mut().enumerate() {
                if step[axis] > 0.0 && rng.gen::<f64>() < mutation_rate {
                    *value += rng.gen_range(-step[axis]..=step[axis]);
                }
            }
            next.push(Candidate::unevaluated(
                space.clamp(Point3::from_array(child)),
            ));
        }
        next
    }

    fn select_index(&self, population: &[Candidate], rng: &mut Xoshiro256PlusPlus) -> usize {
        match self.params.selection {
            SelectionMethod::Tournament => {
                let mut best_idx = rng.gen_range(0..population.len());
                for _ in 1..self.params.tournament_size {
                    let idx = rng.gen_range(0..population.len());
                    if population[idx].misfit < population[best_idx].misfit {
                        best_idx = idx;
                    }
                }
                best_idx
            }
            SelectionMethod::Roulette => {
                let fitness = |c: &Candidate| 1.0 / (1.0 + c.misfit);
                let total: f64 = population.iter().map(fitness).sum();
                if total <= 0.0 || !total.is_finite() {
                    return rng.gen_range(0..population.len());
                }
                let target = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                for (i, candidate) in population.iter().enumerate() {
                    cumulative += fitness(candidate);
                    if cumulative >= target {
                        return i;
                    }
                }
                population.len() - 1
            }
        }
    }
}

fn crossover(method: CrossoverMethod, a: Point3, b: Point3, rng: &mut Xoshiro256PlusPlus) -> Point3 {
    let (a, b) = (a.to_array(), b.to_array());
    let mut child = [0.0; 3];
    match method {
        CrossoverMethod::Blend => {
            let alpha: f64 = rng.gen();
            for d in 0..3 {
                child[d] = alpha * a[d] + (1.0 - alpha) * b[d];
            }
        }
        CrossoverMethod::Uniform => {
            for d in 0..3 {
                child[d] = if rng.gen_bool(0.5) { a[d] } else { b[d] };
            }
        }
    }
    Point3::from_array(child)
}

/// First candidate with the lowest misfit.
fn fittest(population: &[Candidate]) -> Candidate {
    let mut best = population[0];
    for c in &population[1..] {
        if c.misfit < best.misfit {
            best = *c;
        }
    }
    best
}

fn uniform_in(lo: f64, hi: f64, rng: &mut Xoshiro256PlusPlus) -> f64 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

fn initial_population(
    space: &SearchSpace,
    params: &GeneticParams,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<Candidate> {
    let size = params.population_size;
    let from_lattice = ((size as f64 * params.lattice_seed_fraction).round() as usize).min(size);
    let lo = space.min.to_array();
    let hi = space.max.to_array();
    let span = space.span();

    let mut population = Vec::with_capacity(size);
    for _ in 0..size - from_lattice {
        let p = [
            uniform_in(lo[0], hi[0], rng),
            uniform_in(lo[1], hi[1], rng),
            uniform_in(lo[2], hi[2], rng),
        ];
        population.push(Candidate::unevaluated(Point3::from_array(p)));
    }
    let last = (SEED_LATTICE_SIZE - 1) as f64;
    for _ in 0..from_lattice {
        let mut p = [0.0; 3];
        for d in 0..3 {
            let i = rng.gen_range(0..SEED_LATTICE_SIZE) as f64;
            p[d] = lo[d] + span[d] * i / last;
        }
        population.push(Candidate::unevaluated(space.clamp(Point3::from_array(p))));
    }
    population
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::{Phase, ReceiverObservation};
    use crate::error::CalculationError;
    use crate::velocity::SimpleModel;

    fn space() -> SearchSpace {
        SearchSpace::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10_000.0, 10_000.0, 10_000.0),
            [500.0; 3],
        )
    }

    fn observations(source: Point3) -> ObservationSet {
        let model = SimpleModel::default();
        let receivers = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10_000.0, 0.0, 0.0),
            Point3::new(0.0, 10_000.0, 0.0),
            Point3::new(10_000.0, 10_000.0, 0.0),
            Point3::new(5_000.0, 5_000.0, 0.0),
            Point3::new(2_000.0, 8_000.0, 0.0),
        ];
        let obs = receivers
            .iter()
            .enumerate()
            .map(|(i, &r)| {
                let tp = model.travel_time(source, r, Phase::P).unwrap();
                let ts = model.travel_time(source, r, Phase::S).unwrap();
                ReceiverObservation::p(format!("R{}", i), r, 2.0 + tp).with_s(2.0 + ts)
            })
            .collect();
        ObservationSet::new(obs).unwrap()
    }

    fn params(seed: u64) -> GeneticParams {
        GeneticParams {
            population_size: 60,
            max_generations: 40,
            stagnation_limit: 40,
            seed,
            ..GeneticParams::default()
        }
    }

    #[test]
    fn defaults_parse_from_empty_object() {
        let p: GeneticParams = serde_json::from_str("{}").unwrap();
        assert_eq!(p, GeneticParams::default());
        assert_eq!(p.population_size, 300);
        assert_eq!(p.tournament_size, 3);
    }

    #[test]
    fn invalid_params_rejected() {
        let mut p = GeneticParams::default();
        p.elitism = 0;
        assert!(p.validate().is_err());
        let mut p = GeneticParams::default();
        p.mutation_rate = 1.5;
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("mutation_rate"));
        let mut p = GeneticParams::default();
        p.population_size = 1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn initial_population_respects_box_and_seeding() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let p = GeneticParams {
            population_size: 100,
            ..GeneticParams::default()
        };
        let pop = initial_population(&space(), &p, &mut rng);
        assert_eq!(pop.len(), 100);
        assert!(pop.iter().all(|c| space().contains(&c.position)));
        // The last 30 come from the 10x10x10 seeding lattice.
        let spacing = 10_000.0 / 9.0;
        for c in &pop[70..] {
            for v in c.position.to_array() {
                let k = v / spacing;
                assert!((k - k.round()).abs() < 1e-9, "{} is off-lattice", v);
            }
        }
    }

    #[test]
    fn same_seed_is_bit_identical() {
        let obs = observations(Point3::new(3000.0, 6000.0, 4000.0));
        let model = SimpleModel::default();
        let a = GeneticSearchEngine::new(params(11), MisfitOptions::default())
            .with_threads(1)
            .search(&space(), &obs, &model, &CancelToken::new())
            .unwrap();
        let b = GeneticSearchEngine::new(params(11), MisfitOptions::default())
            .with_threads(4)
            .search(&space(), &obs, &model, &CancelToken::new())
            .unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.history(), b.history());
        assert_eq!(a.evaluations, b.evaluations);
    }

    #[test]
    fn best_misfit_never_increases() {
        let source = Point3::new(3000.0, 6000.0, 4000.0);
        let obs = observations(source);
        let result = GeneticSearchEngine::new(params(3), MisfitOptions::default())
            .search(&space(), &obs, &SimpleModel::default(), &CancelToken::new())
            .unwrap();
        let history = result.history().unwrap();
        assert!(!history.is_empty());
        for w in history.windows(2) {
            assert!(w[1].best_misfit <= w[0].best_misfit);
        }
        assert_eq!(result.best.misfit, history[history.len() - 1].best_misfit);
        assert!(result.best.position.distance(&source) < 2000.0);
        assert!(space().contains(&result.best.position));
    }

    #[test]
    fn stagnation_stops_with_converged() {
        // One pick is fit exactly everywhere, so nothing ever improves on generation 0.
        let obs = ObservationSet::new(vec![ReceiverObservation::p("A", Point3::default(), 1.0)])
            .unwrap();
        let p = GeneticParams {
            population_size: 20,
            max_generations: 100,
            stagnation_limit: 3,
            ..GeneticParams::default()
        };
        let result = GeneticSearchEngine::new(p, MisfitOptions::default())
            .search(&space(), &obs, &SimpleModel::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.termination, Termination::Converged);
        assert_eq!(result.history().unwrap().len(), 4);
        assert!(result.under_determined);
    }

    #[test]
    fn adaptive_mutation_decays_to_floor() {
        let obs = ObservationSet::new(vec![ReceiverObservation::p("A", Point3::default(), 1.0)])
            .unwrap();
        let p = GeneticParams {
            population_size: 10,
            max_generations: 40,
            stagnation_limit: 40,
            ..GeneticParams::default()
        };
        let result = GeneticSearchEngine::new(p, MisfitOptions::default())
            .search(&space(), &obs, &SimpleModel::default(), &CancelToken::new())
            .unwrap();
        let history = result.history().unwrap();
        assert_eq!(history[0].mutation_rate, 0.2);
        let last = history[history.len() - 1].mutation_rate;
        assert!((last - ADAPTIVE_MUTATION_FLOOR).abs() < 1e-12, "{}", last);
        assert_eq!(result.termination, Termination::Exhausted);
    }

    #[test]
    fn cancelled_before_start() {
        let obs = observations(Point3::new(3000.0, 6000.0, 4000.0));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = GeneticSearchEngine::new(params(1), MisfitOptions::default())
            .search(&space(), &obs, &SimpleModel::default(), &cancel)
            .unwrap();
        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.evaluations, 0);
        assert!(result.history().unwrap().is_empty());
    }

    #[test]
    fn cancel_after_three_generations_keeps_history() {
        let obs = observations(Point3::new(3000.0, 6000.0, 4000.0));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let p = params(9);
        let result = GeneticSearchEngine::new(p.clone(), MisfitOptions::default())
            .with_threads(2)
            .with_progress(Arc::new(move |info: ProgressInfo| {
                if info.completed == 3 {
                    trigger.cancel();
                }
            }))
            .search(&space(), &obs, &SimpleModel::default(), &cancel)
            .unwrap();
        assert_eq!(result.termination, Termination::Cancelled);
        let history = result.history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].generation, 2);
        assert_eq!(result.best.misfit, history[2].best_misfit);
        let bred = (p.population_size - p.elitism) as u64;
        assert_eq!(result.evaluations, p.population_size as u64 + 2 * bred);
        assert!(space().contains(&result.best.position));
    }

    struct Untraceable;

    impl VelocityModel for Untraceable {
        fn name(&self) -> &str {
            "untraceable"
        }

        fn travel_time(
            &self,
            source: Point3,
            _receiver: Point3,
            _phase: Phase,
        ) -> std::result::Result<f64, CalculationError> {
            Err(CalculationError::NonFinitePosition {
                coord: source.to_array(),
            })
        }
    }

    #[test]
    fn mean_misfit_stays_finite_when_every_pick_fails() {
        let obs = ObservationSet::new(
            (0..4)
                .map(|i| {
                    ReceiverObservation::p(format!("R{}", i), Point3::new(i as f64, 0.0, 0.0), 1.0)
                        .with_weight(1e300)
                })
                .collect(),
        )
        .unwrap();
        let p = GeneticParams {
            population_size: 16,
            max_generations: 3,
            ..GeneticParams::default()
        };
        let result = GeneticSearchEngine::new(p, MisfitOptions::default())
            .search(&space(), &obs, &Untraceable, &CancelToken::new())
            .unwrap();
        let history = result.history().unwrap();
        assert!(!history.is_empty());
        for record in history {
            assert_eq!(record.best_misfit, f64::MAX);
            assert_eq!(record.mean_misfit, f64::MAX);
        }
    }

    #[test]
    fn roulette_and_uniform_crossover_run() {
        let obs = observations(Point3::new(3000.0, 6000.0, 4000.0));
        let p = GeneticParams {
            selection: SelectionMethod::Roulette,
            crossover: CrossoverMethod::Uniform,
            ..params(5)
        };
        let result = GeneticSearchEngine::new(p, MisfitOptions::default())
            .search(&space(), &obs, &SimpleModel::default(), &CancelToken::new())
            .unwrap();
        assert!(result.best.misfit.is_finite());
        assert!(space().contains(&result.best.position));
    }
}
