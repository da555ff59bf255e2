// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use hypolocate::coordinator::{Algorithm, LocationOutcome, SearchConfig, SearchCoordinator};
use hypolocate::core::{CancelToken, ProgressInfo};
use hypolocate::io;
use hypolocate::registry::{ModelRegistry, ModelStatus};

#[derive(Parser)]
#[command(name = "hypolocate", about = "Seismic hypocenter location by grid and genetic search")]
struct Cli {
    /// Extra velocity profile JSON files, named by file stem (repeatable)
    #[arg(long = "profile", global = true, num_args = 1)]
    profiles: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Locate one event, or several in batch when --observations repeats
    Locate(LocateArgs),
    /// Inspect the velocity model registry
    #[command(subcommand)]
    Models(ModelsCommand),
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List available models
    List,
    /// Load and probe every model
    Validate,
    /// Write a layered model out as profile JSON
    Export {
        /// Model name
        name: String,
        /// Output path
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Grid,
    Genetic,
    Both,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Grid => Algorithm::Grid,
            AlgorithmArg::Genetic => Algorithm::Genetic,
            AlgorithmArg::Both => Algorithm::Both,
        }
    }
}

#[derive(Args)]
struct LocateArgs {
    /// Observation set JSON (repeatable for batch location)
    #[arg(short = 'i', long = "observations", num_args = 1, required = true)]
    observations: Vec<PathBuf>,

    /// Search configuration JSON
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Override the configured velocity model
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Fail instead of falling back when the model is unavailable
    #[arg(long)]
    strict_model: bool,

    /// Override the configured algorithm
    #[arg(short = 'a', long, value_enum)]
    algorithm: Option<AlgorithmArg>,

    /// Override the genetic search seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of Rayon worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Write a JSON summary here (batch: one file per event, suffixed by index)
    #[arg(short = 'o', long)]
    summary: Option<PathBuf>,

    /// Write the grid misfit field here as .npy (single event only)
    #[arg(long)]
    field: Option<PathBuf>,

    /// Write the genetic x-y misfit slice here as .npy (single event only)
    #[arg(long)]
    slice: Option<PathBuf>,

    /// Print search progress to stderr (see --progress-interval)
    #[arg(long)]
    progress: bool,

    /// Progress reporting interval in milliseconds (used with --progress)
    #[arg(long, default_value = "500")]
    progress_interval: u64,
}

fn build_registry(profiles: &[PathBuf]) -> Result<Arc<ModelRegistry>> {
    let mut builder = ModelRegistry::builder().with_builtin_profiles();
    for path in profiles {
        builder = builder.profile_file(path);
    }
    let registry = builder.build().context("failed to build model registry")?;
    Ok(Arc::new(registry))
}

fn progress_printer(interval_ms: u64) -> Arc<dyn Fn(ProgressInfo) + Send + Sync> {
    let last_print = AtomicU64::new(0);
    let start = Instant::now();
    Arc::new(move |info: ProgressInfo| {
        let now_ms = start.elapsed().as_millis() as u64;
        let prev = last_print.load(Ordering::Relaxed);
        if now_ms >= prev + interval_ms || info.completed == info.total {
            last_print.store(now_ms, Ordering::Relaxed);
            eprintln!(
                "[{:.1}s] {:?} {}/{} ({:.0}%) best_misfit={:.6e}",
                info.elapsed.as_secs_f64(),
                info.stage,
                info.completed,
                info.total,
                info.fraction() * 100.0,
                info.best_misfit,
            );
        }
    })
}

fn indexed_path(path: &Path, index: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "summary".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}_{}", stem, index),
    };
    path.with_file_name(name)
}

fn print_outcome(label: &str, outcome: &LocationOutcome) {
    let Some(best) = outcome.best() else {
        println!("{}: no result", label);
        return;
    };
    let c = &best.best;
    println!(
        "{}: x={:.1} y={:.1} z={:.1} t0={:.4} misfit={:.6e} ({:?}, {:?}, model {})",
        label,
        c.position.x,
        c.position.y,
        c.position.z,
        c.origin_time,
        c.misfit,
        best.stage,
        best.termination,
        best.model.resolved,
    );
    if let Some(reason) = &best.model.substitution {
        println!("  model substituted: {}", reason);
    }
    if best.under_determined {
        println!("  warning: fewer than four usable picks, location is under-determined");
    }
    if let Some(check) = &outcome.cross_check {
        println!(
            "  cross-check: grid/genetic distance {:.1} m, misfit delta {:.3e}, agrees={}",
            check.distance, check.misfit_delta, check.agrees
        );
    }
}

fn run_locate(args: &LocateArgs, registry: Arc<ModelRegistry>) -> Result<()> {
    let mut config: SearchConfig = io::load_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.strict_model {
        config.strict_model = true;
    }
    if let Some(algorithm) = args.algorithm {
        config.algorithm = algorithm.into();
    }
    if let Some(seed) = args.seed {
        config.genetic.seed = seed;
    }

    let mut sets = Vec::with_capacity(args.observations.len());
    for path in &args.observations {
        let set = io::load_observations(path)
            .with_context(|| format!("failed to load observations {}", path.display()))?;
        sets.push(set);
    }

    let mut coordinator = SearchCoordinator::new(registry);
    if let Some(threads) = args.threads {
        coordinator = coordinator.with_threads(threads);
    }
    if args.progress {
        coordinator = coordinator
            .with_progress(progress_printer(args.progress_interval))
            .with_progress_interval(Duration::from_millis(args.progress_interval));
    }
    let cancel = CancelToken::new();

    if sets.len() == 1 {
        let outcome = coordinator
            .locate(&config, &sets[0], &cancel)
            .context("location failed")?;
        print_outcome(&args.observations[0].display().to_string(), &outcome);
        if let Some(path) = &args.summary {
            io::write_summary(&outcome, path)
                .with_context(|| format!("failed to write summary {}", path.display()))?;
        }
        if let Some(path) = &args.field {
            match outcome.grid.as_ref().and_then(|r| r.misfit_field()) {
                Some(field) => io::save_field_npy(field, path)
                    .with_context(|| format!("failed to write field {}", path.display()))?,
                None => warn!("--field ignored: no grid search was run"),
            }
        }
        if let Some(path) = &args.slice {
            match outcome.genetic.as_ref().and_then(|r| r.slice.as_ref()) {
                Some(slice) => io::save_field_npy(slice, path)
                    .with_context(|| format!("failed to write slice {}", path.display()))?,
                None => warn!("--slice ignored: no completed genetic search mapped a slice"),
            }
        }
        return Ok(());
    }

    if args.field.is_some() || args.slice.is_some() {
        bail!("--field and --slice are only supported for a single event");
    }
    let results = coordinator.locate_batch(&config, &sets, &cancel);
    let mut failures = 0;
    for (index, (path, result)) in args.observations.iter().zip(&results).enumerate() {
        let label = path.display().to_string();
        match result {
            Ok(outcome) => {
                print_outcome(&label, outcome);
                if let Some(summary) = &args.summary {
                    let out = indexed_path(summary, index);
                    io::write_summary(outcome, &out)
                        .with_context(|| format!("failed to write summary {}", out.display()))?;
                }
            }
            Err(e) => {
                failures += 1;
                println!("{}: failed: {}", label, e);
            }
        }
    }
    info!("batch finished: {} of {} event(s) located", results.len() - failures, results.len());
    if failures > 0 {
        bail!("{} of {} event(s) failed", failures, results.len());
    }
    Ok(())
}

fn run_models(command: &ModelsCommand, registry: &ModelRegistry) -> Result<()> {
    match command {
        ModelsCommand::List => {
            for name in registry.list_available() {
                let description = registry.description(&name).unwrap_or_default();
                println!("{:<12} {}", name, description);
            }
        }
        ModelsCommand::Validate => {
            let report = registry.validate_all();
            let mut unavailable = 0;
            for (name, status) in &report {
                match status {
                    ModelStatus::Ok { probe_travel_time } => {
                        println!("{:<12} ok (probe P time {:.6} s)", name, probe_travel_time)
                    }
                    ModelStatus::Unavailable { reason } => {
                        unavailable += 1;
                        println!("{:<12} unavailable: {}", name, reason);
                    }
                }
            }
            if unavailable > 0 {
                bail!("{} model(s) unavailable", unavailable);
            }
        }
        ModelsCommand::Export { name, output } => {
            let Some(descriptor) = registry.descriptor(name) else {
                bail!("'{}' is not an available layered model", name);
            };
            io::save_profile(&descriptor, output)
                .with_context(|| format!("failed to write profile {}", output.display()))?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let registry = build_registry(&cli.profiles)?;

    match &cli.command {
        Command::Locate(args) => run_locate(args, registry),
        Command::Models(command) => run_models(command, &registry),
    }
}
