// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::Array3;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::coordinator::{CrossCheck, LocationOutcome, SearchConfig};
use crate::core::{Candidate, ObservationSet, SearchStage};
use crate::error::{LocateError, Result};
use crate::genetic::GenerationRecord;
use crate::grid::MisfitField;
use crate::registry::ModelUsage;
use crate::result::{SearchResult, Termination};
use crate::velocity::{ModelDescriptor, ModelProfile};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Load a velocity profile from a JSON file.
pub fn load_profile(path: &Path) -> Result<ModelProfile> {
    read_json(path)
}

/// Write a model descriptor back out as a profile JSON file.
pub fn save_profile(descriptor: &ModelDescriptor, path: &Path) -> Result<()> {
    write_json(&descriptor.to_profile(), path)
}

/// Load and validate an observation set from a JSON file.
pub fn load_observations(path: &Path) -> Result<ObservationSet> {
    read_json(path)
}

/// Load a search configuration from a JSON file. The configuration is not
/// validated here.
pub fn load_config(path: &Path) -> Result<SearchConfig> {
    read_json(path)
}

/// Serializable digest of one engine run.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    /// Engine.
    pub stage: SearchStage,
    /// Best candidate.
    pub best: Candidate,
    /// Model used.
    pub model: ModelUsage,
    /// Wall-clock time in seconds.
    pub elapsed_seconds: f64,
    /// Why the search stopped.
    pub termination: Termination,
    /// Fewer than four usable picks.
    pub under_determined: bool,
    /// Misfit evaluations performed.
    pub evaluations: u64,
    /// Lattice shape, for grid results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_shape: Option<[usize; 3]>,
    /// Generation history, for genetic results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<GenerationRecord>>,
    /// Depth and best cell of the x-y misfit slice, if one was mapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<SliceSummary>,
}

/// Where a horizontal misfit slice was taken and its lowest cell.
#[derive(Debug, Clone, Serialize)]
pub struct SliceSummary {
    /// Depth of the plane.
    pub depth: f64,
    /// Samples along x and y.
    pub shape: [usize; 2],
    /// Lowest misfit on the plane.
    pub min_misfit: f64,
}

impl From<&MisfitField> for SliceSummary {
    fn from(field: &MisfitField) -> Self {
        let [nx, ny, _] = field.shape();
        SliceSummary {
            depth: field.z.first().copied().unwrap_or(f64::NAN),
            shape: [nx, ny],
            min_misfit: field.min_cell().map_or(f64::NAN, |(_, v)| v),
        }
    }
}

impl From<&SearchResult> for ResultSummary {
    fn from(result: &SearchResult) -> Self {
        ResultSummary {
            stage: result.stage,
            best: result.best,
            model: result.model.clone(),
            elapsed_seconds: result.elapsed.as_secs_f64(),
            termination: result.termination,
            under_determined: result.under_determined,
            evaluations: result.evaluations,
            field_shape: result.misfit_field().map(MisfitField::shape),
            history: result.history().map(<[GenerationRecord]>::to_vec),
            slice: result.slice.as_ref().map(SliceSummary::from),
        }
    }
}

/// Serializable digest of a location outcome.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    /// Engine that produced the overall best answer.
    pub best_stage: Option<SearchStage>,
    /// Overall best candidate.
    pub best: Option<Candidate>,
    /// Grid result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<ResultSummary>,
    /// Genetic result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genetic: Option<ResultSummary>,
    /// Grid/genetic comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_check: Option<CrossCheck>,
}

impl From<&LocationOutcome> for OutcomeSummary {
    fn from(outcome: &LocationOutcome) -> Self {
        let best = outcome.best();
        OutcomeSummary {
            best_stage: best.map(|r| r.stage),
            best: best.map(|r| r.best),
            grid: outcome.grid.as_ref().map(ResultSummary::from),
            genetic: outcome.genetic.as_ref().map(ResultSummary::from),
            cross_check: outcome.cross_check,
        }
    }
}

/// Write a JSON summary of a location outcome. Non-finite misfits are written
/// as `null`.
pub fn write_summary(outcome: &LocationOutcome, path: &Path) -> Result<()> {
    write_json(&OutcomeSummary::from(outcome), path)
}

/// Save the misfit values of a field to a .npy file, `NaN` marking cells that
/// were not evaluated.
pub fn save_field_npy(field: &MisfitField, path: &Path) -> Result<()> {
    ndarray_npy::write_npy(path, &field.values)
        .map_err(|e| LocateError::Npy(format!("{}: {}", path.display(), e)))
}

/// Save the per-cell origin times of a field to a .npy file.
pub fn save_origin_times_npy(field: &MisfitField, path: &Path) -> Result<()> {
    ndarray_npy::write_npy(path, &field.origin_times)
        .map_err(|e| LocateError::Npy(format!("{}: {}", path.display(), e)))
}

/// Load a 3-D misfit array from a .npy file.
pub fn load_field_npy(path: &Path) -> Result<Array3<f64>> {
    ndarray_npy::read_npy(path).map_err(|e| LocateError::Npy(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::{CancelToken, Point3, ReceiverObservation, SearchSpace};
    use crate::coordinator::{Algorithm, SearchCoordinator};
    use crate::registry::ModelRegistry;

    fn outcome() -> LocationOutcome {
        let obs = ObservationSet::new(vec![
            ReceiverObservation::p("A", Point3::new(0.0, 0.0, 0.0), 1.0),
            ReceiverObservation::p("B", Point3::new(2000.0, 0.0, 0.0), 1.1),
            ReceiverObservation::p("C", Point3::new(0.0, 2000.0, 0.0), 1.05),
        ])
        .unwrap();
        let mut config = SearchConfig::new(SearchSpace::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2000.0, 2000.0, 2000.0),
            [500.0; 3],
        ));
        config.algorithm = Algorithm::Grid;
        SearchCoordinator::new(Arc::new(ModelRegistry::builder().build().unwrap()))
            .with_threads(1)
            .locate(&config, &obs, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn field_npy_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.npy");
        let outcome = outcome();
        let field = outcome.grid.as_ref().unwrap().misfit_field().unwrap();
        save_field_npy(field, &path).unwrap();
        let loaded = load_field_npy(&path).unwrap();
        assert_eq!(loaded.shape(), &[5, 5, 5]);
        assert_eq!(loaded, field.values);

        let times = dir.path().join("t0.npy");
        save_origin_times_npy(field, &times).unwrap();
        assert_eq!(load_field_npy(&times).unwrap(), field.origin_times);
    }

    #[test]
    fn summary_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_summary(&outcome(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["best_stage"], "grid");
        assert_eq!(value["grid"]["termination"], "exhausted");
        assert_eq!(value["grid"]["under_determined"], true);
        assert_eq!(value["grid"]["model"]["resolved"], "simple");
        assert!(value.get("genetic").is_none());
    }

    #[test]
    fn genetic_summary_records_slice() {
        let obs = ObservationSet::new(vec![
            ReceiverObservation::p("A", Point3::new(0.0, 0.0, 0.0), 1.0),
            ReceiverObservation::p("B", Point3::new(2000.0, 0.0, 0.0), 1.1),
            ReceiverObservation::p("C", Point3::new(0.0, 2000.0, 0.0), 1.05),
            ReceiverObservation::p("D", Point3::new(2000.0, 2000.0, 0.0), 1.2),
        ])
        .unwrap();
        let mut config = SearchConfig::new(SearchSpace::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2000.0, 2000.0, 2000.0),
            [500.0; 3],
        ));
        config.genetic.population_size = 20;
        config.genetic.max_generations = 5;
        let outcome = SearchCoordinator::new(Arc::new(ModelRegistry::builder().build().unwrap()))
            .with_threads(1)
            .locate(&config, &obs, &CancelToken::new())
            .unwrap();
        let genetic = outcome.genetic.as_ref().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_summary(&outcome, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let slice = &value["genetic"]["slice"];
        assert_eq!(slice["shape"], serde_json::json!([5, 5]));
        assert_eq!(slice["depth"], genetic.best.position.z);
        assert!(slice["min_misfit"].as_f64().unwrap().is_finite());

        let npy = dir.path().join("slice.npy");
        save_field_npy(genetic.slice.as_ref().unwrap(), &npy).unwrap();
        assert_eq!(load_field_npy(&npy).unwrap().shape(), &[5, 5, 1]);
    }

    #[test]
    fn observations_and_config_load() {
        let dir = tempfile::tempdir().unwrap();
        let obs_path = dir.path().join("obs.json");
        std::fs::write(
            &obs_path,
            r#"{"observations": [{"id": "A", "position": {"x": 0, "y": 0, "z": 0}, "p_arrival": 2.0}]}"#,
        )
        .unwrap();
        let obs = load_observations(&obs_path).unwrap();
        assert_eq!(obs.picks().len(), 1);

        let cfg_path = dir.path().join("cfg.json");
        std::fs::write(
            &cfg_path,
            r#"{"model": "iasp91", "algorithm": "both",
                "space": {"min": {"x": 0, "y": 0, "z": 0}, "max": {"x": 1, "y": 1, "z": 1}, "step": [1, 1, 1]},
                "misfit": {"norm": "l1"}}"#,
        )
        .unwrap();
        let cfg = load_config(&cfg_path).unwrap();
        assert_eq!(cfg.algorithm, Algorithm::Both);
        assert_eq!(cfg.model, "iasp91");
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = load_observations(Path::new("/nonexistent/obs.json"));
        assert!(matches!(result, Err(LocateError::Io(_))));
    }

    #[test]
    fn invalid_observations_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.json");
        std::fs::write(&path, r#"{"observations": []}"#).unwrap();
        assert!(matches!(load_observations(&path), Err(LocateError::Json(_))));
    }

    #[test]
    fn profile_export_reloads() {
        let registry = ModelRegistry::with_defaults().unwrap();
        let descriptor = registry.descriptor("ak135").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ak135.json");
        save_profile(&descriptor, &path).unwrap();
        let profile = load_profile(&path).unwrap();
        let reloaded = ModelDescriptor::from_profile(profile).unwrap();
        assert_eq!(reloaded, *descriptor);
    }
}
