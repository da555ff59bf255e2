// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Named velocity models with lazy loading and graceful fallback.
//!
//! Layered models are parsed and validated on first use. A model that fails
//! to load is reported once and thereafter resolved to the homogeneous model,
//! with the reason carried alongside so the caller can record it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::{Phase, Point3};
use crate::error::{LocateError, Result};
use crate::velocity::{LayeredModel, ModelDescriptor, ModelProfile, SimpleModel, VelocityModel};

/// Name under which the homogeneous model is always registered.
pub const SIMPLE_MODEL: &str = "simple";

/// Probe ray used to check that a model produces a travel time at all.
pub const PROBE_SOURCE: Point3 = Point3::new(0.0, 0.0, 1000.0);
/// Receiver end of the probe ray.
pub const PROBE_RECEIVER: Point3 = Point3::new(1000.0, 0.0, 0.0);

const BUILTIN_PROFILES: [(&str, &str); 3] = [
    ("iasp91", include_str!("../models/iasp91.json")),
    ("ak135", include_str!("../models/ak135.json")),
    ("prem", include_str!("../models/prem.json")),
];

#[derive(Debug, Clone)]
enum ProfileSource {
    Json(String),
    File(PathBuf),
}

type Loaded = std::result::Result<Arc<LayeredModel>, String>;

#[derive(Debug)]
struct Entry {
    source: ProfileSource,
    cell: OnceLock<Loaded>,
}

/// The model chosen for a request, plus why it differs from the request.
#[derive(Clone)]
pub struct ModelResolution {
    /// Model to evaluate travel times with.
    pub model: Arc<dyn VelocityModel>,
    /// Name that was asked for (normalised).
    pub requested: String,
    /// Name of the model actually returned.
    pub resolved: String,
    /// Reason for substituting the homogeneous model, if it was substituted.
    pub substitution: Option<String>,
}

impl ModelResolution {
    /// Serializable summary of the resolution.
    pub fn usage(&self) -> ModelUsage {
        ModelUsage {
            requested: self.requested.clone(),
            resolved: self.resolved.clone(),
            substitution: self.substitution.clone(),
        }
    }
}

impl std::fmt::Debug for ModelResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResolution")
            .field("requested", &self.requested)
            .field("resolved", &self.resolved)
            .field("substitution", &self.substitution)
            .finish()
    }
}

/// Which model a search ran with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Name that was asked for.
    pub requested: String,
    /// Name of the model used.
    pub resolved: String,
    /// Reason for falling back, if any.
    pub substitution: Option<String>,
}

impl ModelUsage {
    /// Usage of a model passed in directly, without registry resolution.
    pub fn direct(name: &str) -> Self {
        ModelUsage {
            requested: name.to_string(),
            resolved: name.to_string(),
            substitution: None,
        }
    }
}

/// Outcome of loading and probing one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ModelStatus {
    /// Loaded and produced a finite probe travel time.
    Ok {
        /// P travel time of the probe ray, seconds.
        probe_travel_time: f64,
    },
    /// Failed to load or to trace the probe ray.
    Unavailable {
        /// Why.
        reason: String,
    },
}

impl ModelStatus {
    /// True for [`ModelStatus::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ModelStatus::Ok { .. })
    }
}

pub(crate) fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn probe(model: &dyn VelocityModel) -> std::result::Result<f64, String> {
    match model.travel_time(PROBE_SOURCE, PROBE_RECEIVER, Phase::P) {
        Ok(t) if t.is_finite() && t > 0.0 => Ok(t),
        Ok(t) => Err(format!("probe travel time {} is not a positive finite number", t)),
        Err(e) => Err(format!("probe ray failed: {}", e)),
    }
}

fn load(name: &str, source: &ProfileSource) -> Loaded {
    let text = match source {
        ProfileSource::Json(text) => text.clone(),
        ProfileSource::File(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?,
    };
    let mut profile = ModelProfile::from_json(&text).map_err(|e| e.to_string())?;
    // Models answer to the name they are registered under.
    profile.name = name.to_string();
    let descriptor = ModelDescriptor::from_profile(profile).map_err(|e| match e {
        LocateError::ModelInitialization { reason, .. } => reason,
        other => other.to_string(),
    })?;
    let model = LayeredModel::new(Arc::new(descriptor));
    let t = probe(&model)?;
    debug!(
        "loaded velocity model '{}' ({} layers, probe {:.4} s)",
        name,
        model.descriptor().layers().len(),
        t
    );
    Ok(Arc::new(model))
}

/// Builder for a [`ModelRegistry`].
#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    simple: SimpleModel,
    entries: Vec<(String, ProfileSource)>,
}

impl ModelRegistryBuilder {
    /// Use a custom homogeneous model (default 5500 / 3200 m/s).
    pub fn simple(mut self, model: SimpleModel) -> Self {
        self.simple = model;
        self
    }

    /// Register the embedded iasp91, ak135 and prem profiles.
    pub fn with_builtin_profiles(mut self) -> Self {
        for (name, text) in BUILTIN_PROFILES {
            self.entries
                .push((name.to_string(), ProfileSource::Json(text.to_string())));
        }
        self
    }

    /// Register a profile from JSON text under `name`.
    pub fn profile_json(mut self, name: &str, text: impl Into<String>) -> Self {
        self.entries
            .push((normalize(name), ProfileSource::Json(text.into())));
        self
    }

    /// Register a profile file; the model is named after the file stem.
    pub fn profile_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| normalize(&s.to_string_lossy()))
            .unwrap_or_default();
        self.entries
            .push((name, ProfileSource::File(path.to_path_buf())));
        self
    }

    /// Build the registry. Profiles are not read until first requested.
    ///
    /// # Errors
    /// Returns a configuration error if the homogeneous model is invalid, a
    /// profile name is empty or reserved, or a name is registered twice.
    pub fn build(self) -> Result<ModelRegistry> {
        self.simple.validate()?;
        let mut entries = BTreeMap::new();
        for (name, source) in self.entries {
            if name.is_empty() {
                return Err(LocateError::config("velocity model name is empty"));
            }
            if name == SIMPLE_MODEL {
                return Err(LocateError::config(format!(
                    "model name '{}' is reserved",
                    SIMPLE_MODEL
                )));
            }
            let entry = Entry {
                source,
                cell: OnceLock::new(),
            };
            if entries.insert(name.clone(), entry).is_some() {
                return Err(LocateError::config(format!(
                    "velocity model '{}' registered twice",
                    name
                )));
            }
        }
        info!(
            "model registry ready: {} layered profile(s) plus '{}'",
            entries.len(),
            SIMPLE_MODEL
        );
        Ok(ModelRegistry {
            simple: Arc::new(self.simple),
            entries,
        })
    }
}

/// Store of named velocity models shared read-only between searches.
#[derive(Debug)]
pub struct ModelRegistry {
    simple: Arc<SimpleModel>,
    entries: BTreeMap<String, Entry>,
}

impl ModelRegistry {
    /// Start building a registry.
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Registry with the default homogeneous model and the built-in profiles.
    pub fn with_defaults() -> Result<Self> {
        ModelRegistry::builder().with_builtin_profiles().build()
    }

    /// The homogeneous model.
    pub fn simple(&self) -> Arc<SimpleModel> {
        Arc::clone(&self.simple)
    }

    fn loaded(&self, name: &str) -> Option<&Loaded> {
        self.entries
            .get(name)
            .map(|entry| entry.cell.get_or_init(|| load(name, &entry.source)))
    }

    fn fallback(&self, requested: String, reason: String) -> ModelResolution {
        warn!(
            "velocity model '{}' unavailable, using '{}': {}",
            requested, SIMPLE_MODEL, reason
        );
        ModelResolution {
            model: self.simple.clone(),
            requested,
            resolved: SIMPLE_MODEL.to_string(),
            substitution: Some(reason),
        }
    }

    /// Resolve a model by name. Never fails: an unknown or broken model is
    /// replaced by the homogeneous model and the reason recorded.
    pub fn get_model(&self, name: &str) -> ModelResolution {
        let requested = normalize(name);
        if requested == SIMPLE_MODEL {
            return ModelResolution {
                model: self.simple.clone(),
                requested: requested.clone(),
                resolved: requested,
                substitution: None,
            };
        }
        match self.loaded(&requested) {
            Some(Ok(model)) => ModelResolution {
                model: model.clone(),
                resolved: requested.clone(),
                requested,
                substitution: None,
            },
            Some(Err(reason)) => {
                let reason = format!("model '{}' failed to initialize: {}", requested, reason);
                self.fallback(requested, reason)
            }
            None => {
                let reason = LocateError::UnknownModel(requested.clone()).to_string();
                self.fallback(requested, reason)
            }
        }
    }

    /// Resolve a model by name without fallback.
    ///
    /// # Errors
    /// Returns [`LocateError::UnknownModel`] or
    /// [`LocateError::ModelInitialization`].
    pub fn get_model_strict(&self, name: &str) -> Result<Arc<dyn VelocityModel>> {
        let requested = normalize(name);
        if requested == SIMPLE_MODEL {
            let model: Arc<dyn VelocityModel> = self.simple.clone();
            return Ok(model);
        }
        match self.loaded(&requested) {
            Some(Ok(model)) => {
                let model: Arc<dyn VelocityModel> = model.clone();
                Ok(model)
            }
            Some(Err(reason)) => Err(LocateError::model_init(&requested, reason.clone())),
            None => Err(LocateError::UnknownModel(requested)),
        }
    }

    /// Registered names, minus models already known to have failed.
    pub fn list_available(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !matches!(entry.cell.get(), Some(Err(_))))
            .map(|(name, _)| name.clone())
            .collect();
        names.insert(SIMPLE_MODEL.to_string());
        names
    }

    /// Load and probe every registered model.
    pub fn validate_all(&self) -> BTreeMap<String, ModelStatus> {
        let mut report = BTreeMap::new();
        let simple = match probe(self.simple.as_ref()) {
            Ok(t) => ModelStatus::Ok {
                probe_travel_time: t,
            },
            Err(reason) => ModelStatus::Unavailable { reason },
        };
        report.insert(SIMPLE_MODEL.to_string(), simple);

        for name in self.entries.keys() {
            let status = match self.loaded(name) {
                Some(Ok(model)) => match probe(model.as_ref()) {
                    Ok(t) => ModelStatus::Ok {
                        probe_travel_time: t,
                    },
                    Err(reason) => ModelStatus::Unavailable { reason },
                },
                Some(Err(reason)) => ModelStatus::Unavailable {
                    reason: reason.clone(),
                },
                None => continue,
            };
            if let ModelStatus::Unavailable { reason } = &status {
                warn!("velocity model '{}' is unavailable: {}", name, reason);
            }
            report.insert(name.clone(), status);
        }
        report
    }

    /// Descriptor of a layered model, loading it if needed.
    pub fn descriptor(&self, name: &str) -> Option<Arc<ModelDescriptor>> {
        match self.loaded(&normalize(name)) {
            Some(Ok(model)) => Some(Arc::clone(model.descriptor())),
            _ => None,
        }
    }

    /// Human-readable description of a model.
    pub fn description(&self, name: &str) -> Option<String> {
        let name = normalize(name);
        if name == SIMPLE_MODEL {
            return Some(format!(
                "Homogeneous model (vp = {} m/s, vs = {} m/s)",
                self.simple.vp, self.simple.vs
            ));
        }
        self.descriptor(&name).map(|d| {
            if d.source().is_empty() {
                d.description().to_string()
            } else {
                format!("{} [{}]", d.description(), d.source())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAD_PROFILE: &str = r#"{
        "name": "broken",
        "layers": [
            {"depth": 0.0, "vp": 5.8, "vs": 3.4, "density": 2.7},
            {"depth": 30.0, "vp": 6.5, "vs": 3.7, "density": 2.9},
            {"depth": 10.0, "vp": 8.0, "vs": 4.5, "density": 3.3}
        ]
    }"#;

    const CRUST: &str = r#"{
        "name": "crust",
        "layers": [
            {"depth": 0.0, "vp": 5.5, "vs": 3.2, "density": 2.7},
            {"depth": 40.0, "vp": 6.8, "vs": 3.9, "density": 2.9}
        ]
    }"#;

    fn registry() -> ModelRegistry {
        ModelRegistry::builder()
            .with_builtin_profiles()
            .profile_json("Broken", BAD_PROFILE)
            .profile_json("crust", CRUST)
            .build()
            .unwrap()
    }

    #[test]
    fn simple_is_always_present() {
        let reg = ModelRegistry::builder().build().unwrap();
        let res = reg.get_model("SIMPLE");
        assert_eq!(res.resolved, "simple");
        assert!(res.substitution.is_none());
        assert!(reg.list_available().contains("simple"));
    }

    #[test]
    fn builtin_profiles_load_and_probe() {
        let reg = ModelRegistry::with_defaults().unwrap();
        let report = reg.validate_all();
        for name in ["iasp91", "ak135", "prem", "simple"] {
            assert!(report[name].is_ok(), "{}: {:?}", name, report[name]);
        }
        let desc = reg.descriptor("IASP91").unwrap();
        assert_eq!(desc.cmb_depth(), Some(2889.0));
    }

    #[test]
    fn unknown_model_falls_back() {
        let reg = registry();
        let res = reg.get_model("nonexistent");
        assert_eq!(res.requested, "nonexistent");
        assert_eq!(res.resolved, "simple");
        assert!(res.substitution.unwrap().contains("unknown velocity model"));
        assert!(matches!(
            reg.get_model_strict("nonexistent"),
            Err(LocateError::UnknownModel(_))
        ));
    }

    #[test]
    fn broken_profile_falls_back_and_is_delisted() {
        let reg = registry();
        assert!(reg.list_available().contains("broken"));
        let res = reg.get_model("broken");
        assert_eq!(res.resolved, "simple");
        assert!(res.substitution.unwrap().contains("depth decreases"));
        assert!(!reg.list_available().contains("broken"));
        match reg.get_model_strict("broken") {
            Err(LocateError::ModelInitialization { model, .. }) => assert_eq!(model, "broken"),
            other => panic!("unexpected {:?}", other.map(|m| m.name().to_string())),
        }
        let report = reg.validate_all();
        assert!(!report["broken"].is_ok());
        assert!(report["crust"].is_ok());
    }

    #[test]
    fn loaded_model_is_cached() {
        let reg = registry();
        let a = reg.get_model_strict("crust").unwrap();
        let b = reg.get_model_strict("Crust").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn concurrent_first_use_initializes_once() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.get_model_strict("prem").unwrap())
            })
            .collect();
        let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for m in &models[1..] {
            assert!(Arc::ptr_eq(&models[0], m));
        }
    }

    #[test]
    fn reserved_and_duplicate_names_rejected() {
        assert!(ModelRegistry::builder()
            .profile_json("simple", CRUST)
            .build()
            .is_err());
        assert!(ModelRegistry::builder()
            .profile_json("crust", CRUST)
            .profile_json("CRUST", CRUST)
            .build()
            .is_err());
    }

    #[test]
    fn invalid_simple_model_rejected() {
        let result = ModelRegistry::builder()
            .simple(SimpleModel::new(-1.0, 3200.0))
            .build();
        assert!(matches!(result, Err(LocateError::Configuration(_))));
    }

    #[test]
    fn probe_time_matches_simple_model() {
        let reg = ModelRegistry::builder().build().unwrap();
        match &reg.validate_all()["simple"] {
            ModelStatus::Ok { probe_travel_time } => {
                let expected = (2.0f64).sqrt() * 1000.0 / 5500.0;
                assert!((probe_travel_time - expected).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn description_includes_citation() {
        let reg = registry();
        let text = reg.description("ak135").unwrap();
        assert!(text.contains("Kennett"));
        assert!(reg.description("simple").unwrap().contains("5500"));
        assert!(reg.description("missing").is_none());
    }

    #[test]
    fn profile_file_named_after_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Local_Crust.json");
        std::fs::write(&path, CRUST).unwrap();
        let reg = ModelRegistry::builder().profile_file(&path).build().unwrap();
        let res = reg.get_model("local_crust");
        assert!(res.substitution.is_none(), "{:?}", res.substitution);
        assert_eq!(res.model.name(), "local_crust");
        let model = reg.get_model_strict("local_crust").unwrap();
        assert_eq!(model.name(), "local_crust");
        assert_eq!(reg.descriptor("local_crust").unwrap().name(), "local_crust");
    }
}
