// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::{Phase, Point3};
use crate::error::{CalculationError, LocateError, Result};

/// Default P velocity of the homogeneous model, m/s.
pub const DEFAULT_VP: f64 = 5500.0;
/// Default S velocity of the homogeneous model, m/s.
pub const DEFAULT_VS: f64 = 3200.0;
/// Mean Earth radius in km, used when a profile omits it.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const RAY_BISECTION_ITERS: usize = 200;

/// Converts a source-receiver pair and phase into a predicted travel time.
///
/// Implementations are pure and shared read-only between concurrent searches.
pub trait VelocityModel: Send + Sync {
    /// Registry name of the model.
    fn name(&self) -> &str;

    /// Travel time in seconds from `source` to `receiver` (metres, z = depth).
    fn travel_time(
        &self,
        source: Point3,
        receiver: Point3,
        phase: Phase,
    ) -> std::result::Result<f64, CalculationError>;
}

fn check_finite(p: &Point3) -> std::result::Result<(), CalculationError> {
    if p.is_finite() {
        Ok(())
    } else {
        Err(CalculationError::NonFinitePosition {
            coord: p.to_array(),
        })
    }
}

/// Homogeneous model: constant velocity per phase, straight rays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleModel {
    /// P velocity in m/s.
    pub vp: f64,
    /// S velocity in m/s.
    pub vs: f64,
}

impl Default for SimpleModel {
    fn default() -> Self {
        SimpleModel::new(DEFAULT_VP, DEFAULT_VS)
    }
}

impl SimpleModel {
    /// Create a homogeneous model from P and S velocities in m/s.
    pub const fn new(vp: f64, vs: f64) -> Self {
        SimpleModel { vp, vs }
    }

    /// Derive the S velocity from a Vp/Vs ratio.
    ///
    /// # Errors
    /// Returns a configuration error if `vp` is not positive or `ratio <= 1`.
    pub fn from_vp_and_ratio(vp: f64, ratio: f64) -> Result<Self> {
        if !vp.is_finite() || vp <= 0.0 {
            return Err(LocateError::config(format!(
                "P velocity {} must be positive",
                vp
            )));
        }
        if !ratio.is_finite() || ratio <= 1.0 {
            return Err(LocateError::config(format!(
                "Vp/Vs ratio {} must exceed 1.0",
                ratio
            )));
        }
        Ok(SimpleModel::new(vp, vp / ratio))
    }

    /// Check that both velocities are positive and finite.
    ///
    /// # Errors
    /// Returns a configuration error naming the invalid phase velocity.
    pub fn validate(&self) -> Result<()> {
        for (phase, v) in [(Phase::P, self.vp), (Phase::S, self.vs)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(LocateError::config(format!(
                    "{} velocity {} must be positive and finite",
                    phase, v
                )));
            }
        }
        if self.vp <= self.vs {
            warn!(
                "homogeneous model has vp={} <= vs={}; P should be the faster phase",
                self.vp, self.vs
            );
        }
        Ok(())
    }

    /// Velocity for a phase in m/s.
    pub fn velocity(&self, phase: Phase) -> f64 {
        match phase {
            Phase::P => self.vp,
            Phase::S => self.vs,
        }
    }

    /// Vp/Vs ratio, or 0 when vs is not positive.
    pub fn vp_vs_ratio(&self) -> f64 {
        if self.vs > 0.0 {
            self.vp / self.vs
        } else {
            0.0
        }
    }

    /// Distance in metres travelled by `phase` in `travel_time` seconds.
    ///
    /// # Errors
    /// Returns an error if the travel time is negative or the velocity invalid.
    pub fn distance_for_time(&self, travel_time: f64, phase: Phase) -> Result<f64> {
        if !travel_time.is_finite() || travel_time < 0.0 {
            return Err(LocateError::config(format!(
                "travel time {} must be finite and >= 0",
                travel_time
            )));
        }
        let v = self.velocity(phase);
        if !v.is_finite() || v <= 0.0 {
            return Err(CalculationError::InvalidVelocity { phase, value: v }.into());
        }
        Ok(travel_time * v)
    }
}

impl VelocityModel for SimpleModel {
    fn name(&self) -> &str {
        "simple"
    }

    fn travel_time(
        &self,
        source: Point3,
        receiver: Point3,
        phase: Phase,
    ) -> std::result::Result<f64, CalculationError> {
        check_finite(&source)?;
        check_finite(&receiver)?;
        let v = self.velocity(phase);
        if !v.is_finite() || v <= 0.0 {
            return Err(CalculationError::InvalidVelocity { phase, value: v });
        }
        Ok(source.distance(&receiver) / v)
    }
}

/// One node of a 1-D velocity profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityLayer {
    /// Depth in km.
    pub depth: f64,
    /// P velocity in km/s.
    pub vp: f64,
    /// S velocity in km/s; zero inside fluid regions.
    pub vs: f64,
    /// Density in g/cm³.
    #[serde(default)]
    pub density: f64,
    /// Free-text label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VelocityLayer {
    /// Velocity for a phase in km/s.
    pub fn velocity(&self, phase: Phase) -> f64 {
        match phase {
            Phase::P => self.vp,
            Phase::S => self.vs,
        }
    }
}

/// A profile parameter written either as a bare number or as
/// `{ "value": n, "unit": "km" }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Bare number.
    Plain(f64),
    /// Number with a unit annotation.
    Annotated {
        /// The value.
        value: f64,
    },
}

impl ParameterValue {
    /// The numeric value.
    pub fn value(&self) -> f64 {
        match *self {
            ParameterValue::Plain(v) => v,
            ParameterValue::Annotated { value } => value,
        }
    }
}

/// Global parameters of a profile, all in km.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileParameters {
    /// Radius of the planet.
    #[serde(default)]
    pub earth_radius: Option<ParameterValue>,
    /// Core-mantle boundary depth.
    #[serde(default)]
    pub cmb_depth: Option<ParameterValue>,
    /// Inner-core boundary depth.
    #[serde(default)]
    pub icb_depth: Option<ParameterValue>,
}

/// Structured definition of a layered velocity model, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Citation.
    #[serde(default)]
    pub source: String,
    /// Global parameters.
    #[serde(default)]
    pub parameters: ProfileParameters,
    /// Depth-ordered profile nodes.
    pub layers: Vec<VelocityLayer>,
}

impl ModelProfile {
    /// Parse a profile from JSON text.
    ///
    /// # Errors
    /// Returns a JSON error if the text does not match the profile schema.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A validated, immutable layered model definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    name: String,
    description: String,
    source: String,
    earth_radius: f64,
    cmb_depth: Option<f64>,
    icb_depth: Option<f64>,
    layers: Vec<VelocityLayer>,
}

impl ModelDescriptor {
    /// Validate a profile and build its descriptor.
    ///
    /// Boundary depths not given in the parameters are derived from the
    /// layers: the CMB is the first depth where S velocity drops to zero, the
    /// ICB the next depth where it becomes positive again.
    ///
    /// # Errors
    /// Returns [`LocateError::ModelInitialization`] if the layers are empty,
    /// contain non-finite values, have decreasing depths, a non-positive vp,
    /// a negative vs or density, or if a boundary depth lies outside the
    /// layer depth range.
    pub fn from_profile(profile: ModelProfile) -> Result<Self> {
        let name = profile.name.trim().to_lowercase();
        let fail = |reason: String| LocateError::model_init(&name, reason);

        if name.is_empty() {
            return Err(fail("profile has no name".to_string()));
        }
        let layers = profile.layers;
        if layers.is_empty() {
            return Err(fail("profile has no layers".to_string()));
        }

        let earth_radius = profile
            .parameters
            .earth_radius
            .map(|p| p.value())
            .unwrap_or(EARTH_RADIUS_KM);
        if !earth_radius.is_finite() || earth_radius <= 0.0 {
            return Err(fail(format!(
                "earth_radius {} must be positive and finite",
                earth_radius
            )));
        }

        for (i, layer) in layers.iter().enumerate() {
            let values = [layer.depth, layer.vp, layer.vs, layer.density];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(fail(format!("layer {} contains a non-finite value", i)));
            }
            if layer.depth < 0.0 {
                return Err(fail(format!(
                    "layer {} has negative depth {}",
                    i, layer.depth
                )));
            }
            if i > 0 && layer.depth < layers[i - 1].depth {
                return Err(fail(format!(
                    "depth decreases at layer {} ({} km after {} km)",
                    i,
                    layer.depth,
                    layers[i - 1].depth
                )));
            }
            if layer.vp <= 0.0 {
                return Err(fail(format!("layer {} has vp {} (must be > 0)", i, layer.vp)));
            }
            if layer.vs < 0.0 {
                return Err(fail(format!("layer {} has vs {} (must be >= 0)", i, layer.vs)));
            }
            if layer.density < 0.0 {
                return Err(fail(format!(
                    "layer {} has density {} (must be >= 0)",
                    i, layer.density
                )));
            }
        }

        let top = layers[0].depth;
        let bottom = layers[layers.len() - 1].depth;
        if bottom > earth_radius {
            return Err(fail(format!(
                "deepest layer {} km lies below earth_radius {} km",
                bottom, earth_radius
            )));
        }

        let cmb_depth = match profile.parameters.cmb_depth {
            Some(p) => Some(p.value()),
            None => derive_cmb(&layers),
        };
        let icb_depth = match profile.parameters.icb_depth {
            Some(p) => Some(p.value()),
            None => cmb_depth.and_then(|cmb| derive_icb(&layers, cmb)),
        };

        for (label, depth) in [("cmb_depth", cmb_depth), ("icb_depth", icb_depth)] {
            if let Some(d) = depth {
                if !d.is_finite() || d < top || d > bottom {
                    return Err(fail(format!(
                        "{} {} km outside layer range [{}, {}] km",
                        label, d, top, bottom
                    )));
                }
            }
        }
        if let (Some(cmb), Some(icb)) = (cmb_depth, icb_depth) {
            if icb < cmb {
                return Err(fail(format!(
                    "icb_depth {} km is shallower than cmb_depth {} km",
                    icb, cmb
                )));
            }
        }

        Ok(ModelDescriptor {
            name,
            description: profile.description,
            source: profile.source,
            earth_radius,
            cmb_depth,
            icb_depth,
            layers,
        })
    }

    /// Model name (lower case).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Citation.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Planet radius in km.
    pub fn earth_radius(&self) -> f64 {
        self.earth_radius
    }

    /// Core-mantle boundary depth in km, if the model reaches the core.
    pub fn cmb_depth(&self) -> Option<f64> {
        self.cmb_depth
    }

    /// Inner-core boundary depth in km, if the model reaches the inner core.
    pub fn icb_depth(&self) -> Option<f64> {
        self.icb_depth
    }

    /// Profile nodes in depth order.
    pub fn layers(&self) -> &[VelocityLayer] {
        &self.layers
    }

    /// Convert back to the on-disk profile form.
    pub fn to_profile(&self) -> ModelProfile {
        ModelProfile {
            name: self.name.clone(),
            description: self.description.clone(),
            source: self.source.clone(),
            parameters: ProfileParameters {
                earth_radius: Some(ParameterValue::Plain(self.earth_radius)),
                cmb_depth: self.cmb_depth.map(ParameterValue::Plain),
                icb_depth: self.icb_depth.map(ParameterValue::Plain),
            },
            layers: self.layers.clone(),
        }
    }
}

fn derive_cmb(layers: &[VelocityLayer]) -> Option<f64> {
    layers
        .windows(2)
        .find(|w| w[0].vs > 0.0 && w[1].vs == 0.0)
        .map(|w| w[1].depth)
}

fn derive_icb(layers: &[VelocityLayer], cmb: f64) -> Option<f64> {
    layers
        .windows(2)
        .find(|w| w[0].depth >= cmb && w[0].vs == 0.0 && w[1].vs > 0.0)
        .map(|w| w[1].depth)
}

/// Depth interval with linearly varying velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Interval {
    top: f64,
    bottom: f64,
    v_top: f64,
    v_bottom: f64,
}

impl Interval {
    fn velocity_at(&self, depth: f64) -> f64 {
        let h = self.bottom - self.top;
        if h <= 0.0 {
            return self.v_top;
        }
        self.v_top + (self.v_bottom - self.v_top) * (depth - self.top) / h
    }
}

/// Constant-velocity slab along a ray path (km, km/s).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Slab {
    thickness: f64,
    velocity: f64,
}

fn build_intervals(desc: &ModelDescriptor, phase: Phase) -> Vec<Interval> {
    let layers = desc.layers();
    let mut intervals = Vec::with_capacity(layers.len() + 1);

    let first = &layers[0];
    if first.depth > 0.0 {
        let v = first.velocity(phase);
        intervals.push(Interval {
            top: 0.0,
            bottom: first.depth,
            v_top: v,
            v_bottom: v,
        });
    }
    for w in layers.windows(2) {
        if w[1].depth > w[0].depth {
            intervals.push(Interval {
                top: w[0].depth,
                bottom: w[1].depth,
                v_top: w[0].velocity(phase),
                v_bottom: w[1].velocity(phase),
            });
        }
    }
    let last = &layers[layers.len() - 1];
    if desc.earth_radius() > last.depth {
        let v = last.velocity(phase);
        intervals.push(Interval {
            top: last.depth,
            bottom: desc.earth_radius(),
            v_top: v,
            v_bottom: v,
        });
    }
    // A profile whose nodes all share one depth still needs a velocity there.
    if intervals.is_empty() {
        let v = last.velocity(phase);
        intervals.push(Interval {
            top: last.depth,
            bottom: last.depth,
            v_top: v,
            v_bottom: v,
        });
    }
    intervals
}

/// 1-D layered model: rays traced through flat layers between source and
/// receiver depth.
///
/// Velocity varies linearly between profile nodes. The path is cut into slabs
/// at every node it crosses and each slab uses its mean velocity. The ray
/// parameter is found by bisection on the takeoff angle.
#[derive(Debug, Clone)]
pub struct LayeredModel {
    descriptor: Arc<ModelDescriptor>,
    p_intervals: Vec<Interval>,
    s_intervals: Vec<Interval>,
}

impl LayeredModel {
    /// Build a layered model from a validated descriptor.
    pub fn new(descriptor: Arc<ModelDescriptor>) -> Self {
        let p_intervals = build_intervals(&descriptor, Phase::P);
        let s_intervals = build_intervals(&descriptor, Phase::S);
        LayeredModel {
            descriptor,
            p_intervals,
            s_intervals,
        }
    }

    /// The underlying descriptor.
    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    fn intervals(&self, phase: Phase) -> &[Interval] {
        match phase {
            Phase::P => &self.p_intervals,
            Phase::S => &self.s_intervals,
        }
    }

    fn depth_km(&self, p: &Point3) -> std::result::Result<f64, CalculationError> {
        let depth = p.z / 1000.0;
        let max = self.descriptor.earth_radius();
        if !(0.0..=max).contains(&depth) {
            return Err(CalculationError::DepthOutOfRange {
                depth_km: depth,
                max_km: max,
            });
        }
        Ok(depth)
    }

    /// Velocity in km/s just below `depth_km` (far side of a discontinuity).
    pub fn velocity_at(&self, depth_km: f64, phase: Phase) -> f64 {
        let intervals = self.intervals(phase);
        let interval = intervals
            .iter()
            .find(|iv| depth_km >= iv.top && depth_km < iv.bottom)
            .unwrap_or(&intervals[intervals.len() - 1]);
        interval.velocity_at(depth_km.clamp(interval.top, interval.bottom))
    }

    fn slabs(
        &self,
        top: f64,
        bottom: f64,
        phase: Phase,
    ) -> std::result::Result<Vec<Slab>, CalculationError> {
        let mut slabs = Vec::new();
        for iv in self.intervals(phase) {
            if iv.bottom <= top || iv.top >= bottom {
                continue;
            }
            let a = iv.top.max(top);
            let b = iv.bottom.min(bottom);
            if b <= a {
                continue;
            }
            let va = iv.velocity_at(a);
            let vb = iv.velocity_at(b);
            if va <= 0.0 || vb <= 0.0 {
                return Err(CalculationError::OpaqueToPhase {
                    phase,
                    top_km: a,
                    bottom_km: b,
                });
            }
            slabs.push(Slab {
                thickness: b - a,
                velocity: 0.5 * (va + vb),
            });
        }
        Ok(slabs)
    }
}

/// Horizontal offset and travel time for a takeoff angle `theta`
/// (measured from vertical, against the fastest slab).
fn offset_and_time(slabs: &[Slab], v_max: f64, theta: f64) -> (f64, f64) {
    let sin_t = theta.sin();
    let cos_t = theta.cos();
    let mut offset = 0.0;
    let mut time = 0.0;
    for slab in slabs {
        let (pv, cos_i) = if slab.velocity == v_max {
            (sin_t, cos_t)
        } else {
            let pv = sin_t * slab.velocity / v_max;
            (pv, ((1.0 - pv) * (1.0 + pv)).max(0.0).sqrt())
        };
        if cos_i <= 0.0 {
            return (f64::INFINITY, f64::INFINITY);
        }
        offset += slab.thickness * pv / cos_i;
        time += slab.thickness / (slab.velocity * cos_i);
    }
    (offset, time)
}

impl VelocityModel for LayeredModel {
    fn name(&self) -> &str {
        self.descriptor.name()
    }

    fn travel_time(
        &self,
        source: Point3,
        receiver: Point3,
        phase: Phase,
    ) -> std::result::Result<f64, CalculationError> {
        check_finite(&source)?;
        check_finite(&receiver)?;
        let zs = self.depth_km(&source)?;
        let zr = self.depth_km(&receiver)?;
        let offset = source.horizontal_distance(&receiver) / 1000.0;

        let (top, bottom) = if zs <= zr { (zs, zr) } else { (zr, zs) };

        if bottom - top <= 0.0 {
            if offset == 0.0 {
                return Ok(0.0);
            }
            let v = self.velocity_at(top, phase);
            if v <= 0.0 {
                return Err(CalculationError::OpaqueToPhase {
                    phase,
                    top_km: top,
                    bottom_km: bottom,
                });
            }
            return Ok(offset / v);
        }

        let slabs = self.slabs(top, bottom, phase)?;
        if offset == 0.0 {
            return Ok(slabs.iter().map(|s| s.thickness / s.velocity).sum());
        }

        let v_max = slabs.iter().map(|s| s.velocity).fold(0.0_f64, f64::max);
        let mut lo = 0.0_f64;
        let mut hi = FRAC_PI_2;
        for _ in 0..RAY_BISECTION_ITERS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            let (x, _) = offset_and_time(&slabs, v_max, mid);
            if x < offset {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let (_, time) = offset_and_time(&slabs, v_max, lo);
        if !time.is_finite() {
            return Err(CalculationError::RayNotFound { offset_km: offset });
        }
        Ok(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(depth: f64, vp: f64, vs: f64) -> VelocityLayer {
        VelocityLayer {
            depth,
            vp,
            vs,
            density: 2.7,
            description: None,
        }
    }

    fn profile(layers: Vec<VelocityLayer>) -> ModelProfile {
        ModelProfile {
            name: "Test".to_string(),
            description: String::new(),
            source: String::new(),
            parameters: ProfileParameters::default(),
            layers,
        }
    }

    fn layered(layers: Vec<VelocityLayer>) -> LayeredModel {
        LayeredModel::new(Arc::new(
            ModelDescriptor::from_profile(profile(layers)).unwrap(),
        ))
    }

    #[test]
    fn simple_travel_time_is_distance_over_velocity() {
        let model = SimpleModel::new(5000.0, 3000.0);
        let t = model
            .travel_time(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(3000.0, 4000.0, 0.0),
                Phase::P,
            )
            .unwrap();
        assert_eq!(t, 1.0);
        let ts = model
            .travel_time(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(3000.0, 4000.0, 0.0),
                Phase::S,
            )
            .unwrap();
        assert_eq!(ts, 5000.0 / 3000.0);
    }

    #[test]
    fn simple_coincident_points_take_zero_time() {
        let model = SimpleModel::default();
        let p = Point3::new(10.0, 20.0, 30.0);
        assert_eq!(model.travel_time(p, p, Phase::P).unwrap(), 0.0);
    }

    #[test]
    fn simple_rejects_non_positive_velocity() {
        let model = SimpleModel::new(0.0, 3000.0);
        let p = Point3::default();
        assert!(matches!(
            model.travel_time(p, p, Phase::P),
            Err(CalculationError::InvalidVelocity { phase: Phase::P, .. })
        ));
        assert!(model.validate().is_err());
    }

    #[test]
    fn simple_rejects_non_finite_position() {
        let model = SimpleModel::default();
        let result = model.travel_time(
            Point3::new(f64::NAN, 0.0, 0.0),
            Point3::default(),
            Phase::P,
        );
        assert!(matches!(
            result,
            Err(CalculationError::NonFinitePosition { .. })
        ));
    }

    #[test]
    fn simple_ratio_and_inverse() {
        let model = SimpleModel::from_vp_and_ratio(6000.0, 1.5).unwrap();
        assert_eq!(model.vs, 4000.0);
        assert_eq!(model.vp_vs_ratio(), 1.5);
        assert_eq!(model.distance_for_time(2.0, Phase::S).unwrap(), 8000.0);
        assert!(SimpleModel::from_vp_and_ratio(6000.0, 0.9).is_err());
    }

    #[test]
    fn profile_with_decreasing_depth_is_rejected() {
        let result = ModelDescriptor::from_profile(profile(vec![
            layer(0.0, 5.8, 3.4),
            layer(20.0, 6.5, 3.7),
            layer(10.0, 8.0, 4.5),
        ]));
        match result {
            Err(LocateError::ModelInitialization { model, reason }) => {
                assert_eq!(model, "test");
                assert!(reason.contains("depth decreases at layer 2"), "{}", reason);
            }
            other => panic!("expected ModelInitialization, got {:?}", other),
        }
    }

    #[test]
    fn profile_with_zero_vp_is_rejected() {
        let result = ModelDescriptor::from_profile(profile(vec![
            layer(0.0, 5.8, 3.4),
            layer(20.0, 0.0, 0.0),
        ]));
        assert!(matches!(
            result,
            Err(LocateError::ModelInitialization { .. })
        ));
    }

    #[test]
    fn boundary_depth_outside_layers_is_rejected() {
        let mut p = profile(vec![layer(0.0, 5.8, 3.4), layer(100.0, 8.0, 4.5)]);
        p.parameters.cmb_depth = Some(ParameterValue::Plain(2891.0));
        let err = ModelDescriptor::from_profile(p).unwrap_err();
        assert!(err.to_string().contains("cmb_depth"));
    }

    #[test]
    fn boundaries_are_derived_from_fluid_layers() {
        let desc = ModelDescriptor::from_profile(profile(vec![
            layer(0.0, 5.8, 3.4),
            layer(2891.0, 13.7, 7.3),
            layer(2891.0, 8.0, 0.0),
            layer(5150.0, 10.3, 0.0),
            layer(5150.0, 11.0, 3.5),
            layer(6371.0, 11.3, 3.7),
        ]))
        .unwrap();
        assert_eq!(desc.cmb_depth(), Some(2891.0));
        assert_eq!(desc.icb_depth(), Some(5150.0));
    }

    #[test]
    fn annotated_parameters_parse() {
        let json = r#"{
            "name": "crust",
            "parameters": {"earth_radius": {"value": 6371.0, "unit": "km"}},
            "layers": [{"depth": 0, "vp": 5.5, "vs": 3.2, "density": 2.7}]
        }"#;
        let p = ModelProfile::from_json(json).unwrap();
        assert_eq!(p.parameters.earth_radius.unwrap().value(), 6371.0);
        let desc = ModelDescriptor::from_profile(p).unwrap();
        assert_eq!(desc.cmb_depth(), None);
    }

    #[test]
    fn homogeneous_layered_matches_straight_ray() {
        let model = layered(vec![layer(0.0, 5.0, 3.0), layer(50.0, 5.0, 3.0)]);
        let source = Point3::new(0.0, 0.0, 10_000.0);
        let receiver = Point3::new(30_000.0, 40_000.0, 0.0);
        let t = model.travel_time(source, receiver, Phase::P).unwrap();
        let expected = source.distance(&receiver) / 5000.0;
        assert!(
            (t - expected).abs() < 1e-9 * expected,
            "t={} expected={}",
            t,
            expected
        );
    }

    #[test]
    fn vertical_ray_sums_slab_times() {
        let model = layered(vec![
            layer(0.0, 4.0, 2.0),
            layer(10.0, 4.0, 2.0),
            layer(10.0, 6.0, 3.0),
            layer(30.0, 6.0, 3.0),
        ]);
        let t = model
            .travel_time(
                Point3::new(0.0, 0.0, 30_000.0),
                Point3::new(0.0, 0.0, 0.0),
                Phase::P,
            )
            .unwrap();
        let expected = 10.0 / 4.0 + 20.0 / 6.0;
        assert!((t - expected).abs() < 1e-12);
    }

    #[test]
    fn refracted_ray_is_between_slow_and_fast_straight_rays() {
        let model = layered(vec![
            layer(0.0, 4.0, 2.0),
            layer(10.0, 4.0, 2.0),
            layer(10.0, 6.0, 3.0),
            layer(30.0, 6.0, 3.0),
        ]);
        let source = Point3::new(0.0, 0.0, 25_000.0);
        let receiver = Point3::new(20_000.0, 0.0, 0.0);
        let t = model.travel_time(source, receiver, Phase::P).unwrap();
        let d = source.distance(&receiver) / 1000.0;
        assert!(t < d / 4.0 && t > d / 6.0, "t={}", t);
    }

    #[test]
    fn reciprocity() {
        let model = layered(vec![layer(0.0, 4.0, 2.0), layer(40.0, 7.0, 4.0)]);
        let a = Point3::new(1000.0, 2000.0, 15_000.0);
        let b = Point3::new(21_000.0, -5000.0, 500.0);
        let ab = model.travel_time(a, b, Phase::S).unwrap();
        let ba = model.travel_time(b, a, Phase::S).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn same_depth_uses_local_velocity() {
        let model = layered(vec![layer(0.0, 4.0, 2.0), layer(40.0, 8.0, 4.0)]);
        let t = model
            .travel_time(
                Point3::new(0.0, 0.0, 20_000.0),
                Point3::new(12_000.0, 0.0, 20_000.0),
                Phase::P,
            )
            .unwrap();
        assert!((t - 12.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn s_phase_through_fluid_fails() {
        let model = layered(vec![
            layer(0.0, 5.8, 3.4),
            layer(100.0, 8.0, 4.5),
            layer(100.0, 8.0, 0.0),
            layer(200.0, 9.0, 0.0),
            layer(200.0, 10.0, 5.0),
            layer(300.0, 10.0, 5.0),
        ]);
        let source = Point3::new(0.0, 0.0, 250_000.0);
        let receiver = Point3::new(10_000.0, 0.0, 0.0);
        assert!(matches!(
            model.travel_time(source, receiver, Phase::S),
            Err(CalculationError::OpaqueToPhase { phase: Phase::S, .. })
        ));
        assert!(model.travel_time(source, receiver, Phase::P).is_ok());
    }

    #[test]
    fn depth_outside_model_fails() {
        let model = layered(vec![layer(0.0, 5.8, 3.4), layer(100.0, 8.0, 4.5)]);
        let above = Point3::new(0.0, 0.0, -10.0);
        let deep = Point3::new(0.0, 0.0, 7.0e6);
        for p in [above, deep] {
            assert!(matches!(
                model.travel_time(p, Point3::default(), Phase::P),
                Err(CalculationError::DepthOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn velocity_at_takes_far_side_of_discontinuity() {
        let model = layered(vec![
            layer(0.0, 4.0, 2.0),
            layer(10.0, 4.0, 2.0),
            layer(10.0, 6.0, 3.0),
            layer(30.0, 6.0, 3.0),
        ]);
        assert_eq!(model.velocity_at(10.0, Phase::P), 6.0);
        assert_eq!(model.velocity_at(5.0, Phase::S), 2.0);
    }
}
