//! Input parameters: one scalar design knob each, bound to a [`Range`] and
//! written into the geometry-construction context.

use cs_types::{ControlPoint, FieldPath, GeometryContext, ParameterError, PathSegment, Range};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const COORDINATE_PARAMETER: &str = "pathconnect2_uvw";

/// Which coefficient of a harmonic drive function a multipole parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTarget {
    /// Constant scaling of the drive.
    Constant,
    /// Offset of a linear drive.
    LinearOffset,
    /// Slope of a linear drive.
    LinearSlope,
}

impl ScalingTarget {
    fn field(self) -> &'static str {
        match self {
            Self::Constant => "scaling",
            Self::LinearOffset => "offset",
            Self::LinearSlope => "slope",
        }
    }
}

/// End of a connection path a control point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlGroup {
    Start,
    End,
}

impl ControlGroup {
    fn field(self) -> &'static str {
        match self {
            Self::Start => "uvw1",
            Self::End => "uvw2",
        }
    }
}

impl fmt::Display for ControlGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    U,
    V,
    W,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U => write!(f, "u"),
            Self::V => write!(f, "v"),
            Self::W => write!(f, "w"),
        }
    }
}

/// Shape of a connection path's control polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLayout {
    pub control_points: usize,
    /// When set, the end group mirrors the start group.
    pub symmetric: bool,
    pub enable_w: bool,
}

impl ControlLayout {
    const MIN_CONTROL_POINTS: usize = 4;

    /// Number of increments one coordinate config must hold.
    pub fn increments_len(&self) -> usize {
        let n = self.control_points;
        let w = if self.enable_w { n.saturating_sub(7) } else { 0 };
        let per_group = n.saturating_sub(1) + n.saturating_sub(4) + w;
        if self.symmetric {
            per_group
        } else {
            2 * per_group
        }
    }

    /// Axis of each increment, in the order [`expand`](Self::expand) reads them.
    pub fn increment_axes(&self) -> Vec<Axis> {
        let n = self.control_points;
        let w = if self.enable_w { n.saturating_sub(7) } else { 0 };
        let group: Vec<Axis> = std::iter::repeat(Axis::U)
            .take(n.saturating_sub(1))
            .chain(std::iter::repeat(Axis::V).take(n.saturating_sub(4)))
            .chain(std::iter::repeat(Axis::W).take(w))
            .collect();
        group.repeat(if self.symmetric { 1 } else { 2 })
    }

    /// Increments of the starting path: `u` runs evenly from 0 to `ell / 4`,
    /// `v` is `i * ell / 24` from point 4 on and `w` stays 0.
    pub fn default_config(&self, ell: f64) -> Vec<f64> {
        let n = self.control_points;
        let u_step = if n > 1 { ell / 4.0 / (n - 1) as f64 } else { 0.0 };
        self.increment_axes()
            .into_iter()
            .scan(None, |previous, axis| {
                let increment = match (axis, *previous) {
                    (Axis::U, _) => u_step,
                    (Axis::V, Some(Axis::V)) => ell / 24.0,
                    (Axis::V, _) => 4.0 * ell / 24.0,
                    (Axis::W, _) => 0.0,
                };
                *previous = Some(axis);
                Some(increment)
            })
            .collect()
    }

    /// `count` coordinate configs: [`default_config`](Self::default_config)
    /// first, then increments drawn uniformly between `lower` and `upper`.
    /// The `u` and `v` bounds are clamped to `±ell / (n + 1)` so the summed
    /// increments cannot outgrow `ell`.
    pub fn random_configs<R: Rng>(
        &self,
        lower: &[f64],
        upper: &[f64],
        ell: f64,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>, ParameterError> {
        let invalid = |message: String| ParameterError::InvalidLayout {
            parameter: COORDINATE_PARAMETER.to_string(),
            message,
        };
        if count == 0 {
            return Err(invalid("at least one coordinate config is required".to_string()));
        }
        let expected = self.increments_len();
        if lower.len() != expected || upper.len() != expected {
            return Err(invalid(format!(
                "bounds hold {} and {} increments, expected {expected}",
                lower.len(),
                upper.len()
            )));
        }

        let limit = ell / (self.control_points + 1) as f64;
        let bounds = self
            .increment_axes()
            .into_iter()
            .zip(lower.iter().zip(upper))
            .enumerate()
            .map(|(index, (axis, (&lo, &hi)))| {
                let (lo, hi) = match axis {
                    Axis::W => (lo, hi),
                    Axis::U | Axis::V => (lo.max(-limit), hi.min(limit)),
                };
                if lo.is_finite() && hi.is_finite() && lo <= hi {
                    Ok((lo, hi))
                } else {
                    Err(invalid(format!("increment {index} has an empty range [{lo}, {hi}]")))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut configs = Vec::with_capacity(count);
        configs.push(self.default_config(ell));
        for _ in 1..count {
            configs.push(bounds.iter().map(|&(lo, hi)| rng.gen_range(lo..=hi)).collect());
        }
        Ok(configs)
    }

    /// Expand an increment vector into cumulative control points for both
    /// groups. Point 0 of each group stays at the origin; `u` runs over points
    /// `1..n`, `v` over `4..n` and `w` (when enabled) over `7..n`.
    pub fn expand(&self, increments: &[f64]) -> Option<(Vec<ControlPoint>, Vec<ControlPoint>)> {
        if increments.len() != self.increments_len() {
            return None;
        }
        let mut values = increments.iter().copied();
        let start = self.expand_group(&mut values)?;
        let end = if self.symmetric {
            start.clone()
        } else {
            self.expand_group(&mut values)?
        };
        Some((start, end))
    }

    fn expand_group(&self, values: &mut impl Iterator<Item = f64>) -> Option<Vec<ControlPoint>> {
        let n = self.control_points;
        let mut points = vec![ControlPoint::default(); n];
        for i in 1..n {
            points[i].u = points[i - 1].u + values.next()?;
        }
        for i in 4..n {
            points[i].v = points[i - 1].v + values.next()?;
        }
        if self.enable_w {
            for i in 7..n {
                points[i].w = points[i - 1].w + values.next()?;
            }
        }
        Some(points)
    }
}

/// Parameter variants. Each names the model node it acts on and decides which
/// field it writes and in which unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ParameterKind {
    /// Winding angle of a canted-cosine-theta layer, ranged in degrees.
    WindingAngle { node: String },
    /// Layer pitch, ranged in millimetres.
    LayerPitch { node: String },
    /// Dimensionless scaling of a harmonic drive, e.g. multipole `"b3"`.
    MultipoleScaling {
        node: String,
        multipole: String,
        target: ScalingTarget,
    },
    /// One coordinate of one control point, ranged in millimetres.
    PathConnectValue {
        node: String,
        group: ControlGroup,
        point: usize,
        axis: Axis,
    },
    /// Index into a list of precomputed increment vectors; applying it writes
    /// every control point triple of both groups.
    PathConnectCoordinate {
        node: String,
        layout: ControlLayout,
        configs: Vec<Vec<f64>>,
    },
}

impl ParameterKind {
    pub fn node(&self) -> &str {
        match self {
            Self::WindingAngle { node }
            | Self::LayerPitch { node }
            | Self::MultipoleScaling { node, .. }
            | Self::PathConnectValue { node, .. }
            | Self::PathConnectCoordinate { node, .. } => node,
        }
    }

    /// Column name used when the caller does not pick one.
    pub fn default_name(&self) -> String {
        match self {
            Self::WindingAngle { .. } => "cct_winding_angle".to_string(),
            Self::LayerPitch { .. } => "layer_pitch".to_string(),
            Self::MultipoleScaling { multipole, .. } => multipole.clone(),
            Self::PathConnectValue {
                group, point, axis, ..
            } => format!("pathconnectv2_{group}_{point}_{axis}"),
            Self::PathConnectCoordinate { .. } => COORDINATE_PARAMETER.to_string(),
        }
    }

    /// The range implied by the variant itself, if any.
    pub fn natural_range(&self) -> Option<Range> {
        match self {
            Self::PathConnectCoordinate { configs, .. } => {
                let last = configs.len().checked_sub(1)?;
                match u32::try_from(last) {
                    Ok(0) => Range::fixed(0.0).ok(),
                    Ok(steps) => Range::stepped(0.0, f64::from(steps), steps).ok(),
                    Err(_) => None,
                }
            }
            _ => None,
        }
    }

    /// Fields this variant writes.
    pub fn target_fields(&self) -> Vec<FieldPath> {
        match self {
            Self::WindingAngle { node } => {
                vec![FieldPath::new(node.clone(), vec!["rho".into()], "alpha")]
            }
            Self::LayerPitch { node } => {
                vec![FieldPath::new(node.clone(), vec!["omega".into()], "scaling")]
            }
            Self::MultipoleScaling { node, target, .. } => vec![FieldPath::new(
                node.clone(),
                vec!["harmonic_drive".into()],
                target.field(),
            )],
            Self::PathConnectValue {
                node,
                group,
                point,
                axis,
            } => vec![FieldPath::new(
                node.clone(),
                vec![group.field().into(), PathSegment::Index(*point)],
                axis.to_string(),
            )],
            Self::PathConnectCoordinate { node, .. } => vec![
                FieldPath::new(node.clone(), Vec::new(), ControlGroup::Start.field()),
                FieldPath::new(node.clone(), Vec::new(), ControlGroup::End.field()),
            ],
        }
    }

    fn validate(&self, parameter: &str, range: &Range) -> Result<(), ParameterError> {
        if let Self::PathConnectCoordinate { layout, configs, .. } = self {
            if layout.control_points < ControlLayout::MIN_CONTROL_POINTS {
                return Err(ParameterError::InvalidLayout {
                    parameter: parameter.to_string(),
                    message: format!(
                        "at least {} control points are required, got {}",
                        ControlLayout::MIN_CONTROL_POINTS,
                        layout.control_points
                    ),
                });
            }
            if configs.is_empty() {
                return Err(ParameterError::InvalidLayout {
                    parameter: parameter.to_string(),
                    message: "no coordinate configs given".to_string(),
                });
            }
            let expected = layout.increments_len();
            if let Some((index, config)) = configs
                .iter()
                .enumerate()
                .find(|(_, config)| config.len() != expected)
            {
                return Err(ParameterError::InvalidCoordinateConfig {
                    parameter: parameter.to_string(),
                    index,
                    expected,
                    actual: config.len(),
                });
            }
            let last = (configs.len() - 1) as f64;
            if range.lower_bound() < 0.0 || range.upper_bound() > last {
                return Err(ParameterError::InvalidLayout {
                    parameter: parameter.to_string(),
                    message: format!("range {range} exceeds config indices [0, {last}]"),
                });
            }
        }
        Ok(())
    }
}

/// A named design variable with its admissible range and current value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputParameter {
    name: String,
    kind: ParameterKind,
    range: Range,
    current_value: f64,
}

impl InputParameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind, range: Range) -> Result<Self, ParameterError> {
        let name = name.into();
        kind.validate(&name, &range)?;
        Ok(Self {
            name,
            kind,
            current_value: range.lower_bound(),
            range,
        })
    }

    pub fn winding_angle(node: impl Into<String>, range_deg: Range) -> Self {
        Self::with_default_name(ParameterKind::WindingAngle { node: node.into() }, range_deg)
    }

    pub fn layer_pitch(node: impl Into<String>, range_mm: Range) -> Self {
        Self::with_default_name(ParameterKind::LayerPitch { node: node.into() }, range_mm)
    }

    pub fn multipole_scaling(
        multipole: impl Into<String>,
        node: impl Into<String>,
        target: ScalingTarget,
        range: Range,
    ) -> Self {
        Self::with_default_name(
            ParameterKind::MultipoleScaling {
                node: node.into(),
                multipole: multipole.into(),
                target,
            },
            range,
        )
    }

    pub fn path_connect_value(
        node: impl Into<String>,
        group: ControlGroup,
        point: usize,
        axis: Axis,
        range_mm: Range,
    ) -> Self {
        Self::with_default_name(
            ParameterKind::PathConnectValue {
                node: node.into(),
                group,
                point,
                axis,
            },
            range_mm,
        )
    }

    /// Coordinate parameter over `configs`; its range is derived as the index
    /// set `[0, configs.len() - 1]`.
    pub fn path_connect_coordinate(
        node: impl Into<String>,
        layout: ControlLayout,
        configs: Vec<Vec<f64>>,
    ) -> Result<Self, ParameterError> {
        let kind = ParameterKind::PathConnectCoordinate {
            node: node.into(),
            layout,
            configs,
        };
        let name = kind.default_name();
        let range = kind.natural_range().ok_or_else(|| ParameterError::InvalidLayout {
            parameter: name.clone(),
            message: "no coordinate configs given".to_string(),
        })?;
        Self::new(name, kind, range)
    }

    fn with_default_name(kind: ParameterKind, range: Range) -> Self {
        Self {
            name: kind.default_name(),
            kind,
            current_value: range.lower_bound(),
            range,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a suffix to the name, e.g. `"_inner"`.
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.name.push_str(suffix);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    /// Whether `value` may be assigned. NaN is never in range.
    pub fn check_value(&self, value: f64) -> Result<(), ParameterError> {
        if self.range.contains(value) {
            Ok(())
        } else {
            Err(ParameterError::OutOfRange {
                parameter: self.name.clone(),
                value,
                lower: self.range.lower_bound(),
                upper: self.range.upper_bound(),
            })
        }
    }

    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        self.check_value(value)?;
        self.current_value = value;
        Ok(())
    }

    pub fn target_fields(&self) -> Vec<FieldPath> {
        self.kind.target_fields()
    }

    /// Write the current value into `context`. Repeated calls with the same
    /// value leave the context unchanged.
    pub fn apply_to(&self, context: &mut GeometryContext) {
        let value = self.current_value;
        match &self.kind {
            ParameterKind::WindingAngle { .. } => {
                self.write_scalar(context, value.to_radians());
            }
            ParameterKind::LayerPitch { .. } | ParameterKind::PathConnectValue { .. } => {
                self.write_scalar(context, value / 1000.0);
            }
            ParameterKind::MultipoleScaling { .. } => {
                self.write_scalar(context, value);
            }
            ParameterKind::PathConnectCoordinate {
                node,
                layout,
                configs,
            } => {
                let index = (value.round().max(0.0) as usize).min(configs.len().saturating_sub(1));
                if let Some((start, end)) = configs.get(index).and_then(|config| layout.expand(config)) {
                    context.set_points(
                        FieldPath::new(node.clone(), Vec::new(), ControlGroup::Start.field()),
                        start,
                    );
                    context.set_points(
                        FieldPath::new(node.clone(), Vec::new(), ControlGroup::End.field()),
                        end,
                    );
                }
            }
        }
    }

    fn write_scalar(&self, context: &mut GeometryContext, value: f64) {
        for path in self.kind.target_fields() {
            context.set_scalar(path, value);
        }
    }
}
