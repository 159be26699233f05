//! Output criteria: scalar reductions of an evaluator's results snapshot.

use cs_types::{Calculation, CriterionError, Cube3d, MeshResults, ResultsSnapshot};
use serde::{Deserialize, Serialize};

/// Criterion variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriterionKind {
    /// Skew multipole coefficient `a_n`.
    MultipoleA { order: usize },
    /// Normal multipole coefficient `b_n`.
    MultipoleB { order: usize },
    /// Largest curvature magnitude over the mesh, optionally restricted to a
    /// region.
    MaxCurvature {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Cube3d>,
    },
    MaxVonMises,
    MaxZ,
    MinZ,
    /// Strain energy integrated over the connection path mesh.
    StrainEnergy,
}

impl CriterionKind {
    pub fn default_name(&self) -> String {
        match self {
            Self::MultipoleA { order } => format!("a{order}"),
            Self::MultipoleB { order } => format!("b{order}"),
            Self::MaxCurvature { .. } => "max_curvature_magnitude".to_string(),
            Self::MaxVonMises => "max_von_mises".to_string(),
            Self::MaxZ => "z_max".to_string(),
            Self::MinZ => "z_min".to_string(),
            Self::StrainEnergy => "pathconnect2_strain_energy".to_string(),
        }
    }

    pub fn required_calculations(&self) -> &'static [Calculation] {
        match self {
            Self::MultipoleA { .. } | Self::MultipoleB { .. } => &[Calculation::Harmonics],
            _ => &[Calculation::Mesh],
        }
    }

    /// How a target bound on this criterion is read.
    pub fn bound_sense(&self) -> BoundSense {
        match self {
            Self::MultipoleA { .. } | Self::MultipoleB { .. } => BoundSense::Target,
            Self::MinZ => BoundSense::AtLeast,
            Self::MaxCurvature { .. } | Self::MaxVonMises | Self::MaxZ | Self::StrainEnergy => {
                BoundSense::AtMost
            }
        }
    }
}

/// Reading of a criterion's target bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundSense {
    /// Value must not exceed the bound.
    AtMost,
    /// Value must not fall below the bound.
    AtLeast,
    /// Value should equal the bound.
    Target,
}

/// A named measurable quantity with an optional target bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputCriterion {
    name: String,
    kind: CriterionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_bound: Option<f64>,
}

impl OutputCriterion {
    pub fn new(kind: CriterionKind) -> Self {
        Self {
            name: kind.default_name(),
            kind,
            target_bound: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.name.push_str(suffix);
        self
    }

    pub fn with_target_bound(mut self, bound: f64) -> Self {
        self.target_bound = Some(bound);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &CriterionKind {
        &self.kind
    }

    pub fn target_bound(&self) -> Option<f64> {
        self.target_bound
    }

    pub fn required_calculations(&self) -> &'static [Calculation] {
        self.kind.required_calculations()
    }

    pub fn bound_sense(&self) -> BoundSense {
        self.kind.bound_sense()
    }

    /// Reduce `snapshot` to this criterion's value.
    ///
    /// NaN entries in per-node fields are skipped; a field holding only NaN
    /// yields NaN.
    pub fn evaluate(&self, snapshot: &ResultsSnapshot) -> Result<f64, CriterionError> {
        match &self.kind {
            CriterionKind::MultipoleA { order } => {
                let harmonics = snapshot.harmonics.as_ref().ok_or_else(|| self.missing("harmonics"))?;
                harmonics.a(*order).ok_or_else(|| self.missing(&format!("harmonics.an[{order}]")))
            }
            CriterionKind::MultipoleB { order } => {
                let harmonics = snapshot.harmonics.as_ref().ok_or_else(|| self.missing("harmonics"))?;
                harmonics.b(*order).ok_or_else(|| self.missing(&format!("harmonics.bn[{order}]")))
            }
            CriterionKind::MaxCurvature { region } => {
                let mesh = self.mesh(snapshot)?;
                let curvature = self.node_field(mesh, mesh.curvature.as_deref(), "mesh.curvature")?;
                let values = mesh
                    .positions
                    .iter()
                    .zip(curvature)
                    .filter(|(position, _)| region.map_or(true, |cube| cube.contains(**position)))
                    .map(|(_, value)| value.abs());
                nan_max(values).ok_or_else(|| self.missing("mesh.curvature"))
            }
            CriterionKind::MaxVonMises => {
                let mesh = self.mesh(snapshot)?;
                let stress = self.node_field(mesh, mesh.von_mises.as_deref(), "mesh.von_mises")?;
                nan_max(stress.iter().copied()).ok_or_else(|| self.missing("mesh.von_mises"))
            }
            CriterionKind::MaxZ => {
                let mesh = self.mesh(snapshot)?;
                nan_max(mesh.positions.iter().map(|p| p[2])).ok_or_else(|| self.missing("mesh.positions"))
            }
            CriterionKind::MinZ => {
                let mesh = self.mesh(snapshot)?;
                nan_max(mesh.positions.iter().map(|p| -p[2]))
                    .map(|neg| -neg)
                    .ok_or_else(|| self.missing("mesh.positions"))
            }
            CriterionKind::StrainEnergy => {
                let mesh = self.mesh(snapshot)?;
                let density = self.node_field(mesh, mesh.energy_density.as_deref(), "mesh.energy_density")?;
                let volume = self.node_field(mesh, mesh.volume.as_deref(), "mesh.volume")?;
                Ok(density.iter().zip(volume).map(|(d, v)| d * v).sum())
            }
        }
    }

    /// Whether `value` satisfies this criterion within `tolerance`.
    ///
    /// With a target bound the bound sense decides; without one the value is
    /// settled once it moved less than `tolerance` since `previous`.
    pub fn is_settled(&self, value: f64, previous: Option<f64>, tolerance: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.target_bound {
            Some(bound) => match self.bound_sense() {
                BoundSense::AtMost => value <= bound + tolerance,
                BoundSense::AtLeast => value >= bound - tolerance,
                BoundSense::Target => (value - bound).abs() <= tolerance,
            },
            None => previous.is_some_and(|prev| prev.is_finite() && (value - prev).abs() <= tolerance),
        }
    }

    fn mesh<'a>(&self, snapshot: &'a ResultsSnapshot) -> Result<&'a MeshResults, CriterionError> {
        snapshot.mesh.as_ref().ok_or_else(|| self.missing("mesh"))
    }

    fn node_field<'a>(
        &self,
        mesh: &MeshResults,
        field: Option<&'a [f64]>,
        name: &str,
    ) -> Result<&'a [f64], CriterionError> {
        let values = field.ok_or_else(|| self.missing(name))?;
        if values.len() != mesh.node_count() {
            return Err(CriterionError::FieldLength {
                criterion: self.name.clone(),
                field: name.to_string(),
                expected: mesh.node_count(),
                actual: values.len(),
            });
        }
        Ok(values)
    }

    fn missing(&self, field: &str) -> CriterionError {
        CriterionError::MissingField {
            criterion: self.name.clone(),
            field: field.to_string(),
        }
    }
}

/// Maximum ignoring NaN; `None` for an empty sequence.
fn nan_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| match acc {
        None => Some(v),
        Some(current) => Some(current.max(v)),
    })
}
