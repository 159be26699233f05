//! Raw results produced by an external evaluator for one geometry instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of calculation an evaluator can run. Criteria declare which ones
/// they need so the evaluator can skip the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calculation {
    /// Field harmonics decomposition (`a_n`, `b_n`).
    Harmonics,
    /// Mesh with per-node geometry and mechanical fields.
    Mesh,
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Harmonics => write!(f, "harmonics"),
            Self::Mesh => write!(f, "mesh"),
        }
    }
}

/// Skew (`an`) and normal (`bn`) multipole coefficients; index `n - 1` holds
/// order `n`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Harmonics {
    pub an: Vec<f64>,
    pub bn: Vec<f64>,
}

impl Harmonics {
    pub fn new(an: Vec<f64>, bn: Vec<f64>) -> Self {
        Self { an, bn }
    }

    pub fn a(&self, order: usize) -> Option<f64> {
        order.checked_sub(1).and_then(|i| self.an.get(i).copied())
    }

    pub fn b(&self, order: usize) -> Option<f64> {
        order.checked_sub(1).and_then(|i| self.bn.get(i).copied())
    }
}

/// Sampled mesh of the coil. Per-node fields, when present, are parallel to
/// `positions`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshResults {
    /// Node coordinates in metres.
    pub positions: Vec<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curvature: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub von_mises: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_density: Option<Vec<f64>>,
    /// Volume associated with each node, used to integrate densities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Vec<f64>>,
}

impl MeshResults {
    pub fn new(positions: Vec<[f64; 3]>) -> Self {
        Self {
            positions,
            ..Self::default()
        }
    }

    pub fn with_curvature(mut self, curvature: Vec<f64>) -> Self {
        self.curvature = Some(curvature);
        self
    }

    pub fn with_von_mises(mut self, von_mises: Vec<f64>) -> Self {
        self.von_mises = Some(von_mises);
        self
    }

    pub fn with_energy(mut self, energy_density: Vec<f64>, volume: Vec<f64>) -> Self {
        self.energy_density = Some(energy_density);
        self.volume = Some(volume);
        self
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }
}

/// Everything an evaluator returned for one geometry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harmonics: Option<Harmonics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshResults>,
}

impl ResultsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_harmonics(mut self, harmonics: Harmonics) -> Self {
        self.harmonics = Some(harmonics);
        self
    }

    pub fn with_mesh(mut self, mesh: MeshResults) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn has(&self, calculation: Calculation) -> bool {
        match calculation {
            Calculation::Harmonics => self.harmonics.is_some(),
            Calculation::Mesh => self.mesh.is_some(),
        }
    }
}
