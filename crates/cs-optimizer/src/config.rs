//! JSON search documents.
//!
//! ```json
//! {
//!   "name": "quad sweep",
//!   "parameters": {
//!     "pitch_inner": { "type": "layer_pitch", "node": "custom cct inner",
//!                      "lowerBound": 2.09, "upperBound": 2.12, "stepCount": 3 }
//!   },
//!   "criteria": {
//!     "b3": { "type": "multipole_b", "order": 3, "targetBound": 0.0 }
//!   },
//!   "strategy": { "type": "grid", "floatSteps": 5 },
//!   "stopping": { "maxIterations": 100, "tolerance": 1e-6 }
//! }
//! ```

use cs_types::{config_error, Cube3dFactory, CsError, CsResult, Range};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::evaluator::{Evaluator, GeometryFactory};
use crate::input::{InputParameter, ParameterKind};
use crate::output::{CriterionKind, OutputCriterion};
use crate::search::ParameterSearch;
use crate::settings::{Objective, SearchSettings, StoppingRule};
use crate::strategy::{GridSearch, RandomSearch, SearchStrategy};

/// Named entries in document order. Accepts either an object keyed by name
/// or an array of objects carrying a `name` field. Repeated names are kept so
/// the search can report the collision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedEntries(Vec<(String, Map<String, Value>)>);

impl NamedEntries {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.0.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for NamedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = NamedEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by name or an array of named objects")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<NamedEntries, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, spec)) = map.next_entry::<String, Map<String, Value>>()? {
                    entries.push((name, spec));
                }
                Ok(NamedEntries(entries))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<NamedEntries, A::Error> {
                let mut entries = Vec::new();
                while let Some(mut spec) = seq.next_element::<Map<String, Value>>()? {
                    let name = match spec.remove("name") {
                        Some(Value::String(name)) => name,
                        _ => return Err(de::Error::missing_field("name")),
                    };
                    entries.push((name, spec));
                }
                Ok(NamedEntries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StrategySpec {
    Grid {
        #[serde(default = "default_float_steps")]
        float_steps: usize,
    },
    Random {
        #[serde(default)]
        seed: Option<u64>,
    },
}

fn default_float_steps() -> usize {
    5
}

impl Default for StrategySpec {
    fn default() -> Self {
        Self::Grid {
            float_steps: default_float_steps(),
        }
    }
}

impl StrategySpec {
    pub fn build(&self) -> Box<dyn SearchStrategy> {
        match self {
            Self::Grid { float_steps } => Box::new(GridSearch::new(*float_steps)),
            Self::Random { seed } => Box::new(RandomSearch::new(*seed)),
        }
    }
}

/// Criterion kinds as written in documents; regions are given as the two
/// planes of a [`Cube3dFactory`] in millimetres.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CriterionSpec {
    MultipoleA {
        order: usize,
    },
    MultipoleB {
        order: usize,
    },
    MaxCurvature {
        #[serde(default)]
        region: Option<Cube3dFactory>,
    },
    MaxVonMises,
    MaxZ,
    MinZ,
    StrainEnergy,
}

impl From<CriterionSpec> for CriterionKind {
    fn from(spec: CriterionSpec) -> Self {
        match spec {
            CriterionSpec::MultipoleA { order } => Self::MultipoleA { order },
            CriterionSpec::MultipoleB { order } => Self::MultipoleB { order },
            CriterionSpec::MaxCurvature { region } => Self::MaxCurvature {
                region: region.map(|factory| factory.cube()),
            },
            CriterionSpec::MaxVonMises => Self::MaxVonMises,
            CriterionSpec::MaxZ => Self::MaxZ,
            CriterionSpec::MinZ => Self::MinZ,
            CriterionSpec::StrainEnergy => Self::StrainEnergy,
        }
    }
}

/// A whole search as read from JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: NamedEntries,
    pub criteria: NamedEntries,
    #[serde(default)]
    pub strategy: StrategySpec,
    #[serde(default)]
    pub stopping: StoppingRule,
    #[serde(default)]
    pub evaluation_timeout_secs: Option<f64>,
    #[serde(default)]
    pub objective: Option<Objective>,
    #[serde(default)]
    pub parallel_criteria: bool,
}

fn default_name() -> String {
    "parameter search".to_string()
}

impl SearchDocument {
    pub fn from_json_str(json: &str) -> CsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CsResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Reading search document");
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Input parameters in document order.
    pub fn parameters(&self) -> CsResult<Vec<InputParameter>> {
        self.parameters
            .iter()
            .map(|(name, spec)| parse_parameter(name, spec))
            .collect()
    }

    /// Output criteria in document order.
    pub fn criteria(&self) -> CsResult<Vec<OutputCriterion>> {
        self.criteria
            .iter()
            .map(|(name, spec)| parse_criterion(name, spec))
            .collect()
    }

    pub fn settings(&self) -> CsResult<SearchSettings> {
        let mut settings = SearchSettings::new(self.name.clone())
            .with_description(self.description.clone())
            .with_stopping_rule(self.stopping)
            .with_parallel_criteria(self.parallel_criteria);
        if let Some(secs) = self.evaluation_timeout_secs {
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| config_error!("evaluationTimeoutSecs {secs}: {e}"))?;
            settings = settings.with_timeout(timeout);
        }
        settings.objective = self.objective.clone();
        Ok(settings)
    }

    /// Build a search with this document's parameters, criteria, strategy and
    /// settings.
    pub fn build<F, E>(&self, factory: F, evaluator: E) -> CsResult<ParameterSearch<F, E>>
    where
        F: GeometryFactory,
        E: Evaluator<F::Geometry>,
    {
        ParameterSearch::new(
            self.parameters()?,
            self.criteria()?,
            factory,
            evaluator,
            self.strategy.build(),
            self.settings()?,
        )
    }
}

impl<F, E> ParameterSearch<F, E>
where
    F: GeometryFactory,
    E: Evaluator<F::Geometry>,
{
    pub fn from_config(document: &SearchDocument, factory: F, evaluator: E) -> CsResult<Self> {
        document.build(factory, evaluator)
    }
}

fn parse_parameter(name: &str, spec: &Map<String, Value>) -> CsResult<InputParameter> {
    let kind: ParameterKind = serde_json::from_value(Value::Object(spec.clone()))
        .map_err(|e| config_error!("parameter '{name}': {e}"))?;

    let range = match kind.natural_range() {
        Some(range) => range,
        None => {
            let parsed = match spec.get("range") {
                Some(nested) => Range::from_json(nested),
                None => Range::from_fields(spec),
            };
            parsed.map_err(|source| CsError::RangeConfig {
                name: name.to_string(),
                source,
            })?
        }
    };

    Ok(InputParameter::new(name, kind, range)?)
}

fn parse_criterion(name: &str, spec: &Map<String, Value>) -> CsResult<OutputCriterion> {
    let kind: CriterionSpec = serde_json::from_value(Value::Object(spec.clone()))
        .map_err(|e| config_error!("criterion '{name}': {e}"))?;

    let criterion = OutputCriterion::new(kind.into()).with_name(name);
    match spec.get("targetBound").or_else(|| spec.get("target_bound")) {
        None | Some(Value::Null) => Ok(criterion),
        Some(raw) => {
            let bound = raw
                .as_f64()
                .ok_or_else(|| config_error!("criterion '{name}': targetBound {raw} is not a number"))?;
            Ok(criterion.with_target_bound(bound))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ControlGroup;
    use crate::settings::ObjectiveDirection;
    use cs_types::RangeError;

    const DOCUMENT: &str = r#"{
        "name": "quad sweep",
        "parameters": {
            "pitch_inner": { "type": "layer_pitch", "node": "custom cct inner",
                             "lowerBound": 2.09, "upperBound": 2.12, "stepCount": 3 },
            "angle": { "type": "winding_angle", "node": "custom cct inner",
                       "range": { "lower": 20, "upper": 30 } }
        },
        "criteria": {
            "max_curvature_magnitude": {
                "type": "max_curvature", "targetBound": 0.5,
                "region": { "length1": 56, "length2": 74, "offsetX": 56,
                            "offsetYBottom": 27, "offsetYTop": 52, "offsetZ": 170 }
            },
            "b3": { "type": "multipole_b", "order": 3 }
        },
        "strategy": { "type": "random", "seed": 11 },
        "stopping": { "maxIterations": 25, "tolerance": 1e-6 },
        "evaluationTimeoutSecs": 30.0,
        "objective": { "criterion": "b3", "direction": "minimize" },
        "parallelCriteria": true
    }"#;

    #[test]
    fn parses_full_document() {
        let doc = SearchDocument::from_json_str(DOCUMENT).unwrap();
        assert_eq!(doc.name, "quad sweep");
        assert_eq!(doc.strategy, StrategySpec::Random { seed: Some(11) });

        let parameters = doc.parameters().unwrap();
        let names: Vec<&str> = parameters.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["pitch_inner", "angle"]);
        assert_eq!(parameters[0].range().step_count(), Some(3));
        assert_eq!(parameters[1].range().upper_bound(), 30.0);

        let criteria = doc.criteria().unwrap();
        assert_eq!(criteria[0].target_bound(), Some(0.5));
        match criteria[0].kind() {
            CriterionKind::MaxCurvature { region: Some(cube) } => {
                assert!((cube.z_max - 0.207).abs() < 1e-9);
            }
            other => panic!("unexpected kind {other:?}"),
        }

        let settings = doc.settings().unwrap();
        assert_eq!(settings.stopping.max_iterations, Some(25));
        assert_eq!(settings.evaluation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.objective.unwrap().direction, ObjectiveDirection::Minimize);
        assert!(settings.parallel_criteria);
    }

    #[test]
    fn array_form_keeps_order() {
        let doc = SearchDocument::from_json_str(
            r#"{
                "parameters": [
                    { "name": "w", "type": "path_connect_value", "node": "cable",
                      "group": "end", "point": 4, "axis": "w", "lower": -1, "upper": 1 },
                    { "name": "b3_scale", "type": "multipole_scaling", "node": "B3",
                      "multipole": "b3", "target": "constant", "lower": 0, "upper": 1 }
                ],
                "criteria": [ { "name": "z_max", "type": "max_z" } ]
            }"#,
        )
        .unwrap();
        let parameters = doc.parameters().unwrap();
        assert_eq!(parameters[0].name(), "w");
        assert!(matches!(
            parameters[0].kind(),
            ParameterKind::PathConnectValue { group: ControlGroup::End, point: 4, .. }
        ));
        assert_eq!(doc.strategy, StrategySpec::default());
        assert_eq!(doc.stopping, StoppingRule::default());
    }

    #[test]
    fn duplicate_keys_are_kept() {
        let doc = SearchDocument::from_json_str(
            r#"{
                "parameters": { "p": { "type": "layer_pitch", "node": "n", "lower": 0, "upper": 1 } },
                "criteria": {
                    "z": { "type": "max_z" },
                    "z": { "type": "min_z" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(doc.criteria.len(), 2);
    }

    #[test]
    fn coordinate_parameter_uses_config_indices() {
        let doc = SearchDocument::from_json_str(
            r#"{
                "parameters": {
                    "uvw": { "type": "path_connect_coordinate", "node": "connect",
                             "layout": { "controlPoints": 4, "symmetric": true, "enableW": false },
                             "configs": [[1, 1, 1], [2, 2, 2]] }
                },
                "criteria": { "e": { "type": "strain_energy" } }
            }"#,
        )
        .unwrap();
        let parameters = doc.parameters().unwrap();
        assert_eq!(parameters[0].range().grid_points().unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn range_errors_name_the_parameter() {
        let doc = SearchDocument::from_json_str(
            r#"{
                "parameters": { "pitch": { "type": "layer_pitch", "node": "n", "lower": 3, "upper": 1 } },
                "criteria": { "z": { "type": "max_z" } }
            }"#,
        )
        .unwrap();
        match doc.parameters().unwrap_err() {
            CsError::RangeConfig { name, source } => {
                assert_eq!(name, "pitch");
                assert_eq!(source, RangeError::InvertedBounds { lower: 3.0, upper: 1.0 });
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_kinds_are_config_errors() {
        let doc = SearchDocument::from_json_str(
            r#"{
                "parameters": { "x": { "type": "twist", "node": "n", "lower": 0, "upper": 1 } },
                "criteria": { "z": { "type": "max_z" } }
            }"#,
        )
        .unwrap();
        assert!(matches!(doc.parameters(), Err(CsError::Config(_))));
        assert!(matches!(
            SearchDocument::from_json_str(r#"{"parameters": 3, "criteria": {}}"#),
            Err(CsError::Serialization(_))
        ));
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let doc = SearchDocument::from_json_str(
            r#"{
                "parameters": {}, "criteria": {}, "evaluationTimeoutSecs": -1.0
            }"#,
        )
        .unwrap();
        assert!(matches!(doc.settings(), Err(CsError::Config(_))));
    }
}
