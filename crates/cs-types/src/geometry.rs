//! Geometry-construction context written by input parameters and consumed by
//! a geometry factory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One step from a model node towards a field: a child key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Location of a field in the model tree.
///
/// A node is found by name, then `children` are traversed, and `target` is
/// the property on the last child. For example node `"inner layer"`,
/// children `["rho"]`, target `"alpha"` is the winding angle of the layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    pub node: String,
    pub children: Vec<PathSegment>,
    pub target: String,
}

impl FieldPath {
    pub fn new(node: impl Into<String>, children: Vec<PathSegment>, target: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            children,
            target: target.into(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)?;
        for child in &self.children {
            match child {
                PathSegment::Key(key) => write!(f, "/{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        write!(f, ".{}", self.target)
    }
}

/// A control point of a connection path, in model length units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlPoint {
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

impl ControlPoint {
    pub fn new(u: f64, v: f64, w: f64) -> Self {
        Self { u, v, w }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(f64),
    Points(Vec<ControlPoint>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Points(_) => None,
        }
    }

    pub fn as_points(&self) -> Option<&[ControlPoint]> {
        match self {
            Self::Points(points) => Some(points),
            Self::Scalar(_) => None,
        }
    }
}

/// Field assignments that a geometry factory turns into a model instance.
///
/// Ordered so two contexts built from the same values compare equal and
/// iterate identically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeometryContext {
    fields: BTreeMap<FieldPath, FieldValue>,
}

impl GeometryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: FieldPath, value: FieldValue) {
        self.fields.insert(path, value);
    }

    pub fn set_scalar(&mut self, path: FieldPath, value: f64) {
        self.set(path, FieldValue::Scalar(value));
    }

    pub fn set_points(&mut self, path: FieldPath, points: Vec<ControlPoint>) {
        self.set(path, FieldValue::Points(points));
    }

    pub fn get(&self, path: &FieldPath) -> Option<&FieldValue> {
        self.fields.get(path)
    }

    pub fn scalar(&self, path: &FieldPath) -> Option<f64> {
        self.get(path).and_then(FieldValue::as_scalar)
    }

    pub fn points(&self, path: &FieldPath) -> Option<&[ControlPoint]> {
        self.get(path).and_then(FieldValue::as_points)
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.fields.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &FieldValue)> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_display() {
        let path = FieldPath::new("cable out", vec!["uvw2".into(), 4usize.into()], "w");
        assert_eq!(path.to_string(), "cable out/uvw2[4].w");
    }

    #[test]
    fn context_overwrites_and_compares_fieldwise() {
        let alpha = FieldPath::new("inner", vec!["rho".into()], "alpha");
        let mut a = GeometryContext::new();
        a.set_scalar(alpha.clone(), 1.0);
        a.set_scalar(alpha.clone(), 0.5);
        assert_eq!(a.len(), 1);
        assert_eq!(a.scalar(&alpha), Some(0.5));
        assert!(a.points(&alpha).is_none());

        let mut b = GeometryContext::new();
        b.set_scalar(alpha, 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn field_value_serializes_untagged() {
        let json = serde_json::to_string(&FieldValue::Scalar(2.0)).unwrap();
        assert_eq!(json, "2.0");
        let points = FieldValue::Points(vec![ControlPoint::new(0.0, 1.0, 2.0)]);
        let back: FieldValue = serde_json::from_str(&serde_json::to_string(&points).unwrap()).unwrap();
        assert_eq!(back, points);
    }
}
