//! Closed numeric intervals with optional discretization.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::RangeError;

const LOWER_KEYS: &[&str] = &["lowerBound", "lower_bound", "lower"];
const UPPER_KEYS: &[&str] = &["upperBound", "upper_bound", "upper"];
const STEP_KEYS: &[&str] = &["stepCount", "step_count", "steps"];

/// A closed interval `[lower_bound, upper_bound]`, optionally split into
/// `step_count` equal steps (`step_count + 1` grid points).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct Range {
    lower_bound: f64,
    upper_bound: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    step_count: Option<u32>,
}

/// How [`Range::sample`] picks a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStrategy {
    /// Uniform over the interval, or uniform over grid points when stepped.
    Uniform,
    /// Caller-supplied position in `[0, 1]`; snapped to the nearest grid
    /// point when stepped. Values outside `[0, 1]` are clamped.
    Fraction(f64),
}

impl Range {
    pub fn new(lower_bound: f64, upper_bound: f64) -> Result<Self, RangeError> {
        if !lower_bound.is_finite() {
            return Err(RangeError::NonFiniteBound {
                bound: "lowerBound".into(),
            });
        }
        if !upper_bound.is_finite() {
            return Err(RangeError::NonFiniteBound {
                bound: "upperBound".into(),
            });
        }
        if lower_bound > upper_bound {
            return Err(RangeError::InvertedBounds {
                lower: lower_bound,
                upper: upper_bound,
            });
        }
        Ok(Self {
            lower_bound,
            upper_bound,
            step_count: None,
        })
    }

    /// Convenience constructor for a discretized range.
    pub fn stepped(lower_bound: f64, upper_bound: f64, step_count: u32) -> Result<Self, RangeError> {
        Self::new(lower_bound, upper_bound)?.with_step_count(step_count)
    }

    /// A range holding exactly one value.
    pub fn fixed(value: f64) -> Result<Self, RangeError> {
        Self::new(value, value)
    }

    pub fn with_step_count(mut self, step_count: u32) -> Result<Self, RangeError> {
        if step_count == 0 {
            return Err(RangeError::InvalidStepCount {
                value: step_count.to_string(),
            });
        }
        self.step_count = Some(step_count);
        Ok(self)
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn step_count(&self) -> Option<u32> {
        self.step_count
    }

    pub fn span(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower_bound && value <= self.upper_bound
    }

    /// Grid point `index` (0-based, low to high). The last point is exactly
    /// `upper_bound`. `None` for continuous ranges or an index past the grid.
    pub fn grid_point(&self, index: u32) -> Option<f64> {
        let steps = self.step_count?;
        if index > steps {
            return None;
        }
        if index == steps {
            return Some(self.upper_bound);
        }
        Some(self.interpolate(f64::from(index), f64::from(steps)))
    }

    /// All grid points of a stepped range, low to high.
    pub fn grid_points(&self) -> Option<Vec<f64>> {
        let steps = self.step_count?;
        (0..=steps).map(|i| self.grid_point(i)).collect()
    }

    /// Grid points, falling back to `default_points` evenly spaced values for
    /// continuous ranges. A single-valued range yields one point.
    pub fn grid_or_linspace(&self, default_points: usize) -> Vec<f64> {
        match self.grid_points() {
            Some(points) => points,
            None if self.span() == 0.0 => vec![self.lower_bound],
            None => {
                let n = default_points.max(2);
                (0..n)
                    .map(|i| {
                        if i == n - 1 {
                            self.upper_bound
                        } else {
                            self.interpolate(i as f64, (n - 1) as f64)
                        }
                    })
                    .collect()
            }
        }
    }

    /// Value at relative position `fraction` (clamped to `[0, 1]`), snapped to
    /// the nearest grid point when stepped.
    pub fn at_fraction(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        match self.step_count {
            Some(steps) => {
                let index = (fraction * f64::from(steps)).round() as u32;
                self.grid_point(index.min(steps)).unwrap_or(self.upper_bound)
            }
            None => self.interpolate(fraction, 1.0),
        }
    }

    pub fn sample<R: Rng>(&self, strategy: SampleStrategy, rng: &mut R) -> f64 {
        match (strategy, self.step_count) {
            (SampleStrategy::Uniform, Some(steps)) => {
                let index = rng.gen_range(0..=steps);
                self.grid_point(index).unwrap_or(self.upper_bound)
            }
            (SampleStrategy::Uniform, None) => self.at_fraction(rng.gen::<f64>()),
            (SampleStrategy::Fraction(fraction), _) => self.at_fraction(fraction),
        }
    }

    /// The point `numerator / denominator` of the way from lower to upper
    /// bound. Bounds far enough apart overflow `span`, so those are blended
    /// directly instead.
    fn interpolate(&self, numerator: f64, denominator: f64) -> f64 {
        let span = self.span();
        let value = if span.is_finite() {
            self.lower_bound + span / denominator * numerator
        } else {
            let t = numerator / denominator;
            self.lower_bound * (1.0 - t) + self.upper_bound * t
        };
        value.clamp(self.lower_bound, self.upper_bound)
    }

    /// Parse a declarative range such as
    /// `{"lowerBound": 0, "upperBound": 10, "stepCount": 5}`.
    pub fn from_json(value: &Value) -> Result<Self, RangeError> {
        let object = value.as_object().ok_or(RangeError::NotAnObject)?;
        Self::from_fields(object)
    }

    /// Parse range fields out of a larger object (unrelated keys are ignored).
    pub fn from_fields(object: &Map<String, Value>) -> Result<Self, RangeError> {
        let lower = read_bound(object, LOWER_KEYS)?;
        let upper = read_bound(object, UPPER_KEYS)?;
        let range = Self::new(lower, upper)?;

        match lookup(object, STEP_KEYS) {
            None | Some(Value::Null) => Ok(range),
            Some(raw) => {
                let steps = raw
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| RangeError::InvalidStepCount {
                        value: raw.to_string(),
                    })?;
                range.with_step_count(steps)
            }
        }
    }
}

impl TryFrom<Value> for Range {
    type Error = RangeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step_count {
            Some(steps) => write!(f, "[{}, {}] in {} steps", self.lower_bound, self.upper_bound, steps),
            None => write!(f, "[{}, {}]", self.lower_bound, self.upper_bound),
        }
    }
}

/// `num_points` evenly spaced values from `start` to `end`, both inclusive.
pub fn linspace(start: f64, end: f64, num_points: usize) -> Result<Vec<f64>, RangeError> {
    if num_points < 2 {
        return Err(RangeError::TooFewPoints {
            required: 2,
            actual: num_points,
        });
    }
    let steps = u32::try_from(num_points - 1).map_err(|_| RangeError::InvalidStepCount {
        value: num_points.to_string(),
    })?;
    Range::stepped(start, end, steps)?
        .grid_points()
        .ok_or(RangeError::InvalidStepCount {
            value: num_points.to_string(),
        })
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn read_bound(object: &Map<String, Value>, keys: &[&str]) -> Result<f64, RangeError> {
    let bound = keys[0];
    match lookup(object, keys) {
        None | Some(Value::Null) => Err(RangeError::MissingBound {
            bound: bound.to_string(),
        }),
        Some(raw) => raw.as_f64().ok_or_else(|| RangeError::NonNumericBound {
            bound: bound.to_string(),
            value: raw.to_string(),
        }),
    }
}
