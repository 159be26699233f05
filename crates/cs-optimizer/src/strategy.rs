//! Candidate generation strategies.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::input::InputParameter;
use crate::log::IterationRecord;
use cs_types::SampleStrategy;

/// Parameter name to value for one step.
pub type Candidate = HashMap<String, f64>;

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Next candidate for `parameters`, or `None` when exhausted.
    fn suggest(&mut self, parameters: &[InputParameter]) -> Option<Candidate>;

    /// Report a completed step so adaptive strategies can learn.
    fn report(&mut self, _record: &IterationRecord) {}

    /// Candidates left, when the strategy knows.
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// Total candidates the strategy will offer for `parameters`, when finite
    /// and known up front.
    fn planned(&self, _parameters: &[InputParameter]) -> Option<usize> {
        None
    }

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid over every parameter's grid points.
///
/// Combinations are enumerated in odometer order: the first parameter varies
/// slowest. Stepped ranges use their own grid; continuous ranges are split
/// into `float_steps` points.
#[derive(Debug, Clone)]
pub struct GridSearch {
    float_steps: usize,
    cursor: usize,
    axes: Option<Vec<(String, Vec<f64>)>>,
}

impl GridSearch {
    pub fn new(float_steps: usize) -> Self {
        Self {
            float_steps: float_steps.max(2),
            cursor: 0,
            axes: None,
        }
    }

    /// Total number of combinations, `None` on overflow.
    pub fn grid_size(&self, parameters: &[InputParameter]) -> Option<usize> {
        parameters.iter().try_fold(1usize, |total, param| {
            total.checked_mul(param.range().grid_or_linspace(self.float_steps).len())
        })
    }

    fn build_axes(&self, parameters: &[InputParameter]) -> Vec<(String, Vec<f64>)> {
        parameters
            .iter()
            .map(|param| {
                (
                    param.name().to_string(),
                    param.range().grid_or_linspace(self.float_steps),
                )
            })
            .collect()
    }

    fn total(axes: &[(String, Vec<f64>)]) -> usize {
        axes.iter()
            .try_fold(1usize, |total, (_, values)| total.checked_mul(values.len()))
            .unwrap_or(usize::MAX)
    }

    /// Decode a flat combination index, last axis fastest.
    fn combination(axes: &[(String, Vec<f64>)], mut index: usize) -> Candidate {
        let mut candidate = Candidate::with_capacity(axes.len());
        for (name, values) in axes.iter().rev() {
            let len = values.len().max(1);
            if let Some(value) = values.get(index % len) {
                candidate.insert(name.clone(), *value);
            }
            index /= len;
        }
        candidate
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, parameters: &[InputParameter]) -> Option<Candidate> {
        if self.axes.is_none() {
            let axes = self.build_axes(parameters);
            debug!(combinations = Self::total(&axes), "Built search grid");
            self.axes = Some(axes);
        }
        let axes = self.axes.as_ref()?;
        if self.cursor >= Self::total(axes) {
            return None;
        }
        let candidate = Self::combination(axes, self.cursor);
        self.cursor += 1;
        Some(candidate)
    }

    fn remaining(&self) -> Option<usize> {
        self.axes
            .as_ref()
            .map(|axes| Self::total(axes).saturating_sub(self.cursor))
    }

    fn planned(&self, parameters: &[InputParameter]) -> Option<usize> {
        self.grid_size(parameters)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent uniform sampling of every parameter's range.
///
/// Stepped ranges are sampled on their grid. A fixed seed makes the sequence
/// reproducible.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: ChaCha8Rng,
    seed: u64,
}

impl RandomSearch {
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, parameters: &[InputParameter]) -> Option<Candidate> {
        Some(
            parameters
                .iter()
                .map(|param| {
                    let value = param.range().sample(SampleStrategy::Uniform, &mut self.rng);
                    (param.name().to_string(), value)
                })
                .collect(),
        )
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Externally driven ----

/// Candidates pushed by an outside optimizer, served in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct CandidateQueue {
    pending: VecDeque<Candidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.pending.push_back(candidate);
    }
}

impl FromIterator<Candidate> for CandidateQueue {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        Self {
            pending: iter.into_iter().collect(),
        }
    }
}

impl SearchStrategy for CandidateQueue {
    fn suggest(&mut self, _parameters: &[InputParameter]) -> Option<Candidate> {
        self.pending.pop_front()
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.pending.len())
    }

    fn name(&self) -> &str {
        "queue"
    }
}
