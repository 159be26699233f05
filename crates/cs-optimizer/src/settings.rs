//! Search run settings, lifecycle state and summaries.

use chrono::{DateTime, Utc};
use cs_types::GeometryContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::log::IterationRecord;

/// Unique search run identifier.
pub type SearchId = Uuid;

/// Whether the objective criterion is maximized or minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    Maximize,
    #[default]
    Minimize,
}

impl ObjectiveDirection {
    pub fn minimize(self) -> bool {
        self == Self::Minimize
    }
}

/// Criterion the search tracks a best record for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub criterion: String,
    #[serde(default)]
    pub direction: ObjectiveDirection,
}

impl Objective {
    pub fn new(criterion: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            criterion: criterion.into(),
            direction,
        }
    }
}

/// When a search stops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoppingRule {
    /// Cap on appended records.
    pub max_iterations: Option<usize>,
    /// Converge once every criterion is settled within this tolerance.
    pub tolerance: Option<f64>,
    /// `run()` gives up after this many steps in a row fail before anything
    /// is recorded.
    pub max_consecutive_failures: usize,
}

impl Default for StoppingRule {
    fn default() -> Self {
        Self {
            max_iterations: Some(100),
            tolerance: None,
            max_consecutive_failures: 10,
        }
    }
}

/// Configuration for one search run.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub id: SearchId,
    pub name: String,
    pub description: String,
    pub stopping: StoppingRule,
    pub evaluation_timeout: Option<Duration>,
    pub objective: Option<Objective>,
    /// Reduce criteria on the rayon pool.
    pub parallel_criteria: bool,
    /// Fields every step starts from before parameters are applied.
    pub base_context: GeometryContext,
    pub created_at: DateTime<Utc>,
}

impl SearchSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            stopping: StoppingRule::default(),
            evaluation_timeout: None,
            objective: None,
            parallel_criteria: false,
            base_context: GeometryContext::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.stopping.max_iterations = Some(n);
        self
    }

    pub fn without_iteration_cap(mut self) -> Self {
        self.stopping.max_iterations = None;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.stopping.tolerance = Some(tolerance);
        self
    }

    pub fn with_stopping_rule(mut self, stopping: StoppingRule) -> Self {
        self.stopping = stopping;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = Some(timeout);
        self
    }

    pub fn with_objective(mut self, criterion: &str, direction: ObjectiveDirection) -> Self {
        self.objective = Some(Objective::new(criterion, direction));
        self
    }

    pub fn with_parallel_criteria(mut self, parallel: bool) -> Self {
        self.parallel_criteria = parallel;
        self
    }

    pub fn with_base_context(mut self, context: GeometryContext) -> Self {
        self.base_context = context;
        self
    }
}

/// Lifecycle state of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Configured,
    Running,
    Converged,
    Exhausted,
    Failed,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted | Self::Failed)
    }
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub id: SearchId,
    pub name: String,
    pub state: SearchState,
    pub iterations: usize,
    pub failed_evaluations: usize,
    /// Steps abandoned before a record was appended.
    pub skipped_steps: usize,
    pub best: Option<IterationRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
