//! The parameter search state machine.

use chrono::{DateTime, Utc};
use cs_types::{
    Calculation, CriterionError, CsError, CsResult, GeometryContext, ResultsSnapshot, SearchError,
};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::evaluator::{EvaluationRequest, Evaluator, GeometryFactory};
use crate::input::InputParameter;
use crate::log::{IterationLog, IterationRecord};
use crate::output::OutputCriterion;
use crate::settings::{SearchId, SearchSettings, SearchState, SearchSummary};
use crate::strategy::{Candidate, SearchStrategy};

/// Column names the exports use for their own fields.
const RESERVED_COLUMNS: &[&str] = &["index", "timestamp", "evaluation_error"];

/// Drives candidates through geometry construction and evaluation, appending
/// one record per completed step.
///
/// ```text
/// Configured --step--> Running --stopping rule--> Converged | Exhausted
///                         \--criterion/log failure--> Failed
/// ```
pub struct ParameterSearch<F, E> {
    settings: SearchSettings,
    parameters: Vec<InputParameter>,
    criteria: Vec<OutputCriterion>,
    log: IterationLog,
    factory: F,
    evaluator: E,
    strategy: Box<dyn SearchStrategy>,
    calculations: BTreeSet<Calculation>,
    state: SearchState,
    best: Option<usize>,
    skipped: usize,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<F, E> ParameterSearch<F, E>
where
    F: GeometryFactory,
    E: Evaluator<F::Geometry>,
{
    /// Validate the setup and create a search in the `Configured` state.
    pub fn new(
        parameters: Vec<InputParameter>,
        criteria: Vec<OutputCriterion>,
        factory: F,
        evaluator: E,
        strategy: Box<dyn SearchStrategy>,
        settings: SearchSettings,
    ) -> CsResult<Self> {
        if parameters.is_empty() {
            return Err(SearchError::EmptyParameters.into());
        }
        if criteria.is_empty() {
            return Err(SearchError::EmptyCriteria.into());
        }
        check_names(&parameters, &criteria)?;

        if let Some(objective) = &settings.objective {
            if !criteria.iter().any(|c| c.name() == objective.criterion) {
                return Err(SearchError::UnknownObjective {
                    criterion: objective.criterion.clone(),
                }
                .into());
            }
        }

        for parameter in &parameters {
            for path in parameter.target_fields() {
                factory.validate_target(&path)?;
            }
        }

        if let (Some(planned), Some(max)) = (strategy.planned(&parameters), settings.stopping.max_iterations) {
            if planned > max {
                warn!(
                    planned,
                    max_iterations = max,
                    strategy = strategy.name(),
                    "Iteration cap is below the planned candidate count, the search will stop early"
                );
            }
        }

        let calculations = criteria
            .iter()
            .flat_map(|c| c.required_calculations().iter().copied())
            .collect();
        let log = IterationLog::new(
            parameters.iter().map(|p| p.name().to_string()).collect(),
            criteria.iter().map(|c| c.name().to_string()).collect(),
        );

        info!(
            search_id = %settings.id,
            name = %settings.name,
            strategy = strategy.name(),
            parameters = parameters.len(),
            criteria = criteria.len(),
            "Parameter search configured"
        );

        Ok(Self {
            settings,
            parameters,
            criteria,
            log,
            factory,
            evaluator,
            strategy,
            calculations,
            state: SearchState::Configured,
            best: None,
            skipped: 0,
            started_at: None,
            finished_at: None,
        })
    }

    /// Ask the strategy for a candidate and run one step with it.
    pub fn step(&mut self) -> CsResult<SearchState> {
        self.ensure_steppable()?;
        if self.iteration_cap_reached() {
            info!(iterations = self.log.len(), "Iteration cap reached");
            self.finish(SearchState::Exhausted);
            return Ok(self.state);
        }
        match self.strategy.suggest(&self.parameters) {
            Some(candidate) => self.advance(&candidate, true),
            None => {
                info!(strategy = self.strategy.name(), "Strategy has no more candidates");
                self.finish(SearchState::Exhausted);
                Ok(self.state)
            }
        }
    }

    /// Run one step with an externally supplied candidate.
    ///
    /// Every parameter must have a value in range, otherwise nothing is
    /// assigned. A geometry failure is returned without appending a record;
    /// an evaluation failure is recorded with NaN outputs. An empty strategy
    /// does not end the search here; only `step` asks the strategy.
    pub fn step_with(&mut self, candidate: &Candidate) -> CsResult<SearchState> {
        self.advance(candidate, false)
    }

    fn advance(&mut self, candidate: &Candidate, suggested: bool) -> CsResult<SearchState> {
        self.ensure_steppable()?;
        let iteration = self.log.next_index();

        self.assign(candidate).map_err(|e| e.at_iteration(iteration))?;
        if self.state == SearchState::Configured {
            self.state = SearchState::Running;
            self.started_at = Some(Utc::now());
        }

        let context = self.context();
        let geometry = self.factory.build(&context).map_err(|e| {
            warn!(iteration, error = %e, "Geometry construction failed");
            CsError::from(e).at_iteration(iteration)
        })?;

        let inputs: HashMap<String, f64> = self
            .parameters
            .iter()
            .map(|p| (p.name().to_string(), p.current_value()))
            .collect();
        let request = EvaluationRequest {
            iteration,
            calculations: self.calculations.clone(),
        };

        let record = match self
            .evaluator
            .evaluate(&geometry, &request, self.settings.evaluation_timeout)
        {
            Ok(snapshot) => match self.reduce(&snapshot) {
                Ok(outputs) => IterationRecord::new(iteration, inputs, outputs),
                Err(e) => {
                    error!(iteration, error = %e, "Results snapshot does not fit the configured criteria");
                    self.finish(SearchState::Failed);
                    return Err(CsError::from(e).at_iteration(iteration));
                }
            },
            Err(e) => {
                warn!(iteration, error = %e, "Evaluation failed, recording NaN outputs");
                IterationRecord::failed(iteration, inputs, self.criteria.iter().map(|c| c.name()), e.to_string())
            }
        };

        if let Err(e) = self.log.append(record) {
            error!(iteration, error = %e, "Could not append iteration record");
            self.finish(SearchState::Failed);
            return Err(CsError::from(e).at_iteration(iteration));
        }
        self.after_append(suggested);
        Ok(self.state)
    }

    /// Step until a terminal state. Steps that fail before a record is
    /// appended are skipped; too many in a row exhaust the search.
    pub fn run(&mut self) -> CsResult<SearchSummary> {
        info!(
            search_id = %self.settings.id,
            strategy = self.strategy.name(),
            max_iterations = ?self.settings.stopping.max_iterations,
            "Starting parameter search"
        );
        let limit = self.settings.stopping.max_consecutive_failures.max(1);
        let mut consecutive_failures = 0;

        while !self.state.is_terminal() {
            match self.step() {
                Ok(_) => consecutive_failures = 0,
                Err(err) if is_skippable(&err) => {
                    consecutive_failures += 1;
                    self.skipped += 1;
                    warn!(error = %err, consecutive_failures, "Skipping iteration");
                    if consecutive_failures >= limit {
                        warn!(limit, "Too many consecutive failures, stopping search");
                        self.finish(SearchState::Exhausted);
                    }
                }
                Err(err) => {
                    error!(error = %err, "Parameter search aborted");
                    self.finish(SearchState::Failed);
                    return Err(err);
                }
            }
        }

        let summary = self.summary();
        info!(
            state = %summary.state,
            iterations = summary.iterations,
            failed_evaluations = summary.failed_evaluations,
            skipped = summary.skipped_steps,
            "Parameter search finished"
        );
        Ok(summary)
    }

    fn ensure_steppable(&self) -> CsResult<()> {
        if self.state.is_terminal() {
            return Err(SearchError::InvalidState {
                state: self.state.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn iteration_cap_reached(&self) -> bool {
        self.settings
            .stopping
            .max_iterations
            .is_some_and(|max| self.log.len() >= max)
    }

    fn finish(&mut self, state: SearchState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    fn assign(&mut self, candidate: &Candidate) -> CsResult<()> {
        let mut values = Vec::with_capacity(self.parameters.len());
        for parameter in &self.parameters {
            let value = *candidate
                .get(parameter.name())
                .ok_or_else(|| SearchError::IncompleteCandidate {
                    parameter: parameter.name().to_string(),
                })?;
            parameter.check_value(value)?;
            values.push(value);
        }
        if candidate.len() > values.len() {
            debug!(extra = candidate.len() - values.len(), "Ignoring unknown candidate keys");
        }
        for (parameter, value) in self.parameters.iter_mut().zip(values) {
            parameter.set_value(value)?;
        }
        Ok(())
    }

    fn context(&self) -> GeometryContext {
        let mut context = self.settings.base_context.clone();
        for parameter in &self.parameters {
            parameter.apply_to(&mut context);
        }
        context
    }

    fn reduce(&self, snapshot: &ResultsSnapshot) -> Result<HashMap<String, f64>, CriterionError> {
        let evaluate = |criterion: &OutputCriterion| {
            criterion
                .evaluate(snapshot)
                .map(|value| (criterion.name().to_string(), value))
        };
        if self.settings.parallel_criteria {
            self.criteria.par_iter().map(evaluate).collect()
        } else {
            self.criteria.iter().map(evaluate).collect()
        }
    }

    fn after_append(&mut self, suggested: bool) {
        let Some(record) = self.log.last() else {
            return;
        };
        debug!(
            iteration = record.iteration_index,
            valid = record.is_valid(),
            "Iteration recorded"
        );
        self.strategy.report(record);

        if let Some(objective) = &self.settings.objective {
            let current = self
                .best
                .and_then(|i| self.log.get(i))
                .and_then(|r| r.output(&objective.criterion));
            if let Some(value) = record.output(&objective.criterion).filter(|v| !v.is_nan()) {
                let improves = match current {
                    None => true,
                    Some(best) if objective.direction.minimize() => value < best,
                    Some(best) => value > best,
                };
                if improves {
                    debug!(iteration = record.iteration_index, value, "New best record");
                    self.best = Some(record.iteration_index);
                }
            }
        }

        let next = self.next_state(suggested);
        if next.is_terminal() {
            info!(state = %next, iterations = self.log.len(), "Stopping rule triggered");
            self.finish(next);
        }
    }

    fn next_state(&self, suggested: bool) -> SearchState {
        let strategy_drained = suggested && self.strategy.remaining() == Some(0);
        if self.is_converged() {
            SearchState::Converged
        } else if self.iteration_cap_reached() || strategy_drained {
            SearchState::Exhausted
        } else {
            SearchState::Running
        }
    }

    /// Converged when a tolerance is set and every criterion of the latest
    /// record is settled. Failed evaluations never converge.
    fn is_converged(&self) -> bool {
        let Some(tolerance) = self.settings.stopping.tolerance else {
            return false;
        };
        let Some(latest) = self.log.last().filter(|r| r.is_valid()) else {
            return false;
        };
        let previous = self.log.to_sequence().rev().skip(1).find(|r| r.is_valid());
        self.criteria.iter().all(|criterion| {
            let value = latest.output(criterion.name()).unwrap_or(f64::NAN);
            let prior = previous.and_then(|r| r.output(criterion.name()));
            criterion.is_settled(value, prior, tolerance)
        })
    }

    pub fn summary(&self) -> SearchSummary {
        SearchSummary {
            id: self.settings.id,
            name: self.settings.name.clone(),
            state: self.state,
            iterations: self.log.len(),
            failed_evaluations: self.log.len() - self.log.valid_count(),
            skipped_steps: self.skipped,
            best: self.best_record().cloned(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

impl<F, E> ParameterSearch<F, E> {
    pub fn id(&self) -> SearchId {
        self.settings.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.settings.created_at
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn parameters(&self) -> &[InputParameter] {
        &self.parameters
    }

    pub fn criteria(&self) -> &[OutputCriterion] {
        &self.criteria
    }

    pub fn log(&self) -> &IterationLog {
        &self.log
    }

    pub fn iteration_count(&self) -> usize {
        self.log.len()
    }

    pub fn latest_record(&self) -> Option<&IterationRecord> {
        self.log.last()
    }

    /// Best record for the objective, if one is configured.
    pub fn best_record(&self) -> Option<&IterationRecord> {
        self.best.and_then(|i| self.log.get(i))
    }

    /// Union of the calculations the configured criteria need.
    pub fn required_calculations(&self) -> &BTreeSet<Calculation> {
        &self.calculations
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }
}

fn check_names(parameters: &[InputParameter], criteria: &[OutputCriterion]) -> CsResult<()> {
    let collision = |kind: &str, name: &str| -> CsError {
        SearchError::NameCollision {
            kind: kind.to_string(),
            name: name.to_string(),
        }
        .into()
    };

    let mut inputs = HashSet::new();
    for name in parameters.iter().map(InputParameter::name) {
        if RESERVED_COLUMNS.contains(&name) {
            return Err(collision("column", name));
        }
        if !inputs.insert(name) {
            return Err(collision("parameter", name));
        }
    }

    let mut outputs = HashSet::new();
    for name in criteria.iter().map(OutputCriterion::name) {
        if RESERVED_COLUMNS.contains(&name) || inputs.contains(name) {
            return Err(collision("column", name));
        }
        if !outputs.insert(name) {
            return Err(collision("criterion", name));
        }
    }
    Ok(())
}

/// Errors raised before a record is appended that leave the search usable.
fn is_skippable(err: &CsError) -> bool {
    matches!(
        err.root(),
        CsError::Geometry(_)
            | CsError::Parameter(_)
            | CsError::Search(SearchError::IncompleteCandidate { .. })
    )
}
