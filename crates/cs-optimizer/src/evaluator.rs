//! Seams to the outside world: building a geometry from a context and running
//! the external solver on it.

use crossbeam_channel::RecvTimeoutError;
use cs_types::{Calculation, EvaluationError, FieldPath, GeometryContext, GeometryError, ResultsSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Turns a filled [`GeometryContext`] into a model instance.
pub trait GeometryFactory {
    type Geometry;

    fn build(&self, context: &GeometryContext) -> Result<Self::Geometry, GeometryError>;

    /// Check that `path` names a field of the model. Called once per
    /// parameter target before the first step.
    fn validate_target(&self, _path: &FieldPath) -> Result<(), GeometryError> {
        Ok(())
    }
}

/// What the search asks an evaluator for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub iteration: usize,
    /// Union of the calculations every configured criterion needs.
    pub calculations: BTreeSet<Calculation>,
}

impl EvaluationRequest {
    pub fn requires(&self, calculation: Calculation) -> bool {
        self.calculations.contains(&calculation)
    }
}

/// Runs the external physics solver.
pub trait Evaluator<G> {
    /// Evaluate `geometry`. Implementations that can cancel work should honor
    /// `timeout`; see [`TimeoutEvaluator`] for enforcing it from outside.
    fn evaluate(
        &self,
        geometry: &G,
        request: &EvaluationRequest,
        timeout: Option<Duration>,
    ) -> Result<ResultsSnapshot, EvaluationError>;
}

/// Enforces the evaluation timeout by running the inner evaluator on a worker
/// thread. A timed out worker is detached and its late result dropped.
///
/// Detached workers are not cancelled and keep running until the inner
/// evaluator returns, so a solver that hangs leaks one thread per timed out
/// step. Give the inner evaluator its own cancellation through the `timeout`
/// argument when that matters.
#[derive(Debug)]
pub struct TimeoutEvaluator<E> {
    inner: Arc<E>,
}

impl<E> TimeoutEvaluator<E> {
    pub fn new(inner: E) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E> Clone for TimeoutEvaluator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G, E> Evaluator<G> for TimeoutEvaluator<E>
where
    G: Clone + Send + 'static,
    E: Evaluator<G> + Send + Sync + 'static,
{
    fn evaluate(
        &self,
        geometry: &G,
        request: &EvaluationRequest,
        timeout: Option<Duration>,
    ) -> Result<ResultsSnapshot, EvaluationError> {
        let Some(timeout) = timeout else {
            return self.inner.evaluate(geometry, request, None);
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let geometry = geometry.clone();
        let job = request.clone();
        thread::Builder::new()
            .name(format!("evaluator-{}", request.iteration))
            .spawn(move || {
                // Receiver may be gone after a timeout.
                let _ = tx.send(inner.evaluate(&geometry, &job, Some(timeout)));
            })
            .map_err(|e| EvaluationError::Solver {
                message: format!("failed to spawn evaluation worker: {e}"),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                debug!(iteration = request.iteration, "Evaluation finished within timeout");
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(iteration = request.iteration, timeout_ms, "Evaluation timed out");
                Err(EvaluationError::Timeout { timeout_ms })
            }
            Err(RecvTimeoutError::Disconnected) => Err(EvaluationError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_types::Harmonics;

    struct Sleepy {
        delay: Duration,
    }

    impl Evaluator<f64> for Sleepy {
        fn evaluate(
            &self,
            geometry: &f64,
            _request: &EvaluationRequest,
            _timeout: Option<Duration>,
        ) -> Result<ResultsSnapshot, EvaluationError> {
            thread::sleep(self.delay);
            Ok(ResultsSnapshot::new().with_harmonics(Harmonics::new(vec![], vec![*geometry])))
        }
    }

    struct Panicky;

    impl Evaluator<f64> for Panicky {
        fn evaluate(&self, _: &f64, _: &EvaluationRequest, _: Option<Duration>) -> Result<ResultsSnapshot, EvaluationError> {
            panic!("solver crashed");
        }
    }

    fn request() -> EvaluationRequest {
        EvaluationRequest {
            iteration: 3,
            calculations: BTreeSet::from([Calculation::Harmonics]),
        }
    }

    #[test]
    fn passes_through_without_timeout() {
        let evaluator = TimeoutEvaluator::new(Sleepy {
            delay: Duration::from_millis(1),
        });
        let snapshot = evaluator.evaluate(&0.25, &request(), None).unwrap();
        assert_eq!(snapshot.harmonics.unwrap().b(1), Some(0.25));
    }

    #[test]
    fn fast_evaluation_beats_timeout() {
        let evaluator = TimeoutEvaluator::new(Sleepy {
            delay: Duration::from_millis(1),
        });
        let result = evaluator.evaluate(&1.0, &request(), Some(Duration::from_secs(5)));
        assert!(result.is_ok());
    }

    #[test]
    fn slow_evaluation_times_out() {
        let evaluator = TimeoutEvaluator::new(Sleepy {
            delay: Duration::from_millis(500),
        });
        let err = evaluator
            .evaluate(&1.0, &request(), Some(Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err, EvaluationError::Timeout { timeout_ms: 20 });
    }

    #[test]
    fn timed_out_worker_runs_to_completion_detached() {
        let evaluator = TimeoutEvaluator::new(Sleepy {
            delay: Duration::from_millis(300),
        });
        assert!(evaluator
            .evaluate(&1.0, &request(), Some(Duration::from_millis(20)))
            .is_err());
        assert_eq!(Arc::strong_count(&evaluator.inner), 2);

        thread::sleep(Duration::from_secs(1));
        assert_eq!(Arc::strong_count(&evaluator.inner), 1);
    }

    #[test]
    fn crashed_worker_reports_disconnect() {
        let evaluator = TimeoutEvaluator::new(Panicky);
        let err = evaluator
            .evaluate(&1.0, &request(), Some(Duration::from_secs(5)))
            .unwrap_err();
        assert_eq!(err, EvaluationError::Disconnected);
    }

    #[test]
    fn request_lists_calculations() {
        assert!(request().requires(Calculation::Harmonics));
        assert!(!request().requires(Calculation::Mesh));
    }
}
