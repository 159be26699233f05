use cs_optimizer::{
    CandidateQueue, CriterionKind, EvaluationRequest, Evaluator, GeometryFactory, GridSearch, InputParameter,
    OutputCriterion, ParameterSearch, ScalingTarget, SearchDocument, SearchSettings, SearchState, TimeoutEvaluator,
};
use cs_types::{
    CsError, EvaluationError, FieldPath, GeometryContext, GeometryError, Harmonics, MeshResults, Range,
    ResultsSnapshot, SearchError,
};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Geometry is the context itself.
struct ContextFactory;

impl GeometryFactory for ContextFactory {
    type Geometry = GeometryContext;

    fn build(&self, context: &GeometryContext) -> Result<GeometryContext, GeometryError> {
        Ok(context.clone())
    }
}

/// Every evaluation returns the same curvature everywhere.
struct FixedCurvature(f64);

impl Evaluator<GeometryContext> for FixedCurvature {
    fn evaluate(
        &self,
        _geometry: &GeometryContext,
        _request: &EvaluationRequest,
        _timeout: Option<Duration>,
    ) -> Result<ResultsSnapshot, EvaluationError> {
        let mesh = MeshResults::new(vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.1]]).with_curvature(vec![self.0; 2]);
        Ok(ResultsSnapshot::new().with_mesh(mesh))
    }
}

/// b3 follows the scaling written by the parameter; one iteration is slow.
struct SlowAt {
    iteration: usize,
    delay: Duration,
}

impl Evaluator<GeometryContext> for SlowAt {
    fn evaluate(
        &self,
        geometry: &GeometryContext,
        request: &EvaluationRequest,
        _timeout: Option<Duration>,
    ) -> Result<ResultsSnapshot, EvaluationError> {
        if request.iteration == self.iteration {
            thread::sleep(self.delay);
        }
        let path = FieldPath::new("B3", vec!["harmonic_drive".into()], "scaling");
        let scaling = geometry.scalar(&path).unwrap_or(f64::NAN);
        Ok(ResultsSnapshot::new().with_harmonics(Harmonics::new(vec![0.0; 3], vec![0.0, 0.0, scaling])))
    }
}

fn scaling_parameter(range: Range) -> InputParameter {
    InputParameter::multipole_scaling("b3", "B3", ScalingTarget::Constant, range)
}

fn b3_criterion() -> OutputCriterion {
    OutputCriterion::new(CriterionKind::MultipoleB { order: 3 }).with_name("b3_out")
}

#[test]
fn grid_enumerates_stepped_range() {
    let mut search = ParameterSearch::new(
        vec![scaling_parameter(Range::stepped(0.0, 10.0, 5).unwrap())],
        vec![b3_criterion()],
        ContextFactory,
        SlowAt {
            iteration: usize::MAX,
            delay: Duration::ZERO,
        },
        Box::new(GridSearch::new(5)),
        SearchSettings::new("grid"),
    )
    .unwrap();

    let summary = search.run().unwrap();
    assert_eq!(summary.state, SearchState::Exhausted);

    let visited: Vec<f64> = search.log().to_sequence().map(|r| r.input("b3").unwrap()).collect();
    assert_eq!(visited, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    let outputs: Vec<f64> = search.log().to_sequence().map(|r| r.output("b3_out").unwrap()).collect();
    assert_eq!(outputs, visited);
}

#[test]
fn unmet_bound_is_recorded_without_convergence() {
    let criterion = OutputCriterion::new(CriterionKind::MaxCurvature { region: None }).with_target_bound(0.5);
    let mut search = ParameterSearch::new(
        vec![scaling_parameter(Range::new(0.0, 1.0).unwrap())],
        vec![criterion],
        ContextFactory,
        FixedCurvature(0.7),
        Box::new(CandidateQueue::new()),
        SearchSettings::new("bound").with_tolerance(1e-3),
    )
    .unwrap();

    let candidate = HashMap::from([("b3".to_string(), 0.5)]);
    let state = search.step_with(&candidate).unwrap();

    assert_eq!(state, SearchState::Running);
    let record = search.latest_record().unwrap();
    assert_eq!(record.output("max_curvature_magnitude"), Some(0.7));
    assert!(record.is_valid());

    let next = HashMap::from([("b3".to_string(), 0.6)]);
    assert_eq!(search.step_with(&next).unwrap(), SearchState::Running);
    assert_eq!(search.iteration_count(), 2);
}

#[test]
fn timed_out_iteration_is_recorded_and_search_continues() {
    let evaluator = TimeoutEvaluator::new(SlowAt {
        iteration: 3,
        delay: Duration::from_millis(500),
    });
    let mut search = ParameterSearch::new(
        vec![scaling_parameter(Range::stepped(0.0, 9.0, 9).unwrap())],
        vec![b3_criterion()],
        ContextFactory,
        evaluator,
        Box::new(GridSearch::new(5)),
        SearchSettings::new("timeout")
            .with_max_iterations(10)
            .with_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let summary = search.run().unwrap();
    assert_eq!(summary.iterations, 10);
    assert_eq!(summary.failed_evaluations, 1);

    let log = search.log();
    let indices: Vec<usize> = log.to_sequence().map(|r| r.iteration_index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());

    let timed_out = log.get(3).unwrap();
    assert!(timed_out.output("b3_out").unwrap().is_nan());
    assert!(timed_out.evaluation_error.as_deref().unwrap().contains("timed out"));

    let next = log.get(4).unwrap();
    assert!(next.is_valid());
    assert_eq!(next.output("b3_out"), Some(4.0));
}

#[test]
fn duplicate_criterion_names_fail_setup() {
    let document = SearchDocument::from_json_str(
        r#"{
            "parameters": {
                "b3": { "type": "multipole_scaling", "node": "B3", "multipole": "b3",
                        "target": "constant", "lowerBound": 0, "upperBound": 1 }
            },
            "criteria": {
                "z": { "type": "max_z" },
                "z": { "type": "min_z" }
            }
        }"#,
    )
    .unwrap();

    let result = document.build(ContextFactory, FixedCurvature(0.1));
    match result.err() {
        Some(CsError::Search(SearchError::NameCollision { kind, name })) => {
            assert_eq!(kind, "criterion");
            assert_eq!(name, "z");
        }
        other => panic!("expected a name collision, got {other:?}"),
    }
}

#[test]
fn geometry_failures_are_skipped_by_run() {
    struct RejectNegative;

    impl GeometryFactory for RejectNegative {
        type Geometry = GeometryContext;

        fn build(&self, context: &GeometryContext) -> Result<GeometryContext, GeometryError> {
            let path = FieldPath::new("B3", vec!["harmonic_drive".into()], "scaling");
            match context.scalar(&path) {
                Some(v) if v < 0.0 => Err(GeometryError::Build {
                    message: "negative scaling".into(),
                }),
                _ => Ok(context.clone()),
            }
        }
    }

    let mut search = ParameterSearch::new(
        vec![scaling_parameter(Range::stepped(-1.0, 1.0, 2).unwrap())],
        vec![b3_criterion()],
        RejectNegative,
        SlowAt {
            iteration: usize::MAX,
            delay: Duration::ZERO,
        },
        Box::new(GridSearch::new(5)),
        SearchSettings::new("skip"),
    )
    .unwrap();

    let summary = search.run().unwrap();
    assert_eq!(summary.skipped_steps, 1);
    assert_eq!(summary.iterations, 2);
    let visited: Vec<f64> = search.log().to_sequence().map(|r| r.input("b3").unwrap()).collect();
    assert_eq!(visited, vec![0.0, 1.0]);
}

#[test]
fn factory_can_reject_targets() {
    struct NoHarmonicDrive;

    impl GeometryFactory for NoHarmonicDrive {
        type Geometry = GeometryContext;

        fn build(&self, context: &GeometryContext) -> Result<GeometryContext, GeometryError> {
            Ok(context.clone())
        }

        fn validate_target(&self, path: &FieldPath) -> Result<(), GeometryError> {
            Err(GeometryError::InvalidTarget { path: path.to_string() })
        }
    }

    let result = ParameterSearch::new(
        vec![scaling_parameter(Range::new(0.0, 1.0).unwrap())],
        vec![b3_criterion()],
        NoHarmonicDrive,
        FixedCurvature(0.1),
        Box::new(CandidateQueue::new()),
        SearchSettings::new("targets"),
    );
    assert!(matches!(
        result.err(),
        Some(CsError::Geometry(GeometryError::InvalidTarget { .. }))
    ));
}
