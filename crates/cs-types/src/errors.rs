use thiserror::Error;

/// Main error type for the coil search system
#[derive(Error, Debug)]
pub enum CsError {
    #[error("Range configuration error for '{name}': {source}")]
    RangeConfig {
        name: String,
        #[source]
        source: RangeError,
    },

    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Criterion error: {0}")]
    Criterion(#[from] CriterionError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Iteration {iteration}: {source}")]
    AtIteration {
        iteration: usize,
        #[source]
        source: Box<CsError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CsError {
    /// Attach the iteration index an error was raised in.
    pub fn at_iteration(self, iteration: usize) -> Self {
        match self {
            already @ CsError::AtIteration { .. } => already,
            other => CsError::AtIteration {
                iteration,
                source: Box::new(other),
            },
        }
    }

    /// Iteration index, if the error was raised inside a search step.
    pub fn iteration(&self) -> Option<usize> {
        match self {
            CsError::AtIteration { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// The underlying error with any iteration wrapper removed.
    pub fn root(&self) -> &CsError {
        match self {
            CsError::AtIteration { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Invalid range declarations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("missing bound: {bound}")]
    MissingBound { bound: String },

    #[error("bound {bound} is not numeric: {value}")]
    NonNumericBound { bound: String, value: String },

    #[error("bound {bound} is not finite")]
    NonFiniteBound { bound: String },

    #[error("lower bound {lower} is greater than upper bound {upper}")]
    InvertedBounds { lower: f64, upper: f64 },

    #[error("step count must be a positive integer, got {value}")]
    InvalidStepCount { value: String },

    #[error("range needs at least {required} points, got {actual}")]
    TooFewPoints { required: usize, actual: usize },

    #[error("range declaration must be an object")]
    NotAnObject,
}

/// Input parameter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("value {value} for parameter '{parameter}' is outside [{lower}, {upper}]")]
    OutOfRange {
        parameter: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("invalid control point layout for '{parameter}': {message}")]
    InvalidLayout { parameter: String, message: String },

    #[error("coordinate config {index} of '{parameter}' has {actual} increments, expected {expected}")]
    InvalidCoordinateConfig {
        parameter: String,
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Output criterion errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CriterionError {
    #[error("criterion '{criterion}' requires field '{field}' which the snapshot lacks")]
    MissingField { criterion: String, field: String },

    #[error("criterion '{criterion}': field '{field}' has {actual} entries, expected {expected}")]
    FieldLength {
        criterion: String,
        field: String,
        expected: usize,
        actual: usize,
    },
}

/// Iteration log errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LogError {
    #[error("iteration {actual} appended out of order, expected {expected}")]
    DuplicateIteration { expected: usize, actual: usize },

    #[error("iteration log is empty")]
    EmptyLog,

    #[error("unknown criterion: {criterion}")]
    UnknownCriterion { criterion: String },

    #[error("no valid values recorded for criterion '{criterion}'")]
    NoValidValue { criterion: String },

    #[error("record {iteration} does not match the log columns: {message}")]
    SchemaMismatch { iteration: usize, message: String },
}

/// Geometry construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("geometry build failed: {message}")]
    Build { message: String },

    #[error("model has no field at {path}")]
    InvalidTarget { path: String },
}

/// External evaluator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("solver failed: {message}")]
    Solver { message: String },

    #[error("evaluation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("evaluation worker disconnected")]
    Disconnected,
}

/// Search orchestration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("step() is not allowed in state {state}")]
    InvalidState { state: String },

    #[error("{kind} name '{name}' is used more than once")]
    NameCollision { kind: String, name: String },

    #[error("candidate has no value for parameter '{parameter}'")]
    IncompleteCandidate { parameter: String },

    #[error("search needs at least one input parameter")]
    EmptyParameters,

    #[error("search needs at least one output criterion")]
    EmptyCriteria,

    #[error("objective criterion '{criterion}' is not configured")]
    UnknownObjective { criterion: String },
}

/// Result type alias for coil search operations
pub type CsResult<T> = Result<T, CsError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CsError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ParameterError::OutOfRange {
            parameter: "layer_pitch_inner".to_string(),
            value: 2.5,
            lower: 2.0,
            upper: 2.2,
        };

        assert!(error.to_string().contains("layer_pitch_inner"));
        assert!(error.to_string().contains("2.5"));
        assert!(error.to_string().contains("2.2"));
    }

    #[test]
    fn test_error_conversion() {
        let log_error = LogError::EmptyLog;
        let cs_error: CsError = log_error.into();

        match cs_error {
            CsError::Log(LogError::EmptyLog) => (),
            _ => panic!("Expected Log error"),
        }
    }

    #[test]
    fn iteration_wrapper_is_not_nested() {
        let err = CsError::from(GeometryError::Build {
            message: "self-intersecting winding".into(),
        })
        .at_iteration(4)
        .at_iteration(9);

        assert_eq!(err.iteration(), Some(4));
        assert!(matches!(err.root(), CsError::Geometry(GeometryError::Build { .. })));
        assert!(err.to_string().starts_with("Iteration 4"));
    }

    #[test]
    fn test_macros() {
        let internal = internal_error!("Something went wrong");
        let config = config_error!("Missing required field: {}", "parameters");
        assert!(matches!(internal, CsError::Internal(_)));
        assert!(config.to_string().contains("parameters"));
    }
}
