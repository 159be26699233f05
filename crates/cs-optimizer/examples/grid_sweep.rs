//! Sweep the layer pitch and winding angle of a toy helical coil.
//!
//! Run with `RUST_LOG=info cargo run -p cs-optimizer --example grid_sweep`.

use cs_optimizer::{
    EvaluationRequest, Evaluator, GeometryFactory, SearchDocument, TimeoutEvaluator,
};
use cs_types::{
    Calculation, EvaluationError, FieldPath, GeometryContext, GeometryError, Harmonics, MeshResults, ResultsSnapshot,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DOCUMENT: &str = r#"{
    "name": "toy helix sweep",
    "parameters": {
        "layer_pitch": { "type": "layer_pitch", "node": "helix",
                         "lowerBound": 2.0, "upperBound": 2.4, "stepCount": 4 },
        "cct_winding_angle": { "type": "winding_angle", "node": "helix",
                               "lowerBound": 20, "upperBound": 40, "stepCount": 2 }
    },
    "criteria": {
        "b3": { "type": "multipole_b", "order": 3 },
        "max_curvature_magnitude": { "type": "max_curvature" },
        "z_max": { "type": "max_z" }
    },
    "strategy": { "type": "grid" },
    "stopping": { "maxIterations": 50 },
    "evaluationTimeoutSecs": 5.0,
    "objective": { "criterion": "b3", "direction": "minimize" },
    "parallelCriteria": true
}"#;

#[derive(Debug, Clone)]
struct Helix {
    pitch: f64,
    alpha: f64,
}

struct HelixFactory;

impl GeometryFactory for HelixFactory {
    type Geometry = Helix;

    fn build(&self, context: &GeometryContext) -> Result<Helix, GeometryError> {
        let read = |children: &str, target: &str| {
            let path = FieldPath::new("helix", vec![children.into()], target);
            context.scalar(&path).ok_or_else(|| GeometryError::Build {
                message: format!("{path} is not set"),
            })
        };
        Ok(Helix {
            pitch: read("omega", "scaling")?,
            alpha: read("rho", "alpha")?,
        })
    }
}

/// Closed-form stand-in for a field solver.
struct ToySolver;

impl Evaluator<Helix> for ToySolver {
    fn evaluate(
        &self,
        helix: &Helix,
        request: &EvaluationRequest,
        _timeout: Option<Duration>,
    ) -> Result<ResultsSnapshot, EvaluationError> {
        let radius = 0.05;
        let mut snapshot = ResultsSnapshot::new();

        if request.requires(Calculation::Harmonics) {
            let b3 = (helix.alpha - 30f64.to_radians()).sin() * 1e-4 + (helix.pitch - 0.0022) * 0.1;
            snapshot = snapshot.with_harmonics(Harmonics::new(vec![0.0; 3], vec![1.0, 0.0, b3]));
        }
        if request.requires(Calculation::Mesh) {
            let turns = 40;
            let positions: Vec<[f64; 3]> = (0..turns * 16)
                .map(|i| {
                    let phi = i as f64 * std::f64::consts::TAU / 16.0;
                    [radius * phi.cos(), radius * phi.sin(), helix.pitch * phi / std::f64::consts::TAU]
                })
                .collect();
            let curvature = vec![helix.alpha.cos().powi(2) / radius; positions.len()];
            snapshot = snapshot.with_mesh(MeshResults::new(positions).with_curvature(curvature));
        }
        Ok(snapshot)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let document = SearchDocument::from_json_str(DOCUMENT)?;
    let mut search = document.build(HelixFactory, TimeoutEvaluator::new(ToySolver))?;
    let summary = search.run()?;

    info!(state = %summary.state, iterations = summary.iterations, "Sweep done");
    if let Some(best) = &summary.best {
        println!(
            "best b3 = {:.3e} at pitch {} mm, angle {} deg",
            best.output_values["b3"], best.input_values["layer_pitch"], best.input_values["cct_winding_angle"]
        );
    }

    let out_dir = std::env::temp_dir().join("cs-optimizer-demo");
    let path = search.export_csv(&out_dir)?;
    println!("wrote {}", path.display());
    Ok(())
}
