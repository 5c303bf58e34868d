use crate::Transform;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use shade_analysis::metrics::{collect_metrics, compare};
use shade_core::Method;
use tracing::{debug, error, info};

/// A transform that failed on one method. The method keeps its pre-transform state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFailure {
    /// `Type::Method` name at the time of the failure.
    pub method: String,
    /// Name of the failing transform.
    pub transform: String,
    /// Rendered error.
    pub error: String,
}

/// Outcome of running the transform sequence on one method.
#[derive(Debug, Default, Clone)]
pub struct MethodOutcome {
    /// Names of the transforms that changed the method, in application order.
    pub applied: Vec<&'static str>,
    pub failures: Vec<MethodFailure>,
}

/// Runs `transforms` over `method` in order.
///
/// Each transform works on a snapshot of the method. `Ok(true)` commits the snapshot,
/// `Ok(false)` drops it, and an error drops it and records a [`MethodFailure`] before moving
/// on to the next transform.
///
/// # Arguments
/// * `qualified` - Display name used in logs and failures.
/// * `method` - The method to transform.
/// * `transforms` - Transforms in application order.
/// * `rng` - The method's random stream.
pub fn run(
    qualified: &str,
    method: &mut Method,
    transforms: &[Box<dyn Transform>],
    rng: &mut StdRng,
) -> MethodOutcome {
    let mut outcome = MethodOutcome::default();

    if let Some(body) = &method.body {
        if let Err(e) = body.validate() {
            error!("{} is malformed, skipping: {}", qualified, e);
            outcome.failures.push(MethodFailure {
                method: qualified.to_string(),
                transform: "Validate".to_string(),
                error: e.to_string(),
            });
            return outcome;
        }
    }

    for transform in transforms {
        let mut snapshot = method.clone();
        match transform.apply(&mut snapshot, rng) {
            Ok(true) => {
                log_delta(qualified, transform.name(), method, &snapshot);
                *method = snapshot;
                outcome.applied.push(transform.name());
            }
            Ok(false) => {
                debug!("{:>18} left {} unchanged", transform.name(), qualified);
            }
            Err(e) => {
                error!("{:>18} failed on {}: {}", transform.name(), qualified, e);
                outcome.failures.push(MethodFailure {
                    method: qualified.to_string(),
                    transform: transform.name().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

fn log_delta(qualified: &str, transform: &str, before: &Method, after: &Method) {
    let (Some(old), Some(new)) = (&before.body, &after.body) else {
        return;
    };
    let returns_void = before.returns_void();
    match (
        collect_metrics(old, returns_void),
        collect_metrics(new, returns_void),
    ) {
        (Ok(old), Ok(new)) => {
            info!(
                "{:>18} {} Δ{:+.2} ({} → {} blocks)",
                transform,
                qualified,
                compare(&old, &new),
                old.block_cnt,
                new.block_cnt
            );
        }
        (Err(e), _) | (_, Err(e)) => {
            debug!("{:>18} {} (no metrics: {})", transform, qualified, e);
        }
    }
}
