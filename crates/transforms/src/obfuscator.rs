//! The obfuscation pipeline.
//!
//! Per method, in fixed order: padding, string obfuscation, anti-debug injection, flattening.
//! Renaming runs once over the whole module afterwards. Everything shared between methods (the
//! decode routine and the imported externals) is created in a sequential pre-pass, so the
//! per-method work can run in parallel.

use crate::anti_debug::AntiDebug;
use crate::flatten::{Flatten, FlattenConfig};
use crate::padding::Padding;
use crate::pass::{self, MethodFailure, MethodOutcome};
use crate::rename::rename_module;
use crate::settings::ObfuscationSettings;
use crate::strings::{self, StringObfuscation};
use crate::Transform;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shade_core::{Method, MethodTarget, Module, WellKnown};
use shade_utils::errors::TransformError;
use tracing::{debug, info, warn};

/// Summary of an obfuscation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfuscationReport {
    /// Number of methods each enabled transform changed, in application order.
    pub transforms_applied: IndexMap<String, usize>,
    /// Methods with a body that went through the per-method transforms.
    pub methods_processed: usize,
    /// Methods rebuilt behind a dispatcher.
    pub flattened: usize,
    /// Qualified name of the decode routine, when one was created or reused.
    pub decode_routine: Option<String>,
    /// Old to new names, when renaming ran.
    pub renamed: IndexMap<String, String>,
    /// Configuration corrections applied before the run.
    pub notices: Vec<String>,
    /// Per-method failures; each affected method kept its pre-transform state.
    pub failures: Vec<MethodFailure>,
    /// Hex seed the run used.
    pub seed: String,
}

/// Obfuscates `module` in place.
///
/// # Arguments
/// * `module` - The loaded module.
/// * `settings` - Enabled transforms and tuning values.
///
/// # Returns
/// The [`ObfuscationReport`]. Only a configuration conflict in strict mode, or a module that
/// cannot host the decode routine, fails the whole run; method-level errors end up in
/// [`ObfuscationReport::failures`].
pub fn obfuscate(
    module: &mut Module,
    settings: &ObfuscationSettings,
) -> Result<ObfuscationReport, TransformError> {
    let resolved = settings.resolve()?;
    let settings = resolved.settings;
    let mut report = ObfuscationReport {
        notices: resolved.notices,
        seed: settings.seed.to_hex(),
        ..Default::default()
    };

    if !settings.any_enabled() {
        warn!("No transforms enabled; module left unchanged");
        return Ok(report);
    }

    info!("Obfuscating {} with seed {}", module.name, settings.seed);
    let transforms = build_transforms(module, &settings, &mut report)?;
    for transform in &transforms {
        report.transforms_applied.insert(transform.name().to_string(), 0);
    }

    if !transforms.is_empty() {
        let outcomes = run_methods(module, &transforms, &settings);
        for outcome in outcomes {
            report.methods_processed += 1;
            for name in outcome.applied {
                *report.transforms_applied.entry(name.to_string()).or_default() += 1;
            }
            report.failures.extend(outcome.failures);
        }
        report.flattened = report
            .transforms_applied
            .get("Flatten")
            .copied()
            .unwrap_or(0);
    }

    if settings.rename {
        let mut rng = settings.seed.rng_for(b"rename");
        report.renamed = rename_module(module, &mut rng);
        if let Some(id) = strings::find_decode_routine(module) {
            report.decode_routine = Some(module.qualified_name(id));
        }
    }

    info!(
        "Processed {} methods ({} flattened, {} renamed symbols, {} failures)",
        report.methods_processed,
        report.flattened,
        report.renamed.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        warn!(
            "  {} kept its previous state after {} failed: {}",
            failure.method, failure.transform, failure.error
        );
    }

    Ok(report)
}

/// Builds the per-method transforms in application order, creating every shared module
/// resource they need up front.
fn build_transforms(
    module: &mut Module,
    settings: &ObfuscationSettings,
    report: &mut ObfuscationReport,
) -> Result<Vec<Box<dyn Transform>>, TransformError> {
    let mut transforms: Vec<Box<dyn Transform>> = Vec::new();

    if settings.extra_instructions {
        transforms.push(Box::new(Padding::new(settings.padding_count)));
    }

    if settings.obfuscate_strings {
        if strings::module_has_literals(module) {
            let decoder = strings::get_or_create_decode_routine(module)?;
            if let MethodTarget::Internal(id) = decoder.target {
                report.decode_routine = Some(module.qualified_name(id));
            }
            transforms.push(Box::new(StringObfuscation::new(decoder)));
        } else {
            debug!("No string literals; skipping decode routine");
        }
    }

    if settings.anti_debugging {
        let is_attached = module.import(WellKnown::DebuggerIsAttached);
        let exit = module.import(WellKnown::EnvironmentExit);
        transforms.push(Box::new(AntiDebug::new(
            is_attached,
            exit,
            settings.anti_debug_placement,
        )));
    }

    if settings.flatten_code {
        transforms.push(Box::new(Flatten::new(FlattenConfig {
            policy: settings.partition_policy,
            shuffle: settings.shuffle_blocks,
            dispatch_branches: settings.dispatch_branches,
        })));
    }

    Ok(transforms)
}

/// Runs the transforms over every method with a body, except the decode routine.
///
/// Each method draws from its own random stream keyed by its position, so results do not
/// depend on scheduling.
fn run_methods(
    module: &mut Module,
    transforms: &[Box<dyn Transform>],
    settings: &ObfuscationSettings,
) -> Vec<MethodOutcome> {
    let mut jobs: Vec<(String, StdRng, &mut Method)> = Vec::new();
    for (type_index, ty) in module.types.iter_mut().enumerate() {
        let type_name = ty.full_name();
        for (method_index, method) in ty.methods.iter_mut().enumerate() {
            if !method.has_body() || strings::is_decode_routine(method) {
                continue;
            }
            let qualified = format!("{type_name}::{}", method.name);
            let rng = settings
                .seed
                .rng_for(format!("method:{type_index}:{method_index}").as_bytes());
            jobs.push((qualified, rng, method));
        }
    }
    debug!("{} methods queued", jobs.len());

    if settings.parallel {
        jobs.into_par_iter()
            .map(|(qualified, mut rng, method)| pass::run(&qualified, method, transforms, &mut rng))
            .collect()
    } else {
        jobs.into_iter()
            .map(|(qualified, mut rng, method)| pass::run(&qualified, method, transforms, &mut rng))
            .collect()
    }
}
