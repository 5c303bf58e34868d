//! Practical equivalence testing
//!
//! Runs an original and an obfuscated method on identical argument vectors and compares:
//!
//! 1. **Output Equivalence**: the returned value, or the exception that escaped
//! 2. **Console Equivalence**: every line written through the host
//! 3. **Exit Equivalence**: whether and with which code the process exited
//!
//! Renaming leaves method positions intact, so both sides are addressed by the same
//! [`MethodId`].

use crate::config::VerificationConfig;
use crate::interpreter::{Interpreter, Outcome, Value};
use crate::{ExecError, VerificationError, VerificationResult};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shade_core::{MethodId, MethodSig, Module, TypeSig};
use std::time::{Duration, Instant};

/// Everything observable about one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub outcome: Outcome,
    /// Console lines, in order.
    pub output: Vec<String>,
}

/// Runs method `id` of `module` on `args`.
pub fn execute(
    module: &Module,
    id: MethodId,
    args: Vec<Value>,
    config: &VerificationConfig,
) -> Result<Execution, ExecError> {
    let mut interpreter = Interpreter::new(module, config);
    let outcome = interpreter.run(id, args)?;
    Ok(Execution {
        outcome,
        output: interpreter.into_host().output,
    })
}

/// One input on which the two modules disagreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub args: Vec<Value>,
    pub original: Execution,
    pub obfuscated: Execution,
}

/// Results of equivalence testing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceResults {
    /// Overall testing result
    pub overall_passed: bool,
    /// Number of argument vectors executed
    pub test_cases_executed: usize,
    /// Inputs whose observable behaviour differed
    pub mismatches: Vec<Mismatch>,
    /// Total testing time
    pub testing_time: Duration,
}

/// Practical testing engine
#[derive(Debug, Clone)]
pub struct PracticalTester {
    config: VerificationConfig,
}

impl PracticalTester {
    /// Create a new practical tester
    pub fn new(config: VerificationConfig) -> VerificationResult<Self> {
        config.validate()?;
        tracing::debug!(
            "Initialized practical tester with step limit {}",
            config.step_limit
        );
        Ok(Self { config })
    }

    pub const fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Test equivalence of method `id` across two modules on explicit inputs.
    pub fn test_equivalence(
        &self,
        original: &Module,
        obfuscated: &Module,
        id: MethodId,
        inputs: &[Vec<Value>],
    ) -> VerificationResult<EquivalenceResults> {
        let start_time = Instant::now();
        let mut mismatches = Vec::new();

        for args in inputs {
            let before = execute(original, id, args.clone(), &self.config)?;
            let after = execute(obfuscated, id, args.clone(), &self.config)?;
            if before != after {
                tracing::warn!(
                    "{} diverged on {:?}: {:?} vs {:?}",
                    original.qualified_name(id),
                    args,
                    before.outcome,
                    after.outcome
                );
                mismatches.push(Mismatch {
                    args: args.clone(),
                    original: before,
                    obfuscated: after,
                });
            }
        }

        let overall_passed = mismatches.is_empty();
        let testing_time = start_time.elapsed();
        tracing::info!(
            "Practical testing of {} completed in {:.2}s - Overall: {}",
            original.qualified_name(id),
            testing_time.as_secs_f64(),
            if overall_passed { "PASSED" } else { "FAILED" }
        );

        Ok(EquivalenceResults {
            overall_passed,
            test_cases_executed: inputs.len(),
            mismatches,
            testing_time,
        })
    }

    /// Test equivalence on generated inputs, see [`generate_inputs`].
    pub fn test_generated(
        &self,
        original: &Module,
        obfuscated: &Module,
        id: MethodId,
    ) -> VerificationResult<EquivalenceResults> {
        let sig = &original.method(id)?.sig;
        let inputs = generate_inputs(sig, &self.config)?;
        self.test_equivalence(original, obfuscated, id, &inputs)
    }
}

/// Convenience wrapper over [`PracticalTester::test_equivalence`].
pub fn check_equivalence(
    original: &Module,
    obfuscated: &Module,
    id: MethodId,
    inputs: &[Vec<Value>],
    config: &VerificationConfig,
) -> VerificationResult<EquivalenceResults> {
    PracticalTester::new(config.clone())?.test_equivalence(original, obfuscated, id, inputs)
}

/// Generates `test_case_count` argument vectors for a static method.
///
/// Integers mix boundary values with uniformly drawn ones; strings are short alphanumeric
/// runs. Reference types other than strings cannot be generated.
pub fn generate_inputs(
    sig: &MethodSig,
    config: &VerificationConfig,
) -> VerificationResult<Vec<Vec<Value>>> {
    const EDGES: [i64; 5] = [0, 1, -1, i32::MAX as i64, i32::MIN as i64];

    if sig.has_this {
        return Err(VerificationError::UnsupportedParameter("this".to_string()));
    }
    let mut rng = StdRng::seed_from_u64(config.input_seed);
    let mut inputs = Vec::with_capacity(config.test_case_count);

    for case in 0..config.test_case_count {
        let mut args = Vec::with_capacity(sig.params.len());
        for ty in &sig.params {
            let edge = EDGES.get(case).copied();
            let value = match ty {
                TypeSig::I4 => Value::I4(edge.map_or_else(|| rng.random(), |e| e as i32)),
                TypeSig::Bool => Value::I4(rng.random_range(0..=1)),
                TypeSig::I8 => Value::I8(edge.unwrap_or_else(|| rng.random())),
                TypeSig::R8 | TypeSig::R4 => Value::R8(rng.random_range(-1.0e6..1.0e6)),
                TypeSig::String => {
                    let len = rng.random_range(0..12);
                    Value::Str(
                        (0..len)
                            .map(|_| char::from(rng.sample(rand::distr::Alphanumeric)))
                            .collect(),
                    )
                }
                other => return Err(VerificationError::UnsupportedParameter(other.to_string())),
            };
            args.push(value);
        }
        inputs.push(args);
    }

    Ok(inputs)
}
