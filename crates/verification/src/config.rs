//! Verification configuration and settings

use serde::{Deserialize, Serialize};

/// Controls how thorough equivalence checking is and bounds each execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Maximum instructions executed per run, across all frames.
    pub step_limit: u64,

    /// Maximum nesting of internal calls.
    pub max_call_depth: usize,

    /// Value the host reports for the debugger-presence query.
    pub debugger_attached: bool,

    /// Number of argument vectors to generate per method.
    pub test_case_count: usize,

    /// Seed for argument generation.
    pub input_seed: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl VerificationConfig {
    /// Quick checks for development
    pub fn development() -> Self {
        Self {
            step_limit: 100_000,
            max_call_depth: 64,
            debugger_attached: false,
            test_case_count: 8,
            input_seed: 42,
        }
    }

    /// Standard checks for CI
    pub fn standard() -> Self {
        Self {
            step_limit: 1_000_000,
            max_call_depth: 256,
            debugger_attached: false,
            test_case_count: 64,
            input_seed: 12345,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), crate::VerificationError> {
        if self.step_limit == 0 {
            return Err(crate::VerificationError::Configuration(
                "step_limit must be greater than 0".to_string(),
            ));
        }
        if self.test_case_count == 0 {
            return Err(crate::VerificationError::Configuration(
                "test_case_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
