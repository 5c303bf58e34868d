//! Transform settings and the conflict policy applied before a run.

use serde::{Deserialize, Serialize};
use shade_core::PartitionPolicy;
use shade_utils::errors::ConfigError;
use shade_utils::Seed;

/// Where the anti-debug check is inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiDebugPlacement {
    /// Before the method's first instruction.
    #[default]
    First,
    /// Before a uniformly chosen instruction.
    Random,
}

/// Configuration for an obfuscation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationSettings {
    /// Rename types and methods.
    pub rename: bool,
    /// Insert trivial no-op padding.
    pub extra_instructions: bool,
    /// Encode string literals behind the shared decode routine.
    pub obfuscate_strings: bool,
    /// Flatten control flow behind a dispatcher.
    pub flatten_code: bool,
    /// Randomize block order when flattening.
    pub shuffle_blocks: bool,
    /// Inject debugger-presence tripwires.
    pub anti_debugging: bool,
    /// Number of no-ops inserted per method.
    pub padding_count: usize,
    /// Anti-debug insertion policy.
    pub anti_debug_placement: AntiDebugPlacement,
    /// Block partitioning policy used by the flattener.
    pub partition_policy: PartitionPolicy,
    /// Route taken branches through the dispatcher as well as fall-through edges.
    pub dispatch_branches: bool,
    /// Process methods in parallel.
    pub parallel: bool,
    /// Reject conflicting settings instead of correcting them.
    pub strict: bool,
    /// Seed for every random choice of the run.
    pub seed: Seed,
}

impl Default for ObfuscationSettings {
    fn default() -> Self {
        Self {
            rename: false,
            extra_instructions: false,
            obfuscate_strings: false,
            flatten_code: false,
            shuffle_blocks: false,
            anti_debugging: false,
            padding_count: 1,
            anti_debug_placement: AntiDebugPlacement::First,
            partition_policy: PartitionPolicy::Leaders,
            dispatch_branches: true,
            parallel: true,
            strict: false,
            seed: Seed::default(),
        }
    }
}

/// Settings after the conflict policy ran, with the notices it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub settings: ObfuscationSettings,
    pub notices: Vec<String>,
}

impl ObfuscationSettings {
    /// Every transform enabled, block shuffling included.
    pub fn all() -> Self {
        Self {
            rename: true,
            extra_instructions: true,
            obfuscate_strings: true,
            flatten_code: true,
            shuffle_blocks: true,
            anti_debugging: true,
            ..Self::default()
        }
    }

    /// Whether any transform is enabled.
    pub const fn any_enabled(&self) -> bool {
        self.rename
            || self.extra_instructions
            || self.obfuscate_strings
            || self.flatten_code
            || self.anti_debugging
            || self.shuffle_blocks
    }

    /// Applies the conflict policy.
    ///
    /// A dependent option requested without its prerequisite enables the prerequisite and
    /// records a notice, or fails with a `ConfigError` in strict mode.
    pub fn resolve(&self) -> Result<ResolvedSettings, ConfigError> {
        let mut settings = self.clone();
        let mut notices = Vec::new();

        if settings.shuffle_blocks && !settings.flatten_code {
            if settings.strict {
                return Err(ConfigError::ShuffleRequiresFlatten);
            }
            settings.flatten_code = true;
            let notice = "Block shuffling requires code flattening; enabling flatten-code".to_string();
            tracing::warn!("{}", notice);
            notices.push(notice);
        }

        if settings.anti_debug_placement == AntiDebugPlacement::Random && !settings.anti_debugging {
            if settings.strict {
                return Err(ConfigError::PlacementRequiresAntiDebug);
            }
            settings.anti_debugging = true;
            let notice =
                "Random anti-debug placement requires anti-debugging; enabling antidebugging"
                    .to_string();
            tracing::warn!("{}", notice);
            notices.push(notice);
        }

        Ok(ResolvedSettings { settings, notices })
    }
}
