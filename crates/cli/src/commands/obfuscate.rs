/// Module for the `obfuscate` subcommand, which applies obfuscation transforms to a module.
///
/// This module loads a JSON module, resolves the requested transforms, runs the orchestrator
/// and writes `<stem>.Obfuscated_<suffix><ext>` next to the input together with its runtime
/// configuration. It also writes the run report as JSON if requested.
use crate::io::{copy_runtime_config, load_module, output_path, parse_seed, save_module};
use async_trait::async_trait;
use clap::Args;
use shade_core::PartitionPolicy;
use shade_transform::{obfuscate, AntiDebugPlacement, ObfuscationReport, ObfuscationSettings};
use shade_utils::Seed;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for the `obfuscate` subcommand.
#[derive(Args)]
pub struct ObfuscateArgs {
    /// Module file to obfuscate (JSON).
    pub input: PathBuf,
    /// Rename types and methods.
    #[arg(long)]
    pub rename: bool,
    /// Insert no-op padding into every method.
    #[arg(long)]
    pub extra_instructions: bool,
    /// Encode string literals and decode them at run time.
    #[arg(long)]
    pub obfuscate_strings: bool,
    /// Flatten control flow behind a state-machine dispatcher.
    #[arg(long)]
    pub flatten_code: bool,
    /// Randomize block order when flattening (implies --flatten-code).
    #[arg(long)]
    pub shuffle: bool,
    /// Exit when a debugger is attached.
    #[arg(long)]
    pub antidebugging: bool,
    /// Enable every transform.
    #[arg(long)]
    pub all: bool,
    /// Insert the debugger check at a random position (implies --antidebugging).
    #[arg(long)]
    pub random_antidebug: bool,
    /// Suffix appended to the output file name.
    #[arg(long, default_value = "")]
    pub suffix: String,
    /// Seed as 64 hex characters or a decimal integer (random when omitted).
    #[arg(long)]
    pub seed: Option<String>,
    /// Process methods one at a time.
    #[arg(long)]
    pub sequential: bool,
    /// Reject conflicting options instead of correcting them.
    #[arg(long)]
    pub strict: bool,
    /// Split blocks where the stack depth returns to zero instead of at branch leaders.
    #[arg(long)]
    pub stack_balanced: bool,
    /// Number of no-ops inserted per method by --extra-instructions.
    #[arg(long, default_value_t = 1)]
    pub padding: usize,
    /// Path to write the run report as JSON (optional).
    #[arg(long)]
    pub emit: Option<PathBuf>,
}

impl ObfuscateArgs {
    /// Translates the flags into orchestrator settings.
    pub fn settings(&self, seed: Seed) -> ObfuscationSettings {
        let base = if self.all {
            ObfuscationSettings::all()
        } else {
            ObfuscationSettings::default()
        };
        ObfuscationSettings {
            rename: base.rename || self.rename,
            extra_instructions: base.extra_instructions || self.extra_instructions,
            obfuscate_strings: base.obfuscate_strings || self.obfuscate_strings,
            flatten_code: base.flatten_code || self.flatten_code,
            shuffle_blocks: base.shuffle_blocks || self.shuffle,
            anti_debugging: base.anti_debugging || self.antidebugging,
            padding_count: self.padding,
            anti_debug_placement: if self.random_antidebug {
                AntiDebugPlacement::Random
            } else {
                AntiDebugPlacement::First
            },
            partition_policy: if self.stack_balanced {
                PartitionPolicy::StackBalanced
            } else {
                PartitionPolicy::Leaders
            },
            parallel: !self.sequential,
            strict: self.strict,
            seed,
            ..base
        }
    }
}

/// Executes the `obfuscate` subcommand and writes the obfuscated module.
#[async_trait]
impl super::Command for ObfuscateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let seed = match &self.seed {
            Some(text) => parse_seed(text)?,
            None => Seed::generate(),
        };
        let settings = self.settings(seed);

        let mut module = load_module(&self.input)?;
        let output = output_path(&self.input, &self.suffix)?;
        if let Some(name) = output.file_name().and_then(|n| n.to_str()) {
            module.name = name.to_string();
        }

        let report = obfuscate(&mut module, &settings)?;
        save_module(&module, &output)?;
        let runtime_config = copy_runtime_config(&self.input, &output)?;

        print_summary(&report, &output, runtime_config.as_deref());

        if let Some(path) = self.emit {
            fs::write(&path, serde_json::to_string_pretty(&report)?)?;
            println!("📊 Wrote obfuscation report to {}", path.display());
        }
        Ok(())
    }
}

fn print_summary(report: &ObfuscationReport, output: &Path, runtime_config: Option<&Path>) {
    for notice in &report.notices {
        println!("⚠️  {notice}");
    }
    println!("Transform Analysis:");
    println!("Methods processed: {}", report.methods_processed);
    for (name, count) in &report.transforms_applied {
        println!("  {name}: {count} methods");
    }
    if !report.renamed.is_empty() {
        println!("  Rename: {} symbols", report.renamed.len());
    }
    for failure in &report.failures {
        println!(
            "  skipped {} for {}: {}",
            failure.transform, failure.method, failure.error
        );
    }

    if report.failures.is_empty() {
        println!("✅ Obfuscation complete");
    } else {
        println!(
            "✅ Obfuscation complete with {} method(s) left partially transformed",
            report.failures.len()
        );
    }
    println!("📈 Flattened {} of {} methods", report.flattened, report.methods_processed);
    println!("🔑 Seed: {}", report.seed);
    println!("Wrote {}", output.display());
    if let Some(path) = runtime_config {
        println!("Copied {}", path.display());
    }
}
