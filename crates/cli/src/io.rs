//! Module loading, saving and output naming.

use shade_core::Module;
use shade_utils::errors::ObfuscateError;
use shade_utils::Seed;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of the runtime configuration file that travels with a module.
pub const RUNTIME_CONFIG_EXTENSION: &str = "runtimeconfig.json";

/// Reads a JSON module from `path`.
pub fn load_module(path: &Path) -> Result<Module, ObfuscateError> {
    let text = fs::read_to_string(path)?;
    let module: Module = serde_json::from_str(&text)?;
    debug!(
        "Loaded {} with {} types from {}",
        module.name,
        module.types.len(),
        path.display()
    );
    Ok(module)
}

/// Writes `module` as pretty-printed JSON to `path`.
pub fn save_module(module: &Module, path: &Path) -> Result<(), ObfuscateError> {
    fs::write(path, serde_json::to_string_pretty(module)?)?;
    Ok(())
}

/// `<dir>/<stem>.Obfuscated_<suffix><ext>` for an input `<dir>/<stem><ext>`.
pub fn output_path(input: &Path, suffix: &str) -> Result<PathBuf, ObfuscateError> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ObfuscateError::InvalidInput(input.display().to_string()))?;
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    Ok(input.with_file_name(format!("{stem}.Obfuscated_{suffix}{extension}")))
}

/// Copies `<input stem>.runtimeconfig.json` next to the output when it exists.
///
/// Returns the path written, or `None` when the input has no runtime configuration.
pub fn copy_runtime_config(input: &Path, output: &Path) -> Result<Option<PathBuf>, ObfuscateError> {
    let source = input.with_extension(RUNTIME_CONFIG_EXTENSION);
    if !source.is_file() {
        return Ok(None);
    }
    let target = output.with_extension(RUNTIME_CONFIG_EXTENSION);
    fs::copy(&source, &target)?;
    Ok(Some(target))
}

/// Parses a seed given as 64 hex characters or as a decimal `u64`.
pub fn parse_seed(input: &str) -> Result<Seed, ObfuscateError> {
    if let Ok(value) = input.parse::<u64>() {
        return Ok(Seed::from_u64(value));
    }
    Ok(Seed::from_hex(input)?)
}
