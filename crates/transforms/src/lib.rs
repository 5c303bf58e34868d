pub mod anti_debug;
pub mod flatten;
pub mod obfuscator;
pub mod padding;
pub mod pass;
pub mod rename;
pub mod settings;
pub mod strings;

pub use obfuscator::{obfuscate, ObfuscationReport};
pub use pass::MethodFailure;
pub use settings::{AntiDebugPlacement, ObfuscationSettings, ResolvedSettings};

use rand::rngs::StdRng;
use shade_core::Method;
use shade_utils::errors::TransformError;

/// Trait for per-method obfuscation transforms.
///
/// Implementations must leave `method` untouched when they return an error; the pass runner
/// additionally applies every transform to a snapshot so a failure is never observable.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform to one method, returning whether changes were made.
    fn apply(&self, method: &mut Method, rng: &mut StdRng) -> Result<bool, TransformError>;
}
