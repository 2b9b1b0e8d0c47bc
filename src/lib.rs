#![forbid(unsafe_code)]
pub mod ast;
pub mod codegen;
pub mod errors;
pub mod sema;
pub mod ty;

#[cfg(test)]
mod test;

use serde::{Deserialize, Serialize};

use crate::codegen::effects::Effect;
use crate::errors::Result;

/// Emission target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    C,
    Cpp,
}

impl OutputMode {
    /// Scope separator used in emitted names: `Scope_member` in C,
    /// `Scope::member` in C++.
    pub fn separator(self) -> &'static str {
        match self {
            OutputMode::C => "_",
            OutputMode::Cpp => "::",
        }
    }
}

/// Overflow behavior of `+`, `-`, `*` and their compound forms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Plain operators; signed narrow arithmetic still goes through the
    /// widen-then-narrow pattern to stay off undefined behavior.
    Default,
    /// Modular arithmetic, consistent across signedness.
    Wrap,
    /// Saturating arithmetic via emitted helpers; panicking in debug mode.
    Clamp,
}

/// Per-translation-unit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranspileConfig {
    #[serde(default = "default_mode")]
    pub mode: OutputMode,
    /// Debug builds turn clamp helpers into panicking helpers.
    #[serde(default)]
    pub debug: bool,
    /// Whether the target supports C11/C++ atomics. When false, `atomic`
    /// variables fall back to critical-section guarded accesses.
    #[serde(default)]
    pub atomic: bool,
    /// Overflow policy for variables declared without `wrap` or `clamp`.
    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,
}

fn default_mode() -> OutputMode {
    OutputMode::C
}

fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::Default
}

impl Default for TranspileConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::C,
            debug: false,
            atomic: false,
            overflow: OverflowPolicy::Default,
        }
    }
}

/// The generated translation unit: the C (or C++) text plus the manifest of
/// effects the generators demanded while producing it.
#[derive(Debug, Clone, Serialize)]
pub struct Output {
    pub code: String,
    pub effects: Vec<Effect>,
}

/// Transpile one translation unit. The registry is built from the tree in a
/// pre-pass and frozen before any code is generated; either the whole unit
/// generates cleanly or the first error is returned and no output exists.
pub fn transpile(unit: &ast::Unit, cfg: &TranspileConfig) -> Result<Output> {
    let registry = sema::registry::build(unit)?;
    codegen::generate_unit(unit, cfg, &registry)
}
