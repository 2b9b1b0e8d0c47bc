//! Code effects: prelude contributions demanded during generation.
//!
//! Generators never write includes or helper definitions inline; they record
//! an effect and the orchestrator assembles the prelude once the whole unit
//! has generated. Set semantics with first-occurrence order keeps the output
//! reproducible.

use std::collections::HashSet;

use serde::Serialize;

use crate::ty::Primitive;
use crate::OutputMode;

/// Canonical header set, plus user headers passed through from source
/// `#include` directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Header {
    StdBool,
    StdInt,
    String,
    StdLib,
    StdIo,
    StdAtomic,
    User { header: String, system: bool },
}

impl Header {
    pub fn render(&self, mode: OutputMode) -> String {
        let name = match (self, mode) {
            (Header::StdBool, OutputMode::C) => "<stdbool.h>",
            (Header::StdBool, OutputMode::Cpp) => "<cstdbool>",
            (Header::StdInt, OutputMode::C) => "<stdint.h>",
            (Header::StdInt, OutputMode::Cpp) => "<cstdint>",
            (Header::String, OutputMode::C) => "<string.h>",
            (Header::String, OutputMode::Cpp) => "<cstring>",
            (Header::StdLib, OutputMode::C) => "<stdlib.h>",
            (Header::StdLib, OutputMode::Cpp) => "<cstdlib>",
            (Header::StdIo, OutputMode::C) => "<stdio.h>",
            (Header::StdIo, OutputMode::Cpp) => "<cstdio>",
            (Header::StdAtomic, OutputMode::C) => "<stdatomic.h>",
            (Header::StdAtomic, OutputMode::Cpp) => "<atomic>",
            (Header::User { header, system }, _) => {
                return if *system {
                    format!("#include <{header}>")
                } else {
                    format!("#include \"{header}\"")
                };
            }
        };
        format!("#include {name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HelperOp {
    ClampAdd,
    ClampSub,
    ClampMul,
    SafeDiv,
    SafeMod,
}

impl HelperOp {
    /// The operation fragment of the helper's C name.
    pub fn fragment(self) -> &'static str {
        match self {
            HelperOp::ClampAdd => "clamp_add",
            HelperOp::ClampSub => "clamp_sub",
            HelperOp::ClampMul => "clamp_mul",
            HelperOp::SafeDiv => "safe_div",
            HelperOp::SafeMod => "safe_mod",
        }
    }

    pub fn is_clamp(self) -> bool {
        matches!(
            self,
            HelperOp::ClampAdd | HelperOp::ClampSub | HelperOp::ClampMul
        )
    }
}

/// One prelude demand. `Helper` doubles as the safe-div/mod specialization;
/// the emission mode (clamp vs panic) comes from the configuration at
/// render time, not from the effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Effect {
    Include(Header),
    /// `_Static_assert` pinning the byte width of `float` or `double`
    /// before bit access through a shadow integer.
    FloatAssert { bits64: bool },
    /// The `CNX_MASK` macro for runtime bit-range widths.
    MaskMacro,
    Helper { op: HelperOp, prim: Primitive },
    /// The interrupt save/disable + restore pair for `critical` blocks.
    CriticalSection,
    CallbackTypedef(String),
}

/// Append-only, set-deduplicated effect store.
#[derive(Debug, Default)]
pub struct EffectSet {
    order: Vec<Effect>,
    seen: HashSet<Effect>,
}

impl EffectSet {
    pub fn record(&mut self, effect: Effect) {
        if self.seen.insert(effect.clone()) {
            self.order.push(effect);
        }
    }

    pub fn contains(&self, effect: &Effect) -> bool {
        self.seen.contains(effect)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.order.iter()
    }

    pub fn into_manifest(self) -> Vec<Effect> {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let mut set = EffectSet::default();
        set.record(Effect::Include(Header::StdInt));
        set.record(Effect::Include(Header::StdBool));
        set.record(Effect::Include(Header::StdInt));
        set.record(Effect::Helper {
            op: HelperOp::ClampAdd,
            prim: Primitive::U32,
        });
        set.record(Effect::Include(Header::StdBool));
        let order: Vec<_> = set.into_manifest();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], Effect::Include(Header::StdInt));
        assert_eq!(order[1], Effect::Include(Header::StdBool));
    }

    #[test]
    fn headers_render_per_mode() {
        assert_eq!(
            Header::StdInt.render(OutputMode::C),
            "#include <stdint.h>"
        );
        assert_eq!(
            Header::StdAtomic.render(OutputMode::Cpp),
            "#include <atomic>"
        );
        assert_eq!(
            Header::User {
                header: "hal.h".into(),
                system: false
            }
            .render(OutputMode::C),
            "#include \"hal.h\""
        );
    }
}
