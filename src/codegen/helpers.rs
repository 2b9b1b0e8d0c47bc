//! Parametric emission of the runtime support helpers.
//!
//! Everything here is a pure text template keyed by `(operation, type,
//! mode)`. Helpers are `static inline`, emitted at most once each (the
//! effect collector guards that), and land between the includes and the
//! first declaration.
//!
//! Overflow strategy: signed types narrower than `int64_t` compute in the
//! wider type and compare against the bounds; `int64_t` uses pre-check
//! arithmetic; unsigned types use a wider-type pre-check, falling back to
//! the `__builtin_*_overflow` intrinsics at 64 bits where no wider type
//! exists.

use crate::codegen::effects::HelperOp;
use crate::ty::Primitive;
use crate::OutputMode;

/// Bit-range masks with runtime widths.
pub const MASK_MACRO: &str = "#define CNX_MASK(width) ((1ULL << (width)) - 1ULL)";

pub fn render_float_assert(bits64: bool, mode: OutputMode) -> String {
    let keyword = match mode {
        OutputMode::C => "_Static_assert",
        OutputMode::Cpp => "static_assert",
    };
    if bits64 {
        format!(
            "{keyword}(sizeof(double) == 8U, \
             \"bit access expects a 64-bit double\");"
        )
    } else {
        format!(
            "{keyword}(sizeof(float) == 4U, \
             \"bit access expects a 32-bit float\");"
        )
    }
}

pub fn render_helper(op: HelperOp, prim: Primitive, debug: bool) -> String {
    match op {
        HelperOp::ClampAdd | HelperOp::ClampSub | HelperOp::ClampMul => {
            render_clamp(op, prim, debug)
        }
        HelperOp::SafeDiv | HelperOp::SafeMod => render_safe_div_mod(op, prim),
    }
}

/// On overflow either saturate or, in debug builds, report and abort.
fn saturate(bound: &str, message: &str, debug: bool) -> String {
    if debug {
        format!(
            "        (void)fprintf(stderr, \"PANIC: {message}\\n\");\n\
             \x20       abort();"
        )
    } else {
        format!("        return {bound};")
    }
}

fn render_clamp(op: HelperOp, prim: Primitive, debug: bool) -> String {
    let c = prim.c_name();
    let t = prim.name();
    let frag = op.fragment();
    let max = prim.max_literal();
    let min = prim.min_literal();
    let infix = match op {
        HelperOp::ClampAdd => "+",
        HelperOp::ClampSub => "-",
        HelperOp::ClampMul => "*",
        _ => unreachable!(),
    };
    let verb = match op {
        HelperOp::ClampAdd => "add",
        HelperOp::ClampSub => "sub",
        HelperOp::ClampMul => "mul",
        _ => unreachable!(),
    };
    let hi = saturate(max, &format!("{t} {verb} overflow"), debug);
    let lo = saturate(min, &format!("{t} {verb} underflow"), debug);

    if prim.is_unsigned() {
        if prim.wider() != prim {
            // Narrow unsigned: the wider type holds every possible result.
            let wide = prim.wider().c_name();
            match op {
                HelperOp::ClampSub => format!(
                    "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
                     {{\n\
                     \x20   if (b > a) {{\n{lo}\n    }}\n\
                     \x20   return ({c})(a - b);\n\
                     }}\n"
                ),
                _ => format!(
                    "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
                     {{\n\
                     \x20   {wide} wide = ({wide})a {infix} ({wide})b;\n\
                     \x20   if (wide > {max}) {{\n{hi}\n    }}\n\
                     \x20   return ({c})wide;\n\
                     }}\n"
                ),
            }
        } else {
            // Widest unsigned: no wider type, use the compiler builtin.
            let builtin = match op {
                HelperOp::ClampAdd => "__builtin_add_overflow",
                HelperOp::ClampSub => "__builtin_sub_overflow",
                HelperOp::ClampMul => "__builtin_mul_overflow",
                _ => unreachable!(),
            };
            let bound = if op == HelperOp::ClampSub { &lo } else { &hi };
            format!(
                "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
                 {{\n\
                 \x20   {c} wide;\n\
                 \x20   if ({builtin}(a, b, &wide)) {{\n{bound}\n    }}\n\
                 \x20   return wide;\n\
                 }}\n"
            )
        }
    } else if prim.wider() != prim {
        // Narrow signed: compute wide, clamp against both bounds. The
        // widening also covers int32_t multiplication in int64_t.
        let wide = prim.wider().c_name();
        format!(
            "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
             {{\n\
             \x20   {wide} wide = ({wide})a {infix} ({wide})b;\n\
             \x20   if (wide > {max}) {{\n{hi}\n    }}\n\
             \x20   if (wide < {min}) {{\n{lo}\n    }}\n\
             \x20   return ({c})wide;\n\
             }}\n"
        )
    } else {
        // int64_t: pre-check arithmetic, no wider type to lean on.
        match op {
            HelperOp::ClampAdd => format!(
                "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
                 {{\n\
                 \x20   if ((b > 0) && (a > ({max} - b))) {{\n{hi}\n    }}\n\
                 \x20   if ((b < 0) && (a < ({min} - b))) {{\n{lo}\n    }}\n\
                 \x20   return a + b;\n\
                 }}\n"
            ),
            HelperOp::ClampSub => format!(
                "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
                 {{\n\
                 \x20   if ((b < 0) && (a > ({max} + b))) {{\n{hi}\n    }}\n\
                 \x20   if ((b > 0) && (a < ({min} + b))) {{\n{lo}\n    }}\n\
                 \x20   return a - b;\n\
                 }}\n"
            ),
            HelperOp::ClampMul => format!(
                "static inline {c} cnx_{frag}_{t}({c} a, {c} b)\n\
                 {{\n\
                 \x20   if ((a > 0) && (b > 0) && (a > ({max} / b))) {{\n\
                 {hi}\n    }}\n\
                 \x20   if ((a > 0) && (b < 0) && (b < ({min} / a))) {{\n\
                 {lo}\n    }}\n\
                 \x20   if ((a < 0) && (b > 0) && (a < ({min} / b))) {{\n\
                 {lo}\n    }}\n\
                 \x20   if ((a < 0) && (b < 0) && (b < ({max} / a))) {{\n\
                 {hi}\n    }}\n\
                 \x20   return a * b;\n\
                 }}\n"
            ),
            _ => unreachable!(),
        }
    }
}

fn render_safe_div_mod(op: HelperOp, prim: Primitive) -> String {
    let c = prim.c_name();
    let t = prim.name();
    let frag = op.fragment();
    let infix = if op == HelperOp::SafeDiv { "/" } else { "%" };
    let zero = if prim.is_unsigned() { "0U" } else { "0" };
    let signed_guard = if prim.is_signed() {
        format!(
            "    if ((a == {}) && (b == -1)) {{\n\
             \x20       *out = dflt;\n\
             \x20       return;\n\
             \x20   }}\n",
            prim.min_literal()
        )
    } else {
        String::new()
    };
    format!(
        "static inline void cnx_{frag}_{t}({c} *out, {c} a, {c} b, {c} dflt)\n\
         {{\n\
         \x20   if (b == {zero}) {{\n\
         \x20       *out = dflt;\n\
         \x20       return;\n\
         \x20   }}\n\
         {signed_guard}\
         \x20   *out = a {infix} b;\n\
         }}\n"
    )
}

/// The `critical` block support pair. ARM Cortex targets save and restore
/// PRIMASK; other targets route through two port hooks the platform
/// provides.
pub fn render_critical_pair() -> String {
    "\
static inline uint32_t cnx_critical_enter(void)
{
#if defined(__ARM_ARCH)
    uint32_t state;
    __asm volatile(\"mrs %0, primask\" : \"=r\"(state));
    __asm volatile(\"cpsid i\" ::: \"memory\");
    return state;
#else
    extern uint32_t cnx_port_irq_save(void);
    return cnx_port_irq_save();
#endif
}

static inline void cnx_critical_exit(uint32_t state)
{
#if defined(__ARM_ARCH)
    __asm volatile(\"msr primask, %0\" :: \"r\"(state) : \"memory\");
#else
    extern void cnx_port_irq_restore(uint32_t state);
    cnx_port_irq_restore(state);
#endif
}
"
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Primitive::U8)]
    #[case(Primitive::U16)]
    #[case(Primitive::U32)]
    fn narrow_unsigned_add_uses_wider_precheck(#[case] prim: Primitive) {
        let code = render_helper(HelperOp::ClampAdd, prim, false);
        let wide = prim.wider().c_name();
        assert!(code.contains(&format!("{wide} wide")));
        assert!(code.contains(prim.max_literal()));
        assert!(!code.contains("__builtin_add_overflow"));
    }

    #[test]
    fn widest_unsigned_uses_builtin() {
        let code = render_helper(HelperOp::ClampAdd, Primitive::U64, false);
        assert!(code.contains("__builtin_add_overflow"));
        assert!(code.contains("return UINT64_MAX;"));
    }

    #[test]
    fn widest_signed_uses_prechecks() {
        let code = render_helper(HelperOp::ClampAdd, Primitive::I64, false);
        assert!(code.contains("(a > (INT64_MAX - b))"));
        assert!(code.contains("(a < (INT64_MIN - b))"));
    }

    #[test]
    fn debug_mode_panics_instead_of_saturating() {
        let code = render_helper(HelperOp::ClampAdd, Primitive::I8, true);
        assert!(code.contains("PANIC: i8 add overflow"));
        assert!(code.contains("abort();"));
        assert!(!code.contains("return INT8_MAX;"));
    }

    #[test]
    fn signed_safe_div_guards_min_over_minus_one() {
        let code = render_helper(HelperOp::SafeDiv, Primitive::I32, false);
        assert!(code.contains("(a == INT32_MIN) && (b == -1)"));
        assert!(code.contains("*out = dflt;"));
    }

    #[test]
    fn unsigned_safe_mod_checks_zero_only() {
        let code = render_helper(HelperOp::SafeMod, Primitive::U16, false);
        assert!(code.contains("if (b == 0U)"));
        assert!(!code.contains("-1"));
        assert!(code.contains("a % b"));
    }
}
