//! MISRA-leaning validation rules.
//!
//! Each validator is a pure predicate over a node (plus registry state),
//! invoked by the generators at the point where generation would otherwise
//! succeed. Every violation maps to its own error kind.

use crate::ast::{AccessMode, Expr, ExprKind, PostfixKind};
use crate::errors::{ErrorKind, Result, SourcePos};
use crate::sema::consts;
use crate::sema::registry::SymbolRegistry;
use crate::ty::{Primitive, TypeInfo};

/// Ternary shape: the condition must be a comparison (not a bare boolean or
/// integer), must not contain a call, and neither branch may nest another
/// ternary.
pub fn ternary(
    cond: &Expr,
    then_branch: &Expr,
    else_branch: &Expr,
) -> Result<()> {
    match &cond.unwrap_parens().kind {
        ExprKind::Binary { op, .. } if op.is_comparison() => {}
        _ => {
            return Err(
                ErrorKind::TernaryConditionNotComparison.at(cond.pos)
            )
        }
    }
    if contains_call(cond) {
        return Err(ErrorKind::TernaryConditionHasCall.at(cond.pos));
    }
    for branch in [then_branch, else_branch] {
        if contains_ternary(branch) {
            return Err(ErrorKind::NestedTernary.at(branch.pos));
        }
    }
    Ok(())
}

pub fn contains_call(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Paren(inner) => contains_call(inner),
        ExprKind::Unary { operand, .. } => contains_call(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            contains_call(lhs) || contains_call(rhs)
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            contains_call(cond)
                || contains_call(then_branch)
                || contains_call(else_branch)
        }
        ExprKind::Postfix { base, ops } => {
            contains_call(base)
                || ops.iter().any(|op| match &op.kind {
                    PostfixKind::Call(_) => true,
                    PostfixKind::Index(e) => contains_call(e),
                    PostfixKind::BitRange(lo, hi) => {
                        contains_call(lo) || contains_call(hi)
                    }
                    PostfixKind::Member(_) => false,
                })
        }
        _ => false,
    }
}

fn contains_ternary(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Ternary { .. } => true,
        ExprKind::Paren(inner) => contains_ternary(inner),
        ExprKind::Unary { operand, .. } => contains_ternary(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            contains_ternary(lhs) || contains_ternary(rhs)
        }
        ExprKind::Postfix { base, ops } => {
            contains_ternary(base)
                || ops.iter().any(|op| match &op.kind {
                    PostfixKind::Call(args) => {
                        args.iter().any(contains_ternary)
                    }
                    PostfixKind::Index(e) => contains_ternary(e),
                    PostfixKind::BitRange(lo, hi) => {
                        contains_ternary(lo) || contains_ternary(hi)
                    }
                    PostfixKind::Member(_) => false,
                })
        }
        _ => false,
    }
}

/// Shift amounts must be integer literals strictly below the width of the
/// left operand's type.
pub fn shift_amount(
    reg: &SymbolRegistry,
    lhs_ty: &TypeInfo,
    amount: &Expr,
) -> Result<()> {
    let width = lhs_ty
        .scalar_prim()
        .filter(|p| p.is_integer())
        .map(Primitive::bits)
        .unwrap_or(0);
    let Some(value) = consts::fold_int(reg, amount) else {
        return Err(ErrorKind::ShiftBeyondWidth {
            amount: -1,
            width,
        }
        .at(amount.pos)
        .with_remediation("shift amounts must be compile-time literals"));
    };
    if value < 0 || value >= width as i128 {
        return Err(ErrorKind::ShiftBeyondWidth {
            amount: value,
            width,
        }
        .at(amount.pos));
    }
    Ok(())
}

/// Loop and `if` conditions must be boolean; integers as truth values are
/// rejected.
pub fn condition(ty: &TypeInfo, pos: SourcePos) -> Result<()> {
    if ty.scalar_prim() == Some(Primitive::Bool) {
        Ok(())
    } else {
        Err(ErrorKind::NonBooleanCondition(ty.describe()).at(pos))
    }
}

/// Compile-time array bounds: a literal index into a statically-sized
/// dimension must be inside it.
pub fn array_index(
    reg: &SymbolRegistry,
    len: u64,
    index: &Expr,
) -> Result<()> {
    if let Some(value) = consts::fold_int(reg, index) {
        if value < 0 || value >= len as i128 {
            return Err(ErrorKind::ArrayIndexOutOfBounds {
                index: value,
                len,
            }
            .at(index.pos));
        }
    }
    Ok(())
}

/// Compile-time bit-index bounds: `0 <= i < n` for an n-bit value.
pub fn bit_index(
    reg: &SymbolRegistry,
    width: u32,
    index: &Expr,
) -> Result<()> {
    if let Some(value) = consts::fold_int(reg, index) {
        if value < 0 || value >= width as i128 {
            return Err(ErrorKind::BitIndexOutOfBounds {
                index: value,
                width,
            }
            .at(index.pos));
        }
    }
    Ok(())
}

/// Register member reads: `wo`, `w1c` and `w1s` members may not be read.
pub fn register_read(
    member: &str,
    access: AccessMode,
    pos: SourcePos,
) -> Result<()> {
    if access.readable() {
        Ok(())
    } else {
        Err(ErrorKind::WriteOnlyRead(member.to_owned()).at(pos))
    }
}

/// Register member writes: `ro` members may not be written.
pub fn register_write(
    member: &str,
    access: AccessMode,
    pos: SourcePos,
) -> Result<()> {
    if access.writable() {
        Ok(())
    } else {
        Err(ErrorKind::ReadOnlyWrite(member.to_owned()).at(pos))
    }
}

/// Division and modulo by a literal zero are compile-time errors.
pub fn division(reg: &SymbolRegistry, divisor: &Expr) -> Result<()> {
    if let Some(0) = consts::fold_int(reg, divisor) {
        return Err(ErrorKind::DivisionByZero.at(divisor.pos).with_remediation(
            "use safe_div/safe_mod with an explicit default for runtime \
             divisors",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Radix};
    use crate::errors::SourcePos;

    fn int(v: i128) -> Expr {
        Expr {
            kind: ExprKind::Int {
                value: v,
                radix: Radix::Dec,
                suffix: None,
            },
            pos: SourcePos::UNKNOWN,
        }
    }

    fn cmp(l: Expr, r: Expr) -> Expr {
        Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Lt,
                lhs: Box::new(l),
                rhs: Box::new(r),
            },
            pos: SourcePos::UNKNOWN,
        }
    }

    #[test]
    fn ternary_condition_must_compare() {
        let err =
            ternary(&int(1), &int(2), &int(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TernaryConditionNotComparison);
        assert!(ternary(&cmp(int(1), int(2)), &int(2), &int(3)).is_ok());
    }

    #[test]
    fn nested_ternary_is_rejected() {
        let nested = Expr {
            kind: ExprKind::Ternary {
                cond: Box::new(cmp(int(1), int(2))),
                then_branch: Box::new(int(1)),
                else_branch: Box::new(int(2)),
            },
            pos: SourcePos::UNKNOWN,
        };
        let err = ternary(&cmp(int(1), int(2)), &nested, &int(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NestedTernary);
    }

    #[test]
    fn shift_width_bound_is_strict() {
        let reg = SymbolRegistry::default();
        let u32_ty = TypeInfo::prim(Primitive::U32);
        assert!(shift_amount(&reg, &u32_ty, &int(31)).is_ok());
        let err = shift_amount(&reg, &u32_ty, &int(32)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ShiftBeyondWidth { .. }));
    }

    #[test]
    fn literal_zero_divisor_is_rejected() {
        let reg = SymbolRegistry::default();
        let err = division(&reg, &int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert!(division(&reg, &int(3)).is_ok());
    }

    #[test]
    fn write_only_members_cannot_be_read() {
        let err =
            register_read("STAT", AccessMode::W1c, SourcePos::UNKNOWN)
                .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::WriteOnlyRead(_)));
        assert!(register_read("STAT", AccessMode::Rw, SourcePos::UNKNOWN)
            .is_ok());
    }
}
