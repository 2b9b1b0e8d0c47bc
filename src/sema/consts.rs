//! Compile-time folding of constant expressions.
//!
//! Used for bounds checks (array and bit indices, shift amounts), the
//! literal-zero division rule, and the const-value table that lets `this.X`
//! reads of const scope members collapse to their literal.

use serde::Serialize;

use crate::ast::{BinaryOp, Expr, ExprKind, PostfixKind, UnaryOp};
use crate::sema::registry::SymbolRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConstValue {
    Int(i128),
    Float(String),
    Bool(bool),
    Str(String),
}

/// Fold an expression to a value, or `None` when it is not compile-time
/// constant. Folding never errors: anything suspicious simply does not fold
/// and is validated in full later.
pub fn fold(reg: &SymbolRegistry, expr: &Expr) -> Option<ConstValue> {
    match &expr.kind {
        ExprKind::Int { value, .. } => Some(ConstValue::Int(*value)),
        ExprKind::Float { text, .. } => Some(ConstValue::Float(text.clone())),
        ExprKind::Bool(b) => Some(ConstValue::Bool(*b)),
        ExprKind::Str(s) => Some(ConstValue::Str(s.clone())),
        ExprKind::Paren(inner) => fold(reg, inner),
        ExprKind::Ident(name) => reg.const_value(name).cloned(),
        ExprKind::Postfix { base, ops } => fold_postfix(reg, base, ops),
        ExprKind::Unary { op, operand } => {
            let val = fold(reg, operand)?;
            match (op, val) {
                (UnaryOp::Neg, ConstValue::Int(v)) => {
                    Some(ConstValue::Int(-v))
                }
                (UnaryOp::Not, ConstValue::Bool(b)) => {
                    Some(ConstValue::Bool(!b))
                }
                _ => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = fold_int(reg, lhs)?;
            let r = fold_int(reg, rhs)?;
            let v = match op {
                BinaryOp::Add => l.checked_add(r)?,
                BinaryOp::Sub => l.checked_sub(r)?,
                BinaryOp::Mul => l.checked_mul(r)?,
                BinaryOp::Div => l.checked_div(r)?,
                BinaryOp::Mod => l.checked_rem(r)?,
                BinaryOp::BitAnd => l & r,
                BinaryOp::BitOr => l | r,
                BinaryOp::BitXor => l ^ r,
                BinaryOp::Shl => l.checked_shl(u32::try_from(r).ok()?)?,
                BinaryOp::Shr => l.checked_shr(u32::try_from(r).ok()?)?,
                _ => return None,
            };
            Some(ConstValue::Int(v))
        }
        _ => None,
    }
}

/// `Enum.Member` and `Scope.constant` fold through the registry tables.
fn fold_postfix(
    reg: &SymbolRegistry,
    base: &Expr,
    ops: &[crate::ast::PostfixOp],
) -> Option<ConstValue> {
    let [op] = ops else { return None };
    let PostfixKind::Member(member) = &op.kind else {
        return None;
    };
    let ExprKind::Ident(name) = &base.unwrap_parens().kind else {
        return None;
    };
    if let Some(info) = reg.enum_info(name) {
        return info.member(member).map(|v| ConstValue::Int(v as i128));
    }
    reg.const_value(&format!("{name}.{member}")).cloned()
}

/// Fold to an integer, the form the bounds validators want.
pub fn fold_int(reg: &SymbolRegistry, expr: &Expr) -> Option<i128> {
    match fold(reg, expr)? {
        ConstValue::Int(v) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprKind, Radix};
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

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(l),
                rhs: Box::new(r),
            },
            pos: SourcePos::UNKNOWN,
        }
    }

    #[test]
    fn folds_integer_arithmetic() {
        let reg = SymbolRegistry::default();
        let e = bin(BinaryOp::Add, int(40), int(2));
        assert_eq!(fold_int(&reg, &e), Some(42));
    }

    #[test]
    fn division_by_zero_does_not_fold() {
        let reg = SymbolRegistry::default();
        let e = bin(BinaryOp::Div, int(1), int(0));
        assert_eq!(fold_int(&reg, &e), None);
    }

    #[test]
    fn shift_folds() {
        let reg = SymbolRegistry::default();
        let e = bin(BinaryOp::Shl, int(1), int(4));
        assert_eq!(fold_int(&reg, &e), Some(16));
    }
}
