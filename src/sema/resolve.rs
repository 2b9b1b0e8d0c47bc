//! Expression typing.
//!
//! `type_of` is total over well-typed programs: every expression has exactly
//! one inferred type, and anything ill-typed fails with the error kind
//! specific to the violation. The postfix walk mirrors the generator's
//! decision tables but computes types only.

use crate::ast::{
    BinaryOp, Expr, ExprKind, PostfixKind, PostfixOp, UnaryOp,
};
use crate::errors::{ErrorKind, Result, SourcePos};
use crate::sema::registry::{
    FunctionSig, NamedKind, ParamSig, ScopeItem, SymbolRegistry,
};
use crate::ty::{BaseType, Primitive, TypeInfo};

/// Ambient state for resolving names: the frozen registry plus whatever the
/// current function brought into scope.
pub struct ResolveCtx<'a> {
    pub registry: &'a SymbolRegistry,
    pub scope: Option<&'a str>,
    pub function: Option<&'a FunctionSig>,
    pub locals: &'a [(String, TypeInfo)],
}

impl<'a> ResolveCtx<'a> {
    pub fn param(&self, name: &str) -> Option<&'a ParamSig> {
        self.function?.params.iter().find(|p| p.name == name)
    }

    pub fn local(&self, name: &str) -> Option<&'a TypeInfo> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    fn shadows(&self, name: &str) -> bool {
        self.param(name).is_some() || self.local(name).is_some()
    }
}

/// What the head of a postfix chain refers to before any operation applies.
enum Base<'a> {
    Val(TypeInfo),
    ScopeNs(String),
    GlobalNs,
    EnumNs(String),
    RegisterNs(String),
    Func(&'a FunctionSig),
    /// Unknown name: legal only when immediately called (external C).
    External(String),
}

pub fn type_of(ctx: &ResolveCtx, expr: &Expr) -> Result<TypeInfo> {
    match &expr.kind {
        ExprKind::Int { value, suffix, .. } => Ok(TypeInfo::prim(
            suffix.unwrap_or_else(|| narrowest_int(*value)),
        )),
        ExprKind::Float { suffix, .. } => {
            Ok(TypeInfo::prim(suffix.unwrap_or(Primitive::F64)))
        }
        ExprKind::Bool(_) => Ok(TypeInfo::prim(Primitive::Bool)),
        ExprKind::Str(s) => Ok(TypeInfo::string(Some(s.len() as u32))),
        ExprKind::Paren(inner) => type_of(ctx, inner),
        ExprKind::Ident(_) | ExprKind::This | ExprKind::Global => {
            let base = classify(ctx, expr)?;
            base_as_value(base, expr.pos)
        }
        ExprKind::Postfix { base, ops } => {
            postfix_type(ctx, base, ops, expr.pos)
        }
        ExprKind::Unary { op, operand } => unary_type(ctx, *op, operand),
        ExprKind::Binary { op, lhs, rhs } => {
            binary_result(ctx, *op, lhs, rhs, expr.pos)
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => ternary_type(ctx, cond, then_branch, else_branch, expr.pos),
    }
}

/// The narrowest primitive a bare integer literal fits in.
pub fn narrowest_int(value: i128) -> Primitive {
    if value >= 0 {
        if value <= u8::MAX as i128 {
            Primitive::U8
        } else if value <= u16::MAX as i128 {
            Primitive::U16
        } else if value <= u32::MAX as i128 {
            Primitive::U32
        } else {
            Primitive::U64
        }
    } else if value >= i8::MIN as i128 {
        Primitive::I8
    } else if value >= i16::MIN as i128 {
        Primitive::I16
    } else if value >= i32::MIN as i128 {
        Primitive::I32
    } else {
        Primitive::I64
    }
}

/// The value of an integer literal with no explicit width suffix, seeing
/// through parentheses and a leading minus.
pub fn untyped_int_literal(expr: &Expr) -> Option<i128> {
    match &expr.unwrap_parens().kind {
        ExprKind::Int {
            value,
            suffix: None,
            ..
        } => Some(*value),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match &operand.unwrap_parens().kind {
            ExprKind::Int {
                value,
                suffix: None,
                ..
            } => Some(-*value),
            _ => None,
        },
        _ => None,
    }
}

/// Is this a float literal with no suffix (adoptable by either float width)?
pub fn untyped_float_literal(expr: &Expr) -> bool {
    matches!(
        &expr.unwrap_parens().kind,
        ExprKind::Float { suffix: None, .. }
    )
}

fn classify<'a>(ctx: &ResolveCtx<'a>, expr: &Expr) -> Result<Base<'a>> {
    match &expr.unwrap_parens().kind {
        ExprKind::This => match ctx.scope {
            Some(s) => Ok(Base::ScopeNs(s.to_owned())),
            None => Err(ErrorKind::WrongKind {
                name: "this".to_owned(),
                expected: "scope context",
                actual: "file level",
            }
            .at(expr.pos)),
        },
        ExprKind::Global => Ok(Base::GlobalNs),
        ExprKind::Ident(name) => {
            if let Some(p) = ctx.param(name) {
                return Ok(Base::Val(p.ty.clone()));
            }
            if let Some(t) = ctx.local(name) {
                return Ok(Base::Val(t.clone()));
            }
            if let Some(g) = ctx.registry.global(name) {
                return Ok(Base::Val(g.ty.clone()));
            }
            if let Some(f) = ctx.registry.function(name) {
                return Ok(Base::Func(f));
            }
            match ctx.registry.kind_of(name) {
                Some(NamedKind::Scope) => {
                    if ctx.scope == Some(name.as_str()) {
                        Err(ErrorKind::OwnScopeByName(name.clone())
                            .at(expr.pos)
                            .with_remediation(
                                "use `this` instead of the scope name",
                            ))
                    } else {
                        Ok(Base::ScopeNs(name.clone()))
                    }
                }
                Some(NamedKind::Enum) => Ok(Base::EnumNs(name.clone())),
                Some(NamedKind::Register) => {
                    Ok(Base::RegisterNs(name.clone()))
                }
                Some(kind) => Err(ErrorKind::WrongKind {
                    name: name.clone(),
                    expected: "value",
                    actual: kind.describe(),
                }
                .at(expr.pos)),
                None => Ok(Base::External(name.clone())),
            }
        }
        _ => type_of(ctx, expr).map(Base::Val),
    }
}

fn base_as_value(base: Base, pos: SourcePos) -> Result<TypeInfo> {
    match base {
        Base::Val(t) => Ok(t),
        Base::Func(f) => Err(ErrorKind::WrongKind {
            name: f.name.clone(),
            expected: "value",
            actual: "function",
        }
        .at(pos)),
        Base::External(name) => Err(ErrorKind::UnknownSymbol(name).at(pos)),
        Base::ScopeNs(name) | Base::EnumNs(name) | Base::RegisterNs(name) => {
            Err(ErrorKind::WrongKind {
                name,
                expected: "value",
                actual: "namespace",
            }
            .at(pos))
        }
        Base::GlobalNs => Err(ErrorKind::WrongKind {
            name: "global".to_owned(),
            expected: "value",
            actual: "namespace",
        }
        .at(pos)),
    }
}

fn postfix_type(
    ctx: &ResolveCtx,
    base_expr: &Expr,
    ops: &[PostfixOp],
    pos: SourcePos,
) -> Result<TypeInfo> {
    let mut state = classify(ctx, base_expr)?;
    for op in ops {
        state = step(ctx, state, op)?;
    }
    match state {
        Base::Val(t) => Ok(t),
        other => base_as_value(other, pos),
    }
}

fn step<'a>(
    ctx: &ResolveCtx<'a>,
    state: Base<'a>,
    op: &PostfixOp,
) -> Result<Base<'a>> {
    match &op.kind {
        PostfixKind::Member(member) => member_step(ctx, state, member, op.pos),
        PostfixKind::Index(idx) => index_step(ctx, state, idx, op.pos),
        PostfixKind::BitRange(lo, hi) => {
            bit_range_step(ctx, state, lo, hi, op.pos)
        }
        PostfixKind::Call(args) => call_step(ctx, state, args, op.pos),
    }
}

fn member_step<'a>(
    ctx: &ResolveCtx<'a>,
    state: Base<'a>,
    member: &str,
    pos: SourcePos,
) -> Result<Base<'a>> {
    match state {
        Base::GlobalNs => {
            if ctx.shadows(member) {
                return Err(ErrorKind::AmbiguousReference(member.to_owned())
                    .at(pos)
                    .with_remediation(
                        "a local shadows this file-level name; rename one",
                    ));
            }
            if let Some(g) = ctx.registry.global(member) {
                Ok(Base::Val(g.ty.clone()))
            } else if let Some(f) = ctx.registry.function(member) {
                Ok(Base::Func(f))
            } else {
                Err(ErrorKind::UnknownSymbol(member.to_owned()).at(pos))
            }
        }
        Base::ScopeNs(scope) => {
            match ctx
                .registry
                .scope_member(&scope, member, ctx.scope)
                .map_err(|k| k.at(pos))?
            {
                ScopeItem::Func(f) => Ok(Base::Func(f)),
                ScopeItem::Var(v) => Ok(Base::Val(v.ty.clone())),
            }
        }
        Base::EnumNs(name) => {
            let info = ctx.registry.enum_info(&name).ok_or_else(|| {
                ErrorKind::UnknownSymbol(name.clone()).at(pos)
            })?;
            if info.member(member).is_none() {
                return Err(ErrorKind::UnknownSymbol(format!(
                    "{name}.{member}"
                ))
                .at(pos));
            }
            Ok(Base::Val(TypeInfo {
                base: BaseType::Enum(name),
                dims: Vec::new(),
                is_const: true,
            }))
        }
        Base::RegisterNs(name) => {
            let info = ctx.registry.register(&name).ok_or_else(|| {
                ErrorKind::UnknownSymbol(name.clone()).at(pos)
            })?;
            let m = info.member(member).ok_or_else(|| {
                ErrorKind::UnknownSymbol(format!("{name}.{member}")).at(pos)
            })?;
            Ok(Base::Val(m.ty.clone()))
        }
        Base::Val(ty) => value_member_type(ctx, &ty, member, pos).map(Base::Val),
        Base::Func(f) => Err(ErrorKind::WrongKind {
            name: f.name.clone(),
            expected: "value",
            actual: "function",
        }
        .at(pos)),
        Base::External(name) => {
            Err(ErrorKind::UnknownSymbol(name).at(pos))
        }
    }
}

fn value_member_type(
    ctx: &ResolveCtx,
    ty: &TypeInfo,
    member: &str,
    pos: SourcePos,
) -> Result<TypeInfo> {
    // `.length`, `.capacity` and `.size` are semantic members, not fields.
    match member {
        "length" => {
            let ok = ty.is_string()
                || ty.is_array()
                || ty
                    .scalar_prim()
                    .map(Primitive::is_integer)
                    .unwrap_or(false);
            if ok {
                return Ok(TypeInfo::prim(Primitive::U32));
            }
            return Err(ErrorKind::WrongKind {
                name: member.to_owned(),
                expected: "string, array or integer",
                actual: "other type",
            }
            .at(pos));
        }
        "capacity" | "size" => {
            if ty.is_string() && !ty.is_array() {
                return Ok(TypeInfo::prim(Primitive::U32));
            }
            return Err(ErrorKind::WrongKind {
                name: member.to_owned(),
                expected: "string",
                actual: "other type",
            }
            .at(pos));
        }
        _ => {}
    }
    if ty.is_array() {
        return Err(ErrorKind::WrongKind {
            name: member.to_owned(),
            expected: "scalar value",
            actual: "array",
        }
        .at(pos));
    }
    match &ty.base {
        BaseType::Struct(name) => {
            let info = ctx.registry.struct_info(name).ok_or_else(|| {
                ErrorKind::UnknownSymbol(name.clone()).at(pos)
            })?;
            let field = info.field(member).ok_or_else(|| {
                ErrorKind::UnknownSymbol(format!("{name}.{member}")).at(pos)
            })?;
            Ok(field.ty.clone())
        }
        BaseType::Bitmap { name, bits } => {
            let info = ctx.registry.bitmap(name).ok_or_else(|| {
                ErrorKind::UnknownSymbol(name.clone()).at(pos)
            })?;
            let field = info.field(member).ok_or_else(|| {
                ErrorKind::UnknownBitmapField {
                    bitmap: name.clone(),
                    field: member.to_owned(),
                }
                .at(pos)
            })?;
            if field.width == 1 {
                Ok(TypeInfo::prim(Primitive::Bool))
            } else {
                Ok(TypeInfo::prim(bits.backing()))
            }
        }
        _ => Err(ErrorKind::WrongKind {
            name: member.to_owned(),
            expected: "struct or bitmap value",
            actual: "other type",
        }
        .at(pos)),
    }
}

fn index_step<'a>(
    ctx: &ResolveCtx<'a>,
    state: Base<'a>,
    idx: &Expr,
    pos: SourcePos,
) -> Result<Base<'a>> {
    let idx_ty = type_of(ctx, idx)?;
    if !idx_ty
        .scalar_prim()
        .map(Primitive::is_integer)
        .unwrap_or(false)
    {
        return Err(ErrorKind::TypeMismatch {
            expected: "integer index".to_owned(),
            found: idx_ty.describe(),
        }
        .at(pos));
    }
    let Base::Val(ty) = state else {
        return Err(ErrorKind::WrongKind {
            name: "[]".to_owned(),
            expected: "value",
            actual: "namespace",
        }
        .at(pos));
    };
    if ty.is_array() {
        return Ok(Base::Val(ty.element()));
    }
    if ty.is_string() {
        return Ok(Base::Val(TypeInfo::prim(Primitive::U8)));
    }
    match &ty.base {
        BaseType::Prim(p) if p.is_integer() => {
            // Single-bit read of a scalar integer.
            Ok(Base::Val(TypeInfo::prim(Primitive::Bool)))
        }
        BaseType::Bitmap { name, .. } => Err(ErrorKind::WrongKind {
            name: name.clone(),
            expected: "named bitmap field access",
            actual: "subscript",
        }
        .at(pos)),
        BaseType::Prim(p) if p.is_float() => Err(ErrorKind::WrongKind {
            name: "[]".to_owned(),
            expected: "bit range `[lo, hi]` on floats",
            actual: "single subscript",
        }
        .at(pos)),
        _ => Err(ErrorKind::WrongKind {
            name: "[]".to_owned(),
            expected: "array, string or integer",
            actual: "other type",
        }
        .at(pos)),
    }
}

fn bit_range_step<'a>(
    ctx: &ResolveCtx<'a>,
    state: Base<'a>,
    lo: &Expr,
    hi: &Expr,
    pos: SourcePos,
) -> Result<Base<'a>> {
    for bound in [lo, hi] {
        let t = type_of(ctx, bound)?;
        if !t.scalar_prim().map(Primitive::is_integer).unwrap_or(false) {
            return Err(ErrorKind::TypeMismatch {
                expected: "integer bit index".to_owned(),
                found: t.describe(),
            }
            .at(pos));
        }
    }
    let Base::Val(ty) = state else {
        return Err(ErrorKind::WrongKind {
            name: "[lo, hi]".to_owned(),
            expected: "value",
            actual: "namespace",
        }
        .at(pos));
    };
    match ty.scalar_prim() {
        Some(p) if p.is_integer() => {
            Ok(Base::Val(TypeInfo::prim(unsigned_of_width(p.bits()))))
        }
        Some(Primitive::F32) => {
            Ok(Base::Val(TypeInfo::prim(Primitive::U32)))
        }
        Some(Primitive::F64) => {
            Ok(Base::Val(TypeInfo::prim(Primitive::U64)))
        }
        _ => Err(ErrorKind::WrongKind {
            name: "[lo, hi]".to_owned(),
            expected: "integer or float scalar",
            actual: "other type",
        }
        .at(pos)),
    }
}

fn unsigned_of_width(bits: u32) -> Primitive {
    match bits {
        8 => Primitive::U8,
        16 => Primitive::U16,
        32 => Primitive::U32,
        _ => Primitive::U64,
    }
}

fn call_step<'a>(
    ctx: &ResolveCtx<'a>,
    state: Base<'a>,
    args: &[Expr],
    pos: SourcePos,
) -> Result<Base<'a>> {
    match state {
        Base::Func(sig) => {
            if args.len() != sig.params.len() {
                return Err(ErrorKind::ArgumentCount {
                    name: sig.name.clone(),
                    expected: sig.params.len(),
                    found: args.len(),
                }
                .at(pos));
            }
            Ok(Base::Val(
                sig.ret.clone().unwrap_or_else(TypeInfo::void),
            ))
        }
        Base::Val(ty) => match &ty.base {
            BaseType::Callback(name) => {
                let cb = ctx.registry.callback(name).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(name.clone()).at(pos)
                })?;
                if args.len() != cb.params.len() {
                    return Err(ErrorKind::ArgumentCount {
                        name: name.clone(),
                        expected: cb.params.len(),
                        found: args.len(),
                    }
                    .at(pos));
                }
                Ok(Base::Val(
                    cb.ret.clone().unwrap_or_else(TypeInfo::void),
                ))
            }
            _ => Err(ErrorKind::NotCallable(ty.describe()).at(pos)),
        },
        // External C calls: the signature lives outside this translation
        // unit, the arguments travel by value and the result is untyped.
        Base::External(name) => {
            if name == "safe_div" || name == "safe_mod" {
                if args.len() != 4 {
                    return Err(ErrorKind::ArgumentCount {
                        name,
                        expected: 4,
                        found: args.len(),
                    }
                    .at(pos));
                }
            }
            Ok(Base::Val(TypeInfo::void()))
        }
        Base::ScopeNs(name) | Base::EnumNs(name) | Base::RegisterNs(name) => {
            Err(ErrorKind::NotCallable(name).at(pos))
        }
        Base::GlobalNs => {
            Err(ErrorKind::NotCallable("global".to_owned()).at(pos))
        }
    }
}

fn unary_type(
    ctx: &ResolveCtx,
    op: UnaryOp,
    operand: &Expr,
) -> Result<TypeInfo> {
    // A negated bare literal is itself a literal.
    if op == UnaryOp::Neg {
        if let Some(v) = untyped_int_literal(operand) {
            return Ok(TypeInfo::prim(narrowest_int(-v)));
        }
    }
    let t = type_of(ctx, operand)?;
    let prim = t.scalar_prim();
    match op {
        UnaryOp::Neg => match prim {
            Some(p) if p.is_signed() || p.is_float() => Ok(TypeInfo::prim(p)),
            Some(Primitive::U8) => Ok(TypeInfo::prim(Primitive::I16)),
            Some(Primitive::U16) => Ok(TypeInfo::prim(Primitive::I32)),
            Some(Primitive::U32) => Ok(TypeInfo::prim(Primitive::I64)),
            _ => Err(ErrorKind::TypeMismatch {
                expected: "signed numeric".to_owned(),
                found: t.describe(),
            }
            .at(operand.pos)),
        },
        UnaryOp::Not => match prim {
            Some(Primitive::Bool) => Ok(TypeInfo::prim(Primitive::Bool)),
            _ => Err(ErrorKind::NonBooleanCondition(t.describe())
                .at(operand.pos)),
        },
        UnaryOp::BitNot => match &t.base {
            BaseType::Prim(p) if p.is_unsigned() && !t.is_array() => {
                Ok(TypeInfo::prim(*p))
            }
            // Bitwise NOT preserves the bitmap type so masks stay typed.
            BaseType::Bitmap { .. } if !t.is_array() => Ok(t.clone()),
            _ => Err(ErrorKind::TypeMismatch {
                expected: "unsigned integer".to_owned(),
                found: t.describe(),
            }
            .at(operand.pos)),
        },
    }
}

fn make_int(signed: bool, bits: u32) -> Primitive {
    match (signed, bits) {
        (true, 8) => Primitive::I8,
        (true, 16) => Primitive::I16,
        (true, 32) => Primitive::I32,
        (true, _) => Primitive::I64,
        (false, 8) => Primitive::U8,
        (false, 16) => Primitive::U16,
        (false, 32) => Primitive::U32,
        (false, _) => Primitive::U64,
    }
}

/// The type both operands of an arithmetic or bitwise operation settle on.
/// Same-signedness operands meet at the wider width; an unsuffixed literal
/// adopts the other operand's type when it fits; anything else is a
/// mismatch, never an implicit signedness change.
pub fn common_int_type(
    lhs_ty: Primitive,
    rhs_ty: Primitive,
    lhs: &Expr,
    rhs: &Expr,
    pos: SourcePos,
) -> Result<Primitive> {
    if lhs_ty.is_signed() == rhs_ty.is_signed() {
        let bits = lhs_ty.bits().max(rhs_ty.bits());
        return Ok(make_int(lhs_ty.is_signed(), bits));
    }
    if let Some(v) = untyped_int_literal(lhs) {
        if fits(v, rhs_ty) {
            return Ok(rhs_ty);
        }
    }
    if let Some(v) = untyped_int_literal(rhs) {
        if fits(v, lhs_ty) {
            return Ok(lhs_ty);
        }
    }
    Err(ErrorKind::TypeMismatch {
        expected: lhs_ty.name().to_owned(),
        found: rhs_ty.name().to_owned(),
    }
    .at(pos))
}

pub fn fits(value: i128, prim: Primitive) -> bool {
    prim.int_range()
        .map(|(lo, hi)| value >= lo && value <= hi)
        .unwrap_or(false)
}

/// The inferred type of `lhs op rhs`; also the operand compatibility check
/// compound assignments reuse.
pub fn binary_result(
    ctx: &ResolveCtx,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    pos: SourcePos,
) -> Result<TypeInfo> {
    let lt = type_of(ctx, lhs)?;
    let rt = type_of(ctx, rhs)?;

    if op.is_logical() {
        for (t, e) in [(&lt, lhs), (&rt, rhs)] {
            if t.scalar_prim() != Some(Primitive::Bool) {
                return Err(
                    ErrorKind::NonBooleanCondition(t.describe()).at(e.pos)
                );
            }
        }
        return Ok(TypeInfo::prim(Primitive::Bool));
    }

    if op.is_comparison() {
        comparison_operands(&lt, &rt, lhs, rhs, pos)?;
        return Ok(TypeInfo::prim(Primitive::Bool));
    }

    if op.is_shift() {
        let p = lt.scalar_prim().filter(|p| p.is_integer()).ok_or_else(
            || {
                ErrorKind::TypeMismatch {
                    expected: "integer".to_owned(),
                    found: lt.describe(),
                }
                .at(lhs.pos)
            },
        )?;
        return Ok(TypeInfo::prim(p));
    }

    let lp = lt.scalar_prim();
    let rp = rt.scalar_prim();

    // `%` is integer-only; C has no float remainder operator.
    if op == BinaryOp::Mod {
        for (t, e) in [(&lt, lhs), (&rt, rhs)] {
            if t.scalar_prim().map(Primitive::is_float).unwrap_or(false) {
                return Err(ErrorKind::TypeMismatch {
                    expected: "integer".to_owned(),
                    found: t.describe(),
                }
                .at(e.pos));
            }
        }
    }

    if op.is_bitwise() {
        // Bitwise ops between a bitmap and its mask keep the bitmap type.
        if lt.is_bitmap() && (rt == lt || untyped_int_literal(rhs).is_some())
        {
            return Ok(lt);
        }
        match (lp, rp) {
            (Some(l), Some(r)) if l.is_unsigned() && r.is_unsigned() => {
                let p = common_int_type(l, r, lhs, rhs, pos)?;
                return Ok(TypeInfo::prim(p));
            }
            _ => {
                return Err(ErrorKind::TypeMismatch {
                    expected: "unsigned integer".to_owned(),
                    found: format!("{} and {}", lt.describe(), rt.describe()),
                }
                .at(pos))
            }
        }
    }

    // Arithmetic.
    match (lp, rp) {
        (Some(l), Some(r)) if l.is_integer() && r.is_integer() => {
            let p = common_int_type(l, r, lhs, rhs, pos)?;
            Ok(TypeInfo::prim(p))
        }
        (Some(l), Some(r)) if l.is_float() && r.is_float() => {
            let p = if l == Primitive::F64 || r == Primitive::F64 {
                Primitive::F64
            } else {
                Primitive::F32
            };
            Ok(TypeInfo::prim(p))
        }
        (Some(l), Some(_)) if l.is_float() => {
            if untyped_int_literal(rhs).is_some() {
                Ok(TypeInfo::prim(l))
            } else {
                Err(ErrorKind::TypeMismatch {
                    expected: l.name().to_owned(),
                    found: rt.describe(),
                }
                .at(pos))
            }
        }
        (Some(_), Some(r)) if r.is_float() => {
            if untyped_int_literal(lhs).is_some() {
                Ok(TypeInfo::prim(r))
            } else {
                Err(ErrorKind::TypeMismatch {
                    expected: r.name().to_owned(),
                    found: lt.describe(),
                }
                .at(pos))
            }
        }
        _ => Err(ErrorKind::TypeMismatch {
            expected: "numeric operands".to_owned(),
            found: format!("{} and {}", lt.describe(), rt.describe()),
        }
        .at(pos)),
    }
}

fn comparison_operands(
    lt: &TypeInfo,
    rt: &TypeInfo,
    lhs: &Expr,
    rhs: &Expr,
    pos: SourcePos,
) -> Result<()> {
    if lt.is_enum() || rt.is_enum() {
        if lt.base == rt.base {
            return Ok(());
        }
        return Err(ErrorKind::TypeMismatch {
            expected: lt.describe(),
            found: rt.describe(),
        }
        .at(pos));
    }
    let lp = lt.scalar_prim();
    let rp = rt.scalar_prim();
    match (lp, rp) {
        (Some(Primitive::Bool), Some(Primitive::Bool)) => Ok(()),
        (Some(l), Some(r)) if l.is_integer() && r.is_integer() => {
            common_int_type(l, r, lhs, rhs, pos).map(|_| ())
        }
        (Some(l), Some(r)) if l.is_float() && r.is_float() => Ok(()),
        (Some(l), Some(_)) if l.is_float() => {
            if untyped_int_literal(rhs).is_some() {
                Ok(())
            } else {
                Err(ErrorKind::TypeMismatch {
                    expected: l.name().to_owned(),
                    found: rt.describe(),
                }
                .at(pos))
            }
        }
        (Some(_), Some(r)) if r.is_float() => {
            if untyped_int_literal(lhs).is_some() {
                Ok(())
            } else {
                Err(ErrorKind::TypeMismatch {
                    expected: r.name().to_owned(),
                    found: lt.describe(),
                }
                .at(pos))
            }
        }
        _ => Err(ErrorKind::TypeMismatch {
            expected: lt.describe(),
            found: rt.describe(),
        }
        .at(pos)),
    }
}

fn ternary_type(
    ctx: &ResolveCtx,
    cond: &Expr,
    then_branch: &Expr,
    else_branch: &Expr,
    pos: SourcePos,
) -> Result<TypeInfo> {
    let ct = type_of(ctx, cond)?;
    if ct.scalar_prim() != Some(Primitive::Bool) {
        return Err(ErrorKind::NonBooleanCondition(ct.describe()).at(cond.pos));
    }
    let tt = type_of(ctx, then_branch)?;
    let et = type_of(ctx, else_branch)?;
    if tt.base == et.base && tt.dims == et.dims {
        return Ok(tt);
    }
    // An unsuffixed literal branch adopts the other branch's type.
    if let (Some(v), Some(p)) = (
        untyped_int_literal(then_branch),
        et.scalar_prim().filter(|p| p.is_integer()),
    ) {
        if fits(v, p) {
            return Ok(et);
        }
    }
    if let (Some(v), Some(p)) = (
        untyped_int_literal(else_branch),
        tt.scalar_prim().filter(|p| p.is_integer()),
    ) {
        if fits(v, p) {
            return Ok(tt);
        }
    }
    Err(ErrorKind::TypeMismatch {
        expected: tt.describe(),
        found: et.describe(),
    }
    .at(pos))
}

/// Can `value` (typed `vt`) initialize or be assigned to a slot of type
/// `target`? Exact type match, literal adoption, and `f32`-to-`f64`
/// widening; everything else is explicit-cast territory and errors.
pub fn check_assignable(
    target: &TypeInfo,
    vt: &TypeInfo,
    value: &Expr,
    pos: SourcePos,
) -> Result<()> {
    if target.base == vt.base && target.dims == vt.dims {
        return Ok(());
    }
    if target.is_string() && vt.is_string() {
        return Ok(());
    }
    let tp = target.scalar_prim();
    let vp = vt.scalar_prim();
    if let (Some(t), Some(v)) = (tp, vp) {
        if t.is_integer() && v.is_integer() {
            if let Some(lit) = untyped_int_literal(value) {
                if fits(lit, t) {
                    return Ok(());
                }
            }
        }
        if t.is_float() && (untyped_float_literal(value) || v == t) {
            return Ok(());
        }
        if t == Primitive::F64 && v == Primitive::F32 {
            return Ok(());
        }
        if t.is_float() && untyped_int_literal(value).is_some() {
            return Ok(());
        }
    }
    Err(ErrorKind::TypeMismatch {
        expected: target.describe(),
        found: vt.describe(),
    }
    .at(pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Radix;
    use crate::errors::SourcePos;
    use rstest::rstest;

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

    fn ctx(reg: &SymbolRegistry) -> ResolveCtx<'_> {
        ResolveCtx {
            registry: reg,
            scope: None,
            function: None,
            locals: &[],
        }
    }

    #[rstest]
    #[case(0, Primitive::U8)]
    #[case(255, Primitive::U8)]
    #[case(256, Primitive::U16)]
    #[case(70000, Primitive::U32)]
    #[case(5_000_000_000, Primitive::U64)]
    #[case(-1, Primitive::I8)]
    #[case(-129, Primitive::I16)]
    #[case(-40000, Primitive::I32)]
    fn literal_narrowing(#[case] v: i128, #[case] p: Primitive) {
        assert_eq!(narrowest_int(v), p);
    }

    #[test]
    fn literal_adopts_variable_type() {
        let p =
            common_int_type(
                Primitive::U32,
                Primitive::U16,
                &int(1),
                &int(2),
                SourcePos::UNKNOWN,
            )
            .unwrap();
        assert_eq!(p, Primitive::U32);
    }

    #[test]
    fn mixed_signedness_is_rejected_without_literal() {
        let reg = SymbolRegistry::default();
        let c = ctx(&reg);
        // -1 fits i8; (-1) + u8 literal 5 adopts... the mix that must fail
        // is two typed operands of opposite signedness.
        let l = Expr {
            kind: ExprKind::Int {
                value: 1,
                radix: Radix::Dec,
                suffix: Some(Primitive::U8),
            },
            pos: SourcePos::UNKNOWN,
        };
        let r = Expr {
            kind: ExprKind::Int {
                value: 1,
                radix: Radix::Dec,
                suffix: Some(Primitive::I8),
            },
            pos: SourcePos::UNKNOWN,
        };
        let e = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(l),
                rhs: Box::new(r),
            },
            pos: SourcePos::UNKNOWN,
        };
        let err = type_of(&c, &e).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn logical_operands_must_be_bool() {
        let reg = SymbolRegistry::default();
        let c = ctx(&reg);
        let e = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::And,
                lhs: Box::new(int(1)),
                rhs: Box::new(int(0)),
            },
            pos: SourcePos::UNKNOWN,
        };
        let err = type_of(&c, &e).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NonBooleanCondition(_)));
    }

    #[test]
    fn comparison_yields_bool() {
        let reg = SymbolRegistry::default();
        let c = ctx(&reg);
        let e = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Lt,
                lhs: Box::new(int(1)),
                rhs: Box::new(int(2)),
            },
            pos: SourcePos::UNKNOWN,
        };
        let t = type_of(&c, &e).unwrap();
        assert_eq!(t.scalar_prim(), Some(Primitive::Bool));
    }
}
