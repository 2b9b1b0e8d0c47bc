//! Expression generation.
//!
//! Each entry returns the C text for one node and records whatever effects
//! the chosen idiom demands. The postfix chain walk threads a state value
//! (current code, current type, pointer-ness, root identifier) across the
//! operations; every row of the `.member` / `[index]` / `[lo, hi]` /
//! `(args)` decision tables lives here.

use crate::ast::{
    BinaryOp, Expr, ExprKind, PostfixKind, PostfixOp, Radix, UnaryOp,
};
use crate::codegen::effects::{Effect, Header, HelperOp};
use crate::codegen::Generator;
use crate::errors::{ErrorKind, Result, SourcePos};
use crate::sema::consts::ConstValue;
use crate::sema::registry::{FunctionSig, NamedKind, ScopeItem};
use crate::sema::resolve::{self, untyped_int_literal};
use crate::sema::validate;
use crate::ty::{BaseType, Primitive, TypeInfo};
use crate::{OutputMode, OverflowPolicy};

/// Context threaded through expression generation: the type the consumer
/// expects (drives literal suffixing and narrowing) and the overflow policy
/// of the governing assignment target.
#[derive(Clone)]
pub(crate) struct ExprCtx {
    pub expected: Option<TypeInfo>,
    pub policy: OverflowPolicy,
}

impl ExprCtx {
    pub fn plain(policy: OverflowPolicy) -> Self {
        Self {
            expected: None,
            policy,
        }
    }

    pub fn expecting(ty: TypeInfo, policy: OverflowPolicy) -> Self {
        Self {
            expected: Some(ty),
            policy,
        }
    }
}

/// Value state while walking a postfix chain.
pub(crate) struct ValState {
    pub code: String,
    pub ty: TypeInfo,
    /// Current code is a pointer-to-struct (a promoted parameter); the next
    /// field access uses `->`.
    pub is_ptr: bool,
    /// Identifier at the root of the chain, when the chain is that simple.
    pub root: Option<String>,
    /// The root is `main`'s argument vector.
    pub is_args: bool,
}

impl ValState {
    fn plain(code: String, ty: TypeInfo) -> Self {
        Self {
            code,
            ty,
            is_ptr: false,
            root: None,
            is_args: false,
        }
    }
}

/// What the head of a postfix chain denotes, generation flavour.
pub(crate) enum GBase {
    Val(ValState),
    ScopeNs(String),
    GlobalNs,
    EnumNs(String),
    RegisterNs(String),
    Func { sig: FunctionSig, cname: String },
    External(String),
}

impl Generator<'_> {
    pub(crate) fn expr(&mut self, e: &Expr, ctx: &ExprCtx) -> Result<String> {
        match &e.kind {
            ExprKind::Int {
                value,
                radix,
                suffix,
            } => Ok(self.int_literal(*value, *radix, *suffix, ctx)),
            ExprKind::Float { text, suffix } => {
                Ok(self.float_literal(text, *suffix, ctx))
            }
            ExprKind::Bool(b) => {
                if self.cfg.mode == OutputMode::C {
                    self.effects.record(Effect::Include(Header::StdBool));
                }
                Ok(if *b { "true" } else { "false" }.to_owned())
            }
            ExprKind::Str(s) => Ok(c_quote(s)),
            ExprKind::Paren(inner) => {
                let code = self.expr(inner, ctx)?;
                Ok(format!("({code})"))
            }
            ExprKind::Ident(_) | ExprKind::This | ExprKind::Global => {
                self.gen_postfix(e, &[], e.pos, ctx)
            }
            ExprKind::Postfix { base, ops } => {
                self.gen_postfix(base, ops, e.pos, ctx)
            }
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand, ctx),
            ExprKind::Binary { op, lhs, rhs } => {
                let result = self.type_of(e)?;
                self.gen_binary(*op, lhs, rhs, result, ctx)
            }
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                validate::ternary(cond, then_branch, else_branch)?;
                let result = self.type_of(e)?;
                let cond_code = self.expr(cond, &ExprCtx::plain(ctx.policy))?;
                let then_code = self.expr(
                    then_branch,
                    &ExprCtx::expecting(result.clone(), ctx.policy),
                )?;
                let else_code = self.expr(
                    else_branch,
                    &ExprCtx::expecting(result, ctx.policy),
                )?;
                Ok(format!("({cond_code}) ? {then_code} : {else_code}"))
            }
        }
    }

    // --- literals --------------------------------------------------------

    fn int_literal(
        &mut self,
        value: i128,
        radix: Radix,
        suffix: Option<Primitive>,
        ctx: &ExprCtx,
    ) -> String {
        let target = suffix.or_else(|| {
            ctx.expected
                .as_ref()
                .and_then(TypeInfo::scalar_prim)
                .filter(|p| p.is_integer())
        });
        let digits = match radix {
            Radix::Dec => value.to_string(),
            // C has no binary literals; both render as hex.
            Radix::Hex | Radix::Bin => {
                if value < 0 {
                    value.to_string()
                } else {
                    format!("0x{value:X}")
                }
            }
        };
        match target {
            Some(p) => format!("{digits}{}", p.literal_suffix()),
            None => digits,
        }
    }

    fn float_literal(
        &mut self,
        text: &str,
        suffix: Option<Primitive>,
        ctx: &ExprCtx,
    ) -> String {
        let target = suffix.or_else(|| {
            ctx.expected
                .as_ref()
                .and_then(TypeInfo::scalar_prim)
                .filter(|p| p.is_float())
        });
        if target == Some(Primitive::F32) {
            format!("{text}f")
        } else {
            text.to_owned()
        }
    }

    fn const_literal(&mut self, value: &ConstValue, ty: &TypeInfo) -> String {
        match value {
            ConstValue::Int(v) => {
                let ctx = ExprCtx::expecting(ty.clone(), self.cfg.overflow);
                self.int_literal(*v, Radix::Dec, None, &ctx)
            }
            ConstValue::Float(text) => {
                if ty.scalar_prim() == Some(Primitive::F32) {
                    format!("{text}f")
                } else {
                    text.clone()
                }
            }
            ConstValue::Bool(b) => {
                if self.cfg.mode == OutputMode::C {
                    self.effects.record(Effect::Include(Header::StdBool));
                }
                if *b { "true" } else { "false" }.to_owned()
            }
            ConstValue::Str(s) => c_quote(s),
        }
    }

    // --- postfix chains --------------------------------------------------

    pub(crate) fn gen_postfix(
        &mut self,
        base: &Expr,
        ops: &[PostfixOp],
        pos: SourcePos,
        ctx: &ExprCtx,
    ) -> Result<String> {
        let mut state = self.classify_gen(base, ctx)?;
        for op in ops {
            state = self.gen_step(state, op, ctx)?;
        }
        match state {
            GBase::Val(v) => Ok(v.code),
            GBase::Func { sig, .. } => Err(ErrorKind::WrongKind {
                name: sig.name,
                expected: "value",
                actual: "function",
            }
            .at(pos)),
            GBase::External(name) => {
                Err(ErrorKind::UnknownSymbol(name).at(pos))
            }
            GBase::ScopeNs(name)
            | GBase::EnumNs(name)
            | GBase::RegisterNs(name) => Err(ErrorKind::WrongKind {
                name,
                expected: "value",
                actual: "namespace",
            }
            .at(pos)),
            GBase::GlobalNs => Err(ErrorKind::WrongKind {
                name: "global".to_owned(),
                expected: "value",
                actual: "namespace",
            }
            .at(pos)),
        }
    }

    pub(crate) fn classify_gen(
        &mut self,
        e: &Expr,
        ctx: &ExprCtx,
    ) -> Result<GBase> {
        let inner = e.unwrap_parens();
        match &inner.kind {
            ExprKind::This => match self.scope.clone() {
                Some(s) => Ok(GBase::ScopeNs(s)),
                None => Err(ErrorKind::WrongKind {
                    name: "this".to_owned(),
                    expected: "scope context",
                    actual: "file level",
                }
                .at(inner.pos)),
            },
            ExprKind::Global => Ok(GBase::GlobalNs),
            ExprKind::Ident(name) => self.classify_ident(name, inner.pos),
            _ => {
                let ty = self.type_of(inner)?;
                let code = self.expr(inner, &ExprCtx::plain(ctx.policy))?;
                Ok(GBase::Val(ValState::plain(code, ty)))
            }
        }
    }

    fn classify_ident(&mut self, name: &str, pos: SourcePos) -> Result<GBase> {
        let is_main = self
            .func
            .as_ref()
            .map(|f| f.sig.is_main)
            .unwrap_or(false);
        if let Some(p) = self.rctx().param(name) {
            let ty = p.ty.clone();
            if is_main {
                // `main`'s argument vector lowers onto argv.
                return Ok(GBase::Val(ValState {
                    code: "argv".to_owned(),
                    ty,
                    is_ptr: false,
                    root: Some(name.to_owned()),
                    is_args: true,
                }));
            }
            let (code, is_ptr) = if p.force_pointer {
                if ty.is_struct() {
                    (name.to_owned(), true)
                } else if ty.is_array() || ty.is_string() {
                    (name.to_owned(), false)
                } else {
                    (format!("(*{name})"), false)
                }
            } else {
                (name.to_owned(), false)
            };
            return Ok(GBase::Val(ValState {
                code,
                ty,
                is_ptr,
                root: Some(name.to_owned()),
                is_args: false,
            }));
        }
        if let Some(t) = self.rctx().local(name) {
            return Ok(GBase::Val(ValState {
                code: name.to_owned(),
                ty: t.clone(),
                is_ptr: false,
                root: Some(name.to_owned()),
                is_args: false,
            }));
        }
        if let Some(g) = self.registry.global(name) {
            return Ok(GBase::Val(ValState {
                code: name.to_owned(),
                ty: g.ty.clone(),
                is_ptr: false,
                root: Some(name.to_owned()),
                is_args: false,
            }));
        }
        if let Some(f) = self.registry.function(name) {
            return Ok(GBase::Func {
                sig: f.clone(),
                cname: name.to_owned(),
            });
        }
        match self.registry.kind_of(name) {
            Some(NamedKind::Scope) => {
                if self.scope.as_deref() == Some(name) {
                    Err(ErrorKind::OwnScopeByName(name.to_owned())
                        .at(pos)
                        .with_remediation(
                            "use `this` instead of the scope name",
                        ))
                } else {
                    Ok(GBase::ScopeNs(name.to_owned()))
                }
            }
            Some(NamedKind::Enum) => Ok(GBase::EnumNs(name.to_owned())),
            Some(NamedKind::Register) => {
                Ok(GBase::RegisterNs(name.to_owned()))
            }
            Some(kind) => Err(ErrorKind::WrongKind {
                name: name.to_owned(),
                expected: "value",
                actual: kind.describe(),
            }
            .at(pos)),
            None => Ok(GBase::External(name.to_owned())),
        }
    }

    pub(crate) fn gen_step(
        &mut self,
        state: GBase,
        op: &PostfixOp,
        ctx: &ExprCtx,
    ) -> Result<GBase> {
        match &op.kind {
            PostfixKind::Member(m) => self.gen_member(state, m, op.pos),
            PostfixKind::Index(idx) => self.gen_index(state, idx, op.pos, ctx),
            PostfixKind::BitRange(lo, hi) => {
                self.gen_bit_range(state, lo, hi, op.pos, ctx)
            }
            PostfixKind::Call(args) => self.gen_call(state, args, op.pos, ctx),
        }
    }

    fn gen_member(
        &mut self,
        state: GBase,
        member: &str,
        pos: SourcePos,
    ) -> Result<GBase> {
        match state {
            GBase::GlobalNs => {
                if self.rctx().param(member).is_some()
                    || self.rctx().local(member).is_some()
                {
                    return Err(ErrorKind::AmbiguousReference(
                        member.to_owned(),
                    )
                    .at(pos)
                    .with_remediation(
                        "a local shadows this file-level name; rename one",
                    ));
                }
                if let Some(g) = self.registry.global(member) {
                    Ok(GBase::Val(ValState::plain(
                        member.to_owned(),
                        g.ty.clone(),
                    )))
                } else if let Some(f) = self.registry.function(member) {
                    Ok(GBase::Func {
                        sig: f.clone(),
                        cname: member.to_owned(),
                    })
                } else {
                    Err(ErrorKind::UnknownSymbol(member.to_owned()).at(pos))
                }
            }
            GBase::ScopeNs(scope) => {
                let item = self
                    .registry
                    .scope_member(&scope, member, self.scope.as_deref())
                    .map_err(|k| k.at(pos))?;
                match item {
                    ScopeItem::Func(f) => {
                        let sig = f.clone();
                        Ok(GBase::Func {
                            cname: self.c_symbol(Some(&scope), member),
                            sig,
                        })
                    }
                    ScopeItem::Var(v) => {
                        let ty = v.ty.clone();
                        let qualified = v.qualified();
                        // Const members with a known value fold in place.
                        if let Some(value) =
                            self.registry.const_value(&qualified).cloned()
                        {
                            let code = self.const_literal(&value, &ty);
                            return Ok(GBase::Val(ValState::plain(code, ty)));
                        }
                        Ok(GBase::Val(ValState::plain(
                            self.c_symbol(Some(&scope), member),
                            ty,
                        )))
                    }
                }
            }
            GBase::EnumNs(name) => {
                let info = self.registry.enum_info(&name).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(name.clone()).at(pos)
                })?;
                if info.member(member).is_none() {
                    return Err(ErrorKind::UnknownSymbol(format!(
                        "{name}.{member}"
                    ))
                    .at(pos));
                }
                let code = self.c_symbol(Some(&name), member);
                Ok(GBase::Val(ValState::plain(
                    code,
                    TypeInfo {
                        base: BaseType::Enum(name),
                        dims: Vec::new(),
                        is_const: true,
                    },
                )))
            }
            GBase::RegisterNs(name) => {
                let info = self.registry.register(&name).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(name.clone()).at(pos)
                })?;
                let m = info.member(member).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(format!("{name}.{member}"))
                        .at(pos)
                })?;
                validate::register_read(member, m.access, pos)?;
                self.effects.record(Effect::Include(Header::StdInt));
                Ok(GBase::Val(ValState::plain(
                    format!("{name}_{member}"),
                    m.ty.clone(),
                )))
            }
            GBase::Val(v) => self.gen_value_member(v, member, pos),
            GBase::Func { sig, .. } => Err(ErrorKind::WrongKind {
                name: sig.name,
                expected: "value",
                actual: "function",
            }
            .at(pos)),
            GBase::External(name) => {
                Err(ErrorKind::UnknownSymbol(name).at(pos))
            }
        }
    }

    fn gen_value_member(
        &mut self,
        v: ValState,
        member: &str,
        pos: SourcePos,
    ) -> Result<GBase> {
        match member {
            "length" => return self.gen_length(v, pos),
            "capacity" | "size" => {
                let BaseType::Str { capacity } = &v.ty.base else {
                    return Err(ErrorKind::WrongKind {
                        name: member.to_owned(),
                        expected: "string",
                        actual: "other type",
                    }
                    .at(pos));
                };
                let cap = capacity.ok_or_else(|| {
                    ErrorKind::WrongKind {
                        name: member.to_owned(),
                        expected: "string with a declared capacity",
                        actual: "unsized string",
                    }
                    .at(pos)
                })?;
                let n = if member == "size" { cap + 1 } else { cap };
                return Ok(GBase::Val(ValState::plain(
                    format!("{n}U"),
                    TypeInfo::prim(Primitive::U32),
                )));
            }
            _ => {}
        }
        if v.ty.is_array() {
            return Err(ErrorKind::WrongKind {
                name: member.to_owned(),
                expected: "scalar value",
                actual: "array",
            }
            .at(pos));
        }
        match &v.ty.base {
            BaseType::Struct(name) => {
                let info = self.registry.struct_info(name).ok_or_else(
                    || ErrorKind::UnknownSymbol(name.clone()).at(pos),
                )?;
                let field = info.field(member).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(format!("{name}.{member}"))
                        .at(pos)
                })?;
                let sep = if v.is_ptr { "->" } else { "." };
                Ok(GBase::Val(ValState {
                    code: format!("{}{sep}{member}", v.code),
                    ty: field.ty.clone(),
                    is_ptr: false,
                    root: v.root,
                    is_args: false,
                }))
            }
            BaseType::Bitmap { name, bits } => {
                let info = self.registry.bitmap(name).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(name.clone()).at(pos)
                })?;
                let field = info.field(member).ok_or_else(|| {
                    ErrorKind::UnknownBitmapField {
                        bitmap: name.clone(),
                        field: member.to_owned(),
                    }
                    .at(pos)
                })?;
                let backing = bits.backing();
                let code = bit_field_read(
                    &v.code,
                    field.offset,
                    field.width,
                    backing,
                );
                let ty = if field.width == 1 {
                    if self.cfg.mode == OutputMode::C {
                        self.effects.record(Effect::Include(Header::StdBool));
                    }
                    TypeInfo::prim(Primitive::Bool)
                } else {
                    TypeInfo::prim(backing)
                };
                Ok(GBase::Val(ValState::plain(code, ty)))
            }
            _ => Err(ErrorKind::WrongKind {
                name: member.to_owned(),
                expected: "struct or bitmap value",
                actual: "other type",
            }
            .at(pos)),
        }
    }

    fn gen_length(&mut self, v: ValState, pos: SourcePos) -> Result<GBase> {
        let u32_ty = TypeInfo::prim(Primitive::U32);
        if v.is_args {
            return Ok(GBase::Val(ValState::plain(
                "(uint32_t)argc".to_owned(),
                u32_ty,
            )));
        }
        if v.ty.is_array() {
            return Ok(GBase::Val(ValState::plain(
                format!("{}U", v.ty.dims[0]),
                u32_ty,
            )));
        }
        if v.ty.is_string() {
            self.effects.record(Effect::Include(Header::String));
            // Repeat lookups of a stable parameter's length reuse one
            // hoisted strlen.
            if let Some(root) = &v.root {
                if v.code == *root {
                    let stable = self
                        .rctx()
                        .param(root)
                        .map(|p| !p.mutates)
                        .unwrap_or(false);
                    if stable {
                        let temp = self.memoized_len(root);
                        return Ok(GBase::Val(ValState::plain(temp, u32_ty)));
                    }
                }
            }
            return Ok(GBase::Val(ValState::plain(
                format!("(uint32_t)strlen({})", v.code),
                u32_ty,
            )));
        }
        // Declared width, not the backing width, for bitmaps.
        if let BaseType::Bitmap { bits, .. } = &v.ty.base {
            return Ok(GBase::Val(ValState::plain(
                format!("{}U", bits.bits()),
                u32_ty,
            )));
        }
        match v.ty.scalar_prim() {
            Some(p) if p.is_integer() => Ok(GBase::Val(ValState::plain(
                format!("{}U", p.bits()),
                u32_ty,
            ))),
            _ => Err(ErrorKind::WrongKind {
                name: "length".to_owned(),
                expected: "string, array or integer",
                actual: "other type",
            }
            .at(pos)),
        }
    }

    fn memoized_len(&mut self, ident: &str) -> String {
        let func = self.func.as_mut().expect("length cache without function");
        if let Some((_, temp)) =
            func.len_cache.iter().find(|(n, _)| n == ident)
        {
            return temp.clone();
        }
        let temp = format!("cnx_len_{ident}");
        func.entry_temps.push(format!(
            "const uint32_t {temp} = (uint32_t)strlen({ident});"
        ));
        func.len_cache.push((ident.to_owned(), temp.clone()));
        temp
    }

    fn gen_index(
        &mut self,
        state: GBase,
        idx: &Expr,
        pos: SourcePos,
        ctx: &ExprCtx,
    ) -> Result<GBase> {
        let GBase::Val(v) = state else {
            return Err(ErrorKind::WrongKind {
                name: "[]".to_owned(),
                expected: "value",
                actual: "namespace",
            }
            .at(pos));
        };
        let idx_ty = self.type_of(idx)?;
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
        if v.ty.is_array() {
            validate::array_index(self.registry, v.ty.dims[0], idx)?;
            let idx_code = self.expr(idx, &ExprCtx::plain(ctx.policy))?;
            return Ok(GBase::Val(ValState {
                code: format!("{}[{idx_code}]", v.code),
                ty: v.ty.element(),
                is_ptr: false,
                root: v.root,
                is_args: v.is_args,
            }));
        }
        if v.ty.is_string() {
            let idx_code = self.expr(idx, &ExprCtx::plain(ctx.policy))?;
            return Ok(GBase::Val(ValState::plain(
                format!("{}[{idx_code}]", v.code),
                TypeInfo::prim(Primitive::U8),
            )));
        }
        match &v.ty.base {
            BaseType::Prim(p) if p.is_integer() => {
                validate::bit_index(self.registry, p.bits(), idx)?;
                let idx_code = self.expr(
                    idx,
                    &ExprCtx::expecting(
                        TypeInfo::prim(Primitive::U32),
                        ctx.policy,
                    ),
                )?;
                if self.cfg.mode == OutputMode::C {
                    self.effects.record(Effect::Include(Header::StdBool));
                }
                Ok(GBase::Val(ValState::plain(
                    format!("(({} >> {idx_code}) & 0x1U)", v.code),
                    TypeInfo::prim(Primitive::Bool),
                )))
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

    fn gen_bit_range(
        &mut self,
        state: GBase,
        lo: &Expr,
        hi: &Expr,
        pos: SourcePos,
        ctx: &ExprCtx,
    ) -> Result<GBase> {
        let GBase::Val(mut v) = state else {
            return Err(ErrorKind::WrongKind {
                name: "[lo, hi]".to_owned(),
                expected: "value",
                actual: "namespace",
            }
            .at(pos));
        };
        // Floats read through a memcpy'd shadow integer first.
        if let Some(p) = v.ty.scalar_prim().filter(|p| p.is_float()) {
            v = self.float_shadow(v, p, pos)?;
        }
        let Some(p) = v.ty.scalar_prim().filter(|p| p.is_integer()) else {
            return Err(ErrorKind::WrongKind {
                name: "[lo, hi]".to_owned(),
                expected: "integer or float scalar",
                actual: "other type",
            }
            .at(pos));
        };
        validate::bit_index(self.registry, p.bits(), lo)?;
        validate::bit_index(self.registry, p.bits(), hi)?;

        let operand = if p.is_signed() {
            let unsigned = resolve_unsigned(p);
            format!("(({})({}))", unsigned.c_name(), v.code)
        } else {
            v.code.clone()
        };
        let result = TypeInfo::prim(resolve_unsigned(p));

        let lo_lit = crate::sema::consts::fold_int(self.registry, lo);
        let hi_lit = crate::sema::consts::fold_int(self.registry, hi);
        let code = match (lo_lit, hi_lit) {
            (Some(l), Some(h)) => {
                if h < l {
                    return Err(ErrorKind::BitIndexOutOfBounds {
                        index: h,
                        width: p.bits(),
                    }
                    .at(pos));
                }
                let width = (h - l + 1) as u32;
                let mask = mask_literal(width, p.bits() == 64);
                if l == 0 {
                    format!("({operand} & {mask})")
                } else {
                    format!("(({operand} >> {l}U) & {mask})")
                }
            }
            _ => {
                // Runtime bounds: mask width computed via the macro.
                self.effects.record(Effect::MaskMacro);
                let u32_ty = TypeInfo::prim(Primitive::U32);
                let lo_code = self.expr(
                    lo,
                    &ExprCtx::expecting(u32_ty.clone(), ctx.policy),
                )?;
                let hi_code =
                    self.expr(hi, &ExprCtx::expecting(u32_ty, ctx.policy))?;
                format!(
                    "(({operand} >> ({lo_code})) & \
                     CNX_MASK((({hi_code}) - ({lo_code})) + 1U))"
                )
            }
        };
        Ok(GBase::Val(ValState::plain(code, result)))
    }

    /// Declare (once per function) and refresh (once per statement) the
    /// shadow integer a float is bit-read through.
    fn float_shadow(
        &mut self,
        v: ValState,
        p: Primitive,
        pos: SourcePos,
    ) -> Result<ValState> {
        if self.func.is_none() {
            return Err(ErrorKind::UnsupportedFloatBitOp.at(pos));
        }
        let Some(root) = v.root.clone().filter(|r| &v.code == r) else {
            return Err(ErrorKind::WrongKind {
                name: "[lo, hi]".to_owned(),
                expected: "a named float variable",
                actual: "compound expression",
            }
            .at(pos));
        };
        let bits64 = p == Primitive::F64;
        let shadow_prim = if bits64 {
            Primitive::U64
        } else {
            Primitive::U32
        };
        self.effects.record(Effect::Include(Header::String));
        self.effects.record(Effect::Include(Header::StdInt));
        self.effects.record(Effect::FloatAssert { bits64 });

        let alias = format!("cnx_bits_{root}");
        let func = self.func.as_mut().expect("checked above");
        if !func.float_aliases.iter().any(|(n, _)| n == &root) {
            func.entry_temps
                .push(format!("{} {alias};", shadow_prim.c_name()));
            func.float_aliases.push((root.clone(), alias.clone()));
        }
        if !func.refreshed_aliases.contains(&root) {
            func.pending.push(format!(
                "(void)memcpy(&{alias}, &{root}, sizeof({root}));"
            ));
            func.refreshed_aliases.push(root);
        }
        Ok(ValState::plain(alias, TypeInfo::prim(shadow_prim)))
    }

    // --- calls -----------------------------------------------------------

    fn gen_call(
        &mut self,
        state: GBase,
        args: &[Expr],
        pos: SourcePos,
        ctx: &ExprCtx,
    ) -> Result<GBase> {
        match state {
            GBase::Func { sig, cname } => {
                if args.len() != sig.params.len() {
                    return Err(ErrorKind::ArgumentCount {
                        name: sig.name.clone(),
                        expected: sig.params.len(),
                        found: args.len(),
                    }
                    .at(pos));
                }
                let rendered = self.call_args(&sig, args, ctx)?;
                let ty = sig.ret.clone().unwrap_or_else(TypeInfo::void);
                Ok(GBase::Val(ValState::plain(
                    format!("{cname}({rendered})"),
                    ty,
                )))
            }
            GBase::Val(v) => match v.ty.base.clone() {
                BaseType::Callback(name) => {
                    let cb = self
                        .registry
                        .callback(&name)
                        .ok_or_else(|| {
                            ErrorKind::UnknownSymbol(name.clone()).at(pos)
                        })?
                        .clone();
                    if args.len() != cb.params.len() {
                        return Err(ErrorKind::ArgumentCount {
                            name,
                            expected: cb.params.len(),
                            found: args.len(),
                        }
                        .at(pos));
                    }
                    let mut rendered = Vec::new();
                    for (arg, pty) in args.iter().zip(cb.params.iter()) {
                        let at = self.type_of(arg)?;
                        resolve::check_assignable(pty, &at, arg, arg.pos)?;
                        rendered.push(self.expr(
                            arg,
                            &ExprCtx::expecting(pty.clone(), ctx.policy),
                        )?);
                    }
                    let ty = cb.ret.clone().unwrap_or_else(TypeInfo::void);
                    Ok(GBase::Val(ValState::plain(
                        format!("{}({})", v.code, rendered.join(", ")),
                        ty,
                    )))
                }
                _ => Err(ErrorKind::NotCallable(v.ty.describe()).at(pos)),
            },
            GBase::External(name) => {
                if name == "safe_div" || name == "safe_mod" {
                    return self.gen_safe_div_mod(&name, args, pos, ctx);
                }
                // External C: arguments travel by value, as written.
                let mut rendered = Vec::new();
                for arg in args {
                    rendered.push(
                        self.expr(arg, &ExprCtx::plain(ctx.policy))?,
                    );
                }
                Ok(GBase::Val(ValState::plain(
                    format!("{name}({})", rendered.join(", ")),
                    TypeInfo::void(),
                )))
            }
            GBase::ScopeNs(name)
            | GBase::EnumNs(name)
            | GBase::RegisterNs(name) => {
                Err(ErrorKind::NotCallable(name).at(pos))
            }
            GBase::GlobalNs => {
                Err(ErrorKind::NotCallable("global".to_owned()).at(pos))
            }
        }
    }

    /// `safe_div(out, a, b, default)` / `safe_mod(..)` lower to the typed
    /// helper, which writes `default` into `out` when the divisor is zero.
    fn gen_safe_div_mod(
        &mut self,
        name: &str,
        args: &[Expr],
        pos: SourcePos,
        ctx: &ExprCtx,
    ) -> Result<GBase> {
        if args.len() != 4 {
            return Err(ErrorKind::ArgumentCount {
                name: name.to_owned(),
                expected: 4,
                found: args.len(),
            }
            .at(pos));
        }
        let out_ty = self.type_of(&args[0])?;
        let prim = out_ty
            .scalar_prim()
            .filter(|p| p.is_integer())
            .ok_or_else(|| {
                ErrorKind::TypeMismatch {
                    expected: "integer output".to_owned(),
                    found: out_ty.describe(),
                }
                .at(args[0].pos)
            })?;
        for arg in &args[1..] {
            let at = self.type_of(arg)?;
            resolve::check_assignable(&out_ty, &at, arg, arg.pos)?;
        }
        if out_ty.is_const {
            if let Some(root) = crate::sema::registry::root_ident(&args[0]) {
                return Err(
                    ErrorKind::ConstAssigned(root.to_owned()).at(args[0].pos)
                );
            }
        }

        let op = if name == "safe_div" {
            HelperOp::SafeDiv
        } else {
            HelperOp::SafeMod
        };
        self.effects.record(Effect::Helper { op, prim });
        self.effects.record(Effect::Include(Header::StdInt));

        let out_code = self.pointer_arg(&args[0], &out_ty, ctx)?;
        let expect = ExprCtx::expecting(TypeInfo::prim(prim), ctx.policy);
        let a = self.expr(&args[1], &expect)?;
        let b = self.expr(&args[2], &expect)?;
        let dflt = self.expr(&args[3], &expect)?;
        Ok(GBase::Val(ValState::plain(
            format!(
                "cnx_{}_{}({out_code}, {a}, {b}, {dflt})",
                op.fragment(),
                prim.name()
            ),
            TypeInfo::void(),
        )))
    }

    /// Render an argument for a pointer parameter: forward an existing
    /// pointer, let arrays decay, take the address of lvalues, and spill
    /// rvalues into a temp.
    fn pointer_arg(
        &mut self,
        arg: &Expr,
        param_ty: &TypeInfo,
        ctx: &ExprCtx,
    ) -> Result<String> {
        let inner = arg.unwrap_parens();
        if let ExprKind::Ident(name) = &inner.kind {
            if let Some(p) = self.rctx().param(name) {
                if p.force_pointer {
                    // Already a pointer in this function's frame.
                    return Ok(name.clone());
                }
            }
        }
        let at = self.type_of(inner)?;
        if at.is_array() || at.is_string() {
            // Array-to-pointer decay.
            return self.expr(inner, &ExprCtx::plain(ctx.policy));
        }
        if is_lvalue(inner) {
            let code = self.expr(inner, &ExprCtx::plain(ctx.policy))?;
            return Ok(format!("&{code}"));
        }
        // Rvalue: spill into a statement-scoped temp.
        let Some(func) = self.func.as_mut() else {
            return Err(ErrorKind::TypeMismatch {
                expected: "an addressable value".to_owned(),
                found: at.describe(),
            }
            .at(inner.pos));
        };
        let temp = format!("cnx_arg{}", func.temp_counter);
        func.temp_counter += 1;
        let code = self.expr(
            inner,
            &ExprCtx::expecting(param_ty.clone(), ctx.policy),
        )?;
        let cty = self.c_base(param_ty);
        let func = self.func.as_mut().expect("still inside a function");
        func.pending.push(format!("{cty} {temp} = {code};"));
        Ok(format!("&{temp}"))
    }

    fn call_args(
        &mut self,
        sig: &FunctionSig,
        args: &[Expr],
        ctx: &ExprCtx,
    ) -> Result<String> {
        let mut rendered = Vec::new();
        for (arg, param) in args.iter().zip(sig.params.iter()) {
            let at = self.type_of(arg)?;

            // Enum values may flow into integer parameters; C++ enum class
            // needs the cast spelled out.
            let enum_to_int = at.is_enum()
                && param
                    .ty
                    .scalar_prim()
                    .map(Primitive::is_integer)
                    .unwrap_or(false);
            if !enum_to_int {
                resolve::check_assignable(&param.ty, &at, arg, arg.pos)?;
            }

            if param.force_pointer {
                if at.is_const && !param.is_const && param.mutates {
                    let name =
                        crate::sema::registry::root_ident(arg)
                            .unwrap_or("argument")
                            .to_owned();
                    return Err(ErrorKind::ConstToNonConst {
                        arg: name,
                        param: param.name.clone(),
                    }
                    .at(arg.pos));
                }
                rendered.push(self.pointer_arg(arg, &param.ty, ctx)?);
            } else {
                let code = self.expr(
                    arg,
                    &ExprCtx::expecting(param.ty.clone(), ctx.policy),
                )?;
                if enum_to_int && self.cfg.mode == OutputMode::Cpp {
                    let cty = self.c_base(&param.ty);
                    rendered.push(format!("static_cast<{cty}>({code})"));
                } else {
                    rendered.push(code);
                }
            }
        }
        Ok(rendered.join(", "))
    }

    // --- unary and binary ------------------------------------------------

    fn gen_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        ctx: &ExprCtx,
    ) -> Result<String> {
        let t = self.type_of(operand)?;
        match op {
            UnaryOp::Neg => {
                let code = self.wrap_operand(operand, ctx)?;
                Ok(format!("-{code}"))
            }
            UnaryOp::Not => {
                if t.scalar_prim() != Some(Primitive::Bool) {
                    return Err(ErrorKind::NonBooleanCondition(t.describe())
                        .at(operand.pos));
                }
                let code = self.wrap_operand(operand, ctx)?;
                Ok(format!("!{code}"))
            }
            UnaryOp::BitNot => {
                let ok = matches!(
                    &t.base,
                    BaseType::Prim(p) if p.is_unsigned()
                ) || t.is_bitmap();
                if !ok || t.is_array() {
                    return Err(ErrorKind::TypeMismatch {
                        expected: "unsigned integer".to_owned(),
                        found: t.describe(),
                    }
                    .at(operand.pos));
                }
                let code = self.wrap_operand(operand, ctx)?;
                // `~` promotes to int; cast back to the operand type.
                let cty = self.c_base(&t);
                Ok(format!("({cty})(~{code})"))
            }
        }
    }

    fn wrap_operand(&mut self, e: &Expr, ctx: &ExprCtx) -> Result<String> {
        let code = self.expr(e, ctx)?;
        match &e.kind {
            ExprKind::Binary { .. } | ExprKind::Ternary { .. } => {
                Ok(format!("({code})"))
            }
            _ => Ok(code),
        }
    }

    pub(crate) fn gen_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        result: TypeInfo,
        ctx: &ExprCtx,
    ) -> Result<String> {
        let lt = self.type_of(lhs)?;
        let rt = self.type_of(rhs)?;

        if op.is_logical() {
            let l = self.wrap_operand(lhs, &ExprCtx::plain(ctx.policy))?;
            let r = self.wrap_operand(rhs, &ExprCtx::plain(ctx.policy))?;
            return Ok(format!("{l} {} {r}", op.c_token()));
        }

        if op.is_comparison() {
            // A bare literal adopts the other operand's type for suffixing.
            let l_expected = if untyped_int_literal(lhs).is_some() {
                Some(rt.clone())
            } else {
                None
            };
            let r_expected = if untyped_int_literal(rhs).is_some() {
                Some(lt.clone())
            } else {
                None
            };
            let l = self.wrap_operand(
                lhs,
                &ExprCtx {
                    expected: l_expected,
                    policy: ctx.policy,
                },
            )?;
            let r = self.wrap_operand(
                rhs,
                &ExprCtx {
                    expected: r_expected,
                    policy: ctx.policy,
                },
            )?;
            return Ok(format!("{l} {} {r}", op.c_token()));
        }

        if op.is_shift() {
            validate::shift_amount(self.registry, &lt, rhs)?;
            let prim = result.scalar_prim().expect("shift result is integer");
            let l = self.wrap_operand(
                lhs,
                &ExprCtx::expecting(result.clone(), ctx.policy),
            )?;
            let amount = self.expr(
                rhs,
                &ExprCtx::expecting(
                    TypeInfo::prim(Primitive::U32),
                    ctx.policy,
                ),
            )?;
            let bare = format!("{l} {} {amount}", op.c_token());
            // Narrow operands promote to int; cast the result back.
            if prim.bits() < 32 {
                let cty = self.c_base(&result);
                return Ok(format!("({cty})({bare})"));
            }
            return Ok(bare);
        }

        let prim = result.scalar_prim();
        let expect = ExprCtx::expecting(result.clone(), ctx.policy);

        if op.is_bitwise() {
            let l = self.wrap_operand(lhs, &expect)?;
            let r = self.wrap_operand(rhs, &expect)?;
            let bare = format!("{l} {} {r}", op.c_token());
            let narrow = prim.map(|p| p.bits() < 32).unwrap_or(false);
            if narrow || result.is_bitmap() {
                let cty = self.c_base(&result);
                return Ok(format!("({cty})({bare})"));
            }
            return Ok(bare);
        }

        // Arithmetic.
        if matches!(op, BinaryOp::Div | BinaryOp::Mod) {
            validate::division(self.registry, rhs)?;
        }
        let Some(p) = prim else {
            // Resolver already rejected non-numeric operands.
            let l = self.wrap_operand(lhs, &expect)?;
            let r = self.wrap_operand(rhs, &expect)?;
            return Ok(format!("{l} {} {r}", op.c_token()));
        };

        if p.is_float() {
            let l = self.wrap_operand(lhs, &expect)?;
            let r = self.wrap_operand(rhs, &expect)?;
            return Ok(format!("{l} {} {r}", op.c_token()));
        }

        let saturating = matches!(
            op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul
        ) && ctx.policy == OverflowPolicy::Clamp;
        if saturating {
            let helper_op = match op {
                BinaryOp::Add => HelperOp::ClampAdd,
                BinaryOp::Sub => HelperOp::ClampSub,
                BinaryOp::Mul => HelperOp::ClampMul,
                _ => unreachable!(),
            };
            self.effects.record(Effect::Helper {
                op: helper_op,
                prim: p,
            });
            self.effects.record(Effect::Include(Header::StdInt));
            if self.cfg.debug {
                self.effects.record(Effect::Include(Header::StdIo));
                self.effects.record(Effect::Include(Header::StdLib));
            }
            let l = self.expr(lhs, &expect)?;
            let r = self.expr(rhs, &expect)?;
            return Ok(format!(
                "cnx_{}_{}({l}, {r})",
                helper_op.fragment(),
                p.name()
            ));
        }

        let l = self.wrap_operand(lhs, &expect)?;
        let r = self.wrap_operand(rhs, &expect)?;
        let bare = format!("{l} {} {r}", op.c_token());

        if p.is_unsigned() {
            // Modular behavior is well-defined; narrow results only need
            // the cast back from the promoted type.
            if p.bits() < 32 {
                let cty = self.c_base(&result);
                return Ok(format!("({cty})({bare})"));
            }
            return Ok(bare);
        }

        // Signed: widen for the operation, narrow explicitly after.
        let arithmetic = matches!(
            op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul
        );
        let wrap = ctx.policy == OverflowPolicy::Wrap;
        if arithmetic && p.wider() != p && (wrap || p.bits() < 32) {
            let wide = self.c_base(&TypeInfo::prim(p.wider()));
            let cty = self.c_base(&result);
            return Ok(format!(
                "({cty})(({wide})({l}) {} ({wide})({r}))",
                op.c_token()
            ));
        }
        if arithmetic && wrap && p == Primitive::I64 {
            // No wider signed type: wrap through the unsigned counterpart.
            return Ok(format!(
                "(int64_t)((uint64_t)({l}) {} (uint64_t)({r}))",
                op.c_token()
            ));
        }
        if p.bits() < 32 {
            let cty = self.c_base(&result);
            return Ok(format!("({cty})({bare})"));
        }
        Ok(bare)
    }
}

/// Inline shift-and-mask read of one bitmap field.
pub(crate) fn bit_field_read(
    code: &str,
    offset: u32,
    width: u32,
    backing: Primitive,
) -> String {
    let mask = mask_literal(width, backing.bits() == 64);
    format!("(({code} >> {offset}U) & {mask})")
}

pub(crate) fn mask_literal(width: u32, wide: bool) -> String {
    let mask: u128 = (1u128 << width) - 1;
    if wide {
        format!("0x{mask:X}ULL")
    } else {
        format!("0x{mask:X}U")
    }
}

fn resolve_unsigned(p: Primitive) -> Primitive {
    match p.bits() {
        8 => Primitive::U8,
        16 => Primitive::U16,
        32 => Primitive::U32,
        _ => Primitive::U64,
    }
}

/// Addressable expressions: identifiers and member/index projections.
fn is_lvalue(e: &Expr) -> bool {
    match &e.unwrap_parens().kind {
        ExprKind::Ident(_) => true,
        ExprKind::Postfix { base, ops } => {
            is_lvalue(base)
                && ops.iter().all(|op| {
                    matches!(
                        op.kind,
                        PostfixKind::Member(_) | PostfixKind::Index(_)
                    )
                })
        }
        _ => false,
    }
}

fn c_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_have_exactly_width_bits() {
        assert_eq!(mask_literal(1, false), "0x1U");
        assert_eq!(mask_literal(3, false), "0x7U");
        assert_eq!(mask_literal(4, false), "0xFU");
        assert_eq!(mask_literal(8, false), "0xFFU");
        assert_eq!(mask_literal(64, true), "0xFFFFFFFFFFFFFFFFULL");
    }

    #[test]
    fn bit_field_read_shape() {
        let code = bit_field_read("s", 1, 3, Primitive::U8);
        assert_eq!(code, "((s >> 1U) & 0x7U)");
    }

    #[test]
    fn string_quoting_escapes() {
        assert_eq!(c_quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
    }
}
