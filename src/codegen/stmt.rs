//! Statement generation.
//!
//! Statements generate bottom-up: the statement body is produced first (and
//! may enqueue pending temp declarations — float shadows, spilled pointer
//! arguments), then the temps are flushed immediately before the statement
//! text. Assignment targets get their own analysis because bitmap fields,
//! bit indices and bit ranges lower to read-modify-write instead of a plain
//! store.

use crate::ast::{
    AssignOp, Block, Expr, ExprKind, PostfixKind, Stmt, StmtKind, VarDecl,
};
use crate::codegen::effects::{Effect, Header};
use crate::codegen::expr::{ExprCtx, GBase, ValState};
use crate::codegen::{Generator, INDENT};
use crate::errors::{ErrorKind, Result, SourcePos};
use crate::sema::registry::{root_ident, ScopeItem};
use crate::sema::resolve::{self, check_assignable};
use crate::sema::{consts, validate};
use crate::ty::{BaseType, Primitive, TypeInfo};
use crate::OutputMode;

/// How an assignment target is written.
enum Store {
    /// A plain C lvalue: `x = v;`
    Plain { code: String, ty: TypeInfo },
    /// Shift-and-mask read-modify-write into `target`.
    Masked {
        target: String,
        cast: String,
        offset: String,
        mask: String,
        value_ty: TypeInfo,
    },
    /// Bounded string copy.
    StrCopy { dest: String, cap: u32 },
}

impl Generator<'_> {
    pub(crate) fn block(&mut self, b: &Block, level: usize) -> Result<String> {
        let locals_at_entry = self
            .func
            .as_ref()
            .map(|f| f.locals.len())
            .unwrap_or(0);
        let mut out = String::new();
        for stmt in &b.stmts {
            out.push_str(&self.stmt_with_temps(stmt, level)?);
        }
        // Block-local declarations go out of scope with the block.
        if let Some(f) = self.func.as_mut() {
            f.locals.truncate(locals_at_entry);
            f.local_mods.truncate(locals_at_entry);
        }
        Ok(out)
    }

    /// Generate one statement, flushing any temp declarations it enqueued
    /// in front of it.
    fn stmt_with_temps(&mut self, s: &Stmt, level: usize) -> Result<String> {
        let code = self.stmt(s, level)?;
        let ind = INDENT.repeat(level);
        let mut out = String::new();
        if let Some(f) = self.func.as_mut() {
            for line in f.pending.drain(..) {
                out.push_str(&ind);
                out.push_str(&line);
                out.push('\n');
            }
            f.refreshed_aliases.clear();
            f.temp_counter = 0;
        }
        out.push_str(&code);
        Ok(out)
    }

    fn stmt(&mut self, s: &Stmt, level: usize) -> Result<String> {
        let ind = INDENT.repeat(level);
        match &s.kind {
            StmtKind::Block(b) => {
                let body = self.block(b, level + 1)?;
                Ok(format!("{ind}{{\n{body}{ind}}}\n"))
            }
            StmtKind::Var(decl) => self.local_var(decl, level),
            StmtKind::Expr(e) => {
                let ty = self.type_of(e)?;
                let code =
                    self.expr(e, &ExprCtx::plain(self.cfg.overflow))?;
                if ty.is_void() {
                    Ok(format!("{ind}{code};\n"))
                } else if matches!(&e.kind, ExprKind::Postfix { .. }) {
                    // Unused results are discarded explicitly.
                    Ok(format!("{ind}(void){code};\n"))
                } else {
                    Ok(format!("{ind}(void)({code});\n"))
                }
            }
            StmtKind::Assign { target, op, value } => {
                self.gen_assign(target, *op, value, level, s.pos)
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let ct = self.type_of(cond)?;
                validate::condition(&ct, cond.pos)?;
                let cond_code =
                    self.expr(cond, &ExprCtx::plain(self.cfg.overflow))?;
                let then_code = self.block(then_branch, level + 1)?;
                let mut out =
                    format!("{ind}if ({cond_code}) {{\n{then_code}{ind}}}");
                if let Some(b) = else_branch {
                    let else_code = self.block(b, level + 1)?;
                    out.push_str(&format!(" else {{\n{else_code}{ind}}}"));
                }
                out.push('\n');
                Ok(out)
            }
            StmtKind::While { cond, body } => {
                let ct = self.type_of(cond)?;
                validate::condition(&ct, cond.pos)?;
                let cond_code =
                    self.expr(cond, &ExprCtx::plain(self.cfg.overflow))?;
                let body_code = self.block(body, level + 1)?;
                Ok(format!(
                    "{ind}while ({cond_code}) {{\n{body_code}{ind}}}\n"
                ))
            }
            StmtKind::DoWhile { body, cond } => {
                let body_code = self.block(body, level + 1)?;
                let ct = self.type_of(cond)?;
                validate::condition(&ct, cond.pos)?;
                let cond_code =
                    self.expr(cond, &ExprCtx::plain(self.cfg.overflow))?;
                Ok(format!(
                    "{ind}do {{\n{body_code}{ind}}} while ({cond_code});\n"
                ))
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let locals_at_entry = self
                    .func
                    .as_ref()
                    .map(|f| f.locals.len())
                    .unwrap_or(0);
                let init_code = match init {
                    Some(s) => self.inline_stmt(s)?,
                    None => String::new(),
                };
                let cond_code = match cond {
                    Some(c) => {
                        let ct = self.type_of(c)?;
                        validate::condition(&ct, c.pos)?;
                        self.expr(c, &ExprCtx::plain(self.cfg.overflow))?
                    }
                    None => String::new(),
                };
                let step_code = match step {
                    Some(s) => self.inline_stmt(s)?,
                    None => String::new(),
                };
                let body_code = self.block(body, level + 1)?;
                // The induction variable is scoped to the loop.
                if let Some(f) = self.func.as_mut() {
                    f.locals.truncate(locals_at_entry);
                    f.local_mods.truncate(locals_at_entry);
                }
                Ok(format!(
                    "{ind}for ({init_code}; {cond_code}; {step_code}) \
                     {{\n{body_code}{ind}}}\n"
                ))
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default_count,
                default_body,
            } => self.gen_switch(
                scrutinee,
                cases,
                *default_count,
                default_body,
                level,
                s.pos,
            ),
            StmtKind::Return(value) => {
                let ret = self.func.as_ref().and_then(|f| {
                    if f.sig.is_main {
                        Some(TypeInfo::prim(Primitive::I32))
                    } else {
                        f.sig.ret.clone()
                    }
                });
                match (ret, value) {
                    (None, None) => Ok(format!("{ind}return;\n")),
                    (Some(rt), Some(e)) => {
                        let vt = self.type_of(e)?;
                        check_assignable(&rt, &vt, e, e.pos)?;
                        let code = self.expr(
                            e,
                            &ExprCtx::expecting(rt, self.cfg.overflow),
                        )?;
                        Ok(format!("{ind}return {code};\n"))
                    }
                    (None, Some(e)) => Err(ErrorKind::TypeMismatch {
                        expected: "void".to_owned(),
                        found: self.type_of(e)?.describe(),
                    }
                    .at(e.pos)),
                    (Some(rt), None) => Err(ErrorKind::TypeMismatch {
                        expected: rt.describe(),
                        found: "void".to_owned(),
                    }
                    .at(s.pos)),
                }
            }
            StmtKind::Critical { guard, body } => {
                self.gen_critical(guard, body, level, s.pos)
            }
            StmtKind::Break => Ok(format!("{ind}break;\n")),
            StmtKind::Continue => Ok(format!("{ind}continue;\n")),
        }
    }

    // --- declarations ----------------------------------------------------

    /// Declarator text for a variable: base type, const/atomic qualifiers,
    /// name and array/string brackets.
    pub(crate) fn c_declarator(
        &mut self,
        ty: &TypeInfo,
        name: &str,
        atomic: bool,
        is_const: bool,
    ) -> String {
        let mut base = self.c_base(ty);
        if atomic && self.cfg.atomic {
            self.effects.record(Effect::Include(Header::StdAtomic));
            base = match self.cfg.mode {
                OutputMode::C => format!("_Atomic {base}"),
                OutputMode::Cpp => format!("std::atomic<{base}>"),
            };
        }
        let mut out = String::new();
        if is_const {
            out.push_str("const ");
        }
        out.push_str(&base);
        out.push(' ');
        out.push_str(name);
        if let BaseType::Str { capacity } = &ty.base {
            let cap = capacity.unwrap_or(0);
            out.push_str(&format!("[{}U]", cap + 1));
        }
        for d in &ty.dims {
            out.push_str(&format!("[{d}U]"));
        }
        out
    }

    fn local_var(&mut self, decl: &VarDecl, level: usize) -> Result<String> {
        let ind = INDENT.repeat(level);
        let taken = self.rctx().param(&decl.name).is_some()
            || self.rctx().local(&decl.name).is_some();
        if taken {
            return Err(
                ErrorKind::DuplicateMember(decl.name.clone()).at(decl.pos)
            );
        }
        let mut ty = self.registry.resolve_type(&decl.ty)?;
        ty.is_const = decl.modifiers.is_const;

        // Strings take their capacity from the annotation, or from a
        // literal initializer.
        if let BaseType::Str { capacity: None } = &ty.base {
            let lit = decl.init.as_ref().and_then(|e| {
                match &e.unwrap_parens().kind {
                    ExprKind::Str(s) => Some(s.len() as u32),
                    _ => None,
                }
            });
            match lit {
                Some(len) => ty.base = BaseType::Str { capacity: Some(len) },
                None => {
                    return Err(ErrorKind::WrongKind {
                        name: decl.name.clone(),
                        expected: "string with a declared capacity",
                        actual: "unsized string",
                    }
                    .at(decl.pos))
                }
            }
        }

        let policy =
            decl.modifiers.overflow.unwrap_or(self.cfg.overflow);
        let init_code = match &decl.init {
            Some(init) => {
                let vt = self.type_of(init)?;
                check_assignable(&ty, &vt, init, init.pos)?;
                Some(self.expr(
                    init,
                    &ExprCtx::expecting(ty.clone(), policy),
                )?)
            }
            None => None,
        };

        let declarator = self.c_declarator(
            &ty,
            &decl.name,
            decl.modifiers.atomic,
            decl.modifiers.is_const,
        );
        if let Some(f) = self.func.as_mut() {
            f.locals.push((decl.name.clone(), ty));
            f.local_mods.push((decl.name.clone(), decl.modifiers));
        }
        match init_code {
            Some(init) => Ok(format!("{ind}{declarator} = {init};\n")),
            None => Ok(format!("{ind}{declarator};\n")),
        }
    }

    /// Restricted statement forms usable in a `for` header.
    fn inline_stmt(&mut self, s: &Stmt) -> Result<String> {
        match &s.kind {
            StmtKind::Var(_) | StmtKind::Assign { .. } => {}
            _ => {
                return Err(ErrorKind::WrongKind {
                    name: "for clause".to_owned(),
                    expected: "declaration or assignment",
                    actual: "statement",
                }
                .at(s.pos))
            }
        }
        let code = self.stmt(s, 0)?;
        Ok(code.trim_end().trim_end_matches(';').to_owned())
    }

    // --- assignment ------------------------------------------------------

    fn gen_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        level: usize,
        pos: SourcePos,
    ) -> Result<String> {
        let ind = INDENT.repeat(level);
        let root = root_ident(target).map(str::to_owned);
        let policy = root
            .as_deref()
            .map(|r| self.policy_of(r))
            .unwrap_or(self.cfg.overflow);
        let atomic = root
            .as_deref()
            .map(|r| self.is_atomic(r))
            .unwrap_or(false);

        let store = self.analyze_store(target, op)?;

        // With hardware atomics, a compound assignment on an `_Atomic`
        // variable must stay a single read-modify-write.
        if atomic && self.cfg.atomic && policy != crate::OverflowPolicy::Clamp
        {
            let rmw_op = op.binary().filter(|b| {
                matches!(
                    b,
                    crate::ast::BinaryOp::Add
                        | crate::ast::BinaryOp::Sub
                        | crate::ast::BinaryOp::BitAnd
                        | crate::ast::BinaryOp::BitOr
                        | crate::ast::BinaryOp::BitXor
                )
            });
            if let (Store::Plain { code, ty }, Some(bop)) = (&store, rmw_op)
            {
                let rt = resolve::binary_result(
                    &self.rctx(),
                    bop,
                    target,
                    value,
                    pos,
                )?;
                check_assignable(ty, &rt, value, value.pos)?;
                let v = self.expr(
                    value,
                    &ExprCtx::expecting(ty.clone(), policy),
                )?;
                return Ok(format!(
                    "{ind}{code} {}= {v};\n",
                    bop.c_token()
                ));
            }
        }

        let line = match store {
            Store::StrCopy { dest, cap } => {
                let vt = self.type_of(value)?;
                if !vt.is_string() {
                    return Err(ErrorKind::TypeMismatch {
                        expected: "string".to_owned(),
                        found: vt.describe(),
                    }
                    .at(value.pos));
                }
                self.effects.record(Effect::Include(Header::String));
                let src = self.expr(value, &ExprCtx::plain(policy))?;
                format!(
                    "{ind}(void)strncpy({dest}, {src}, {cap}U);\n\
                     {ind}{dest}[{cap}U] = '\\0';\n"
                )
            }
            Store::Plain { code, ty } => {
                let rhs = match op.binary() {
                    None => {
                        let vt = self.type_of(value)?;
                        check_assignable(&ty, &vt, value, value.pos)?;
                        self.expr(
                            value,
                            &ExprCtx::expecting(ty.clone(), policy),
                        )?
                    }
                    Some(bop) => {
                        // `x op<- v` expands through the binary generator so
                        // overflow policy and widening apply unchanged.
                        let rt = resolve::binary_result(
                            &self.rctx(),
                            bop,
                            target,
                            value,
                            pos,
                        )?;
                        check_assignable(&ty, &rt, value, value.pos)?;
                        self.gen_binary(
                            bop,
                            target,
                            value,
                            ty.clone(),
                            &ExprCtx::expecting(ty.clone(), policy),
                        )?
                    }
                };
                format!("{ind}{code} = {rhs};\n")
            }
            Store::Masked {
                target: tcode,
                cast,
                offset,
                mask,
                value_ty,
            } => {
                let rhs = match op.binary() {
                    None => {
                        let vt = self.type_of(value)?;
                        check_assignable(&value_ty, &vt, value, value.pos)?;
                        self.expr(
                            value,
                            &ExprCtx::expecting(value_ty.clone(), policy),
                        )?
                    }
                    Some(bop) => {
                        let rt = resolve::binary_result(
                            &self.rctx(),
                            bop,
                            target,
                            value,
                            pos,
                        )?;
                        check_assignable(&value_ty, &rt, value, value.pos)?;
                        self.gen_binary(
                            bop,
                            target,
                            value,
                            value_ty.clone(),
                            &ExprCtx::expecting(value_ty.clone(), policy),
                        )?
                    }
                };
                format!(
                    "{ind}{tcode} = ({cast})(({tcode} & \
                     ~({mask} << {offset})) | \
                     ((({rhs}) & {mask}) << {offset}));\n"
                )
            }
        };

        // Without hardware atomics, atomic variables fall back to
        // critical-section guarded read-modify-write.
        if atomic && !self.cfg.atomic {
            return Ok(self.wrap_critical_lines(&line, level));
        }
        Ok(line)
    }

    fn wrap_critical_lines(&mut self, line: &str, level: usize) -> String {
        self.effects.record(Effect::CriticalSection);
        self.effects.record(Effect::Include(Header::StdInt));
        let ind = INDENT.repeat(level);
        let inner_ind = INDENT.repeat(level + 1);
        let depth = self
            .func
            .as_ref()
            .map(|f| f.crit_depth)
            .unwrap_or(0);
        let reindented: String = line
            .lines()
            .map(|l| format!("{INDENT}{l}\n"))
            .collect();
        format!(
            "{ind}{{\n\
             {inner_ind}uint32_t cnx_crit_state{depth} = \
             cnx_critical_enter();\n\
             {reindented}\
             {inner_ind}cnx_critical_exit(cnx_crit_state{depth});\n\
             {ind}}}\n"
        )
    }

    /// Decide how a target expression is stored into, validating access
    /// modes and constness along the way.
    fn analyze_store(&mut self, target: &Expr, op: AssignOp) -> Result<Store> {
        let inner = target.unwrap_parens();
        let pos = inner.pos;

        // Plain identifier.
        if let ExprKind::Ident(_) = &inner.kind {
            let state = self.classify_gen(inner, &ExprCtx::plain(self.cfg.overflow))?;
            let GBase::Val(v) = state else {
                return Err(ErrorKind::WrongKind {
                    name: "assignment target".to_owned(),
                    expected: "variable",
                    actual: "namespace or function",
                }
                .at(pos));
            };
            return self.finish_simple_store(v, pos);
        }

        let ExprKind::Postfix { base, ops } = &inner.kind else {
            return Err(ErrorKind::WrongKind {
                name: "assignment target".to_owned(),
                expected: "variable, member or element",
                actual: "expression",
            }
            .at(pos));
        };
        let Some((last, prefix)) = ops.split_last() else {
            return self.analyze_store(base, op);
        };
        let mut state = self
            .classify_gen(base, &ExprCtx::plain(self.cfg.overflow))?;
        for step_op in prefix {
            state = self.gen_step(
                state,
                step_op,
                &ExprCtx::plain(self.cfg.overflow),
            )?;
        }

        match &last.kind {
            PostfixKind::Member(member) => {
                self.member_store(state, member, op, last.pos)
            }
            PostfixKind::Index(idx) => self.index_store(state, idx, last.pos),
            PostfixKind::BitRange(lo, hi) => {
                self.bit_range_store(state, lo, hi, last.pos)
            }
            PostfixKind::Call(_) => Err(ErrorKind::WrongKind {
                name: "assignment target".to_owned(),
                expected: "variable, member or element",
                actual: "call",
            }
            .at(last.pos)),
        }
    }

    fn finish_simple_store(
        &mut self,
        v: ValState,
        pos: SourcePos,
    ) -> Result<Store> {
        if v.ty.is_const {
            let name = v.root.clone().unwrap_or_else(|| v.code.clone());
            return Err(ErrorKind::ConstAssigned(name).at(pos));
        }
        if v.ty.is_string() {
            let BaseType::Str { capacity } = &v.ty.base else {
                unreachable!()
            };
            let cap = capacity.ok_or_else(|| {
                ErrorKind::WrongKind {
                    name: v.code.clone(),
                    expected: "string with a declared capacity",
                    actual: "unsized string",
                }
                .at(pos)
            })?;
            return Ok(Store::StrCopy {
                dest: v.code,
                cap,
            });
        }
        Ok(Store::Plain {
            code: v.code,
            ty: v.ty,
        })
    }

    fn member_store(
        &mut self,
        state: GBase,
        member: &str,
        op: AssignOp,
        pos: SourcePos,
    ) -> Result<Store> {
        match state {
            GBase::RegisterNs(reg) => {
                let info = self.registry.register(&reg).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(reg.clone()).at(pos)
                })?;
                let m = info.member(member).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(format!("{reg}.{member}"))
                        .at(pos)
                })?;
                validate::register_write(member, m.access, pos)?;
                // A compound op reads the member too.
                if op.binary().is_some() {
                    validate::register_read(member, m.access, pos)?;
                }
                self.effects.record(Effect::Include(Header::StdInt));
                Ok(Store::Plain {
                    code: format!("{reg}_{member}"),
                    ty: m.ty.clone(),
                })
            }
            GBase::ScopeNs(scope) => {
                let item = self
                    .registry
                    .scope_member(&scope, member, self.scope.as_deref())
                    .map_err(|k| k.at(pos))?;
                match item {
                    ScopeItem::Var(v) => {
                        if v.modifiers.is_const {
                            return Err(ErrorKind::ConstAssigned(
                                member.to_owned(),
                            )
                            .at(pos));
                        }
                        let ty = v.ty.clone();
                        let code = self.c_symbol(Some(&scope), member);
                        self.finish_simple_store(
                            ValState {
                                code,
                                ty,
                                is_ptr: false,
                                root: Some(member.to_owned()),
                                is_args: false,
                            },
                            pos,
                        )
                    }
                    ScopeItem::Func(_) => Err(ErrorKind::WrongKind {
                        name: member.to_owned(),
                        expected: "variable",
                        actual: "function",
                    }
                    .at(pos)),
                }
            }
            GBase::GlobalNs => {
                let g = self.registry.global(member).ok_or_else(|| {
                    ErrorKind::UnknownSymbol(member.to_owned()).at(pos)
                })?;
                if g.modifiers.is_const {
                    return Err(
                        ErrorKind::ConstAssigned(member.to_owned()).at(pos)
                    );
                }
                let ty = g.ty.clone();
                self.finish_simple_store(
                    ValState {
                        code: member.to_owned(),
                        ty,
                        is_ptr: false,
                        root: Some(member.to_owned()),
                        is_args: false,
                    },
                    pos,
                )
            }
            GBase::Val(v) => {
                if v.ty.is_const {
                    let name =
                        v.root.clone().unwrap_or_else(|| v.code.clone());
                    return Err(ErrorKind::ConstAssigned(name).at(pos));
                }
                match &v.ty.base {
                    BaseType::Struct(name) => {
                        let info = self
                            .registry
                            .struct_info(name)
                            .ok_or_else(|| {
                                ErrorKind::UnknownSymbol(name.clone())
                                    .at(pos)
                            })?;
                        let field = info.field(member).ok_or_else(|| {
                            ErrorKind::UnknownSymbol(format!(
                                "{name}.{member}"
                            ))
                            .at(pos)
                        })?;
                        let sep = if v.is_ptr { "->" } else { "." };
                        let code = format!("{}{sep}{member}", v.code);
                        let ty = field.ty.clone();
                        self.finish_simple_store(
                            ValState {
                                code,
                                ty,
                                is_ptr: false,
                                root: v.root,
                                is_args: false,
                            },
                            pos,
                        )
                    }
                    BaseType::Bitmap { name, bits } => {
                        let info =
                            self.registry.bitmap(name).ok_or_else(|| {
                                ErrorKind::UnknownSymbol(name.clone())
                                    .at(pos)
                            })?;
                        let field = info.field(member).ok_or_else(|| {
                            ErrorKind::UnknownBitmapField {
                                bitmap: name.clone(),
                                field: member.to_owned(),
                            }
                            .at(pos)
                        })?;
                        let backing = bits.backing();
                        let mask = crate::codegen::expr::mask_literal(
                            field.width,
                            backing.bits() == 64,
                        );
                        let value_ty = if field.width == 1 {
                            TypeInfo::prim(Primitive::Bool)
                        } else {
                            TypeInfo::prim(backing)
                        };
                        let cast = self.c_base(&v.ty);
                        Ok(Store::Masked {
                            target: v.code,
                            cast,
                            offset: format!("{}U", field.offset),
                            mask,
                            value_ty,
                        })
                    }
                    _ => Err(ErrorKind::WrongKind {
                        name: member.to_owned(),
                        expected: "struct or bitmap value",
                        actual: "other type",
                    }
                    .at(pos)),
                }
            }
            GBase::EnumNs(name) => Err(ErrorKind::WrongKind {
                name,
                expected: "variable",
                actual: "enum",
            }
            .at(pos)),
            GBase::Func { sig, .. } => Err(ErrorKind::WrongKind {
                name: sig.name,
                expected: "variable",
                actual: "function",
            }
            .at(pos)),
            GBase::External(name) => {
                Err(ErrorKind::UnknownSymbol(name).at(pos))
            }
        }
    }

    fn index_store(
        &mut self,
        state: GBase,
        idx: &Expr,
        pos: SourcePos,
    ) -> Result<Store> {
        let GBase::Val(v) = state else {
            return Err(ErrorKind::WrongKind {
                name: "assignment target".to_owned(),
                expected: "array or integer",
                actual: "namespace",
            }
            .at(pos));
        };
        if v.ty.is_const {
            let name = v.root.clone().unwrap_or_else(|| v.code.clone());
            return Err(ErrorKind::ConstAssigned(name).at(pos));
        }
        if v.ty.is_array() {
            validate::array_index(self.registry, v.ty.dims[0], idx)?;
            let idx_code =
                self.expr(idx, &ExprCtx::plain(self.cfg.overflow))?;
            return Ok(Store::Plain {
                code: format!("{}[{idx_code}]", v.code),
                ty: v.ty.element(),
            });
        }
        if v.ty.is_string() {
            let idx_code =
                self.expr(idx, &ExprCtx::plain(self.cfg.overflow))?;
            return Ok(Store::Plain {
                code: format!("{}[{idx_code}]", v.code),
                ty: TypeInfo::prim(Primitive::U8),
            });
        }
        match v.ty.scalar_prim() {
            Some(p) if p.is_integer() => {
                validate::bit_index(self.registry, p.bits(), idx)?;
                let idx_code = self.expr(
                    idx,
                    &ExprCtx::expecting(
                        TypeInfo::prim(Primitive::U32),
                        self.cfg.overflow,
                    ),
                )?;
                let cast = self.c_base(&v.ty);
                Ok(Store::Masked {
                    target: v.code,
                    cast,
                    offset: idx_code,
                    mask: if p.bits() == 64 {
                        "0x1ULL".to_owned()
                    } else {
                        "0x1U".to_owned()
                    },
                    value_ty: TypeInfo::prim(Primitive::Bool),
                })
            }
            _ => Err(ErrorKind::WrongKind {
                name: "assignment target".to_owned(),
                expected: "array, string or integer",
                actual: "other type",
            }
            .at(pos)),
        }
    }

    fn bit_range_store(
        &mut self,
        state: GBase,
        lo: &Expr,
        hi: &Expr,
        pos: SourcePos,
    ) -> Result<Store> {
        let GBase::Val(v) = state else {
            return Err(ErrorKind::WrongKind {
                name: "assignment target".to_owned(),
                expected: "integer",
                actual: "namespace",
            }
            .at(pos));
        };
        if v.ty.is_const {
            let name = v.root.clone().unwrap_or_else(|| v.code.clone());
            return Err(ErrorKind::ConstAssigned(name).at(pos));
        }
        let Some(p) = v.ty.scalar_prim().filter(|p| p.is_integer()) else {
            return Err(ErrorKind::WrongKind {
                name: "assignment target".to_owned(),
                expected: "integer bit range",
                actual: "other type",
            }
            .at(pos));
        };
        validate::bit_index(self.registry, p.bits(), lo)?;
        validate::bit_index(self.registry, p.bits(), hi)?;
        let (Some(l), Some(h)) = (
            consts::fold_int(self.registry, lo),
            consts::fold_int(self.registry, hi),
        ) else {
            return Err(ErrorKind::BitIndexOutOfBounds {
                index: -1,
                width: p.bits(),
            }
            .at(pos)
            .with_remediation(
                "bit range writes need compile-time bounds",
            ));
        };
        if h < l {
            return Err(ErrorKind::BitIndexOutOfBounds {
                index: h,
                width: p.bits(),
            }
            .at(pos));
        }
        let width = (h - l + 1) as u32;
        let mask =
            crate::codegen::expr::mask_literal(width, p.bits() == 64);
        let cast = self.c_base(&v.ty);
        Ok(Store::Masked {
            target: v.code,
            cast,
            offset: format!("{l}U"),
            mask,
            value_ty: TypeInfo::prim(p),
        })
    }

    // --- switch and critical ---------------------------------------------

    fn gen_switch(
        &mut self,
        scrutinee: &Expr,
        cases: &[crate::ast::SwitchCase],
        default_count: u32,
        default_body: &Block,
        level: usize,
        pos: SourcePos,
    ) -> Result<String> {
        let ind = INDENT.repeat(level);
        let case_ind = INDENT.repeat(level + 1);
        let st = self.type_of(scrutinee)?;

        // Strict reading of `default(N)`: for enum scrutinees N must equal
        // the number of members not listed as cases. For other scrutinee
        // types the count is advisory.
        if let BaseType::Enum(ename) = &st.base {
            let info = self.registry.enum_info(ename).ok_or_else(|| {
                ErrorKind::UnknownSymbol(ename.clone()).at(pos)
            })?;
            let total = info.members.len();
            let mut listed: Vec<i64> = Vec::new();
            for c in cases {
                if let Some(consts::ConstValue::Int(v)) =
                    consts::fold(self.registry, &c.value)
                {
                    let v = v as i64;
                    if !listed.contains(&v) {
                        listed.push(v);
                    }
                }
            }
            let unlisted = total.saturating_sub(listed.len()) as u32;
            if default_count != unlisted {
                return Err(ErrorKind::DefaultCountMismatch {
                    expected: default_count,
                    actual: unlisted,
                }
                .at(pos));
            }
        }

        let scrutinee_code =
            self.expr(scrutinee, &ExprCtx::plain(self.cfg.overflow))?;
        let mut out = format!("{ind}switch ({scrutinee_code}) {{\n");
        for c in cases {
            let vt = self.type_of(&c.value)?;
            check_assignable(&st, &vt, &c.value, c.value.pos)?;
            let value_code = self.expr(
                &c.value,
                &ExprCtx::expecting(st.clone(), self.cfg.overflow),
            )?;
            let body = self.block(&c.body, level + 2)?;
            out.push_str(&format!("{case_ind}case {value_code}: {{\n"));
            out.push_str(&body);
            if !ends_diverging(&c.body) {
                out.push_str(&format!("{}break;\n", INDENT.repeat(level + 2)));
            }
            out.push_str(&format!("{case_ind}}}\n"));
        }
        let body = self.block(default_body, level + 2)?;
        out.push_str(&format!("{case_ind}default: {{\n"));
        out.push_str(&body);
        if !ends_diverging(default_body) {
            out.push_str(&format!("{}break;\n", INDENT.repeat(level + 2)));
        }
        out.push_str(&format!("{case_ind}}}\n{ind}}}\n"));
        Ok(out)
    }

    fn gen_critical(
        &mut self,
        guard: &str,
        body: &Block,
        level: usize,
        pos: SourcePos,
    ) -> Result<String> {
        // The guarded variable must exist, even though the lowering
        // protects the whole block.
        let guard_expr = Expr {
            kind: ExprKind::Ident(guard.to_owned()),
            pos,
        };
        self.type_of(&guard_expr)?;

        self.effects.record(Effect::CriticalSection);
        self.effects.record(Effect::Include(Header::StdInt));

        let depth = self.func.as_ref().map(|f| f.crit_depth).unwrap_or(0);
        if let Some(f) = self.func.as_mut() {
            f.crit_depth += 1;
        }
        let body_code = self.block(body, level + 1)?;
        if let Some(f) = self.func.as_mut() {
            f.crit_depth -= 1;
        }

        let ind = INDENT.repeat(level);
        let inner = INDENT.repeat(level + 1);
        Ok(format!(
            "{ind}{{\n\
             {inner}uint32_t cnx_crit_state{depth} = cnx_critical_enter();\n\
             {body_code}\
             {inner}cnx_critical_exit(cnx_crit_state{depth});\n\
             {ind}}}\n"
        ))
    }
}

/// Does a block visibly end in `return`, `break` or `continue`? Used to
/// avoid emitting unreachable `break` after a returning switch arm.
fn ends_diverging(b: &Block) -> bool {
    matches!(
        b.stmts.last().map(|s| &s.kind),
        Some(StmtKind::Return(_))
            | Some(StmtKind::Break)
            | Some(StmtKind::Continue)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diverging_tail_detection() {
        let ret = Stmt {
            kind: StmtKind::Return(None),
            pos: SourcePos::UNKNOWN,
        };
        let b = Block {
            stmts: vec![ret],
            pos: SourcePos::UNKNOWN,
        };
        assert!(ends_diverging(&b));
        let empty = Block {
            stmts: vec![],
            pos: SourcePos::UNKNOWN,
        };
        assert!(!ends_diverging(&empty));
    }
}
