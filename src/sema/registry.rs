//! The per-translation-unit symbol registry.
//!
//! Built once by a pre-pass over the parse tree in declaration order, then
//! frozen; code generation only ever holds a shared borrow. Lookups enforce
//! existence, visibility and kind agreement and report the dedicated error
//! kinds for each failure.

use log::debug;
use serde::Serialize;

use crate::ast::{
    self, AccessMode, Expr, ExprKind, Item, PostfixKind, Stmt, StmtKind,
    TypeExpr, Unit, VarModifiers, Visibility,
};
use crate::errors::{ErrorKind, Result, SourcePos};
use crate::sema::consts::{self, ConstValue};
use crate::ty::{BaseType, BitmapBits, Primitive, TypeInfo};

/// Reserved identifier the parser uses for `this`. Never emitted.
pub const THIS: &str = "this";
/// Reserved identifier the parser uses for `global`. Never emitted.
pub const GLOBAL: &str = "global";

#[derive(Debug, Clone, Serialize)]
pub struct ScopeInfo {
    pub name: String,
    pub members: Vec<ScopeMemberInfo>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeMemberInfo {
    pub name: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub pos: SourcePos,
}

impl StructInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumInfo {
    pub name: String,
    pub backing: Primitive,
    pub members: Vec<(String, i64)>,
    pub pos: SourcePos,
}

impl EnumInfo {
    pub fn member(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BitmapInfo {
    pub name: String,
    pub bits: BitmapBits,
    pub fields: Vec<BitmapField>,
    pub pos: SourcePos,
}

impl BitmapInfo {
    pub fn field(&self, name: &str) -> Option<&BitmapField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BitmapField {
    pub name: String,
    pub offset: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterInfo {
    pub name: String,
    pub address: u64,
    pub members: Vec<RegisterMember>,
    pub pos: SourcePos,
}

impl RegisterInfo {
    pub fn member(&self, name: &str) -> Option<&RegisterMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterMember {
    pub name: String,
    pub offset: u64,
    pub access: AccessMode,
    pub ty: TypeInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackInfo {
    pub name: String,
    pub params: Vec<TypeInfo>,
    pub ret: Option<TypeInfo>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSig {
    pub name: String,
    pub scope: Option<String>,
    pub visibility: Visibility,
    pub params: Vec<ParamSig>,
    pub ret: Option<TypeInfo>,
    pub is_main: bool,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSig {
    pub name: String,
    pub ty: TypeInfo,
    pub is_const: bool,
    /// Explicit pass-by-value tag from the declaration.
    pub by_value: bool,
    /// Promoted to pointer form in the C signature; use sites dereference.
    pub force_pointer: bool,
    /// The body writes through this parameter, directly or by passing it to
    /// a mutating parameter of an earlier-declared function (one hop).
    pub mutates: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalVar {
    pub name: String,
    pub scope: Option<String>,
    pub visibility: Visibility,
    pub ty: TypeInfo,
    pub modifiers: VarModifiers,
    pub pos: SourcePos,
}

impl GlobalVar {
    /// `Scope.member` form used as the key of the const-value table.
    pub fn qualified(&self) -> String {
        match &self.scope {
            Some(s) => format!("{s}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// What a bare identifier names at file level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKind {
    Scope,
    Struct,
    Enum,
    Bitmap,
    Register,
    Callback,
    Function,
    Global,
}

impl NamedKind {
    pub fn describe(self) -> &'static str {
        match self {
            NamedKind::Scope => "scope",
            NamedKind::Struct => "struct",
            NamedKind::Enum => "enum",
            NamedKind::Bitmap => "bitmap",
            NamedKind::Register => "register",
            NamedKind::Callback => "callback",
            NamedKind::Function => "function",
            NamedKind::Global => "variable",
        }
    }
}

/// A scope member resolved through `Scope.name` or `this.name`.
pub enum ScopeItem<'a> {
    Func(&'a FunctionSig),
    Var(&'a GlobalVar),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SymbolRegistry {
    scopes: Vec<ScopeInfo>,
    structs: Vec<StructInfo>,
    enums: Vec<EnumInfo>,
    bitmaps: Vec<BitmapInfo>,
    registers: Vec<RegisterInfo>,
    callbacks: Vec<CallbackInfo>,
    functions: Vec<FunctionSig>,
    globals: Vec<GlobalVar>,
    consts: Vec<(String, ConstValue)>,
}

impl SymbolRegistry {
    pub fn scope(&self, name: &str) -> Option<&ScopeInfo> {
        self.scopes.iter().find(|s| s.name == name)
    }

    pub fn struct_info(&self, name: &str) -> Option<&StructInfo> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn enum_info(&self, name: &str) -> Option<&EnumInfo> {
        self.enums.iter().find(|e| e.name == name)
    }

    pub fn bitmap(&self, name: &str) -> Option<&BitmapInfo> {
        self.bitmaps.iter().find(|b| b.name == name)
    }

    pub fn register(&self, name: &str) -> Option<&RegisterInfo> {
        self.registers.iter().find(|r| r.name == name)
    }

    pub fn callback(&self, name: &str) -> Option<&CallbackInfo> {
        self.callbacks.iter().find(|c| c.name == name)
    }

    /// File-level function by bare name.
    pub fn function(&self, name: &str) -> Option<&FunctionSig> {
        self.functions
            .iter()
            .find(|f| f.scope.is_none() && f.name == name)
    }

    pub fn scope_function(
        &self,
        scope: &str,
        name: &str,
    ) -> Option<&FunctionSig> {
        self.functions
            .iter()
            .find(|f| f.scope.as_deref() == Some(scope) && f.name == name)
    }

    /// File-level variable by bare name.
    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals
            .iter()
            .find(|g| g.scope.is_none() && g.name == name)
    }

    pub fn scope_var(&self, scope: &str, name: &str) -> Option<&GlobalVar> {
        self.globals
            .iter()
            .find(|g| g.scope.as_deref() == Some(scope) && g.name == name)
    }

    pub fn structs(&self) -> &[StructInfo] {
        &self.structs
    }

    pub fn enums(&self) -> &[EnumInfo] {
        &self.enums
    }

    pub fn bitmaps(&self) -> &[BitmapInfo] {
        &self.bitmaps
    }

    pub fn registers(&self) -> &[RegisterInfo] {
        &self.registers
    }

    pub fn callbacks(&self) -> &[CallbackInfo] {
        &self.callbacks
    }

    pub fn functions(&self) -> &[FunctionSig] {
        &self.functions
    }

    pub fn const_value(&self, qualified: &str) -> Option<&ConstValue> {
        self.consts
            .iter()
            .find(|(n, _)| n == qualified)
            .map(|(_, v)| v)
    }

    /// The kind a file-level name refers to, if any.
    pub fn kind_of(&self, name: &str) -> Option<NamedKind> {
        if self.scope(name).is_some() {
            Some(NamedKind::Scope)
        } else if self.struct_info(name).is_some() {
            Some(NamedKind::Struct)
        } else if self.enum_info(name).is_some() {
            Some(NamedKind::Enum)
        } else if self.bitmap(name).is_some() {
            Some(NamedKind::Bitmap)
        } else if self.register(name).is_some() {
            Some(NamedKind::Register)
        } else if self.callback(name).is_some() {
            Some(NamedKind::Callback)
        } else if self.function(name).is_some() {
            Some(NamedKind::Function)
        } else if self.global(name).is_some() {
            Some(NamedKind::Global)
        } else {
            None
        }
    }

    /// Resolve `scope.member`, enforcing existence and visibility. The
    /// caller rejects own-scope-by-name before asking.
    pub fn scope_member(
        &self,
        scope: &str,
        member: &str,
        from_scope: Option<&str>,
    ) -> Result<ScopeItem<'_>, ErrorKind> {
        let info = self
            .scope(scope)
            .ok_or_else(|| ErrorKind::UnknownSymbol(scope.to_owned()))?;
        let entry = info.members.iter().find(|m| m.name == member).ok_or_else(
            || ErrorKind::UnknownSymbol(format!("{scope}.{member}")),
        )?;
        if entry.visibility == Visibility::Private
            && from_scope != Some(scope)
        {
            return Err(ErrorKind::PrivateMember {
                scope: scope.to_owned(),
                member: member.to_owned(),
            });
        }
        if let Some(f) = self.scope_function(scope, member) {
            return Ok(ScopeItem::Func(f));
        }
        if let Some(v) = self.scope_var(scope, member) {
            return Ok(ScopeItem::Var(v));
        }
        Err(ErrorKind::UnknownSymbol(format!("{scope}.{member}")))
    }

    /// Turn a written type into its descriptor. Named types must already be
    /// declared; kind mismatches (a register or scope used as a type) are
    /// rejected here.
    pub fn resolve_type(&self, te: &TypeExpr) -> Result<TypeInfo> {
        let base = if let Some(p) = Primitive::from_name(&te.name) {
            BaseType::Prim(p)
        } else if te.name == "string" {
            BaseType::Str {
                capacity: te.capacity,
            }
        } else if self.struct_info(&te.name).is_some() {
            BaseType::Struct(te.name.clone())
        } else if let Some(e) = self.enum_info(&te.name) {
            BaseType::Enum(e.name.clone())
        } else if let Some(b) = self.bitmap(&te.name) {
            BaseType::Bitmap {
                name: b.name.clone(),
                bits: b.bits,
            }
        } else if self.callback(&te.name).is_some() {
            BaseType::Callback(te.name.clone())
        } else if let Some(kind) = self.kind_of(&te.name) {
            return Err(ErrorKind::WrongKind {
                name: te.name.clone(),
                expected: "type",
                actual: kind.describe(),
            }
            .at(te.pos));
        } else {
            return Err(ErrorKind::UnknownSymbol(te.name.clone()).at(te.pos));
        };
        Ok(TypeInfo {
            base,
            dims: te.dims.clone(),
            is_const: false,
        })
    }
}

/// Build and freeze the registry. Declarations are processed in source
/// order; struct fields and signatures are resolved in a second pass so a
/// field may name a struct declared later in the file.
pub fn build(unit: &Unit) -> Result<SymbolRegistry> {
    let mut reg = SymbolRegistry::default();

    // Pass 1: names, kinds, and every table that does not reference other
    // declared types.
    for item in &unit.items {
        collect_names(&mut reg, item, None)
            .map_err(|e| e.in_decl(item.name()))?;
    }

    // Pass 2: resolve field, member and signature types; fold const values.
    for item in &unit.items {
        resolve_members(&mut reg, item, None)
            .map_err(|e| e.in_decl(item.name()))?;
    }

    // Pass 3: parameter mutation analysis, in source order so the one-hop
    // rule sees callees declared earlier with their flags already set.
    analyze_mutations(&mut reg, unit);

    debug!(
        "registry frozen: {} scopes, {} structs, {} enums, {} bitmaps, \
         {} registers, {} functions",
        reg.scopes.len(),
        reg.structs.len(),
        reg.enums.len(),
        reg.bitmaps.len(),
        reg.registers.len(),
        reg.functions.len(),
    );
    Ok(reg)
}

fn check_fresh_name(
    reg: &SymbolRegistry,
    name: &str,
    pos: SourcePos,
) -> Result<()> {
    if name == THIS || name == GLOBAL {
        return Err(ErrorKind::WrongKind {
            name: name.to_owned(),
            expected: "declarable name",
            actual: "reserved identifier",
        }
        .at(pos));
    }
    if reg.kind_of(name).is_some() {
        return Err(ErrorKind::DuplicateMember(name.to_owned()).at(pos));
    }
    Ok(())
}

fn collect_names(
    reg: &mut SymbolRegistry,
    item: &Item,
    scope: Option<&str>,
) -> Result<()> {
    match item {
        Item::Include(_) => {}
        Item::Scope(decl) => {
            check_fresh_name(reg, &decl.name, decl.pos)?;
            let mut members = Vec::new();
            for m in &decl.members {
                let name = m.item.name();
                if members.iter().any(|e: &ScopeMemberInfo| e.name == name) {
                    return Err(ErrorKind::DuplicateMember(name.to_owned())
                        .at(m.item.pos()));
                }
                match &m.item {
                    Item::Function(_) | Item::Var(_) => {}
                    other => {
                        return Err(ErrorKind::WrongKind {
                            name: other.name().to_owned(),
                            expected: "function or variable",
                            actual: "declaration",
                        }
                        .at(other.pos()))
                    }
                }
                members.push(ScopeMemberInfo {
                    name: name.to_owned(),
                    visibility: m.visibility,
                });
            }
            reg.scopes.push(ScopeInfo {
                name: decl.name.clone(),
                members,
                pos: decl.pos,
            });
            for m in &decl.members {
                collect_names(reg, &m.item, Some(&decl.name))?;
            }
        }
        Item::Struct(decl) => {
            check_fresh_name(reg, &decl.name, decl.pos)?;
            let mut seen: Vec<&str> = Vec::new();
            for f in &decl.fields {
                if seen.contains(&f.name.as_str()) {
                    return Err(
                        ErrorKind::DuplicateMember(f.name.clone()).at(f.pos)
                    );
                }
                seen.push(&f.name);
            }
            reg.structs.push(StructInfo {
                name: decl.name.clone(),
                fields: Vec::new(),
                pos: decl.pos,
            });
        }
        Item::Enum(decl) => {
            check_fresh_name(reg, &decl.name, decl.pos)?;
            reg.enums.push(build_enum(decl)?);
        }
        Item::Bitmap(decl) => {
            check_fresh_name(reg, &decl.name, decl.pos)?;
            reg.bitmaps.push(build_bitmap(decl)?);
        }
        Item::Register(decl) => {
            check_fresh_name(reg, &decl.name, decl.pos)?;
            // Members are typed in pass 2; offsets are checked here.
            let mut offsets: Vec<u64> = Vec::new();
            let mut names: Vec<&str> = Vec::new();
            for m in &decl.members {
                if names.contains(&m.name.as_str())
                    || offsets.contains(&m.offset)
                {
                    return Err(
                        ErrorKind::DuplicateMember(m.name.clone()).at(m.pos)
                    );
                }
                names.push(&m.name);
                offsets.push(m.offset);
            }
            reg.registers.push(RegisterInfo {
                name: decl.name.clone(),
                address: decl.address,
                members: Vec::new(),
                pos: decl.pos,
            });
        }
        Item::Callback(decl) => {
            check_fresh_name(reg, &decl.name, decl.pos)?;
            reg.callbacks.push(CallbackInfo {
                name: decl.name.clone(),
                params: Vec::new(),
                ret: None,
                pos: decl.pos,
            });
        }
        Item::Function(decl) => {
            if scope.is_none() {
                check_fresh_name(reg, &decl.name, decl.pos)?;
            }
            reg.functions.push(FunctionSig {
                name: decl.name.clone(),
                scope: scope.map(str::to_owned),
                visibility: Visibility::Public,
                params: Vec::new(),
                ret: None,
                is_main: scope.is_none() && decl.name == "main",
                pos: decl.pos,
            });
        }
        Item::Var(decl) => {
            if scope.is_none() {
                check_fresh_name(reg, &decl.name, decl.pos)?;
            }
            reg.globals.push(GlobalVar {
                name: decl.name.clone(),
                scope: scope.map(str::to_owned),
                visibility: Visibility::Public,
                ty: TypeInfo::prim(Primitive::I32),
                modifiers: decl.modifiers,
                pos: decl.pos,
            });
        }
    }
    Ok(())
}

fn build_enum(decl: &ast::EnumDecl) -> Result<EnumInfo> {
    let backing = match &decl.backing {
        Some(name) => Primitive::from_name(name)
            .filter(|p| p.is_integer())
            .ok_or_else(|| {
                ErrorKind::UnknownSymbol(name.clone()).at(decl.pos)
            })?,
        None => Primitive::I32,
    };
    let (lo, hi) = backing.int_range().unwrap_or((0, 0));
    let mut members = Vec::new();
    let mut next: i64 = 0;
    for m in &decl.members {
        if members.iter().any(|(n, _): &(String, i64)| n == &m.name) {
            return Err(ErrorKind::DuplicateMember(m.name.clone()).at(m.pos));
        }
        let value = m.value.unwrap_or(next);
        let wide = value as i128;
        if wide < lo || wide > hi {
            return Err(ErrorKind::TypeMismatch {
                expected: backing.name().to_owned(),
                found: value.to_string(),
            }
            .at(m.pos));
        }
        members.push((m.name.clone(), value));
        next = value + 1;
    }
    Ok(EnumInfo {
        name: decl.name.clone(),
        backing,
        members,
        pos: decl.pos,
    })
}

fn build_bitmap(decl: &ast::BitmapDecl) -> Result<BitmapInfo> {
    let bits = BitmapBits::try_from(decl.bits).map_err(|_| {
        ErrorKind::WrongKind {
            name: format!("bitmap{}", decl.bits),
            expected: "bitmap8/16/24/32/64",
            actual: "unsupported width",
        }
        .at(decl.pos)
    })?;
    let mut fields: Vec<BitmapField> = Vec::new();
    let mut cursor: u32 = 0;
    for f in &decl.fields {
        if fields.iter().any(|e| e.name == f.name) {
            return Err(ErrorKind::DuplicateMember(f.name.clone()).at(f.pos));
        }
        let offset = f.offset.unwrap_or(cursor);
        let end = offset
            .checked_add(f.width)
            .filter(|end| *end <= bits.bits())
            .ok_or_else(|| {
                ErrorKind::BitmapOverflow {
                    bitmap: decl.name.clone(),
                    bits: decl.bits,
                }
                .at(f.pos)
            })?;
        for prev in &fields {
            let prev_end = prev.offset + prev.width;
            if offset < prev_end && prev.offset < end {
                return Err(ErrorKind::BitmapOverlap {
                    first: prev.name.clone(),
                    second: f.name.clone(),
                }
                .at(f.pos));
            }
        }
        fields.push(BitmapField {
            name: f.name.clone(),
            offset,
            width: f.width,
        });
        cursor = end;
    }
    Ok(BitmapInfo {
        name: decl.name.clone(),
        bits,
        fields,
        pos: decl.pos,
    })
}

/// Whether a parameter of this type is promoted to pointer form when the
/// callee is C-Next. Structs, strings and arrays always travel by pointer;
/// primitives wider than 16 bits do too unless explicitly tagged by-value.
pub fn promote_to_pointer(ty: &TypeInfo, by_value: bool) -> bool {
    if ty.is_array() || ty.is_string() || ty.is_struct() {
        return true;
    }
    if by_value {
        return false;
    }
    match &ty.base {
        BaseType::Prim(p) => {
            p.is_integer() && p.bits() > 16
        }
        BaseType::Bitmap { bits, .. } => bits.bits() > 16,
        _ => false,
    }
}

fn resolve_members(
    reg: &mut SymbolRegistry,
    item: &Item,
    scope: Option<&str>,
) -> Result<()> {
    match item {
        Item::Include(_) | Item::Enum(_) | Item::Bitmap(_) => {}
        Item::Scope(decl) => {
            for m in &decl.members {
                resolve_members(reg, &m.item, Some(&decl.name))?;
                let vis = m.visibility;
                match &m.item {
                    Item::Function(f) => {
                        if let Some(sig) = reg
                            .functions
                            .iter_mut()
                            .find(|s| {
                                s.scope.as_deref() == Some(&decl.name)
                                    && s.name == f.name
                            })
                        {
                            sig.visibility = vis;
                        }
                    }
                    Item::Var(v) => {
                        if let Some(var) = reg
                            .globals
                            .iter_mut()
                            .find(|g| {
                                g.scope.as_deref() == Some(&decl.name)
                                    && g.name == v.name
                            })
                        {
                            var.visibility = vis;
                        }
                    }
                    _ => {}
                }
            }
        }
        Item::Struct(decl) => {
            let mut fields = Vec::new();
            for f in &decl.fields {
                let ty = reg.resolve_type(&f.ty)?;
                fields.push(FieldInfo {
                    name: f.name.clone(),
                    ty,
                });
            }
            if let Some(info) =
                reg.structs.iter_mut().find(|s| s.name == decl.name)
            {
                info.fields = fields;
            }
        }
        Item::Register(decl) => {
            let mut members = Vec::new();
            for m in &decl.members {
                let ty = reg.resolve_type(&m.ty)?;
                let ok = matches!(
                    &ty.base,
                    BaseType::Prim(p) if p.is_integer()
                ) || ty.is_bitmap();
                if !ok || ty.is_array() {
                    return Err(ErrorKind::WrongKind {
                        name: m.name.clone(),
                        expected: "integer or bitmap register member",
                        actual: "other type",
                    }
                    .at(m.pos));
                }
                members.push(RegisterMember {
                    name: m.name.clone(),
                    offset: m.offset,
                    access: m.access,
                    ty,
                });
            }
            if let Some(info) =
                reg.registers.iter_mut().find(|r| r.name == decl.name)
            {
                info.members = members;
            }
        }
        Item::Callback(decl) => {
            let params = decl
                .params
                .iter()
                .map(|p| reg.resolve_type(p))
                .collect::<Result<Vec<_>>>()?;
            let ret = decl
                .ret
                .as_ref()
                .map(|r| reg.resolve_type(r))
                .transpose()?;
            if let Some(info) =
                reg.callbacks.iter_mut().find(|c| c.name == decl.name)
            {
                info.params = params;
                info.ret = ret;
            }
        }
        Item::Function(decl) => {
            let is_main = scope.is_none() && decl.name == "main";
            let mut params = Vec::new();
            for p in &decl.params {
                if params.iter().any(|e: &ParamSig| e.name == p.name) {
                    return Err(
                        ErrorKind::DuplicateMember(p.name.clone()).at(p.pos)
                    );
                }
                let mut ty = reg.resolve_type(&p.ty)?;
                ty.is_const = p.is_const;
                // main's argument vector maps onto argc/argv, not onto the
                // generic pointer-promotion rules.
                let force_pointer = if is_main {
                    false
                } else {
                    promote_to_pointer(&ty, p.by_value)
                };
                params.push(ParamSig {
                    name: p.name.clone(),
                    ty,
                    is_const: p.is_const,
                    by_value: p.by_value,
                    force_pointer,
                    mutates: false,
                });
            }
            let ret = decl
                .ret
                .as_ref()
                .map(|r| reg.resolve_type(r))
                .transpose()?;
            if let Some(sig) = reg.functions.iter_mut().find(|s| {
                s.scope.as_deref() == scope && s.name == decl.name
            }) {
                sig.params = params;
                sig.ret = ret;
            }
        }
        Item::Var(decl) => {
            let mut ty = reg.resolve_type(&decl.ty)?;
            ty.is_const = decl.modifiers.is_const;
            let folded = decl
                .init
                .as_ref()
                .and_then(|init| consts::fold(reg, init));
            if let Some(var) = reg.globals.iter_mut().find(|g| {
                g.scope.as_deref() == scope && g.name == decl.name
            }) {
                var.ty = ty;
                if decl.modifiers.is_const {
                    if let Some(value) = folded {
                        let key = var.qualified();
                        reg.consts.push((key, value));
                    }
                }
            }
        }
    }
    Ok(())
}

// --- parameter mutation analysis -----------------------------------------

fn analyze_mutations(reg: &mut SymbolRegistry, unit: &Unit) {
    for_each_function(unit, &mut |scope, decl| {
        let mut mutated: Vec<String> = Vec::new();
        collect_mutated(reg, scope, &decl.body, &mut mutated);
        let scope_owned = scope.map(str::to_owned);
        if let Some(sig) = reg.functions.iter_mut().find(|s| {
            s.scope == scope_owned && s.name == decl.name
        }) {
            for p in sig.params.iter_mut() {
                if mutated.contains(&p.name) {
                    p.mutates = true;
                }
            }
        }
    });
}

fn for_each_function<'a>(
    unit: &'a Unit,
    f: &mut impl FnMut(Option<&'a str>, &'a ast::FunctionDecl),
) {
    for item in &unit.items {
        match item {
            Item::Function(decl) => f(None, decl),
            Item::Scope(scope) => {
                for m in &scope.members {
                    if let Item::Function(decl) = &m.item {
                        f(Some(scope.name.as_str()), decl);
                    }
                }
            }
            _ => {}
        }
    }
}

fn collect_mutated(
    reg: &SymbolRegistry,
    scope: Option<&str>,
    block: &ast::Block,
    out: &mut Vec<String>,
) {
    for stmt in &block.stmts {
        collect_mutated_stmt(reg, scope, stmt, out);
    }
}

fn collect_mutated_stmt(
    reg: &SymbolRegistry,
    scope: Option<&str>,
    stmt: &Stmt,
    out: &mut Vec<String>,
) {
    match &stmt.kind {
        StmtKind::Block(b) => collect_mutated(reg, scope, b, out),
        StmtKind::Var(decl) => {
            if let Some(init) = &decl.init {
                collect_mutated_expr(reg, scope, init, out);
            }
        }
        StmtKind::Expr(e) => collect_mutated_expr(reg, scope, e, out),
        StmtKind::Assign { target, value, .. } => {
            if let Some(name) = root_ident(target) {
                push_unique(out, name);
            }
            collect_mutated_expr(reg, scope, value, out);
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_mutated_expr(reg, scope, cond, out);
            collect_mutated(reg, scope, then_branch, out);
            if let Some(b) = else_branch {
                collect_mutated(reg, scope, b, out);
            }
        }
        StmtKind::While { cond, body } => {
            collect_mutated_expr(reg, scope, cond, out);
            collect_mutated(reg, scope, body, out);
        }
        StmtKind::DoWhile { body, cond } => {
            collect_mutated(reg, scope, body, out);
            collect_mutated_expr(reg, scope, cond, out);
        }
        StmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            if let Some(s) = init {
                collect_mutated_stmt(reg, scope, s, out);
            }
            if let Some(c) = cond {
                collect_mutated_expr(reg, scope, c, out);
            }
            if let Some(s) = step {
                collect_mutated_stmt(reg, scope, s, out);
            }
            collect_mutated(reg, scope, body, out);
        }
        StmtKind::Switch {
            scrutinee,
            cases,
            default_body,
            ..
        } => {
            collect_mutated_expr(reg, scope, scrutinee, out);
            for c in cases {
                collect_mutated(reg, scope, &c.body, out);
            }
            collect_mutated(reg, scope, default_body, out);
        }
        StmtKind::Return(value) => {
            if let Some(e) = value {
                collect_mutated_expr(reg, scope, e, out);
            }
        }
        StmtKind::Critical { body, .. } => {
            collect_mutated(reg, scope, body, out)
        }
        StmtKind::Break | StmtKind::Continue => {}
    }
}

/// One hop of transitive tracking: a name passed to a mutating pointer
/// parameter of a known function counts as mutated here too.
fn collect_mutated_expr(
    reg: &SymbolRegistry,
    scope: Option<&str>,
    expr: &Expr,
    out: &mut Vec<String>,
) {
    match &expr.kind {
        ExprKind::Paren(inner) => {
            collect_mutated_expr(reg, scope, inner, out)
        }
        ExprKind::Unary { operand, .. } => {
            collect_mutated_expr(reg, scope, operand, out)
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_mutated_expr(reg, scope, lhs, out);
            collect_mutated_expr(reg, scope, rhs, out);
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_mutated_expr(reg, scope, cond, out);
            collect_mutated_expr(reg, scope, then_branch, out);
            collect_mutated_expr(reg, scope, else_branch, out);
        }
        ExprKind::Postfix { base, ops } => {
            for op in ops {
                match &op.kind {
                    PostfixKind::Call(args) => {
                        mark_call_mutations(reg, scope, base, ops, args, out);
                        for a in args {
                            collect_mutated_expr(reg, scope, a, out);
                        }
                    }
                    PostfixKind::Index(e) => {
                        collect_mutated_expr(reg, scope, e, out)
                    }
                    PostfixKind::BitRange(lo, hi) => {
                        collect_mutated_expr(reg, scope, lo, out);
                        collect_mutated_expr(reg, scope, hi, out);
                    }
                    PostfixKind::Member(_) => {}
                }
            }
        }
        _ => {}
    }
}

fn mark_call_mutations(
    reg: &SymbolRegistry,
    scope: Option<&str>,
    base: &Expr,
    ops: &[ast::PostfixOp],
    args: &[Expr],
    out: &mut Vec<String>,
) {
    // The safe-div/mod intrinsics write their first argument.
    if let ExprKind::Ident(name) = &base.unwrap_parens().kind {
        if (name == "safe_div" || name == "safe_mod") && ops.len() == 1 {
            if let Some(first) = args.first() {
                if let Some(target) = root_ident(first) {
                    push_unique(out, target);
                }
            }
            return;
        }
    }
    let Some(sig) = callee_signature(reg, scope, base, ops) else {
        return;
    };
    for (arg, param) in args.iter().zip(sig.params.iter()) {
        if param.force_pointer && param.mutates {
            if let ExprKind::Ident(name) = &arg.unwrap_parens().kind {
                push_unique(out, name);
            }
        }
    }
}

/// Find the signature a call resolves to, for `f(..)`, `this.f(..)` and
/// `Scope.f(..)` shapes. Anything else is external C or a callback and has
/// no recorded mutation data.
fn callee_signature<'a>(
    reg: &'a SymbolRegistry,
    scope: Option<&str>,
    base: &Expr,
    ops: &[ast::PostfixOp],
) -> Option<&'a FunctionSig> {
    match (&base.unwrap_parens().kind, ops) {
        (ExprKind::Ident(name), [op]) => {
            if matches!(op.kind, PostfixKind::Call(_)) {
                return reg.function(name);
            }
            None
        }
        (ExprKind::This, [member, call]) => {
            match (&member.kind, &call.kind) {
                (PostfixKind::Member(m), PostfixKind::Call(_)) => {
                    reg.scope_function(scope?, m)
                }
                _ => None,
            }
        }
        (ExprKind::Ident(name), [member, call]) => {
            match (&member.kind, &call.kind) {
                (PostfixKind::Member(m), PostfixKind::Call(_)) => {
                    reg.scope_function(name, m)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// The identifier at the root of an lvalue-ish postfix chain.
pub fn root_ident(expr: &Expr) -> Option<&str> {
    match &expr.unwrap_parens().kind {
        ExprKind::Ident(name) => Some(name),
        ExprKind::Postfix { base, .. } => root_ident(base),
        _ => None,
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BitmapDecl, BitmapFieldDecl};
    use crate::errors::SourcePos;

    fn field(name: &str, width: u32, offset: Option<u32>) -> BitmapFieldDecl {
        BitmapFieldDecl {
            name: name.to_owned(),
            width,
            offset,
            pos: SourcePos::UNKNOWN,
        }
    }

    #[test]
    fn bitmap_fields_pack_sequentially() {
        let decl = BitmapDecl {
            name: "Status".into(),
            bits: 8,
            fields: vec![
                field("A", 1, None),
                field("B", 3, None),
                field("C", 4, None),
            ],
            pos: SourcePos::UNKNOWN,
        };
        let info = build_bitmap(&decl).unwrap();
        assert_eq!(info.field("A").unwrap().offset, 0);
        assert_eq!(info.field("B").unwrap().offset, 1);
        assert_eq!(info.field("C").unwrap().offset, 4);
    }

    #[test]
    fn bitmap_overflow_is_rejected() {
        let decl = BitmapDecl {
            name: "Status".into(),
            bits: 8,
            fields: vec![field("A", 5, None), field("B", 4, None)],
            pos: SourcePos::UNKNOWN,
        };
        let err = build_bitmap(&decl).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BitmapOverflow { .. }));
    }

    #[test]
    fn bitmap_overlap_is_rejected() {
        let decl = BitmapDecl {
            name: "Status".into(),
            bits: 16,
            fields: vec![field("A", 4, Some(0)), field("B", 4, Some(2))],
            pos: SourcePos::UNKNOWN,
        };
        let err = build_bitmap(&decl).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BitmapOverlap { .. }));
    }

    #[test]
    fn enum_values_must_fit_backing() {
        let decl = ast::EnumDecl {
            name: "Mode".into(),
            backing: Some("u8".into()),
            members: vec![ast::EnumMember {
                name: "Big".into(),
                value: Some(300),
                pos: SourcePos::UNKNOWN,
            }],
            pos: SourcePos::UNKNOWN,
        };
        assert!(build_enum(&decl).is_err());
    }

    #[test]
    fn pointer_promotion_rules() {
        use crate::ty::Primitive::*;
        let by_val = |p| promote_to_pointer(&TypeInfo::prim(p), false);
        assert!(!by_val(U8));
        assert!(!by_val(I16));
        assert!(!by_val(Bool));
        assert!(!by_val(F32));
        assert!(!by_val(F64));
        assert!(by_val(U32));
        assert!(by_val(I64));
        // Explicit tag wins for primitives.
        assert!(!promote_to_pointer(&TypeInfo::prim(U32), true));
        // Structs travel by pointer even when tagged.
        let s = TypeInfo {
            base: BaseType::Struct("Point".into()),
            dims: vec![],
            is_const: false,
        };
        assert!(promote_to_pointer(&s, true));
    }
}
