//! Code generation.
//!
//! `Generator` is the orchestrator: it owns the mutable effect collector and
//! per-function state, borrows the frozen registry, and exposes the whole
//! capability surface (expression generation, type resolution, registry
//! queries) as methods. The expression, statement and declaration
//! sub-generators are `impl` blocks over this one type in their own files,
//! so no module ever names a peer directly.

pub mod decl;
pub mod effects;
pub mod expr;
pub mod helpers;
pub mod stmt;

use log::debug;

use crate::ast::{Item, Unit, VarModifiers};
use crate::codegen::effects::{Effect, EffectSet, Header};
use crate::errors::Result;
use crate::sema::registry::{FunctionSig, SymbolRegistry};
use crate::sema::resolve::{self, ResolveCtx};
use crate::ty::{BaseType, Primitive, TypeInfo};
use crate::{Output, OutputMode, OverflowPolicy, TranspileConfig};

/// Indentation unit of the emitted C.
pub(crate) const INDENT: &str = "    ";

/// State created on function entry and discarded on exit.
pub(crate) struct FuncState {
    pub sig: FunctionSig,
    /// Locals visible so far, in declaration order (resolver view).
    pub locals: Vec<(String, TypeInfo)>,
    /// Modifiers per local, same order.
    pub local_mods: Vec<(String, VarModifiers)>,
    /// `strlen` memoization: source identifier -> hoisted temp name.
    pub len_cache: Vec<(String, String)>,
    /// Float-bit shadow aliases already declared: source ident -> alias.
    pub float_aliases: Vec<(String, String)>,
    /// Aliases refreshed (memcpy'd) within the current statement.
    pub refreshed_aliases: Vec<String>,
    /// Declarations hoisted to the top of the function body.
    pub entry_temps: Vec<String>,
    /// Temp lines flushed immediately before the current statement.
    pub pending: Vec<String>,
    /// Nesting depth of `critical` blocks, for unique state names.
    pub crit_depth: usize,
    /// Per-statement counter for synthesized argument temps.
    pub temp_counter: usize,
}

impl FuncState {
    pub fn new(sig: FunctionSig) -> Self {
        Self {
            sig,
            locals: Vec::new(),
            local_mods: Vec::new(),
            len_cache: Vec::new(),
            float_aliases: Vec::new(),
            refreshed_aliases: Vec::new(),
            entry_temps: Vec::new(),
            pending: Vec::new(),
            crit_depth: 0,
            temp_counter: 0,
        }
    }

    pub fn local_modifiers(&self, name: &str) -> Option<&VarModifiers> {
        self.local_mods
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }
}

pub struct Generator<'a> {
    pub(crate) cfg: &'a TranspileConfig,
    pub(crate) registry: &'a SymbolRegistry,
    pub(crate) effects: EffectSet,
    /// Scope whose members are currently being lowered.
    pub(crate) scope: Option<String>,
    pub(crate) func: Option<FuncState>,
}

impl<'a> Generator<'a> {
    pub fn new(cfg: &'a TranspileConfig, registry: &'a SymbolRegistry) -> Self {
        Self {
            cfg,
            registry,
            effects: EffectSet::default(),
            scope: None,
            func: None,
        }
    }

    /// Resolver view over the current ambient state.
    pub(crate) fn rctx(&self) -> ResolveCtx<'_> {
        ResolveCtx {
            registry: self.registry,
            scope: self.scope.as_deref(),
            function: self.func.as_ref().map(|f| &f.sig),
            locals: self
                .func
                .as_ref()
                .map(|f| f.locals.as_slice())
                .unwrap_or(&[]),
        }
    }

    pub(crate) fn type_of(&self, e: &crate::ast::Expr) -> Result<TypeInfo> {
        resolve::type_of(&self.rctx(), e)
    }

    /// Emitted C symbol for a possibly scope-qualified name.
    pub(crate) fn c_symbol(&self, scope: Option<&str>, name: &str) -> String {
        match scope {
            Some(s) => format!("{s}{}{name}", self.cfg.mode.separator()),
            None => name.to_owned(),
        }
    }

    /// C spelling of a type's base, recording the includes (and, for
    /// callbacks, the typedef) it needs.
    pub(crate) fn c_base(&mut self, ty: &TypeInfo) -> String {
        match &ty.base {
            BaseType::Prim(p) => {
                self.record_prim_includes(*p);
                p.c_name().to_owned()
            }
            BaseType::Bitmap { name, .. } => {
                self.effects.record(Effect::Include(Header::StdInt));
                name.clone()
            }
            BaseType::Callback(name) => {
                self.effects
                    .record(Effect::CallbackTypedef(name.clone()));
                if let Some(cb) = self.registry.callback(name) {
                    let prims: Vec<_> = cb
                        .params
                        .iter()
                        .chain(cb.ret.as_ref())
                        .filter_map(TypeInfo::scalar_prim)
                        .collect();
                    for p in prims {
                        self.record_prim_includes(p);
                    }
                }
                name.clone()
            }
            _ => ty.c_base_name(self.cfg.mode),
        }
    }

    pub(crate) fn record_prim_includes(&mut self, p: Primitive) {
        if p.is_integer() {
            self.effects.record(Effect::Include(Header::StdInt));
        }
        if p == Primitive::Bool && self.cfg.mode == OutputMode::C {
            self.effects.record(Effect::Include(Header::StdBool));
        }
    }

    /// Overflow policy governing writes to a named variable.
    pub(crate) fn policy_of(&self, name: &str) -> OverflowPolicy {
        if let Some(f) = &self.func {
            if let Some(mods) = f.local_modifiers(name) {
                return mods.overflow.unwrap_or(self.cfg.overflow);
            }
            if f.sig.params.iter().any(|p| p.name == name) {
                return self.cfg.overflow;
            }
        }
        let scoped = self
            .scope
            .as_deref()
            .and_then(|s| self.registry.scope_var(s, name));
        if let Some(v) = scoped.or_else(|| self.registry.global(name)) {
            return v.modifiers.overflow.unwrap_or(self.cfg.overflow);
        }
        self.cfg.overflow
    }

    /// Whether a named variable carries the `atomic` modifier.
    pub(crate) fn is_atomic(&self, name: &str) -> bool {
        if let Some(f) = &self.func {
            if let Some(mods) = f.local_modifiers(name) {
                return mods.atomic;
            }
        }
        let scoped = self
            .scope
            .as_deref()
            .and_then(|s| self.registry.scope_var(s, name));
        scoped
            .or_else(|| self.registry.global(name))
            .map(|v| v.modifiers.atomic)
            .unwrap_or(false)
    }
}

/// Generate one translation unit against a frozen registry.
pub fn generate_unit(
    unit: &Unit,
    cfg: &TranspileConfig,
    registry: &SymbolRegistry,
) -> Result<Output> {
    let mut g = Generator::new(cfg, registry);

    let mut decls = String::new();
    for item in &unit.items {
        let code = g.item(item).map_err(|e| e.in_decl(item.name()))?;
        if !code.is_empty() {
            decls.push_str(&code);
            decls.push('\n');
        }
    }

    // Each prelude group already ends in a blank line.
    let mut code = g.prelude();
    code.push_str(&decls);
    debug!("generated {} bytes of {:?}", code.len(), cfg.mode);

    Ok(Output {
        code,
        effects: g.effects.into_manifest(),
    })
}

impl Generator<'_> {
    fn item(&mut self, item: &Item) -> Result<String> {
        match item {
            Item::Include(d) => {
                self.effects.record(Effect::Include(Header::User {
                    header: d.header.clone(),
                    system: d.system,
                }));
                Ok(String::new())
            }
            Item::Scope(d) => self.scope_decl(d),
            Item::Struct(d) => self.struct_decl(d),
            Item::Enum(d) => self.enum_decl(d),
            Item::Bitmap(d) => self.bitmap_decl(d),
            Item::Register(d) => self.register_decl(d),
            Item::Callback(_) => {
                // The typedef is demanded by first use and emitted in the
                // prelude; the declaration itself produces no inline text.
                Ok(String::new())
            }
            Item::Function(d) => self.function_decl(d, None),
            Item::Var(d) => self.global_var_decl(d, None),
        }
    }

    /// Assemble includes, asserts, macros, callback typedefs and helper
    /// definitions, in first-occurrence order within each group.
    fn prelude(&mut self) -> String {
        let mut includes = Vec::new();
        let mut asserts = Vec::new();
        let mut macros = Vec::new();
        let mut typedefs = Vec::new();
        let mut helper_defs = Vec::new();
        let mut needs_critical = false;

        for effect in self.effects.iter() {
            match effect {
                Effect::Include(h) => {
                    includes.push(h.render(self.cfg.mode));
                }
                Effect::FloatAssert { bits64 } => {
                    asserts.push(helpers::render_float_assert(
                        *bits64,
                        self.cfg.mode,
                    ));
                }
                Effect::MaskMacro => {
                    macros.push(helpers::MASK_MACRO.to_owned());
                }
                Effect::CallbackTypedef(name) => {
                    if let Some(cb) = self.registry.callback(name) {
                        let params = if cb.params.is_empty() {
                            "void".to_owned()
                        } else {
                            cb.params
                                .iter()
                                .map(|t| t.c_base_name(self.cfg.mode))
                                .collect::<Vec<_>>()
                                .join(", ")
                        };
                        let ret = cb
                            .ret
                            .as_ref()
                            .map(|t| t.c_base_name(self.cfg.mode))
                            .unwrap_or_else(|| "void".to_owned());
                        typedefs.push(format!(
                            "typedef {ret} (*{name})({params});"
                        ));
                    }
                }
                Effect::Helper { op, prim } => {
                    helper_defs.push(helpers::render_helper(
                        *op,
                        *prim,
                        self.cfg.debug,
                    ));
                }
                Effect::CriticalSection => {
                    needs_critical = true;
                }
            }
        }
        if needs_critical {
            helper_defs.push(helpers::render_critical_pair());
        }

        let mut out = String::new();
        for group in [includes, asserts, macros, typedefs] {
            if group.is_empty() {
                continue;
            }
            for line in group {
                out.push_str(&line);
                out.push('\n');
            }
            out.push('\n');
        }
        for def in helper_defs {
            out.push_str(&def);
            out.push('\n');
        }
        out
    }
}
