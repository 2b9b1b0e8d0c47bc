//! Declaration lowering.
//!
//! One C declaration per source declaration, in source order. Scopes flatten
//! to prefixed file-scope symbols (namespaces in C++), registers become
//! volatile-qualified address macros, bitmaps become typedefs of their
//! backing integer, and functions get the pointer-promotion treatment for
//! their parameters.

use crate::ast::{
    BitmapDecl, EnumDecl, FunctionDecl, RegisterDecl, ScopeDecl, StructDecl,
    VarDecl, Visibility,
};
use crate::codegen::effects::{Effect, Header};
use crate::codegen::expr::ExprCtx;
use crate::codegen::{FuncState, Generator, INDENT};
use crate::errors::{ErrorKind, Result};
use crate::sema::init;
use crate::sema::resolve::check_assignable;
use crate::ty::{BaseType, Primitive, TypeInfo};
use crate::OutputMode;

impl Generator<'_> {
    // --- scopes ----------------------------------------------------------

    pub(crate) fn scope_decl(&mut self, decl: &ScopeDecl) -> Result<String> {
        let prev = self.scope.replace(decl.name.clone());
        let result = self.scope_decl_inner(decl);
        self.scope = prev;
        result
    }

    fn scope_decl_inner(&mut self, decl: &ScopeDecl) -> Result<String> {
        let mut out = String::new();
        let cpp = self.cfg.mode == OutputMode::Cpp;
        if cpp {
            out.push_str(&format!("namespace {} {{\n\n", decl.name));
        }
        for member in &decl.members {
            let is_static = member.visibility == Visibility::Private;
            let code = match &member.item {
                crate::ast::Item::Function(f) => {
                    self.function_decl(f, Some(is_static))
                }
                crate::ast::Item::Var(v) => {
                    self.global_var_decl(v, Some(is_static))
                }
                other => Err(ErrorKind::WrongKind {
                    name: other.name().to_owned(),
                    expected: "function or variable",
                    actual: "declaration",
                }
                .at(other.pos())),
            }
            .map_err(|e| e.in_decl(member.item.name()))?;
            out.push_str(&code);
            out.push('\n');
        }
        if cpp {
            out.push_str(&format!("}} // namespace {}\n", decl.name));
        } else if out.ends_with("\n\n") {
            out.pop();
        }
        Ok(out)
    }

    // --- structs, enums, bitmaps, registers ------------------------------

    pub(crate) fn struct_decl(&mut self, decl: &StructDecl) -> Result<String> {
        let info = self
            .registry
            .struct_info(&decl.name)
            .ok_or_else(|| {
                ErrorKind::UnknownSymbol(decl.name.clone()).at(decl.pos)
            })?
            .clone();
        let mut out = "typedef struct {\n".to_owned();
        for field in &info.fields {
            let declarator =
                self.c_declarator(&field.ty, &field.name, false, false);
            out.push_str(&format!("{INDENT}{declarator};\n"));
        }
        out.push_str(&format!("}} {};\n", decl.name));
        Ok(out)
    }

    pub(crate) fn enum_decl(&mut self, decl: &EnumDecl) -> Result<String> {
        let info = self
            .registry
            .enum_info(&decl.name)
            .ok_or_else(|| {
                ErrorKind::UnknownSymbol(decl.name.clone()).at(decl.pos)
            })?
            .clone();
        let mut out = String::new();
        match self.cfg.mode {
            OutputMode::C => {
                out.push_str("typedef enum {\n");
                for (i, (name, value)) in info.members.iter().enumerate() {
                    let sep = if i + 1 == info.members.len() { "" } else { "," };
                    out.push_str(&format!(
                        "{INDENT}{}_{name} = {value}{sep}\n",
                        decl.name
                    ));
                }
                out.push_str(&format!("}} {};\n", decl.name));
            }
            OutputMode::Cpp => {
                self.effects.record(Effect::Include(Header::StdInt));
                out.push_str(&format!(
                    "enum class {} : {} {{\n",
                    decl.name,
                    info.backing.c_name()
                ));
                for (i, (name, value)) in info.members.iter().enumerate() {
                    let sep = if i + 1 == info.members.len() { "" } else { "," };
                    out.push_str(&format!("{INDENT}{name} = {value}{sep}\n"));
                }
                out.push_str("};\n");
            }
        }
        Ok(out)
    }

    /// A bitmap is just its backing integer; field access inlines the
    /// shifts and masks at every use site.
    pub(crate) fn bitmap_decl(&mut self, decl: &BitmapDecl) -> Result<String> {
        let info = self
            .registry
            .bitmap(&decl.name)
            .ok_or_else(|| {
                ErrorKind::UnknownSymbol(decl.name.clone()).at(decl.pos)
            })?
            .clone();
        self.effects.record(Effect::Include(Header::StdInt));
        Ok(format!(
            "typedef {} {};\n",
            info.bits.backing().c_name(),
            decl.name
        ))
    }

    /// Each member becomes a macro over a volatile access at a constant
    /// address; the address arithmetic folds here, never at use sites.
    pub(crate) fn register_decl(
        &mut self,
        decl: &RegisterDecl,
    ) -> Result<String> {
        let info = self
            .registry
            .register(&decl.name)
            .ok_or_else(|| {
                ErrorKind::UnknownSymbol(decl.name.clone()).at(decl.pos)
            })?
            .clone();
        self.effects.record(Effect::Include(Header::StdInt));
        let mut out = String::new();
        for member in &info.members {
            let address = info.address + member.offset;
            let backing = match &member.ty.base {
                BaseType::Prim(p) => *p,
                BaseType::Bitmap { bits, .. } => bits.backing(),
                _ => Primitive::U32,
            };
            out.push_str(&format!(
                "#define {}_{} (*(volatile {} *)0x{address:X}U)\n",
                decl.name,
                member.name,
                backing.c_name()
            ));
        }
        Ok(out)
    }

    // --- functions -------------------------------------------------------

    pub(crate) fn function_decl(
        &mut self,
        decl: &FunctionDecl,
        scope_static: Option<bool>,
    ) -> Result<String> {
        let scope = self.scope.clone();
        let sig = match &scope {
            Some(s) => self.registry.scope_function(s, &decl.name),
            None => self.registry.function(&decl.name),
        }
        .ok_or_else(|| {
            ErrorKind::UnknownSymbol(decl.name.clone()).at(decl.pos)
        })?
        .clone();

        // Definite initialization is checked before any code is produced.
        init::check_function(decl)?;

        let header = self.signature(&sig, scope_static)?;

        self.func = Some(FuncState::new(sig));
        let body = self.block(&decl.body, 1);
        let func = self.func.take().expect("function state present");
        let body = body?;

        let mut out = header;
        out.push_str(" {\n");
        for temp in &func.entry_temps {
            out.push_str(INDENT);
            out.push_str(temp);
            out.push('\n');
        }
        out.push_str(&body);
        out.push_str("}\n");
        Ok(out)
    }

    fn signature(
        &mut self,
        sig: &crate::sema::registry::FunctionSig,
        scope_static: Option<bool>,
    ) -> Result<String> {
        if sig.is_main {
            return Ok("int main(int argc, char **argv)".to_owned());
        }
        let ret = match &sig.ret {
            Some(t) => self.c_base(t),
            None => "void".to_owned(),
        };
        let cname = match (&sig.scope, self.cfg.mode) {
            (Some(_), OutputMode::Cpp) => sig.name.clone(),
            (scope, _) => self.c_symbol(scope.as_deref(), &sig.name),
        };
        let mut params = Vec::new();
        for p in &sig.params {
            params.push(self.param_decl(p)?);
        }
        let params = if params.is_empty() {
            "void".to_owned()
        } else {
            params.join(", ")
        };
        let storage = match scope_static {
            Some(true) => "static ",
            _ => "",
        };
        Ok(format!("{storage}{ret} {cname}({params})"))
    }

    fn param_decl(
        &mut self,
        p: &crate::sema::registry::ParamSig,
    ) -> Result<String> {
        let base = self.c_base(&p.ty);
        // Unmutated pointer parameters are const-qualified.
        let constness = if p.force_pointer && (p.is_const || !p.mutates) {
            "const "
        } else {
            ""
        };
        if p.ty.is_array() {
            let dims: String = p
                .ty
                .dims
                .iter()
                .map(|d| format!("[{d}U]"))
                .collect();
            return Ok(format!("{constness}{base} {}{dims}", p.name));
        }
        if p.ty.is_string() {
            return Ok(format!("{constness}char *{}", p.name));
        }
        if p.force_pointer {
            return Ok(format!("{constness}{base} *{}", p.name));
        }
        Ok(format!("{base} {}", p.name))
    }

    // --- variables -------------------------------------------------------

    pub(crate) fn global_var_decl(
        &mut self,
        decl: &VarDecl,
        scope_static: Option<bool>,
    ) -> Result<String> {
        let scope = self.scope.clone();
        let var = match &scope {
            Some(s) => self.registry.scope_var(s, &decl.name),
            None => self.registry.global(&decl.name),
        }
        .ok_or_else(|| {
            ErrorKind::UnknownSymbol(decl.name.clone()).at(decl.pos)
        })?
        .clone();
        let ty = effective_string_type(&var.ty, decl);

        let policy = decl.modifiers.overflow.unwrap_or(self.cfg.overflow);
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

        let cname = match (&scope, self.cfg.mode) {
            (Some(_), OutputMode::Cpp) => decl.name.clone(),
            (s, _) => self.c_symbol(s.as_deref(), &decl.name),
        };
        let declarator = self.c_declarator(
            &ty,
            &cname,
            decl.modifiers.atomic,
            decl.modifiers.is_const,
        );
        let storage = match scope_static {
            Some(true) => "static ",
            _ => "",
        };
        match init_code {
            Some(init) => Ok(format!("{storage}{declarator} = {init};\n")),
            None => Ok(format!("{storage}{declarator};\n")),
        }
    }
}

/// Strings without a declared capacity inherit it from a literal
/// initializer, mirroring the local-variable rule.
fn effective_string_type(ty: &TypeInfo, decl: &VarDecl) -> TypeInfo {
    let mut ty = ty.clone();
    if let BaseType::Str { capacity: None } = &ty.base {
        if let Some(init) = &decl.init {
            if let crate::ast::ExprKind::Str(s) = &init.unwrap_parens().kind {
                ty.base = BaseType::Str {
                    capacity: Some(s.len() as u32),
                };
            }
        }
    }
    ty
}
