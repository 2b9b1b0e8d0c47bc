//! Conservative definite-initialization analysis.
//!
//! A local must be assigned on every path reaching a use. Branches join by
//! intersection, switch bodies (which always carry a default) join across
//! all arms, and loops only establish initialization when their body runs
//! unconditionally, i.e. `do..while`. A diverging branch (return/break/
//! continue) does not constrain the join.

use std::collections::HashSet;

use crate::ast::{
    Block, Expr, ExprKind, FunctionDecl, PostfixKind, Stmt, StmtKind,
};
use crate::errors::{ErrorKind, Result};

/// Outcome of walking a statement or block.
enum Flow {
    Normal,
    /// All paths returned, broke or continued.
    Diverged,
}

struct Env {
    /// Locals declared so far, in declaration order.
    declared: Vec<String>,
    /// Names definitely assigned at this point (params included).
    assigned: HashSet<String>,
}

impl Env {
    fn is_tracked(&self, name: &str) -> bool {
        self.declared.iter().any(|n| n == name)
    }
}

/// Check one function body. Parameters count as assigned.
pub fn check_function(decl: &FunctionDecl) -> Result<()> {
    let mut env = Env {
        declared: Vec::new(),
        assigned: decl.params.iter().map(|p| p.name.clone()).collect(),
    };
    check_block(&mut env, &decl.body)?;
    Ok(())
}

fn check_block(env: &mut Env, block: &Block) -> Result<Flow> {
    let declared_at_entry = env.declared.len();
    let mut flow = Flow::Normal;
    for stmt in &block.stmts {
        if let Flow::Diverged = check_stmt(env, stmt)? {
            flow = Flow::Diverged;
            break;
        }
    }
    // Block-local declarations do not outlive the block.
    for name in env.declared.split_off(declared_at_entry) {
        env.assigned.remove(&name);
    }
    Ok(flow)
}

fn check_stmt(env: &mut Env, stmt: &Stmt) -> Result<Flow> {
    match &stmt.kind {
        StmtKind::Block(b) => check_block(env, b),
        StmtKind::Var(decl) => {
            if let Some(init) = &decl.init {
                check_uses(env, init)?;
            }
            env.declared.push(decl.name.clone());
            if decl.init.is_some() {
                env.assigned.insert(decl.name.clone());
            }
            Ok(Flow::Normal)
        }
        StmtKind::Expr(e) => {
            check_uses(env, e)?;
            Ok(Flow::Normal)
        }
        StmtKind::Assign { target, op, value } => {
            let plain = matches!(
                &target.unwrap_parens().kind,
                ExprKind::Ident(_)
            );
            // A compound assignment or any projected target (field, index)
            // reads before writing; plain `x <- v` reads nothing.
            if !plain || op.binary().is_some() {
                check_uses(env, target)?;
            }
            check_uses(env, value)?;
            if plain {
                if let ExprKind::Ident(name) = &target.unwrap_parens().kind {
                    if env.is_tracked(name) {
                        env.assigned.insert(name.clone());
                    }
                }
            }
            Ok(Flow::Normal)
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            check_uses(env, cond)?;
            let mut then_env = Env {
                declared: env.declared.clone(),
                assigned: env.assigned.clone(),
            };
            let then_flow = check_block(&mut then_env, then_branch)?;
            let (else_flow, else_assigned) = match else_branch {
                Some(b) => {
                    let mut else_env = Env {
                        declared: env.declared.clone(),
                        assigned: env.assigned.clone(),
                    };
                    let f = check_block(&mut else_env, b)?;
                    (f, else_env.assigned)
                }
                None => (Flow::Normal, env.assigned.clone()),
            };
            match (then_flow, else_flow) {
                (Flow::Normal, Flow::Normal) => {
                    env.assigned = then_env
                        .assigned
                        .intersection(&else_assigned)
                        .cloned()
                        .collect();
                    Ok(Flow::Normal)
                }
                (Flow::Normal, Flow::Diverged) => {
                    env.assigned = then_env.assigned;
                    Ok(Flow::Normal)
                }
                (Flow::Diverged, Flow::Normal) => {
                    env.assigned = else_assigned;
                    Ok(Flow::Normal)
                }
                (Flow::Diverged, Flow::Diverged) => Ok(Flow::Diverged),
            }
        }
        StmtKind::While { cond, body } => {
            check_uses(env, cond)?;
            let mut body_env = Env {
                declared: env.declared.clone(),
                assigned: env.assigned.clone(),
            };
            check_block(&mut body_env, body)?;
            // The body may never run; its assignments do not escape.
            Ok(Flow::Normal)
        }
        StmtKind::DoWhile { body, cond } => {
            // Entered unconditionally, so assignments establish init.
            let flow = check_block(env, body)?;
            check_uses(env, cond)?;
            Ok(flow)
        }
        StmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            let declared_at_entry = env.declared.len();
            if let Some(s) = init {
                check_stmt(env, s)?;
            }
            if let Some(c) = cond {
                check_uses(env, c)?;
            }
            let mut body_env = Env {
                declared: env.declared.clone(),
                assigned: env.assigned.clone(),
            };
            check_block(&mut body_env, body)?;
            if let Some(s) = step {
                check_stmt(&mut body_env, s)?;
            }
            for name in env.declared.split_off(declared_at_entry) {
                env.assigned.remove(&name);
            }
            Ok(Flow::Normal)
        }
        StmtKind::Switch {
            scrutinee,
            cases,
            default_body,
            ..
        } => {
            check_uses(env, scrutinee)?;
            let mut joined: Option<HashSet<String>> = None;
            let mut all_diverged = true;
            let bodies = cases
                .iter()
                .map(|c| {
                    check_uses(env, &c.value)?;
                    Ok(&c.body)
                })
                .collect::<Result<Vec<_>>>()?;
            for body in bodies.into_iter().chain(std::iter::once(default_body))
            {
                let mut arm_env = Env {
                    declared: env.declared.clone(),
                    assigned: env.assigned.clone(),
                };
                match check_block(&mut arm_env, body)? {
                    Flow::Normal => {
                        all_diverged = false;
                        joined = Some(match joined.take() {
                            None => arm_env.assigned,
                            Some(prev) => prev
                                .intersection(&arm_env.assigned)
                                .cloned()
                                .collect(),
                        });
                    }
                    Flow::Diverged => {}
                }
            }
            if all_diverged {
                return Ok(Flow::Diverged);
            }
            if let Some(j) = joined {
                env.assigned = j;
            }
            Ok(Flow::Normal)
        }
        StmtKind::Return(value) => {
            if let Some(e) = value {
                check_uses(env, e)?;
            }
            Ok(Flow::Diverged)
        }
        StmtKind::Critical { body, .. } => check_block(env, body),
        StmtKind::Break | StmtKind::Continue => Ok(Flow::Diverged),
    }
}

fn check_uses(env: &mut Env, expr: &Expr) -> Result<()> {
    match &expr.kind {
        ExprKind::Ident(name) => {
            if env.is_tracked(name) && !env.assigned.contains(name) {
                return Err(
                    ErrorKind::UninitializedUse(name.clone()).at(expr.pos)
                );
            }
            Ok(())
        }
        ExprKind::Paren(inner) => check_uses(env, inner),
        ExprKind::Unary { operand, .. } => check_uses(env, operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            check_uses(env, lhs)?;
            check_uses(env, rhs)
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            check_uses(env, cond)?;
            check_uses(env, then_branch)?;
            check_uses(env, else_branch)
        }
        ExprKind::Postfix { base, ops } => {
            // The safe-div/mod intrinsics write their first argument, so it
            // does not need prior initialization and becomes assigned.
            if let ExprKind::Ident(callee) = &base.unwrap_parens().kind {
                if callee == "safe_div" || callee == "safe_mod" {
                    if let [op] = &ops[..] {
                        if let PostfixKind::Call(args) = &op.kind {
                            if let Some((out, rest)) = args.split_first() {
                                for a in rest {
                                    check_uses(env, a)?;
                                }
                                if let ExprKind::Ident(name) =
                                    &out.unwrap_parens().kind
                                {
                                    if env.is_tracked(name) {
                                        env.assigned.insert(name.clone());
                                    }
                                }
                                return Ok(());
                            }
                        }
                    }
                }
            }
            check_uses(env, base)?;
            for op in ops {
                match &op.kind {
                    PostfixKind::Member(_) => {}
                    PostfixKind::Index(e) => check_uses(env, e)?,
                    PostfixKind::BitRange(lo, hi) => {
                        check_uses(env, lo)?;
                        check_uses(env, hi)?;
                    }
                    PostfixKind::Call(args) => {
                        for a in args {
                            check_uses(env, a)?;
                        }
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, ParamDecl, Radix, TypeExpr, VarModifiers};
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

    fn ident(name: &str) -> Expr {
        Expr {
            kind: ExprKind::Ident(name.to_owned()),
            pos: SourcePos::UNKNOWN,
        }
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt {
            kind,
            pos: SourcePos::UNKNOWN,
        }
    }

    fn block(stmts: Vec<Stmt>) -> Block {
        Block {
            stmts,
            pos: SourcePos::UNKNOWN,
        }
    }

    fn var(name: &str, init: Option<Expr>) -> Stmt {
        stmt(StmtKind::Var(crate::ast::VarDecl {
            name: name.to_owned(),
            ty: TypeExpr::named("u32"),
            modifiers: VarModifiers::default(),
            init,
            pos: SourcePos::UNKNOWN,
        }))
    }

    fn assign(name: &str, value: Expr) -> Stmt {
        stmt(StmtKind::Assign {
            target: ident(name),
            op: AssignOp::Set,
            value,
        })
    }

    fn func(body: Vec<Stmt>) -> FunctionDecl {
        FunctionDecl {
            name: "f".to_owned(),
            params: Vec::<ParamDecl>::new(),
            ret: None,
            body: block(body),
            pos: SourcePos::UNKNOWN,
        }
    }

    fn cond() -> Expr {
        Expr {
            kind: ExprKind::Binary {
                op: crate::ast::BinaryOp::Lt,
                lhs: Box::new(int(1)),
                rhs: Box::new(int(2)),
            },
            pos: SourcePos::UNKNOWN,
        }
    }

    #[test]
    fn one_armed_if_does_not_initialize() {
        let f = func(vec![
            var("x", None),
            stmt(StmtKind::If {
                cond: cond(),
                then_branch: block(vec![assign("x", int(1))]),
                else_branch: None,
            }),
            stmt(StmtKind::Return(Some(ident("x")))),
        ]);
        let err = check_function(&f).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UninitializedUse("x".into()));
    }

    #[test]
    fn both_arms_initialize() {
        let f = func(vec![
            var("x", None),
            stmt(StmtKind::If {
                cond: cond(),
                then_branch: block(vec![assign("x", int(1))]),
                else_branch: Some(block(vec![assign("x", int(2))])),
            }),
            stmt(StmtKind::Return(Some(ident("x")))),
        ]);
        assert!(check_function(&f).is_ok());
    }

    #[test]
    fn while_body_does_not_establish_init() {
        let f = func(vec![
            var("x", None),
            stmt(StmtKind::While {
                cond: cond(),
                body: block(vec![assign("x", int(1))]),
            }),
            stmt(StmtKind::Return(Some(ident("x")))),
        ]);
        assert!(check_function(&f).is_err());
    }

    #[test]
    fn do_while_establishes_init() {
        let f = func(vec![
            var("x", None),
            stmt(StmtKind::DoWhile {
                body: block(vec![assign("x", int(1))]),
                cond: cond(),
            }),
            stmt(StmtKind::Return(Some(ident("x")))),
        ]);
        assert!(check_function(&f).is_ok());
    }

    #[test]
    fn diverging_else_leaves_then_assignments() {
        let f = func(vec![
            var("x", None),
            stmt(StmtKind::If {
                cond: cond(),
                then_branch: block(vec![assign("x", int(1))]),
                else_branch: Some(block(vec![stmt(StmtKind::Return(None))])),
            }),
            stmt(StmtKind::Return(Some(ident("x")))),
        ]);
        assert!(check_function(&f).is_ok());
    }

    #[test]
    fn compound_assignment_reads_first() {
        let f = func(vec![
            var("x", None),
            stmt(StmtKind::Assign {
                target: ident("x"),
                op: AssignOp::Add,
                value: int(1),
            }),
        ]);
        assert!(check_function(&f).is_err());
    }
}
