use rstest::rstest;

use crate::ast::*;
use crate::errors::{ErrorKind, SourcePos};
use crate::ty::Primitive;
use crate::{transpile, OutputMode, OverflowPolicy, TranspileConfig};

// --- parse tree builders -------------------------------------------------

fn e(kind: ExprKind) -> Expr {
    Expr {
        kind,
        pos: SourcePos::UNKNOWN,
    }
}

fn int(v: i128) -> Expr {
    e(ExprKind::Int {
        value: v,
        radix: Radix::Dec,
        suffix: None,
    })
}

fn ident(name: &str) -> Expr {
    e(ExprKind::Ident(name.to_owned()))
}

fn member(base: Expr, name: &str) -> Expr {
    e(ExprKind::Postfix {
        base: Box::new(base),
        ops: vec![PostfixOp {
            kind: PostfixKind::Member(name.to_owned()),
            pos: SourcePos::UNKNOWN,
        }],
    })
}

fn index(base: Expr, idx: Expr) -> Expr {
    e(ExprKind::Postfix {
        base: Box::new(base),
        ops: vec![PostfixOp {
            kind: PostfixKind::Index(Box::new(idx)),
            pos: SourcePos::UNKNOWN,
        }],
    })
}

fn call(base: Expr, args: Vec<Expr>) -> Expr {
    e(ExprKind::Postfix {
        base: Box::new(base),
        ops: vec![PostfixOp {
            kind: PostfixKind::Call(args),
            pos: SourcePos::UNKNOWN,
        }],
    })
}

fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    e(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

fn cmp() -> Expr {
    bin(BinaryOp::Lt, int(1), int(2))
}

fn ty(name: &str) -> TypeExpr {
    TypeExpr::named(name)
}

fn s(kind: StmtKind) -> Stmt {
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

fn var(name: &str, type_name: &str, init: Option<Expr>) -> VarDecl {
    VarDecl {
        name: name.to_owned(),
        ty: ty(type_name),
        modifiers: VarModifiers::default(),
        init,
        pos: SourcePos::UNKNOWN,
    }
}

fn var_with(
    name: &str,
    type_name: &str,
    modifiers: VarModifiers,
    init: Option<Expr>,
) -> VarDecl {
    VarDecl {
        name: name.to_owned(),
        ty: ty(type_name),
        modifiers,
        init,
        pos: SourcePos::UNKNOWN,
    }
}

fn assign(target: Expr, op: AssignOp, value: Expr) -> Stmt {
    s(StmtKind::Assign { target, op, value })
}

fn func(name: &str, params: Vec<ParamDecl>, ret: Option<&str>, body: Vec<Stmt>) -> Item {
    Item::Function(FunctionDecl {
        name: name.to_owned(),
        params,
        ret: ret.map(ty),
        body: block(body),
        pos: SourcePos::UNKNOWN,
    })
}

fn param(name: &str, type_name: &str) -> ParamDecl {
    ParamDecl {
        name: name.to_owned(),
        ty: ty(type_name),
        is_const: false,
        by_value: false,
        pos: SourcePos::UNKNOWN,
    }
}

fn unit(items: Vec<Item>) -> Unit {
    Unit { items }
}

fn cfg() -> TranspileConfig {
    TranspileConfig::default()
}

fn bitmap8(name: &str, fields: &[(&str, u32)]) -> Item {
    Item::Bitmap(BitmapDecl {
        name: name.to_owned(),
        bits: 8,
        fields: fields
            .iter()
            .map(|(n, w)| BitmapFieldDecl {
                name: (*n).to_owned(),
                width: *w,
                offset: None,
                pos: SourcePos::UNKNOWN,
            })
            .collect(),
        pos: SourcePos::UNKNOWN,
    })
}

// --- spec scenarios ------------------------------------------------------

/// `u32 a <- 4000000000; u32 b <- a + 1000000000;` under a clamping
/// default lowers the addition onto the saturating helper.
#[test]
fn clamped_u32_addition_uses_helper() {
    let u = unit(vec![
        Item::Var(var("a", "u32", Some(int(4_000_000_000)))),
        Item::Var(var(
            "b",
            "u32",
            Some(bin(BinaryOp::Add, ident("a"), int(1_000_000_000))),
        )),
    ]);
    let mut c = cfg();
    c.overflow = OverflowPolicy::Clamp;
    let out = transpile(&u, &c).unwrap();
    assert!(out.code.contains("#include <stdint.h>"));
    assert!(out
        .code
        .contains("uint32_t b = cnx_clamp_add_u32(a, 1000000000U);"));
    assert!(out.code.contains("static inline uint32_t cnx_clamp_add_u32"));
    assert!(out.code.contains("return UINT32_MAX;"));
}

/// `clamp i8 y <- x; y +<- 20;` goes through the widened helper.
#[test]
fn clamped_i8_compound_add() {
    let clamp = VarModifiers {
        overflow: Some(OverflowPolicy::Clamp),
        ..VarModifiers::default()
    };
    let u = unit(vec![func(
        "tick",
        vec![],
        None,
        vec![
            s(StmtKind::Var(var("x", "i8", Some(int(120))))),
            s(StmtKind::Var(var_with("y", "i8", clamp, Some(ident("x"))))),
            assign(ident("y"), AssignOp::Add, int(20)),
        ],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("y = cnx_clamp_add_i8(y, 20);"));
    // Narrow signed arithmetic computes in the wider type.
    assert!(out.code.contains("int32_t wide = (int32_t)a + (int32_t)b;"));
    assert!(out.code.contains("return INT8_MAX;"));
}

/// Bitmap field writes mask-and-shift in place; single-bit reads are a
/// shift-and-mask of bit zero.
#[test]
fn bitmap_field_access_inlines_masks() {
    let u = unit(vec![
        bitmap8("S", &[("A", 1), ("B", 3), ("C", 4)]),
        func(
            "tick",
            vec![],
            None,
            vec![
                s(StmtKind::Var(var("s", "S", Some(int(0))))),
                assign(member(ident("s"), "B"), AssignOp::Set, int(5)),
                s(StmtKind::Var(var(
                    "a",
                    "bool",
                    Some(member(ident("s"), "A")),
                ))),
            ],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("typedef uint8_t S;"));
    assert!(out
        .code
        .contains("s = (S)((s & ~(0x7U << 1U)) | (((5U) & 0x7U) << 1U));"));
    assert!(out.code.contains("bool a = ((s >> 0U) & 0x1U);"));
}

/// Reading a w1c register member is a compile-time error.
#[test]
fn w1c_register_member_cannot_be_read() {
    let u = unit(vec![
        Item::Register(RegisterDecl {
            name: "GPIO".to_owned(),
            address: 0x4000,
            members: vec![RegisterMemberDecl {
                name: "STAT".to_owned(),
                ty: ty("u32"),
                access: AccessMode::W1c,
                offset: 0,
                pos: SourcePos::UNKNOWN,
            }],
            pos: SourcePos::UNKNOWN,
        }),
        func(
            "tick",
            vec![],
            None,
            vec![s(StmtKind::Var(var(
                "v",
                "u32",
                Some(member(ident("GPIO"), "STAT")),
            )))],
        ),
    ]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WriteOnlyRead("STAT".into()));
}

/// A variable assigned on only one branch is not definitely initialized.
#[test]
fn one_armed_initialization_is_rejected() {
    let u = unit(vec![func(
        "tick",
        vec![],
        Some("u32"),
        vec![
            s(StmtKind::Var(var("x", "u32", None))),
            s(StmtKind::If {
                cond: cmp(),
                then_branch: block(vec![assign(
                    ident("x"),
                    AssignOp::Set,
                    int(1),
                )]),
                else_branch: None,
            }),
            s(StmtKind::Return(Some(ident("x")))),
        ],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UninitializedUse("x".into()));
    assert_eq!(err.decl.as_deref(), Some("tick"));
}

/// Shifting a u32 by 32 is out of range.
#[test]
fn shift_equal_to_width_is_rejected() {
    let u = unit(vec![func(
        "tick",
        vec![],
        None,
        vec![
            s(StmtKind::Var(var("v", "u32", Some(int(1))))),
            s(StmtKind::Var(var(
                "r",
                "u32",
                Some(bin(BinaryOp::Shl, ident("v"), int(32))),
            ))),
        ],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::ShiftBeyondWidth {
            amount: 32,
            width: 32
        }
    );
}

// --- universal properties ------------------------------------------------

fn clamp_unit() -> (Unit, TranspileConfig) {
    let u = unit(vec![
        Item::Var(var("a", "u32", Some(int(1)))),
        Item::Var(var(
            "b",
            "u32",
            Some(bin(BinaryOp::Add, ident("a"), int(2))),
        )),
        Item::Var(var(
            "c",
            "u32",
            Some(bin(BinaryOp::Add, ident("b"), int(3))),
        )),
    ]);
    let mut c = cfg();
    c.overflow = OverflowPolicy::Clamp;
    (u, c)
}

#[test]
fn generation_is_deterministic() {
    let (u, c) = clamp_unit();
    let first = transpile(&u, &c).unwrap();
    let second = transpile(&u, &c).unwrap();
    assert_eq!(first.code, second.code);
    assert_eq!(first.effects, second.effects);
}

#[test]
fn helpers_are_emitted_once() {
    let (u, c) = clamp_unit();
    let out = transpile(&u, &c).unwrap();
    let defs = out
        .code
        .matches("static inline uint32_t cnx_clamp_add_u32")
        .count();
    assert_eq!(defs, 1);
}

#[test]
fn headers_only_appear_when_referenced() {
    let u = unit(vec![Item::Var(var("a", "u32", Some(int(1))))]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("<stdint.h>"));
    assert!(!out.code.contains("<stdbool.h>"));
    assert!(!out.code.contains("<string.h>"));
    assert!(!out.code.contains("<stdio.h>"));
}

#[test]
fn scope_members_get_prefixed_names() {
    let u = unit(vec![Item::Scope(ScopeDecl {
        name: "Led".to_owned(),
        members: vec![
            ScopeMember {
                visibility: Visibility::Private,
                item: Item::Var(var("count", "u32", Some(int(0)))),
            },
            ScopeMember {
                visibility: Visibility::Public,
                item: func(
                    "toggle",
                    vec![],
                    None,
                    vec![assign(
                        member(e(ExprKind::This), "count"),
                        AssignOp::Add,
                        int(1),
                    )],
                ),
            },
        ],
        pos: SourcePos::UNKNOWN,
    })]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("static uint32_t Led_count = 0U;"));
    assert!(out.code.contains("void Led_toggle(void)"));
    assert!(out.code.contains("Led_count = Led_count + 1U;"));
}

#[test]
fn private_members_are_invisible_across_scopes() {
    let u = unit(vec![
        Item::Scope(ScopeDecl {
            name: "Led".to_owned(),
            members: vec![ScopeMember {
                visibility: Visibility::Private,
                item: Item::Var(var("count", "u32", Some(int(0)))),
            }],
            pos: SourcePos::UNKNOWN,
        }),
        func(
            "peek",
            vec![],
            None,
            vec![s(StmtKind::Var(var(
                "v",
                "u32",
                Some(member(ident("Led"), "count")),
            )))],
        ),
    ]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::PrivateMember { .. }));
}

#[test]
fn own_scope_must_use_this() {
    let u = unit(vec![Item::Scope(ScopeDecl {
        name: "Led".to_owned(),
        members: vec![
            ScopeMember {
                visibility: Visibility::Public,
                item: Item::Var(var("count", "u32", Some(int(0)))),
            },
            ScopeMember {
                visibility: Visibility::Public,
                item: func(
                    "bump",
                    vec![],
                    None,
                    vec![assign(
                        member(ident("Led"), "count"),
                        AssignOp::Set,
                        int(1),
                    )],
                ),
            },
        ],
        pos: SourcePos::UNKNOWN,
    })]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::OwnScopeByName("Led".into()));
}

#[rstest]
#[case("u8", "uint8_t x")]
#[case("i16", "int16_t x")]
#[case("bool", "bool x")]
#[case("f32", "float x")]
#[case("u32", "const uint32_t *x")]
#[case("i64", "const int64_t *x")]
fn parameter_passing_is_stable(#[case] tyname: &str, #[case] expected: &str) {
    let u = unit(vec![func("probe", vec![param("x", tyname)], None, vec![])]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(
        out.code.contains(expected),
        "expected `{expected}` in:\n{}",
        out.code
    );
}

#[test]
fn mutated_pointer_parameters_lose_const() {
    let u = unit(vec![func(
        "bump",
        vec![param("x", "u32")],
        None,
        vec![assign(ident("x"), AssignOp::Add, int(1))],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("void bump(uint32_t *x)"));
    assert!(out.code.contains("(*x) = (*x) + 1U;"));
}

#[test]
fn struct_parameters_arrive_by_pointer() {
    let u = unit(vec![
        Item::Struct(StructDecl {
            name: "Point".to_owned(),
            fields: vec![
                StructField {
                    name: "x".to_owned(),
                    ty: ty("i32"),
                    pos: SourcePos::UNKNOWN,
                },
                StructField {
                    name: "y".to_owned(),
                    ty: ty("i32"),
                    pos: SourcePos::UNKNOWN,
                },
            ],
            pos: SourcePos::UNKNOWN,
        }),
        func(
            "norm",
            vec![param("p", "Point")],
            Some("i32"),
            vec![s(StmtKind::Return(Some(member(ident("p"), "x"))))],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("int32_t norm(const Point *p)"));
    assert!(out.code.contains("return p->x;"));
}

#[test]
fn register_members_lower_to_volatile_macros() {
    let u = unit(vec![Item::Register(RegisterDecl {
        name: "GPIO".to_owned(),
        address: 0x4800_0000,
        members: vec![
            RegisterMemberDecl {
                name: "ODR".to_owned(),
                ty: ty("u32"),
                access: AccessMode::Rw,
                offset: 0x14,
                pos: SourcePos::UNKNOWN,
            },
            RegisterMemberDecl {
                name: "IDR".to_owned(),
                ty: ty("u32"),
                access: AccessMode::Ro,
                offset: 0x10,
                pos: SourcePos::UNKNOWN,
            },
        ],
        pos: SourcePos::UNKNOWN,
    })]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out
        .code
        .contains("#define GPIO_ODR (*(volatile uint32_t *)0x48000014U)"));
    assert!(out
        .code
        .contains("#define GPIO_IDR (*(volatile uint32_t *)0x48000010U)"));
}

#[test]
fn read_only_register_member_rejects_writes() {
    let u = unit(vec![
        Item::Register(RegisterDecl {
            name: "GPIO".to_owned(),
            address: 0x4000,
            members: vec![RegisterMemberDecl {
                name: "IDR".to_owned(),
                ty: ty("u32"),
                access: AccessMode::Ro,
                offset: 0,
                pos: SourcePos::UNKNOWN,
            }],
            pos: SourcePos::UNKNOWN,
        }),
        func(
            "poke",
            vec![],
            None,
            vec![assign(
                member(ident("GPIO"), "IDR"),
                AssignOp::Set,
                int(1),
            )],
        ),
    ]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReadOnlyWrite("IDR".into()));
}

#[test]
fn critical_blocks_save_and_restore_state() {
    let u = unit(vec![
        Item::Var(var("counter", "u32", Some(int(0)))),
        func(
            "bump",
            vec![],
            None,
            vec![s(StmtKind::Critical {
                guard: "counter".to_owned(),
                body: block(vec![assign(
                    ident("counter"),
                    AssignOp::Add,
                    int(1),
                )]),
            })],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out
        .code
        .contains("uint32_t cnx_crit_state0 = cnx_critical_enter();"));
    assert!(out.code.contains("cnx_critical_exit(cnx_crit_state0);"));
    assert!(out.code.contains("static inline uint32_t cnx_critical_enter"));
}

#[test]
fn atomic_without_hardware_support_goes_critical() {
    let atomic = VarModifiers {
        atomic: true,
        ..VarModifiers::default()
    };
    let u = unit(vec![
        Item::Var(var_with("counter", "u32", atomic, Some(int(0)))),
        func(
            "bump",
            vec![],
            None,
            vec![assign(ident("counter"), AssignOp::Add, int(1))],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("cnx_critical_enter()"));
    assert!(!out.code.contains("_Atomic"));
}

#[test]
fn atomic_with_hardware_support_uses_c11_atomics() {
    let atomic = VarModifiers {
        atomic: true,
        ..VarModifiers::default()
    };
    let u = unit(vec![
        Item::Var(var_with("counter", "u32", atomic, Some(int(0)))),
        func(
            "bump",
            vec![],
            None,
            vec![assign(ident("counter"), AssignOp::Add, int(1))],
        ),
    ]);
    let mut c = cfg();
    c.atomic = true;
    let out = transpile(&u, &c).unwrap();
    assert!(out.code.contains("_Atomic uint32_t counter = 0U;"));
    assert!(out.code.contains("#include <stdatomic.h>"));
    // A compound assignment stays one C11 read-modify-write.
    assert!(out.code.contains("counter += 1U;"));
    assert!(!out.code.contains("cnx_critical_enter()"));
}

#[test]
fn safe_div_lowers_to_helper() {
    let u = unit(vec![func(
        "div",
        vec![param("a", "u16"), param("b", "u16")],
        None,
        vec![
            s(StmtKind::Var(var("q", "u16", None))),
            s(StmtKind::Expr(call(
                ident("safe_div"),
                vec![ident("q"), ident("a"), ident("b"), int(0)],
            ))),
        ],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("cnx_safe_div_u16(&q, a, b, 0U);"));
    assert!(out.code.contains("static inline void cnx_safe_div_u16"));
}

#[test]
fn literal_zero_division_is_rejected() {
    let u = unit(vec![func(
        "bad",
        vec![param("a", "u8")],
        Some("u8"),
        vec![s(StmtKind::Return(Some(bin(
            BinaryOp::Div,
            ident("a"),
            int(0),
        ))))],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
}

#[test]
fn ternary_conditions_must_compare() {
    let u = unit(vec![func(
        "pick",
        vec![param("flag", "bool")],
        Some("u8"),
        vec![s(StmtKind::Return(Some(e(ExprKind::Ternary {
            cond: Box::new(ident("flag")),
            then_branch: Box::new(int(1)),
            else_branch: Box::new(int(2)),
        }))))],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TernaryConditionNotComparison);
}

#[test]
fn integer_conditions_are_rejected() {
    let u = unit(vec![func(
        "spin",
        vec![param("n", "u8")],
        None,
        vec![s(StmtKind::While {
            cond: ident("n"),
            body: block(vec![]),
        })],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NonBooleanCondition(_)));
}

#[test]
fn array_bounds_are_checked_for_literals() {
    let u = unit(vec![func(
        "probe",
        vec![],
        None,
        vec![
            s(StmtKind::Var(VarDecl {
                name: "buf".to_owned(),
                ty: TypeExpr {
                    name: "u8".to_owned(),
                    dims: vec![4],
                    capacity: None,
                    pos: SourcePos::UNKNOWN,
                },
                modifiers: VarModifiers::default(),
                init: None,
                pos: SourcePos::UNKNOWN,
            })),
            assign(index(ident("buf"), int(4)), AssignOp::Set, int(0)),
        ],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::ArrayIndexOutOfBounds { index: 4, len: 4 }
    );
}

#[test]
fn bit_reads_on_scalars_use_shift_and_mask() {
    let u = unit(vec![func(
        "probe",
        vec![param("v", "u8")],
        Some("bool"),
        vec![s(StmtKind::Return(Some(index(ident("v"), int(3)))))],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("return ((v >> 3U) & 0x1U);"));
}

#[test]
fn bit_index_beyond_width_is_rejected() {
    let u = unit(vec![func(
        "probe",
        vec![param("v", "u8")],
        Some("bool"),
        vec![s(StmtKind::Return(Some(index(ident("v"), int(8)))))],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::BitIndexOutOfBounds { index: 8, width: 8 }
    );
}

#[test]
fn const_locals_cannot_be_assigned() {
    let konst = VarModifiers {
        is_const: true,
        ..VarModifiers::default()
    };
    let u = unit(vec![func(
        "tick",
        vec![],
        None,
        vec![
            s(StmtKind::Var(var_with("limit", "u32", konst, Some(int(10))))),
            assign(ident("limit"), AssignOp::Set, int(11)),
        ],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConstAssigned("limit".into()));
}

#[test]
fn switch_on_enum_checks_default_count() {
    let enum_decl = Item::Enum(EnumDecl {
        name: "Mode".to_owned(),
        backing: None,
        members: ["Idle", "Run", "Stop"]
            .iter()
            .map(|n| EnumMember {
                name: (*n).to_owned(),
                value: None,
                pos: SourcePos::UNKNOWN,
            })
            .collect(),
        pos: SourcePos::UNKNOWN,
    });
    let switch = |count: u32| {
        s(StmtKind::Switch {
            scrutinee: ident("m"),
            cases: vec![SwitchCase {
                value: member(ident("Mode"), "Idle"),
                body: block(vec![s(StmtKind::Return(None))]),
                pos: SourcePos::UNKNOWN,
            }],
            default_count: count,
            default_body: block(vec![]),
        })
    };
    let build = |count| {
        unit(vec![
            enum_decl.clone(),
            func("step", vec![param("m", "Mode")], None, vec![switch(count)]),
        ])
    };

    let err = transpile(&build(1), &cfg()).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::DefaultCountMismatch {
            expected: 1,
            actual: 2
        }
    );

    let out = transpile(&build(2), &cfg()).unwrap();
    assert!(out.code.contains("case Mode_Idle: {"));
    assert!(out.code.contains("default: {"));
}

#[test]
fn main_lowers_to_argc_argv() {
    let u = unit(vec![func(
        "main",
        vec![ParamDecl {
            name: "args".to_owned(),
            ty: TypeExpr {
                name: "string".to_owned(),
                dims: vec![0],
                capacity: None,
                pos: SourcePos::UNKNOWN,
            },
            is_const: false,
            by_value: false,
            pos: SourcePos::UNKNOWN,
        }],
        Some("i32"),
        vec![
            s(StmtKind::Var(var(
                "n",
                "u32",
                Some(member(ident("args"), "length")),
            ))),
            s(StmtKind::Return(Some(int(0)))),
        ],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("int main(int argc, char **argv)"));
    assert!(out.code.contains("uint32_t n = (uint32_t)argc;"));
}

#[test]
fn string_length_is_memoized_per_parameter() {
    let u = unit(vec![func(
        "measure",
        vec![param("name", "string")],
        Some("u32"),
        vec![s(StmtKind::Return(Some(bin(
            BinaryOp::Add,
            member(ident("name"), "length"),
            member(ident("name"), "length"),
        ))))],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert_eq!(out.code.matches("strlen(name)").count(), 1);
    assert!(out
        .code
        .contains("const uint32_t cnx_len_name = (uint32_t)strlen(name);"));
    assert!(out.code.contains("return cnx_len_name + cnx_len_name;"));
    assert!(out.code.contains("#include <string.h>"));
}

#[test]
fn cpp_mode_uses_scoped_names_and_enum_class() {
    let u = unit(vec![
        Item::Enum(EnumDecl {
            name: "Mode".to_owned(),
            backing: Some("u8".to_owned()),
            members: vec![EnumMember {
                name: "Idle".to_owned(),
                value: None,
                pos: SourcePos::UNKNOWN,
            }],
            pos: SourcePos::UNKNOWN,
        }),
        Item::Scope(ScopeDecl {
            name: "Led".to_owned(),
            members: vec![ScopeMember {
                visibility: Visibility::Public,
                item: Item::Var(var("count", "u32", Some(int(0)))),
            }],
            pos: SourcePos::UNKNOWN,
        }),
        func(
            "peek",
            vec![],
            Some("u32"),
            vec![s(StmtKind::Return(Some(member(ident("Led"), "count"))))],
        ),
    ]);
    let mut c = cfg();
    c.mode = OutputMode::Cpp;
    let out = transpile(&u, &c).unwrap();
    assert!(out.code.contains("enum class Mode : uint8_t {"));
    assert!(out.code.contains("namespace Led {"));
    assert!(out.code.contains("return Led::count;"));
}

#[test]
fn const_scope_members_fold_at_use() {
    let konst = VarModifiers {
        is_const: true,
        ..VarModifiers::default()
    };
    let u = unit(vec![Item::Scope(ScopeDecl {
        name: "Cfg".to_owned(),
        members: vec![
            ScopeMember {
                visibility: Visibility::Public,
                item: Item::Var(var_with("LIMIT", "u32", konst, Some(int(16)))),
            },
            ScopeMember {
                visibility: Visibility::Public,
                item: func(
                    "limit",
                    vec![],
                    Some("u32"),
                    vec![s(StmtKind::Return(Some(member(
                        e(ExprKind::This),
                        "LIMIT",
                    ))))],
                ),
            },
        ],
        pos: SourcePos::UNKNOWN,
    })]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("return 16U;"));
}

#[test]
fn unsigned_literals_get_misra_suffixes() {
    let u = unit(vec![
        Item::Var(var("a", "u64", Some(int(7)))),
        Item::Var(var("b", "u16", Some(int(7)))),
        Item::Var(var("c", "i32", Some(int(7)))),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("uint64_t a = 7ULL;"));
    assert!(out.code.contains("uint16_t b = 7U;"));
    assert!(out.code.contains("int32_t c = 7;"));
}

#[test]
fn bitwise_not_casts_back_to_operand_type() {
    let u = unit(vec![func(
        "flip",
        vec![param("v", "u8")],
        Some("u8"),
        vec![s(StmtKind::Return(Some(e(ExprKind::Unary {
            op: UnaryOp::BitNot,
            operand: Box::new(ident("v")),
        }))))],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("return (uint8_t)(~v);"));
}

#[test]
fn wrap_i64_goes_through_unsigned() {
    let wrap = VarModifiers {
        overflow: Some(OverflowPolicy::Wrap),
        ..VarModifiers::default()
    };
    let u = unit(vec![func(
        "advance",
        vec![param("a", "i64"), param("b", "i64")],
        None,
        vec![
            s(StmtKind::Var(var_with("t", "i64", wrap, Some(int(0))))),
            assign(
                ident("t"),
                AssignOp::Set,
                bin(BinaryOp::Add, ident("a"), ident("b")),
            ),
        ],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out
        .code
        .contains("(int64_t)((uint64_t)((*a)) + (uint64_t)((*b)))"));
}

#[test]
fn nested_ternary_is_rejected() {
    let inner = e(ExprKind::Ternary {
        cond: Box::new(cmp()),
        then_branch: Box::new(int(1)),
        else_branch: Box::new(int(2)),
    });
    let u = unit(vec![func(
        "pick",
        vec![],
        Some("u8"),
        vec![s(StmtKind::Return(Some(e(ExprKind::Ternary {
            cond: Box::new(cmp()),
            then_branch: Box::new(inner),
            else_branch: Box::new(int(3)),
        }))))],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NestedTernary);
}

#[test]
fn unknown_symbols_are_reported_with_decl() {
    let u = unit(vec![func(
        "tick",
        vec![],
        None,
        vec![s(StmtKind::Var(var("v", "u32", Some(ident("missing")))))],
    )]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownSymbol("missing".into()));
    assert_eq!(err.decl.as_deref(), Some("tick"));
}

#[test]
fn user_includes_pass_through_in_order() {
    let u = unit(vec![
        Item::Include(IncludeDecl {
            header: "hal.h".to_owned(),
            system: false,
            pos: SourcePos::UNKNOWN,
        }),
        Item::Var(var("a", "u32", Some(int(1)))),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    let hal = out.code.find("#include \"hal.h\"").unwrap();
    let stdint = out.code.find("#include <stdint.h>").unwrap();
    assert!(hal < stdint);
}

#[test]
fn effect_manifest_mirrors_prelude() {
    let (u, c) = clamp_unit();
    let out = transpile(&u, &c).unwrap();
    use crate::codegen::effects::{Effect, Header, HelperOp};
    assert!(out.effects.contains(&Effect::Include(Header::StdInt)));
    assert!(out.effects.contains(&Effect::Helper {
        op: HelperOp::ClampAdd,
        prim: Primitive::U32
    }));
}

#[test]
fn debug_mode_panics_in_helpers() {
    let (u, mut c) = clamp_unit();
    c.debug = true;
    let out = transpile(&u, &c).unwrap();
    assert!(out.code.contains("PANIC: u32 add overflow"));
    assert!(out.code.contains("#include <stdio.h>"));
    assert!(out.code.contains("#include <stdlib.h>"));
}

#[test]
fn float_bit_access_goes_through_shadow() {
    let u = unit(vec![func(
        "mantissa",
        vec![param("f", "f32")],
        Some("u32"),
        vec![s(StmtKind::Return(Some(e(ExprKind::Postfix {
            base: Box::new(ident("f")),
            ops: vec![PostfixOp {
                kind: PostfixKind::BitRange(
                    Box::new(int(0)),
                    Box::new(int(22)),
                ),
                pos: SourcePos::UNKNOWN,
            }],
        }))))],
    )]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("uint32_t cnx_bits_f;"));
    assert!(out
        .code
        .contains("(void)memcpy(&cnx_bits_f, &f, sizeof(f));"));
    assert!(out.code.contains("return (cnx_bits_f & 0x7FFFFFU);"));
    assert!(out
        .code
        .contains("_Static_assert(sizeof(float) == 4U"));
}

#[test]
fn callback_parameters_emit_one_typedef() {
    let u = unit(vec![
        Item::Callback(CallbackDecl {
            name: "tick_cb".to_owned(),
            params: vec![ty("u32")],
            ret: None,
            pos: SourcePos::UNKNOWN,
        }),
        func(
            "set_handler",
            vec![param("cb", "tick_cb")],
            None,
            vec![s(StmtKind::Expr(call(ident("cb"), vec![int(1)])))],
        ),
        func(
            "set_other",
            vec![param("cb", "tick_cb")],
            None,
            vec![],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert_eq!(
        out.code
            .matches("typedef void (*tick_cb)(uint32_t);")
            .count(),
        1
    );
    assert!(out.code.contains("cb(1U);"));
}

#[test]
fn global_sentinel_reaches_past_shadowing_locals() {
    let u = unit(vec![
        Item::Var(var("tick", "u32", Some(int(1)))),
        func(
            "probe",
            vec![],
            Some("u32"),
            vec![
                s(StmtKind::Var(var("tick", "u32", Some(int(2))))),
                s(StmtKind::Return(Some(member(
                    e(ExprKind::Global),
                    "tick",
                )))),
            ],
        ),
    ]);
    let err = transpile(&u, &cfg()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AmbiguousReference("tick".into()));

    let clean = unit(vec![
        Item::Var(var("tick", "u32", Some(int(1)))),
        func(
            "probe",
            vec![],
            Some("u32"),
            vec![s(StmtKind::Return(Some(member(
                e(ExprKind::Global),
                "tick",
            ))))],
        ),
    ]);
    let out = transpile(&clean, &cfg()).unwrap();
    assert!(out.code.contains("return tick;"));
}

#[test]
fn wide_primitives_pass_by_pointer_at_call_sites() {
    let u = unit(vec![
        func(
            "sink",
            vec![param("v", "u32")],
            None,
            vec![],
        ),
        func(
            "feed",
            vec![],
            None,
            vec![
                s(StmtKind::Var(var("x", "u32", Some(int(5))))),
                s(StmtKind::Expr(call(ident("sink"), vec![ident("x")]))),
            ],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    assert!(out.code.contains("sink(&x);"));
}

#[test]
fn one_hop_mutation_marks_caller_parameter() {
    let u = unit(vec![
        func(
            "inc",
            vec![param("x", "u32")],
            None,
            vec![assign(ident("x"), AssignOp::Add, int(1))],
        ),
        func(
            "relay",
            vec![param("y", "u32")],
            None,
            vec![s(StmtKind::Expr(call(ident("inc"), vec![ident("y")])))],
        ),
    ]);
    let out = transpile(&u, &cfg()).unwrap();
    // Both signatures drop const: inc writes directly, relay forwards to a
    // mutating parameter.
    assert!(out.code.contains("void inc(uint32_t *x)"));
    assert!(out.code.contains("void relay(uint32_t *y)"));
    // An existing pointer is forwarded, not re-addressed.
    assert!(out.code.contains("inc(y);"));
}
