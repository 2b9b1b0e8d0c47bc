//! The parse tree handed over by the external parser.
//!
//! Lexing and parsing are outside this crate; the parser serializes trees in
//! this shape (the `cnx-tools` binary reads them as JSON). Every node carries
//! the source position the parser recorded for it.

use serde::{Deserialize, Serialize};

use crate::errors::SourcePos;
use crate::OverflowPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Include(IncludeDecl),
    Scope(ScopeDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Bitmap(BitmapDecl),
    Register(RegisterDecl),
    Callback(CallbackDecl),
    Function(FunctionDecl),
    Var(VarDecl),
}

impl Item {
    /// Declared name, used to annotate errors at declaration boundaries.
    pub fn name(&self) -> &str {
        match self {
            Item::Include(d) => &d.header,
            Item::Scope(d) => &d.name,
            Item::Struct(d) => &d.name,
            Item::Enum(d) => &d.name,
            Item::Bitmap(d) => &d.name,
            Item::Register(d) => &d.name,
            Item::Callback(d) => &d.name,
            Item::Function(d) => &d.name,
            Item::Var(d) => &d.name,
        }
    }

    pub fn pos(&self) -> SourcePos {
        match self {
            Item::Include(d) => d.pos,
            Item::Scope(d) => d.pos,
            Item::Struct(d) => d.pos,
            Item::Enum(d) => d.pos,
            Item::Bitmap(d) => d.pos,
            Item::Register(d) => d.pos,
            Item::Callback(d) => d.pos,
            Item::Function(d) => d.pos,
            Item::Var(d) => d.pos,
        }
    }
}

/// A `#include` passed through from the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeDecl {
    pub header: String,
    /// `<header>` when true, `"header"` otherwise.
    pub system: bool,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDecl {
    pub name: String,
    pub members: Vec<ScopeMember>,
    #[serde(default)]
    pub pos: SourcePos,
}

/// A scope member is a function or variable declaration plus its visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeMember {
    pub visibility: Visibility,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<StructField>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: TypeExpr,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    /// Explicit backing type annotation, e.g. `u8`. Absent means the default
    /// `i32` value range applies.
    #[serde(default)]
    pub backing: Option<String>,
    pub members: Vec<EnumMember>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    /// Explicit value; absent means previous value plus one (zero for the
    /// first member).
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmapDecl {
    pub name: String,
    /// Backing width: 8, 16, 24, 32 or 64.
    pub bits: u8,
    pub fields: Vec<BitmapFieldDecl>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmapFieldDecl {
    pub name: String,
    /// Field width in bits; a bare name is one bit.
    #[serde(default = "one")]
    pub width: u32,
    /// Explicit bit offset; absent means first bit after the previous field.
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub pos: SourcePos,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDecl {
    pub name: String,
    pub address: u64,
    pub members: Vec<RegisterMemberDecl>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMemberDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub access: AccessMode,
    pub offset: u64,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Ro,
    Rw,
    Wo,
    W1c,
    W1s,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::Ro | AccessMode::Rw)
    }

    pub fn writable(self) -> bool {
        !matches!(self, AccessMode::Ro)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackDecl {
    pub name: String,
    pub params: Vec<TypeExpr>,
    #[serde(default)]
    pub ret: Option<TypeExpr>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub ret: Option<TypeExpr>,
    pub body: Block,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeExpr,
    #[serde(default)]
    pub is_const: bool,
    /// Explicit pass-by-value tag overriding the pointer-promotion rules.
    #[serde(default)]
    pub by_value: bool,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeExpr,
    #[serde(default)]
    pub modifiers: VarModifiers,
    #[serde(default)]
    pub init: Option<Expr>,
    #[serde(default)]
    pub pos: SourcePos,
}

/// Declaration modifiers, already normalized: `atomic wrap u32` and
/// `wrap atomic u32` parse to the same record, so modifier ordering cannot
/// influence emission.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct VarModifiers {
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub atomic: bool,
    /// `wrap` or `clamp`; absent means the configured file default.
    #[serde(default)]
    pub overflow: Option<OverflowPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeExpr {
    /// Primitive name, `string`, or the name of a struct, enum, bitmap or
    /// callback declared earlier in the file.
    pub name: String,
    /// Array dimensions, outermost first.
    #[serde(default)]
    pub dims: Vec<u64>,
    /// String capacity in characters, excluding the terminator.
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub pos: SourcePos,
}

impl TypeExpr {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            dims: Vec::new(),
            capacity: None,
            pos: SourcePos::UNKNOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Block(Block),
    Var(VarDecl),
    Expr(Expr),
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Block,
        #[serde(default)]
        else_branch: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Block,
    },
    Switch {
        scrutinee: Expr,
        cases: Vec<SwitchCase>,
        /// The `N` of the mandatory `default(N)` clause.
        default_count: u32,
        default_body: Block,
    },
    Return(Option<Expr>),
    /// `critical (guard) { .. }`: interrupts disabled around the body.
    Critical {
        guard: String,
        body: Block,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Block,
    #[serde(default)]
    pub pos: SourcePos,
}

/// Assignment operators: `<-` and its compound forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    /// The binary operator a compound assignment expands to.
    pub fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Set => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default)]
    pub pos: SourcePos,
}

impl Expr {
    /// See through parentheses.
    pub fn unwrap_parens(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.unwrap_parens(),
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Radix {
    Dec,
    Hex,
    Bin,
}

impl Default for Radix {
    fn default() -> Self {
        Radix::Dec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Int {
        value: i128,
        #[serde(default)]
        radix: Radix,
        /// Explicit width suffix, e.g. `42u64`.
        #[serde(default)]
        suffix: Option<crate::ty::Primitive>,
    },
    Float {
        /// Literal text as written, without the suffix.
        text: String,
        #[serde(default)]
        suffix: Option<crate::ty::Primitive>,
    },
    Bool(bool),
    Str(String),
    Ident(String),
    This,
    Global,
    Paren(Box<Expr>),
    Postfix {
        base: Box<Expr>,
        ops: Vec<PostfixOp>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostfixOp {
    pub kind: PostfixKind,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostfixKind {
    /// `.ident`
    Member(String),
    /// `[expr]`
    Index(Box<Expr>),
    /// `[lo, hi]` inclusive bit range
    BitRange(Box<Expr>, Box<Expr>),
    /// `(args)`
    Call(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `~`
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn c_token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(self, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor)
    }
}
