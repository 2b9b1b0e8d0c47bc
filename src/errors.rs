use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = CompileError> = core::result::Result<T, E>;

/// 1-based line/column of a parse tree node. The parser is responsible for
/// filling these in; `UNKNOWN` is only used by synthesized nodes in tests.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub const UNKNOWN: SourcePos = SourcePos { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Every compile-time failure the transpiler can report. One variant per
/// kind; the message is the one-line human form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("`{member}` is private to scope `{scope}`")]
    PrivateMember { scope: String, member: String },
    #[error("scope `{0}` must refer to its own members through `this`")]
    OwnScopeByName(String),
    #[error("`{0}` resolves to more than one symbol")]
    AmbiguousReference(String),
    #[error("`{name}` is a {actual}, expected a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch { expected: String, found: String },
    #[error("condition must be boolean, found `{0}`")]
    NonBooleanCondition(String),
    #[error("ternary branches may not contain another ternary")]
    NestedTernary,
    #[error("ternary condition must be a comparison")]
    TernaryConditionNotComparison,
    #[error("ternary condition may not contain a function call")]
    TernaryConditionHasCall,
    #[error("shift amount {amount} reaches beyond the {width}-bit operand")]
    ShiftBeyondWidth { amount: i128, width: u32 },
    #[error("bit index {index} is out of bounds for a {width}-bit value")]
    BitIndexOutOfBounds { index: i128, width: u32 },
    #[error("index {index} is out of bounds for an array of {len} elements")]
    ArrayIndexOutOfBounds { index: i128, len: u64 },
    #[error("division by literal zero")]
    DivisionByZero,
    #[error("cannot assign to const `{0}`")]
    ConstAssigned(String),
    #[error("const `{arg}` passed to non-const parameter `{param}`")]
    ConstToNonConst { arg: String, param: String },
    #[error("`{0}` may be read before it is assigned")]
    UninitializedUse(String),
    #[error("bitmap `{bitmap}` has no field `{field}`")]
    UnknownBitmapField { bitmap: String, field: String },
    #[error("register member `{0}` is write-only and cannot be read")]
    WriteOnlyRead(String),
    #[error("register member `{0}` is read-only and cannot be written")]
    ReadOnlyWrite(String),
    #[error("bitmap fields `{first}` and `{second}` overlap")]
    BitmapOverlap { first: String, second: String },
    #[error("bitmap `{bitmap}` fields exceed its {bits}-bit backing type")]
    BitmapOverflow { bitmap: String, bits: u8 },
    #[error("duplicate member `{0}`")]
    DuplicateMember(String),
    #[error("bit access on floats is only available inside function bodies")]
    UnsupportedFloatBitOp,
    #[error(
        "switch `default({expected})` does not match the \
         {actual} unhandled enum members"
    )]
    DefaultCountMismatch { expected: u32, actual: u32 },
    #[error("`{0}` is not callable")]
    NotCallable(String),
    #[error("`{name}` expects {expected} arguments, found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl ErrorKind {
    /// Attach a source position, producing a reportable error.
    pub fn at(self, pos: SourcePos) -> CompileError {
        CompileError {
            kind: self,
            pos,
            decl: None,
            remediation: None,
        }
    }
}

/// A compile-time failure: the kind, where it happened, the declaration the
/// orchestrator was processing, and an optional remediation hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub pos: SourcePos,
    pub decl: Option<String>,
    pub remediation: Option<&'static str>,
}

impl CompileError {
    /// Annotate with the nearest enclosing declaration name. The first
    /// annotation wins so the innermost declaration is reported.
    pub fn in_decl(mut self, name: &str) -> Self {
        if self.decl.is_none() {
            self.decl = Some(name.to_owned());
        }
        self
    }

    pub fn with_remediation(mut self, hint: &'static str) -> Self {
        self.remediation = Some(hint);
        self
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.pos, self.kind)?;
        if let Some(decl) = &self.decl {
            write!(f, " (in `{decl}`)")?;
        }
        if let Some(hint) = self.remediation {
            write!(f, "; help: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_position_and_decl() {
        let err = ErrorKind::UnknownSymbol("tick".into())
            .at(SourcePos::new(3, 14))
            .in_decl("Timer");
        assert_eq!(err.to_string(), "3:14: unknown symbol `tick` (in `Timer`)");
    }

    #[test]
    fn first_decl_annotation_wins() {
        let err = ErrorKind::DivisionByZero
            .at(SourcePos::new(1, 1))
            .in_decl("inner")
            .in_decl("outer");
        assert_eq!(err.decl.as_deref(), Some("inner"));
    }

    #[test]
    fn remediation_is_appended() {
        let err = ErrorKind::OwnScopeByName("Led".into())
            .at(SourcePos::new(2, 5))
            .with_remediation("use `this` instead of the scope name");
        assert!(err.to_string().ends_with("use `this` instead of the scope name"));
    }
}
