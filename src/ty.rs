use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::OutputMode;

/// The closed set of primitive C-Next types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "bool" => Self::Bool,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
        }
    }

    /// Canonical C spelling used in emission.
    pub fn c_name(self) -> &'static str {
        match self {
            Self::U8 => "uint8_t",
            Self::U16 => "uint16_t",
            Self::U32 => "uint32_t",
            Self::U64 => "uint64_t",
            Self::I8 => "int8_t",
            Self::I16 => "int16_t",
            Self::I32 => "int32_t",
            Self::I64 => "int64_t",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::Bool => "bool",
        }
    }

    /// Bit width. `bool` is a single semantic bit; `.length` on a scalar
    /// reports this value.
    pub fn bits(self) -> u32 {
        match self {
            Self::U8 | Self::I8 => 8,
            Self::U16 | Self::I16 => 16,
            Self::U32 | Self::I32 | Self::F32 => 32,
            Self::U64 | Self::I64 | Self::F64 => 64,
            Self::Bool => 1,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64 | Self::Bool)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn is_numeric(self) -> bool {
        self != Self::Bool
    }

    /// The intermediate type used for arithmetic on narrow operands so the
    /// operation itself cannot overflow or hit undefined behavior. The
    /// widest types map to themselves.
    pub fn wider(self) -> Primitive {
        match self {
            Self::I8 | Self::I16 => Self::I32,
            Self::I32 => Self::I64,
            Self::U8 | Self::U16 => Self::U32,
            Self::U32 => Self::U64,
            other => other,
        }
    }

    /// C literal naming this type's maximum, for clamp/panic helpers.
    pub fn max_literal(self) -> &'static str {
        match self {
            Self::U8 => "UINT8_MAX",
            Self::U16 => "UINT16_MAX",
            Self::U32 => "UINT32_MAX",
            Self::U64 => "UINT64_MAX",
            Self::I8 => "INT8_MAX",
            Self::I16 => "INT16_MAX",
            Self::I32 => "INT32_MAX",
            Self::I64 => "INT64_MAX",
            Self::F32 => "FLT_MAX",
            Self::F64 => "DBL_MAX",
            Self::Bool => "true",
        }
    }

    /// C literal naming this type's minimum.
    pub fn min_literal(self) -> &'static str {
        match self {
            Self::U8 | Self::U16 | Self::U32 => "0U",
            Self::U64 => "0ULL",
            Self::I8 => "INT8_MIN",
            Self::I16 => "INT16_MIN",
            Self::I32 => "INT32_MIN",
            Self::I64 => "INT64_MIN",
            Self::F32 => "-FLT_MAX",
            Self::F64 => "-DBL_MAX",
            Self::Bool => "false",
        }
    }

    /// Suffix appended to integer literals of this type (MISRA 7.2).
    pub fn literal_suffix(self) -> &'static str {
        match self {
            Self::U8 | Self::U16 | Self::U32 => "U",
            Self::U64 => "ULL",
            Self::I64 => "LL",
            _ => "",
        }
    }

    /// Inclusive value range, for checking that a literal fits.
    pub fn int_range(self) -> Option<(i128, i128)> {
        Some(match self {
            Self::U8 => (0, u8::MAX as i128),
            Self::U16 => (0, u16::MAX as i128),
            Self::U32 => (0, u32::MAX as i128),
            Self::U64 => (0, u64::MAX as i128),
            Self::I8 => (i8::MIN as i128, i8::MAX as i128),
            Self::I16 => (i16::MIN as i128, i16::MAX as i128),
            Self::I32 => (i32::MIN as i128, i32::MAX as i128),
            Self::I64 => (i64::MIN as i128, i64::MAX as i128),
            Self::F32 | Self::F64 | Self::Bool => return None,
        })
    }
}

/// Declared width of a bitmap backing type. 24-bit bitmaps are backed by
/// `uint32_t` in emission.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum BitmapBits {
    B8 = 8,
    B16 = 16,
    B24 = 24,
    B32 = 32,
    B64 = 64,
}

impl BitmapBits {
    pub fn bits(self) -> u32 {
        u8::from(self) as u32
    }

    pub fn backing(self) -> Primitive {
        match self {
            Self::B8 => Primitive::U8,
            Self::B16 => Primitive::U16,
            Self::B24 | Self::B32 => Primitive::U32,
            Self::B64 => Primitive::U64,
        }
    }
}

/// What a type descriptor's base refers to. Named bases point into the
/// symbol registry; the name alone identifies the declaration because the
/// registry rejects duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BaseType {
    Prim(Primitive),
    Str { capacity: Option<u32> },
    Struct(String),
    Enum(String),
    Bitmap { name: String, bits: BitmapBits },
    Callback(String),
    /// The type of a call to a function with no return value. Never valid
    /// as a declaration type.
    Void,
}

/// Semantic type of an expression or declaration. Arrays carry the ordered
/// dimension list; multidimensional arrays are never flattened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub base: BaseType,
    pub dims: Vec<u64>,
    pub is_const: bool,
}

impl TypeInfo {
    pub fn prim(p: Primitive) -> Self {
        Self {
            base: BaseType::Prim(p),
            dims: Vec::new(),
            is_const: false,
        }
    }

    pub fn string(capacity: Option<u32>) -> Self {
        Self {
            base: BaseType::Str { capacity },
            dims: Vec::new(),
            is_const: false,
        }
    }

    pub fn void() -> Self {
        Self {
            base: BaseType::Void,
            dims: Vec::new(),
            is_const: false,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.base, BaseType::Void)
    }

    pub fn into_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    pub fn is_string(&self) -> bool {
        matches!(self.base, BaseType::Str { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.base, BaseType::Struct(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.base, BaseType::Enum(_))
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(self.base, BaseType::Bitmap { .. })
    }

    pub fn is_callback(&self) -> bool {
        matches!(self.base, BaseType::Callback(_))
    }

    /// The primitive of a scalar (non-array) value, seeing through bitmap
    /// backings. `None` for structs, strings, callbacks and arrays.
    pub fn scalar_prim(&self) -> Option<Primitive> {
        if self.is_array() {
            return None;
        }
        match &self.base {
            BaseType::Prim(p) => Some(*p),
            BaseType::Bitmap { bits, .. } => Some(bits.backing()),
            _ => None,
        }
    }

    /// Strip one array dimension.
    pub fn element(&self) -> TypeInfo {
        let mut out = self.clone();
        if !out.dims.is_empty() {
            out.dims.remove(0);
        }
        out
    }

    /// C-Next spelling for error messages, e.g. `u8[4][2]` or `const Point`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if self.is_const {
            out.push_str("const ");
        }
        match &self.base {
            BaseType::Prim(p) => out.push_str(p.name()),
            BaseType::Str { .. } => out.push_str("string"),
            BaseType::Struct(n)
            | BaseType::Enum(n)
            | BaseType::Callback(n) => out.push_str(n),
            BaseType::Bitmap { name, .. } => out.push_str(name),
            BaseType::Void => out.push_str("void"),
        }
        for d in &self.dims {
            out.push_str(&format!("[{d}]"));
        }
        out
    }

    /// The C spelling of the base type (dimensions are emitted by the
    /// declarator, not here). Strings are `char` at the base.
    pub fn c_base_name(&self, mode: OutputMode) -> String {
        match &self.base {
            BaseType::Prim(p) => p.c_name().to_owned(),
            BaseType::Str { .. } => "char".to_owned(),
            BaseType::Struct(n) | BaseType::Callback(n) => n.clone(),
            BaseType::Enum(n) => n.clone(),
            BaseType::Bitmap { name, .. } => {
                let _ = mode;
                name.clone()
            }
            BaseType::Void => "void".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Primitive::U8, "uint8_t", 8)]
    #[case(Primitive::I16, "int16_t", 16)]
    #[case(Primitive::U64, "uint64_t", 64)]
    #[case(Primitive::F32, "float", 32)]
    #[case(Primitive::Bool, "bool", 1)]
    fn c_names_and_widths(
        #[case] prim: Primitive,
        #[case] c_name: &str,
        #[case] bits: u32,
    ) {
        assert_eq!(prim.c_name(), c_name);
        assert_eq!(prim.bits(), bits);
    }

    #[rstest]
    #[case(Primitive::I8, Primitive::I32)]
    #[case(Primitive::I16, Primitive::I32)]
    #[case(Primitive::I32, Primitive::I64)]
    #[case(Primitive::I64, Primitive::I64)]
    #[case(Primitive::U16, Primitive::U32)]
    #[case(Primitive::U32, Primitive::U64)]
    #[case(Primitive::U64, Primitive::U64)]
    fn wider_types(#[case] prim: Primitive, #[case] wide: Primitive) {
        assert_eq!(prim.wider(), wide);
    }

    #[test]
    fn bitmap24_is_backed_by_u32() {
        let bits = BitmapBits::try_from(24u8).unwrap();
        assert_eq!(bits.backing(), Primitive::U32);
        assert!(BitmapBits::try_from(12u8).is_err());
    }

    #[test]
    fn element_strips_outer_dimension() {
        let ty = TypeInfo {
            base: BaseType::Prim(Primitive::U8),
            dims: vec![2, 4],
            is_const: false,
        };
        assert_eq!(ty.element().dims, vec![4]);
        assert_eq!(ty.describe(), "u8[2][4]");
    }
}
