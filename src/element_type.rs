use std::fmt;
use std::str::FromStr;

/// Element type of a value in a [`Model`](crate::Model) graph.
///
/// `Dynamic` is used for values whose type is not known until the model is
/// compiled for a device. Pre/post-processing steps cannot convert into a
/// dynamic type.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde_traits", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde_traits", serde(rename_all = "lowercase"))]
pub enum ElementType {
    #[default]
    Dynamic,
    Boolean,
    F16,
    BF16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl ElementType {
    /// Return the size of elements of this type in bytes, or `None` for
    /// [`ElementType::Dynamic`].
    pub fn size(self) -> Option<u8> {
        let size = match self {
            Self::Dynamic => return None,
            Self::Boolean | Self::I8 | Self::U8 => 1,
            Self::F16 | Self::BF16 | Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        };
        Some(size)
    }

    pub fn is_dynamic(self) -> bool {
        self == Self::Dynamic
    }

    /// Return true if this is a floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::BF16 | Self::F32 | Self::F64)
    }

    /// Return true if this is a signed or unsigned integer type.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Boolean => "boolean",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
        }
    }
}

impl fmt::Display for ElementType {
    /// Format this enum value in the style of the corresponding Rust type (eg.
    /// "i32" for `ElementType::I32`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown element type name.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownElementType(pub String);

impl fmt::Display for UnknownElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown element type \"{}\"", self.0)
    }
}

impl std::error::Error for UnknownElementType {}

impl FromStr for ElementType {
    type Err = UnknownElementType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "dynamic" => Self::Dynamic,
            "boolean" | "bool" => Self::Boolean,
            "f16" => Self::F16,
            "bf16" => Self::BF16,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            _ => return Err(UnknownElementType(s.to_string())),
        };
        Ok(ty)
    }
}
