//! Decoding of primitive values tagged with Itanium C++ ABI type manglings.
//!
//! The instrumentation runtime describes every field of an event by its
//! mangled builtin type (`"i"` for `int`, `"d"` for `double`, ...) and its
//! size in bytes. Values are always little-endian and packed.
//!
//! Unknown tags are not an error: the raw bytes are handed back unchanged so
//! that newer producers can still be read by older decoders.

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use compact_str::CompactString;

/// A builtin type, as identified by its mangled name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiType {
    Void,
    Bool,
    Char,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    /// Anything else. Decodes to raw bytes.
    Unknown(CompactString),
}

impl AbiType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "v" => Self::Void,
            "b" => Self::Bool,
            "c" => Self::Char,
            "h" => Self::UnsignedChar,
            "s" => Self::Short,
            "t" => Self::UnsignedShort,
            "i" => Self::Int,
            "j" => Self::UnsignedInt,
            "l" => Self::Long,
            "m" => Self::UnsignedLong,
            "x" => Self::LongLong,
            "y" => Self::UnsignedLongLong,
            "f" => Self::Float,
            "d" => Self::Double,
            other => Self::Unknown(other.into()),
        }
    }

    /// Human readable C++ name of the type. Unknown tags are returned as-is.
    pub fn demangled(&self) -> &str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Char => "char",
            Self::UnsignedChar => "unsigned char",
            Self::Short => "short",
            Self::UnsignedShort => "unsigned short",
            Self::Int => "int",
            Self::UnsignedInt => "unsigned int",
            Self::Long => "long",
            Self::UnsignedLong => "unsigned long",
            Self::LongLong => "long long",
            Self::UnsignedLongLong => "unsigned long long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether values of this type decode through the integer path.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::UnsignedChar
                | Self::Short
                | Self::UnsignedShort
                | Self::Int
                | Self::UnsignedInt
                | Self::Long
                | Self::UnsignedLong
                | Self::LongLong
                | Self::UnsignedLongLong
        )
    }
}

/// A decoded primitive.
///
/// Integers of every width and signedness are widened to `u64` without sign
/// extension, which is what the trace consumers expect.
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize)]
#[serde(untagged)]
pub enum PrimitiveValue {
    Bool(bool),
    Char(char),
    Unsigned(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl PrimitiveValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            _ => None,
        }
    }
}

/// Little-endian unsigned interpretation of the first `width` bytes (at most 8).
///
/// Every byte is zero-extended before being shifted into place.
pub fn accumulate(width: u64, bytes: &[u8]) -> u64 {
    let width = (width.min(8) as usize).min(bytes.len());
    if width == 0 {
        return 0;
    }
    LittleEndian::read_uint(&bytes[..width], width)
}

/// Decode `bytes` as a value of mangled type `tag`, `width` bytes wide.
pub fn decode(tag: &str, width: u64, bytes: &[u8]) -> PrimitiveValue {
    decode_type(&AbiType::from_tag(tag), width, bytes)
}

/// Same as [`decode`], for an already resolved type.
pub fn decode_type(ty: &AbiType, width: u64, bytes: &[u8]) -> PrimitiveValue {
    match ty {
        AbiType::Bool if !bytes.is_empty() => PrimitiveValue::Bool(bytes[0] != 0),
        AbiType::Char if !bytes.is_empty() => PrimitiveValue::Char(char::from(bytes[0])),
        ty if ty.is_integer() => PrimitiveValue::Unsigned(accumulate(width, bytes)),
        AbiType::Float => {
            let bits = accumulate(width.min(4), bytes) as u32;
            PrimitiveValue::Float(f64::from(f32::from_bits(bits)))
        }
        AbiType::Double => PrimitiveValue::Float(f64::from_bits(accumulate(width, bytes))),
        // Void, unknown tags, and bool/char without any data.
        _ => PrimitiveValue::Bytes(bytes.to_vec()),
    }
}

/// Human readable name for a mangled type tag.
pub fn demangle(tag: &str) -> CompactString {
    AbiType::from_tag(tag).demangled().into()
}
