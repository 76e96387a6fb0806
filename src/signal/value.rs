//! Bus value model — a typed tree for one positional signal argument.

use std::fmt;

/// A single D-Bus value as delivered by the bus adapter.
///
/// Byte arrays get their own variant because D-Bus treats `ay` specially
/// (file paths, raw strings) and adapters usually receive it in bulk.
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    Bytes(Vec<u8>),
    Array(Vec<BusValue>),
    Struct(Vec<BusValue>),
    DictEntry(Box<BusValue>, Box<BusValue>),
    Variant(Box<BusValue>),
}

/// Coarse shape of a value, used for schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Byte,
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    Str,
    ObjectPath,
    Signature,
    Bytes,
    Array,
    Struct,
    DictEntry,
    Variant,
}

impl BusValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Byte(_) => ValueKind::Byte,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int16(_) => ValueKind::Int16,
            Self::Uint16(_) => ValueKind::Uint16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Uint32(_) => ValueKind::Uint32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Uint64(_) => ValueKind::Uint64,
            Self::Double(_) => ValueKind::Double,
            Self::Str(_) => ValueKind::Str,
            Self::ObjectPath(_) => ValueKind::ObjectPath,
            Self::Signature(_) => ValueKind::Signature,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Array(_) => ValueKind::Array,
            Self::Struct(_) => ValueKind::Struct,
            Self::DictEntry(..) => ValueKind::DictEntry,
            Self::Variant(_) => ValueKind::Variant,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Byte => "byte",
            Self::Bool => "boolean",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Double => "double",
            Self::Str => "string",
            Self::ObjectPath => "object path",
            Self::Signature => "signature",
            Self::Bytes => "array of bytes",
            Self::Array => "array",
            Self::Struct => "struct",
            Self::DictEntry => "dict entry",
            Self::Variant => "variant",
        };
        f.write_str(name)
    }
}
