//! Launch signal decoding — `org.gtk.gio.DesktopAppInfo.Launched`.
//!
//! GIO broadcasts this signal on the session bus whenever an application
//! is launched through `GDesktopAppInfo`. The payload is validated
//! against [`LAUNCHED_SCHEMA`] before any field is read, then the
//! desktop-entry path is resolved to a canonical application id. The
//! advisory id carried in the payload is never trusted: not every emitter
//! fills it in.

pub mod value;

use std::path::PathBuf;

pub use value::{BusValue, ValueKind};

use crate::resolver::{AppQuery, DescriptorLookup, ResolverError};

pub const LAUNCHED_INTERFACE: &str = "org.gtk.gio.DesktopAppInfo";
pub const LAUNCHED_MEMBER: &str = "Launched";
pub const LAUNCHED_PATH: &str = "/org/gtk/gio/DesktopAppInfo";

/// Expected type of one positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// `ay`
    ByteString,
    /// `s`
    String,
    /// `x`
    Int64,
    /// `as`
    StringArray,
    /// `a{sv}`
    VariantDict,
}

impl FieldType {
    fn signature(self) -> &'static str {
        match self {
            Self::ByteString => "ay",
            Self::String => "s",
            Self::Int64 => "x",
            Self::StringArray => "as",
            Self::VariantDict => "a{sv}",
        }
    }

    fn accepts(self, value: &BusValue) -> bool {
        match (self, value) {
            (Self::ByteString, BusValue::Bytes(_)) => true,
            (Self::ByteString, BusValue::Array(items)) => {
                items.iter().all(|v| matches!(v, BusValue::Byte(_)))
            }
            (Self::String, BusValue::Str(_)) => true,
            (Self::Int64, BusValue::Int64(_)) => true,
            (Self::StringArray, BusValue::Array(items)) => {
                items.iter().all(|v| matches!(v, BusValue::Str(_)))
            }
            (Self::VariantDict, BusValue::Array(items)) => items.iter().all(|v| {
                matches!(v, BusValue::DictEntry(k, val)
                    if matches!(**k, BusValue::Str(_)) && matches!(**val, BusValue::Variant(_)))
            }),
            _ => false,
        }
    }
}

/// One named positional field of a signal.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

/// Ordered argument list of the `Launched` signal.
pub const LAUNCHED_SCHEMA: [Field; 5] = [
    Field {
        name: "desktop_file",
        ty: FieldType::ByteString,
    },
    Field {
        name: "advisory_id",
        ty: FieldType::String,
    },
    Field {
        name: "pid",
        ty: FieldType::Int64,
    },
    Field {
        name: "uris",
        ty: FieldType::StringArray,
    },
    Field {
        name: "platform_data",
        ty: FieldType::VariantDict,
    },
];

/// A decoded launch notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEvent {
    pub desktop_entry_path: PathBuf,
    /// Canonical id from the descriptor lookup. Never empty.
    pub app_id: String,
    /// Pid reported by the launcher. Informational only.
    pub pid: i64,
    pub uris: Vec<String>,
    /// `StartupWMClass` of the descriptor.
    pub wm_class: Option<String>,
}

impl LaunchEvent {
    /// Build the runtime query for this launch.
    pub fn query(&self) -> AppQuery {
        AppQuery {
            wm_class: self.wm_class.clone(),
            launch_pid: u32::try_from(self.pid).ok().filter(|pid| *pid > 0),
            ..AppQuery::by_id(self.app_id.as_str())
        }
    }
}

/// Why a payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("argument {index} ({name}): expected {expected}, got {actual}")]
    Schema {
        index: usize,
        name: &'static str,
        expected: &'static str,
        actual: ValueKind,
    },

    #[error("desktop file path is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("desktop file path is empty")]
    EmptyPath,

    #[error("descriptor lookup failed: {0}")]
    Descriptor(#[from] ResolverError),

    #[error("descriptor {0} resolved to an empty application id")]
    EmptyId(PathBuf),
}

/// Check `payload` against `schema`, field by field.
pub fn validate(payload: &[BusValue], schema: &[Field]) -> Result<(), DecodeError> {
    if payload.len() != schema.len() {
        return Err(DecodeError::Arity {
            expected: schema.len(),
            actual: payload.len(),
        });
    }
    for (index, (value, field)) in payload.iter().zip(schema).enumerate() {
        if !field.ty.accepts(value) {
            return Err(DecodeError::Schema {
                index,
                name: field.name,
                expected: field.ty.signature(),
                actual: value.kind(),
            });
        }
    }
    Ok(())
}

fn mismatch(index: usize, value: &BusValue) -> DecodeError {
    let field = LAUNCHED_SCHEMA[index];
    DecodeError::Schema {
        index,
        name: field.name,
        expected: field.ty.signature(),
        actual: value.kind(),
    }
}

/// Decode a raw `Launched` payload into a [`LaunchEvent`].
pub fn decode(
    payload: &[BusValue],
    descriptors: &dyn DescriptorLookup,
) -> Result<LaunchEvent, DecodeError> {
    validate(payload, &LAUNCHED_SCHEMA)?;

    let path = desktop_file_path(&payload[0])?;
    let pid = match &payload[2] {
        BusValue::Int64(pid) => *pid,
        other => return Err(mismatch(2, other)),
    };
    let uris = match &payload[3] {
        BusValue::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                BusValue::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let descriptor = descriptors.lookup(&path)?;
    if descriptor.id.is_empty() {
        return Err(DecodeError::EmptyId(path));
    }

    Ok(LaunchEvent {
        desktop_entry_path: path,
        app_id: descriptor.id,
        pid,
        uris,
        wm_class: descriptor.wm_class,
    })
}

fn desktop_file_path(value: &BusValue) -> Result<PathBuf, DecodeError> {
    let mut bytes = match value {
        BusValue::Bytes(bytes) => bytes.clone(),
        BusValue::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                BusValue::Byte(b) => Some(*b),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    let text = String::from_utf8(bytes)?;
    if text.is_empty() {
        return Err(DecodeError::EmptyPath);
    }
    Ok(PathBuf::from(text))
}
