//! DescriptorLookup trait — maps a desktop-entry path to an application.

use std::path::Path;

use super::ResolverError;

/// What the correlator needs to know about an application descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    /// Canonical application id (e.g. `org.gnome.TextEditor.desktop`).
    pub id: String,
    /// `StartupWMClass` from the descriptor, if it declares one.
    pub wm_class: Option<String>,
}

/// Resolves application descriptors by filesystem path.
///
/// Implementations must be deterministic for an unchanged filesystem:
/// the signal decoder relies on this to make decoding repeatable.
pub trait DescriptorLookup: Send + Sync {
    /// Resolve `path` to its application, or fail if `path` is not a
    /// recognised application descriptor.
    fn lookup(&self, path: &Path) -> Result<AppDescriptor, ResolverError>;
}
