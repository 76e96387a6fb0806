//! Host collaborator traits — application descriptors and runtime state.
//!
//! The correlator never talks to the desktop environment directly. It asks
//! a [`DescriptorLookup`] to turn a desktop-entry path into an application
//! id, and a [`RuntimeLookup`] for the pids and windows of a running app.
//! Platform adapters (`desktop`, `x11`) implement these; tests substitute
//! doubles.

pub mod descriptor;
pub mod runtime;

pub use descriptor::{AppDescriptor, DescriptorLookup};
pub use runtime::{AppQuery, AppRuntime, NoWindowSystem, RuntimeLookup};

/// Failure of a host lookup.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The path does not name a recognised application descriptor.
    #[error("not an application descriptor: {0}")]
    NotAnApplication(String),

    /// The descriptor could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The windowing system could not be queried.
    #[error("window system error: {0}")]
    WindowSystem(String),
}
