//! RuntimeLookup trait — current pids and windows of a running application.

use std::collections::BTreeSet;

use super::ResolverError;

/// Identifies the application to look up, plus matching hints.
///
/// `id` is authoritative. The hints help adapters whose windowing system
/// does not record application ids on windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppQuery {
    pub id: String,
    /// `StartupWMClass` from the descriptor.
    pub wm_class: Option<String>,
    /// Pid reported by the launcher. Windows owned by this process or one
    /// of its descendants belong to the app.
    pub launch_pid: Option<u32>,
}

impl AppQuery {
    /// Query by id alone, without hints.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            wm_class: None,
            launch_pid: None,
        }
    }
}

/// Snapshot of a running application's processes and windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppRuntime {
    pub pids: BTreeSet<u32>,
    pub windows: BTreeSet<u64>,
}

/// Looks up the runtime state of applications.
///
/// Called once per poll tick on tokio's blocking pool; implementations
/// may do synchronous I/O.
pub trait RuntimeLookup: Send + Sync {
    /// Return the app's current pids and windows, or `None` if it is not
    /// running (or not yet visible to the windowing system).
    fn lookup(&self, query: &AppQuery) -> Result<Option<AppRuntime>, ResolverError>;
}

/// Lookup for hosts without a usable window system: nothing is ever
/// running, so every resolution times out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWindowSystem;

impl RuntimeLookup for NoWindowSystem {
    fn lookup(&self, _query: &AppQuery) -> Result<Option<AppRuntime>, ResolverError> {
        Ok(None)
    }
}
