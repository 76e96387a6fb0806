//! XDG desktop-entry lookup.
//!
//! Implements [`DescriptorLookup`] over `.desktop` files on disk. The
//! application id is the desktop-file id: the path relative to the first
//! matching `applications/` directory under the XDG data dirs, with `/`
//! replaced by `-`. Files outside those directories use their file name.

pub mod entry;

use std::path::{Path, PathBuf};

use crate::resolver::{AppDescriptor, DescriptorLookup, ResolverError};

pub use entry::DesktopEntry;

const DEFAULT_DATA_DIRS: &str = "/usr/local/share/:/usr/share/";

/// Resolves desktop-entry files to application descriptors.
#[derive(Debug, Clone)]
pub struct XdgDesktopLookup {
    /// `applications/` directories, highest priority first.
    app_dirs: Vec<PathBuf>,
}

impl XdgDesktopLookup {
    /// Use `$XDG_DATA_HOME` and `$XDG_DATA_DIRS`, with the XDG base directory
    /// defaults when unset.
    pub fn from_env() -> Self {
        let mut data_dirs: Vec<PathBuf> = dirs::data_dir().into_iter().collect();
        let system = std::env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIRS.to_string());
        data_dirs.extend(
            system
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
        );
        Self::with_data_dirs(data_dirs)
    }

    /// Use the given data directories (each gets `applications/` appended).
    pub fn with_data_dirs(data_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            app_dirs: data_dirs
                .into_iter()
                .map(|d| d.join("applications"))
                .collect(),
        }
    }

    /// Compute the desktop-file id for `path`.
    pub fn desktop_file_id(&self, path: &Path) -> Option<String> {
        for dir in &self.app_dirs {
            if let Ok(relative) = path.strip_prefix(dir) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect();
                if !parts.is_empty() {
                    return Some(parts.join("-"));
                }
            }
        }
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

impl DescriptorLookup for XdgDesktopLookup {
    fn lookup(&self, path: &Path) -> Result<AppDescriptor, ResolverError> {
        let display = path.display().to_string();
        if path.extension().is_none_or(|ext| ext != "desktop") {
            return Err(ResolverError::NotAnApplication(display));
        }

        let text = std::fs::read_to_string(path).map_err(|source| ResolverError::Io {
            path: display.clone(),
            source,
        })?;
        let entry = DesktopEntry::parse(&text)
            .filter(DesktopEntry::is_application)
            .ok_or_else(|| ResolverError::NotAnApplication(display.clone()))?;

        let id = self
            .desktop_file_id(path)
            .ok_or(ResolverError::NotAnApplication(display))?;

        Ok(AppDescriptor {
            id,
            wm_class: entry.startup_wm_class().map(str::to_string),
        })
    }
}
