//! Desktop-entry key file parsing.
//!
//! Only the `[Desktop Entry]` group is read, and only the unlocalised
//! keys the lookup needs. Everything else in the file is skipped.

use std::collections::HashMap;

const DESKTOP_ENTRY_GROUP: &str = "Desktop Entry";

/// The `[Desktop Entry]` group of a `.desktop` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    keys: HashMap<String, String>,
}

impl DesktopEntry {
    /// Parse key file text. Returns `None` if there is no
    /// `[Desktop Entry]` group.
    pub fn parse(text: &str) -> Option<Self> {
        let mut keys = HashMap::new();
        let mut in_entry = false;
        let mut seen_entry = false;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(group) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_entry = group == DESKTOP_ENTRY_GROUP;
                seen_entry |= in_entry;
                continue;
            }
            if !in_entry {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            // Localised variants (`Name[de]=`) are not needed.
            if key.contains('[') {
                continue;
            }
            keys.entry(key.to_string())
                .or_insert_with(|| value.trim().to_string());
        }

        seen_entry.then_some(Self { keys })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    fn get_bool(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// Whether this entry describes a launchable application.
    pub fn is_application(&self) -> bool {
        self.get("Type") == Some("Application")
            && (self.get("Exec").is_some_and(|e| !e.is_empty()) || self.get_bool("DBusActivatable"))
    }

    pub fn startup_wm_class(&self) -> Option<&str> {
        self.get("StartupWMClass").filter(|c| !c.is_empty())
    }
}
