//! X11 runtime lookup — maps an application to its client windows.
//!
//! Wraps `x11rb::rust_connection::RustConnection`. Each lookup reads
//! `_NET_CLIENT_LIST` from the root window and inspects every client's
//! `_GTK_APPLICATION_ID`, `WM_CLASS` and `_NET_WM_PID` to decide whether
//! it belongs to the queried application. Lookups block on the X server
//! and run on tokio's blocking pool.

pub mod proc;

use std::collections::BTreeSet;

use x11rb::connection::Connection;
use x11rb::cookie::Cookie;
use x11rb::protocol::xproto::{self, Atom, AtomEnum, GetPropertyReply, Window};
use x11rb::rust_connection::RustConnection;

use crate::resolver::{AppQuery, AppRuntime, ResolverError, RuntimeLookup};

/// Pre-interned X11 atoms for property queries.
struct Atoms {
    net_client_list: Atom,
    net_wm_pid: Atom,
    gtk_application_id: Atom,
    utf8_string: Atom,
}

/// Identification properties of one client window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowProps {
    pub id: Window,
    pub pid: Option<u32>,
    pub gtk_application_id: Option<String>,
    /// `(instance, class)`
    pub wm_class: Option<(String, String)>,
}

/// X11 connection context for runtime lookups.
pub struct X11Runtime {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
}

fn x11_err(what: &str, e: impl std::fmt::Display) -> ResolverError {
    ResolverError::WindowSystem(format!("{what}: {e}"))
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom, ResolverError> {
    Ok(xproto::intern_atom(conn, false, name)
        .map_err(|e| x11_err("intern_atom", e))?
        .reply()
        .map_err(|e| x11_err("intern_atom reply", e))?
        .atom)
}

impl X11Runtime {
    /// Connect to the display named by `$DISPLAY` and intern atoms.
    pub fn connect() -> Result<Self, ResolverError> {
        let (conn, screen_num) =
            RustConnection::connect(None).map_err(|e| x11_err("connect failed", e))?;

        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms {
            net_client_list: intern(&conn, b"_NET_CLIENT_LIST")?,
            net_wm_pid: intern(&conn, b"_NET_WM_PID")?,
            gtk_application_id: intern(&conn, b"_GTK_APPLICATION_ID")?,
            utf8_string: intern(&conn, b"UTF8_STRING")?,
        };

        Ok(Self { conn, root, atoms })
    }

    fn client_list(&self) -> Result<Vec<Window>, ResolverError> {
        let reply = xproto::get_property(
            &self.conn,
            false,
            self.root,
            self.atoms.net_client_list,
            AtomEnum::WINDOW,
            0,
            u32::MAX,
        )
        .map_err(|e| x11_err("get_property _NET_CLIENT_LIST", e))?
        .reply()
        .map_err(|e| x11_err("get_property reply", e))?;

        Ok(reply.value32().map(|ids| ids.collect()).unwrap_or_default())
    }

    fn get_property(
        &self,
        id: Window,
        property: impl Into<Atom>,
        ty: impl Into<Atom>,
        long_length: u32,
        what: &str,
    ) -> Result<Cookie<'_, RustConnection, GetPropertyReply>, ResolverError> {
        xproto::get_property(&self.conn, false, id, property, ty, 0, long_length)
            .map_err(|e| x11_err(what, e))
    }

    /// Send the three property requests for `id` without waiting for
    /// replies.
    fn request_props(&self, id: Window) -> Result<PropCookies<'_>, ResolverError> {
        Ok(PropCookies {
            id,
            pid: self.get_property(
                id,
                self.atoms.net_wm_pid,
                AtomEnum::CARDINAL,
                1,
                "get_property _NET_WM_PID",
            )?,
            gtk_application_id: self.get_property(
                id,
                self.atoms.gtk_application_id,
                self.atoms.utf8_string,
                256,
                "get_property _GTK_APPLICATION_ID",
            )?,
            wm_class: self.get_property(
                id,
                AtomEnum::WM_CLASS,
                AtomEnum::STRING,
                256,
                "get_property WM_CLASS",
            )?,
        })
    }
}

fn property_reply(
    cookie: Cookie<'_, RustConnection, GetPropertyReply>,
) -> Result<GetPropertyReply, ResolverError> {
    cookie.reply().map_err(|e| x11_err("get_property reply", e))
}

/// Outstanding property requests for one window.
struct PropCookies<'c> {
    id: Window,
    pid: Cookie<'c, RustConnection, GetPropertyReply>,
    gtk_application_id: Cookie<'c, RustConnection, GetPropertyReply>,
    wm_class: Cookie<'c, RustConnection, GetPropertyReply>,
}

impl PropCookies<'_> {
    fn wait(self) -> Result<WindowProps, ResolverError> {
        let pid = property_reply(self.pid)?
            .value32()
            .and_then(|mut v| v.next());
        let gtk_application_id = property_reply(self.gtk_application_id)?.value;
        let wm_class = property_reply(self.wm_class)?.value;

        Ok(WindowProps {
            id: self.id,
            pid,
            gtk_application_id: (!gtk_application_id.is_empty())
                .then(|| String::from_utf8_lossy(&gtk_application_id).into_owned()),
            wm_class: parse_wm_class(&wm_class),
        })
    }
}

impl RuntimeLookup for X11Runtime {
    fn lookup(&self, query: &AppQuery) -> Result<Option<AppRuntime>, ResolverError> {
        // All requests go out before the first reply is read.
        let pending: Vec<_> = self
            .client_list()?
            .into_iter()
            .map(|id| (id, self.request_props(id)))
            .collect();

        let mut runtime = AppRuntime::default();
        for (id, cookies) in pending {
            // Windows can vanish between listing and inspection.
            let props = match cookies.and_then(PropCookies::wait) {
                Ok(props) => props,
                Err(e) => {
                    tracing::debug!(window = id, error = %e, "skipping window");
                    continue;
                }
            };
            if window_matches(&props, query) {
                runtime.windows.insert(u64::from(props.id));
                runtime.pids.extend(props.pid);
            }
        }

        Ok((!runtime.windows.is_empty()).then_some(runtime))
    }
}

/// Split a `WM_CLASS` value (`instance\0class\0`).
pub fn parse_wm_class(raw: &[u8]) -> Option<(String, String)> {
    let mut parts = raw
        .split(|b| *b == 0)
        .map(|p| String::from_utf8_lossy(p).into_owned());
    let instance = parts.next().filter(|s| !s.is_empty())?;
    let class = parts.next().unwrap_or_default();
    Some((instance, class))
}

/// Strip the `.desktop` suffix from an application id.
pub fn id_stem(id: &str) -> &str {
    id.strip_suffix(".desktop").unwrap_or(id)
}

/// Decide whether a window belongs to the queried application.
///
/// Tried in order: the GTK application id, `WM_CLASS` against the
/// descriptor's `StartupWMClass` and the id, then process ancestry of the
/// launcher's pid.
pub fn window_matches(props: &WindowProps, query: &AppQuery) -> bool {
    let stem = id_stem(&query.id);

    if props.gtk_application_id.as_deref() == Some(stem) {
        return true;
    }

    if let Some((instance, class)) = &props.wm_class {
        let last_segment = stem.rsplit('.').next().unwrap_or(stem);
        let candidates = query
            .wm_class
            .as_deref()
            .into_iter()
            .chain([stem, last_segment]);
        for candidate in candidates {
            if instance.eq_ignore_ascii_case(candidate) || class.eq_ignore_ascii_case(candidate) {
                return true;
            }
        }
    }

    match (props.pid, query.launch_pid) {
        (Some(pid), Some(root)) => proc::descends_from(pid, root),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(id: Window) -> WindowProps {
        WindowProps {
            id,
            ..WindowProps::default()
        }
    }

    #[test]
    fn wm_class_splits_instance_and_class() {
        assert_eq!(
            parse_wm_class(b"gnome-text-editor\0Gnome-text-editor\0"),
            Some(("gnome-text-editor".into(), "Gnome-text-editor".into()))
        );
        assert_eq!(parse_wm_class(b""), None);
        assert_eq!(parse_wm_class(b"solo"), Some(("solo".into(), String::new())));
    }

    #[test]
    fn id_stem_strips_suffix() {
        assert_eq!(id_stem("org.gnome.TextEditor.desktop"), "org.gnome.TextEditor");
        assert_eq!(id_stem("org.gnome.TextEditor"), "org.gnome.TextEditor");
    }

    #[test]
    fn matches_gtk_application_id() {
        let props = WindowProps {
            gtk_application_id: Some("org.gnome.TextEditor".into()),
            ..window(1)
        };
        assert!(window_matches(&props, &AppQuery::by_id("org.gnome.TextEditor.desktop")));
        assert!(!window_matches(&props, &AppQuery::by_id("org.gnome.Nautilus.desktop")));
    }

    #[test]
    fn matches_startup_wm_class_hint() {
        let props = WindowProps {
            wm_class: Some(("code".into(), "Code".into())),
            ..window(2)
        };
        let query = AppQuery {
            wm_class: Some("code".into()),
            ..AppQuery::by_id("visual-studio-code.desktop")
        };
        assert!(window_matches(&props, &query));
        assert!(!window_matches(&props, &AppQuery::by_id("visual-studio-code.desktop")));
    }

    #[test]
    fn matches_last_id_segment_case_insensitively() {
        let props = WindowProps {
            wm_class: Some(("firefox".into(), "Firefox".into())),
            ..window(3)
        };
        assert!(window_matches(&props, &AppQuery::by_id("org.mozilla.firefox.desktop")));
        assert!(window_matches(&props, &AppQuery::by_id("firefox.desktop")));
    }

    #[test]
    fn matches_launcher_process_tree() {
        let me = std::process::id();
        let props = WindowProps {
            pid: Some(me),
            ..window(4)
        };
        let query = AppQuery {
            launch_pid: proc::parent_of(me),
            ..AppQuery::by_id("unrelated.desktop")
        };
        assert!(window_matches(&props, &query));
        assert!(!window_matches(&props, &AppQuery::by_id("unrelated.desktop")));
    }
}
