//! Correlation coordinator — launch event → windows → persisted record.
//!
//! Each decoded [`LaunchEvent`] starts its own resolution task. When the
//! application's windows show up, the coordinator builds an [`AppRecord`]
//! and hands it to the store writer. A timeout leaves the store alone, so
//! the last good snapshot for that application survives.
//!
//! The coordinator keeps no copy of the map. It only counts resolutions
//! in flight per application, for diagnostics and so shutdown can cancel
//! and drain them.

pub mod poll;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

pub use poll::{PollPolicy, ResolutionOutcome, WindowResolver};

use crate::signal::LaunchEvent;
use crate::store::{AppRecord, StoreHandle};

type InFlightMap = Arc<Mutex<HashMap<String, usize>>>;

/// Decrements the in-flight count for an app when the task ends, however
/// it ends.
struct InFlightGuard {
    map: InFlightMap,
    app_id: String,
}

impl InFlightGuard {
    /// Register a new resolution. Returns the guard and how many were
    /// already pending for the same app.
    fn enter(map: &InFlightMap, app_id: &str) -> (Self, usize) {
        let mut counts = map.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(app_id.to_string()).or_default();
        let already = *count;
        *count += 1;
        let guard = Self {
            map: Arc::clone(map),
            app_id: app_id.to_string(),
        };
        (guard, already)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut counts = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&self.app_id) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.app_id);
            }
        }
    }
}

/// Routes launch events through the window resolver into the store.
pub struct Coordinator {
    resolver: WindowResolver,
    store: StoreHandle,
    in_flight: InFlightMap,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(resolver: WindowResolver, store: StoreHandle) -> Self {
        Self {
            resolver,
            store,
            in_flight: Arc::default(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start correlating one launch. Returns immediately.
    ///
    /// Must be called from within the tokio runtime.
    pub fn on_launch_event(&self, event: LaunchEvent) {
        if self.shutdown.is_cancelled() {
            tracing::debug!(app_id = %event.app_id, "coordinator stopped, ignoring launch");
            return;
        }

        let launch_id = Uuid::new_v4();
        let span = tracing::info_span!("correlate", app_id = %event.app_id, %launch_id);
        let (guard, already) = InFlightGuard::enter(&self.in_flight, &event.app_id);
        if already > 0 {
            // Both resolutions run to completion; whichever merges last wins.
            span.in_scope(|| {
                tracing::info!(pending = already, "relaunch while a resolution is pending")
            });
        }

        let pending = self
            .resolver
            .resolve(event.query(), self.shutdown.child_token());
        let store = self.store.clone();

        self.tasks.spawn(
            async move {
                let outcome = pending.outcome().await;
                complete(outcome, event, &store).await;
                drop(guard);
            }
            .instrument(span),
        );
    }

    /// Number of resolutions pending for `app_id`.
    pub fn in_flight(&self, app_id: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(app_id)
            .copied()
            .unwrap_or(0)
    }

    /// Cancel every pending resolution and wait for the tasks to finish.
    /// Launches arriving afterwards are ignored.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!("coordinator drained");
    }

    /// Wait until every started correlation has finished.
    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

async fn complete(outcome: Option<ResolutionOutcome>, event: LaunchEvent, store: &StoreHandle) {
    match outcome {
        None => tracing::debug!("correlation cancelled"),
        Some(ResolutionOutcome::TimedOut) => {
            tracing::info!("no window appeared in time, state unchanged")
        }
        Some(ResolutionOutcome::Resolved { pids, windows }) => {
            let record = AppRecord {
                windows: windows.iter().copied().collect(),
                uris: event.uris,
            };
            match store.merge(&event.app_id, record).await {
                Ok(()) => {
                    tracing::info!(launch_pid = event.pid, ?pids, ?windows, "launch recorded")
                }
                Err(e) => tracing::error!(
                    launch_pid = event.pid,
                    ?pids,
                    error = %e,
                    "failed to record launch"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::poll::tests::ScriptedLookup;
    use crate::store::{StateStore, spawn_writer};
    use std::path::PathBuf;
    use std::time::Duration;

    fn event(app_id: &str, uris: &[&str]) -> LaunchEvent {
        LaunchEvent {
            desktop_entry_path: PathBuf::from(format!("/usr/share/applications/{app_id}.desktop")),
            app_id: app_id.into(),
            pid: 1234,
            uris: uris.iter().map(|u| u.to_string()).collect(),
            wm_class: None,
        }
    }

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(100),
            max_attempts,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: StateStore,
        handle: StoreHandle,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("opened-files.log"));
        let (handle, _thread) = spawn_writer(store.clone()).unwrap();
        Fixture {
            _dir: dir,
            store,
            handle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn editor_launch_is_recorded() {
        let fx = fixture();
        let lookup = Arc::new(ScriptedLookup::new(3, &[9001], &[42]));
        let coordinator =
            Coordinator::new(WindowResolver::new(lookup.clone(), policy(10)), fx.handle.clone());

        coordinator.on_launch_event(event("org.example.Editor", &["/home/u/a.txt"]));
        assert_eq!(coordinator.in_flight("org.example.Editor"), 1);
        coordinator.wait_idle().await;

        assert_eq!(lookup.calls(), 3);
        assert_eq!(coordinator.in_flight("org.example.Editor"), 0);
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(fx.store.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "org.example.Editor": { "windows": [42], "uris": ["/home/u/a.txt"] }
            })
        );
    }

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_launch_logs_launch_and_window_pids_at_info() {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer({
                let capture = capture.clone();
                move || capture.clone()
            })
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let fx = fixture();
        let lookup = Arc::new(ScriptedLookup::new(1, &[9001], &[42]));
        let coordinator =
            Coordinator::new(WindowResolver::new(lookup, policy(10)), fx.handle.clone());
        coordinator.on_launch_event(event("org.example.Editor", &["/home/u/a.txt"]));
        coordinator.wait_idle().await;

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let line = logs
            .lines()
            .find(|l| l.contains("launch recorded"))
            .unwrap_or_else(|| panic!("no record line in {logs}"));
        assert!(line.contains("INFO"), "{line}");
        assert!(line.contains("launch_pid=1234"), "{line}");
        assert!(line.contains("pids={9001}"), "{line}");
        assert!(line.contains("windows={42}"), "{line}");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_state_untouched() {
        let fx = fixture();
        fx.store
            .merge(
                "org.example.Editor",
                AppRecord {
                    windows: vec![1],
                    uris: vec!["/old.txt".into()],
                },
            )
            .unwrap();
        let before = std::fs::read(fx.store.path()).unwrap();

        let coordinator = Coordinator::new(
            WindowResolver::new(Arc::new(ScriptedLookup::never()), policy(3)),
            fx.handle.clone(),
        );
        coordinator.on_launch_event(event("org.example.Editor", &["/new.txt"]));
        coordinator.wait_idle().await;

        assert_eq!(std::fs::read(fx.store.path()).unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_on_missing_file_creates_nothing() {
        let fx = fixture();
        let coordinator = Coordinator::new(
            WindowResolver::new(Arc::new(ScriptedLookup::never()), policy(2)),
            fx.handle.clone(),
        );
        coordinator.on_launch_event(event("app", &[]));
        coordinator.wait_idle().await;

        assert!(!fx.store.path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn relaunch_before_completion_keeps_one_whole_record() {
        let fx = fixture();
        let lookup = Arc::new(ScriptedLookup::new(2, &[5], &[50]));
        let coordinator =
            Coordinator::new(WindowResolver::new(lookup, policy(10)), fx.handle.clone());

        coordinator.on_launch_event(event("app", &["/first.txt"]));
        coordinator.on_launch_event(event("app", &["/second.txt"]));
        assert_eq!(coordinator.in_flight("app"), 2);
        coordinator.wait_idle().await;

        // Both merges ran through the single writer; the surviving entry
        // is one of the two records, never a blend.
        let map = fx.store.load();
        assert_eq!(map.len(), 1);
        let uris = &map["app"].uris;
        assert!(
            uris == &vec!["/first.txt".to_string()] || uris == &vec!["/second.txt".to_string()],
            "unexpected uris {uris:?}"
        );
        assert_eq!(map["app"].windows, vec![50]);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_launches_of_different_apps_all_persist() {
        let fx = fixture();
        let lookup = Arc::new(ScriptedLookup::new(1, &[5], &[50]));
        let coordinator =
            Coordinator::new(WindowResolver::new(lookup, policy(10)), fx.handle.clone());

        for id in ["a.app", "b.app", "c.app"] {
            coordinator.on_launch_event(event(id, &[]));
        }
        coordinator.wait_idle().await;

        let map = fx.store.load();
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), ["a.app", "b.app", "c.app"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_and_ignores_new_launches() {
        let fx = fixture();
        let lookup = Arc::new(ScriptedLookup::never());
        let coordinator =
            Coordinator::new(WindowResolver::new(lookup.clone(), policy(1000)), fx.handle.clone());

        coordinator.on_launch_event(event("app", &[]));
        tokio::time::sleep(Duration::from_millis(150)).await;
        coordinator.shutdown().await;

        assert_eq!(coordinator.in_flight("app"), 0);
        let calls = lookup.calls();
        assert_eq!(calls, 1);

        coordinator.on_launch_event(event("app", &[]));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(lookup.calls(), calls);
        assert!(!fx.store.path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_does_not_stop_later_launches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();
        let (handle, _thread) = spawn_writer(StateStore::new(&path)).unwrap();

        let lookup = Arc::new(ScriptedLookup::new(1, &[5], &[50]));
        let coordinator = Coordinator::new(WindowResolver::new(lookup.clone(), policy(3)), handle);

        coordinator.on_launch_event(event("one", &[]));
        coordinator.wait_idle().await;
        coordinator.on_launch_event(event("two", &[]));
        coordinator.wait_idle().await;

        assert_eq!(lookup.calls(), 2);
        assert_eq!(coordinator.in_flight("one") + coordinator.in_flight("two"), 0);
    }
}
