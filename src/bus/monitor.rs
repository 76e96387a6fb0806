//! `dbus-monitor` subprocess adapter.
//!
//! Each subscription spawns `dbus-monitor --session --monitor <rule>` and
//! a reader task that frames its stdout into lines, parses them with
//! [`MonitorParser`], and forwards the payload of every matching signal.
//! Unsubscribing sends SIGTERM to the monitor and stops the reader.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use super::text::{BusMessage, MonitorParser};
use super::{BusError, BusSubscriber, SignalMatch, Subscription, SubscriptionId};
use crate::signal::BusValue;

/// How long stdout must stay quiet before a complete message is emitted.
const IDLE_FLUSH: Duration = Duration::from_millis(50);

/// Grace period for the monitor to exit after SIGTERM.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Longest line accepted from the monitor.
const MAX_LINE: usize = 64 * 1024;

/// A framed line of monitor output.
#[derive(Debug, PartialEq, Eq)]
enum MonitorLine {
    Text(String),
    /// A line that could not be delivered; the codec has already skipped
    /// past it.
    Lost(LostLine),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LostLine {
    TooLong,
    NotUtf8,
}

/// [`LinesCodec`] that reports an unusable line instead of failing the
/// stream, so one oversized argument does not end the subscription.
struct MonitorLines(LinesCodec);

impl MonitorLines {
    fn new(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }

    fn recover(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<MonitorLine>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(MonitorLine::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(MonitorLine::Lost(LostLine::TooLong)))
            }
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(MonitorLine::Lost(LostLine::NotUtf8)))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for MonitorLines {
    type Item = MonitorLine;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<MonitorLine>, LinesCodecError> {
        Self::recover(self.0.decode(buf))
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<MonitorLine>, LinesCodecError> {
        Self::recover(self.0.decode_eof(buf))
    }
}

struct MonitorProcess {
    pid: Option<u32>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Bus subscriber backed by `dbus-monitor` processes.
pub struct DbusMonitor {
    program: String,
    leading_args: Vec<String>,
    next_id: u64,
    running: HashMap<SubscriptionId, MonitorProcess>,
}

impl DbusMonitor {
    /// Use `dbus-monitor` from `$PATH`.
    pub fn new() -> Self {
        Self::with_command("dbus-monitor", Vec::<String>::new())
    }

    /// Use a different program. `leading_args` go before the monitor's
    /// own arguments.
    pub fn with_command(
        program: impl Into<String>,
        leading_args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            next_id: 1,
            running: HashMap::new(),
        }
    }

    fn spawn(&self, rule: &SignalMatch) -> Result<Child, BusError> {
        Command::new(&self.program)
            .args(&self.leading_args)
            .args(["--session", "--monitor"])
            .arg(rule.rule())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(BusError::Spawn)
    }
}

impl Default for DbusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BusSubscriber for DbusMonitor {
    fn subscribe(&mut self, rule: &SignalMatch) -> Result<Subscription, BusError> {
        let mut child = self.spawn(rule)?;
        let stdout = child.stdout.take().ok_or(BusError::NoStdout)?;
        let pid = child.id();

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let (tx, payloads) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_monitor(
            child,
            stdout,
            rule.clone(),
            tx,
            cancel.clone(),
        ));

        tracing::info!(subscription = id.0, pid, rule = %rule.rule(), "bus monitor started");
        self.running.insert(id, MonitorProcess { pid, cancel, task });
        Ok(Subscription { id, payloads })
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        let Some(process) = self.running.remove(&id) else {
            return;
        };
        if let Some(pid) = process.pid.and_then(|p| i32::try_from(p).ok()) {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::debug!(pid, error = %e, "SIGTERM to bus monitor failed");
            }
        }
        process.cancel.cancel();
        // The reader reaps the child on its own; nothing to await here.
        drop(process.task);
        tracing::info!(subscription = id.0, "bus monitor stopped");
    }
}

impl Drop for DbusMonitor {
    fn drop(&mut self) {
        let ids: Vec<_> = self.running.keys().copied().collect();
        for id in ids {
            self.unsubscribe(id);
        }
    }
}

/// Reader task: stdout lines → parser → payload channel.
async fn read_monitor(
    mut child: Child,
    stdout: ChildStdout,
    rule: SignalMatch,
    tx: UnboundedSender<Vec<BusValue>>,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(stdout, MonitorLines::new(MAX_LINE));
    let mut parser = MonitorParser::new();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next() => line,
            _ = tokio::time::sleep(IDLE_FLUSH), if parser.in_message() => {
                if !forward(parser.flush(), &rule, &tx) {
                    break;
                }
                continue;
            }
        };

        match line {
            Some(Ok(MonitorLine::Text(line))) => {
                if !forward(parser.push_line(&line), &rule, &tx) {
                    break;
                }
            }
            Some(Ok(MonitorLine::Lost(reason))) => {
                tracing::warn!(
                    ?reason,
                    max = MAX_LINE,
                    "bus monitor line skipped, dropping message"
                );
                parser.discard_current();
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "bus monitor output unreadable");
                break;
            }
            None => {
                forward(parser.flush(), &rule, &tx);
                tracing::warn!("bus monitor exited");
                break;
            }
        }
    }

    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "bus monitor reaped"),
        Ok(Err(e)) => tracing::debug!(error = %e, "waiting for bus monitor failed"),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "killing bus monitor failed");
            }
        }
    }
}

/// Send a matching message's payload. Returns `false` once the receiver
/// is gone.
fn forward(
    message: Option<BusMessage>,
    rule: &SignalMatch,
    tx: &UnboundedSender<Vec<BusValue>>,
) -> bool {
    let Some(message) = message else {
        return true;
    };
    let header = &message.header;
    if header.kind != "signal"
        || !rule.matches(&header.interface, &header.member, &header.path, &header.sender)
    {
        tracing::trace!(member = %header.member, "ignoring bus message");
        return true;
    }
    tx.send(message.args).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"cat <<'OUT'
signal time=1.0 sender=org.freedesktop.DBus -> destination=:1.9 serial=2 path=/org/freedesktop/DBus; interface=org.freedesktop.DBus; member=NameAcquired
   string ":1.9"
signal time=2.0 sender=:1.42 -> destination=(null destination) serial=9 path=/org/gtk/gio/DesktopAppInfo; interface=org.gtk.gio.DesktopAppInfo; member=Launched
   array of bytes "/usr/share/applications/org.example.Editor.desktop" + \0
   string "org.example.Editor"
   int64 4242
   array [
      string "/home/u/a.txt"
   ]
   array [
   ]
OUT
sleep 5"#;

    #[tokio::test]
    async fn forwards_matching_signals_only() {
        let mut monitor = DbusMonitor::with_command("sh", ["-c", SCRIPT, "sh"]);
        let mut sub = monitor.subscribe(&SignalMatch::launched()).unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), sub.payloads.recv())
            .await
            .expect("payload within timeout")
            .expect("channel open");
        assert_eq!(payload.len(), 5);
        assert_eq!(payload[2], BusValue::Int64(4242));

        monitor.unsubscribe(sub.id);
        let closed = tokio::time::timeout(Duration::from_secs(5), sub.payloads.recv())
            .await
            .expect("channel closes after unsubscribe");
        assert!(closed.is_none());
    }

    /// A launch whose file list holds a 70 000 byte `data:` URI, then an
    /// ordinary launch.
    const OVERSIZED_SCRIPT: &str = r#"big=$(head -c 70000 /dev/zero | tr '\0' a)
cat <<OUT
signal time=1.0 sender=:1.42 -> destination=(null destination) serial=7 path=/org/gtk/gio/DesktopAppInfo; interface=org.gtk.gio.DesktopAppInfo; member=Launched
   array of bytes "/usr/share/applications/org.example.Viewer.desktop" + \0
   string "org.example.Viewer"
   int64 1111
   array [
      string "data:${big}"
   ]
   array [
   ]
signal time=2.0 sender=:1.42 -> destination=(null destination) serial=8 path=/org/gtk/gio/DesktopAppInfo; interface=org.gtk.gio.DesktopAppInfo; member=Launched
   array of bytes "/usr/share/applications/org.example.Editor.desktop" + \0
   string "org.example.Editor"
   int64 2222
   array [
      string "/home/u/b.txt"
   ]
   array [
   ]
OUT
sleep 5"#;

    #[tokio::test]
    async fn oversized_line_drops_only_its_message() {
        let mut monitor = DbusMonitor::with_command("sh", ["-c", OVERSIZED_SCRIPT, "sh"]);
        let mut sub = monitor.subscribe(&SignalMatch::launched()).unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), sub.payloads.recv())
            .await
            .expect("payload within timeout")
            .expect("subscription survives the oversized line");
        assert_eq!(payload[2], BusValue::Int64(2222));
        assert_eq!(
            payload[3],
            BusValue::Array(vec![BusValue::Str("/home/u/b.txt".into())])
        );

        monitor.unsubscribe(sub.id);
    }

    #[test]
    fn line_decoder_skips_long_and_invalid_lines() {
        let mut codec = MonitorLines::new(8);
        let mut buf = BytesMut::from(&b"short\nmuch too long line\n\xff\xfe\nok\n"[..]);

        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                MonitorLine::Text("short".into()),
                MonitorLine::Lost(LostLine::TooLong),
                MonitorLine::Lost(LostLine::NotUtf8),
                MonitorLine::Text("ok".into()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_program_fails_to_subscribe() {
        let mut monitor =
            DbusMonitor::with_command("/nonexistent/dbus-monitor", Vec::<String>::new());
        assert!(matches!(
            monitor.subscribe(&SignalMatch::launched()),
            Err(BusError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_ignored() {
        let mut monitor = DbusMonitor::new();
        monitor.unsubscribe(SubscriptionId(99));
    }
}
