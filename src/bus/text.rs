//! Parser for `dbus-monitor --monitor` text output.
//!
//! `dbus-monitor` prints one header line per message at column 0,
//! followed by its arguments, one value per line and indented by nesting
//! depth:
//!
//! ```text
//! signal time=1700000000.123456 sender=:1.42 -> destination=(null destination) serial=9 path=/org/gtk/gio/DesktopAppInfo; interface=org.gtk.gio.DesktopAppInfo; member=Launched
//!    array of bytes "/usr/share/applications/org.gnome.TextEditor.desktop" + \0
//!    string "gnome-text-editor"
//!    int64 4242
//!    array [
//!       string "file:///home/u/a.txt"
//!    ]
//!    array [
//!       dict entry(
//!          string "origin-prgname"
//!          variant             array of bytes "gnome-shell" + \0
//!       )
//!    ]
//! ```
//!
//! There is no terminator after the last argument, so the parser hands
//! back a message either when the next header starts or when the caller
//! calls [`MonitorParser::flush`] after output goes idle.

use std::sync::LazyLock;

use regex::Regex;

use crate::signal::BusValue;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(signal|method call|method return|error)(?: time=\S+)? sender=(\S+) -> destination=.*? serial=\d+(?: reply_serial=\d+)?(?: path=([^;]*); interface=([^;]*); member=(\S+))?",
    )
    .expect("header regex is valid")
});

/// Header of one monitored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: String,
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
}

/// A fully parsed message.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub header: MessageHeader,
    pub args: Vec<BusValue>,
}

#[derive(Debug)]
enum FrameKind {
    Array,
    HexBytes,
    Struct,
    DictEntry,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    items: Vec<BusValue>,
    bytes: Vec<u8>,
    /// Number of `variant` prefixes the container was opened under.
    variants: usize,
}

#[derive(Debug)]
struct PendingString {
    kind: StringKind,
    text: String,
    variants: usize,
}

#[derive(Debug, Clone, Copy)]
enum StringKind {
    Str,
    ObjectPath,
    Signature,
}

/// Incremental, line-oriented parser.
#[derive(Debug, Default)]
pub struct MonitorParser {
    header: Option<MessageHeader>,
    args: Vec<BusValue>,
    stack: Vec<Frame>,
    pending: Option<PendingString>,
    /// Set when a line could not be understood; the message is dropped.
    broken: bool,
}

/// Outcome of parsing a single value line.
enum Line {
    Value(BusValue),
    Open(FrameKind),
    Close,
    HexRow(Vec<u8>),
    OpenString(StringKind, String),
}

impl MonitorParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a message has been started and not yet handed back.
    pub fn in_message(&self) -> bool {
        self.header.is_some()
    }

    /// Feed one line. Returns the previous message if this line starts a
    /// new one.
    pub fn push_line(&mut self, line: &str) -> Option<BusMessage> {
        if let Some(pending) = self.pending.as_mut() {
            pending.text.push('\n');
            if let Some(done) = line.strip_suffix('"') {
                pending.text.push_str(done);
                if let Some(pending) = self.pending.take() {
                    let value = wrap(string_value(pending.kind, pending.text), pending.variants);
                    self.attach(value);
                }
            } else {
                pending.text.push_str(line);
            }
            return None;
        }

        if let Some(caps) = HEADER.captures(line) {
            let finished = self.take_message();
            let field = |i: usize| caps.get(i).map_or("", |m| m.as_str()).to_string();
            self.header = Some(MessageHeader {
                kind: field(1),
                sender: field(2),
                path: field(3),
                interface: field(4),
                member: field(5),
            });
            return finished;
        }

        if self.header.is_none() || self.broken {
            return None;
        }
        self.push_value_line(line.trim());
        None
    }

    /// Drop the message in progress after one of its lines was lost.
    /// Lines up to the next header are ignored.
    pub fn discard_current(&mut self) {
        if self.header.is_some() {
            self.broken = true;
            self.pending = None;
        }
    }

    /// Hand back the current message if it is complete.
    ///
    /// An incomplete message (open containers, unterminated string) is
    /// kept so that later lines can finish it.
    pub fn flush(&mut self) -> Option<BusMessage> {
        if !self.broken && (!self.stack.is_empty() || self.pending.is_some()) {
            return None;
        }
        self.take_message()
    }

    /// End the current message unconditionally, returning it only if it
    /// parsed completely.
    fn take_message(&mut self) -> Option<BusMessage> {
        let complete = !self.broken && self.stack.is_empty() && self.pending.is_none();
        let header = self.header.take();
        let args = std::mem::take(&mut self.args);
        self.stack.clear();
        self.pending = None;
        self.broken = false;

        let header = header?;
        if !complete {
            tracing::debug!(member = %header.member, "dropping incomplete bus message");
            return None;
        }
        Some(BusMessage { header, args })
    }

    fn push_value_line(&mut self, line: &str) {
        let mut rest = line;
        let mut variants = 0;
        while let Some(inner) = rest.strip_prefix("variant") {
            if !inner.starts_with(char::is_whitespace) {
                break;
            }
            variants += 1;
            rest = inner.trim_start();
        }

        match parse_line(rest, self.stack.last()) {
            Some(Line::Value(value)) => self.attach(wrap(value, variants)),
            Some(Line::Open(kind)) => self.stack.push(Frame {
                kind,
                items: Vec::new(),
                bytes: Vec::new(),
                variants,
            }),
            Some(Line::Close) => self.close(),
            Some(Line::HexRow(bytes)) => {
                if let Some(frame) = self.stack.last_mut() {
                    frame.bytes.extend(bytes);
                }
            }
            Some(Line::OpenString(kind, text)) => {
                self.pending = Some(PendingString {
                    kind,
                    text,
                    variants,
                })
            }
            None => {
                tracing::debug!(line, "unrecognised dbus-monitor line");
                self.broken = true;
            }
        }
    }

    fn close(&mut self) {
        let Some(frame) = self.stack.pop() else {
            self.broken = true;
            return;
        };
        let value = match frame.kind {
            FrameKind::Array => BusValue::Array(frame.items),
            FrameKind::HexBytes => BusValue::Bytes(frame.bytes),
            FrameKind::Struct => BusValue::Struct(frame.items),
            FrameKind::DictEntry => {
                let mut items = frame.items.into_iter();
                match (items.next(), items.next(), items.next()) {
                    (Some(key), Some(value), None) => {
                        BusValue::DictEntry(Box::new(key), Box::new(value))
                    }
                    _ => {
                        self.broken = true;
                        return;
                    }
                }
            }
        };
        self.attach(wrap(value, frame.variants));
    }

    fn attach(&mut self, value: BusValue) {
        match self.stack.last_mut() {
            Some(frame) => frame.items.push(value),
            None => self.args.push(value),
        }
    }
}

fn wrap(mut value: BusValue, variants: usize) -> BusValue {
    for _ in 0..variants {
        value = BusValue::Variant(Box::new(value));
    }
    value
}

fn string_value(kind: StringKind, text: String) -> BusValue {
    match kind {
        StringKind::Str => BusValue::Str(text),
        StringKind::ObjectPath => BusValue::ObjectPath(text),
        StringKind::Signature => BusValue::Signature(text),
    }
}

fn parse_line(line: &str, top: Option<&Frame>) -> Option<Line> {
    if matches!(top, Some(Frame { kind: FrameKind::HexBytes, .. })) {
        if line == "]" {
            return Some(Line::Close);
        }
        let bytes = line
            .split_whitespace()
            .map(|b| u8::from_str_radix(b, 16).ok())
            .collect::<Option<Vec<_>>>()?;
        return Some(Line::HexRow(bytes));
    }

    match line {
        "]" | "}" | ")" => return Some(Line::Close),
        "array [" => return Some(Line::Open(FrameKind::Array)),
        "array of bytes [" => return Some(Line::Open(FrameKind::HexBytes)),
        "struct {" => return Some(Line::Open(FrameKind::Struct)),
        "dict entry(" => return Some(Line::Open(FrameKind::DictEntry)),
        _ => {}
    }

    if let Some(rest) = line.strip_prefix("array of bytes \"") {
        let (text, nul) = match rest.strip_suffix("\" + \\0") {
            Some(text) => (text, true),
            None => (rest.strip_suffix('"')?, false),
        };
        let mut bytes = text.as_bytes().to_vec();
        if nul {
            bytes.push(0);
        }
        return Some(Line::Value(BusValue::Bytes(bytes)));
    }

    for (prefix, kind) in [
        ("string \"", StringKind::Str),
        ("object path \"", StringKind::ObjectPath),
        ("signature \"", StringKind::Signature),
    ] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some(match rest.strip_suffix('"') {
                Some(text) => Line::Value(string_value(kind, text.to_string())),
                None => Line::OpenString(kind, rest.to_string()),
            });
        }
    }

    let (ty, value) = line.split_once(' ')?;
    let value = value.trim();
    let parsed = match ty {
        "byte" => BusValue::Byte(value.parse().ok()?),
        "boolean" => BusValue::Bool(value.parse().ok()?),
        "int16" => BusValue::Int16(value.parse().ok()?),
        "uint16" => BusValue::Uint16(value.parse().ok()?),
        "int32" => BusValue::Int32(value.parse().ok()?),
        "uint32" => BusValue::Uint32(value.parse().ok()?),
        "int64" => BusValue::Int64(value.parse().ok()?),
        "uint64" => BusValue::Uint64(value.parse().ok()?),
        "double" => BusValue::Double(value.parse().ok()?),
        _ => return None,
    };
    Some(Line::Value(parsed))
}
