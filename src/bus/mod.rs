//! Bus subscription — the seam between the correlator and D-Bus.
//!
//! The correlator only needs to subscribe to one broadcast signal and
//! receive its raw positional payload. [`BusSubscriber`] captures exactly
//! that; [`monitor::DbusMonitor`] implements it on top of `dbus-monitor`.

pub mod monitor;
pub mod text;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::signal::{self, BusValue};

/// Which broadcast signal to receive. The sender is always a wildcard
/// unless set; there is no argument filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMatch {
    pub sender: Option<String>,
    pub interface: String,
    pub member: String,
    pub path: String,
}

impl SignalMatch {
    /// `org.gtk.gio.DesktopAppInfo.Launched` from any sender.
    pub fn launched() -> Self {
        Self {
            sender: None,
            interface: signal::LAUNCHED_INTERFACE.into(),
            member: signal::LAUNCHED_MEMBER.into(),
            path: signal::LAUNCHED_PATH.into(),
        }
    }

    /// D-Bus match rule string for this subscription.
    pub fn rule(&self) -> String {
        let mut rule = format!(
            "type='signal',interface='{}',member='{}',path='{}'",
            self.interface, self.member, self.path
        );
        if let Some(sender) = &self.sender {
            rule.push_str(&format!(",sender='{sender}'"));
        }
        rule
    }

    /// Whether a received signal satisfies this match.
    pub fn matches(&self, interface: &str, member: &str, path: &str, sender: &str) -> bool {
        self.interface == interface
            && self.member == member
            && self.path == path
            && self.sender.as_deref().is_none_or(|s| s == sender)
    }
}

/// Handle returned by [`BusSubscriber::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Result of a successful subscription.
pub struct Subscription {
    pub id: SubscriptionId,
    /// One entry per signal delivery, in bus order. Closed when the
    /// subscription ends.
    pub payloads: UnboundedReceiver<Vec<BusValue>>,
}

/// Bus adapter error.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to start bus monitor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("bus monitor has no stdout")]
    NoStdout,
}

/// Subscribes to broadcast signals on a message bus.
pub trait BusSubscriber: Send {
    /// Start receiving payloads of signals matching `rule`.
    fn subscribe(&mut self, rule: &SignalMatch) -> Result<Subscription, BusError>;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&mut self, id: SubscriptionId);
}
