//! Daemon lifecycle — enable wires the pipeline up, disable tears it down.
//!
//! Pipeline: bus subscription → signal decoder → coordinator → store
//! writer. Payloads are decoded in the order the bus delivers them; each
//! decoded launch is handed to the coordinator without waiting for it.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::bus::{BusError, BusSubscriber, SignalMatch, SubscriptionId};
use crate::config::Config;
use crate::correlate::{Coordinator, WindowResolver};
use crate::resolver::{DescriptorLookup, RuntimeLookup};
use crate::signal::{self, BusValue};
use crate::store::{StateStore, spawn_writer};

/// Host capabilities the daemon runs on.
pub struct Collaborators {
    pub bus: Box<dyn BusSubscriber>,
    pub descriptors: Arc<dyn DescriptorLookup>,
    pub runtime: Arc<dyn RuntimeLookup>,
}

/// Startup failure.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to start state writer: {0}")]
    Writer(#[source] std::io::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// A running daemon.
pub struct Daemon {
    bus: Box<dyn BusSubscriber>,
    subscription: SubscriptionId,
    coordinator: Arc<Coordinator>,
    dispatch: JoinHandle<()>,
    writer: std::thread::JoinHandle<()>,
    bus_closed: CancellationToken,
}

impl Daemon {
    /// Start the store writer and subscribe to launch signals.
    pub async fn enable(config: &Config, parts: Collaborators) -> Result<Self, DaemonError> {
        let Collaborators {
            mut bus,
            descriptors,
            runtime,
        } = parts;

        let store = StateStore::new(&config.state_file);
        let (handle, writer) = spawn_writer(store).map_err(DaemonError::Writer)?;
        match handle.snapshot().await {
            Ok(map) => tracing::info!(
                path = %config.state_file.display(),
                applications = map.len(),
                "state loaded"
            ),
            Err(e) => tracing::warn!(error = %e, "state writer unavailable"),
        }

        let coordinator = Arc::new(Coordinator::new(
            WindowResolver::new(runtime, config.poll),
            handle,
        ));

        let subscription = bus.subscribe(&SignalMatch::launched())?;
        let bus_closed = CancellationToken::new();
        let dispatch = tokio::spawn(dispatch(
            subscription.payloads,
            descriptors,
            Arc::clone(&coordinator),
            config.skip_empty,
            bus_closed.clone(),
        ));

        tracing::info!(
            interval_ms = config.poll.interval.as_millis() as u64,
            max_attempts = config.poll.max_attempts,
            "enabled"
        );

        Ok(Self {
            bus,
            subscription: subscription.id,
            coordinator,
            dispatch,
            writer,
            bus_closed,
        })
    }

    /// Completes when the bus subscription ends on its own.
    pub fn bus_closed(&self) -> WaitForCancellationFuture<'_> {
        self.bus_closed.cancelled()
    }

    /// Unsubscribe, cancel pending resolutions, and stop the writer.
    pub async fn disable(self) {
        let Self {
            mut bus,
            subscription,
            coordinator,
            dispatch,
            writer,
            bus_closed: _,
        } = self;

        bus.unsubscribe(subscription);
        dispatch.abort();
        if let Err(e) = dispatch.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "dispatch task failed");
            }
        }

        coordinator.shutdown().await;
        // Last handle to the store goes with the coordinator.
        drop(coordinator);
        match tokio::task::spawn_blocking(move || writer.join()).await {
            Ok(Ok(())) => {}
            _ => tracing::warn!("state writer did not stop cleanly"),
        }

        tracing::info!("disabled");
    }
}

async fn dispatch(
    mut payloads: UnboundedReceiver<Vec<BusValue>>,
    descriptors: Arc<dyn DescriptorLookup>,
    coordinator: Arc<Coordinator>,
    skip_empty: bool,
    bus_closed: CancellationToken,
) {
    while let Some(payload) = payloads.recv().await {
        match signal::decode(&payload, descriptors.as_ref()) {
            Ok(event) if skip_empty && event.uris.is_empty() => {
                tracing::debug!(app_id = %event.app_id, "launch without files, skipped")
            }
            Ok(event) => {
                tracing::debug!(
                    app_id = %event.app_id,
                    pid = event.pid,
                    uris = event.uris.len(),
                    "launch received"
                );
                coordinator.on_launch_event(event);
            }
            Err(e) => tracing::warn!(error = %e, "dropping launch signal"),
        }
    }
    tracing::debug!("launch signal stream ended");
    bus_closed.cancel();
}
