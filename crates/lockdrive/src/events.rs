//! Share event reconciliation
//!
//! One background task per session long-polls the share's event stream
//! and applies link events to the store. The foreground synchronizes
//! with it through a pair of capacity-0 rendezvous channels:
//! [`Events::trigger_update`] returns only after a full drain cycle has
//! completed after the call was issued, which is what gives mutating
//! operations their before/after ordering guarantee.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{DriveClient, EventId, LinkEventType, ShareEvents};
use crate::config::DriveConfig;
use crate::error::DriveResult;
use crate::links::Links;

/// Handle to the session's event loop.
#[derive(Clone)]
pub struct Events {
    trigger_tx: flume::Sender<()>,
    ack_rx: flume::Receiver<()>,
    shutdown_tx: Arc<watch::Sender<()>>,
}

impl Events {
    /// Record the latest event id as the initial cursor and spawn the
    /// polling task.
    pub async fn start(
        client: Arc<dyn DriveClient>,
        links: Links,
        config: &DriveConfig,
    ) -> DriveResult<Self> {
        let share_id = links.share().id().clone();
        let cursor = client.latest_event_id(&share_id).await?;

        // Capacity-0 channels: the send itself is the rendezvous.
        let (trigger_tx, trigger_rx) = flume::bounded::<()>(0);
        let (ack_tx, ack_rx) = flume::bounded::<()>(0);
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let mut task = EventTask {
            client,
            links,
            share_id,
            cursor,
            poll_interval: config.poll_interval,
            fetch_retry_delay: config.fetch_retry_delay,
            trigger_rx,
            ack_tx,
            shutdown_rx,
        };

        tokio::spawn(async move {
            task.run().await;
        });

        Ok(Self {
            trigger_tx,
            ack_rx,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    /// Wake the loop and wait for a complete drain.
    ///
    /// On return, every event the server knew about at call time has been
    /// applied to the link tree. A no-op if the loop has shut down.
    pub async fn trigger_update(&self) {
        if self.trigger_tx.send_async(()).await.is_err() {
            tracing::warn!("event loop is gone, skipping drain");
            return;
        }
        let _ = self.ack_rx.recv_async().await;
    }

    /// Stop the background task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

struct EventTask {
    client: Arc<dyn DriveClient>,
    links: Links,
    share_id: crate::api::ShareId,
    cursor: EventId,
    poll_interval: std::time::Duration,
    fetch_retry_delay: std::time::Duration,
    trigger_rx: flume::Receiver<()>,
    ack_tx: flume::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
}

impl EventTask {
    async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await; // Skip first immediate tick

        tracing::debug!(share = %self.share_id, "event loop started");

        loop {
            let external_trigger = tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    tracing::debug!("event loop shutting down");
                    return;
                }
                trigger = self.trigger_rx.recv_async() => {
                    if trigger.is_err() {
                        // All foreground handles dropped
                        return;
                    }
                    true
                }
                _ = ticker.tick() => false,
            };

            if !self.drain().await {
                return;
            }

            if external_trigger {
                let _ = self.ack_tx.send_async(()).await;
            }
        }
    }

    /// Fetch and apply event batches until the stream runs dry.
    ///
    /// Returns `false` when cancelled mid-drain.
    async fn drain(&mut self) -> bool {
        loop {
            if self.shutdown_rx.has_changed().unwrap_or(true) {
                return false;
            }

            let batch = match self.client.share_events(&self.share_id, &self.cursor).await {
                Ok(batch) => batch,
                Err(err) => {
                    // Transient: retry the same cursor without advancing.
                    tracing::warn!(error = %err, "event fetch failed, retrying");
                    tokio::time::sleep(self.fetch_retry_delay).await;
                    continue;
                }
            };

            let done = batch.events.is_empty();

            if !done {
                self.apply(&batch);
                self.cursor = batch.next_id.clone();
            }

            if batch.refresh {
                match self.client.latest_event_id(&self.share_id).await {
                    Ok(latest) => self.cursor = latest,
                    Err(err) => {
                        tracing::warn!(error = %err, "cursor reset failed");
                    }
                }
            }

            if done {
                return true;
            }
        }
    }

    fn apply(&self, batch: &ShareEvents) {
        for event in &batch.events {
            match event.event_type {
                LinkEventType::Create
                | LinkEventType::Update
                | LinkEventType::UpdateMetadata => {}
                _ => continue,
            }

            if let Err(err) = self.links.on_event(event) {
                tracing::warn!(link = %event.link.id, error = %err, "failed to apply event");
            }
        }
    }
}
