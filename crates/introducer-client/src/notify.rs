//! Subscriber notification: runs local callbacks off the event loop.
//!
//! Deliveries go through one FIFO task, so a subscriber sees announcements
//! in the order the client decided them and never runs inside the event that
//! produced them. A panicking callback is logged and the task carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use introducer_core::AnnouncementRecord;

use crate::subscriber::LocalSubscription;

enum Command {
    Deliver {
        subscription: Arc<LocalSubscription>,
        node_id: String,
        announcement: Arc<AnnouncementRecord>,
    },
    Flush(oneshot::Sender<()>),
}

pub struct Notifier {
    tx: mpsc::UnboundedSender<Command>,
}

impl Notifier {
    /// Spawn the delivery task. It exits once the notifier is dropped and the
    /// queue is drained.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(rx));
        Self { tx }
    }

    pub fn deliver(
        &self,
        subscription: Arc<LocalSubscription>,
        node_id: String,
        announcement: Arc<AnnouncementRecord>,
    ) {
        let command = Command::Deliver {
            subscription,
            node_id,
            announcement,
        };
        if self.tx.send(command).is_err() {
            tracing::warn!("notifier task is gone, dropping delivery");
        }
    }

    /// Resolve `done` once every delivery queued before it has run.
    pub fn flush(&self, done: oneshot::Sender<()>) {
        // If the task is gone there is nothing left to wait for; dropping
        // `done` wakes the waiter.
        let _ = self.tx.send(Command::Flush(done));
    }
}

async fn delivery_loop(mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver {
                subscription,
                node_id,
                announcement,
            } => {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    (subscription.callback)(&node_id, &announcement, &subscription.extra_args)
                }));
                if outcome.is_err() {
                    tracing::error!(
                        service = %subscription.service_name,
                        node_id = %node_id,
                        "announcement callback panicked"
                    );
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
