//! The introducer client: one event loop owning all protocol state.
//!
//! [`IntroducerClient`] is a cheap handle. Every method enqueues an event
//! and returns; the loop applies events one at a time, so the table, the
//! published set and the connection state have a single mutator. Outbound
//! RPCs run as spawned tasks and report back through the same queue, tagged
//! with the connection generation they were issued on.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use introducer_core::codec;
use introducer_core::config::ClientConfig;
use introducer_core::wire::{
    IntroducerProtocol, NodeIdentity, SubscriberInfo, VersionMap, STUB_CLIENT_INTERFACE,
    STUB_CLIENT_SERVICE,
};
use introducer_core::{AnnouncementIndex, AnnouncementRecord, SignedAnnouncement, SigningKey};

use crate::connection::{check_version, ConnectionManager, ConnectionPhase};
use crate::counters::{IntroducerMetrics, OutstandingRpc};
use crate::endpoint::InboundEndpoint;
use crate::error::ClientError;
use crate::notify::Notifier;
use crate::publisher::Publisher;
use crate::subscriber::{Endpoints, LocalSubscription, Subscriber};
use crate::table::{AnnouncementEntry, AnnouncementTable};
use crate::transport::{Reconnector, Referenceable, RemoteReference, Transport};

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub introducer_furl: String,
    pub node: NodeIdentity,
}

impl ClientSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            introducer_furl: config.introducer.furl.clone(),
            node: config.node_identity(),
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// What the client exposes about its introducer connection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStatus {
    pub phase: ConnectionPhase,
    /// Version map of the current introducer, once checked.
    pub introducer_version: Option<VersionMap>,
    /// Why the last connection attempt was abandoned.
    pub introducer_error: Option<String>,
    /// Last parameters the introducer sent, verbatim.
    pub encoding_parameters: Option<Value>,
}

// ── Events ────────────────────────────────────────────────────────────────────

pub(crate) enum Event {
    /// The reconnector produced a connection.
    Connected(Arc<dyn RemoteReference>),
    VersionChecked {
        generation: u64,
        publisher: Arc<dyn RemoteReference>,
        result: Result<VersionMap, ClientError>,
    },
    Disconnected {
        generation: u64,
    },
    Publish {
        service_name: String,
        announcement: SignedAnnouncement,
    },
    Subscribe(Arc<LocalSubscription>),
    Announcements {
        batch: Vec<SignedAnnouncement>,
        protocol: IntroducerProtocol,
        /// v1 elements the endpoint could not convert.
        unconvertible: usize,
    },
    EncodingParameters(Value),
    /// A subscription fell back to the v1 `subscribe`.
    LegacySubscribed {
        generation: u64,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloning is cheap. When the last clone is dropped the client stops, the
/// same as calling [`IntroducerClient::stop`].
#[derive(Clone)]
pub struct IntroducerClient {
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<ClientStatus>,
    table: AnnouncementTable,
    node: Arc<NodeIdentity>,
    _shutdown: Arc<ShutdownOnDrop>,
}

/// The loop, its endpoints and the reconnector all hold senders, so the
/// queue never closes on its own.
struct ShutdownOnDrop(mpsc::UnboundedSender<Event>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        if self.0.send(Event::Shutdown).is_ok() {
            tracing::debug!("last client handle dropped, shutting down");
        }
    }
}

impl IntroducerClient {
    /// Start connecting to the introducer and spawn the event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        transport: Arc<dyn Transport>,
        settings: ClientSettings,
        metrics: Arc<dyn IntroducerMetrics>,
    ) -> Result<Self, ClientError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let table = AnnouncementTable::new();

        let endpoints = Endpoints {
            v2: Arc::new(InboundEndpoint::new(IntroducerProtocol::V2, events_tx.clone())),
            v1: Arc::new(InboundEndpoint::new(IntroducerProtocol::V1, events_tx.clone())),
        };
        let subscriber = Subscriber::new(
            table.clone(),
            SubscriberInfo::from(&settings.node),
            endpoints,
            Notifier::spawn(),
            metrics.clone(),
        );

        let sink_tx = events_tx.clone();
        let reconnector = transport.connect_to(
            &settings.introducer_furl,
            Arc::new(move |publisher| {
                let _ = sink_tx.send(Event::Connected(publisher));
            }),
        )?;

        let probe = transport.clone();
        let furl = settings.introducer_furl.clone();
        tokio::spawn(async move {
            if let Err(e) = probe.get_reference(&furl).await {
                tracing::warn!(error = %e, "initial introducer connection failed: perhaps it's down");
            }
        });

        let mut connection = ConnectionManager::new();
        connection.begin_connecting();
        status_tx.send_modify(|s| s.phase = connection.phase());

        let node = Arc::new(settings.node);
        let actor = ClientActor {
            transport,
            node: node.clone(),
            events: events_tx.clone(),
            connection,
            publisher: Publisher::new(metrics.clone()),
            subscriber,
            metrics,
            status: status_tx,
            reconnector: Some(reconnector),
            stub_furl: None,
        };
        tokio::spawn(actor.run(events_rx));
        tracing::info!(introducer = %settings.introducer_furl, "introducer client started");

        Ok(Self {
            _shutdown: Arc::new(ShutdownOnDrop(events_tx.clone())),
            events: events_tx,
            status: status_rx,
            table,
            node,
        })
    }

    /// Build and sign this node's announcement for one service.
    pub fn create_announcement(
        &self,
        furl: &str,
        service_name: &str,
        remote_interface_name: &str,
        signing_key: Option<&SigningKey>,
    ) -> Result<SignedAnnouncement, ClientError> {
        Ok(codec::create_announcement(
            furl,
            service_name,
            remote_interface_name,
            &self.node,
            signing_key,
        )?)
    }

    /// Publish (or replace) this node's announcement for `service_name`.
    pub fn publish(
        &self,
        furl: &str,
        service_name: &str,
        remote_interface_name: &str,
        signing_key: Option<&SigningKey>,
    ) -> Result<(), ClientError> {
        let announcement =
            self.create_announcement(furl, service_name, remote_interface_name, signing_key)?;
        self.send(Event::Publish {
            service_name: service_name.to_string(),
            announcement,
        })
    }

    /// Call `callback` for every new or changed announcement of
    /// `service_name`, starting with the ones already known.
    pub fn subscribe_to<F>(
        &self,
        service_name: &str,
        callback: F,
        extra_args: Vec<Value>,
    ) -> Result<(), ClientError>
    where
        F: Fn(&str, &AnnouncementRecord, &[Value]) + Send + Sync + 'static,
    {
        self.send(Event::Subscribe(Arc::new(LocalSubscription {
            service_name: service_name.to_string(),
            callback: Arc::new(callback),
            extra_args,
        })))
    }

    pub fn connected_to_introducer(&self) -> bool {
        self.status.borrow().phase == ConnectionPhase::Connected
    }

    pub fn introducer_error(&self) -> Option<String> {
        self.status.borrow().introducer_error.clone()
    }

    pub fn encoding_parameters(&self) -> Option<Value> {
        self.status.borrow().encoding_parameters.clone()
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Receiver that changes whenever the status does.
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Known announcements in arrival order.
    pub fn announcements(&self) -> Vec<(AnnouncementIndex, AnnouncementEntry)> {
        self.table.snapshot()
    }

    /// Resolves once every event queued before it has been applied and every
    /// callback it caused has run.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Flush(tx))?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Stop reconnecting and shut the event loop down.
    pub fn stop(&self) {
        let _ = self.events.send(Event::Shutdown);
    }

    fn send(&self, event: Event) -> Result<(), ClientError> {
        self.events.send(event).map_err(|_| ClientError::Stopped)
    }
}

/// Placeholder published to v1 introducers so they can count clients.
struct StubClient;

impl Referenceable for StubClient {
    fn remote_interface_name(&self) -> &'static str {
        STUB_CLIENT_INTERFACE
    }
}

// ── Event loop ────────────────────────────────────────────────────────────────

struct ClientActor {
    transport: Arc<dyn Transport>,
    node: Arc<NodeIdentity>,
    events: mpsc::UnboundedSender<Event>,
    connection: ConnectionManager,
    publisher: Publisher,
    subscriber: Subscriber,
    metrics: Arc<dyn IntroducerMetrics>,
    status: watch::Sender<ClientStatus>,
    reconnector: Option<Box<dyn Reconnector>>,
    /// Set once the stub has been registered; never registered twice.
    stub_furl: Option<String>,
}

impl ClientActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Connected(publisher) => self.on_connected(publisher),
                Event::VersionChecked {
                    generation,
                    publisher,
                    result,
                } => self.on_version_checked(generation, publisher, result),
                Event::Disconnected { generation } => self.on_disconnected(generation),
                Event::Publish {
                    service_name,
                    announcement,
                } => {
                    self.publisher.insert(service_name, announcement);
                    self.publish_all();
                }
                Event::Subscribe(subscription) => {
                    self.subscriber.add(subscription);
                    self.subscriber.resync(&mut self.connection, &self.events);
                }
                Event::Announcements {
                    batch,
                    protocol,
                    unconvertible,
                } => {
                    self.subscriber.got_announcements(batch, protocol);
                    self.subscriber.rejected(unconvertible);
                }
                Event::EncodingParameters(parameters) => {
                    tracing::debug!(parameters = %parameters, "encoding parameters from introducer");
                    self.status
                        .send_modify(|s| s.encoding_parameters = Some(parameters));
                }
                Event::LegacySubscribed { generation } => self.on_legacy_subscribed(generation),
                Event::Flush(done) => self.subscriber.notifier().flush(done),
                Event::Shutdown => break,
            }
        }

        if let Some(reconnector) = self.reconnector.take() {
            reconnector.stop();
        }
        self.connection.disconnected(self.connection.generation());
        self.publish_status();
        tracing::info!("introducer client stopped");
    }

    fn on_connected(&mut self, publisher: Arc<dyn RemoteReference>) {
        let generation = self.connection.raw_connected();
        self.publish_status();
        tracing::info!(generation, "connected to introducer, getting versions");

        let events = self.events.clone();
        let rpc = OutstandingRpc::start(&self.metrics);
        tokio::spawn(async move {
            let result = check_version(&publisher).await;
            let _ = events.send(Event::VersionChecked {
                generation,
                publisher,
                result,
            });
            drop(rpc);
        });
    }

    fn on_version_checked(
        &mut self,
        generation: u64,
        publisher: Arc<dyn RemoteReference>,
        result: Result<VersionMap, ClientError>,
    ) {
        if !self.connection.is_current(generation) {
            tracing::debug!(generation, "ignoring version check from a superseded connection");
            return;
        }
        let version = match result {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(error = %e, "introducer connection rejected");
                self.connection.version_rejected(generation);
                self.status.send_modify(|s| {
                    s.phase = ConnectionPhase::Disconnected;
                    s.introducer_error = Some(e.to_string());
                });
                return;
            }
        };

        tracing::info!(version = ?version, "got introducer version");
        let events = self.events.clone();
        publisher.notify_on_disconnect(Box::new(move || {
            let _ = events.send(Event::Disconnected { generation });
        }));
        self.connection.established(generation, publisher);
        self.publish_all();
        self.subscriber.resync(&mut self.connection, &self.events);

        self.status.send_modify(|s| {
            s.phase = ConnectionPhase::Connected;
            s.introducer_version = Some(version);
            s.introducer_error = None;
        });
    }

    fn on_disconnected(&mut self, generation: u64) {
        if !self.connection.disconnected(generation) {
            tracing::debug!(generation, "ignoring disconnect of a superseded connection");
            return;
        }
        tracing::info!(generation, "lost connection to introducer");
        self.publish_status();
    }

    fn on_legacy_subscribed(&mut self, generation: u64) {
        if !self.connection.is_current(generation) {
            return;
        }
        if self.stub_furl.is_some() {
            return;
        }
        let furl = match self.transport.register_reference(Arc::new(StubClient)) {
            Ok(furl) => furl,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register stub client");
                return;
            }
        };
        tracing::debug!(furl = %furl, "registered stub client");
        match codec::create_announcement(
            &furl,
            STUB_CLIENT_SERVICE,
            STUB_CLIENT_INTERFACE,
            &self.node,
            None,
        ) {
            Ok(announcement) => {
                self.publisher
                    .insert(STUB_CLIENT_SERVICE.to_string(), announcement);
                self.publish_all();
            }
            Err(e) => tracing::warn!(error = %e, "failed to build stub client announcement"),
        }
        self.stub_furl = Some(furl);
    }

    fn publish_all(&self) {
        match self.connection.publisher() {
            Some(publisher) => self.publisher.resync(publisher),
            None => tracing::debug!("want to publish, but no introducer yet"),
        }
    }

    fn publish_status(&self) {
        let phase = self.connection.phase();
        self.status.send_modify(|s| s.phase = phase);
    }
}
