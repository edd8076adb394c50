//! In-memory introducer for tests.
//!
//! [`MemoryIntroducer`] is a [`Transport`] whose far end is a scripted
//! introducer living in the same process. It records every call, keeps
//! subscriptions per connection, and can be told to drop and re-establish
//! the connection, to speak only the v1 protocol, or to fail specific
//! methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use introducer_core::codec;
use introducer_core::wire::{
    VersionMap, APPLICATION_VERSION_KEY, INTRODUCER_PROTOCOL_V1, INTRODUCER_PROTOCOL_V2,
    SUBSCRIBER_CLIENT_V2_INTERFACE,
};
use introducer_core::{AnnouncementRecord, SignedAnnouncement};

use crate::transport::{
    ConnectionSink, DisconnectNotice, InboundCall, IntroducerCall, Reconnector, Referenceable,
    RemoteError, RemoteReference, SubscriberEndpoint, Transport, TransportError,
};

/// Which protocol the fake introducer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntroducerFlavor {
    /// Accepts `publish_v2`/`subscribe_v2`.
    V2,
    /// Rejects the v2 methods as unknown.
    V1,
}

/// One call the client made.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub connection: u64,
    pub call: IntroducerCall,
    /// False when the introducer refused it.
    pub accepted: bool,
}

impl RecordedCall {
    pub fn method(&self) -> &'static str {
        self.call.method_name()
    }

    /// Service the call is about. For publishes this is read out of the
    /// announcement.
    pub fn service_name(&self) -> Option<String> {
        match &self.call {
            IntroducerCall::PublishV2 { announcement, .. } => {
                serde_json::from_str::<AnnouncementRecord>(&announcement.message)
                    .ok()
                    .map(|r| r.service_name)
            }
            IntroducerCall::Publish { announcement } => Some(announcement.service_name.clone()),
            IntroducerCall::SubscribeV2 { service_name, .. }
            | IntroducerCall::Subscribe { service_name, .. } => Some(service_name.clone()),
        }
    }
}

struct Subscription {
    connection: u64,
    service_name: String,
    endpoint: Arc<dyn SubscriberEndpoint>,
}

struct State {
    flavor: IntroducerFlavor,
    version: Option<VersionMap>,
    has_get_version: bool,
    reachable: bool,
    stopped: bool,
    sink: Option<ConnectionSink>,
    current: Option<Arc<MemoryConnection>>,
    next_connection: u64,
    calls: Vec<RecordedCall>,
    subscriptions: Vec<Subscription>,
    registered: Vec<(String, Arc<dyn Referenceable>)>,
    failing: Vec<&'static str>,
}

#[derive(Clone)]
pub struct MemoryIntroducer {
    state: Arc<Mutex<State>>,
}

impl MemoryIntroducer {
    pub fn new(flavor: IntroducerFlavor) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                flavor,
                version: None,
                has_get_version: true,
                reachable: true,
                stopped: false,
                sink: None,
                current: None,
                next_connection: 0,
                calls: Vec::new(),
                subscriptions: Vec::new(),
                registered: Vec::new(),
                failing: Vec::new(),
            })),
        }
    }

    pub fn furl(&self) -> &'static str {
        "pb://introducertub@memory/introducer"
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Answer `get_version` with `version` instead of the flavor's map.
    pub fn set_version(&self, version: VersionMap) {
        self.lock().version = Some(version);
    }

    /// Pretend to predate `get_version`.
    pub fn remove_get_version(&self) {
        self.lock().has_get_version = false;
    }

    /// While unreachable, no connection is handed out.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Fail every call to `method` with a non-capability error.
    pub fn fail_method(&self, method: &'static str) {
        self.lock().failing.push(method);
    }

    /// Drop the current connection, firing its disconnect notices.
    pub fn disconnect(&self) {
        let current = {
            let mut state = self.lock();
            let current = state.current.take();
            if let Some(conn) = &current {
                state.subscriptions.retain(|s| s.connection != conn.id);
            }
            current
        };
        if let Some(conn) = current {
            conn.kill();
        }
    }

    /// Hand the client a fresh connection, as a reconnector would.
    pub fn reconnect(&self) {
        let (sink, conn) = {
            let mut state = self.lock();
            if state.stopped || !state.reachable {
                return;
            }
            let Some(sink) = state.sink.clone() else {
                return;
            };
            (sink, self.open(&mut state))
        };
        sink(conn);
    }

    fn open(&self, state: &mut State) -> Arc<MemoryConnection> {
        state.next_connection += 1;
        let conn = Arc::new(MemoryConnection {
            id: state.next_connection,
            state: self.state.clone(),
            alive: AtomicBool::new(true),
            notices: Mutex::new(Vec::new()),
        });
        state.current = Some(conn.clone());
        conn
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method() == method)
            .collect()
    }

    /// Number of connections handed out so far.
    pub fn connection_count(&self) -> u64 {
        self.lock().next_connection
    }

    pub fn registered_count(&self) -> usize {
        self.lock().registered.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Services subscribed on the live connection, with the interface of the
    /// endpoint that subscribed.
    pub fn subscriptions(&self) -> Vec<(String, &'static str)> {
        self.lock()
            .subscriptions
            .iter()
            .map(|s| (s.service_name.clone(), s.endpoint.remote_interface_name()))
            .collect()
    }

    /// Deliver `batch` to every live subscriber of `service_name`, in the
    /// dialect each one subscribed with. Returns how many were called.
    pub fn announce(&self, service_name: &str, batch: &[SignedAnnouncement]) -> usize {
        let mut delivered = 0;
        for endpoint in self.endpoints_for(Some(service_name)) {
            let call = if endpoint.remote_interface_name() == SUBSCRIBER_CLIENT_V2_INTERFACE {
                InboundCall::AnnounceV2(batch.to_vec())
            } else {
                InboundCall::Announce(
                    batch
                        .iter()
                        .filter_map(|a| codec::convert_v2_to_v1(a).ok())
                        .collect(),
                )
            };
            if endpoint.receive(call).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send `call` verbatim to every live subscriber of `service_name`.
    pub fn send_to_subscribers(&self, service_name: &str, call: InboundCall) -> usize {
        self.endpoints_for(Some(service_name))
            .into_iter()
            .filter(|endpoint| endpoint.receive(call.clone()).is_ok())
            .count()
    }

    pub fn set_encoding_parameters(&self, parameters: Value) -> usize {
        self.endpoints_for(None)
            .into_iter()
            .filter(|endpoint| {
                endpoint
                    .receive(InboundCall::SetEncodingParameters(parameters.clone()))
                    .is_ok()
            })
            .count()
    }

    fn endpoints_for(&self, service_name: Option<&str>) -> Vec<Arc<dyn SubscriberEndpoint>> {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| service_name.map_or(true, |name| s.service_name == name))
            .map(|s| s.endpoint.clone())
            .collect()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MemoryIntroducer {
    fn connect_to(
        &self,
        _furl: &str,
        sink: ConnectionSink,
    ) -> Result<Box<dyn Reconnector>, TransportError> {
        let conn = {
            let mut state = self.lock();
            state.sink = Some(sink.clone());
            state.stopped = false;
            if state.reachable {
                Some(self.open(&mut state))
            } else {
                None
            }
        };
        if let Some(conn) = conn {
            sink(conn);
        }
        Ok(Box::new(MemoryReconnector {
            state: self.state.clone(),
        }))
    }

    async fn get_reference(&self, furl: &str) -> Result<Arc<dyn RemoteReference>, TransportError> {
        let state = self.lock();
        if !state.reachable {
            return Err(TransportError::ConnectFailed {
                furl: furl.to_string(),
                reason: "introducer unreachable".into(),
            });
        }
        match &state.current {
            Some(conn) => Ok(conn.clone()),
            None => Err(TransportError::ConnectFailed {
                furl: furl.to_string(),
                reason: "no connection".into(),
            }),
        }
    }

    fn register_reference(&self, object: Arc<dyn Referenceable>) -> Result<String, TransportError> {
        let mut state = self.lock();
        let furl = format!("pb://memorytub@memory/ref-{}", state.registered.len());
        state.registered.push((furl.clone(), object));
        Ok(furl)
    }
}

struct MemoryReconnector {
    state: Arc<Mutex<State>>,
}

impl Reconnector for MemoryReconnector {
    fn stop(&self) {
        let mut state = lock(&self.state);
        state.stopped = true;
        state.sink = None;
    }
}

pub struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<State>>,
    alive: AtomicBool,
    notices: Mutex<Vec<DisconnectNotice>>,
}

impl MemoryConnection {
    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let notices: Vec<_> = self
            .notices
            .lock()
            .map(|mut n| n.drain(..).collect())
            .unwrap_or_default();
        for notice in notices {
            notice();
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteReference for MemoryConnection {
    async fn get_version(&self) -> Result<VersionMap, RemoteError> {
        if !self.is_alive() {
            return Err(RemoteError::ConnectionLost);
        }
        let state = lock(&self.state);
        if !state.has_get_version {
            return Err(RemoteError::MethodNotFound("get_version".into()));
        }
        if let Some(version) = &state.version {
            return Ok(version.clone());
        }
        let mut version = Map::new();
        version.insert(INTRODUCER_PROTOCOL_V1.into(), Value::Object(Map::new()));
        if state.flavor == IntroducerFlavor::V2 {
            version.insert(INTRODUCER_PROTOCOL_V2.into(), Value::Object(Map::new()));
        }
        version.insert(APPLICATION_VERSION_KEY.into(), Value::String("memory-introducer".into()));
        Ok(version)
    }

    async fn call_remote(&self, call: IntroducerCall) -> Result<(), RemoteError> {
        if !self.is_alive() {
            return Err(RemoteError::ConnectionLost);
        }
        let mut state = lock(&self.state);
        let method = call.method_name();
        let outcome = if state.failing.contains(&method) {
            Err(RemoteError::Failed(format!("{method} is broken")))
        } else if state.flavor == IntroducerFlavor::V1
            && matches!(
                call,
                IntroducerCall::PublishV2 { .. } | IntroducerCall::SubscribeV2 { .. }
            )
        {
            Err(RemoteError::MethodNotFound(method.to_string()))
        } else {
            Ok(())
        };

        if outcome.is_ok() {
            match &call {
                IntroducerCall::SubscribeV2 {
                    subscriber,
                    service_name,
                    ..
                }
                | IntroducerCall::Subscribe {
                    subscriber,
                    service_name,
                } => state.subscriptions.push(Subscription {
                    connection: self.id,
                    service_name: service_name.clone(),
                    endpoint: subscriber.clone(),
                }),
                _ => {}
            }
        }
        state.calls.push(RecordedCall {
            connection: self.id,
            call,
            accepted: outcome.is_ok(),
        });
        outcome
    }

    fn notify_on_disconnect(&self, notice: DisconnectNotice) {
        if !self.is_alive() {
            notice();
            return;
        }
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
