//! Introducer client integration test harness.
//!
//! Every test runs a real client event loop against the in-memory
//! introducer from `introducer_client::testing`:
//!
//!   cargo test --test integration
//!
//! Set RUST_LOG=introducer_client=debug to see protocol traffic.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde_json::Value;

use introducer_client::testing::{wait_for, IntroducerFlavor, MemoryIntroducer};
use introducer_client::{ClientSettings, DebugCounters, IntroducerClient};
use introducer_core::codec;
use introducer_core::wire::NodeIdentity;
use introducer_core::{AnnouncementRecord, SignedAnnouncement, SigningKey};

mod legacy;
mod publishing;
mod subscribing;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const STORAGE: &str = "storage";
pub const HELPER: &str = "helper";
pub const STORAGE_INTERFACE: &str = "RIStorageServer.tahoe.allmydata.com";

/// Install a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn node_identity(nickname: &str, version: &str) -> NodeIdentity {
    NodeIdentity {
        nickname: nickname.to_string(),
        my_version: version.to_string(),
        oldest_supported: "1.0".to_string(),
        app_versions: Default::default(),
    }
}

/// A client wired to its own in-memory introducer.
pub struct Node {
    pub introducer: MemoryIntroducer,
    pub client: IntroducerClient,
    pub counters: Arc<DebugCounters>,
}

impl Node {
    pub fn start(flavor: IntroducerFlavor) -> Result<Self> {
        Self::start_with(MemoryIntroducer::new(flavor))
    }

    pub fn start_with(introducer: MemoryIntroducer) -> Result<Self> {
        init_tracing();
        let counters = Arc::new(DebugCounters::new());
        let settings = ClientSettings {
            introducer_furl: introducer.furl().to_string(),
            node: node_identity("alice", "1.0"),
        };
        let client =
            IntroducerClient::start(Arc::new(introducer.clone()), settings, counters.clone())?;
        Ok(Self {
            introducer,
            client,
            counters,
        })
    }

    /// Wait for the version check to pass and the resulting resync to finish.
    pub async fn connected(&self) -> Result<()> {
        if !wait_for(|| self.client.connected_to_introducer()).await {
            bail!("client never connected: {:?}", self.client.status());
        }
        self.settle().await
    }

    pub async fn disconnected(&self) -> Result<()> {
        if !wait_for(|| !self.client.connected_to_introducer()).await {
            bail!("client never noticed the disconnect");
        }
        self.settle().await
    }

    /// Wait until no RPC is outstanding and every queued event and callback
    /// has been processed.
    pub async fn settle(&self) -> Result<()> {
        for _ in 0..50 {
            if !wait_for(|| self.counters.outstanding() == 0).await {
                bail!("{} RPCs never completed", self.counters.outstanding());
            }
            self.client.flush().await?;
            if self.counters.outstanding() == 0 {
                return Ok(());
            }
        }
        bail!("client kept issuing RPCs")
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub node_id: String,
    pub announcement: AnnouncementRecord,
    pub extra_args: Vec<Value>,
}

pub type Deliveries = Arc<Mutex<Vec<Delivery>>>;

/// Subscribe to `service_name`, collecting every callback.
pub fn record_deliveries(
    client: &IntroducerClient,
    service_name: &str,
    extra_args: Vec<Value>,
) -> Result<Deliveries> {
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = deliveries.clone();
    client.subscribe_to(
        service_name,
        move |node_id: &str, announcement: &AnnouncementRecord, extra_args: &[Value]| {
            sink.lock().unwrap().push(Delivery {
                node_id: node_id.to_string(),
                announcement: announcement.clone(),
                extra_args: extra_args.to_vec(),
            });
        },
        extra_args,
    )?;
    Ok(deliveries)
}

pub fn node_ids(deliveries: &Deliveries) -> Vec<String> {
    deliveries
        .lock()
        .unwrap()
        .iter()
        .map(|d| d.node_id.clone())
        .collect()
}

/// Another node's announcement of `service_name`, reachable through `tubid`.
pub fn announcement(
    service_name: &str,
    tubid: &str,
    version: &str,
    key: Option<&SigningKey>,
) -> Result<SignedAnnouncement> {
    Ok(codec::create_announcement(
        &format!("pb://{tubid}@tcp:10.0.0.1:4567/{service_name}"),
        service_name,
        STORAGE_INTERFACE,
        &node_identity(tubid, version),
        key,
    )?)
}
