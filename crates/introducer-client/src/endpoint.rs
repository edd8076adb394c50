//! The object the introducer calls back.
//!
//! One type serves both subscriber interfaces. The v2 instance is what
//! `subscribe_v2` hands over; the v1 instance is the adapter for legacy
//! `subscribe` and turns legacy tuples into unsigned v2 announcements before
//! anything else sees them. Both only forward onto the client's event queue.

use tokio::sync::mpsc::UnboundedSender;

use introducer_core::codec;
use introducer_core::wire::{
    IntroducerProtocol, SUBSCRIBER_CLIENT_V1_INTERFACE, SUBSCRIBER_CLIENT_V2_INTERFACE,
};
use introducer_core::SignedAnnouncement;

use crate::client::Event;
use crate::transport::{InboundCall, Referenceable, RemoteError, SubscriberEndpoint};

pub struct InboundEndpoint {
    protocol: IntroducerProtocol,
    events: UnboundedSender<Event>,
}

impl InboundEndpoint {
    pub(crate) fn new(protocol: IntroducerProtocol, events: UnboundedSender<Event>) -> Self {
        Self { protocol, events }
    }

    fn forward(&self, event: Event) -> Result<(), RemoteError> {
        self.events
            .send(event)
            .map_err(|_| RemoteError::Failed("introducer client is stopped".into()))
    }
}

impl Referenceable for InboundEndpoint {
    fn remote_interface_name(&self) -> &'static str {
        match self.protocol {
            IntroducerProtocol::V1 => SUBSCRIBER_CLIENT_V1_INTERFACE,
            IntroducerProtocol::V2 => SUBSCRIBER_CLIENT_V2_INTERFACE,
        }
    }
}

impl SubscriberEndpoint for InboundEndpoint {
    fn receive(&self, call: InboundCall) -> Result<(), RemoteError> {
        match (self.protocol, call) {
            (IntroducerProtocol::V2, InboundCall::AnnounceV2(batch)) => {
                tracing::debug!(count = batch.len(), "received announcements (v2)");
                self.forward(Event::Announcements {
                    batch,
                    protocol: IntroducerProtocol::V2,
                    unconvertible: 0,
                })
            }
            (IntroducerProtocol::V1, InboundCall::Announce(batch)) => {
                tracing::debug!(count = batch.len(), "received announcements (v1)");
                let received = batch.len();
                let batch: Vec<SignedAnnouncement> = batch
                    .iter()
                    .filter_map(|legacy| match codec::convert_v1_to_v2(legacy) {
                        Ok(signed) => Some(signed),
                        Err(e) => {
                            tracing::warn!(
                                service = %legacy.service_name,
                                error = %e,
                                "dropping unconvertible v1 announcement"
                            );
                            None
                        }
                    })
                    .collect();
                let unconvertible = received - batch.len();
                self.forward(Event::Announcements {
                    batch,
                    protocol: IntroducerProtocol::V1,
                    unconvertible,
                })
            }
            (_, InboundCall::SetEncodingParameters(parameters)) => {
                self.forward(Event::EncodingParameters(parameters))
            }
            (_, other) => Err(RemoteError::MethodNotFound(other.method_name().to_string())),
        }
    }
}
