//! Kubernetes Event publishing
//!
//! Events are best effort: a failure to record one is logged and never fails
//! the reconcile pass that produced it.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, ObjectMeta, PostParams},
    client::Client,
};
use tracing::{debug, warn};

/// Component name recorded as the event source
pub const EVENT_SOURCE: &str = "image-reflector";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        })
    }
}

/// Destination for reconcile events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        object: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

/// Creates core/v1 Events through the API server
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        object: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let namespace = object.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = object.name.clone().unwrap_or_default();
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}-event-")),
                ..Default::default()
            },
            type_: Some(event_type.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: object,
            reporting_component: Some(EVENT_SOURCE.to_string()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        match events.create(&PostParams::default(), &event).await {
            Ok(_) => debug!(%namespace, %name, reason, "Recorded event"),
            Err(e) => warn!(%namespace, %name, reason, error = %e, "Failed to record event"),
        }
    }
}
