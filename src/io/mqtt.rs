//! MQTT ingress: entities reports, reference pose and parameter updates
//!
//! Runs in its own task and never touches track state. Reports are paired
//! with the current reference pose and appended to the ingestion queue;
//! reference poses overwrite the holder; parameter updates go through the
//! params handle and are applied atomically between ticks.

use crate::domain::types::{PeopleMessage, PoseMessage};
use crate::infra::config::Config;
use crate::infra::error::ConfigError;
use crate::infra::metrics::Metrics;
use crate::infra::params::{ParamsHandle, ParamsUpdate};
use crate::services::ingest_queue::IngestQueue;
use crate::services::reference::ReferencePointHolder;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why an incoming payload was not applied
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("parameter update rejected: {0}")]
    Rejected(#[from] ConfigError),

    #[error("no route for topic '{0}'")]
    UnknownTopic(String),
}

/// What a routed message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Report queued (`false` if a bounded queue dropped it)
    Report { entities: usize, queued: bool },
    Reference,
    Params,
}

/// Topic names and the shared state each one feeds
#[derive(Clone)]
pub struct IngressRouter {
    people_topic: String,
    reference_topic: String,
    params_topic: String,
    queue: IngestQueue,
    reference: ReferencePointHolder,
    params: ParamsHandle,
}

impl IngressRouter {
    pub fn new(
        config: &Config,
        queue: IngestQueue,
        reference: ReferencePointHolder,
        params: ParamsHandle,
    ) -> Self {
        Self {
            people_topic: config.mqtt_people_topic().to_string(),
            reference_topic: config.mqtt_reference_topic().to_string(),
            params_topic: config.mqtt_params_topic().to_string(),
            queue,
            reference,
            params,
        }
    }

    pub fn topics(&self) -> [&str; 3] {
        [self.people_topic.as_str(), self.reference_topic.as_str(), self.params_topic.as_str()]
    }

    /// Decode a payload and hand it to the matching component
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<Routed, IngressError> {
        let json = std::str::from_utf8(payload)?;

        if topic == self.people_topic {
            let report = serde_json::from_str::<PeopleMessage>(json)?.into_report();
            let entities = report.entities.len();
            // Snapshot the reference pose at arrival, not at processing time
            let queued = self.queue.enqueue(report, self.reference.get());
            Ok(Routed::Report { entities, queued })
        } else if topic == self.reference_topic {
            let pose: PoseMessage = serde_json::from_str(json)?;
            self.reference.update(pose.position);
            Ok(Routed::Reference)
        } else if topic == self.params_topic {
            let update: ParamsUpdate = serde_json::from_str(json)?;
            self.params.apply(&update)?;
            Ok(Routed::Params)
        } else {
            Err(IngressError::UnknownTopic(topic.to_string()))
        }
    }
}

/// Start the MQTT client and route incoming messages
///
/// Never blocks on the processor: reports are appended to the queue and
/// malformed payloads are counted, logged and dropped.
pub async fn start_mqtt_client(
    config: &Config,
    router: IngressRouter,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("qtc-online-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    for topic in router.topics() {
        client.subscribe(topic, QoS::AtMostOnce).await?;
    }

    info!(
        people = %config.mqtt_people_topic(),
        reference = %config.mqtt_reference_topic(),
        params = %config.mqtt_params_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match router.route(&publish.topic, &publish.payload) {
                            Ok(Routed::Report { entities, queued }) => {
                                debug!(entities = %entities, queued = %queued, "report_received");
                            }
                            Ok(routed) => {
                                debug!(topic = %publish.topic, routed = ?routed, "mqtt_message_routed");
                            }
                            // Already logged and counted by the params handle
                            Err(IngressError::Rejected(_)) => {}
                            Err(e) => {
                                metrics.record_parse_error();
                                warn!(topic = %publish.topic, error = %e, "mqtt_payload_dropped");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
