//! MQTT publisher for egress messages
//!
//! Publishes to MQTT topics for downstream consumers:
//! - qtc/qtc_array - QTC batches accepted by the emission gate (QoS 1)
//! - qtc/metrics - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    qtc_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("qtc-online-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            qtc_topic: config.mqtt_egress_qtc_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until the shutdown flag flips.
    /// Messages still queued at shutdown are flushed first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(qtc = %self.qtc_topic, metrics = %self.metrics_topic, "mqtt_egress_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Qtc(batch) => {
                let json = match serde_json::to_vec(&batch) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "qtc_serialise_failed");
                        return;
                    }
                };
                // QoS 1 for batches (at-least-once delivery)
                if let Err(e) =
                    self.client.publish(&self.qtc_topic, QoS::AtLeastOnce, false, json).await
                {
                    error!(error = %e, "mqtt_egress_qtc_failed");
                }
            }
            EgressMessage::Metrics(payload) => {
                if let Ok(json) = serde_json::to_vec(&payload) {
                    if let Err(e) =
                        self.client.publish(&self.metrics_topic, QoS::AtMostOnce, false, json).await
                    {
                        debug!(error = %e, "mqtt_egress_metrics_failed");
                    }
                }
            }
        }
    }
}
