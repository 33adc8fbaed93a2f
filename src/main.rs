//! qtc-online - online Qualitative Trajectory Calculus for tracked people
//!
//! Pairs people-tracker reports with the robot pose, smooths each track into
//! fixed windows and publishes a QTC batch whenever the description changes.
//!
//! Module structure:
//! - `domain/` - Core types (tracks, samples, QTC records)
//! - `io/` - External interfaces (MQTT ingress/egress, Prometheus)
//! - `services/` - Processing pipeline (queue, normalizer, classifier, processor)
//! - `infra/` - Infrastructure (Config, Params, Metrics, errors)

use clap::Parser;
use qtc_online::infra::{Config, Metrics, ParamsHandle};
use qtc_online::io::{create_egress_channel, IngressRouter, MqttPublisher};
use qtc_online::services::{
    CoordinateNormalizer, IngestQueue, Processor, QtcClassifier, QueuePolicy,
    ReferencePointHolder, StaticFrameGraph,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// qtc-online - QTC states between a robot and the people around it
#[derive(Parser, Debug)]
#[command(name = "qtc-online", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "qtc-online starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    let params = config.params();

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        target_frame = %config.target_frame(),
        qtc_type = %params.qtc.qtc_type.as_str(),
        smoothing_rate = %params.smoothing_rate,
        decay_time = %params.decay_time,
        rate_hz = %params.processing_rate_hz,
        prune_buffer = %params.prune_buffer,
        queue_capacity = %config.queue_capacity(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let (params_handle, params_rx) = ParamsHandle::new(params.clone(), metrics.clone());
    let policy = QueuePolicy::from_config(config.queue_capacity(), config.queue_overflow());
    let queue = IngestQueue::new(policy, metrics.clone());
    let reference = ReferencePointHolder::new(metrics.clone());

    // Start MQTT ingress (reports, reference pose, parameter updates)
    let router = IngressRouter::new(&config, queue.clone(), reference, params_handle);
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            qtc_online::io::mqtt::start_mqtt_client(&mqtt_config, router, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = qtc_online::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    // The publisher outlives the processor so batches from the shutdown drain still go out
    let (publisher_stop_tx, publisher_stop_rx) = watch::channel(false);
    let mut publisher_handle = None;
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(1000, config.site_id().to_string(), metrics.clone());

        let publisher = MqttPublisher::new(&config, egress_rx);
        publisher_handle = Some(tokio::spawn(async move {
            publisher.run(publisher_stop_rx).await;
        }));

        // Start metrics egress publisher (separate from logging)
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.report());
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    // Frame graph and coordinate normalizer
    let frames = StaticFrameGraph::from_config(config.frame_transforms());
    let normalizer = CoordinateNormalizer::new(
        Arc::new(frames),
        config.target_frame(),
        Duration::from_millis(config.transform_timeout_ms()),
        metrics.clone(),
    );

    let mut processor = Processor::new(
        queue,
        normalizer,
        Arc::new(QtcClassifier),
        params_rx,
        metrics,
        egress_sender,
    )
    .with_drain_on_shutdown(config.drain_on_shutdown());

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run processor until shutdown, then let the publisher flush what it holds
    processor.run(shutdown_rx).await;
    let _ = publisher_stop_tx.send(true);
    if let Some(handle) = publisher_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    info!("qtc-online shutdown complete");
    Ok(())
}
