//! Prometheus metrics HTTP endpoint
//!
//! Exposes processor metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
///
/// Takes a fresh report, so latency buckets and the event rate cover the
/// window since the previous report or scrape.
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_ingest_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_pipeline_metrics(&mut output, site_id, &summary);
    write_emission_metrics(&mut output, site_id, &summary);
    write_params_metrics(&mut output, site_id, &summary);

    output
}

fn write_ingest_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "qtc_events_enqueued_total",
        "Reports appended to the ingestion queue",
        MetricType::Counter,
        site,
        summary.events_enqueued,
    );
    write_metric(
        output,
        "qtc_events_dropped_total",
        "Reports discarded by a bounded ingestion queue",
        MetricType::Counter,
        site,
        summary.events_dropped,
    );
    write_metric(
        output,
        "qtc_events_total",
        "Total events processed",
        MetricType::Counter,
        site,
        summary.events_total,
    );
    let _ = writeln!(output, "# HELP qtc_events_per_sec Events processed per second");
    let _ = writeln!(output, "# TYPE qtc_events_per_sec gauge");
    let _ = writeln!(output, "qtc_events_per_sec{{site=\"{site}\"}} {:.2}", summary.events_per_sec);
    write_metric(
        output,
        "qtc_queue_depth",
        "Ingestion queue depth at the last tick",
        MetricType::Gauge,
        site,
        summary.queue_depth,
    );
    write_metric(
        output,
        "qtc_queue_depth_max",
        "Highest ingestion queue depth observed",
        MetricType::Gauge,
        site,
        summary.queue_depth_max,
    );
    write_metric(
        output,
        "qtc_reference_updates_total",
        "Reference poses received",
        MetricType::Counter,
        site,
        summary.reference_updates,
    );
    write_metric(
        output,
        "qtc_parse_errors_total",
        "Ingress payloads dropped as malformed",
        MetricType::Counter,
        site,
        summary.parse_errors,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "qtc_event_latency_us",
        "Event processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "qtc_event_latency_p99_us",
        "99th percentile event processing latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "qtc_event_latency_max_us",
        "Max event processing latency since last report",
        MetricType::Gauge,
        site,
        summary.max_process_latency_us,
    );
}

fn write_pipeline_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "qtc_transform_failures_total",
        "Entities skipped because the frame transform failed",
        MetricType::Counter,
        site,
        summary.transform_failures,
    );
    write_metric(
        output,
        "qtc_window_flushes_total",
        "Smoothing windows flushed into track history",
        MetricType::Counter,
        site,
        summary.window_flushes,
    );
    write_metric(
        output,
        "qtc_classifications_total",
        "Successful classifier runs",
        MetricType::Counter,
        site,
        summary.classifications,
    );
    write_metric(
        output,
        "qtc_classifier_errors_total",
        "Classifier runs that returned an error",
        MetricType::Counter,
        site,
        summary.classifier_errors,
    );
    write_metric(
        output,
        "qtc_active_tracks",
        "Tracks currently held by the processor",
        MetricType::Gauge,
        site,
        summary.active_tracks,
    );
    write_metric(
        output,
        "qtc_tracks_decayed_total",
        "Tracks removed after the decay interval",
        MetricType::Counter,
        site,
        summary.tracks_decayed,
    );
}

fn write_emission_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "qtc_batches_published_total",
        "QTC batches accepted by the emission gate",
        MetricType::Counter,
        site,
        summary.batches_published,
    );
    write_metric(
        output,
        "qtc_batches_suppressed_total",
        "QTC batches suppressed as unchanged",
        MetricType::Counter,
        site,
        summary.batches_suppressed,
    );
    write_metric(
        output,
        "qtc_egress_dropped_total",
        "QTC batches dropped on a full egress channel",
        MetricType::Counter,
        site,
        summary.egress_dropped,
    );
}

fn write_params_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "qtc_params_applied_total",
        "Parameter updates applied",
        MetricType::Counter,
        site,
        summary.params_applied,
    );
    write_metric(
        output,
        "qtc_params_rejected_total",
        "Parameter updates rejected as inconsistent",
        MetricType::Counter,
        site,
        summary.params_rejected,
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            let mut response = text_response(StatusCode::OK, body);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
