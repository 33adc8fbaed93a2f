//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::qtc::{band_index, QtcParameters, QtcType};
use crate::infra::params::{Params, Selector};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// What a bounded ingestion queue discards when full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_people_topic")]
    pub people_topic: String,
    #[serde(default = "default_reference_topic")]
    pub reference_topic: String,
    #[serde(default = "default_params_topic")]
    pub params_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            people_topic: default_people_topic(),
            reference_topic: default_reference_topic(),
            params_topic: default_params_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_people_topic() -> String {
    "people_tracker/positions".to_string()
}

fn default_reference_topic() -> String {
    "robot_pose".to_string()
}

fn default_params_topic() -> String {
    "qtc/params".to_string()
}

/// One static edge of the frame graph: pose of `child` expressed in `parent`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameTransformConfig {
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Rotation about z in radians
    #[serde(default)]
    pub yaw: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FramesConfig {
    #[serde(default = "default_target_frame")]
    pub target_frame: String,
    #[serde(default = "default_transform_timeout_ms")]
    pub transform_timeout_ms: u64,
    #[serde(default)]
    pub transforms: Vec<FrameTransformConfig>,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            target_frame: default_target_frame(),
            transform_timeout_ms: default_transform_timeout_ms(),
            transforms: Vec::new(),
        }
    }
}

fn default_target_frame() -> String {
    "map".to_string()
}

fn default_transform_timeout_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    #[serde(default = "default_decay_time_secs")]
    pub decay_time_secs: f64,
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,
    #[serde(default = "default_drain_on_shutdown")]
    pub drain_on_shutdown: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            decay_time_secs: default_decay_time_secs(),
            drain_batch_size: default_drain_batch_size(),
            drain_on_shutdown: default_drain_on_shutdown(),
        }
    }
}

fn default_rate_hz() -> f64 {
    30.0
}

fn default_decay_time_secs() -> f64 {
    120.0
}

fn default_drain_batch_size() -> usize {
    1
}

fn default_drain_on_shutdown() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueueConfig {
    /// Maximum queued events (0 = unbounded)
    #[serde(default)]
    pub capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Initial values for the live parameter set
#[derive(Debug, Clone, Deserialize)]
pub struct QtcConfig {
    #[serde(default = "default_qtc_type")]
    pub qtc_type: Selector,
    #[serde(default = "default_quantisation_factor")]
    pub quantisation_factor: f64,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "default_abstract_distance_threshold")]
    pub abstract_distance_threshold: Selector,
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default)]
    pub no_collapse: bool,
    #[serde(default = "default_smoothing_rate")]
    pub smoothing_rate: f64,
    #[serde(default)]
    pub prune_buffer: bool,
}

impl Default for QtcConfig {
    fn default() -> Self {
        Self {
            qtc_type: default_qtc_type(),
            quantisation_factor: default_quantisation_factor(),
            distance_threshold: default_distance_threshold(),
            abstract_distance_threshold: default_abstract_distance_threshold(),
            validate: true,
            no_collapse: false,
            smoothing_rate: default_smoothing_rate(),
            prune_buffer: false,
        }
    }
}

fn default_qtc_type() -> Selector {
    Selector::Name("qtcbcs".to_string())
}

fn default_quantisation_factor() -> f64 {
    0.01
}

fn default_distance_threshold() -> f64 {
    1.22
}

fn default_abstract_distance_threshold() -> Selector {
    Selector::Name("soc".to_string())
}

fn default_smoothing_rate() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9091
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Topic for QTC batches (QoS 1)
    #[serde(default = "default_qtc_topic")]
    pub qtc_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            qtc_topic: default_qtc_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_qtc_topic() -> String {
    "qtc/qtc_array".to_string()
}

fn default_metrics_topic() -> String {
    "qtc/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique deployment identifier
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "qtc-online".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub qtc: QtcConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_people_topic: String,
    mqtt_reference_topic: String,
    mqtt_params_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    target_frame: String,
    transform_timeout_ms: u64,
    frame_transforms: Vec<FrameTransformConfig>,
    drain_on_shutdown: bool,
    queue_capacity: usize,
    queue_overflow: OverflowPolicy,
    params: Params,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
    mqtt_egress_enabled: bool,
    mqtt_egress_qtc_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::assemble(TomlConfig::default(), Params::default(), "default".to_string())
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, path.display().to_string())
            .with_context(|| format!("Invalid values in {}", path.display()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> anyhow::Result<Self> {
        // tokio intervals panic on a zero period
        anyhow::ensure!(toml_config.metrics.interval_secs > 0, "[metrics] interval_secs must be >= 1");
        anyhow::ensure!(
            toml_config.mqtt_egress.metrics_publish_interval_secs > 0,
            "[mqtt_egress] metrics_publish_interval_secs must be >= 1"
        );
        let params = Self::initial_params(&toml_config.qtc, &toml_config.processing)?;
        Ok(Self::assemble(toml_config, params, config_file))
    }

    fn assemble(toml_config: TomlConfig, params: Params, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_people_topic: toml_config.mqtt.people_topic,
            mqtt_reference_topic: toml_config.mqtt.reference_topic,
            mqtt_params_topic: toml_config.mqtt.params_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            target_frame: toml_config.frames.target_frame,
            transform_timeout_ms: toml_config.frames.transform_timeout_ms,
            frame_transforms: toml_config.frames.transforms,
            drain_on_shutdown: toml_config.processing.drain_on_shutdown,
            queue_capacity: toml_config.queue.capacity,
            queue_overflow: toml_config.queue.overflow,
            params,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_qtc_topic: toml_config.mqtt_egress.qtc_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
        }
    }

    /// Build and validate the starting parameter set
    fn initial_params(qtc: &QtcConfig, processing: &ProcessingConfig) -> anyhow::Result<Params> {
        let qtc_type = match &qtc.qtc_type {
            Selector::Index(i) => QtcType::from_index(*i)?,
            Selector::Name(name) => name.parse()?,
        };
        let abstract_distance_threshold = match &qtc.abstract_distance_threshold {
            Selector::Index(i) => *i,
            Selector::Name(name) => band_index(name)?,
        };

        let mut params = Params {
            qtc: QtcParameters {
                qtc_type,
                quantisation_factor: qtc.quantisation_factor,
                distance_threshold: qtc.distance_threshold,
                abstract_distance_threshold,
                validate: qtc.validate,
                no_collapse: qtc.no_collapse,
            },
            smoothing_rate: qtc.smoothing_rate,
            decay_time: processing.decay_time_secs,
            processing_rate_hz: processing.rate_hz,
            prune_buffer: qtc.prune_buffer,
            drain_batch_size: processing.drain_batch_size,
        };
        if params.prune_buffer {
            params.qtc.validate = false;
            params.qtc.no_collapse = false;
        }
        params.check()?;
        Ok(params)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &str) -> Self {
        match Self::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_people_topic(&self) -> &str {
        &self.mqtt_people_topic
    }

    pub fn mqtt_reference_topic(&self) -> &str {
        &self.mqtt_reference_topic
    }

    pub fn mqtt_params_topic(&self) -> &str {
        &self.mqtt_params_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn target_frame(&self) -> &str {
        &self.target_frame
    }

    pub fn transform_timeout_ms(&self) -> u64 {
        self.transform_timeout_ms
    }

    pub fn frame_transforms(&self) -> &[FrameTransformConfig] {
        &self.frame_transforms
    }

    pub fn drain_on_shutdown(&self) -> bool {
        self.drain_on_shutdown
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn queue_overflow(&self) -> OverflowPolicy {
        self.queue_overflow
    }

    /// Parameter set the processor starts with
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_qtc_topic(&self) -> &str {
        &self.mqtt_egress_qtc_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    /// Builder method for tests to override the parameter set
    #[cfg(test)]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}
