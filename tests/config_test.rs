//! Integration tests for configuration loading

use qtc_online::domain::QtcType;
use qtc_online::infra::{Config, OverflowPolicy};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let config_content = r#"
[site]
id = "test-site"

[mqtt]
host = "test-host"
port = 1884
people_topic = "tracker/people"
reference_topic = "robot/pose"

[frames]
target_frame = "odom"
transform_timeout_ms = 20

[[frames.transforms]]
parent = "odom"
child = "base_link"
x = 1.0
yaw = 1.5707963267948966

[processing]
rate_hz = 20.0
decay_time_secs = 30.0
drain_batch_size = 4

[queue]
capacity = 500
overflow = "drop_newest"

[qtc]
qtc_type = "qtcc"
smoothing_rate = 0.5
quantisation_factor = 0.05

[metrics]
interval_secs = 15
prometheus_port = 0
"#;

    let temp_file = write_config(config_content);
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_people_topic(), "tracker/people");
    assert_eq!(config.mqtt_reference_topic(), "robot/pose");
    assert_eq!(config.mqtt_params_topic(), "qtc/params");
    assert_eq!(config.target_frame(), "odom");
    assert_eq!(config.transform_timeout_ms(), 20);
    assert_eq!(config.frame_transforms().len(), 1);
    assert_eq!(config.frame_transforms()[0].child, "base_link");
    assert_eq!(config.queue_capacity(), 500);
    assert_eq!(config.queue_overflow(), OverflowPolicy::DropNewest);
    assert_eq!(config.prometheus_port(), 0);

    let params = config.params();
    assert_eq!(params.qtc.qtc_type, QtcType::Qtcc);
    assert_eq!(params.smoothing_rate, 0.5);
    assert_eq!(params.qtc.quantisation_factor, 0.05);
    assert_eq!(params.processing_rate_hz, 20.0);
    assert_eq!(params.decay_time, 30.0);
    assert_eq!(params.drain_batch_size, 4);
}

#[test]
fn test_selectors_by_index() {
    let temp_file = write_config(
        r#"
[qtc]
qtc_type = 4
abstract_distance_threshold = 1
"#,
    );
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.params().qtc.qtc_type, QtcType::QtcbcsArgprobd);
    assert_eq!(config.params().qtc.abstract_distance_threshold, 1);
}

#[test]
fn test_pruning_disables_validate_and_collapse() {
    let temp_file = write_config(
        r#"
[qtc]
prune_buffer = true
validate = true
no_collapse = true
"#,
    );
    let config = Config::from_file(temp_file.path()).unwrap();

    assert!(config.params().prune_buffer);
    assert!(!config.params().qtc.validate);
    assert!(!config.params().qtc.no_collapse);
}

#[test]
fn test_inconsistent_qtc_section_rejected() {
    let temp_file = write_config(
        r#"
[qtc]
abstract_distance_threshold = "far"
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());

    let temp_file = write_config(
        r#"
[qtc]
qtc_type = 9
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.target_frame(), "map");
    assert_eq!(config.params().qtc.qtc_type, QtcType::Qtcbcs);
    assert_eq!(config.queue_capacity(), 0);
    assert!(config.drain_on_shutdown());
}

#[test]
fn test_shipped_dev_config_parses() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(*config.params(), qtc_online::infra::Params::default());
}

#[test]
fn test_zero_metrics_intervals_rejected() {
    let temp_file = write_config(
        r#"
[metrics]
interval_secs = 0
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());

    let temp_file = write_config(
        r#"
[mqtt_egress]
metrics_publish_interval_secs = 0
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());

    // load_from_path falls back to defaults, which are always usable
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.metrics_interval_secs(), 10);
    assert_eq!(config.mqtt_egress_metrics_interval_secs(), 5);
}

#[test]
fn test_unrepresentable_smoothing_rejected_at_load() {
    let temp_file = write_config(
        r#"
[qtc]
smoothing_rate = 1e20
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());
}
