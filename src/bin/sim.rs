//! Scripted stream generator for local testing
//!
//! Publishes a robot pose and one or more walking people over MQTT at a
//! fixed rate, and prints every QTC batch the daemon sends back.
//!
//! Scenarios:
//! - approach: people walk straight at the robot and stop in front of it
//! - pass: people walk past the robot on its left
//! - circle: people orbit the robot at a fixed radius
//!
//! Usage:
//!   cargo run --bin qtc-sim -- --scenario pass --people 2

use clap::{Parser, ValueEnum};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    Approach,
    Pass,
    Circle,
}

#[derive(Parser, Debug)]
#[command(name = "qtc-sim")]
#[command(about = "Publish a scripted people/robot stream for qtc-online")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    #[arg(long, default_value = "people_tracker/positions")]
    people_topic: String,

    #[arg(long, default_value = "robot_pose")]
    reference_topic: String,

    /// Topic the daemon publishes batches on
    #[arg(long, default_value = "qtc/qtc_array")]
    qtc_topic: String,

    /// Frame id stamped on people reports
    #[arg(long, default_value = "map")]
    frame_id: String,

    #[arg(long, value_enum, default_value = "pass")]
    scenario: Scenario,

    /// Number of simulated people
    #[arg(long, default_value = "1")]
    people: usize,

    /// Reports per second
    #[arg(long, default_value = "10")]
    rate_hz: f64,

    /// Run time in seconds
    #[arg(long, default_value = "20")]
    duration: f64,
}

/// Walking speed in m/s
const SPEED: f64 = 0.8;

/// Position of person `index` at `t` seconds into the scenario
fn person_position(scenario: Scenario, index: usize, t: f64) -> (f64, f64) {
    let lane = index as f64 * 0.8;
    match scenario {
        Scenario::Approach => {
            let start = 8.0 + lane;
            ((start - SPEED * t).max(1.0 + lane * 0.5), lane)
        }
        Scenario::Pass => (8.0 - SPEED * t, 1.5 + lane),
        Scenario::Circle => {
            let radius = 2.0 + lane;
            let angle = SPEED * t / radius;
            (radius * angle.cos(), radius * angle.sin())
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();

    let client_id = format!("qtc-sim-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(&args.qtc_topic, QoS::AtLeastOnce).await?;

    // Print batches coming back from the daemon
    let mqtt_handle = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match serde_json::from_slice::<serde_json::Value>(&publish.payload) {
                        Ok(batch) => println!("{batch}"),
                        Err(e) => warn!(error = %e, "qtc_batch_unreadable"),
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    info!(
        scenario = ?args.scenario,
        people = %args.people,
        rate_hz = %args.rate_hz,
        duration = %args.duration,
        "sim_started"
    );

    let period = Duration::from_secs_f64(1.0 / args.rate_hz.max(0.1).min(1000.0));
    let mut interval = tokio::time::interval(period);
    let start = now_secs();
    let uuids: Vec<String> = (0..args.people).map(|i| format!("person_{i}")).collect();

    loop {
        interval.tick().await;
        let stamp = now_secs();
        let t = stamp - start;
        if t > args.duration {
            break;
        }

        // Robot stands at the origin
        let pose = json!({ "position": { "x": 0.0, "y": 0.0, "z": 0.0 } });
        client.publish(&args.reference_topic, QoS::AtMostOnce, false, pose.to_string()).await?;

        let poses: Vec<_> = (0..args.people)
            .map(|i| {
                let (x, y) = person_position(args.scenario, i, t);
                json!({ "position": { "x": x, "y": y, "z": 0.0 } })
            })
            .collect();
        let report = json!({
            "header": { "stamp": stamp, "frame_id": args.frame_id },
            "uuids": uuids,
            "poses": poses,
        });
        client.publish(&args.people_topic, QoS::AtLeastOnce, false, report.to_string()).await?;
    }

    info!("sim_finished");
    // Give the daemon time to publish the last batches
    tokio::time::sleep(Duration::from_secs(1)).await;
    mqtt_handle.abort();
    Ok(())
}
