//! Simulated sensor example: no Bluetooth hardware needed
//!
//! Drives an in-memory sensor through a humid spell and prints the alerts
//! that come and go.
//!
//! Run with: cargo run --example simulated

use crop_monitor_ble::ble::{HUMIDITY_CHARACTERISTIC_UUID, TEMPERATURE_CHARACTERISTIC_UUID};
use crop_monitor_ble::mock::{MockDevice, MockTransport};
use crop_monitor_ble::{Channel, DisplaySink, MonitorConfig, Result, SessionController};
use std::sync::Arc;
use std::time::Duration;

/// Prints every update to stdout.
struct ConsoleSink;

impl DisplaySink for ConsoleSink {
    fn on_status_changed(&self, status: &str) {
        println!("[status] {}", status);
    }

    fn on_reading(&self, channel: Channel, value: f32) {
        println!("  {}", channel.format_value(value));
    }

    fn on_buffer_updated(&self, _channel: Channel, _points: &[(usize, f32)]) {}

    fn on_alerts_changed(&self, messages: &[String]) {
        if messages.is_empty() {
            println!("  (alerts cleared)");
        }
        for message in messages {
            println!("  {}", message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let device = MockDevice::new("EnvSensor");
    let transport = Arc::new(MockTransport::with_device(device.clone()));
    let controller =
        SessionController::with_sink(transport, MonitorConfig::default(), Arc::new(ConsoleSink))?;

    controller.start()?;
    while controller.session_state() != crop_monitor_ble::SessionState::Streaming {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // (temperature, humidity) pairs over a wet evening
    let weather = [
        (27.0, 55.0),
        (24.0, 68.0),
        (21.0, 78.0),
        (18.0, 86.0),
        (16.0, 92.0),
        (14.0, 95.0),
    ];

    for (temperature, humidity) in weather {
        device.notify_value(TEMPERATURE_CHARACTERISTIC_UUID, temperature);
        device.notify_value(HUMIDITY_CHARACTERISTIC_UUID, humidity);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // A corrupt notification is dropped, not fatal
    device.notify(HUMIDITY_CHARACTERISTIC_UUID, vec![0xFFu8, 0x00]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    device.drop_link();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = controller.snapshot();
    println!(
        "\nFinal: {} | {} samples kept | {} dropped",
        snapshot.status_text(),
        snapshot.temperature_history.len(),
        snapshot.dropped_samples
    );

    controller.reset();
    println!("After reset: {}", controller.snapshot().status_text());

    Ok(())
}
