//! Live monitoring example: connect to the sensor and log readings and alerts
//!
//! Run with: cargo run --example monitor -- [DEVICE_NAME]

use crop_monitor_ble::{
    BleTransport, Channel, MonitorConfig, Result, SessionController, TracingSink,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crop_monitor_ble=info".parse().unwrap()),
        )
        .init();

    let device_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| MonitorConfig::default().device_name);

    let config = MonitorConfig::builder()
        .device_name(device_name.as_str())
        .scan_timeout(Some(Duration::from_secs(10)))
        .connect_attempts(3)
        .build()?;

    println!("Crop Monitor");
    println!("============\n");
    println!("Looking for '{}'...", device_name);
    println!("Press Ctrl+C to exit.\n");

    let transport = Arc::new(BleTransport::new().await?);
    let controller = SessionController::with_sink(transport, config, Arc::new(TracingSink))?;
    controller.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                if controller.session_state().is_terminal() {
                    println!("Session ended: {}", controller.snapshot().status_text());
                    break;
                }
            }
        }
    }

    controller.stop().await;

    for channel in Channel::ALL {
        if let Some(stats) = controller.history_stats(channel) {
            println!(
                "{}: min {:.2}, max {:.2}, mean {:.2} over {} samples",
                channel, stats.min, stats.max, stats.mean, stats.count
            );
        }
    }

    Ok(())
}
