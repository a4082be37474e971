use tracing::{error, info, warn};
use trainerlink::{
    ConnectionState, Result, SampleFields, SampleSource, ScanEvent, SessionEvent, TrainerManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Trainerlink Live Metrics Example");

    let (mut manager, mut scan_events) = TrainerManager::with_btleplug().await?;

    let devices = manager.scan_to_completion().await;
    while let Ok(event) = scan_events.try_recv() {
        if let ScanEvent::Error(report) = event {
            error!("❌ Scan failed: {}", report);
        }
    }

    // Only an FTMS trainer can stream; a strap on its own is rejected at connect
    let Some(device) = devices
        .iter()
        .find(|d| d.services.iter().any(|s| trainerlink::is_valid_ftms_service(s)))
        .cloned()
    else {
        if devices.is_empty() {
            warn!("No fitness devices found");
        } else {
            warn!(
                "Found {} device(s) but none advertises the Fitness Machine Service",
                devices.len()
            );
        }
        return Ok(());
    };

    info!("✅ Using: {} ({})", device.name, device.address);
    info!("Press Ctrl+C to stop");

    let mut session_events = manager.connect_to(device).await;
    let mut max_power = 0_i16;
    let mut samples = 0_u64;

    loop {
        tokio::select! {
            Some(event) = session_events.recv() => match event {
                SessionEvent::StateChanged(state) => {
                    info!("🔗 {}", state);
                    if state == ConnectionState::Disconnected {
                        break;
                    }
                }
                SessionEvent::Error(report) => {
                    error!("❌ {}", report);
                    break;
                }
                SessionEvent::Sample(sample) => {
                    samples += 1;
                    match sample.source {
                        SampleSource::IndoorBikeData => {
                            max_power = max_power.max(sample.power_watts);
                            println!(
                                "⚡ {:4} W (max {:4})  🔄 {:3} rpm  💨 {:5.1} km/h  📏 {} m",
                                sample.power_watts,
                                max_power,
                                sample.cadence_rpm,
                                sample.speed_kmh,
                                sample.distance_m
                            );
                        }
                        SampleSource::HeartRate => {
                            println!("❤️  {} bpm", sample.heart_rate_bpm);
                        }
                    }
                    if sample.present.contains(SampleFields::HEART_RATE)
                        && sample.source == SampleSource::IndoorBikeData
                    {
                        println!("❤️  {} bpm (from trainer)", sample.heart_rate_bpm);
                    }
                }
            },
            () = manager.process_next() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping...");
                break;
            }
        }
    }

    manager.disconnect().await;
    info!("📊 {} sample(s) received, peak power {} W", samples, max_power);

    Ok(())
}
