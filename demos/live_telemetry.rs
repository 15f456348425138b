use liftlink::{BleCentral, DeviceEvent, Result, TrainerDevice, TrainerError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏋️ LiftLink Live Telemetry Example");
    info!("Scanning for trainers...");

    let central = BleCentral::new().await?;
    let found = central.scan(Duration::from_secs(5)).await?;
    let Some(descriptor) = found.first().cloned() else {
        error!("❌ No trainer found");
        return Err(TrainerError::ConnectionFailed(
            "no trainer in range".to_string(),
        ));
    };
    info!("✅ Found trainer: {} ({})", descriptor.name, descriptor.id);

    let transport = central.open(&descriptor).await?;
    let device = TrainerDevice::new(transport, descriptor);
    let mut events = device.subscribe();

    info!("🔗 Connecting...");
    device.connect().await?;
    info!("✅ Connected");

    info!("🎬 Starting recording; perform one set...");
    device.start_recording().await?;

    // Stream telemetry until the device reports the set complete, or until
    // two minutes pass without one.
    let deadline = Duration::from_secs(120);
    let mut reps = 0u32;
    loop {
        let event = match timeout(deadline, events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => {
                warn!("Event stream closed");
                break;
            }
            Err(_) => {
                warn!("No set-complete marker within {deadline:?}, stopping");
                break;
            }
        };

        match event {
            DeviceEvent::Frame(frame) => info!("📈 {frame}"),
            DeviceEvent::RepComplete => {
                reps += 1;
                info!("💪 Rep {reps} complete");
            }
            DeviceEvent::SetComplete => {
                info!("🏁 Set complete after {reps} rep(s)");
                break;
            }
            DeviceEvent::Battery(percent) => info!("🔋 Battery: {percent}%"),
            DeviceEvent::Disconnected => {
                error!("❌ Trainer disconnected mid-set");
                return Err(TrainerError::ConnectionLost);
            }
            other => info!("ℹ️ {other:?}"),
        }
    }

    device.stop_recording().await?;
    info!("🔌 Disconnecting...");
    device.disconnect().await?;
    info!("✅ Disconnected");
    Ok(())
}
