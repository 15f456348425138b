use liftlink::{BleCentral, Result, TrainerDevice, TrainerError, TrainingMode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏋️ LiftLink Resistance Control Example");
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

    info!("🔗 Connecting...");
    device.connect().await?;
    info!("✅ Connected");

    info!("🎛️ Engaging weight training mode...");
    device.set_training_mode(TrainingMode::WeightTraining).await?;

    info!("⚖️ Setting base weight to 40 kg...");
    if let Err(e) = device.set_weight(40).await {
        error!("❌ Failed to set weight: {e}");
        device.disconnect().await?;
        return Err(e);
    }

    info!("⛓️ Adding 10 kg of chains...");
    device.set_chains(10).await?;

    info!("📐 Setting eccentric overload to 20%...");
    device.set_eccentric(20).await?;

    // Give the trainer a moment to confirm the new configuration.
    sleep(Duration::from_secs(1)).await;

    let settings = device.settings().await;
    info!("📊 Configured settings:");
    info!("  Base weight: {:?} kg", settings.base_weight);
    info!("  Chains: {:?} kg", settings.chains);
    info!("  Eccentric: {:?} %", settings.eccentric);
    info!("  Mode: {:?}", settings.training_mode);

    // Out-of-table values are rejected with the full supported list.
    match device.set_weight(43).await {
        Err(TrainerError::InvalidSetting { supported, .. }) => {
            info!("ℹ️ 43 kg is unsupported; device accepts: {supported:?}");
        }
        other => info!("Unexpected result for 43 kg: {other:?}"),
    }

    info!("🔌 Disconnecting...");
    device.disconnect().await?;
    info!("✅ Disconnected");
    Ok(())
}
