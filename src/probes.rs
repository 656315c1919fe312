use anyhow::Result;
use tracing::info;

use crate::config::{Config, QueueBackend};
use crate::queue::remote::AmqpTransport;

/// Liveness: verifica dependencias críticas del nodo.
pub async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes")
    }
}

/// Readiness: el backend remoto exige un broker alcanzable.
pub async fn readiness(config: &Config) -> Result<()> {
    if config.queue_backend == QueueBackend::Remote {
        AmqpTransport::connect(&config.broker_url).await?;
        info!("✅ Broker alcanzable");
    }
    Ok(())
}
