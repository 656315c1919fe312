use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use resona::config::{Config, QueueBackend};
use resona::probes;
use resona::queue::remote::{AmqpTransport, ResolverNode};
use resona::sources::SourceRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("resona=debug".parse()?)
                .add_directive("lapin=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Resona v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return probes::health_check().await;
    }

    info!("{}", config.summary());

    // El binario despliega el nodo de resolución; la cola local corre
    // embebida en la aplicación consumidora y no necesita proceso propio
    if config.queue_backend != QueueBackend::Remote {
        info!("Backend local configurado: nada que desplegar, saliendo");
        return Ok(());
    }

    probes::readiness(&config).await?;

    let transport = Arc::new(AmqpTransport::connect(&config.broker_url).await?);
    let registry = Arc::new(SourceRegistry::standard(&config));
    let node = ResolverNode::new(transport, registry);

    // Manejar shutdown graceful
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shutdown.cancel();
            }
        });
    }

    info!("🚀 Nodo de resolución iniciado");
    if let Err(why) = node.run(shutdown).await {
        error!("Error al ejecutar el nodo: {:?}", why);
    }

    Ok(())
}
