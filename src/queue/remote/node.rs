use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{InboundMessage, MessageStream, MessageTransport, OutboundMessage, Topology};
use crate::error::{QueueError, TransportError};
use crate::queue::models::{
    hub_topic, provider_queue, ProviderOperation, ResolutionRequest, ResolvedMusic,
    DELIVERY_EXCHANGE, DISPATCH_PRIORITY, PROCESSING_EXCHANGE, REQUESTS_QUEUE, REQUEUE_PRIORITY,
};
use crate::sources::{classify, Provider, Resolution, SourcePair, SourceRegistry};

/// Nodo de resolución: el worker desplegable de la variante distribuida.
///
/// Corre el stage de dispatch (clasifica y enruta cada petición) y un
/// consumidor por cola de proveedor, hasta que el token de shutdown se
/// cancele. Los mensajes malformados o sin resolver registrado se
/// rechazan hacia la dead-letter en vez de reintentarse en bucle.
pub struct ResolverNode {
    transport: Arc<dyn MessageTransport>,
    registry: Arc<SourceRegistry>,
}

impl ResolverNode {
    pub fn new(transport: Arc<dyn MessageTransport>, registry: Arc<SourceRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
        self.transport
            .declare(&Topology::core())
            .await
            .map_err(QueueError::Transport)?;

        let mut tasks = Vec::new();

        let dispatch_stream = self
            .transport
            .consume(REQUESTS_QUEUE)
            .await
            .map_err(QueueError::Transport)?;
        tasks.push(tokio::spawn(dispatch_loop(
            self.transport.clone(),
            dispatch_stream,
            shutdown.clone(),
        )));

        for provider in Provider::all() {
            let stream = self
                .transport
                .consume(&provider_queue(provider))
                .await
                .map_err(QueueError::Transport)?;
            tasks.push(tokio::spawn(resolve_loop(
                self.transport.clone(),
                self.registry.clone(),
                provider,
                stream,
                shutdown.clone(),
            )));
        }

        info!(
            "🚚 Nodo de resolución en marcha: dispatch + {} proveedores",
            Provider::all().len()
        );

        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Stage de dispatch: una petición entra, N operaciones enrutadas salen.
async fn dispatch_loop(
    transport: Arc<dyn MessageTransport>,
    mut stream: Box<dyn MessageStream>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = stream.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        handle_request(transport.as_ref(), message).await;
    }
    debug!("Dispatch terminado");
}

async fn handle_request(transport: &dyn MessageTransport, message: InboundMessage) {
    let request: ResolutionRequest = match serde_json::from_slice(&message.payload) {
        Ok(request) => request,
        Err(err) => {
            warn!("Petición ilegible, a la dead-letter: {}", err);
            let _ = message.reject(false).await;
            return;
        }
    };

    match dispatch_request(transport, &request).await {
        Ok(emitted) => {
            debug!(
                "Petición {} despachada en {} operaciones",
                request.id, emitted
            );
            let _ = message.ack().await;
        }
        Err(err) => {
            warn!("No se pudo despachar la petición {}: {}", request.id, err);
            let _ = message.reject(true).await;
        }
    }
}

async fn dispatch_request(
    transport: &dyn MessageTransport,
    request: &ResolutionRequest,
) -> Result<usize, TransportError> {
    let mut pairs: Vec<SourcePair> = request.queries.iter().map(|query| classify(query)).collect();

    // El shuffle reordena la agenda antes de emitir, nunca el contenido
    if request.shuffle {
        pairs.shuffle(&mut rand::thread_rng());
    }

    let emitted = pairs.len();
    for pair in pairs {
        publish_operation(
            transport,
            ProviderOperation::from_pair(request.id, &request.owner_id, request.shuffle, pair),
            DISPATCH_PRIORITY,
        )
        .await?;
    }

    Ok(emitted)
}

/// Stage de resolución de un proveedor.
async fn resolve_loop(
    transport: Arc<dyn MessageTransport>,
    registry: Arc<SourceRegistry>,
    provider: Provider,
    mut stream: Box<dyn MessageStream>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = stream.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        handle_operation(transport.as_ref(), registry.as_ref(), message).await;
    }
    debug!("Consumidor de {} terminado", provider);
}

async fn handle_operation(
    transport: &dyn MessageTransport,
    registry: &SourceRegistry,
    message: InboundMessage,
) {
    let operation: ProviderOperation = match serde_json::from_slice(&message.payload) {
        Ok(operation) => operation,
        Err(err) => {
            warn!("Operación ilegible, a la dead-letter: {}", err);
            let _ = message.reject(false).await;
            return;
        }
    };

    let Some(resolver) = registry.resolver(operation.provider, operation.operation) else {
        warn!(
            "Sin resolver para {}.{}, a la dead-letter",
            operation.provider, operation.operation
        );
        let _ = message.reject(false).await;
        return;
    };

    match process_operation(transport, resolver.as_ref(), &operation).await {
        Ok(()) => {
            let _ = message.ack().await;
        }
        Err(err) => {
            // Fallo del broker al reenrutar: el mensaje vuelve a la cola
            warn!(
                "No se pudo reenrutar el resultado de '{}': {}",
                operation.query, err
            );
            let _ = message.reject(true).await;
        }
    }
}

async fn process_operation(
    transport: &dyn MessageTransport,
    resolver: &dyn crate::sources::SourceResolver,
    operation: &ProviderOperation,
) -> Result<(), TransportError> {
    match resolver.resolve(&operation.pair(), operation.shuffle).await {
        Ok(Resolution::Stream(url)) => {
            let music = ResolvedMusic {
                request_id: operation.request_id,
                owner_id: operation.owner_id.clone(),
                source: url,
            };
            transport
                .publish(
                    DELIVERY_EXCHANGE,
                    &hub_topic(&music.owner_id),
                    OutboundMessage::json(&music, DISPATCH_PRIORITY, Some(music.request_id.to_string()))?,
                )
                .await?;
            debug!("🎵 '{}' resuelta y enviada a {}", operation.query, hub_topic(&music.owner_id));
        }
        Ok(Resolution::Requeue(pair)) => {
            // Hop query→url con prioridad elevada: las búsquedas no
            // esperan detrás del backlog de jobs url
            debug!(
                "Hop {}.{} → {}.{} con prioridad elevada",
                operation.provider, operation.operation, pair.provider, pair.operation
            );
            publish_operation(
                transport,
                ProviderOperation::from_pair(
                    operation.request_id,
                    &operation.owner_id,
                    operation.shuffle,
                    pair,
                ),
                REQUEUE_PRIORITY,
            )
            .await?;
        }
        Ok(Resolution::Expand(pairs)) => {
            debug!("'{}' expandida a {} sub-operaciones", operation.query, pairs.len());
            for pair in pairs {
                publish_operation(
                    transport,
                    ProviderOperation::from_pair(
                        operation.request_id,
                        &operation.owner_id,
                        operation.shuffle,
                        pair,
                    ),
                    DISPATCH_PRIORITY,
                )
                .await?;
            }
        }
        Err(err) => {
            // Irresoluble: se acusa y descarta, nunca un bucle de veneno.
            // El consumidor solo observa una cola que se achica.
            warn!("Resolución de '{}' fallida, se descarta: {}", operation.query, err);
        }
    }

    Ok(())
}

async fn publish_operation(
    transport: &dyn MessageTransport,
    operation: ProviderOperation,
    priority: u8,
) -> Result<(), TransportError> {
    let routing_key = operation.routing_key();
    let outbound = OutboundMessage::json(
        &operation,
        priority,
        Some(operation.request_id.to_string()),
    )?;
    transport
        .publish(PROCESSING_EXCHANGE, &routing_key, outbound)
        .await
}
