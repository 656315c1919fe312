pub mod amqp;
pub mod memory;
pub mod node;
pub mod transport;

pub use amqp::AmqpTransport;
pub use memory::MemoryTransport;
pub use node::ResolverNode;
pub use transport::{MessageStream, MessageTransport, OutboundMessage, Topology};

use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ledger::RequestLedger;
use super::models::{hub_topic, ResolutionRequest, ResolvedMusic, DISPATCH_PRIORITY, REQUESTS_QUEUE};
use super::ResolutionQueue;
use crate::config::Config;
use crate::error::QueueError;

/// Cola de resolución distribuida.
///
/// El lado productor publica peticiones y retorna con el acuse del
/// broker; la resolución corre en nodos independientes. El lado
/// consumidor sostiene una cola de entrega exclusiva por owner: cada
/// resultado que llega se valida contra el ledger de peticiones vivas y
/// se deposita en un buffer local acotado del que `get()` extrae.
pub struct DistributedResolutionQueue {
    transport: Arc<dyn MessageTransport>,
    owner_id: String,
    ledger: Arc<RequestLedger>,
    delivered_rx: flume::Receiver<String>,
    hub_task: JoinHandle<()>,
    get_timeout: Duration,
    delivery_timeouts: Arc<AtomicU64>,
}

impl DistributedResolutionQueue {
    pub async fn connect(
        transport: Arc<dyn MessageTransport>,
        config: &Config,
    ) -> Result<Self, QueueError> {
        let owner_id = config.owner_id.clone();

        transport
            .declare(&Topology::core())
            .await
            .map_err(QueueError::Transport)?;
        transport
            .declare(&Topology::hub(&owner_id))
            .await
            .map_err(QueueError::Transport)?;

        let stream = transport
            .consume(&hub_topic(&owner_id))
            .await
            .map_err(QueueError::Transport)?;

        let (delivered_tx, delivered_rx) = flume::bounded(config.delivery_buffer_size);
        let ledger = Arc::new(RequestLedger::new(
            config.ledger_max_requests,
            config.ledger_ttl,
        ));
        let delivery_timeouts = Arc::new(AtomicU64::new(0));

        let hub_task = tokio::spawn(hub_loop(
            stream,
            ledger.clone(),
            delivered_tx,
            config.delivery_push_timeout,
            delivery_timeouts.clone(),
        ));

        info!("📡 Cola distribuida conectada (owner {})", owner_id);
        Ok(Self {
            transport,
            owner_id,
            ledger,
            delivered_rx,
            hub_task,
            get_timeout: config.get_timeout,
            delivery_timeouts,
        })
    }

    /// Resultados stale descartados en la entrega, para diagnóstico.
    pub fn stale_discarded(&self) -> u64 {
        self.ledger.stale_discarded()
    }

    /// Entregas que expiraron esperando lugar en el buffer local.
    pub fn delivery_timeouts(&self) -> u64 {
        self.delivery_timeouts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResolutionQueue for DistributedResolutionQueue {
    async fn add(&self, queries: &[String], shuffle: bool) -> Result<(), QueueError> {
        let request = ResolutionRequest::new(self.owner_id.clone(), shuffle, queries.to_vec());
        self.ledger.register(request.id, request.queries.len());

        let outbound = OutboundMessage::json(
            &request,
            DISPATCH_PRIORITY,
            Some(request.id.to_string()),
        )
        .map_err(QueueError::Transport)?;

        // Fire-and-forget: retorna con el acuse de publicación, no con la
        // resolución completa
        if let Err(err) = self.transport.publish("", REQUESTS_QUEUE, outbound).await {
            self.ledger.forget(&request.id);
            return Err(QueueError::Transport(err));
        }

        debug!(
            "📨 Petición {} publicada ({} queries)",
            request.id,
            request.queries.len()
        );
        Ok(())
    }

    async fn get(&self) -> Option<String> {
        // Vacío significa "reintentar", no "cola vacía": la latencia de
        // resolución es externa y mayor que cero
        match tokio::time::timeout(self.get_timeout, self.delivered_rx.recv_async()).await {
            Ok(Ok(url)) => {
                debug!("Ítem obtenido de la cola: {}", url);
                Some(url)
            }
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("Sin entregas dentro del timeout");
                None
            }
        }
    }

    fn size(&self) -> usize {
        self.ledger.pending() + self.delivered_rx.len()
    }

    async fn clear(&self) {
        // No se cancela trabajo remoto en vuelo: sus resultados llegarán
        // y se descartarán como no vivos
        self.ledger.clear();
        let drained = self.delivered_rx.drain().count();
        info!("🗑️ Cola distribuida limpiada: {} entregas descartadas", drained);
    }
}

impl Drop for DistributedResolutionQueue {
    fn drop(&mut self) {
        self.hub_task.abort();
    }
}

/// Stage de entrega: valida cada resultado contra el ledger y lo empuja
/// al buffer local con backpressure.
async fn hub_loop(
    mut stream: Box<dyn MessageStream>,
    ledger: Arc<RequestLedger>,
    delivered_tx: flume::Sender<String>,
    push_timeout: Duration,
    delivery_timeouts: Arc<AtomicU64>,
) {
    while let Some(message) = stream.next().await {
        let music: ResolvedMusic = match serde_json::from_slice(&message.payload) {
            Ok(music) => music,
            Err(err) => {
                warn!("Entrega ilegible, a la dead-letter: {}", err);
                let _ = message.reject(false).await;
                continue;
            }
        };

        // Rechazo de resultados stale: peticiones limpiadas o expiradas
        if !ledger.accept(&music.request_id) {
            debug!(
                "🗑️ Resultado stale descartado para la petición {}",
                music.request_id
            );
            let _ = message.ack().await;
            continue;
        }

        // Buffer acotado: si el consumidor no drena, la entrega se frena
        // en vez de crecer sin límite
        match tokio::time::timeout(push_timeout, delivered_tx.send_async(music.source)).await {
            Ok(Ok(())) => {
                let _ = message.ack().await;
            }
            Ok(Err(_)) => break,
            Err(_) => {
                delivery_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("⏳ Buffer de entrega lleno, el resultado vuelve al broker");
                let _ = message.reject(true).await;
            }
        }
    }
    debug!("Consumidor del hub terminado");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::queue::models::DELIVERY_EXCHANGE;
    use crate::sources::{
        Operation, Provider, Resolution, SourcePair, SourceRegistry, SourceResolver,
    };
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct EchoResolver;

    #[async_trait]
    impl SourceResolver for EchoResolver {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn resolve(
            &self,
            source: &SourcePair,
            _shuffle: bool,
        ) -> Result<Resolution, ResolveError> {
            Ok(Resolution::Stream(format!("resolved:{}", source.query)))
        }
    }

    struct SearchStub;

    #[async_trait]
    impl SourceResolver for SearchStub {
        fn name(&self) -> &'static str {
            "search_stub"
        }

        async fn resolve(
            &self,
            source: &SourcePair,
            _shuffle: bool,
        ) -> Result<Resolution, ResolveError> {
            Ok(Resolution::Requeue(SourcePair::new(
                format!("https://youtu.be/{}", source.query.replace(' ', "-")),
                Provider::YouTube,
                Operation::Url,
            )))
        }
    }

    struct PlaylistStub;

    #[async_trait]
    impl SourceResolver for PlaylistStub {
        fn name(&self) -> &'static str {
            "playlist_stub"
        }

        async fn resolve(
            &self,
            _source: &SourcePair,
            _shuffle: bool,
        ) -> Result<Resolution, ResolveError> {
            Ok(Resolution::Expand(vec![
                SourcePair::new("https://youtu.be/aaa", Provider::YouTube, Operation::Url),
                SourcePair::new("https://youtu.be/bbb", Provider::YouTube, Operation::Url),
                SourcePair::new("https://youtu.be/ccc", Provider::YouTube, Operation::Url),
            ]))
        }
    }

    fn stub_registry() -> Arc<SourceRegistry> {
        Arc::new(
            SourceRegistry::new()
                .register(Provider::YouTube, Operation::Url, Arc::new(EchoResolver))
                .register(Provider::YouTube, Operation::Query, Arc::new(SearchStub))
                .register(Provider::YouTube, Operation::Playlist, Arc::new(PlaylistStub))
                .register(Provider::Direct, Operation::Url, Arc::new(EchoResolver)),
        )
    }

    fn test_config() -> Config {
        Config {
            owner_id: "guild-1".to_string(),
            get_timeout: Duration::from_millis(500),
            delivery_push_timeout: Duration::from_millis(200),
            ..Config::default()
        }
    }

    struct TestRig {
        transport: MemoryTransport,
        queue: DistributedResolutionQueue,
        shutdown: CancellationToken,
        node_task: JoinHandle<()>,
    }

    async fn rig_with_node() -> TestRig {
        let transport = MemoryTransport::new();
        let config = test_config();
        let queue = DistributedResolutionQueue::connect(Arc::new(transport.clone()), &config)
            .await
            .unwrap();

        let node = ResolverNode::new(Arc::new(transport.clone()), stub_registry());
        let shutdown = CancellationToken::new();
        let node_shutdown = shutdown.clone();
        let node_task = tokio::spawn(async move {
            let _ = node.run(node_shutdown).await;
        });

        TestRig {
            transport,
            queue,
            shutdown,
            node_task,
        }
    }

    impl TestRig {
        async fn stop(self) {
            self.shutdown.cancel();
            self.node_task.abort();
        }
    }

    #[tokio::test]
    async fn test_direct_url_resolves_end_to_end() {
        let rig = rig_with_node().await;

        rig.queue
            .add(&["https://youtu.be/abc123".to_string()], false)
            .await
            .unwrap();

        assert_eq!(
            rig.queue.get().await,
            Some("resolved:https://youtu.be/abc123".to_string())
        );
        assert_eq!(rig.queue.size(), 0);
        rig.stop().await;
    }

    #[tokio::test]
    async fn test_search_query_resolves_via_elevated_requeue() {
        let rig = rig_with_node().await;

        rig.queue
            .add(&["some song title".to_string()], false)
            .await
            .unwrap();

        assert_eq!(
            rig.queue.get().await,
            Some("resolved:https://youtu.be/some-song-title".to_string())
        );
        rig.stop().await;
    }

    #[tokio::test]
    async fn test_playlist_expands_to_three_deliveries() {
        let rig = rig_with_node().await;

        rig.queue
            .add(
                &["https://www.youtube.com/playlist?list=xyz".to_string()],
                false,
            )
            .await
            .unwrap();

        let mut drained = Vec::new();
        for _ in 0..3 {
            drained.push(rig.queue.get().await.expect("falta una entrega"));
        }
        drained.sort();

        assert_eq!(
            drained,
            vec![
                "resolved:https://youtu.be/aaa".to_string(),
                "resolved:https://youtu.be/bbb".to_string(),
                "resolved:https://youtu.be/ccc".to_string(),
            ]
        );
        assert_eq!(rig.queue.get().await, None);
        rig.stop().await;
    }

    #[tokio::test]
    async fn test_add_registers_size_before_resolution() {
        // Sin nodo corriendo: nada se resuelve, el tamaño refleja lo
        // pendiente
        let transport = MemoryTransport::new();
        let queue =
            DistributedResolutionQueue::connect(Arc::new(transport.clone()), &test_config())
                .await
                .unwrap();

        queue
            .add(
                &["https://youtu.be/a".to_string(), "b".to_string()],
                false,
            )
            .await
            .unwrap();
        assert_eq!(queue.size(), 2);

        queue.add(&[], false).await.unwrap();
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent_and_zeroes_size() {
        let transport = MemoryTransport::new();
        let queue =
            DistributedResolutionQueue::connect(Arc::new(transport.clone()), &test_config())
                .await
                .unwrap();

        queue.add(&["x".to_string()], false).await.unwrap();
        queue.clear().await;
        assert_eq!(queue.size(), 0);
        queue.clear().await;
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_stale_result_after_clear_is_discarded() {
        let transport = MemoryTransport::new();
        let config = test_config();
        let queue = DistributedResolutionQueue::connect(Arc::new(transport.clone()), &config)
            .await
            .unwrap();

        queue.add(&["https://youtu.be/old".to_string()], false).await.unwrap();
        queue.clear().await;

        // Un resultado llega para una petición que ya no está viva
        let music = ResolvedMusic {
            request_id: Uuid::now_v7(),
            owner_id: "guild-1".to_string(),
            source: "https://stream.example/old".to_string(),
        };
        transport
            .publish(
                DELIVERY_EXCHANGE,
                &hub_topic("guild-1"),
                OutboundMessage::json(&music, DISPATCH_PRIORITY, None).unwrap(),
            )
            .await
            .unwrap();

        // No debe aparecer por get() ni incrementar size()
        assert_eq!(queue.get().await, None);
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.stale_discarded(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_lands_in_dead_letter() {
        let rig = rig_with_node().await;

        rig.transport
            .publish(
                "",
                REQUESTS_QUEUE,
                OutboundMessage {
                    payload: b"esto no es json".to_vec(),
                    priority: DISPATCH_PRIORITY,
                    correlation_id: None,
                },
            )
            .await
            .unwrap();

        // El dispatch la rechaza sin requeue: aparece en la dead-letter
        let mut waited = Duration::ZERO;
        while rig.transport.dead_letters().is_empty() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }

        let dead = rig.transport.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, b"esto no es json".to_vec());
        rig.stop().await;
    }

    #[tokio::test]
    async fn test_shuffled_request_delivers_same_contents() {
        let rig = rig_with_node().await;

        let queries: Vec<String> = (0..6)
            .map(|i| format!("https://youtu.be/track{}", i))
            .collect();
        rig.queue.add(&queries, true).await.unwrap();

        let mut drained = Vec::new();
        for _ in 0..queries.len() {
            drained.push(rig.queue.get().await.expect("falta una entrega"));
        }
        drained.sort();

        let mut expected: Vec<String> =
            queries.iter().map(|q| format!("resolved:{}", q)).collect();
        expected.sort();

        assert_eq!(drained, expected);
        assert_eq!(rig.queue.size(), 0);
        rig.stop().await;
    }
}
