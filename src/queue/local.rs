use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ResolutionQueue;
use crate::config::Config;
use crate::error::{QueueError, ResolveError};
use crate::sources::{classify, Resolution, SourcePair, SourceRegistry};

/// Cota de hops por ítem: url directa = 1, búsqueda = 2,
/// catálogo → búsqueda → stream = 3.
const MAX_RESOLUTION_HOPS: usize = 4;

/// Ítem esperando un slot de resolución.
struct PendingItem {
    pair: SourcePair,
    shuffle: bool,
}

/// Cola de resolución en proceso.
///
/// Stages `pendiente → en resolución (acotado por semáforo) → listo`. Un
/// pool fijo de workers toma pendientes, resuelve la cadena de hops
/// internamente y deposita la URL terminal en el stage listo. El semáforo
/// de N slots acota el trabajo de resolución en vuelo: cada slot se
/// consume al iniciar una resolución y se libera al depositar en el stage
/// listo; `clear()` repone a capacidad completa los slots de las
/// resoluciones cuyo resultado va a descartarse.
pub struct LocalResolutionQueue {
    pending_tx: flume::Sender<PendingItem>,
    pending_rx: flume::Receiver<PendingItem>,
    ready_rx: flume::Receiver<String>,
    gate_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    get_timeout: Duration,
    get_retries: u32,
}

struct Shared {
    semaphore: Semaphore,
    capacity: usize,
    /// Generación de la cola: `clear()` la avanza y toda resolución en
    /// vuelo que la capturó vieja descarta su resultado al terminar.
    generation: AtomicU64,
    /// Contador exacto: sin resolver más resueltos sin entregar.
    size: AtomicUsize,
    resolved: AtomicU64,
    failed: AtomicU64,
    discarded_stale: AtomicU64,
}

impl Shared {
    /// Repone un slot sin exceder la capacidad nominal.
    fn release_slot(&self) {
        if self.semaphore.available_permits() < self.capacity {
            self.semaphore.add_permits(1);
        }
    }

    fn decrement_size(&self) {
        let _ = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }

    /// Un pendiente expandido a N sub-queries: el tamaño crece de forma
    /// monótona con cada descubrimiento, nunca baja por expansión.
    fn adjust_size_for_expansion(&self, produced: usize) {
        if produced == 0 {
            self.decrement_size();
        } else {
            self.size.fetch_add(produced - 1, Ordering::AcqRel);
        }
    }
}

/// Estadísticas de la cola local.
#[derive(Debug, Clone)]
pub struct LocalQueueStats {
    pub size: usize,
    pub pending: usize,
    pub ready: usize,
    pub resolved: u64,
    pub failed: u64,
    pub discarded_stale: u64,
}

impl LocalResolutionQueue {
    pub fn new(registry: Arc<SourceRegistry>, config: &Config) -> Self {
        let (pending_tx, pending_rx) = flume::unbounded::<PendingItem>();
        let (ready_tx, ready_rx) = flume::unbounded::<String>();
        let (gate_tx, gate_rx) = watch::channel(true);

        let shared = Arc::new(Shared {
            semaphore: Semaphore::new(config.prefetch_limit),
            capacity: config.prefetch_limit,
            generation: AtomicU64::new(0),
            size: AtomicUsize::new(0),
            resolved: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded_stale: AtomicU64::new(0),
        });

        let workers = (0..config.worker_pool_size)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    gate_rx.clone(),
                    pending_rx.clone(),
                    pending_tx.clone(),
                    ready_tx.clone(),
                    registry.clone(),
                    shared.clone(),
                    config.fetch_idle_timeout,
                ))
            })
            .collect();

        info!(
            "🎛️ Cola local iniciada: {} workers, {} slots de prefetch",
            config.worker_pool_size, config.prefetch_limit
        );

        Self {
            pending_tx,
            pending_rx,
            ready_rx,
            gate_tx,
            shared,
            workers,
            get_timeout: config.get_timeout,
            get_retries: config.get_retries,
        }
    }

    pub fn stats(&self) -> LocalQueueStats {
        LocalQueueStats {
            size: self.shared.size.load(Ordering::Acquire),
            pending: self.pending_rx.len(),
            ready: self.ready_rx.len(),
            resolved: self.shared.resolved.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            discarded_stale: self.shared.discarded_stale.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ResolutionQueue for LocalResolutionQueue {
    async fn add(&self, queries: &[String], shuffle: bool) -> Result<(), QueueError> {
        let mut pairs: Vec<SourcePair> = queries.iter().map(|query| classify(query)).collect();

        // El shuffle reordena la agenda de resolución, nunca el contenido
        if shuffle {
            pairs.shuffle(&mut rand::thread_rng());
        }

        self.shared.size.fetch_add(pairs.len(), Ordering::AcqRel);
        for pair in pairs {
            let _ = self.pending_tx.send(PendingItem { pair, shuffle });
        }

        Ok(())
    }

    async fn get(&self) -> Option<String> {
        for _attempt in 0..self.get_retries {
            match tokio::time::timeout(self.get_timeout, self.ready_rx.recv_async()).await {
                Ok(Ok(url)) => {
                    self.shared.decrement_size();
                    debug!("Ítem obtenido de la cola: {}", url);
                    return Some(url);
                }
                Ok(Err(_)) => return None,
                Err(_) => {
                    // Distinguir "sigue resolviendo" de "cola vacía"
                    if self.size() == 0 {
                        info!("📭 Cola de música vacía");
                        break;
                    }
                    warn!("La siguiente música está tardando en procesarse");
                }
            }
        }
        None
    }

    fn size(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    async fn clear(&self) {
        info!("🗑️ Limpiando cola de música");

        debug!("Deshabilitando admisión de workers");
        let _ = self.gate_tx.send(false);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        debug!("Drenando stages");
        let drained_pending = self.pending_rx.drain().count();
        let drained_ready = self.ready_rx.drain().count();
        self.shared.size.store(0, Ordering::Release);

        debug!("Reponiendo slots de prefetch");
        let available = self.shared.semaphore.available_permits();
        if available < self.shared.capacity {
            self.shared.semaphore.add_permits(self.shared.capacity - available);
        }

        debug!("Rehabilitando admisión");
        let _ = self.gate_tx.send(true);

        info!(
            "Limpieza concluida: {} pendientes y {} listos descartados",
            drained_pending, drained_ready
        );
    }
}

impl Drop for LocalResolutionQueue {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    index: usize,
    mut gate: watch::Receiver<bool>,
    pending_rx: flume::Receiver<PendingItem>,
    pending_tx: flume::Sender<PendingItem>,
    ready_tx: flume::Sender<String>,
    registry: Arc<SourceRegistry>,
    shared: Arc<Shared>,
    idle_timeout: Duration,
) {
    debug!("Worker {} iniciado", index);
    loop {
        // Puerta de admisión: clear() la cierra mientras drena los stages
        if gate.wait_for(|enabled| *enabled).await.is_err() {
            break;
        }

        // Slot de resolución; el timeout fuerza a re-chequear la puerta
        let permit =
            match tokio::time::timeout(idle_timeout, shared.semaphore.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break,
                Err(_) => continue,
            };
        permit.forget();

        let item = match pending_rx.recv_async().await {
            Ok(item) => item,
            Err(_) => {
                shared.release_slot();
                break;
            }
        };

        let shuffle = item.shuffle;
        let query = item.pair.query.clone();
        let generation = shared.generation.load(Ordering::Acquire);
        let outcome = resolve_chain(&registry, item.pair, shuffle).await;

        if shared.generation.load(Ordering::Acquire) != generation {
            // clear() corrió durante la resolución: el resultado tardío se
            // descarta y el slot ya fue repuesto por el refill
            shared.discarded_stale.fetch_add(1, Ordering::Relaxed);
            debug!("Resolución tardía de '{}' descartada tras clear", query);
            continue;
        }

        match outcome {
            Ok(Resolution::Stream(url)) => {
                shared.resolved.fetch_add(1, Ordering::Relaxed);
                let closed = ready_tx.send(url).is_err();
                // El slot se libera al depositar en el stage listo
                shared.release_slot();
                if closed {
                    break;
                }
            }
            Ok(Resolution::Expand(pairs)) => {
                shared.adjust_size_for_expansion(pairs.len());
                shared.release_slot();
                debug!("'{}' expandida a {} sub-queries", query, pairs.len());
                for pair in pairs {
                    let _ = pending_tx.send(PendingItem { pair, shuffle });
                }
            }
            Ok(Resolution::Requeue(pair)) => {
                // La cadena agota los requeues internamente; uno suelto es
                // un resolver mal comportado
                shared.failed.fetch_add(1, Ordering::Relaxed);
                shared.decrement_size();
                shared.release_slot();
                warn!(
                    "Resolver devolvió requeue fuera de cadena para '{}'",
                    pair.query
                );
            }
            Err(err) => {
                // Un fallo individual nunca detiene la cola
                shared.failed.fetch_add(1, Ordering::Relaxed);
                shared.decrement_size();
                shared.release_slot();
                warn!("Resolución de '{}' fallida, se descarta: {}", query, err);
            }
        }
    }
    debug!("Worker {} terminado", index);
}

/// Resuelve una cadena de hops hasta URL terminal o expansión.
async fn resolve_chain(
    registry: &SourceRegistry,
    pair: SourcePair,
    shuffle: bool,
) -> Result<Resolution, ResolveError> {
    let mut current = pair;
    for _hop in 0..MAX_RESOLUTION_HOPS {
        let resolver = registry
            .resolver(current.provider, current.operation)
            .ok_or_else(|| ResolveError::UnknownResolver {
                provider: current.provider.to_string(),
                operation: current.operation.to_string(),
            })?;

        match resolver.resolve(&current, shuffle).await? {
            Resolution::Requeue(next) => {
                debug!(
                    "Hop {}.{} → {}.{}",
                    current.provider, current.operation, next.provider, next.operation
                );
                current = next;
            }
            terminal => return Ok(terminal),
        }
    }

    Err(ResolveError::permanent(
        "cadena de resolución excedió el límite de hops",
    ))
}
