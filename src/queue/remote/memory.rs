use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::transport::{
    ExchangeKind, InboundMessage, MessageAck, MessageStream, MessageTransport, OutboundMessage,
    Topology,
};
use crate::error::TransportError;

/// Broker de tópicos en proceso.
///
/// Implementa el mismo contrato que el transporte AMQP sobre estructuras
/// locales: heap de prioridad por cola, match de bindings con comodines y
/// captura de dead-letters. Lo usan los tests y el desarrollo local sin
/// broker.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<BrokerState>,
}

struct BrokerState {
    exchanges: RwLock<HashMap<String, ExchangeEntry>>,
    queues: RwLock<HashMap<String, Arc<MemoryQueue>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    sequence: AtomicU64,
}

struct ExchangeEntry {
    kind: ExchangeKind,
    bindings: Vec<BindingEntry>,
}

struct BindingEntry {
    pattern: String,
    queue: String,
}

struct MemoryQueue {
    messages: Mutex<BinaryHeap<QueuedMessage>>,
    notify: Notify,
}

/// Mensaje redirigido a la dead-letter, para inspección offline.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub at: DateTime<Utc>,
}

struct QueuedMessage {
    priority: u8,
    sequence: u64,
    routing_key: String,
    payload: Vec<u8>,
}

// Mayor prioridad primero; a igual prioridad, FIFO por secuencia.
impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedMessage {}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                exchanges: RwLock::new(HashMap::new()),
                queues: RwLock::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Dead-letters capturadas hasta el momento.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.lock().clone()
    }

    /// Mensajes encolados sin consumir en una cola.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .queues
            .read()
            .get(queue)
            .map(|q| q.messages.lock().len())
            .unwrap_or(0)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    fn push(&self, queue: &Arc<MemoryQueue>, priority: u8, routing_key: &str, payload: Vec<u8>) {
        let message = QueuedMessage {
            priority,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            routing_key: routing_key.to_string(),
            payload,
        };
        queue.messages.lock().push(message);
        queue.notify.notify_one();
    }

    fn dead_letter(&self, queue: &str, routing_key: &str, payload: Vec<u8>) {
        warn!(
            "💀 Mensaje redirigido a la dead-letter (cola '{}', key '{}')",
            queue, routing_key
        );
        self.dead_letters.lock().push(DeadLetter {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn declare(&self, topology: &Topology) -> Result<(), TransportError> {
        {
            let mut exchanges = self.state.exchanges.write();
            for exchange in &topology.exchanges {
                exchanges
                    .entry(exchange.name.clone())
                    .or_insert_with(|| ExchangeEntry {
                        kind: exchange.kind,
                        bindings: Vec::new(),
                    });
            }
        }

        let mut queues = self.state.queues.write();
        let mut exchanges = self.state.exchanges.write();
        for queue in &topology.queues {
            queues
                .entry(queue.name.clone())
                .or_insert_with(|| Arc::new(MemoryQueue {
                    messages: Mutex::new(BinaryHeap::new()),
                    notify: Notify::new(),
                }));

            for binding in &queue.bindings {
                let entry = exchanges
                    .get_mut(&binding.exchange)
                    .ok_or_else(|| TransportError::UnknownExchange(binding.exchange.clone()))?;
                let exists = entry
                    .bindings
                    .iter()
                    .any(|b| b.pattern == binding.routing_key && b.queue == queue.name);
                if !exists {
                    entry.bindings.push(BindingEntry {
                        pattern: binding.routing_key.clone(),
                        queue: queue.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        // Exchange vacío: enrutamiento directo a la cola homónima
        if exchange.is_empty() {
            let queue = self
                .state
                .queues
                .read()
                .get(routing_key)
                .cloned()
                .ok_or_else(|| TransportError::UnknownQueue(routing_key.to_string()))?;
            self.state
                .push(&queue, message.priority, routing_key, message.payload);
            return Ok(());
        }

        let targets: Vec<String> = {
            let exchanges = self.state.exchanges.read();
            let entry = exchanges
                .get(exchange)
                .ok_or_else(|| TransportError::UnknownExchange(exchange.to_string()))?;
            entry
                .bindings
                .iter()
                .filter(|binding| match entry.kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Topic => topic_match(&binding.pattern, routing_key),
                })
                .map(|binding| binding.queue.clone())
                .collect()
        };

        if targets.is_empty() {
            // Sin ruta: a la dead-letter en vez de perderse en silencio
            self.state
                .dead_letter(exchange, routing_key, message.payload);
            return Ok(());
        }

        let queues = self.state.queues.read();
        for target in targets {
            if let Some(queue) = queues.get(&target) {
                self.state
                    .push(queue, message.priority, routing_key, message.payload.clone());
            }
        }

        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn MessageStream>, TransportError> {
        let target = self
            .state
            .queues
            .read()
            .get(queue)
            .cloned()
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;

        debug!("Consumidor en memoria suscrito a '{}'", queue);
        Ok(Box::new(MemoryStream {
            state: self.state.clone(),
            queue_name: queue.to_string(),
            queue: target,
        }))
    }
}

struct MemoryStream {
    state: Arc<BrokerState>,
    queue_name: String,
    queue: Arc<MemoryQueue>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next(&mut self) -> Option<InboundMessage> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(message) = self.queue.messages.lock().pop() {
                let acker = MemoryAck {
                    state: self.state.clone(),
                    queue_name: self.queue_name.clone(),
                    priority: message.priority,
                    routing_key: message.routing_key.clone(),
                    payload: message.payload.clone(),
                };
                return Some(InboundMessage::new(
                    message.payload,
                    message.routing_key,
                    Box::new(acker),
                ));
            }
            notified.await;
        }
    }
}

struct MemoryAck {
    state: Arc<BrokerState>,
    queue_name: String,
    priority: u8,
    routing_key: String,
    payload: Vec<u8>,
}

#[async_trait]
impl MessageAck for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        if requeue {
            let queue = self
                .state
                .queues
                .read()
                .get(&self.queue_name)
                .cloned()
                .ok_or_else(|| TransportError::UnknownQueue(self.queue_name.clone()))?;
            self.state
                .push(&queue, self.priority, &self.routing_key, self.payload);
        } else {
            self.state
                .dead_letter(&self.queue_name, &self.routing_key, self.payload);
        }
        Ok(())
    }
}

/// Match de routing keys estilo tópico: `*` una palabra, `#` cero o más.
fn topic_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            // `#` absorbe cualquier sufijo
            if pattern.len() == 1 {
                return true;
            }
            (0..=key.len()).any(|skip| match_segments(&pattern[1..], &key[skip..]))
        }
        (Some(&"*"), Some(_)) => match_segments(&pattern[1..], &key[1..]),
        (Some(segment), Some(word)) if segment == word => {
            match_segments(&pattern[1..], &key[1..])
        }
        _ => false,
    }
}
