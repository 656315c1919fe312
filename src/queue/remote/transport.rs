use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;
use crate::queue::models::{
    provider_binding, provider_queue, hub_topic, DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE,
    DELIVERY_EXCHANGE, MAX_PRIORITY, PROCESSING_EXCHANGE, REQUESTS_QUEUE,
};
use crate::sources::Provider;

/// Tipo de exchange declarable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Fanout,
}

#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub max_priority: Option<u8>,
    pub dead_letter_exchange: Option<String>,
    pub bindings: Vec<QueueBinding>,
}

/// Topología declarativa del broker: exchanges, colas y bindings.
///
/// Idempotente: tanto el nodo de resolución como cada cola consumidora la
/// declaran al conectar, el broker ignora lo ya existente.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
}

impl Topology {
    /// Topología compartida: dispatch, colas por proveedor y dead-letter.
    pub fn core() -> Self {
        let mut queues = vec![
            QueueSpec {
                name: REQUESTS_QUEUE.to_string(),
                durable: true,
                exclusive: false,
                max_priority: None,
                dead_letter_exchange: Some(DEAD_LETTER_EXCHANGE.to_string()),
                bindings: vec![],
            },
            QueueSpec {
                name: DEAD_LETTER_QUEUE.to_string(),
                durable: true,
                exclusive: false,
                max_priority: None,
                dead_letter_exchange: None,
                bindings: vec![QueueBinding {
                    exchange: DEAD_LETTER_EXCHANGE.to_string(),
                    routing_key: "#".to_string(),
                }],
            },
        ];

        for provider in Provider::all() {
            queues.push(QueueSpec {
                name: provider_queue(provider),
                durable: true,
                exclusive: false,
                max_priority: Some(MAX_PRIORITY),
                dead_letter_exchange: Some(DEAD_LETTER_EXCHANGE.to_string()),
                bindings: vec![QueueBinding {
                    exchange: PROCESSING_EXCHANGE.to_string(),
                    routing_key: provider_binding(provider),
                }],
            });
        }

        Self {
            exchanges: vec![
                ExchangeSpec {
                    name: PROCESSING_EXCHANGE.to_string(),
                    kind: ExchangeKind::Topic,
                },
                ExchangeSpec {
                    name: DELIVERY_EXCHANGE.to_string(),
                    kind: ExchangeKind::Topic,
                },
                ExchangeSpec {
                    name: DEAD_LETTER_EXCHANGE.to_string(),
                    kind: ExchangeKind::Fanout,
                },
            ],
            queues,
        }
    }

    /// Cola de entrega exclusiva de un owner, creada bajo demanda.
    pub fn hub(owner_id: &str) -> Self {
        let topic = hub_topic(owner_id);
        Self {
            exchanges: vec![ExchangeSpec {
                name: DELIVERY_EXCHANGE.to_string(),
                kind: ExchangeKind::Topic,
            }],
            queues: vec![QueueSpec {
                name: topic.clone(),
                durable: true,
                exclusive: true,
                max_priority: None,
                dead_letter_exchange: None,
                bindings: vec![QueueBinding {
                    exchange: DELIVERY_EXCHANGE.to_string(),
                    routing_key: topic,
                }],
            }],
        }
    }
}

/// Mensaje saliente con prioridad y correlación de petición.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub priority: u8,
    pub correlation_id: Option<String>,
}

impl OutboundMessage {
    pub fn json<T: Serialize>(
        value: &T,
        priority: u8,
        correlation_id: Option<String>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            payload: serde_json::to_vec(value)?,
            priority,
            correlation_id,
        })
    }
}

/// Mensaje entrante con su acuse pendiente.
///
/// Todo mensaje consumido termina en `ack` (procesado o descartado a
/// propósito) o en `reject`: con `requeue` vuelve a la cola, sin él se
/// redirige a la dead-letter para inspección offline.
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub routing_key: String,
    acker: Box<dyn MessageAck>,
}

impl InboundMessage {
    pub fn new(payload: Vec<u8>, routing_key: String, acker: Box<dyn MessageAck>) -> Self {
        Self {
            payload,
            routing_key,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), TransportError> {
        self.acker.reject(requeue).await
    }
}

#[async_trait]
pub trait MessageAck: Send {
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError>;
}

/// Flujo de consumo de una cola.
#[async_trait]
pub trait MessageStream: Send {
    /// Siguiente mensaje, o `None` si el flujo terminó.
    async fn next(&mut self) -> Option<InboundMessage>;
}

/// Contrato del transporte de mensajes: publish/subscribe durable con
/// enrutamiento por tópico, prioridad por mensaje y destino dead-letter.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn declare(&self, topology: &Topology) -> Result<(), TransportError>;

    /// Publica y retorna tras el acuse del broker. Un exchange vacío
    /// enruta directo a la cola nombrada por la routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), TransportError>;

    async fn consume(&self, queue: &str) -> Result<Box<dyn MessageStream>, TransportError>;
}
