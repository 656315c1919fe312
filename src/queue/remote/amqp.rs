use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::transport::{
    self, InboundMessage, MessageAck, MessageStream, MessageTransport, OutboundMessage, Topology,
};
use crate::error::TransportError;

/// Transporte AMQP 0.9.1 (RabbitMQ) con confirmaciones de publicación.
///
/// Una conexión y un canal compartidos; las publicaciones esperan el
/// acuse del broker, de modo que `add()` retorna con el mensaje ya
/// persistido, no con la resolución completa.
pub struct AmqpTransport {
    channel: Channel,
    _connection: Connection,
}

impl AmqpTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        // Un mensaje en vuelo por consumidor: backpressure hacia el broker
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        info!("🐇 Conectado al broker AMQP");
        Ok(Self {
            channel,
            _connection: connection,
        })
    }
}

#[async_trait]
impl MessageTransport for AmqpTransport {
    async fn declare(&self, topology: &Topology) -> Result<(), TransportError> {
        for exchange in &topology.exchanges {
            let kind = match exchange.kind {
                transport::ExchangeKind::Topic => ExchangeKind::Topic,
                transport::ExchangeKind::Fanout => ExchangeKind::Fanout,
            };
            self.channel
                .exchange_declare(
                    exchange.name.as_str(),
                    kind,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        for queue in &topology.queues {
            let mut arguments = FieldTable::default();
            if let Some(max_priority) = queue.max_priority {
                arguments.insert("x-max-priority".into(), AMQPValue::LongInt(max_priority as i32));
            }
            if let Some(dead_letter) = &queue.dead_letter_exchange {
                arguments.insert(
                    "x-dead-letter-exchange".into(),
                    AMQPValue::LongString(dead_letter.as_str().into()),
                );
            }

            self.channel
                .queue_declare(
                    queue.name.as_str(),
                    QueueDeclareOptions {
                        durable: queue.durable,
                        exclusive: queue.exclusive,
                        ..Default::default()
                    },
                    arguments,
                )
                .await?;

            for binding in &queue.bindings {
                self.channel
                    .queue_bind(
                        queue.name.as_str(),
                        binding.exchange.as_str(),
                        binding.routing_key.as_str(),
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }

            debug!("Cola '{}' declarada", queue.name);
        }

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        let mut properties = BasicProperties::default()
            .with_priority(message.priority)
            .with_delivery_mode(2); // persistente

        if let Some(correlation_id) = message.correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }

        // Espera del acuse del broker (publisher confirm)
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn MessageStream>, TransportError> {
        let tag = format!("resona-{}", Uuid::now_v7());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!("Consumidor '{}' suscrito a '{}'", tag, queue);
        Ok(Box::new(AmqpStream { consumer }))
    }
}

struct AmqpStream {
    consumer: lapin::Consumer,
}

#[async_trait]
impl MessageStream for AmqpStream {
    async fn next(&mut self) -> Option<InboundMessage> {
        while let Some(delivery) = self.consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    let lapin::message::Delivery {
                        data,
                        routing_key,
                        acker,
                        ..
                    } = delivery;
                    return Some(InboundMessage::new(
                        data,
                        routing_key.to_string(),
                        Box::new(AmqpAck { acker }),
                    ));
                }
                Err(err) => {
                    error!("Error consumiendo del broker: {}", err);
                    continue;
                }
            }
        }
        None
    }
}

struct AmqpAck {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl MessageAck for AmqpAck {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        self.acker.reject(BasicRejectOptions { requeue }).await?;
        Ok(())
    }
}
