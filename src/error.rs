use thiserror::Error;

/// Errores de resolución de una fuente individual.
///
/// La distinción transitorio/permanente decide la política de reintento:
/// los fallos transitorios se reintentan con backoff fijo y presupuesto
/// acotado, los permanentes se descartan sin reintento.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("fallo transitorio de resolución: {0}")]
    Transient(String),

    #[error("fallo permanente de resolución: {0}")]
    Permanent(String),

    /// Ningún matcher aceptó la query. Inalcanzable mientras exista el
    /// matcher catch-all; si ocurre se registra como anomalía.
    #[error("ninguna regla de clasificación aceptó la query")]
    ClassificationExhausted,

    #[error("sin resolver registrado para {provider}.{operation}")]
    UnknownResolver {
        provider: String,
        operation: String,
    },
}

impl ResolveError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errores del transporte de mensajes (variante distribuida).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("fallo del broker: {0}")]
    Broker(#[from] lapin::Error),

    #[error("fallo de serialización: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("la cola '{0}' no está declarada")]
    UnknownQueue(String),

    #[error("el exchange '{0}' no está declarado")]
    UnknownExchange(String),
}

/// Errores visibles por el consumidor de la cola.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("fallo de serialización: {0}")]
    Codec(#[from] serde_json::Error),
}
