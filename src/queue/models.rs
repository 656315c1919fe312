use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sources::{Operation, Provider, SourcePair};

/// Petición de resolución: un `add()` del consumidor.
///
/// El `id` se genera en la creación, no se reutiliza jamás, y correlaciona
/// todos los mensajes derivados de la petición hasta la entrega.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub id: Uuid,
    pub owner_id: String,
    pub shuffle: bool,
    pub queries: Vec<String>,
}

impl ResolutionRequest {
    pub fn new(owner_id: impl Into<String>, shuffle: bool, queries: Vec<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id: owner_id.into(),
            shuffle,
            queries,
        }
    }
}

/// Tarea de resolución de una sola query, en vuelo entre stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOperation {
    pub request_id: Uuid,
    pub owner_id: String,
    pub provider: Provider,
    pub operation: Operation,
    pub shuffle: bool,
    pub query: String,
}

impl ProviderOperation {
    pub fn from_pair(request_id: Uuid, owner_id: &str, shuffle: bool, pair: SourcePair) -> Self {
        Self {
            request_id,
            owner_id: owner_id.to_string(),
            provider: pair.provider,
            operation: pair.operation,
            shuffle,
            query: pair.query,
        }
    }

    pub fn pair(&self) -> SourcePair {
        SourcePair::new(self.query.clone(), self.provider, self.operation)
    }

    /// Routing key de la operación: `provider.<proveedor>.<operación>`.
    pub fn routing_key(&self) -> String {
        routing_key(self.provider, self.operation)
    }
}

/// Artefacto terminal: una URL reproducible lista para entrega.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMusic {
    pub request_id: Uuid,
    pub owner_id: String,
    pub source: String,
}

// Topología del broker (variante distribuida)
pub const PROCESSING_EXCHANGE: &str = "music.processing";
pub const DELIVERY_EXCHANGE: &str = "music.delivery";
pub const DEAD_LETTER_EXCHANGE: &str = "music.dlx";
pub const DEAD_LETTER_QUEUE: &str = "music.dead_letter";
pub const REQUESTS_QUEUE: &str = "music.requests";

/// Prioridad máxima declarada en las colas de proveedor.
pub const MAX_PRIORITY: u8 = 10;
/// Prioridad de las operaciones emitidas por el dispatch.
pub const DISPATCH_PRIORITY: u8 = 1;
/// Prioridad elevada de los hops query→url: la resolución de búsquedas
/// no debe esperar detrás del backlog de jobs url.
pub const REQUEUE_PRIORITY: u8 = 5;

pub fn routing_key(provider: Provider, operation: Operation) -> String {
    format!("provider.{}.{}", provider, operation)
}

/// Cola de trabajo de un proveedor, suscrita a todas sus operaciones.
pub fn provider_queue(provider: Provider) -> String {
    format!("provider.{}", provider)
}

pub fn provider_binding(provider: Provider) -> String {
    format!("provider.{}.*", provider)
}

/// Tópico de entrega exclusivo de un owner lógico.
pub fn hub_topic(owner_id: &str) -> String {
    format!("hub.{}", owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_routing_keys() {
        assert_eq!(
            routing_key(Provider::YouTube, Operation::Playlist),
            "provider.youtube.playlist"
        );
        assert_eq!(provider_queue(Provider::Spotify), "provider.spotify");
        assert_eq!(provider_binding(Provider::Spotify), "provider.spotify.*");
        assert_eq!(hub_topic("42"), "hub.42");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = ResolutionRequest::new("0", false, vec![]);
        let b = ResolutionRequest::new("0", false, vec![]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.get_version_num(), 7);
    }

    #[test]
    fn test_operation_wire_format() {
        let request = ResolutionRequest::new("guild-1", true, vec!["x".to_string()]);
        let operation = ProviderOperation::from_pair(
            request.id,
            &request.owner_id,
            request.shuffle,
            SourcePair::new("x", Provider::YouTube, Operation::Query),
        );

        assert_eq!(operation.routing_key(), "provider.youtube.query");

        let encoded = serde_json::to_string(&operation).unwrap();
        let decoded: ProviderOperation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, operation);
        assert_eq!(decoded.pair().provider, Provider::YouTube);
    }
}
