pub mod classifier;
pub mod direct_url;
pub mod spotify;
pub mod youtube;
pub mod youtube_query;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::config::Config;
use crate::error::ResolveError;

pub use classifier::classify;
pub use direct_url::DirectUrlResolver;
pub use spotify::SpotifyResolver;
pub use youtube::YouTubeResolver;
pub use youtube_query::YouTubeSearchResolver;

/// Proveedores de audio soportados.
///
/// `YouTube` es el proveedor genérico por defecto: toda búsqueda textual
/// termina resolviéndose contra él. `Direct` es el passthrough para URLs
/// no reconocidas por ningún proveedor específico.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    YouTube,
    Spotify,
    Direct,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::Spotify => "spotify",
            Provider::Direct => "direct",
        }
    }

    /// Proveedores con cola propia en la variante distribuida.
    pub fn all() -> [Provider; 3] {
        [Provider::YouTube, Provider::Spotify, Provider::Direct]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tipo de paso de resolución que requiere una query clasificada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Url,
    Query,
    Playlist,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Url => "url",
            Operation::Query => "query",
            Operation::Playlist => "playlist",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Una query junto al proveedor y la operación que la resuelven.
///
/// Inmutable una vez producida por el clasificador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePair {
    pub query: String,
    pub provider: Provider,
    pub operation: Operation,
}

impl SourcePair {
    pub fn new(query: impl Into<String>, provider: Provider, operation: Operation) -> Self {
        Self {
            query: query.into(),
            provider,
            operation,
        }
    }
}

/// Resultado de un paso de resolución.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// URL de stream reproducible, artefacto terminal.
    Stream(String),
    /// Expansión a sub-queries (playlists, álbumes).
    Expand(Vec<SourcePair>),
    /// Reclasificación a resolver de nuevo, con prioridad elevada en la
    /// variante distribuida (los hops query→url no deben esperar detrás
    /// del backlog de jobs url).
    Requeue(SourcePair),
}

/// Contrato común de los resolvers de proveedor.
///
/// `shuffle` pertenece al request que originó la operación; solo los
/// resolvers que expanden listas lo consultan.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, source: &SourcePair, shuffle: bool)
        -> Result<Resolution, ResolveError>;
}

/// Registro de resolvers indexado por `(proveedor, operación)`.
///
/// Agregar un proveedor nuevo es un acto de registro puro: un matcher en
/// el clasificador y una entrada aquí, nada más cambia.
pub struct SourceRegistry {
    resolvers: HashMap<(Provider, Operation), Arc<dyn SourceResolver>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        provider: Provider,
        operation: Operation,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        self.resolvers.insert((provider, operation), resolver);
        self
    }

    pub fn resolver(
        &self,
        provider: Provider,
        operation: Operation,
    ) -> Option<Arc<dyn SourceResolver>> {
        self.resolvers.get(&(provider, operation)).cloned()
    }

    /// Registro estándar con los resolvers reales de cada proveedor.
    pub fn standard(config: &Config) -> Self {
        let youtube = Arc::new(YouTubeResolver::new(config));
        let search = Arc::new(YouTubeSearchResolver::new(config));
        let spotify = Arc::new(SpotifyResolver::new(config));
        let direct = Arc::new(DirectUrlResolver::new());

        Self::new()
            .register(Provider::YouTube, Operation::Url, youtube.clone())
            .register(Provider::YouTube, Operation::Playlist, youtube)
            .register(Provider::YouTube, Operation::Query, search)
            .register(Provider::Spotify, Operation::Url, spotify)
            .register(Provider::Direct, Operation::Url, direct)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullResolver;

    #[async_trait]
    impl SourceResolver for NullResolver {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn resolve(
            &self,
            _source: &SourcePair,
            _shuffle: bool,
        ) -> Result<Resolution, ResolveError> {
            Err(ResolveError::permanent("null resolver"))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry =
            SourceRegistry::new().register(Provider::Direct, Operation::Url, Arc::new(NullResolver));

        assert!(registry
            .resolver(Provider::Direct, Operation::Url)
            .is_some());
        assert!(registry
            .resolver(Provider::YouTube, Operation::Url)
            .is_none());
    }

    #[test]
    fn test_standard_registry_covers_all_routes() {
        let registry = SourceRegistry::standard(&Config::default());
        for (provider, operation) in [
            (Provider::YouTube, Operation::Url),
            (Provider::YouTube, Operation::Playlist),
            (Provider::YouTube, Operation::Query),
            (Provider::Spotify, Operation::Url),
            (Provider::Direct, Operation::Url),
        ] {
            assert!(
                registry.resolver(provider, operation).is_some(),
                "falta resolver para {}.{}",
                provider,
                operation
            );
        }
    }

    #[test]
    fn test_provider_wire_names() {
        assert_eq!(
            serde_json::to_string(&Provider::YouTube).unwrap(),
            "\"youtube\""
        );
        assert_eq!(
            serde_json::to_string(&Operation::Playlist).unwrap(),
            "\"playlist\""
        );
    }
}
