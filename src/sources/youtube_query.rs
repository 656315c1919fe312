use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::{Operation, Provider, Resolution, SourcePair, SourceResolver};
use crate::cache::LookupCache;
use crate::config::Config;
use crate::error::ResolveError;

/// Resolver de búsquedas contra el proveedor genérico.
///
/// Consulta la página de resultados y elige el primer video como mejor
/// match determinista, re-emitiendo la query como operación URL para que
/// el hop final la resuelva a stream.
pub struct YouTubeSearchResolver {
    client: reqwest::Client,
    video_id: Regex,
    cache: LookupCache<String, String>,
}

impl YouTubeSearchResolver {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            video_id: Regex::new(r"watch\?v=([A-Za-z0-9_-]{11})").expect("regex inválida"),
            cache: LookupCache::new(config.cache_size, config.cache_ttl),
        }
    }

    /// Obtiene la URL canónica del video mejor posicionado para la query.
    async fn search(&self, query: &str) -> Result<String, ResolveError> {
        if let Some(hit) = self.cache.get(&query.to_string()) {
            debug!("Cache hit para búsqueda '{}'", query);
            return Ok(hit);
        }

        let search_url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(query)
        );

        let body = self
            .client
            .get(&search_url)
            .send()
            .await
            .map_err(|err| ResolveError::transient(format!("búsqueda fallida: {}", err)))?
            .text()
            .await
            .map_err(|err| ResolveError::transient(format!("respuesta ilegible: {}", err)))?;

        let url = self
            .first_video_url(&body)
            .ok_or_else(|| ResolveError::permanent(format!("sin resultados para '{}'", query)))?;

        info!("🔍 Búsqueda '{}' resuelta a {}", query, url);
        self.cache.insert(query.to_string(), url.clone());
        Ok(url)
    }

    fn first_video_url(&self, body: &str) -> Option<String> {
        self.video_id
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|id| format!("https://www.youtube.com/watch?v={}", id.as_str()))
    }
}

#[async_trait]
impl SourceResolver for YouTubeSearchResolver {
    fn name(&self) -> &'static str {
        "youtube_query"
    }

    async fn resolve(
        &self,
        source: &SourcePair,
        _shuffle: bool,
    ) -> Result<Resolution, ResolveError> {
        let url = self.search(&source.query).await?;
        Ok(Resolution::Requeue(SourcePair::new(
            url,
            Provider::YouTube,
            Operation::Url,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> YouTubeSearchResolver {
        YouTubeSearchResolver::new(&Config::default())
    }

    #[test]
    fn test_first_video_url_extracts_canonical_link() {
        let body = r#"<a href="/watch?v=dQw4w9WgXcQ">primer resultado</a>
                      <a href="/watch?v=o6wtDPVkKqI">segundo</a>"#;
        assert_eq!(
            resolver().first_video_url(body),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn test_first_video_url_without_results() {
        assert_eq!(resolver().first_video_url("<html></html>"), None);
    }

    #[tokio::test]
    async fn test_resolve_reemits_as_url_operation() {
        // Sin red no hay búsqueda; validamos el formato del requeue con el
        // extractor puro.
        let body = r#"href="/watch?v=abcdefghijk""#;
        let url = resolver().first_video_url(body).unwrap();
        let pair = SourcePair::new(url, Provider::YouTube, Operation::Url);
        assert_eq!(pair.operation, Operation::Url);
        assert_eq!(pair.provider, Provider::YouTube);
        assert_eq!(pair.query, "https://www.youtube.com/watch?v=abcdefghijk");
    }
}
