use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Operation, Provider, Resolution, SourcePair, SourceResolver};
use crate::cache::LookupCache;
use crate::config::Config;
use crate::error::ResolveError;

/// Resolver de URLs y playlists de YouTube.
///
/// Obtiene la URL de audio de mejor calidad vía yt-dlp, con reintentos de
/// backoff fijo para fallos transitorios. Las playlists se expanden a la
/// lista ordenada de videos, opcionalmente mezclada por el flag del
/// request que la originó.
pub struct YouTubeResolver {
    cache: LookupCache<String, String>,
    retries: u32,
    backoff: Duration,
    subprocess_timeout: Duration,
    max_playlist_size: usize,
}

#[derive(Debug, Deserialize)]
struct PlaylistDump {
    #[serde(default)]
    entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    id: Option<String>,
    url: Option<String>,
}

impl YouTubeResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            cache: LookupCache::new(config.cache_size, config.cache_ttl),
            retries: config.resolver_retries.max(1),
            backoff: config.resolver_backoff,
            subprocess_timeout: config.http_timeout,
            max_playlist_size: config.max_playlist_size,
        }
    }

    /// Obtiene la URL de audio para un video, con reintentos.
    async fn stream_url(&self, query: &str) -> Result<String, ResolveError> {
        if let Some(hit) = self.cache.get(&query.to_string()) {
            debug!("Cache hit para '{}'", query);
            return Ok(hit);
        }

        let mut attempt = 1;
        loop {
            match self.fetch_stream_url(query).await {
                Ok(url) => {
                    info!("✅ URL de audio obtenida para '{}'", query);
                    self.cache.insert(query.to_string(), url.clone());
                    return Ok(url);
                }
                Err(err) if err.is_transient() && attempt < self.retries => {
                    warn!("Intento {} fallido para '{}': {}", attempt, query, err);
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_stream_url(&self, query: &str) -> Result<String, ResolveError> {
        let output = tokio::time::timeout(
            self.subprocess_timeout,
            Command::new("yt-dlp")
                .args([
                    "-f",
                    "bestaudio/best",
                    "--get-url",
                    "--no-playlist",
                    "--no-warnings",
                    "--quiet",
                    query,
                ])
                .output(),
        )
        .await
        .map_err(|_| ResolveError::transient("timeout ejecutando yt-dlp"))?
        .map_err(|err| ResolveError::transient(format!("no se pudo ejecutar yt-dlp: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::transient(format!(
                "yt-dlp terminó con error: {}",
                stderr.lines().next().unwrap_or("desconocido")
            )));
        }

        pick_stream_line(&output.stdout)
            .ok_or_else(|| ResolveError::permanent(format!("sin URL de audio para '{}'", query)))
    }

    /// Expande una playlist a sus videos individuales.
    async fn expand_playlist(
        &self,
        url: &str,
        shuffle: bool,
    ) -> Result<Resolution, ResolveError> {
        let output = tokio::time::timeout(
            self.subprocess_timeout,
            Command::new("yt-dlp")
                .args([
                    "--flat-playlist",
                    "--dump-single-json",
                    "--no-warnings",
                    "--quiet",
                    url,
                ])
                .output(),
        )
        .await
        .map_err(|_| ResolveError::transient("timeout expandiendo playlist"))?
        .map_err(|err| ResolveError::transient(format!("no se pudo ejecutar yt-dlp: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::transient(format!(
                "yt-dlp terminó con error: {}",
                stderr.lines().next().unwrap_or("desconocido")
            )));
        }

        let entries = parse_playlist_entries(&output.stdout, self.max_playlist_size)?;
        if entries.is_empty() {
            return Err(ResolveError::permanent(format!("playlist vacía: {}", url)));
        }

        let mut pairs: Vec<SourcePair> = entries
            .into_iter()
            .map(|entry| SourcePair::new(entry, Provider::YouTube, Operation::Url))
            .collect();

        if shuffle {
            pairs.shuffle(&mut rand::thread_rng());
        }

        info!("🎶 Playlist expandida a {} videos", pairs.len());
        Ok(Resolution::Expand(pairs))
    }
}

#[async_trait]
impl SourceResolver for YouTubeResolver {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn resolve(
        &self,
        source: &SourcePair,
        shuffle: bool,
    ) -> Result<Resolution, ResolveError> {
        match source.operation {
            Operation::Url => self.stream_url(&source.query).await.map(Resolution::Stream),
            Operation::Playlist => self.expand_playlist(&source.query, shuffle).await,
            Operation::Query => Err(ResolveError::permanent(
                "las búsquedas se resuelven con el resolver de queries",
            )),
        }
    }
}

fn pick_stream_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http"))
        .map(str::to_string)
}

fn parse_playlist_entries(raw: &[u8], limit: usize) -> Result<Vec<String>, ResolveError> {
    let dump: PlaylistDump = serde_json::from_slice(raw)
        .map_err(|err| ResolveError::permanent(format!("playlist ilegible: {}", err)))?;

    Ok(dump
        .entries
        .into_iter()
        .filter_map(|entry| {
            entry.url.or_else(|| {
                entry
                    .id
                    .map(|id| format!("https://www.youtube.com/watch?v={}", id))
            })
        })
        .take(limit)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pick_stream_line() {
        let stdout = b"https://rr4---sn.googlevideo.com/videoplayback?x=1\n";
        assert_eq!(
            pick_stream_line(stdout),
            Some("https://rr4---sn.googlevideo.com/videoplayback?x=1".to_string())
        );
        assert_eq!(pick_stream_line(b"WARNING: algo\n"), None);
        assert_eq!(pick_stream_line(b""), None);
    }

    #[test]
    fn test_parse_playlist_entries_prefers_url() {
        let raw = br#"{"entries": [
            {"id": "abc123def45", "url": "https://www.youtube.com/watch?v=abc123def45"},
            {"id": "xyz987uvw65", "url": null}
        ]}"#;
        let entries = parse_playlist_entries(raw, 100).unwrap();
        assert_eq!(
            entries,
            vec![
                "https://www.youtube.com/watch?v=abc123def45".to_string(),
                "https://www.youtube.com/watch?v=xyz987uvw65".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_playlist_entries_respects_limit() {
        let raw = br#"{"entries": [
            {"id": "a", "url": null},
            {"id": "b", "url": null},
            {"id": "c", "url": null}
        ]}"#;
        let entries = parse_playlist_entries(raw, 2).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_parse_playlist_entries_rejects_garbage() {
        assert!(parse_playlist_entries(b"not json", 10).is_err());
    }
}
