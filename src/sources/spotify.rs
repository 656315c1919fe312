use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{Operation, Provider, Resolution, SourcePair, SourceResolver};
use crate::config::Config;
use crate::error::ResolveError;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Resolver del catálogo de Spotify.
///
/// Spotify no expone audio directo, así que cada track del catálogo se
/// transmuta en una búsqueda `"título - artista"` contra el proveedor
/// genérico, formando la cadena de dos hops catálogo → búsqueda → stream.
pub struct SpotifyResolver {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
    token: Mutex<Option<CachedToken>>,
    playlist_limit: usize,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

/// Tipo de recurso del catálogo, según el path de la URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogKind {
    Track,
    Album,
    Playlist,
}

impl SpotifyResolver {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();

        let credentials = config
            .spotify_client_id
            .clone()
            .zip(config.spotify_client_secret.clone());

        Self {
            client,
            credentials,
            token: Mutex::new(None),
            playlist_limit: config.max_playlist_size,
        }
    }

    /// Token de API vía client credentials, cacheado hasta su expiración.
    async fn access_token(&self) -> Result<String, ResolveError> {
        if let Some(cached) = self.token.lock().clone() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value);
            }
        }

        let (client_id, client_secret) = self.credentials.as_ref().ok_or_else(|| {
            ResolveError::permanent("credenciales de Spotify no configuradas")
        })?;

        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", client_id, client_secret));

        let response = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", encoded))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| ResolveError::transient(format!("sin conexión a Spotify: {}", err)))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ResolveError::permanent(
                "autenticación de Spotify rechazada, revisar credenciales",
            ));
        }

        let token: TokenResponse = response
            .error_for_status()
            .map_err(|err| ResolveError::transient(format!("token de Spotify: {}", err)))?
            .json()
            .await
            .map_err(|err| ResolveError::transient(format!("token ilegible: {}", err)))?;

        let cached = CachedToken {
            value: token.access_token.clone(),
            // Renovación con margen antes de expirar
            expires_at: Instant::now()
                + Duration::from_secs(token.expires_in.saturating_sub(30)),
        };
        *self.token.lock() = Some(cached);

        debug!("Token de Spotify renovado");
        Ok(token.access_token)
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ResolveError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ResolveError::transient(format!("API de Spotify: {}", err)))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|err| ResolveError::transient(format!("respuesta ilegible: {}", err))),
            reqwest::StatusCode::NOT_FOUND => {
                Err(ResolveError::permanent(format!("recurso inexistente: {}", path)))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(ResolveError::transient("rate limit de Spotify"))
            }
            status if status.is_server_error() => {
                Err(ResolveError::transient(format!("Spotify respondió {}", status)))
            }
            status => Err(ResolveError::permanent(format!("Spotify respondió {}", status))),
        }
    }

    async fn catalog_tracks(
        &self,
        kind: CatalogKind,
        id: &str,
    ) -> Result<Vec<SpotifyTrack>, ResolveError> {
        match kind {
            CatalogKind::Track => {
                let track: SpotifyTrack = self.api_get(&format!("/tracks/{}", id)).await?;
                Ok(vec![track])
            }
            CatalogKind::Album => {
                let page: TrackPage = self
                    .api_get(&format!("/albums/{}/tracks?limit={}", id, self.playlist_limit))
                    .await?;
                Ok(page.items)
            }
            CatalogKind::Playlist => {
                let page: PlaylistPage = self
                    .api_get(&format!(
                        "/playlists/{}/tracks?limit={}&additional_types=track",
                        id, self.playlist_limit
                    ))
                    .await?;
                Ok(page.items.into_iter().filter_map(|item| item.track).collect())
            }
        }
    }
}

#[async_trait]
impl SourceResolver for SpotifyResolver {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn resolve(
        &self,
        source: &SourcePair,
        shuffle: bool,
    ) -> Result<Resolution, ResolveError> {
        let (kind, id) = parse_catalog_url(&source.query)?;
        let tracks = self.catalog_tracks(kind, &id).await?;

        if tracks.is_empty() {
            warn!("Catálogo sin tracks: {}", source.query);
            return Err(ResolveError::permanent(format!(
                "sin tracks en {}",
                source.query
            )));
        }

        let mut pairs: Vec<SourcePair> = tracks
            .iter()
            .map(|track| {
                SourcePair::new(format_track_query(track), Provider::YouTube, Operation::Query)
            })
            .collect();

        if kind == CatalogKind::Track {
            // Un único track es una reclasificación, no una expansión
            let pair = pairs.remove(0);
            debug!("Track de Spotify transmutado a búsqueda '{}'", pair.query);
            return Ok(Resolution::Requeue(pair));
        }

        if shuffle {
            pairs.shuffle(&mut rand::thread_rng());
        }

        info!(
            "🎶 Catálogo de Spotify expandido a {} búsquedas",
            pairs.len()
        );
        Ok(Resolution::Expand(pairs))
    }
}

/// Formato determinista `"título - artista"`, solo título si no hay artista.
fn format_track_query(track: &SpotifyTrack) -> String {
    match track.artists.first() {
        Some(artist) => format!("{} - {}", track.name, artist.name),
        None => track.name.clone(),
    }
}

/// Extrae `(tipo, id)` de una URL de catálogo de Spotify.
fn parse_catalog_url(raw: &str) -> Result<(CatalogKind, String), ResolveError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| ResolveError::permanent(format!("URL de Spotify mal formada: {}", raw)))?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();

    // Las URLs localizadas insertan un segmento `intl-xx` antes del tipo
    let mut iter = segments.iter().filter(|s| !s.starts_with("intl-"));
    let kind = match iter.next() {
        Some(&"track") => CatalogKind::Track,
        Some(&"album") => CatalogKind::Album,
        Some(&"playlist") => CatalogKind::Playlist,
        _ => {
            return Err(ResolveError::permanent(format!(
                "recurso de Spotify no soportado: {}",
                raw
            )))
        }
    };

    let id = iter
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ResolveError::permanent(format!("URL de Spotify sin id: {}", raw)))?;

    Ok((kind, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_track_url() {
        let (kind, id) =
            parse_catalog_url("https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT").unwrap();
        assert_eq!(kind, CatalogKind::Track);
        assert_eq!(id, "4cOdK2wGLETKBW3PvgPWqT");
    }

    #[test]
    fn test_parse_localized_playlist_url() {
        let (kind, id) =
            parse_catalog_url("https://open.spotify.com/intl-es/playlist/37i9dQZF1DXcBWIGoYBM5M")
                .unwrap();
        assert_eq!(kind, CatalogKind::Playlist);
        assert_eq!(id, "37i9dQZF1DXcBWIGoYBM5M");
    }

    #[test]
    fn test_parse_album_url_ignores_query_params() {
        let (kind, id) =
            parse_catalog_url("https://open.spotify.com/album/2up3OPMp9Tb4dAKM2erWXQ?si=xyz")
                .unwrap();
        assert_eq!(kind, CatalogKind::Album);
        assert_eq!(id, "2up3OPMp9Tb4dAKM2erWXQ");
    }

    #[test]
    fn test_parse_rejects_unknown_resource() {
        assert!(parse_catalog_url("https://open.spotify.com/artist/abc").is_err());
        assert!(parse_catalog_url("no es una url").is_err());
    }

    #[test]
    fn test_format_track_query() {
        let track = SpotifyTrack {
            name: "Bohemian Rhapsody".to_string(),
            artists: vec![SpotifyArtist {
                name: "Queen".to_string(),
            }],
        };
        assert_eq!(format_track_query(&track), "Bohemian Rhapsody - Queen");

        let anonymous = SpotifyTrack {
            name: "Interlude".to_string(),
            artists: vec![],
        };
        assert_eq!(format_track_query(&anonymous), "Interlude");
    }

    #[test]
    fn test_resolver_without_credentials_is_permanent_failure() {
        let resolver = SpotifyResolver::new(&Config::default());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = runtime.block_on(resolver.access_token()).unwrap_err();
        assert!(!err.is_transient());
    }
}
