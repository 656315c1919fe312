use tracing::{debug, warn};

use super::{Operation, Provider, SourcePair};
use crate::error::ResolveError;

/// Un eslabón de la cadena de clasificación: predicado de aceptación más
/// constructor del par resultante.
struct Matcher {
    name: &'static str,
    accepts: fn(&str) -> bool,
    build: fn(&str) -> SourcePair,
}

/// Cadena ordenada de matchers. El orden es significativo y debe
/// preservarse: las URLs de proveedores específicos se reconocen antes
/// que el matcher genérico de búsqueda, y el passthrough de URLs cierra
/// la cadena. El primer matcher que acepta gana.
const MATCHERS: &[Matcher] = &[
    Matcher {
        name: "youtube",
        accepts: |query| is_url(query) && (query.contains("youtube.") || query.contains("youtu.be")),
        build: |query| {
            // El marcador de playlist promueve la operación
            let operation = if query.contains("list=") {
                Operation::Playlist
            } else {
                Operation::Url
            };
            SourcePair::new(query, Provider::YouTube, operation)
        },
    },
    Matcher {
        name: "spotify",
        accepts: |query| is_url(query) && query.contains("spotify"),
        build: |query| SourcePair::new(query, Provider::Spotify, Operation::Url),
    },
    Matcher {
        name: "search",
        accepts: |query| !is_url(query),
        build: |query| SourcePair::new(query, Provider::YouTube, Operation::Query),
    },
    Matcher {
        name: "direct",
        accepts: is_url,
        build: |query| SourcePair::new(query, Provider::Direct, Operation::Url),
    },
];

fn is_url(query: &str) -> bool {
    query.starts_with("http://") || query.starts_with("https://")
}

/// Clasifica una query cruda en un [`SourcePair`].
///
/// Pura y determinista; nunca devuelve vacío. Una query no reconocida
/// que no sea URL se clasifica como búsqueda contra el proveedor por
/// defecto.
pub fn classify(query: &str) -> SourcePair {
    let query = query.trim();
    for matcher in MATCHERS {
        if (matcher.accepts)(query) {
            let pair = (matcher.build)(query);
            debug!(
                "Query '{}' clasificada por '{}' como {}.{}",
                query, matcher.name, pair.provider, pair.operation
            );
            return pair;
        }
    }

    // Inalcanzable: entre 'search' y 'direct' toda entrada queda cubierta
    warn!(
        error = %ResolveError::ClassificationExhausted,
        "Query '{}' sin clasificación, usando passthrough",
        query
    );
    SourcePair::new(query, Provider::Direct, Operation::Url)
}
