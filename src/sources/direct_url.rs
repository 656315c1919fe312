use async_trait::async_trait;
use tracing::debug;

use super::{Operation, Resolution, SourcePair, SourceResolver};
use crate::error::ResolveError;

/// Passthrough para URLs directas que ningún proveedor reconoce.
///
/// La URL se asume reproducible tal cual; el driver de playback decide
/// si realmente lo es.
pub struct DirectUrlResolver {}

impl DirectUrlResolver {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for DirectUrlResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceResolver for DirectUrlResolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn resolve(
        &self,
        source: &SourcePair,
        _shuffle: bool,
    ) -> Result<Resolution, ResolveError> {
        if source.operation != Operation::Url {
            return Err(ResolveError::permanent(
                "el passthrough solo soporta operaciones url",
            ));
        }

        debug!("URL directa aceptada sin resolución: {}", source.query);
        Ok(Resolution::Stream(source.query.clone()))
    }
}
