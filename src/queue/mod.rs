pub mod ledger;
pub mod local;
pub mod models;
pub mod remote;

use async_trait::async_trait;

use crate::error::QueueError;

/// Contrato de la cola de resolución, único punto de contacto del
/// consumidor de playback. Agnóstico de la variante: local y distribuida
/// son intercambiables por despliegue.
#[async_trait]
pub trait ResolutionQueue: Send + Sync {
    /// Encola queries crudas para resolución.
    ///
    /// `shuffle` reordena antes de agendar la resolución, nunca después,
    /// y nunca cambia qué queries se incluyen. En la variante local
    /// retorna tras insertar en el stage inicial; en la distribuida, tras
    /// el acuse de publicación.
    async fn add(&self, queries: &[String], shuffle: bool) -> Result<(), QueueError>;

    /// Obtiene la siguiente URL resuelta, con espera acotada.
    ///
    /// `None` significa "nada disponible dentro del timeout", no
    /// necesariamente cola vacía: la resolución tiene latencia.
    async fn get(&self) -> Option<String>;

    /// Ítems sin resolver más resueltos sin entregar. Nunca negativo.
    fn size(&self) -> usize;

    /// Única primitiva de cancelación, y es "soft": la resolución ya en
    /// vuelo termina y su resultado se descarta.
    async fn clear(&self);
}
