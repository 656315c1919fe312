//! # Resona
//!
//! Cola de resolución y entrega de música: convierte referencias
//! heterogéneas (links directos, términos de búsqueda, playlists,
//! identificadores de servicios de streaming) en URLs de audio
//! reproducibles, y las entrega en orden a un consumidor de playback.
//!
//! El subsistema ofrece dos implementaciones intercambiables de la misma
//! abstracción de cola ([`queue::ResolutionQueue`]):
//!
//! - [`queue::local::LocalResolutionQueue`] — en proceso, con un pool
//!   acotado de workers de resolución.
//! - [`queue::remote::DistributedResolutionQueue`] — distribuida sobre un
//!   broker de mensajes con enrutamiento por tópicos, dead-letter queue y
//!   entrega por consumidor.

pub mod cache;
pub mod config;
pub mod error;
pub mod player;
pub mod probes;
pub mod queue;
pub mod sources;

pub use config::Config;
pub use error::{QueueError, ResolveError, TransportError};
pub use queue::ResolutionQueue;
