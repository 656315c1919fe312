use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::ResolutionQueue;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("fallo de reproducción: {0}")]
    Failed(String),
}

/// Frontera con el driver de playback real.
///
/// `play` envía la URL al transporte de audio y retorna recién cuando la
/// reproducción termina o falla; el player no avanza antes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackDriver: Send + Sync {
    async fn play(&self, url: &str) -> Result<(), PlaybackError>;
}

/// Consumidor de la cola: extrae una URL a la vez y la reproduce.
pub struct Player {
    queue: Arc<dyn ResolutionQueue>,
    driver: Arc<dyn PlaybackDriver>,
    idle_wait: Duration,
}

impl Player {
    pub fn new(queue: Arc<dyn ResolutionQueue>, driver: Arc<dyn PlaybackDriver>) -> Self {
        Self {
            queue,
            driver,
            idle_wait: Duration::from_millis(500),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("▶️ Player iniciado");
        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => break,
                item = self.queue.get() => item,
            };

            match item {
                Some(url) => {
                    debug!("▶️ Reproduciendo {}", url);
                    if let Err(err) = self.driver.play(&url).await {
                        // Un fallo no frena la cola: se avanza al siguiente
                        warn!("Reproducción fallida, se avanza: {}", err);
                    }
                }
                None => {
                    // "Vacío" es "reintentar luego": puede haber resolución
                    // en vuelo
                    tokio::time::sleep(self.idle_wait).await;
                }
            }
        }
        info!("⏹️ Player detenido");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Cola precargada para ejercitar solo el contrato del consumidor.
    struct VecQueue {
        items: Mutex<VecDeque<String>>,
    }

    impl VecQueue {
        fn preloaded(items: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(items.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl ResolutionQueue for VecQueue {
        async fn add(&self, queries: &[String], _shuffle: bool) -> Result<(), QueueError> {
            let mut items = self.items.lock();
            for query in queries {
                items.push_back(query.clone());
            }
            Ok(())
        }

        async fn get(&self) -> Option<String> {
            self.items.lock().pop_front()
        }

        fn size(&self) -> usize {
            self.items.lock().len()
        }

        async fn clear(&self) {
            self.items.lock().clear();
        }
    }

    #[tokio::test]
    async fn test_player_drains_queue_in_order() {
        let queue = VecQueue::preloaded(&["https://s.example/1", "https://s.example/2"]);

        let mut driver = MockPlaybackDriver::new();
        let mut sequence = mockall::Sequence::new();
        driver
            .expect_play()
            .withf(|url| url == "https://s.example/1")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));
        driver
            .expect_play()
            .withf(|url| url == "https://s.example/2")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));

        let player = Player::new(queue.clone(), Arc::new(driver));
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { player.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.expect("expectativas del driver incumplidas");

        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_player_advances_past_playback_errors() {
        let queue = VecQueue::preloaded(&["https://s.example/bad", "https://s.example/good"]);

        let mut driver = MockPlaybackDriver::new();
        driver
            .expect_play()
            .withf(|url| url == "https://s.example/bad")
            .times(1)
            .returning(|_| Err(PlaybackError::Failed("formato no soportado".to_string())));
        driver
            .expect_play()
            .withf(|url| url == "https://s.example/good")
            .times(1)
            .returning(|_| Ok(()));

        let player = Player::new(queue.clone(), Arc::new(driver));
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { player.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.expect("expectativas del driver incumplidas");

        assert_eq!(queue.size(), 0);
    }
}
