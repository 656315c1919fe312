use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::debug;

/// Cache entry con TTL simplificado
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: u64,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: current_timestamp(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        current_timestamp() > self.created_at + self.ttl.as_secs()
    }
}

/// Cache de lookups memoizados por provider.
///
/// Acotado en tamaño y tiempo de vida; cada provider mantiene su propia
/// instancia, las entradas nunca se comparten entre providers.
#[derive(Debug)]
pub struct LookupCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> LookupCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        if self.data.len() >= self.capacity {
            self.cleanup_expired();
        }
        // Sin espacio tras limpiar expiradas: se desaloja la entrada más vieja
        if self.data.len() >= self.capacity {
            let oldest = self
                .data
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                self.data.remove(&key);
            }
        }
        let entry = CacheEntry::new(value, self.ttl);
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                None
            } else {
                Some(entry.value.clone())
            }
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let keys_to_remove: Vec<K> = self
            .data
            .iter()
            .filter_map(|entry| {
                if entry.value().is_expired() {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        let mut removed = 0;
        for key in keys_to_remove {
            if self.data.remove(&key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }
}

impl<K, V> Clone for LookupCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            capacity: self.capacity,
            ttl: self.ttl,
        }
    }
}

/// Obtiene timestamp actual en segundos
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = LookupCache::new(4, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = LookupCache::new(4, Duration::from_secs(0));
        cache.insert("a".to_string(), 1);
        // TTL cero: expirada en el siguiente tick de reloj
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = LookupCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }
}
