use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Libro de peticiones en vuelo (variante distribuida).
///
/// Mapa acotado en tiempo y tamaño de `request_id` a su estado de
/// vigencia. Un resultado que llega al hub solo se acepta si su petición
/// sigue viva aquí; lo demás es un resultado stale y se descarta. Las
/// entradas se desalojan automáticamente por TTL o por límite de
/// cantidad, acotando memoria bajo churn.
pub struct RequestLedger {
    entries: DashMap<Uuid, LedgerEntry>,
    max_requests: usize,
    ttl: chrono::Duration,
    stale_discarded: AtomicU64,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    created_at: DateTime<Utc>,
    /// Resultados aún esperados, estimado: la expansión remota de
    /// playlists puede entregar más de lo registrado.
    remaining: usize,
    delivered: u64,
}

impl RequestLedger {
    pub fn new(max_requests: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_requests: max_requests.max(1),
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            stale_discarded: AtomicU64::new(0),
        }
    }

    /// Registra una petición recién creada como viva.
    pub fn register(&self, request_id: Uuid, expected: usize) {
        self.evict_expired();

        while self.entries.len() >= self.max_requests {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| *entry.key());
            match oldest {
                Some(key) => {
                    warn!("📒 Ledger lleno, desalojando petición {}", key);
                    self.entries.remove(&key);
                }
                None => break,
            }
        }

        self.entries.insert(
            request_id,
            LedgerEntry {
                created_at: Utc::now(),
                remaining: expected,
                delivered: 0,
            },
        );
    }

    /// Valida un resultado entrante contra la petición que lo originó.
    ///
    /// Devuelve `false` para peticiones limpiadas, expiradas o
    /// desconocidas: el resultado es stale y debe descartarse.
    pub fn accept(&self, request_id: &Uuid) -> bool {
        let now = Utc::now();

        if let Some(mut entry) = self.entries.get_mut(request_id) {
            if self.is_expired(entry.value(), now) {
                drop(entry);
                self.entries.remove(request_id);
                self.stale_discarded.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            entry.delivered += 1;
            entry.remaining = entry.remaining.saturating_sub(1);
            return true;
        }

        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Descarta una petición registrada (p. ej. si su publicación falló).
    pub fn forget(&self, request_id: &Uuid) {
        self.entries.remove(request_id);
    }

    /// Resultados aún esperados entre todas las peticiones vivas.
    pub fn pending(&self) -> usize {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|entry| !self.is_expired(entry.value(), now))
            .map(|entry| entry.value().remaining)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resultados stale descartados desde la creación, para diagnóstico.
    pub fn stale_discarded(&self) -> u64 {
        self.stale_discarded.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let cleared = self.entries.len();
        self.entries.clear();
        debug!("📒 Ledger limpiado: {} peticiones olvidadas", cleared);
    }

    fn is_expired(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.created_at) >= self.ttl
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.created_at) < self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(max: usize, ttl: Duration) -> RequestLedger {
        RequestLedger::new(max, ttl)
    }

    #[test]
    fn test_register_and_accept() {
        let ledger = ledger(8, Duration::from_secs(60));
        let id = Uuid::now_v7();
        ledger.register(id, 2);

        assert_eq!(ledger.pending(), 2);
        assert!(ledger.accept(&id));
        assert_eq!(ledger.pending(), 1);
        assert!(ledger.accept(&id));
        assert_eq!(ledger.pending(), 0);
        // La entrada sigue viva: una playlist puede entregar de más
        assert!(ledger.accept(&id));
        assert_eq!(ledger.stale_discarded(), 0);
    }

    #[test]
    fn test_unknown_request_is_stale() {
        let ledger = ledger(8, Duration::from_secs(60));
        assert!(!ledger.accept(&Uuid::now_v7()));
        assert_eq!(ledger.stale_discarded(), 1);
    }

    #[test]
    fn test_clear_makes_results_stale() {
        let ledger = ledger(8, Duration::from_secs(60));
        let id = Uuid::now_v7();
        ledger.register(id, 1);
        ledger.clear();

        assert!(ledger.is_empty());
        assert!(!ledger.accept(&id));
        assert_eq!(ledger.stale_discarded(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let ledger = ledger(8, Duration::from_secs(0));
        let id = Uuid::now_v7();
        ledger.register(id, 1);

        assert!(!ledger.accept(&id));
        assert_eq!(ledger.pending(), 0);
        assert_eq!(ledger.stale_discarded(), 1);
    }

    #[test]
    fn test_max_len_evicts_oldest() {
        let ledger = ledger(2, Duration::from_secs(60));
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let third = Uuid::now_v7();

        ledger.register(first, 1);
        std::thread::sleep(Duration::from_millis(5));
        ledger.register(second, 1);
        std::thread::sleep(Duration::from_millis(5));
        ledger.register(third, 1);

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.accept(&first));
        assert!(ledger.accept(&second));
        assert!(ledger.accept(&third));
    }

    #[test]
    fn test_forget_removes_entry() {
        let ledger = ledger(8, Duration::from_secs(60));
        let id = Uuid::now_v7();
        ledger.register(id, 3);
        ledger.forget(&id);
        assert_eq!(ledger.pending(), 0);
        assert!(!ledger.accept(&id));
    }
}
