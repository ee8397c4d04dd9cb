use tokio::time::Instant;

/// Entrada no store: valor + instante de expiração.
#[derive(Debug, Clone)]
pub(crate) struct Entry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> Entry<V> {
    pub fn new(value: V, expires_at: Instant) -> Self {
        Self { value, expires_at }
    }

    /// Morta a partir do instante de expiração (inclusive).
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
