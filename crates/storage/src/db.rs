use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::entry::Entry;
use crate::ttl::Ttl;

/// Mapa chave → entrada, acessado apenas pelo worker.
///
/// Entradas mortas podem permanecer aqui até serem lidas ou varridas por
/// `prune`; não há purga em background.
#[derive(Debug)]
pub(crate) struct Db<V> {
    data: HashMap<String, Entry<V>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> Db<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: HashMap::new(),
            clock,
        }
    }

    /// Leitura com expiração preguiçosa: entrada morta é removida e vira `None`.
    /// O TTL de entradas vivas não é renovado.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let entry = self.data.get(key)?;
        if entry.is_expired(now) {
            self.data.remove(key);
            debug!("key expirada removida na leitura: {key}");
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&mut self, key: String, value: V, ttl: Ttl) {
        let expires_at = ttl.deadline(self.clock.now());
        self.data.insert(key, Entry::new(value, expires_at));
    }

    /// Retorna o valor vivo ou calcula, grava e retorna um novo.
    ///
    /// Se `compute` falhar nada é gravado e a entrada antiga (morta ou
    /// ausente) fica como estava.
    pub fn get_or_try_set<E>(
        &mut self,
        key: String,
        ttl: Ttl,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let now = self.clock.now();
        if let Some(entry) = self.data.get(&key)
            && !entry.is_expired(now)
        {
            return Ok(entry.value.clone());
        }

        debug!("computando valor para key: {key}");
        let value = compute()?;
        // O compute pode ter demorado: o TTL conta a partir de agora
        let expires_at = ttl.deadline(self.clock.now());
        self.data.insert(key, Entry::new(value.clone(), expires_at));
        Ok(value)
    }

    /// Remove todas as entradas mortas. Retorna quantas foram removidas.
    pub fn prune(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.data.len();
        debug!("prune removeu {removed} keys, restam {}", self.data.len());
        removed
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.data.len()
    }

    #[cfg(test)]
    fn expires_at(&self, key: &str) -> Option<tokio::time::Instant> {
        self.data.get(key).map(|e| e.expires_at)
    }
}
