use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use ttlcache_common::{DEFAULT_WORKER_NAME, StoreError, StoreResult};

use crate::clock::{Clock, SystemClock};
use crate::command::Command;
use crate::db::Db;
use crate::ttl::Ttl;
use crate::worker::Worker;

/// Estado compartilhado entre todos os clones do handle.
struct Shared<V> {
    tx: mpsc::UnboundedSender<Command<V>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

/// Handle para o TTL store.
///
/// Todas as operações são serializadas por um único worker, dono do mapa.
/// As variantes bloqueantes não devem ser chamadas de dentro de um runtime
/// async; para isso existem as variantes `*_async`.
pub struct TtlStore<V> {
    shared: Arc<Shared<V>>,
}

/// Configuração do store.
pub struct StoreBuilder<V> {
    worker_name: String,
    clock: Arc<dyn Clock>,
    _value: PhantomData<fn() -> V>,
}

impl<V> StoreBuilder<V> {
    pub fn new() -> Self {
        Self {
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            clock: Arc::new(SystemClock),
            _value: PhantomData,
        }
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

impl<V> StoreBuilder<V>
where
    V: Clone + Send + 'static,
{
    /// Cria o mapa vazio e inicia o worker numa thread dedicada.
    pub fn build(self) -> StoreResult<TtlStore<V>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker::new(Db::new(self.clock), rx, shutdown_rx);

        let handle = thread::Builder::new()
            .name(self.worker_name)
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        // Receiver é descartado: toda operação recebe `Closed`
                        error!("falha ao criar runtime do worker: {e}");
                        return;
                    }
                };
                runtime.block_on(worker.run());
            })?;

        let worker_id = handle.thread().id();
        Ok(TtlStore {
            shared: Arc::new(Shared {
                tx,
                shutdown: shutdown_tx,
                worker: Mutex::new(Some(handle)),
                worker_id,
            }),
        })
    }
}

impl<V> Clone for StoreBuilder<V> {
    fn clone(&self) -> Self {
        Self {
            worker_name: self.worker_name.clone(),
            clock: self.clock.clone(),
            _value: PhantomData,
        }
    }
}

impl<V> Default for StoreBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for StoreBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("worker_name", &self.worker_name)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<V> TtlStore<V>
where
    V: Clone + Send + 'static,
{
    /// Store vazio com relógio do sistema.
    ///
    /// # Panics
    ///
    /// Se o sistema operacional não conseguir criar a thread do worker, como
    /// `std::thread::spawn`. Use [`StoreBuilder::build`] para tratar o erro.
    pub fn new() -> Self {
        StoreBuilder::new()
            .build()
            .unwrap_or_else(|e| panic!("falha ao iniciar o ttl store: {e}"))
    }

    pub fn builder() -> StoreBuilder<V> {
        StoreBuilder::new()
    }

    /// Grava `value` com expiração em `now + ttl`. TTL zero ou negativo grava
    /// uma entrada já expirada.
    ///
    /// Não espera o worker: a ordem em relação às operações seguintes é
    /// garantida pela fila. A expiração é medida quando o worker aplica a
    /// escrita, não no momento desta chamada.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: impl Into<Ttl>,
    ) -> StoreResult<()> {
        self.submit(Command::Set {
            key: key.into(),
            value,
            ttl: ttl.into(),
        })
    }

    /// Valor vivo da chave. Entrada expirada é removida e retorna `None`.
    pub fn get(&self, key: &str) -> StoreResult<Option<V>> {
        self.ensure_not_worker()?;
        let rx = self.request_get(key)?;
        rx.blocking_recv().map_err(|_| StoreError::Closed)
    }

    pub async fn get_async(&self, key: &str) -> StoreResult<Option<V>> {
        self.ensure_not_worker()?;
        let rx = self.request_get(key)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// Retorna o valor vivo ou grava e retorna o resultado de `compute`.
    ///
    /// `compute` roda no worker e bloqueia todas as outras operações enquanto
    /// executa. Leituras e `prune` no mesmo store feitos de dentro dele,
    /// bloqueantes ou async, retornam [`StoreError::Reentrant`].
    pub fn get_or_set<F>(
        &self,
        key: impl Into<String>,
        ttl: impl Into<Ttl>,
        compute: F,
    ) -> StoreResult<V>
    where
        F: FnOnce() -> V + Send + 'static,
    {
        self.ensure_not_worker()?;
        let rx = self.request_get_or_set(key.into(), ttl.into(), Box::new(compute))?;
        rx.blocking_recv().map_err(|_| StoreError::Closed)?
    }

    pub async fn get_or_set_async<F>(
        &self,
        key: impl Into<String>,
        ttl: impl Into<Ttl>,
        compute: F,
    ) -> StoreResult<V>
    where
        F: FnOnce() -> V + Send + 'static,
    {
        self.ensure_not_worker()?;
        let rx = self.request_get_or_set(key.into(), ttl.into(), Box::new(compute))?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Remove todas as entradas expiradas. Retorna quantas foram removidas.
    pub fn prune(&self) -> StoreResult<usize> {
        self.ensure_not_worker()?;
        let rx = self.request_prune()?;
        rx.blocking_recv().map_err(|_| StoreError::Closed)
    }

    pub async fn prune_async(&self) -> StoreResult<usize> {
        self.ensure_not_worker()?;
        let rx = self.request_prune()?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    fn request_get(&self, key: &str) -> StoreResult<oneshot::Receiver<Option<V>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Get {
            key: key.to_string(),
            reply,
        })?;
        Ok(rx)
    }

    fn request_get_or_set(
        &self,
        key: String,
        ttl: Ttl,
        compute: Box<dyn FnOnce() -> V + Send>,
    ) -> StoreResult<oneshot::Receiver<StoreResult<V>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::GetOrSet {
            key,
            ttl,
            compute,
            reply,
        })?;
        Ok(rx)
    }

    fn request_prune(&self) -> StoreResult<oneshot::Receiver<usize>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Prune { reply })?;
        Ok(rx)
    }
}

impl<V> TtlStore<V> {
    /// Encerra o worker. Idempotente; operações posteriores retornam
    /// [`StoreError::Closed`].
    ///
    /// Espera o comando em execução terminar. Comandos ainda na fila são
    /// descartados. Chamado de dentro do worker, apenas sinaliza.
    pub fn shutdown(&self) {
        if self.shared.shutdown.send_replace(true) {
            return;
        }
        info!("shutdown solicitado");

        if thread::current().id() == self.shared.worker_id {
            return;
        }
        let handle = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("worker terminou com pânico");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown.borrow() || self.shared.tx.is_closed()
    }

    fn submit(&self, cmd: Command<V>) -> StoreResult<()> {
        if *self.shared.shutdown.borrow() {
            return Err(StoreError::Closed);
        }
        self.shared.tx.send(cmd).map_err(|_| StoreError::Closed)
    }

    fn ensure_not_worker(&self) -> StoreResult<()> {
        if thread::current().id() == self.shared.worker_id {
            return Err(StoreError::Reentrant);
        }
        Ok(())
    }
}

impl<V> Clone for TtlStore<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> Default for TtlStore<V>
where
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for TtlStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlStore")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (TtlStore<String>, ManualClock) {
        let clock = ManualClock::new();
        let store = TtlStore::builder().clock(clock.clone()).build().unwrap();
        (store, clock)
    }

    #[test]
    fn get_missing_key() {
        let (store, _) = store_with_clock();
        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn set_then_get() {
        let (store, _) = store_with_clock();
        store
            .set("key", "value".to_string(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
    }

    #[test]
    fn negative_ttl_is_invisible() {
        let (store, _) = store_with_clock();
        store
            .set("key", "value".to_string(), Ttl::from_nanos(-5))
            .unwrap();
        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn expires_after_clock_advance() {
        let (store, clock) = store_with_clock();
        store
            .set("key", "value".to_string(), Ttl::from_millis(100))
            .unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));

        clock.advance(Duration::from_millis(100));
        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn get_or_set_computes_once() {
        let (store, _) = store_with_clock();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = store
                .get_or_set("key", Duration::from_secs(5), move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "x".to_string()
                })
                .unwrap();
            assert_eq!(value, "x");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_or_set_recomputes_after_expiry() {
        let (store, clock) = store_with_clock();
        store
            .get_or_set("key", Ttl::from_millis(10), || "old".to_string())
            .unwrap();
        clock.advance(Duration::from_millis(20));

        let value = store
            .get_or_set("key", Duration::from_secs(5), || "new".to_string())
            .unwrap();
        assert_eq!(value, "new");
        assert_eq!(store.get("key").unwrap(), Some("new".to_string()));
    }

    #[test]
    fn prune_returns_removed_count() {
        let (store, clock) = store_with_clock();
        store.set("a", "v".to_string(), Ttl::from_nanos(-5)).unwrap();
        store.set("b", "v".to_string(), Ttl::from_millis(10)).unwrap();
        store.set("c", "v".to_string(), Duration::from_secs(5)).unwrap();

        assert_eq!(store.prune().unwrap(), 1);
        clock.advance(Duration::from_millis(10));
        assert_eq!(store.prune().unwrap(), 1);
        assert_eq!(store.prune().unwrap(), 0);
        assert_eq!(store.get("c").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn operations_after_shutdown_are_rejected() {
        let (store, _) = store_with_clock();
        store
            .set("key", "value".to_string(), Duration::from_secs(5))
            .unwrap();
        store.shutdown();

        assert!(store.is_closed());
        assert!(matches!(
            store.set("key", "value".to_string(), Duration::from_secs(5)),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.get("key"), Err(StoreError::Closed)));
        assert!(matches!(
            store.get_or_set("key", Duration::from_secs(5), || "x".to_string()),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.prune(), Err(StoreError::Closed)));
    }

    #[test]
    fn shutdown_is_idempotent_across_clones() {
        let (store, _) = store_with_clock();
        let other = store.clone();
        store.shutdown();
        other.shutdown();
        store.shutdown();
        assert!(matches!(other.get("key"), Err(StoreError::Closed)));
    }

    #[test]
    fn compute_panic_keeps_worker_alive() {
        let (store, _) = store_with_clock();
        let result = store.get_or_set("key", Duration::from_secs(5), || -> String {
            panic!("compute falhou")
        });
        match result {
            Err(StoreError::ComputePanicked(msg)) => assert_eq!(msg, "compute falhou"),
            other => panic!("esperado ComputePanicked, veio {other:?}"),
        }

        assert_eq!(store.get("key").unwrap(), None);
        store
            .set("key", "value".to_string(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
    }

    #[test]
    fn reentrant_call_is_rejected() {
        let store: TtlStore<bool> = TtlStore::new();
        let inner = store.clone();
        let rejected = store
            .get_or_set("key", Duration::from_secs(5), move || {
                matches!(inner.get("other"), Err(StoreError::Reentrant))
            })
            .unwrap();
        assert!(rejected);
    }

    #[test]
    fn reentrant_async_call_is_rejected() {
        use std::future::Future;
        use std::task::{Context, Poll, Waker};

        let store: TtlStore<bool> = TtlStore::new();
        let inner = store.clone();
        let rejected = store
            .get_or_set("key", Duration::from_secs(5), move || {
                let mut cx = Context::from_waker(Waker::noop());
                let get = std::pin::pin!(inner.get_async("other"));
                let prune = std::pin::pin!(inner.prune_async());
                matches!(get.poll(&mut cx), Poll::Ready(Err(StoreError::Reentrant)))
                    && matches!(prune.poll(&mut cx), Poll::Ready(Err(StoreError::Reentrant)))
            })
            .unwrap();
        assert!(rejected);
    }

    #[test]
    fn worker_thread_is_named() {
        let store: TtlStore<String> = TtlStore::builder()
            .worker_name("cache-sessoes")
            .build()
            .unwrap();
        let name = store
            .get_or_set("name", Duration::from_secs(5), || {
                thread::current().name().unwrap_or_default().to_string()
            })
            .unwrap();
        assert_eq!(name, "cache-sessoes");
    }

    #[tokio::test]
    async fn async_variants_inside_runtime() {
        let store: TtlStore<u64> = TtlStore::new();
        store.set("a", 1, Duration::from_secs(5)).unwrap();
        assert_eq!(store.get_async("a").await.unwrap(), Some(1));

        let value = tokio::time::timeout(
            Duration::from_secs(1),
            store.get_or_set_async("b", Duration::from_secs(5), || 2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value, 2);

        store.set("c", 3, Ttl::from_nanos(-1)).unwrap();
        assert_eq!(store.prune_async().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn async_variants_after_shutdown() {
        let store: TtlStore<u64> = TtlStore::new();
        store.shutdown();
        assert!(matches!(
            store.get_async("a").await,
            Err(StoreError::Closed)
        ));
    }
}
