use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use ttlcache_common::{StoreError, StoreResult};

use crate::db::Db;
use crate::ttl::Ttl;

/// Função que produz o valor de um `get_or_set`.
pub(crate) type Compute<V> = Box<dyn FnOnce() -> V + Send>;

/// Operação enfileirada para o worker.
pub(crate) enum Command<V> {
    Set {
        key: String,
        value: V,
        ttl: Ttl,
    },
    Get {
        key: String,
        reply: oneshot::Sender<Option<V>>,
    },
    GetOrSet {
        key: String,
        ttl: Ttl,
        compute: Compute<V>,
        reply: oneshot::Sender<StoreResult<V>>,
    },
    Prune {
        reply: oneshot::Sender<usize>,
    },
}

impl<V: Clone> Command<V> {
    /// Executa o comando contra o mapa e responde ao chamador, se houver.
    pub fn apply(self, db: &mut Db<V>) {
        match self {
            Command::Set { key, value, ttl } => {
                db.set(key, value, ttl);
            }
            Command::Get { key, reply } => {
                respond(reply, db.get(&key));
            }
            Command::GetOrSet {
                key,
                ttl,
                compute,
                reply,
            } => {
                let result = db.get_or_try_set(key, ttl, || {
                    panic::catch_unwind(AssertUnwindSafe(compute)).map_err(|payload| {
                        let msg = panic_message(payload.as_ref());
                        warn!("compute entrou em pânico: {msg}");
                        StoreError::ComputePanicked(msg)
                    })
                });
                respond(reply, result);
            }
            Command::Prune { reply } => {
                respond(reply, db.prune());
            }
        }
    }
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    // Chamador pode ter desistido (timeout, future descartado)
    if reply.send(value).is_err() {
        debug!("resposta descartada: chamador não está mais esperando");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "payload desconhecido".to_string()
    }
}
