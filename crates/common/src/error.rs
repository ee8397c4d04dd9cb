/// Erros do TTL store.
///
/// Ausência de chave não é erro: é modelada como `None`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store encerrado")]
    Closed,
    #[error("chamada reentrante a partir do worker (compute não pode usar o store)")]
    Reentrant,
    #[error("compute entrou em pânico: {0}")]
    ComputePanicked(String),
    #[error("falha ao iniciar o worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias.
pub type StoreResult<T> = Result<T, StoreError>;
