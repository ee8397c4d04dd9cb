use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::command::Command;
use crate::db::Db;

/// Dono exclusivo do mapa: executa um comando por vez, na ordem de chegada.
pub(crate) struct Worker<V> {
    db: Db<V>,
    rx: mpsc::UnboundedReceiver<Command<V>>,
    shutdown: watch::Receiver<bool>,
}

impl<V: Clone> Worker<V> {
    pub fn new(
        db: Db<V>,
        rx: mpsc::UnboundedReceiver<Command<V>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { db, rx, shutdown }
    }

    /// Loop principal. Termina no sinal de shutdown ou quando todos os
    /// handles foram descartados; comandos ainda na fila são descartados
    /// sem executar, e seus chamadores recebem `Closed`.
    pub async fn run(mut self) {
        info!("worker iniciado");

        loop {
            tokio::select! {
                biased;
                // O único valor enviado é `true`; sender descartado também encerra
                _ = self.shutdown.changed() => {
                    info!("shutdown signal recebido");
                    break;
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => cmd.apply(&mut self.db),
                        None => {
                            info!("todos os handles descartados");
                            break;
                        }
                    }
                }
            }
        }

        // Fecha antes de drenar: envios concorrentes ou entram no dreno ou
        // falham no `send`. Nenhum reply fica pendurado na fila.
        self.rx.close();
        let mut dropped = 0usize;
        while let Some(cmd) = self.rx.recv().await {
            drop(cmd);
            dropped += 1;
        }
        if dropped > 0 {
            debug!("{dropped} comandos descartados no shutdown");
        }

        info!("worker encerrado");
    }
}
